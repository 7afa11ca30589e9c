//! The logical openPMD hierarchy.
//!
//! A [`Series`] groups iterations; an [`Iteration`] groups meshes and
//! particle species; records group typed N-dimensional components. All of
//! them are value-semantic handles onto shared node state, and every
//! observable operation is deferred onto the backend's task queue until a
//! flush point.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod attributable;
mod component;
mod container;
mod filename;
mod iteration;
mod mesh;
mod particle;
mod record;
mod series;
mod streaming;

pub use attributable::{Attributable, AttributableData};
pub use component::{DataHandle, RecordComponent, Span};
pub use container::{Container, ContainerElement};
pub use iteration::{CloseStatus, Iteration, StepStatus};
pub use mesh::{DataOrder, Geometry, Mesh};
pub use particle::{ParticlePatches, ParticleSpecies, PatchRecord, PatchRecordComponent};
pub use record::{Record, SCALAR};
pub use series::{Series, SeriesBuilder};
pub use streaming::{IndexedIteration, ReadIterations, WriteIterations};

// the user-facing vocabulary of the data model
pub use pmd_io::{AdvanceStatus, FlushLevel};
pub use pmd_types::{
    Access, Attribute, Buffer, ChunkInfo, ChunkTable, Dataset, Datatype, Extent, Format,
    IterationEncoding, Offset, PmdScalar, UnitDimension, WrittenChunkInfo,
};

use snafu::Snafu;

/// Errors surfaced by the frontend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("no such file: {}", path))]
    NoSuchFile { path: String },

    #[snafu(display("wrong API usage: {}", message))]
    WrongApiUsage { message: String },

    #[snafu(display("invalid operation: {}", message))]
    InvalidOperation { message: String },

    #[snafu(display("unsupported data: {}", message))]
    UnsupportedData { message: String },

    #[snafu(display("malformed backend configuration: {}", source))]
    BackendConfigSchema { source: pmd_config::Error },

    #[snafu(display("backend error: {}", source))]
    Backend { source: pmd_io::Error },

    #[snafu(display("parse error ({}): {}", kind, message))]
    Read { kind: ReadErrorKind, message: String },
}

/// Structural violations encountered while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorKind {
    NotFound,
    UnexpectedContent,
    OutOfRange,
}

impl std::fmt::Display for ReadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let repr = match self {
            Self::NotFound => "not found",
            Self::UnexpectedContent => "unexpected content",
            Self::OutOfRange => "out of range",
        };
        f.write_str(repr)
    }
}

impl From<pmd_io::Error> for Error {
    fn from(source: pmd_io::Error) -> Self {
        match source {
            pmd_io::Error::NoSuchFile { path } => Self::NoSuchFile { path },
            pmd_io::Error::ReadNotFound { what } => Self::Read {
                kind: ReadErrorKind::NotFound,
                message: what,
            },
            pmd_io::Error::ReadUnexpectedContent { what, message } => Self::Read {
                kind: ReadErrorKind::UnexpectedContent,
                message: format!("{what}: {message}"),
            },
            other => Self::Backend { source: other },
        }
    }
}

impl From<pmd_types::Error> for Error {
    fn from(source: pmd_types::Error) -> Self {
        Self::InvalidOperation {
            message: source.to_string(),
        }
    }
}

impl From<pmd_config::Error> for Error {
    fn from(source: pmd_config::Error) -> Self {
        Self::BackendConfigSchema { source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn wrong_api(message: impl Into<String>) -> Error {
    Error::WrongApiUsage {
        message: message.into(),
    }
}

pub(crate) fn invalid_operation(message: impl Into<String>) -> Error {
    Error::InvalidOperation {
        message: message.into(),
    }
}
