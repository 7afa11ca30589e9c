//! The deferred IO layer: shared node identities, task records and the
//! backends that execute them.
//!
//! Nothing in the logical hierarchy touches storage directly. Every
//! observable operation becomes an [`IoTask`] against a [`Writable`] and is
//! queued on an [`IoHandler`]; a flush drains the queue in FIFO order and
//! populates the tasks' output handles.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod dummy;
mod handler;
mod json;
mod task;
mod writable;

pub use dummy::DummyIoHandler;
pub use handler::{create_io_handler, FlushLevel, FlushParams, IoHandler, SharedIoHandler};
pub use json::{FileFormat, JsonIoHandler};
pub use task::{
    Advance, AdvanceMode, AdvanceStatus, AvailableChunks, BufferView, CreateDataset, CreateFile,
    CreatePath, DeleteAtt, DeleteDataset, DeleteFile, DeletePath, ExtendDataset, GetBufferView,
    IoTask, ListAtts, ListDatasets, ListPaths, OpenDataset, OpenFile, OpenPath, Operation,
    OutputHandle, Parameter, ReadAtt, ReadDataset, WriteAtt, WriteDataset,
};
pub use writable::{FilePosition, Writable};

use pmd_types::Format;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("no such file: {}", path))]
    NoSuchFile { path: String },

    #[snafu(display(
        "this build carries no support for backend '{}'; \
         only JSON/TOML storage and the dummy handler are linked",
        format
    ))]
    NoBackendSupport { format: Format },

    #[snafu(display("IO error on {}: {}", path, source))]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("{} is not valid JSON: {}", path, source))]
    InvalidJson {
        path: String,
        source: serde_json::Error,
    },

    #[snafu(display("{} is not valid TOML: {}", path, source))]
    InvalidToml {
        path: String,
        source: toml::de::Error,
    },

    #[snafu(display("cannot render {} as TOML: {}", path, source))]
    TomlRender { path: String, source: pmd_config::Error },

    #[snafu(display("not found while reading: {}", what))]
    ReadNotFound { what: String },

    #[snafu(display("unexpected content while reading {}: {}", what, message))]
    ReadUnexpectedContent { what: String, message: String },

    #[snafu(display("operation {:?} is unsupported by the {} backend", operation, backend))]
    UnsupportedOperation {
        operation: Operation,
        backend: &'static str,
    },

    #[snafu(display("task targets a node without a backend position ({})", context))]
    Unpositioned { context: String },

    #[snafu(display("datatype {} has no slab representation", dtype))]
    NoSlabRepresentation { dtype: pmd_types::Datatype },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
