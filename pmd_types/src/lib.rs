//! Shared plain data types: the datatype lattice, dynamically typed
//! attributes and buffers, dataset descriptors and chunk geometry.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod access;
mod attribute;
mod buffer;
mod chunk;
mod dataset;
mod datatype;
mod encoding;
mod format;

pub use access::Access;
pub use attribute::{Attribute, UnitDimension};
pub use buffer::{Buffer, PmdScalar};
pub use chunk::{ChunkInfo, ChunkTable, WrittenChunkInfo};
pub use dataset::{Dataset, Extent, Offset};
pub use datatype::Datatype;
pub use encoding::IterationEncoding;
pub use format::Format;

use snafu::Snafu;

/// Errors raised while validating plain data values, before any backend is
/// involved.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("cannot change the datatype of a dataset from {} to {}", from, to))]
    DatatypeChange { from: Datatype, to: Datatype },

    #[snafu(display(
        "dataset extent may only grow; dimension {} shrinks from {} to {}",
        dimension,
        from,
        to
    ))]
    ExtentShrinks {
        dimension: usize,
        from: u64,
        to: u64,
    },

    #[snafu(display(
        "rank mismatch: dataset is {}-dimensional, request is {}-dimensional",
        dataset,
        request
    ))]
    RankMismatch { dataset: usize, request: usize },

    #[snafu(display(
        "chunk [{}, {}) exceeds dataset extent {} in dimension {}",
        offset,
        end,
        total,
        dimension
    ))]
    OutOfBounds {
        offset: u64,
        end: u64,
        total: u64,
        dimension: usize,
    },

    #[snafu(display("unknown datatype in string deserialization: \"{}\"", input))]
    UnknownDatatype { input: String },

    #[snafu(display("unknown access mode \"{}\"", input))]
    UnknownAccess { input: String },

    #[snafu(display("unknown iteration encoding \"{}\"", input))]
    UnknownEncoding { input: String },

    #[snafu(display(
        "buffer holds {} elements but the selected extent covers {} points",
        actual,
        expected
    ))]
    BufferLength { actual: usize, expected: u64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
