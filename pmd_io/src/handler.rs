//! The backend contract and handler construction.

use crate::{json::FileFormat, DummyIoHandler, IoTask, JsonIoHandler, Result};
use parking_lot::Mutex;
use pmd_config::ConfigSource;
use pmd_types::{Access, Format};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// What must be committed when the queue is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushLevel {
    /// Flush triggered by user code. Everything flushable must be
    /// committed; this defines a flush point.
    UserFlush,
    /// Flush triggered internally, e.g. while parsing. Everything
    /// committable at a non-flush-point must be performed.
    InternalFlush,
    /// Set up the structural skeleton only: no dataset creation, no chunk
    /// transfer.
    SkeletonOnly,
    /// Only create or open files.
    CreateOrOpenFiles,
}

/// Parameters handed down the hierarchy when flushing.
#[derive(Debug, Clone, Copy)]
pub struct FlushParams {
    pub flush_level: FlushLevel,
}

impl FlushParams {
    pub fn new(flush_level: FlushLevel) -> Self {
        Self { flush_level }
    }
}

impl Default for FlushParams {
    fn default() -> Self {
        // reading paths flush internally
        Self::new(FlushLevel::InternalFlush)
    }
}

/// Interface between logical and physically persistent data.
///
/// Operations are channeled through a FIFO task queue that is only
/// processed on demand: [`IoHandler::flush`] executes all pending tasks in
/// enqueue order, populating their output handles in place. Output handles
/// stay valid after the flush returns.
pub trait IoHandler: Debug + Send {
    /// Append a task; it runs after all previously enqueued tasks.
    fn enqueue(&mut self, task: IoTask);

    /// Execute the queue. Returning `Ok` guarantees that every output
    /// handle of the executed tasks has been populated.
    fn flush(&mut self, params: &FlushParams) -> Result<()>;

    /// Name of the concrete backend, e.g. `"JSON"`.
    fn backend_name(&self) -> &'static str;

    /// Directory all file names are relative to.
    fn directory(&self) -> &str;

    /// The access mode the frontend observes. Streaming backends that
    /// cannot seek coerce this to linear reading.
    fn frontend_access(&self) -> Access;

    /// The access mode the storage was opened with.
    fn backend_access(&self) -> Access;

    /// Whether this backend moves data in forward-only IO steps. Streaming
    /// engines cannot reopen closed iterations or seek backwards.
    fn is_streaming(&self) -> bool {
        false
    }
}

/// Handlers are shared by every node of a series.
pub type SharedIoHandler = Arc<Mutex<dyn IoHandler>>;

/// Build the handler for a format.
///
/// `original_extension` preserves the extension the user spelled (e.g.
/// `.bp4` vs `.bp`) so files keep their requested names. Formats without
/// linked support are rejected here rather than at first flush.
pub fn create_io_handler(
    format: Format,
    directory: impl Into<String>,
    access: Access,
    original_extension: &str,
    config: &ConfigSource,
) -> Result<SharedIoHandler> {
    let directory = directory.into();
    debug!(%format, %access, %directory, "constructing IO handler");
    match format {
        Format::Json => Ok(Arc::new(Mutex::new(JsonIoHandler::new(
            directory,
            access,
            FileFormat::Json,
            original_extension,
            config,
        )?))),
        Format::Toml => Ok(Arc::new(Mutex::new(JsonIoHandler::new(
            directory,
            access,
            FileFormat::Toml,
            original_extension,
            config,
        )?))),
        Format::Dummy => Ok(Arc::new(Mutex::new(DummyIoHandler::new(directory, access)))),
        unsupported => crate::NoBackendSupportSnafu {
            format: unsupported,
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn unsupported_formats_are_rejected_at_construction() {
        let config = ConfigSource::empty();
        for format in [Format::Hdf5, Format::Adios2Bp, Format::Adios2Sst] {
            let err = create_io_handler(format, ".", Access::Create, "", &config).unwrap_err();
            assert!(matches!(err, Error::NoBackendSupport { .. }));
        }
    }

    #[test]
    fn dummy_handler_constructs() {
        let config = ConfigSource::empty();
        let handler = create_io_handler(Format::Dummy, ".", Access::Create, "", &config).unwrap();
        assert_eq!(handler.lock().backend_name(), "DUMMY");
    }
}
