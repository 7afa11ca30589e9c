//! A handler that performs no IO at all.

use crate::{FlushParams, IoHandler, IoTask, Result};
use pmd_types::Access;

/// Used when a series is valid but not referenced by any storage: tasks are
/// accepted and dropped, flushes succeed immediately.
#[derive(Debug)]
pub struct DummyIoHandler {
    directory: String,
    access: Access,
}

impl DummyIoHandler {
    pub fn new(directory: String, access: Access) -> Self {
        Self { directory, access }
    }
}

impl IoHandler for DummyIoHandler {
    fn enqueue(&mut self, _task: IoTask) {}

    fn flush(&mut self, _params: &FlushParams) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "DUMMY"
    }

    fn directory(&self) -> &str {
        &self.directory
    }

    fn frontend_access(&self) -> Access {
        self.access
    }

    fn backend_access(&self) -> Access {
        self.access
    }
}
