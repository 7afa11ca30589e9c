//! Self-contained descriptions of single IO operations.
//!
//! Read-style operations carry their results in shared [`OutputHandle`]s:
//! the backend populates them during a flush, the enqueueing side reads them
//! afterwards.

use crate::Writable;
use parking_lot::Mutex;
use pmd_types::{
    Attribute, Buffer, ChunkTable, Dataset, Datatype, Extent, IterationEncoding, Offset,
};
use std::fmt::Debug;
use std::sync::Arc;

/// Type of IO operation between logical and persistent data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateFile,
    OpenFile,
    CloseFile,
    DeleteFile,
    CreatePath,
    OpenPath,
    ClosePath,
    DeletePath,
    ListPaths,
    CreateDataset,
    ExtendDataset,
    OpenDataset,
    DeleteDataset,
    WriteDataset,
    ReadDataset,
    ListDatasets,
    GetBufferView,
    DeleteAtt,
    WriteAtt,
    ReadAtt,
    ListAtts,
    Advance,
    /// Query the chunks that can be loaded from a dataset.
    AvailableChunks,
}

/// A shared output slot, written by the backend at flush time and valid for
/// the caller afterwards.
#[derive(Debug, Clone)]
pub struct OutputHandle<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Default for OutputHandle<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> OutputHandle<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: T) {
        *self.slot.lock() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T: Clone> OutputHandle<T> {
    pub fn get(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

#[derive(Debug, Clone)]
pub struct CreateFile {
    pub name: String,
    pub encoding: IterationEncoding,
}

#[derive(Debug, Clone)]
pub struct OpenFile {
    pub name: String,
    /// Backends may need to guarantee step availability for some encodings.
    pub encoding: IterationEncoding,
}

#[derive(Debug, Clone)]
pub struct DeleteFile {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CreatePath {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct OpenPath {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct DeletePath {
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListPaths {
    pub paths: OutputHandle<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CreateDataset {
    pub name: String,
    pub dataset: Dataset,
}

#[derive(Debug, Clone)]
pub struct ExtendDataset {
    pub extent: Extent,
}

#[derive(Debug, Clone)]
pub struct OpenDataset {
    pub name: String,
    pub dtype: OutputHandle<Datatype>,
    pub extent: OutputHandle<Extent>,
}

#[derive(Debug, Clone)]
pub struct DeleteDataset {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct WriteDataset {
    pub offset: Offset,
    pub extent: Extent,
    /// Shared with the caller; must not be mutated until the flush.
    pub data: Buffer,
}

#[derive(Debug, Clone)]
pub struct ReadDataset {
    pub offset: Offset,
    pub extent: Extent,
    pub dtype: Datatype,
    pub data: OutputHandle<Buffer>,
}

#[derive(Debug, Clone, Default)]
pub struct ListDatasets {
    pub datasets: OutputHandle<Vec<String>>,
}

/// Out-parameters of [`GetBufferView`].
#[derive(Debug, Clone, Default)]
pub struct BufferView {
    pub backend_managed_buffer: bool,
    pub view_index: u32,
}

#[derive(Debug, Clone)]
pub struct GetBufferView {
    pub offset: Offset,
    pub extent: Extent,
    pub dtype: Datatype,
    pub update: bool,
    pub out: OutputHandle<BufferView>,
}

#[derive(Debug, Clone)]
pub struct DeleteAtt {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct WriteAtt {
    pub name: String,
    pub attribute: Attribute,
}

#[derive(Debug, Clone)]
pub struct ReadAtt {
    pub name: String,
    pub attribute: OutputHandle<Attribute>,
}

#[derive(Debug, Clone, Default)]
pub struct ListAtts {
    pub attributes: OutputHandle<Vec<String>>,
}

/// Which side of an IO step an [`Advance`] crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    BeginStep,
    EndStep,
}

/// Result of an [`Advance`]: `Over` signals that a stream has no further
/// steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceStatus {
    Ok,
    Over,
}

#[derive(Debug, Clone)]
pub struct Advance {
    pub mode: AdvanceMode,
    pub status: OutputHandle<AdvanceStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct AvailableChunks {
    pub chunks: OutputHandle<ChunkTable>,
}

/// Typesafe description of all required arguments for one [`Operation`].
#[derive(Debug, Clone)]
pub enum Parameter {
    CreateFile(CreateFile),
    OpenFile(OpenFile),
    CloseFile,
    DeleteFile(DeleteFile),
    CreatePath(CreatePath),
    OpenPath(OpenPath),
    ClosePath,
    DeletePath(DeletePath),
    ListPaths(ListPaths),
    CreateDataset(CreateDataset),
    ExtendDataset(ExtendDataset),
    OpenDataset(OpenDataset),
    DeleteDataset(DeleteDataset),
    WriteDataset(WriteDataset),
    ReadDataset(ReadDataset),
    ListDatasets(ListDatasets),
    GetBufferView(GetBufferView),
    DeleteAtt(DeleteAtt),
    WriteAtt(WriteAtt),
    ReadAtt(ReadAtt),
    ListAtts(ListAtts),
    Advance(Advance),
    AvailableChunks(AvailableChunks),
}

impl Parameter {
    pub fn operation(&self) -> Operation {
        match self {
            Self::CreateFile(_) => Operation::CreateFile,
            Self::OpenFile(_) => Operation::OpenFile,
            Self::CloseFile => Operation::CloseFile,
            Self::DeleteFile(_) => Operation::DeleteFile,
            Self::CreatePath(_) => Operation::CreatePath,
            Self::OpenPath(_) => Operation::OpenPath,
            Self::ClosePath => Operation::ClosePath,
            Self::DeletePath(_) => Operation::DeletePath,
            Self::ListPaths(_) => Operation::ListPaths,
            Self::CreateDataset(_) => Operation::CreateDataset,
            Self::ExtendDataset(_) => Operation::ExtendDataset,
            Self::OpenDataset(_) => Operation::OpenDataset,
            Self::DeleteDataset(_) => Operation::DeleteDataset,
            Self::WriteDataset(_) => Operation::WriteDataset,
            Self::ReadDataset(_) => Operation::ReadDataset,
            Self::ListDatasets(_) => Operation::ListDatasets,
            Self::GetBufferView(_) => Operation::GetBufferView,
            Self::DeleteAtt(_) => Operation::DeleteAtt,
            Self::WriteAtt(_) => Operation::WriteAtt,
            Self::ReadAtt(_) => Operation::ReadAtt,
            Self::ListAtts(_) => Operation::ListAtts,
            Self::Advance(_) => Operation::Advance,
            Self::AvailableChunks(_) => Operation::AvailableChunks,
        }
    }
}

/// One queued unit of work: the parameters to a single atomic operation on
/// the node a [`Writable`] stands for.
#[derive(Debug, Clone)]
pub struct IoTask {
    pub writable: Writable,
    pub parameter: Parameter,
}

impl IoTask {
    pub fn new(writable: Writable, parameter: Parameter) -> Self {
        Self { writable, parameter }
    }

    pub fn operation(&self) -> Operation {
        self.parameter.operation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_handles_are_shared() {
        let parameter = ListPaths::default();
        let clone = parameter.clone();
        parameter.paths.set(vec!["a".to_owned()]);
        assert_eq!(clone.paths.get(), Some(vec!["a".to_owned()]));
    }

    #[test]
    fn parameters_know_their_operation() {
        let task = IoTask::new(
            Writable::new(),
            Parameter::CreatePath(CreatePath {
                path: "data".to_owned(),
            }),
        );
        assert_eq!(task.operation(), Operation::CreatePath);
        assert_eq!(Parameter::CloseFile.operation(), Operation::CloseFile);
    }
}
