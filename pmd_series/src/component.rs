//! The typed, N-dimensional leaf of the hierarchy.

use crate::{
    invalid_operation, wrong_api, Attributable, AttributableData, ContainerElement, Result,
};
use parking_lot::Mutex;
use pmd_io::{
    AvailableChunks, CreateDataset, CreatePath, ExtendDataset, FlushLevel, FlushParams,
    GetBufferView, OutputHandle, Parameter, ReadDataset, WriteAtt, WriteDataset,
};
use pmd_types::{Attribute, Buffer, ChunkTable, Dataset, Datatype, Extent, Offset, PmdScalar};
use std::collections::VecDeque;
use std::sync::Arc;

/// What backs the component's values.
#[derive(Debug, Clone, PartialEq)]
enum Variant {
    /// A real dataset in the backend.
    Regular,
    /// Every point takes the same value; persisted as the two attributes
    /// `value` and `shape` instead of a dataset.
    Constant(Attribute),
    /// A dataset with zero points, persisted with its zero extent.
    Empty,
}

#[derive(Debug)]
struct ComponentState {
    dataset: Option<Dataset>,
    variant: Variant,
    has_been_extended: bool,
}

/// A pending span-based store: snapshots its buffer at flush time.
type SpanWrite = Box<dyn Fn() -> (Offset, Extent, Buffer) + Send>;

/// One typed multidimensional dataset plus its attributes.
#[derive(Clone)]
pub struct RecordComponent {
    data: AttributableData,
    state: Arc<Mutex<ComponentState>>,
    chunks: Arc<Mutex<VecDeque<Parameter>>>,
    span_writes: Arc<Mutex<Vec<SpanWrite>>>,
}

impl std::fmt::Debug for RecordComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordComponent")
            .field("data", &self.data)
            .field("state", &self.state)
            .field("pending_chunks", &self.chunks.lock().len())
            .field("pending_spans", &self.span_writes.lock().len())
            .finish()
    }
}

impl Attributable for RecordComponent {
    fn node(&self) -> &AttributableData {
        &self.data
    }
}

impl ContainerElement for RecordComponent {
    fn new_child(parent: &AttributableData, key: &str) -> Self {
        Self::wired(AttributableData::child_of(parent, key))
    }

    fn element_node(&self) -> &AttributableData {
        &self.data
    }
}

impl RecordComponent {
    pub(crate) fn wired(data: AttributableData) -> Self {
        data.set_attribute_raw("unitSI", Attribute::Double(1.0));
        Self {
            data,
            state: Arc::new(Mutex::new(ComponentState {
                dataset: None,
                variant: Variant::Regular,
                has_been_extended: false,
            })),
            chunks: Arc::new(Mutex::new(VecDeque::new())),
            span_writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Conversion factor of the stored values to SI.
    pub fn unit_si(&self) -> f64 {
        self.get_attribute("unitSI")
            .and_then(|a| a.as_f64())
            .unwrap_or(1.0)
    }

    pub fn set_unit_si(&self, unit_si: f64) -> &Self {
        self.data
            .set_attribute_raw("unitSI", Attribute::Double(unit_si));
        self
    }

    /// Declare (or grow) the dataset behind this component.
    ///
    /// Before the first flush this seeds datatype and extent. Afterwards
    /// the datatype is fixed and extents may only grow.
    pub fn reset_dataset(&self, mut dataset: Dataset) -> Result<&Self> {
        let mut state = self.state.lock();
        if self.data.writable().written() {
            let current = state
                .dataset
                .as_ref()
                .ok_or_else(|| wrong_api("written component without a dataset"))?;
            if dataset.dtype == Datatype::Undefined {
                dataset.dtype = current.dtype;
            } else if !dataset.dtype.is_same(&current.dtype) {
                return Err(invalid_operation(format!(
                    "cannot change the datatype of a dataset from {} to {}",
                    current.dtype, dataset.dtype
                )));
            }
            let mut grown = current.clone();
            grown.extend(dataset.extent.clone())?;
            state.dataset = Some(grown);
            state.has_been_extended = true;
        } else {
            if dataset.extent.iter().any(|&d| d == 0) {
                state.variant = Variant::Empty;
            } else {
                state.variant = Variant::Regular;
            }
            state.dataset = Some(dataset);
        }
        self.data.writable().set_dirty(true);
        Ok(self)
    }

    /// Declare that every point of this component takes `value`.
    ///
    /// Physically stored as the attributes `value` and `shape` on the
    /// component's path; chunk writes are rejected afterwards.
    pub fn make_constant<T: PmdScalar>(&self, value: T) -> Result<&Self> {
        self.make_constant_with(value.to_attribute())
    }

    pub fn make_constant_with(&self, value: Attribute) -> Result<&Self> {
        let mut state = self.state.lock();
        if self.data.writable().written() && !matches!(state.variant, Variant::Constant(_)) {
            return Err(wrong_api(
                "cannot turn an already written component into a constant one",
            ));
        }
        if state.dataset.is_none() {
            return Err(wrong_api(
                "declare the dataset with reset_dataset before make_constant",
            ));
        }
        state.variant = Variant::Constant(value);
        self.data.writable().set_dirty(true);
        Ok(self)
    }

    /// Declare a component of the given dimensionality without any points.
    pub fn make_empty(&self, dtype: Datatype, rank: usize) -> Result<&Self> {
        if rank == 0 {
            return Err(invalid_operation("dataset extent must be at least 1D"));
        }
        let mut state = self.state.lock();
        if self.data.writable().written() {
            return Err(wrong_api("cannot empty an already written component"));
        }
        state.dataset = Some(Dataset::new(dtype, vec![0; rank]));
        state.variant = Variant::Empty;
        drop(state);
        self.data.writable().set_dirty(true);
        Ok(self)
    }

    /// Whether the component stores one constant value instead of data.
    pub fn constant(&self) -> bool {
        matches!(self.state.lock().variant, Variant::Constant(_))
    }

    /// Whether the component holds zero points.
    pub fn empty(&self) -> bool {
        matches!(self.state.lock().variant, Variant::Empty)
    }

    pub fn datatype(&self) -> Datatype {
        self.state
            .lock()
            .dataset
            .as_ref()
            .map(|d| d.dtype)
            .unwrap_or(Datatype::Undefined)
    }

    pub fn extent(&self) -> Extent {
        self.state
            .lock()
            .dataset
            .as_ref()
            .map(|d| d.extent.clone())
            .unwrap_or_default()
    }

    pub fn rank(&self) -> usize {
        self.extent().len()
    }

    fn checked_dataset(&self, offset: &[u64], extent: &[u64]) -> Result<Dataset> {
        let state = self.state.lock();
        let dataset = state
            .dataset
            .as_ref()
            .ok_or_else(|| wrong_api("no dataset declared, call reset_dataset first"))?;
        dataset.check_slab(offset, extent)?;
        Ok(dataset.clone())
    }

    /// Queue a typed slab for writing. The data is captured by the task;
    /// the write happens at the next flush.
    pub fn store_chunk<T: PmdScalar>(
        &self,
        data: Vec<T>,
        offset: Offset,
        extent: Extent,
    ) -> Result<()> {
        self.store_chunk_buffer(T::into_buffer(data), offset, extent)
    }

    pub fn store_chunk_buffer(&self, data: Buffer, offset: Offset, extent: Extent) -> Result<()> {
        {
            let state = self.state.lock();
            match state.variant {
                Variant::Constant(_) => {
                    return Err(invalid_operation(
                        "chunks cannot be stored on a constant component",
                    ))
                }
                Variant::Empty => {
                    return Err(invalid_operation(
                        "chunks cannot be stored on an empty component",
                    ))
                }
                Variant::Regular => {}
            }
        }
        let dataset = self.checked_dataset(&offset, &extent)?;
        if !dataset.dtype.is_same(&data.dtype()) {
            return Err(invalid_operation(format!(
                "chunk of {} stored on a dataset of {}",
                data.dtype(),
                dataset.dtype
            )));
        }
        let points: u64 = extent.iter().product();
        if data.len() as u64 != points {
            return Err(invalid_operation(format!(
                "buffer holds {} elements but the selected extent covers {points} points",
                data.len()
            )));
        }
        self.chunks
            .lock()
            .push_back(Parameter::WriteDataset(WriteDataset {
                offset,
                extent,
                data,
            }));
        self.data.writable().set_dirty(true);
        Ok(())
    }

    /// Queue a typed slab for reading. The returned handle is valid after
    /// the next flush.
    pub fn load_chunk<T: PmdScalar>(&self, offset: Offset, extent: Extent) -> Result<DataHandle<T>> {
        let (variant, dataset) = {
            let state = self.state.lock();
            (
                state.variant.clone(),
                state.dataset.clone().ok_or_else(|| {
                    wrong_api("no dataset declared, nothing to load")
                })?,
            )
        };
        if !dataset.dtype.is_same(&T::DATATYPE) {
            return Err(invalid_operation(format!(
                "loading {} from a dataset of {}; type conversion on load is not implemented",
                T::DATATYPE,
                dataset.dtype
            )));
        }
        dataset.check_slab(&offset, &extent)?;
        let points: u64 = extent.iter().product();

        match variant {
            Variant::Empty => Ok(DataHandle::preset(Vec::new())),
            Variant::Constant(value) => {
                let buffer = Buffer::filled(&value, points as usize).ok_or_else(|| {
                    invalid_operation(format!(
                        "constant value of {} has no slab representation",
                        value.dtype()
                    ))
                })?;
                let data = T::slice_of(&buffer)
                    .ok_or_else(|| {
                        invalid_operation(format!(
                            "constant value of {} does not match the requested {}",
                            value.dtype(),
                            T::DATATYPE
                        ))
                    })?
                    .to_vec();
                Ok(DataHandle::preset(data))
            }
            Variant::Regular => {
                let read = ReadDataset {
                    offset,
                    extent,
                    dtype: dataset.dtype,
                    data: OutputHandle::new(),
                };
                let handle = DataHandle::deferred(read.data.clone());
                self.chunks.lock().push_back(Parameter::ReadDataset(read));
                self.data.writable().set_dirty(true);
                Ok(handle)
            }
        }
    }

    /// Span-based store: obtain a buffer owned by the IO layer, fill it in
    /// place, and have it written at the next flush. The span must not be
    /// used after that flush point.
    pub fn store_chunk_span<T: PmdScalar + Default>(
        &self,
        offset: Offset,
        extent: Extent,
    ) -> Result<Span<T>> {
        let dataset = self.checked_dataset(&offset, &extent)?;
        if !dataset.dtype.is_same(&T::DATATYPE) {
            return Err(invalid_operation(format!(
                "span of {} on a dataset of {}",
                T::DATATYPE,
                dataset.dtype
            )));
        }
        // ask the backend whether it can hand out its own buffer
        let view = GetBufferView {
            offset: offset.clone(),
            extent: extent.clone(),
            dtype: dataset.dtype,
            update: false,
            out: OutputHandle::new(),
        };
        self.chunks.lock().push_back(Parameter::GetBufferView(view));

        let points: u64 = extent.iter().product();
        let span = Span {
            buffer: Arc::new(Mutex::new(vec![T::default(); points as usize])),
        };
        let captured = Arc::clone(&span.buffer);
        self.span_writes.lock().push(Box::new(move || {
            let snapshot = captured.lock().clone();
            (offset.clone(), extent.clone(), T::into_buffer(snapshot))
        }));
        self.data.writable().set_dirty(true);
        Ok(span)
    }

    /// The chunks a reader can load from this component.
    pub fn available_chunks(&self) -> Result<ChunkTable> {
        let state = self.state.lock();
        match &state.variant {
            Variant::Constant(_) | Variant::Empty => {
                let extent = state
                    .dataset
                    .as_ref()
                    .map(|d| d.extent.clone())
                    .unwrap_or_default();
                let offset = vec![0; extent.len()];
                drop(state);
                Ok(vec![pmd_types::WrittenChunkInfo::new(offset, extent, 0)])
            }
            Variant::Regular => {
                drop(state);
                let request = AvailableChunks::default();
                self.data
                    .enqueue(Parameter::AvailableChunks(request.clone()));
                self.data.flush_handler(&FlushParams::default())?;
                request.chunks.take().ok_or_else(|| {
                    wrong_api("backend did not report available chunks; flush the series first")
                })
            }
        }
    }

    pub(crate) fn has_pending_chunks(&self) -> bool {
        !self.chunks.lock().is_empty() || !self.span_writes.lock().is_empty()
    }

    /// Enqueue this component's backend representation under `name`,
    /// relative to its parent node.
    pub(crate) fn flush(&self, name: &str, params: &FlushParams) -> Result<()> {
        if params.flush_level == FlushLevel::SkeletonOnly {
            let state = self.state.lock();
            // structural skeleton only: paths for constants, no datasets
            if !self.data.writable().written() {
                if let Variant::Constant(_) = state.variant {
                    self.data.enqueue(Parameter::CreatePath(CreatePath {
                        path: name.to_owned(),
                    }));
                }
            }
            return Ok(());
        }

        let read_only = {
            let handler = self.data.handler().lock();
            handler.frontend_access().is_read()
        };
        if read_only {
            self.drain_chunks();
            self.data.writable().set_dirty(false);
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            let dataset = state
                .dataset
                .clone()
                .ok_or_else(|| wrong_api(format!("component \"{name}\" has no dataset")))?;
            if !self.data.writable().written() {
                match &state.variant {
                    Variant::Constant(value) => {
                        self.data.enqueue(Parameter::CreatePath(CreatePath {
                            path: name.to_owned(),
                        }));
                        self.data.enqueue(Parameter::WriteAtt(WriteAtt {
                            name: "value".to_owned(),
                            attribute: value.clone(),
                        }));
                        self.data.enqueue(Parameter::WriteAtt(WriteAtt {
                            name: "shape".to_owned(),
                            attribute: Attribute::VecUlong(dataset.extent.clone()),
                        }));
                    }
                    Variant::Regular | Variant::Empty => {
                        self.data.enqueue(Parameter::CreateDataset(CreateDataset {
                            name: name.to_owned(),
                            dataset: dataset.clone(),
                        }));
                    }
                }
            }
            if state.has_been_extended {
                match &state.variant {
                    Variant::Constant(_) => {
                        self.data.enqueue(Parameter::WriteAtt(WriteAtt {
                            name: "shape".to_owned(),
                            attribute: Attribute::VecUlong(dataset.extent),
                        }));
                    }
                    _ => {
                        self.data.enqueue(Parameter::ExtendDataset(ExtendDataset {
                            extent: dataset.extent,
                        }));
                    }
                }
                state.has_been_extended = false;
            }
        }

        self.drain_chunks();
        self.data.flush_attributes(&["unitSI"]);
        self.data.writable().set_dirty(false);
        Ok(())
    }

    fn drain_chunks(&self) {
        for write in self.span_writes.lock().drain(..) {
            let (offset, extent, data) = write();
            self.chunks
                .lock()
                .push_back(Parameter::WriteDataset(WriteDataset {
                    offset,
                    extent,
                    data,
                }));
        }
        let mut chunks = self.chunks.lock();
        while let Some(parameter) = chunks.pop_front() {
            self.data.enqueue(parameter);
        }
    }

    /// Populate this component from the backend: either a real dataset
    /// under `name`, or a constant encoded as `value`/`shape` attributes.
    pub(crate) fn parse(&self, name: &str, is_constant: bool) -> Result<()> {
        if is_constant {
            // the node is a group carrying value and shape
            self.data.enqueue(Parameter::OpenPath(pmd_io::OpenPath {
                path: name.to_owned(),
            }));
            self.parse_constant_in_place()?;
            return Ok(());
        } else {
            let open = pmd_io::OpenDataset {
                name: name.to_owned(),
                dtype: OutputHandle::new(),
                extent: OutputHandle::new(),
            };
            self.data.enqueue(Parameter::OpenDataset(open.clone()));
            self.data.flush_handler(&FlushParams::default())?;
            let dtype = open.dtype.take().ok_or_else(|| crate::Error::Read {
                kind: crate::ReadErrorKind::UnexpectedContent,
                message: format!("dataset {name} reported no datatype"),
            })?;
            let extent = open.extent.take().unwrap_or_default();
            let mut state = self.state.lock();
            state.variant = if extent.iter().any(|&e| e == 0) {
                Variant::Empty
            } else {
                Variant::Regular
            };
            state.dataset = Some(Dataset::new(dtype, extent));
        }
        self.data.read_attributes()?;
        self.data.writable().set_dirty(false);
        Ok(())
    }

    /// Read back a constant component whose path is already open (or will
    /// be, earlier in the task queue): fetch `value` and `shape`.
    pub(crate) fn parse_constant_in_place(&self) -> Result<()> {
        let value = pmd_io::ReadAtt {
            name: "value".to_owned(),
            attribute: OutputHandle::new(),
        };
        let shape = pmd_io::ReadAtt {
            name: "shape".to_owned(),
            attribute: OutputHandle::new(),
        };
        self.data.enqueue(Parameter::ReadAtt(value.clone()));
        self.data.enqueue(Parameter::ReadAtt(shape.clone()));
        self.data.flush_handler(&FlushParams::default())?;

        let value = value.attribute.take().ok_or_else(|| crate::Error::Read {
            kind: crate::ReadErrorKind::NotFound,
            message: "constant component lacks a value".to_owned(),
        })?;
        let extent = shape
            .attribute
            .take()
            .and_then(|a| a.as_vec_u64())
            .ok_or_else(|| crate::Error::Read {
                kind: crate::ReadErrorKind::UnexpectedContent,
                message: "constant component has no usable shape".to_owned(),
            })?;
        {
            let mut state = self.state.lock();
            state.dataset = Some(Dataset::new(value.dtype(), extent));
            state.variant = Variant::Constant(value);
        }
        self.data.read_attributes()?;
        self.data.writable().set_dirty(false);
        Ok(())
    }
}

/// The typed result of a deferred chunk load. Valid after the flush that
/// executes the read.
#[derive(Debug, Clone)]
pub struct DataHandle<T> {
    output: Option<OutputHandle<Buffer>>,
    preset: Option<Vec<T>>,
}

impl<T: PmdScalar> DataHandle<T> {
    fn preset(data: Vec<T>) -> Self {
        Self {
            output: None,
            preset: Some(data),
        }
    }

    fn deferred(output: OutputHandle<Buffer>) -> Self {
        Self {
            output: Some(output),
            preset: None,
        }
    }

    /// The loaded values. Errors if the series has not been flushed since
    /// the load was queued.
    pub fn get(&self) -> Result<Vec<T>> {
        if let Some(preset) = &self.preset {
            return Ok(preset.clone());
        }
        let buffer = self
            .output
            .as_ref()
            .and_then(OutputHandle::get)
            .ok_or_else(|| wrong_api("chunk not yet loaded; flush the series first"))?;
        T::slice_of(&buffer)
            .map(<[T]>::to_vec)
            .ok_or_else(|| invalid_operation("backend returned a buffer of a different datatype"))
    }
}

/// A mutable staging buffer for span-based stores.
#[derive(Debug, Clone)]
pub struct Span<T> {
    buffer: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Span<T> {
    /// Overwrite the staged content.
    pub fn fill_from(&self, data: &[T]) {
        let mut buffer = self.buffer.lock();
        let n = buffer.len().min(data.len());
        buffer[..n].clone_from_slice(&data[..n]);
    }

    /// Run `f` over the staged buffer.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [T]) -> R) -> R {
        f(&mut self.buffer.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pmd_io::{DummyIoHandler, SharedIoHandler};
    use pmd_types::Access;

    fn component() -> RecordComponent {
        let handler: SharedIoHandler = Arc::new(Mutex::new(DummyIoHandler::new(
            ".".to_owned(),
            Access::Create,
        )));
        RecordComponent::wired(AttributableData::new(handler))
    }

    #[test]
    fn dataset_negotiation() {
        let c = component();
        c.reset_dataset(Dataset::new(Datatype::Double, vec![4, 4]))
            .unwrap();
        assert_eq!(c.datatype(), Datatype::Double);
        assert_eq!(c.extent(), vec![4, 4]);

        // before the first flush the declaration may be replaced freely
        c.reset_dataset(Dataset::new(Datatype::Long, vec![2])).unwrap();
        assert_eq!(c.datatype(), Datatype::Long);

        // after a write, growing is fine, shrinking and retyping are not
        c.node().writable().set_written(true);
        c.reset_dataset(Dataset::new(Datatype::Undefined, vec![5])).unwrap();
        assert_eq!(c.extent(), vec![5]);
        assert!(c
            .reset_dataset(Dataset::new(Datatype::Double, vec![5]))
            .is_err());
        assert!(c.reset_dataset(Dataset::new(Datatype::Long, vec![3])).is_err());
    }

    #[test]
    fn store_chunk_validates() {
        let c = component();
        c.reset_dataset(Dataset::new(Datatype::Long, vec![5])).unwrap();

        // dtype mismatch
        assert!(c
            .store_chunk(vec![1.0f64, 2.0], vec![0], vec![2])
            .is_err());
        // out of bounds
        assert!(c
            .store_chunk(vec![1i64; 6], vec![0], vec![6])
            .is_err());
        // wrong buffer length
        assert!(c.store_chunk(vec![1i64; 2], vec![0], vec![3]).is_err());

        c.store_chunk(vec![0i64, 1, 2, 3, 4], vec![0], vec![5]).unwrap();
        assert!(c.has_pending_chunks());
    }

    #[test]
    fn constant_components_reject_chunks_and_serve_loads() {
        let c = component();
        c.reset_dataset(Dataset::new(Datatype::Double, vec![2, 3]))
            .unwrap();
        c.make_constant(2.5f64).unwrap();
        assert!(c.constant());

        assert!(c.store_chunk(vec![0.0f64; 6], vec![0, 0], vec![2, 3]).is_err());

        let handle = c.load_chunk::<f64>(vec![0, 0], vec![2, 2]).unwrap();
        assert_eq!(handle.get().unwrap(), vec![2.5; 4]);

        // any sub-slab works
        let handle = c.load_chunk::<f64>(vec![1, 2], vec![1, 1]).unwrap();
        assert_eq!(handle.get().unwrap(), vec![2.5]);
    }

    #[test]
    fn empty_components_load_nothing() {
        let c = component();
        c.make_empty(Datatype::Float, 3).unwrap();
        assert!(c.empty());
        assert_eq!(c.extent(), vec![0, 0, 0]);

        let handle = c.load_chunk::<f32>(vec![0, 0, 0], vec![0, 0, 0]).unwrap();
        assert_eq!(handle.get().unwrap(), Vec::<f32>::new());

        assert!(c.make_empty(Datatype::Float, 0).is_err());
    }

    #[test]
    fn load_requires_matching_datatype() {
        let c = component();
        c.reset_dataset(Dataset::new(Datatype::Double, vec![4])).unwrap();
        assert!(c.load_chunk::<i64>(vec![0], vec![4]).is_err());
        let pending = c.load_chunk::<f64>(vec![0], vec![4]).unwrap();
        // not flushed yet
        assert!(pending.get().is_err());
    }

    #[test]
    fn span_store_snapshots_at_flush() {
        let c = component();
        c.reset_dataset(Dataset::new(Datatype::Long, vec![3])).unwrap();
        let span = c.store_chunk_span::<i64>(vec![0], vec![3]).unwrap();
        span.fill_from(&[7, 8, 9]);
        assert!(c.has_pending_chunks());
        c.flush("x", &FlushParams::new(FlushLevel::UserFlush)).unwrap();
        assert!(!c.has_pending_chunks());
    }
}
