//! One snapshot's worth of data, and its lifecycle state machine.

use crate::{
    wrong_api, Attributable, AttributableData, Container, ContainerElement, Mesh,
    ParticleSpecies, Result,
};
use parking_lot::Mutex;
use pmd_io::{
    CreatePath, FlushLevel, FlushParams, ListDatasets, ListPaths, OpenFile, OpenPath, Parameter,
};
use pmd_types::{Attribute, IterationEncoding};
use std::sync::Arc;

/// Lifecycle of an iteration towards the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// The reader has not parsed this iteration yet.
    ParseAccessDeferred,
    /// Accepting reads and writes.
    Open,
    /// Closed by the user; the backend has not been told yet.
    ClosedInFrontend,
    /// Closed and propagated to the backend. Final.
    ClosedInBackend,
    /// The backing file is closed but may be reopened (file-based
    /// encoding, non-streaming handlers only).
    ClosedTemporarily,
}

/// Whether an IO step is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    NoStep,
    DuringStep,
}

/// Everything needed to parse an iteration later, when the user first
/// touches it.
#[derive(Debug, Clone)]
pub(crate) struct DeferredParseAccess {
    /// Absolute group path of the iteration, e.g. `/data/100`.
    pub group_path: String,
    pub file_based: bool,
    /// File name (without directory) when file-based.
    pub filename: Option<String>,
    pub meshes_path: String,
    pub particles_path: String,
}

#[derive(Debug)]
struct IterationState {
    close_status: CloseStatus,
    step_status: StepStatus,
    deferred: Option<DeferredParseAccess>,
    /// File-based encoding: the node anchoring this iteration's own file.
    file_root: Option<AttributableData>,
}

/// Logical compilation of the data from one snapshot, grouping meshes and
/// particle species.
#[derive(Debug, Clone)]
pub struct Iteration {
    data: AttributableData,
    meshes: Container<Mesh>,
    particles: Container<ParticleSpecies>,
    state: Arc<Mutex<IterationState>>,
}

impl Attributable for Iteration {
    fn node(&self) -> &AttributableData {
        &self.data
    }
}

impl ContainerElement for Iteration {
    fn new_child(parent: &AttributableData, key: &str) -> Self {
        let data = AttributableData::child_of(parent, key);
        data.set_attribute_raw("time", Attribute::Double(0.0));
        data.set_attribute_raw("dt", Attribute::Double(1.0));
        data.set_attribute_raw("timeUnitSI", Attribute::Double(1.0));
        let meshes = Container::new(&data, "meshes");
        let particles = Container::new(&data, "particles");
        Self {
            data,
            meshes,
            particles,
            state: Arc::new(Mutex::new(IterationState {
                close_status: CloseStatus::Open,
                step_status: StepStatus::NoStep,
                deferred: None,
                file_root: None,
            })),
        }
    }

    fn element_node(&self) -> &AttributableData {
        &self.data
    }
}

impl Iteration {
    /// The meshes of this snapshot. Triggers a deferred parse.
    pub fn meshes(&self) -> Result<Container<Mesh>> {
        self.run_deferred_parse_access()?;
        Ok(self.meshes.clone())
    }

    /// The particle species of this snapshot. Triggers a deferred parse.
    pub fn particles(&self) -> Result<Container<ParticleSpecies>> {
        self.run_deferred_parse_access()?;
        Ok(self.particles.clone())
    }

    /// Global reference time of this iteration.
    pub fn time(&self) -> Result<f64> {
        self.run_deferred_parse_access()?;
        self.data
            .get_attribute_raw("time")
            .and_then(|a| a.as_f64())
            .ok_or_else(|| wrong_api("iteration has no time attribute"))
    }

    pub fn set_time(&self, time: f64) -> Result<&Self> {
        self.ensure_mutable()?;
        self.data.set_attribute_raw("time", Attribute::Double(time));
        Ok(self)
    }

    /// Time step used to reach this iteration.
    pub fn dt(&self) -> Result<f64> {
        self.run_deferred_parse_access()?;
        self.data
            .get_attribute_raw("dt")
            .and_then(|a| a.as_f64())
            .ok_or_else(|| wrong_api("iteration has no dt attribute"))
    }

    pub fn set_dt(&self, dt: f64) -> Result<&Self> {
        self.ensure_mutable()?;
        self.data.set_attribute_raw("dt", Attribute::Double(dt));
        Ok(self)
    }

    /// Conversion factor of `time` and `dt` to seconds.
    pub fn time_unit_si(&self) -> Result<f64> {
        self.run_deferred_parse_access()?;
        self.data
            .get_attribute_raw("timeUnitSI")
            .and_then(|a| a.as_f64())
            .ok_or_else(|| wrong_api("iteration has no timeUnitSI attribute"))
    }

    pub fn set_time_unit_si(&self, time_unit_si: f64) -> Result<&Self> {
        self.ensure_mutable()?;
        self.data
            .set_attribute_raw("timeUnitSI", Attribute::Double(time_unit_si));
        Ok(self)
    }

    /// Whether the iteration refuses further backend-propagating access.
    pub fn closed(&self) -> bool {
        matches!(
            self.state.lock().close_status,
            CloseStatus::ClosedInFrontend | CloseStatus::ClosedInBackend
        )
    }

    /// Whether the producing writer marked this iteration closed. Useful
    /// for readers of a live series.
    pub fn closed_by_writer(&self) -> bool {
        self.data.get_attribute_raw("closed").is_some()
    }

    /// Mark this iteration closed. The closure propagates to the backend
    /// at the next series flush.
    pub fn close(&self) -> Result<&Self> {
        let mut state = self.state.lock();
        match state.close_status {
            CloseStatus::ClosedInBackend => {
                return Err(wrong_api("iteration is already closed in the backend"))
            }
            CloseStatus::ClosedInFrontend => {}
            _ => state.close_status = CloseStatus::ClosedInFrontend,
        }
        drop(state);
        let writes = {
            let handler = self.data.handler().lock();
            handler.frontend_access().is_write()
        };
        if writes {
            self.data
                .set_attribute_raw("closed", Attribute::Uchar(1));
        }
        Ok(self)
    }

    /// Explicitly (re)open this iteration.
    ///
    /// Closed iterations can be reopened on random-access backends;
    /// streaming engines refuse, their steps are gone for good.
    pub fn open(&self) -> Result<&Self> {
        let status = self.state.lock().close_status;
        match status {
            CloseStatus::Open => Ok(self),
            CloseStatus::ParseAccessDeferred => {
                self.run_deferred_parse_access()?;
                Ok(self)
            }
            CloseStatus::ClosedTemporarily => {
                self.state.lock().close_status = CloseStatus::Open;
                Ok(self)
            }
            CloseStatus::ClosedInFrontend | CloseStatus::ClosedInBackend => {
                let streaming = self.data.handler().lock().is_streaming();
                if streaming {
                    return Err(wrong_api(
                        "a closed iteration cannot be reopened on a streaming backend",
                    ));
                }
                self.state.lock().close_status = CloseStatus::Open;
                Ok(self)
            }
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.closed() {
            return Err(wrong_api("iteration has been closed, no further writes"));
        }
        Ok(())
    }

    /// The precise lifecycle state, a refinement of [`Self::closed`].
    pub fn close_status(&self) -> CloseStatus {
        self.state.lock().close_status
    }

    pub(crate) fn set_close_status(&self, status: CloseStatus) {
        self.state.lock().close_status = status;
    }

    /// Whether an IO step is active for this iteration (file-based
    /// encoding tracks steps per iteration).
    pub fn step_status(&self) -> StepStatus {
        self.state.lock().step_status
    }

    pub(crate) fn set_step_status(&self, status: StepStatus) {
        self.state.lock().step_status = status;
    }

    pub(crate) fn file_root(&self) -> Option<AttributableData> {
        self.state.lock().file_root.clone()
    }

    pub(crate) fn set_file_root(&self, file_root: AttributableData) {
        self.data.writable().set_parent(file_root.writable());
        self.state.lock().file_root = Some(file_root);
    }

    pub(crate) fn defer_parse_access(&self, deferred: DeferredParseAccess) {
        let mut state = self.state.lock();
        state.deferred = Some(deferred);
        state.close_status = CloseStatus::ParseAccessDeferred;
    }

    /// Whether any part of this iteration still has unflushed changes.
    pub(crate) fn dirty_recursive(&self) -> bool {
        if self.data.writable().dirty()
            || self.meshes.node().writable().dirty()
            || self.particles.node().writable().dirty()
        {
            return true;
        }
        for (_, mesh) in self.meshes.iter() {
            if mesh.node().writable().dirty() {
                return true;
            }
            for (_, component) in mesh.all_components() {
                if component.node().writable().dirty() || component.has_pending_chunks() {
                    return true;
                }
            }
        }
        for (_, species) in self.particles.iter() {
            if species.node().writable().dirty() {
                return true;
            }
            for record_key in species.record_keys() {
                let record = species.record(&record_key);
                if record.node().writable().dirty() {
                    return true;
                }
                for (_, component) in record.all_components() {
                    if component.node().writable().dirty() || component.has_pending_chunks() {
                        return true;
                    }
                }
            }
            let patches = species.particle_patches();
            for record_key in patches.record_keys() {
                for (_, component) in patches.record(&record_key).all_components() {
                    if component.node().writable().dirty() || component.has_pending_chunks() {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Run the postponed parse, if any. Called implicitly by every
    /// attribute read.
    pub(crate) fn run_deferred_parse_access(&self) -> Result<()> {
        let deferred = {
            let mut state = self.state.lock();
            match state.deferred.take() {
                Some(deferred) => {
                    state.close_status = CloseStatus::Open;
                    deferred
                }
                None => return Ok(()),
            }
        };
        self.parse(&deferred)
    }

    /// Read this iteration's subtree from the backend.
    pub(crate) fn parse(&self, access: &DeferredParseAccess) -> Result<()> {
        if access.file_based {
            let filename = access.filename.as_deref().ok_or_else(|| {
                wrong_api("file-based parse access without a filename")
            })?;
            let file_root = AttributableData::new(Arc::clone(self.data.handler()));
            file_root.enqueue(Parameter::OpenFile(OpenFile {
                name: filename.to_owned(),
                encoding: IterationEncoding::FileBased,
            }));
            self.set_file_root(file_root);
        }

        self.data.enqueue(Parameter::OpenPath(OpenPath {
            path: access.group_path.clone(),
        }));
        let children = ListPaths::default();
        self.data.enqueue(Parameter::ListPaths(children.clone()));
        self.data.flush_handler(&FlushParams::default())?;
        self.data.read_attributes()?;
        let children = children.paths.take().unwrap_or_default();

        if children.iter().any(|c| *c == access.meshes_path) {
            self.parse_meshes(&access.meshes_path)?;
        }
        if children.iter().any(|c| *c == access.particles_path) {
            self.parse_particles(&access.particles_path)?;
        }
        self.data.writable().set_dirty(false);
        Ok(())
    }

    fn parse_meshes(&self, meshes_path: &str) -> Result<()> {
        let node = self.meshes.node();
        node.enqueue(Parameter::OpenPath(OpenPath {
            path: meshes_path.to_owned(),
        }));
        let paths = ListPaths::default();
        let datasets = ListDatasets::default();
        node.enqueue(Parameter::ListPaths(paths.clone()));
        node.enqueue(Parameter::ListDatasets(datasets.clone()));
        node.flush_handler(&FlushParams::default())?;

        for name in datasets.datasets.take().unwrap_or_default() {
            self.meshes.get(name.as_str()).parse(&name, false)?;
        }
        for name in paths.paths.take().unwrap_or_default() {
            self.meshes.get(name.as_str()).parse(&name, true)?;
        }
        node.read_attributes()?;
        Ok(())
    }

    fn parse_particles(&self, particles_path: &str) -> Result<()> {
        let node = self.particles.node();
        node.enqueue(Parameter::OpenPath(OpenPath {
            path: particles_path.to_owned(),
        }));
        let paths = ListPaths::default();
        node.enqueue(Parameter::ListPaths(paths.clone()));
        node.flush_handler(&FlushParams::default())?;

        for name in paths.paths.take().unwrap_or_default() {
            self.particles.get(name.as_str()).parse(&name)?;
        }
        node.read_attributes()?;
        Ok(())
    }

    /// Enqueue this iteration's writable content for the backend.
    ///
    /// The group (or file) containing the iteration must already be dealt
    /// with by the caller; `group_path` is the iteration's absolute group
    /// path.
    pub(crate) fn flush_contents(
        &self,
        group_path: &str,
        meshes_path: &str,
        particles_path: &str,
        params: &FlushParams,
    ) -> Result<()> {
        if !self.data.writable().written() {
            self.data.enqueue(Parameter::CreatePath(CreatePath {
                path: group_path.to_owned(),
            }));
        }

        if !self.meshes.is_empty() {
            let node = self.meshes.node();
            if !node.writable().written() {
                node.enqueue(Parameter::CreatePath(CreatePath {
                    path: meshes_path.to_owned(),
                }));
            }
            for (name, mesh) in self.meshes.iter() {
                mesh.flush(&name, params)?;
            }
            if !matches!(
                params.flush_level,
                FlushLevel::SkeletonOnly | FlushLevel::CreateOrOpenFiles
            ) {
                node.flush_attributes(&[]);
                node.writable().set_dirty(false);
            }
        }

        if !self.particles.is_empty() {
            let node = self.particles.node();
            if !node.writable().written() {
                node.enqueue(Parameter::CreatePath(CreatePath {
                    path: particles_path.to_owned(),
                }));
            }
            for (name, species) in self.particles.iter() {
                species.flush(&name, params)?;
            }
            if !matches!(
                params.flush_level,
                FlushLevel::SkeletonOnly | FlushLevel::CreateOrOpenFiles
            ) {
                node.flush_attributes(&[]);
                node.writable().set_dirty(false);
            }
        }

        if !matches!(
            params.flush_level,
            FlushLevel::SkeletonOnly | FlushLevel::CreateOrOpenFiles
        ) {
            self.data.flush_attributes(&["dt", "time", "timeUnitSI"]);
            self.data.writable().set_dirty(false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmd_io::{DummyIoHandler, SharedIoHandler};
    use pmd_types::Access;

    fn iteration() -> Iteration {
        let handler: SharedIoHandler = Arc::new(Mutex::new(DummyIoHandler::new(
            ".".to_owned(),
            Access::Create,
        )));
        let root = AttributableData::new(handler);
        Iteration::new_child(&root, "100")
    }

    #[test]
    fn defaults() {
        let it = iteration();
        assert_eq!(it.time().unwrap(), 0.0);
        assert_eq!(it.dt().unwrap(), 1.0);
        assert_eq!(it.time_unit_si().unwrap(), 1.0);
        assert!(!it.closed());
    }

    #[test]
    fn closed_iterations_reject_mutation() {
        let it = iteration();
        it.set_time(1.5).unwrap();
        it.close().unwrap();
        assert!(it.closed());
        assert!(it.set_time(2.0).is_err());
        assert!(it.set_dt(0.1).is_err());
        // closing twice is fine while only closed in the frontend
        it.close().unwrap();
    }

    #[test]
    fn reopening_follows_the_state_machine() {
        let it = iteration();
        it.open().unwrap();

        it.set_close_status(CloseStatus::ClosedTemporarily);
        it.open().unwrap();
        assert_eq!(it.close_status(), CloseStatus::Open);

        // non-streaming handlers may reopen after a full close
        it.set_close_status(CloseStatus::ClosedInBackend);
        assert!(it.close().is_err());
        it.open().unwrap();
        assert_eq!(it.close_status(), CloseStatus::Open);
        it.close().unwrap();
    }

    #[test]
    fn writer_closure_is_visible_to_readers() {
        let it = iteration();
        assert!(!it.closed_by_writer());
        it.close().unwrap();
        assert!(it.closed_by_writer());
    }
}
