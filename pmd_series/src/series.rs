//! The root of the hierarchy: construction, parsing and the flush engine.

use crate::filename::{ExtensionSpec, ParsedPath};
use crate::iteration::DeferredParseAccess;
use crate::{
    invalid_operation, wrong_api, Attributable, AttributableData, CloseStatus, Container, Error,
    Iteration, ReadErrorKind, ReadIterations, Result, StepStatus, WriteIterations,
};
use chunk_assignment::{by_method_collective, Communicator, Method, RankMeta, SingleProcess};
use parking_lot::Mutex;
use pmd_config::{ConfigSource, DatasetMatcher};
use pmd_io::{
    create_io_handler, Advance, AdvanceMode, AdvanceStatus, CreateFile, FlushLevel, FlushParams,
    ListPaths, OpenDataset, OpenFile, OpenPath, OutputHandle, Parameter, ReadDataset, WriteAtt,
    WriteDataset,
};
use pmd_types::{
    Access, Attribute, Buffer, Dataset, Datatype, Format, IterationEncoding,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const OPENPMD_VERSION: &str = "1.1.0";
const BASE_PATH: &str = "/data/%T/";
const RANK_TABLE_NAME: &str = "rankTable";

/// Attributes a reader needs first to identify a file, written before
/// anything else on the root.
const SERIES_PRIORITY_ATTRIBUTES: &[&str] = &[
    "openPMD",
    "openPMDextension",
    "basePath",
    "meshesPath",
    "particlesPath",
    "iterationEncoding",
    "iterationFormat",
];

#[derive(Debug)]
struct SeriesState {
    parsed_path: ParsedPath,
    extension: String,
    format: Format,
    encoding: IterationEncoding,
    access: Access,
    config: ConfigSource,
    matcher: DatasetMatcher,
    step_status: StepStatus,
    last_flush_successful: bool,
    defer_parsing: bool,
    warned_unused: bool,
    rank_table_request: Option<String>,
    rank_table_written: bool,
}

#[derive(Debug)]
pub(crate) struct SeriesInner {
    data: AttributableData,
    iterations: Container<Iteration, u64>,
    state: Mutex<SeriesState>,
    communicator: Arc<dyn Communicator>,
}

/// Root level of the openPMD hierarchy: the entry point and common link
/// between all iterations.
///
/// `Series` is a cheap value-semantic handle; clones share all state.
#[derive(Debug, Clone)]
pub struct Series {
    inner: Arc<SeriesInner>,
}

/// Step-wise construction of a [`Series`].
#[derive(Debug)]
pub struct SeriesBuilder {
    path: String,
    access: Access,
    options: String,
    communicator: Arc<dyn Communicator>,
}

impl SeriesBuilder {
    pub fn new(path: impl Into<String>, access: Access) -> Self {
        Self {
            path: path.into(),
            access,
            options: "{}".to_owned(),
            communicator: Arc::new(SingleProcess),
        }
    }

    /// JSON (or `@file`) runtime configuration.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// The group-communication capability for parallel setups.
    pub fn communicator(mut self, communicator: Arc<dyn Communicator>) -> Self {
        self.communicator = communicator;
        self
    }

    pub fn build(self) -> Result<Series> {
        Series::construct(&self.path, self.access, &self.options, self.communicator)
    }
}

impl Attributable for Series {
    fn node(&self) -> &AttributableData {
        &self.inner.data
    }
}

impl Series {
    /// Open or create a series at `path`.
    ///
    /// `path` is a filename whose `%T` placeholder selects file-based
    /// iteration encoding and whose `%E` extension is auto-detected.
    pub fn new(path: &str, access: Access) -> Result<Self> {
        SeriesBuilder::new(path, access).build()
    }

    /// Like [`Series::new`] with a JSON/TOML options document (inline or
    /// `@filename`).
    pub fn with_options(path: &str, access: Access, options: &str) -> Result<Self> {
        SeriesBuilder::new(path, access).options(options).build()
    }

    pub fn builder(path: impl Into<String>, access: Access) -> SeriesBuilder {
        SeriesBuilder::new(path, access)
    }

    fn construct(
        path: &str,
        access: Access,
        options: &str,
        communicator: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let config = ConfigSource::parse(options, true)?;
        let parsed_path = ParsedPath::parse(path)?;

        let backend_key = config
            .get("backend")
            .as_ref()
            .and_then(pmd_config::as_lower_case_string_dynamic);
        let defer_parsing = config
            .get("defer_iteration_parsing")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let encoding_request = config
            .get("iteration_encoding")
            .as_ref()
            .and_then(pmd_config::as_lower_case_string_dynamic);
        let rank_table_request = config
            .get("rank_table")
            .as_ref()
            .and_then(pmd_config::as_string_dynamic);

        let (extension, format) = resolve_format(&parsed_path, access, backend_key.as_deref())?;
        let encoding = resolve_encoding(&parsed_path, encoding_request.as_deref())?;
        if encoding == IterationEncoding::VariableBased {
            return Err(Error::UnsupportedData {
                message: "variable-based encoding needs a step-aware backend, none is linked"
                    .to_owned(),
            });
        }

        let handler = create_io_handler(
            format,
            parsed_path.directory.clone(),
            access,
            &extension,
            &config,
        )?;
        let matcher = DatasetMatcher::new(config.document())?;

        let data = AttributableData::new(handler);
        let iterations = Container::new(&data, "data");
        let inner = Arc::new(SeriesInner {
            data,
            iterations,
            state: Mutex::new(SeriesState {
                parsed_path,
                extension,
                format,
                encoding,
                access,
                config,
                matcher,
                step_status: StepStatus::NoStep,
                last_flush_successful: true,
                defer_parsing,
                warned_unused: false,
                rank_table_request,
                rank_table_written: false,
            }),
            communicator,
        });
        let series = Self { inner };

        if access.requires_existing() {
            series.parse()?;
        } else {
            series.init_default_attributes();
        }
        note_environment_options();
        debug!(%access, backend = %series.backend_name(), "series constructed");
        Ok(series)
    }

    fn init_default_attributes(&self) {
        let state = self.inner.state.lock();
        let data = &self.inner.data;
        data.set_attribute_raw("openPMD", Attribute::from(OPENPMD_VERSION));
        data.set_attribute_raw("openPMDextension", Attribute::Uint(0));
        data.set_attribute_raw("basePath", Attribute::from(BASE_PATH));
        data.set_attribute_raw("meshesPath", Attribute::from("meshes/"));
        data.set_attribute_raw("particlesPath", Attribute::from("particles/"));
        data.set_attribute_raw(
            "iterationEncoding",
            Attribute::from(state.encoding.as_str()),
        );
        let iteration_format = match state.encoding {
            IterationEncoding::FileBased => state.parsed_path.iteration_format(),
            _ => BASE_PATH.to_owned(),
        };
        data.set_attribute_raw("iterationFormat", Attribute::from(iteration_format));
    }

    /// The iterations of this series, keyed by index.
    pub fn iterations(&self) -> Container<Iteration, u64> {
        self.inner.iterations.clone()
    }

    /// One iteration, auto-created when absent.
    pub fn iteration(&self, index: u64) -> Iteration {
        self.inner.iterations.get(index)
    }

    /// Adapter enforcing the streaming-write ordering guarantees.
    pub fn write_iterations(&self) -> WriteIterations {
        WriteIterations::new(self.clone())
    }

    /// Adapter for reading iterations in stream order.
    pub fn read_iterations(&self) -> Result<ReadIterations> {
        let access = self.inner.state.lock().access;
        if !access.is_read() {
            return Err(wrong_api("read_iterations requires a read mode"));
        }
        Ok(ReadIterations::new(self.clone()))
    }

    /// Version of the openPMD standard this series declares.
    pub fn open_pmd(&self) -> String {
        self.get_attribute("openPMD")
            .and_then(|a| a.as_str().map(str::to_owned))
            .unwrap_or_else(|| OPENPMD_VERSION.to_owned())
    }

    pub fn set_open_pmd(&self, version: &str) -> &Self {
        self.inner
            .data
            .set_attribute_raw("openPMD", Attribute::from(version));
        self
    }

    pub fn open_pmd_extension(&self) -> u32 {
        self.get_attribute("openPMDextension")
            .and_then(|a| a.as_u64())
            .unwrap_or(0) as u32
    }

    pub fn set_open_pmd_extension(&self, mask: u32) -> &Self {
        self.inner
            .data
            .set_attribute_raw("openPMDextension", Attribute::Uint(mask));
        self
    }

    /// Common prefix for all data of one iteration, `/data/%T/` by
    /// convention.
    pub fn base_path(&self) -> String {
        self.get_attribute("basePath")
            .and_then(|a| a.as_str().map(str::to_owned))
            .unwrap_or_else(|| BASE_PATH.to_owned())
    }

    pub fn meshes_path(&self) -> String {
        self.get_attribute("meshesPath")
            .and_then(|a| a.as_str().map(str::to_owned))
            .unwrap_or_else(|| "meshes/".to_owned())
    }

    pub fn set_meshes_path(&self, meshes_path: &str) -> &Self {
        self.inner
            .data
            .set_attribute_raw("meshesPath", Attribute::from(meshes_path));
        self
    }

    pub fn particles_path(&self) -> String {
        self.get_attribute("particlesPath")
            .and_then(|a| a.as_str().map(str::to_owned))
            .unwrap_or_else(|| "particles/".to_owned())
    }

    pub fn set_particles_path(&self, particles_path: &str) -> &Self {
        self.inner
            .data
            .set_attribute_raw("particlesPath", Attribute::from(particles_path));
        self
    }

    pub fn author(&self) -> Option<String> {
        self.get_attribute("author")
            .and_then(|a| a.as_str().map(str::to_owned))
    }

    pub fn set_author(&self, author: &str) -> &Self {
        self.inner
            .data
            .set_attribute_raw("author", Attribute::from(author));
        self
    }

    pub fn software(&self) -> Option<String> {
        self.get_attribute("software")
            .and_then(|a| a.as_str().map(str::to_owned))
    }

    pub fn set_software(&self, software: &str, version: Option<&str>) -> &Self {
        self.inner
            .data
            .set_attribute_raw("software", Attribute::from(software));
        if let Some(version) = version {
            self.inner
                .data
                .set_attribute_raw("softwareVersion", Attribute::from(version));
        }
        self
    }

    pub fn software_version(&self) -> Option<String> {
        self.get_attribute("softwareVersion")
            .and_then(|a| a.as_str().map(str::to_owned))
    }

    pub fn date(&self) -> Option<String> {
        self.get_attribute("date")
            .and_then(|a| a.as_str().map(str::to_owned))
    }

    pub fn set_date(&self, date: &str) -> &Self {
        self.inner
            .data
            .set_attribute_raw("date", Attribute::from(date));
        self
    }

    pub fn iteration_encoding(&self) -> IterationEncoding {
        self.inner.state.lock().encoding
    }

    pub fn iteration_format(&self) -> String {
        self.get_attribute("iterationFormat")
            .and_then(|a| a.as_str().map(str::to_owned))
            .unwrap_or_default()
    }

    /// Name of the backend serving this series.
    pub fn backend_name(&self) -> String {
        self.inner.data.handler().lock().backend_name().to_owned()
    }

    /// The storage format behind this series.
    pub fn format(&self) -> Format {
        self.inner.state.lock().format
    }

    /// Whether the most recent flush completed without error.
    pub fn last_flush_successful(&self) -> bool {
        self.inner.state.lock().last_flush_successful
    }

    /// The per-backend dataset configuration resolved for one dataset
    /// path, honoring regex-keyed pattern entries.
    pub fn dataset_config(&self, dataset_path: &str) -> Value {
        self.inner.state.lock().matcher.get(dataset_path)
    }

    /// Commit everything outstanding. This is a flush point.
    pub fn flush(&self) -> Result<()> {
        self.flush_with(FlushLevel::UserFlush)
    }

    pub fn flush_with(&self, level: FlushLevel) -> Result<()> {
        let result = self.flush_impl(level);
        self.inner.state.lock().last_flush_successful = result.is_ok();
        result
    }

    /// Close the series: flush, close files, and refuse further writes.
    pub fn close(&self) -> Result<()> {
        let access = self.inner.state.lock().access;
        if access.is_write() {
            self.flush_impl(FlushLevel::UserFlush)?;
            let encoding = self.inner.state.lock().encoding;
            match encoding {
                IterationEncoding::FileBased => {
                    for (_, iteration) in self.inner.iterations.iter() {
                        if iteration.close_status() != CloseStatus::ClosedInBackend {
                            if let Some(file_root) = iteration.file_root() {
                                file_root.enqueue(Parameter::CloseFile);
                            }
                            iteration.set_close_status(CloseStatus::ClosedInBackend);
                        }
                    }
                }
                _ => {
                    if self.inner.data.writable().written() {
                        self.inner.data.enqueue(Parameter::CloseFile);
                    }
                }
            }
            self.inner
                .data
                .flush_handler(&FlushParams::new(FlushLevel::UserFlush))?;
        }
        Ok(())
    }

    /// Begin an IO step. Backends without step support report `Ok`.
    pub fn begin_step(&self) -> Result<AdvanceStatus> {
        {
            let state = self.inner.state.lock();
            if state.step_status == StepStatus::DuringStep {
                return Err(wrong_api("a step is already active"));
            }
        }
        let advance = Advance {
            mode: AdvanceMode::BeginStep,
            status: OutputHandle::new(),
        };
        self.inner.data.enqueue(Parameter::Advance(advance.clone()));
        self.inner
            .data
            .flush_handler(&FlushParams::default())?;
        let status = advance.status.take().unwrap_or(AdvanceStatus::Ok);
        if status == AdvanceStatus::Ok {
            self.inner.state.lock().step_status = StepStatus::DuringStep;
        }
        Ok(status)
    }

    /// End the current IO step, committing everything inside it.
    pub fn end_step(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if state.step_status == StepStatus::NoStep {
                return Err(wrong_api("no step is active"));
            }
        }
        self.flush_impl(FlushLevel::UserFlush)?;
        let advance = Advance {
            mode: AdvanceMode::EndStep,
            status: OutputHandle::new(),
        };
        self.inner.data.enqueue(Parameter::Advance(advance.clone()));
        self.inner
            .data
            .flush_handler(&FlushParams::new(FlushLevel::UserFlush))?;
        self.inner.state.lock().step_status = StepStatus::NoStep;
        Ok(())
    }

    /// The hostnames of all participating ranks.
    ///
    /// In write mode this gathers collectively through the configured
    /// communicator; in read mode it loads the persisted `rankTable`.
    pub fn rank_table(&self, collective: bool) -> Result<RankMeta> {
        let access = self.inner.state.lock().access;
        if access.is_write() {
            let method = Method::from_string_description("hostname", collective)
                .map_err(|e| wrong_api(e.to_string()))?;
            return by_method_collective(self.inner.communicator.as_ref(), method)
                .map_err(|e| wrong_api(e.to_string()));
        }
        self.read_rank_table()
    }

    fn read_rank_table(&self) -> Result<RankMeta> {
        let node = AttributableData::child_of(&self.inner.data, RANK_TABLE_NAME);
        let open = OpenDataset {
            name: format!("/{RANK_TABLE_NAME}"),
            dtype: OutputHandle::new(),
            extent: OutputHandle::new(),
        };
        node.enqueue(Parameter::OpenDataset(open.clone()));
        if node.flush_handler(&FlushParams::default()).is_err() {
            // no rank table persisted
            return Ok(RankMeta::new());
        }
        let extent = open.extent.take().unwrap_or_default();
        if extent.len() != 2 {
            return Err(Error::Read {
                kind: ReadErrorKind::UnexpectedContent,
                message: "rank table is not a 2-dimensional char dataset".to_owned(),
            });
        }
        let read = ReadDataset {
            offset: vec![0, 0],
            extent: extent.clone(),
            dtype: Datatype::Char,
            data: OutputHandle::new(),
        };
        node.enqueue(Parameter::ReadDataset(read.clone()));
        node.flush_handler(&FlushParams::default())?;
        let buffer = read.data.take().ok_or_else(|| Error::Read {
            kind: ReadErrorKind::NotFound,
            message: "rank table data missing".to_owned(),
        })?;
        let Buffer::Char(bytes) = buffer else {
            return Err(Error::Read {
                kind: ReadErrorKind::UnexpectedContent,
                message: "rank table is not a char dataset".to_owned(),
            });
        };
        Ok(decode_rank_table(&bytes, extent[1] as usize))
    }

    // ---- parsing -----------------------------------------------------

    fn parse(&self) -> Result<()> {
        let encoding = self.inner.state.lock().encoding;
        match encoding {
            IterationEncoding::FileBased => self.parse_file_based(),
            _ => self.parse_group_based(),
        }
    }

    fn group_names(&self) -> (String, String) {
        (
            self.meshes_path().trim_end_matches('/').to_owned(),
            self.particles_path().trim_end_matches('/').to_owned(),
        )
    }

    fn parse_file_based(&self) -> Result<()> {
        let (files, defer) = {
            let state = self.inner.state.lock();
            (
                state.parsed_path.scan_file_based(&state.extension)?,
                state.defer_parsing,
            )
        };
        if files.is_empty() {
            let state = self.inner.state.lock();
            return Err(Error::NoSuchFile {
                path: format!(
                    "{}/{}",
                    state.parsed_path.directory,
                    state.parsed_path.iteration_format()
                ),
            });
        }

        // series-level attributes are replicated into every file; read them
        // from the first one
        let first_file = files.values().next().cloned().ok_or_else(|| Error::Read {
            kind: ReadErrorKind::NotFound,
            message: "no iteration files".to_owned(),
        })?;
        let probe = AttributableData::new(Arc::clone(self.inner.data.handler()));
        probe.enqueue(Parameter::OpenFile(OpenFile {
            name: first_file,
            encoding: IterationEncoding::FileBased,
        }));
        probe.flush_handler(&FlushParams::default())?;
        probe.read_attributes()?;
        for name in probe.attribute_names_raw() {
            if let Some(value) = probe.get_attribute_raw(&name) {
                self.inner.data.set_attribute_raw(name, value);
            }
        }
        self.verify_openpmd_header()?;

        let (meshes_path, particles_path) = self.group_names();
        for (index, filename) in files {
            let iteration = self.inner.iterations.get(index);
            iteration.defer_parse_access(DeferredParseAccess {
                group_path: format!("/data/{index}"),
                file_based: true,
                filename: Some(filename),
                meshes_path: meshes_path.clone(),
                particles_path: particles_path.clone(),
            });
            if !defer {
                iteration.run_deferred_parse_access()?;
            }
        }
        self.inner.data.writable().set_dirty(false);
        Ok(())
    }

    fn parse_group_based(&self) -> Result<()> {
        let (filename, defer) = {
            let state = self.inner.state.lock();
            (
                state.parsed_path.filename_for(0, &state.extension),
                state.defer_parsing,
            )
        };
        self.inner.data.enqueue(Parameter::OpenFile(OpenFile {
            name: filename,
            encoding: IterationEncoding::GroupBased,
        }));
        self.inner
            .data
            .flush_handler(&FlushParams::default())?;
        self.inner.data.read_attributes()?;
        self.verify_openpmd_header()?;

        let iterations_node = self.inner.iterations.node();
        iterations_node.enqueue(Parameter::OpenPath(OpenPath {
            path: "data".to_owned(),
        }));
        let children = ListPaths::default();
        iterations_node.enqueue(Parameter::ListPaths(children.clone()));
        iterations_node.flush_handler(&FlushParams::default())?;

        let (meshes_path, particles_path) = self.group_names();
        for child in children.paths.take().unwrap_or_default() {
            let Ok(index) = child.parse::<u64>() else {
                warn!(group = %child, "skipping non-numeric iteration group");
                continue;
            };
            let iteration = self.inner.iterations.get(index);
            iteration.defer_parse_access(DeferredParseAccess {
                group_path: format!("/data/{index}"),
                file_based: false,
                filename: None,
                meshes_path: meshes_path.clone(),
                particles_path: particles_path.clone(),
            });
            if !defer {
                iteration.run_deferred_parse_access()?;
            }
        }
        self.inner.data.writable().set_dirty(false);
        Ok(())
    }

    fn verify_openpmd_header(&self) -> Result<()> {
        let version = self
            .inner
            .data
            .get_attribute_raw("openPMD")
            .and_then(|a| a.as_str().map(str::to_owned));
        if version.is_none() {
            return Err(Error::Read {
                kind: ReadErrorKind::NotFound,
                message: "file carries no openPMD version attribute".to_owned(),
            });
        }
        if let Some(base_path) = self
            .inner
            .data
            .get_attribute_raw("basePath")
            .and_then(|a| a.as_str().map(str::to_owned))
        {
            if base_path != BASE_PATH {
                return Err(Error::Read {
                    kind: ReadErrorKind::UnexpectedContent,
                    message: format!("basePath is \"{base_path}\", expected \"{BASE_PATH}\""),
                });
            }
        }
        Ok(())
    }

    // ---- flushing ----------------------------------------------------

    fn flush_impl(&self, level: FlushLevel) -> Result<()> {
        let params = FlushParams::new(level);
        let (access, encoding) = {
            let state = self.inner.state.lock();
            (state.access, state.encoding)
        };

        let mut newly_closed = Vec::new();
        if access.is_read() {
            self.drain_read_queues()?;
            if encoding == IterationEncoding::FileBased {
                self.release_read_files(&mut newly_closed);
            }
        } else {
            match encoding {
                IterationEncoding::FileBased => {
                    self.flush_file_based(&params, &mut newly_closed)?
                }
                _ => self.flush_group_based(&params, &mut newly_closed)?,
            }
        }

        self.inner.data.flush_handler(&params)?;

        for (iteration, status) in newly_closed {
            iteration.set_close_status(status);
        }
        self.inner.data.writable().set_dirty(false);

        if level == FlushLevel::UserFlush && access.is_write() {
            self.maybe_write_rank_table()?;
        }
        self.warn_unused_config_once();
        Ok(())
    }

    fn iteration_may_flush(&self, index: u64, iteration: &Iteration) -> Result<bool> {
        match iteration.close_status() {
            CloseStatus::ParseAccessDeferred => Ok(false),
            CloseStatus::ClosedInBackend => {
                if iteration.dirty_recursive() {
                    Err(wrong_api(format!(
                        "iteration {index} is closed; its pending changes cannot be flushed"
                    )))
                } else {
                    Ok(false)
                }
            }
            CloseStatus::ClosedTemporarily => Ok(iteration.dirty_recursive()),
            CloseStatus::Open | CloseStatus::ClosedInFrontend => Ok(true),
        }
    }

    fn flush_file_based(
        &self,
        params: &FlushParams,
        newly_closed: &mut Vec<(Iteration, CloseStatus)>,
    ) -> Result<()> {
        let (meshes_path, particles_path) = self.group_names();
        for (index, iteration) in self.inner.iterations.iter() {
            if !self.iteration_may_flush(index, &iteration)? {
                continue;
            }
            let filename = {
                let state = self.inner.state.lock();
                state.parsed_path.filename_for(index, &state.extension)
            };
            let file_root = match iteration.file_root() {
                Some(existing) => existing,
                None => {
                    let file_root =
                        AttributableData::new(Arc::clone(self.inner.data.handler()));
                    iteration.set_file_root(file_root.clone());
                    file_root
                }
            };
            if !file_root.writable().written() {
                file_root.enqueue(Parameter::CreateFile(CreateFile {
                    name: filename,
                    encoding: IterationEncoding::FileBased,
                }));
            }
            if params.flush_level == FlushLevel::CreateOrOpenFiles {
                continue;
            }

            iteration.flush_contents(
                &format!("/data/{index}"),
                &meshes_path,
                &particles_path,
                params,
            )?;
            if params.flush_level != FlushLevel::SkeletonOnly {
                // every file replicates the series-level attributes
                self.inner
                    .data
                    .flush_attributes_onto(file_root.writable(), SERIES_PRIORITY_ATTRIBUTES);
            }

            if iteration.close_status() == CloseStatus::ClosedInFrontend
                && !matches!(
                    params.flush_level,
                    FlushLevel::SkeletonOnly | FlushLevel::CreateOrOpenFiles
                )
            {
                file_root.enqueue(Parameter::CloseFile);
                newly_closed.push((iteration.clone(), CloseStatus::ClosedInBackend));
            }
        }
        Ok(())
    }

    fn flush_group_based(
        &self,
        params: &FlushParams,
        newly_closed: &mut Vec<(Iteration, CloseStatus)>,
    ) -> Result<()> {
        let filename = {
            let state = self.inner.state.lock();
            state.parsed_path.filename_for(0, &state.extension)
        };
        if !self.inner.data.writable().written() {
            self.inner.data.enqueue(Parameter::CreateFile(CreateFile {
                name: filename,
                encoding: IterationEncoding::GroupBased,
            }));
        }
        if params.flush_level == FlushLevel::CreateOrOpenFiles {
            return Ok(());
        }

        let iterations_node = self.inner.iterations.node();
        if !iterations_node.writable().written() && !self.inner.iterations.is_empty() {
            iterations_node.enqueue(Parameter::CreatePath(pmd_io::CreatePath {
                path: "data".to_owned(),
            }));
        }

        let (meshes_path, particles_path) = self.group_names();
        for (index, iteration) in self.inner.iterations.iter() {
            if !self.iteration_may_flush(index, &iteration)? {
                continue;
            }
            iteration.flush_contents(
                &index.to_string(),
                &meshes_path,
                &particles_path,
                params,
            )?;
            if iteration.close_status() == CloseStatus::ClosedInFrontend
                && params.flush_level != FlushLevel::SkeletonOnly
            {
                newly_closed.push((iteration.clone(), CloseStatus::ClosedInBackend));
            }
        }

        if params.flush_level != FlushLevel::SkeletonOnly {
            iterations_node.writable().set_dirty(false);
            self.inner
                .data
                .flush_attributes(SERIES_PRIORITY_ATTRIBUTES);
        }
        Ok(())
    }

    /// In read modes a flush only moves queued chunk loads to the backend.
    fn drain_read_queues(&self) -> Result<()> {
        let params = FlushParams::default();
        for (_, iteration) in self.inner.iterations.iter() {
            if iteration.close_status() == CloseStatus::ParseAccessDeferred {
                continue;
            }
            for (_, mesh) in iteration.meshes()?.iter() {
                for (key, component) in mesh.all_components() {
                    component.flush(&key, &params)?;
                }
            }
            for (_, species) in iteration.particles()?.iter() {
                for record_key in species.record_keys() {
                    let record = species.record(&record_key);
                    for (key, component) in record.all_components() {
                        component.flush(&key, &params)?;
                    }
                }
                let patches = species.particle_patches();
                for record_key in patches.record_keys() {
                    for (key, component) in patches.record(&record_key).all_components() {
                        component.flush(&key, &params)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Release the file of every iteration the reader has finished with.
    ///
    /// On a random-access handler the file may be opened again later, so
    /// the iteration only becomes [`CloseStatus::ClosedTemporarily`];
    /// streaming engines cannot go back, there the closure is final.
    fn release_read_files(&self, newly_closed: &mut Vec<(Iteration, CloseStatus)>) {
        let streaming = self.inner.data.handler().lock().is_streaming();
        for (_, iteration) in self.inner.iterations.iter() {
            if iteration.close_status() != CloseStatus::ClosedInFrontend {
                continue;
            }
            if let Some(file_root) = iteration.file_root() {
                file_root.enqueue(Parameter::CloseFile);
            }
            let status = if streaming {
                CloseStatus::ClosedInBackend
            } else {
                CloseStatus::ClosedTemporarily
            };
            newly_closed.push((iteration.clone(), status));
        }
    }

    fn maybe_write_rank_table(&self) -> Result<()> {
        let request = {
            let mut state = self.inner.state.lock();
            if state.rank_table_written || state.encoding == IterationEncoding::FileBased {
                return Ok(());
            }
            match state.rank_table_request.clone() {
                Some(request) => {
                    state.rank_table_written = true;
                    request
                }
                None => return Ok(()),
            }
        };
        let method = Method::from_string_description(&request, true)
            .map_err(|e| invalid_operation(e.to_string()))?;
        let table = by_method_collective(self.inner.communicator.as_ref(), method)
            .map_err(|e| invalid_operation(e.to_string()))?;
        self.write_rank_table(&table, &request)?;

        if let Ok(hostfile) = std::env::var("MPI_WRITTEN_HOSTFILE") {
            let path = std::path::Path::new(&self.inner.state.lock().parsed_path.directory)
                .join(hostfile);
            let lines: Vec<&str> = table.values().map(String::as_str).collect();
            if let Err(e) = std::fs::write(&path, lines.join("\n")) {
                warn!(error = %e, "could not persist the host file");
            }
        }
        Ok(())
    }

    fn write_rank_table(&self, table: &RankMeta, method: &str) -> Result<()> {
        let width = table.values().map(String::len).max().unwrap_or(0) + 1;
        let rows = table.len();
        let mut bytes = vec![0i8; rows * width];
        for (row, name) in table.values().enumerate() {
            for (column, byte) in name.bytes().enumerate() {
                bytes[row * width + column] = byte as i8;
            }
        }

        let node = AttributableData::child_of(&self.inner.data, RANK_TABLE_NAME);
        node.enqueue(Parameter::CreateDataset(pmd_io::CreateDataset {
            name: format!("/{RANK_TABLE_NAME}"),
            dataset: Dataset::new(Datatype::Char, vec![rows as u64, width as u64]),
        }));
        node.enqueue(Parameter::WriteDataset(WriteDataset {
            offset: vec![0, 0],
            extent: vec![rows as u64, width as u64],
            data: Buffer::Char(Arc::new(bytes)),
        }));
        node.enqueue(Parameter::WriteAtt(WriteAtt {
            name: "method".to_owned(),
            attribute: Attribute::from(method),
        }));
        node.flush_handler(&FlushParams::new(FlushLevel::UserFlush))?;
        Ok(())
    }

    fn warn_unused_config_once(&self) {
        let mut state = self.inner.state.lock();
        if !state.warned_unused {
            state.warned_unused = true;
            state.config.warn_unused_global();
        }
    }

    pub(crate) fn step_status(&self) -> StepStatus {
        self.inner.state.lock().step_status
    }

    pub(crate) fn sorted_iteration_indices(&self) -> Vec<u64> {
        self.inner.iterations.keys()
    }
}

fn resolve_format(
    parsed: &ParsedPath,
    access: Access,
    backend_key: Option<&str>,
) -> Result<(String, Format)> {
    let from_backend = backend_key.and_then(Format::from_backend_key);
    match &parsed.extension {
        ExtensionSpec::Fixed(extension) => {
            let format = parsed.format_from_extension().ok_or_else(|| {
                wrong_api(format!(
                    "unknown file format; unrecognized extension \".{extension}\""
                ))
            })?;
            if let Some(requested) = from_backend {
                if requested != format {
                    warn!(
                        %extension,
                        "config requests a different backend than the file extension; \
                         the extension wins"
                    );
                }
            }
            Ok((extension.clone(), format))
        }
        ExtensionSpec::Auto => {
            if access.requires_existing() {
                let extension = parsed.detect_extension()?;
                let format = Format::from_extension(&extension)
                    .ok_or_else(|| wrong_api("detected an unknown extension"))?;
                Ok((extension, format))
            } else {
                let format = from_backend.ok_or_else(|| {
                    wrong_api(
                        "%E requires the \"backend\" config key when creating a series",
                    )
                })?;
                let extension = format
                    .extension()
                    .ok_or_else(|| wrong_api("backend has no canonical extension"))?;
                Ok((extension.to_owned(), format))
            }
        }
        ExtensionSpec::None => {
            let format = from_backend.ok_or_else(|| {
                wrong_api(
                    "unknown file format; specify a file ending or the \"backend\" config key",
                )
            })?;
            let extension = format
                .extension()
                .ok_or_else(|| wrong_api("backend has no canonical extension"))?;
            Ok((extension.to_owned(), format))
        }
    }
}

fn resolve_encoding(
    parsed: &ParsedPath,
    request: Option<&str>,
) -> Result<IterationEncoding> {
    let default = if parsed.is_file_based() {
        IterationEncoding::FileBased
    } else {
        IterationEncoding::GroupBased
    };
    let Some(request) = request else {
        return Ok(default);
    };
    let requested = match request {
        "file_based" | "filebased" => IterationEncoding::FileBased,
        "group_based" | "groupbased" => IterationEncoding::GroupBased,
        "variable_based" | "variablebased" => IterationEncoding::VariableBased,
        other => {
            return Err(wrong_api(format!(
                "unknown iteration encoding \"{other}\" in config"
            )))
        }
    };
    match (requested, parsed.is_file_based()) {
        (IterationEncoding::FileBased, false) => Err(wrong_api(
            "file-based encoding requires a %T placeholder in the file name",
        )),
        (IterationEncoding::GroupBased | IterationEncoding::VariableBased, true) => {
            Err(wrong_api(
                "single-file encodings cannot use a %T placeholder in the file name",
            ))
        }
        _ => Ok(requested),
    }
}

/// Validate the environment variables this library understands. They only
/// take effect in backends that honor them; unknown variables are ignored.
fn note_environment_options() {
    if let Ok(value) = std::env::var("OPENPMD_HDF5_INDEPENDENT") {
        match value.as_str() {
            "ON" | "OFF" => {
                debug!(%value, "OPENPMD_HDF5_INDEPENDENT noted; no HDF5 backend is linked")
            }
            other => warn!(
                value = other,
                "OPENPMD_HDF5_INDEPENDENT must be ON or OFF, ignoring"
            ),
        }
    }
    if let Ok(value) = std::env::var("OPENPMD_HDF5_ALIGNMENT") {
        if value.parse::<u64>().is_err() {
            warn!(%value, "OPENPMD_HDF5_ALIGNMENT is not a byte count, ignoring");
        }
    }
}

/// Parse a `rankTable`-style char matrix into hostnames.
fn decode_rank_table(bytes: &[i8], width: usize) -> BTreeMap<u32, String> {
    let mut table = BTreeMap::new();
    for (rank, row) in bytes.chunks(width).enumerate() {
        let name: Vec<u8> = row
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        table.insert(rank as u32, String::from_utf8_lossy(&name).into_owned());
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_resolution() {
        let parsed = ParsedPath::parse("series.json").unwrap();
        let (extension, format) = resolve_format(&parsed, Access::Create, None).unwrap();
        assert_eq!(extension, "json");
        assert_eq!(format, Format::Json);

        let parsed = ParsedPath::parse("series.%E").unwrap();
        let (extension, format) =
            resolve_format(&parsed, Access::Create, Some("toml")).unwrap();
        assert_eq!(extension, "toml");
        assert_eq!(format, Format::Toml);

        assert!(resolve_format(&parsed, Access::Create, None).is_err());
    }

    #[test]
    fn encoding_resolution() {
        let file_based = ParsedPath::parse("data_%T.json").unwrap();
        assert_eq!(
            resolve_encoding(&file_based, None).unwrap(),
            IterationEncoding::FileBased
        );
        assert!(resolve_encoding(&file_based, Some("group_based")).is_err());

        let single = ParsedPath::parse("data.json").unwrap();
        assert_eq!(
            resolve_encoding(&single, None).unwrap(),
            IterationEncoding::GroupBased
        );
        assert!(resolve_encoding(&single, Some("file_based")).is_err());
        assert_eq!(
            resolve_encoding(&single, Some("variable_based")).unwrap(),
            IterationEncoding::VariableBased
        );
    }

    #[test]
    fn unsupported_backends_fail_at_construction() {
        let err = Series::new("data.h5", Access::Create).unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));

        let err = Series::new("data.sst", Access::Create).unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[test]
    fn variable_based_needs_a_step_aware_backend() {
        let err = Series::with_options(
            "data.json",
            Access::Create,
            r#"{"iteration_encoding": "variable_based"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedData { .. }));
    }

    #[test]
    fn rank_table_layout_round_trips() {
        let mut table = RankMeta::new();
        table.insert(0, "nodeA".to_owned());
        table.insert(1, "b".to_owned());
        let width = table.values().map(String::len).max().unwrap() + 1;
        let mut bytes = vec![0i8; table.len() * width];
        for (row, name) in table.values().enumerate() {
            for (column, byte) in name.bytes().enumerate() {
                bytes[row * width + column] = byte as i8;
            }
        }
        let decoded = decode_rank_table(&bytes, width);
        assert_eq!(decoded[&0], "nodeA");
        assert_eq!(decoded[&1], "b");
    }
}
