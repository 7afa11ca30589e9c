//! The reference file backend: a hierarchy of groups, datasets and
//! attributes persisted as one JSON (or TOML) document per file.
//!
//! Groups map to JSON objects, attributes live in an `"attributes"` object
//! on their node, datasets are objects carrying `"datatype"` and a nested
//! `"data"` array mirroring their extent. Trees are held in memory per open
//! file and persisted on close, on user flushes and when the handler drops.

mod codec;

use crate::{
    AdvanceStatus, BufferView, Error, FilePosition, FlushLevel, FlushParams, IoHandler, IoTask,
    Parameter, Result, Writable,
};
use pmd_config::ConfigSource;
use pmd_types::{Access, Datatype, Extent, WrittenChunkInfo};
use serde_json::{Map, Value};
use snafu::ResultExt;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Text flavor of the serialized tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}

/// Where a node lives: which file, and the object path inside its tree.
#[derive(Debug, Clone)]
struct JsonPosition {
    file: String,
    path: Vec<String>,
}

impl FilePosition for JsonPosition {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct FileData {
    tree: Value,
    dirty: bool,
}

#[derive(Debug)]
pub struct JsonIoHandler {
    directory: String,
    backend_access: Access,
    frontend_access: Access,
    file_format: FileFormat,
    queue: VecDeque<IoTask>,
    files: HashMap<String, FileData>,
}

impl JsonIoHandler {
    pub fn new(
        directory: String,
        access: Access,
        file_format: FileFormat,
        _original_extension: &str,
        config: &ConfigSource,
    ) -> Result<Self> {
        // this backend's own config subtree; it currently defines no
        // options beyond dataset patterns, which the frontend resolves
        config.enter(file_format.extension()).declare_fully_read();
        Ok(Self {
            directory,
            backend_access: access,
            frontend_access: access,
            file_format,
            queue: VecDeque::new(),
            files: HashMap::new(),
        })
    }

    fn filename_with_extension(&self, name: &str) -> String {
        let extension = self.file_format.extension();
        if name.ends_with(&format!(".{extension}")) {
            name.to_owned()
        } else {
            format!("{name}.{extension}")
        }
    }

    fn fs_path(&self, file: &str) -> PathBuf {
        Path::new(&self.directory).join(file)
    }

    fn load_from_disk(&self, file: &str) -> Result<Value> {
        let path = self.fs_path(file);
        let content = std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::NoSuchFile {
                    path: path.display().to_string(),
                }
            } else {
                Error::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;
        match self.file_format {
            FileFormat::Json => {
                serde_json::from_str(&content).context(crate::InvalidJsonSnafu {
                    path: path.display().to_string(),
                })
            }
            FileFormat::Toml => {
                let parsed: toml::Value = content.parse().context(crate::InvalidTomlSnafu {
                    path: path.display().to_string(),
                })?;
                Ok(pmd_config::toml_to_json(parsed))
            }
        }
    }

    fn file_mut(&mut self, file: &str) -> Result<&mut FileData> {
        if !self.files.contains_key(file) {
            let tree = self.load_from_disk(file)?;
            self.files.insert(
                file.to_owned(),
                FileData { tree, dirty: false },
            );
        }
        Ok(self.files.get_mut(file).expect("just inserted"))
    }

    fn persist_file(
        directory: &str,
        file_format: FileFormat,
        file: &str,
        tree: &Value,
    ) -> Result<()> {
        let path = Path::new(directory).join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(crate::IoSnafu {
                path: parent.display().to_string(),
            })?;
        }
        let rendered = match file_format {
            FileFormat::Json => {
                serde_json::to_string_pretty(tree).expect("serializing a plain value tree")
            }
            FileFormat::Toml => {
                let toml_value =
                    pmd_config::json_to_toml(tree).context(crate::TomlRenderSnafu {
                        path: path.display().to_string(),
                    })?;
                toml::to_string_pretty(&toml_value).map_err(|e| Error::ReadUnexpectedContent {
                    what: path.display().to_string(),
                    message: e.to_string(),
                })?
            }
        };
        std::fs::write(&path, rendered).context(crate::IoSnafu {
            path: path.display().to_string(),
        })?;
        debug!(file = %path.display(), "persisted backend file");
        Ok(())
    }

    fn persist_dirty(&mut self) -> Result<()> {
        for (name, data) in &mut self.files {
            if data.dirty {
                Self::persist_file(&self.directory, self.file_format, name, &data.tree)?;
                data.dirty = false;
            }
        }
        Ok(())
    }

    fn position_of(writable: &Writable) -> Result<JsonPosition> {
        let position = writable.position().ok_or_else(|| Error::Unpositioned {
            context: "task requires an already positioned node".to_owned(),
        })?;
        downcast(&position)
    }

    /// The position of the nearest positioned ancestor, excluding the node
    /// itself. Used by create/open operations that add a child to a parent.
    fn parent_position(writable: &Writable) -> Result<JsonPosition> {
        let parent = writable.parent().ok_or_else(|| Error::Unpositioned {
            context: "node has no parent to resolve its file from".to_owned(),
        })?;
        let (_, position) = parent.positioned_ancestor().ok_or_else(|| Error::Unpositioned {
            context: "no ancestor of the node has a backend position".to_owned(),
        })?;
        downcast(&position)
    }

    fn resolve_path(writable: &Writable, path: &str) -> Result<JsonPosition> {
        let base = Self::parent_position(writable)?;
        let mut resolved = if path.starts_with('/') {
            JsonPosition {
                file: base.file,
                path: Vec::new(),
            }
        } else {
            base
        };
        resolved.path.extend(split_path(path));
        Ok(resolved)
    }

    fn execute(&mut self, task: &IoTask) -> Result<()> {
        let writable = &task.writable;
        match &task.parameter {
            Parameter::CreateFile(p) => {
                let file = self.filename_with_extension(&p.name);
                let exists = self.fs_path(&file).is_file();
                let tree = if self.backend_access == Access::Create || !exists {
                    Value::Object(Map::new())
                } else {
                    // open-or-create for read-write and append modes
                    self.load_from_disk(&file)?
                };
                self.files.insert(file.clone(), FileData { tree, dirty: true });
                writable.set_position(Arc::new(JsonPosition {
                    file,
                    path: Vec::new(),
                }));
                writable.set_written(true);
            }
            Parameter::OpenFile(p) => {
                let file = self.filename_with_extension(&p.name);
                self.file_mut(&file)?;
                writable.set_position(Arc::new(JsonPosition {
                    file,
                    path: Vec::new(),
                }));
                writable.set_written(true);
            }
            Parameter::CloseFile => {
                let (_, position) =
                    writable
                        .positioned_ancestor()
                        .ok_or_else(|| Error::Unpositioned {
                            context: "closing a file requires a positioned node".to_owned(),
                        })?;
                let file = downcast(&position)?.file;
                if let Some(data) = self.files.remove(&file) {
                    // readers only drop the in-memory tree
                    if self.backend_access.is_write() {
                        Self::persist_file(&self.directory, self.file_format, &file, &data.tree)?;
                    }
                }
            }
            Parameter::DeleteFile(p) => {
                let file = self.filename_with_extension(&p.name);
                self.files.remove(&file);
                let path = self.fs_path(&file);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(Error::Io {
                            path: path.display().to_string(),
                            source,
                        })
                    }
                }
                writable.set_written(false);
                writable.clear_position();
            }
            Parameter::CreatePath(p) => {
                let position = Self::resolve_path(writable, &p.path)?;
                let file_data = self.file_mut(&position.file)?;
                ensure_group(&mut file_data.tree, &position.path)?;
                file_data.dirty = true;
                writable.set_position(Arc::new(position));
                writable.set_written(true);
            }
            Parameter::OpenPath(p) => {
                let position = Self::resolve_path(writable, &p.path)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                if !node.is_object() {
                    return Err(Error::ReadUnexpectedContent {
                        what: position.path.join("/"),
                        message: "expected a group".to_owned(),
                    });
                }
                writable.set_position(Arc::new(position));
                writable.set_written(true);
            }
            Parameter::ClosePath => {}
            Parameter::DeletePath(p) => {
                let position = Self::resolve_path(writable, &p.path)?;
                let file_data = self.file_mut(&position.file)?;
                remove_node(&mut file_data.tree, &position.path)?;
                file_data.dirty = true;
                writable.set_written(false);
                writable.clear_position();
            }
            Parameter::ListPaths(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                p.paths.set(child_keys(node, |child| {
                    child.is_object() && child.get("datatype").is_none()
                }));
            }
            Parameter::CreateDataset(p) => {
                let position = Self::resolve_path(writable, &p.name)?;
                let dataset = &p.dataset;
                if dataset.options != "{}" {
                    debug!(options = %dataset.options, "ignoring backend options on dataset");
                }
                let mut node = Map::new();
                node.insert(
                    "datatype".to_owned(),
                    Value::String(dataset.dtype.to_string()),
                );
                node.insert(
                    "data".to_owned(),
                    codec::zero_filled(dataset.dtype, &dataset.extent)?,
                );
                if dataset.is_degenerate() {
                    // nesting cannot represent trailing dimensions after a
                    // zero, keep the extent explicit
                    node.insert("extent".to_owned(), extent_to_value(&dataset.extent));
                }
                node.insert("attributes".to_owned(), Value::Object(Map::new()));

                let file_data = self.file_mut(&position.file)?;
                let (parent_path, name) = split_last(&position.path)?;
                let parent = ensure_group(&mut file_data.tree, parent_path)?
                    .as_object_mut()
                    .ok_or_else(|| not_found(&position.path, "parent is not a group"))?;
                parent.insert(name.to_owned(), Value::Object(node));
                file_data.dirty = true;
                writable.set_position(Arc::new(position));
                writable.set_written(true);
            }
            Parameter::ExtendDataset(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at_mut(&mut file_data.tree, &position.path)?;
                let dtype = dataset_datatype(node, &position.path)?;
                let old = dataset_extent(node, dtype);
                let data = node
                    .get_mut("data")
                    .ok_or_else(|| not_found(&position.path, "data"))?;
                codec::grow_nested(data, dtype, &old, &p.extent)?;
                if let Some(object) = node.as_object_mut() {
                    if object.contains_key("extent") {
                        object.insert("extent".to_owned(), extent_to_value(&p.extent));
                    }
                }
                file_data.dirty = true;
            }
            Parameter::OpenDataset(p) => {
                let position = Self::resolve_path(writable, &p.name)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                let dtype = dataset_datatype(node, &position.path)?;
                p.dtype.set(dtype);
                p.extent.set(dataset_extent(node, dtype));
                writable.set_position(Arc::new(position));
                writable.set_written(true);
            }
            Parameter::DeleteDataset(p) => {
                let position = Self::resolve_path(writable, &p.name)?;
                let file_data = self.file_mut(&position.file)?;
                remove_node(&mut file_data.tree, &position.path)?;
                file_data.dirty = true;
                writable.set_written(false);
                writable.clear_position();
            }
            Parameter::WriteDataset(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at_mut(&mut file_data.tree, &position.path)?;
                let dtype = dataset_datatype(node, &position.path)?;
                if !dtype.is_same(&p.data.dtype()) {
                    return Err(Error::ReadUnexpectedContent {
                        what: position.path.join("/"),
                        message: format!(
                            "write of {} into a dataset of {}",
                            p.data.dtype(),
                            dtype
                        ),
                    });
                }
                let data = node
                    .get_mut("data")
                    .ok_or_else(|| not_found(&position.path, "data"))?;
                codec::write_slab(data, &p.offset, &p.extent, &p.data)?;
                file_data.dirty = true;
            }
            Parameter::ReadDataset(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                let data = node
                    .get("data")
                    .ok_or_else(|| not_found(&position.path, "data"))?;
                p.data.set(codec::read_slab(data, &p.offset, &p.extent, p.dtype)?);
            }
            Parameter::ListDatasets(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                p.datasets.set(child_keys(node, |child| {
                    child.is_object() && child.get("datatype").is_some()
                }));
            }
            Parameter::GetBufferView(p) => {
                // no backend-managed buffers in a text format
                p.out.set(BufferView {
                    backend_managed_buffer: false,
                    view_index: 0,
                });
            }
            Parameter::DeleteAtt(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at_mut(&mut file_data.tree, &position.path)?;
                if let Some(attributes) = node.get_mut("attributes").and_then(Value::as_object_mut)
                {
                    attributes.remove(&p.name);
                }
                file_data.dirty = true;
            }
            Parameter::WriteAtt(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at_mut(&mut file_data.tree, &position.path)?;
                let object = node.as_object_mut().ok_or_else(|| {
                    not_found(&position.path, "attribute target is not a group")
                })?;
                let attributes = object
                    .entry("attributes".to_owned())
                    .or_insert_with(|| Value::Object(Map::new()));
                attributes
                    .as_object_mut()
                    .ok_or_else(|| not_found(&position.path, "attributes"))?
                    .insert(p.name.clone(), codec::encode_attribute(&p.attribute));
                file_data.dirty = true;
                writable.set_written(true);
            }
            Parameter::ReadAtt(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                let attribute_node = node
                    .get("attributes")
                    .and_then(|attributes| attributes.get(&p.name))
                    .ok_or_else(|| not_found(&position.path, &p.name))?;
                p.attribute.set(codec::decode_attribute(&p.name, attribute_node)?);
            }
            Parameter::ListAtts(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                let names = node
                    .get("attributes")
                    .and_then(Value::as_object)
                    .map(|attributes| attributes.keys().cloned().collect())
                    .unwrap_or_default();
                p.attributes.set(names);
            }
            Parameter::Advance(p) => {
                // a random-access text format has no IO steps
                p.status.set(AdvanceStatus::Ok);
            }
            Parameter::AvailableChunks(p) => {
                let position = Self::position_of(writable)?;
                let file_data = self.file_mut(&position.file)?;
                let node = node_at(&file_data.tree, &position.path)?;
                let dtype = dataset_datatype(node, &position.path)?;
                let extent = dataset_extent(node, dtype);
                let offset = vec![0; extent.len()];
                p.chunks.set(vec![WrittenChunkInfo::new(offset, extent, 0)]);
            }
        }
        Ok(())
    }
}

impl IoHandler for JsonIoHandler {
    fn enqueue(&mut self, task: IoTask) {
        self.queue.push_back(task);
    }

    fn flush(&mut self, params: &FlushParams) -> Result<()> {
        while let Some(task) = self.queue.pop_front() {
            if let Err(e) = self.execute(&task) {
                // backend state after a failed flush is undefined;
                // the remaining queue is dropped
                self.queue.clear();
                return Err(e);
            }
        }
        if params.flush_level == FlushLevel::UserFlush {
            self.persist_dirty()?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        match self.file_format {
            FileFormat::Json => "JSON",
            FileFormat::Toml => "TOML",
        }
    }

    fn directory(&self) -> &str {
        &self.directory
    }

    fn frontend_access(&self) -> Access {
        self.frontend_access
    }

    fn backend_access(&self) -> Access {
        self.backend_access
    }
}

impl Drop for JsonIoHandler {
    fn drop(&mut self) {
        if let Err(e) = self.persist_dirty() {
            warn!(error = %e, "failed to persist backend files on drop");
        }
    }
}

fn downcast(position: &Arc<dyn FilePosition>) -> Result<JsonPosition> {
    position
        .as_any()
        .downcast_ref::<JsonPosition>()
        .cloned()
        .ok_or_else(|| Error::Unpositioned {
            context: "node was positioned by a different backend".to_owned(),
        })
}

fn split_path(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
}

fn split_last(path: &[String]) -> Result<(&[String], &str)> {
    match path.split_last() {
        Some((last, init)) => Ok((init, last)),
        None => Err(Error::ReadUnexpectedContent {
            what: "/".to_owned(),
            message: "expected a non-empty path".to_owned(),
        }),
    }
}

fn not_found(path: &[String], what: &str) -> Error {
    Error::ReadNotFound {
        what: format!("/{}: {}", path.join("/"), what),
    }
}

fn node_at<'v>(tree: &'v Value, path: &[String]) -> Result<&'v Value> {
    let mut current = tree;
    for segment in path {
        current = current
            .get(segment)
            .ok_or_else(|| not_found(path, segment))?;
    }
    Ok(current)
}

fn node_at_mut<'v>(tree: &'v mut Value, path: &[String]) -> Result<&'v mut Value> {
    let mut current = tree;
    for segment in path {
        current = current
            .get_mut(segment)
            .ok_or_else(|| not_found(path, segment))?;
    }
    Ok(current)
}

fn ensure_group<'v>(tree: &'v mut Value, path: &[String]) -> Result<&'v mut Value> {
    let mut current = tree;
    for segment in path {
        let object = current
            .as_object_mut()
            .ok_or_else(|| not_found(path, "group expected along the path"))?;
        current = object
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if current.get("datatype").is_some() {
            return Err(Error::ReadUnexpectedContent {
                what: path.join("/"),
                message: format!("{segment} is a dataset, not a group"),
            });
        }
    }
    Ok(current)
}

fn remove_node(tree: &mut Value, path: &[String]) -> Result<()> {
    let (parent_path, name) = split_last(path)?;
    let parent = node_at_mut(tree, parent_path)?;
    parent
        .as_object_mut()
        .and_then(|object| object.remove(name))
        .ok_or_else(|| not_found(path, name))?;
    Ok(())
}

fn child_keys(node: &Value, keep: impl Fn(&Value) -> bool) -> Vec<String> {
    node.as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, child)| key.as_str() != "attributes" && keep(child))
                .map(|(key, _)| key.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn dataset_datatype(node: &Value, path: &[String]) -> Result<Datatype> {
    node.get("datatype")
        .and_then(Value::as_str)
        .ok_or_else(|| not_found(path, "datatype"))?
        .parse()
        .map_err(|e| Error::ReadUnexpectedContent {
            what: path.join("/"),
            message: format!("{e}"),
        })
}

fn dataset_extent(node: &Value, dtype: Datatype) -> Extent {
    if let Some(extent) = node.get("extent").and_then(Value::as_array) {
        return extent.iter().filter_map(Value::as_u64).collect();
    }
    node.get("data")
        .map(|data| codec::shape_of(data, dtype.is_complex()))
        .unwrap_or_default()
}

fn extent_to_value(extent: &Extent) -> Value {
    Value::Array(extent.iter().map(|e| Value::from(*e)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CreateDataset, CreateFile, CreatePath, ListPaths, OpenDataset, OpenFile, ReadAtt,
        ReadDataset, WriteAtt, WriteDataset,
    };
    use pmd_types::{Attribute, Buffer, Dataset, IterationEncoding};

    fn handler(dir: &str, access: Access, format: FileFormat) -> JsonIoHandler {
        JsonIoHandler::new(
            dir.to_owned(),
            access,
            format,
            "",
            &ConfigSource::empty(),
        )
        .unwrap()
    }

    fn user_flush(h: &mut JsonIoHandler) {
        h.flush(&FlushParams::new(FlushLevel::UserFlush)).unwrap();
    }

    fn write_series(dir: &str, format: FileFormat) -> (Writable, Writable) {
        let mut h = handler(dir, Access::Create, format);
        let root = Writable::new();
        h.enqueue(IoTask::new(
            root.clone(),
            Parameter::CreateFile(CreateFile {
                name: "series".to_owned(),
                encoding: IterationEncoding::GroupBased,
            }),
        ));
        h.enqueue(IoTask::new(
            root.clone(),
            Parameter::WriteAtt(WriteAtt {
                name: "openPMD".to_owned(),
                attribute: Attribute::from("1.1.0"),
            }),
        ));

        let group = Writable::new();
        group.set_parent(&root);
        h.enqueue(IoTask::new(
            group.clone(),
            Parameter::CreatePath(CreatePath {
                path: "data/100/meshes".to_owned(),
            }),
        ));

        let dataset = Writable::new();
        dataset.set_parent(&group);
        h.enqueue(IoTask::new(
            dataset.clone(),
            Parameter::CreateDataset(CreateDataset {
                name: "rho".to_owned(),
                dataset: Dataset::new(Datatype::Long, vec![5]),
            }),
        ));
        h.enqueue(IoTask::new(
            dataset.clone(),
            Parameter::WriteDataset(WriteDataset {
                offset: vec![0],
                extent: vec![5],
                data: Buffer::Long(Arc::new(vec![0, 1, 2, 3, 4])),
            }),
        ));
        user_flush(&mut h);
        (root, dataset)
    }

    #[test]
    fn written_file_reads_back() {
        let dir = test_helpers::tmp_dir().unwrap();
        let dir_path = dir.path().to_string_lossy().into_owned();
        let (root, dataset) = write_series(&dir_path, FileFormat::Json);
        assert!(root.written());
        assert!(dataset.written());
        assert!(dir.path().join("series.json").is_file());

        let mut h = handler(&dir_path, Access::ReadOnly, FileFormat::Json);
        let root = Writable::new();
        h.enqueue(IoTask::new(
            root.clone(),
            Parameter::OpenFile(OpenFile {
                name: "series".to_owned(),
                encoding: IterationEncoding::GroupBased,
            }),
        ));
        let version = ReadAtt {
            name: "openPMD".to_owned(),
            attribute: Default::default(),
        };
        h.enqueue(IoTask::new(root.clone(), Parameter::ReadAtt(version.clone())));

        let dataset = Writable::new();
        dataset.set_parent(&root);
        let open = OpenDataset {
            name: "data/100/meshes/rho".to_owned(),
            dtype: Default::default(),
            extent: Default::default(),
        };
        h.enqueue(IoTask::new(dataset.clone(), Parameter::OpenDataset(open.clone())));
        let read = ReadDataset {
            offset: vec![1],
            extent: vec![3],
            dtype: Datatype::Long,
            data: Default::default(),
        };
        h.enqueue(IoTask::new(dataset, Parameter::ReadDataset(read.clone())));
        h.flush(&FlushParams::default()).unwrap();

        assert_eq!(version.attribute.get(), Some(Attribute::from("1.1.0")));
        assert_eq!(open.dtype.get(), Some(Datatype::Long));
        assert_eq!(open.extent.get(), Some(vec![5]));
        assert_eq!(
            read.data.get(),
            Some(Buffer::Long(Arc::new(vec![1, 2, 3])))
        );
    }

    #[test]
    fn toml_flavor_round_trips() {
        let dir = test_helpers::tmp_dir().unwrap();
        let dir_path = dir.path().to_string_lossy().into_owned();
        write_series(&dir_path, FileFormat::Toml);
        assert!(dir.path().join("series.toml").is_file());

        let mut h = handler(&dir_path, Access::ReadOnly, FileFormat::Toml);
        let root = Writable::new();
        h.enqueue(IoTask::new(
            root.clone(),
            Parameter::OpenFile(OpenFile {
                name: "series".to_owned(),
                encoding: IterationEncoding::GroupBased,
            }),
        ));
        let dataset = Writable::new();
        dataset.set_parent(&root);
        let read = ReadDataset {
            offset: vec![0],
            extent: vec![5],
            dtype: Datatype::Long,
            data: Default::default(),
        };
        let open = OpenDataset {
            name: "data/100/meshes/rho".to_owned(),
            dtype: Default::default(),
            extent: Default::default(),
        };
        h.enqueue(IoTask::new(dataset.clone(), Parameter::OpenDataset(open)));
        h.enqueue(IoTask::new(dataset, Parameter::ReadDataset(read.clone())));
        h.flush(&FlushParams::default()).unwrap();
        assert_eq!(
            read.data.get(),
            Some(Buffer::Long(Arc::new(vec![0, 1, 2, 3, 4])))
        );
    }

    #[test]
    fn missing_file_is_no_such_file() {
        let dir = test_helpers::tmp_dir().unwrap();
        let mut h = handler(
            &dir.path().to_string_lossy(),
            Access::ReadOnly,
            FileFormat::Json,
        );
        h.enqueue(IoTask::new(
            Writable::new(),
            Parameter::OpenFile(OpenFile {
                name: "nothing_here".to_owned(),
                encoding: IterationEncoding::GroupBased,
            }),
        ));
        let err = h.flush(&FlushParams::default()).unwrap_err();
        assert!(matches!(err, Error::NoSuchFile { .. }));
    }

    #[test]
    fn list_paths_separates_groups_from_datasets() {
        let dir = test_helpers::tmp_dir().unwrap();
        let dir_path = dir.path().to_string_lossy().into_owned();
        let (root, _) = write_series(&dir_path, FileFormat::Json);

        let mut h = handler(&dir_path, Access::ReadOnly, FileFormat::Json);
        let reopened = Writable::new();
        h.enqueue(IoTask::new(
            reopened.clone(),
            Parameter::OpenFile(OpenFile {
                name: "series".to_owned(),
                encoding: IterationEncoding::GroupBased,
            }),
        ));
        let meshes = Writable::new();
        meshes.set_parent(&reopened);
        h.enqueue(IoTask::new(
            meshes.clone(),
            Parameter::CreatePath(CreatePath {
                path: "data/100/meshes".to_owned(),
            }),
        ));
        let list = ListPaths::default();
        h.enqueue(IoTask::new(meshes.clone(), Parameter::ListPaths(list.clone())));
        let datasets = crate::ListDatasets::default();
        h.enqueue(IoTask::new(
            meshes,
            Parameter::ListDatasets(datasets.clone()),
        ));
        h.flush(&FlushParams::default()).unwrap();

        assert_eq!(list.paths.get(), Some(vec![]));
        assert_eq!(datasets.datasets.get(), Some(vec!["rho".to_owned()]));
        drop(root);
    }

    #[test]
    fn deleted_attribute_is_not_found() {
        let dir = test_helpers::tmp_dir().unwrap();
        let dir_path = dir.path().to_string_lossy().into_owned();
        let mut h = handler(&dir_path, Access::Create, FileFormat::Json);
        let root = Writable::new();
        h.enqueue(IoTask::new(
            root.clone(),
            Parameter::CreateFile(CreateFile {
                name: "f".to_owned(),
                encoding: IterationEncoding::GroupBased,
            }),
        ));
        h.enqueue(IoTask::new(
            root.clone(),
            Parameter::WriteAtt(WriteAtt {
                name: "comment".to_owned(),
                attribute: Attribute::from("temporary"),
            }),
        ));
        h.enqueue(IoTask::new(
            root.clone(),
            Parameter::DeleteAtt(crate::DeleteAtt {
                name: "comment".to_owned(),
            }),
        ));
        let read = ReadAtt {
            name: "comment".to_owned(),
            attribute: Default::default(),
        };
        h.enqueue(IoTask::new(root, Parameter::ReadAtt(read)));
        let err = h.flush(&FlushParams::default()).unwrap_err();
        assert!(matches!(err, Error::ReadNotFound { .. }));
    }

    #[test]
    fn available_chunks_cover_the_dataset() {
        let dir = test_helpers::tmp_dir().unwrap();
        let dir_path = dir.path().to_string_lossy().into_owned();
        let (_, dataset) = write_series(&dir_path, FileFormat::Json);

        let mut h = handler(&dir_path, Access::ReadWrite, FileFormat::Json);
        let chunks = crate::AvailableChunks::default();
        h.enqueue(IoTask::new(dataset, Parameter::AvailableChunks(chunks.clone())));
        h.flush(&FlushParams::default()).unwrap();
        assert_eq!(
            chunks.chunks.get(),
            Some(vec![WrittenChunkInfo::new(vec![0], vec![5], 0)])
        );
    }
}
