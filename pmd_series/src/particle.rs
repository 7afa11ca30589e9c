//! Per-particle data: species, their records and particle patches.

use crate::record::BaseRecord;
use crate::{
    invalid_operation, Attributable, AttributableData, Container, ContainerElement, Dataset,
    Record, RecordComponent, Result,
};
use pmd_io::{CreatePath, FlushParams, ListDatasets, ListPaths, OpenPath, Parameter};
use pmd_types::{Datatype, Extent, Offset, PmdScalar};

const PATCHES_GROUP: &str = "particlePatches";

/// A record of records for one species, optionally carrying particle
/// patches.
#[derive(Debug, Clone)]
pub struct ParticleSpecies {
    records: Container<Record>,
    patches: ParticlePatches,
}

impl Attributable for ParticleSpecies {
    fn node(&self) -> &AttributableData {
        self.records.node()
    }
}

impl ContainerElement for ParticleSpecies {
    fn new_child(parent: &AttributableData, key: &str) -> Self {
        let data = AttributableData::child_of(parent, key);
        let patches = ParticlePatches::wired(AttributableData::child_of(&data, PATCHES_GROUP));
        Self {
            records: Container::with_data(data),
            patches,
        }
    }

    fn element_node(&self) -> &AttributableData {
        self.records.node()
    }
}

impl ParticleSpecies {
    /// The record under `key`, auto-created.
    pub fn record(&self, key: &str) -> Record {
        self.records.get(key)
    }

    pub fn contains_record(&self, key: &str) -> bool {
        self.records.contains(key)
    }

    pub fn record_keys(&self) -> Vec<String> {
        self.records.keys()
    }

    pub fn particle_patches(&self) -> &ParticlePatches {
        &self.patches
    }

    /// The reserved records `position` and `positionOffset` must agree on
    /// their component axes when both are present.
    fn check_reserved_records(&self, species: &str) -> Result<()> {
        let (Some(position), Some(offset)) = (
            self.records.find("position"),
            self.records.find("positionOffset"),
        ) else {
            return Ok(());
        };
        let mut position_keys = position.component_keys();
        let mut offset_keys = offset.component_keys();
        position_keys.sort();
        offset_keys.sort();
        if position_keys != offset_keys {
            return Err(invalid_operation(format!(
                "species \"{species}\": position and positionOffset disagree on their axes"
            )));
        }
        Ok(())
    }

    pub(crate) fn flush(&self, name: &str, params: &FlushParams) -> Result<()> {
        self.check_reserved_records(name)?;
        if !self.node().writable().written() {
            self.node().enqueue(Parameter::CreatePath(CreatePath {
                path: name.to_owned(),
            }));
        }
        for (key, record) in self.records.iter() {
            record.flush(&key, params)?;
        }
        if !self.patches.is_empty() {
            self.patches.flush(params)?;
        }
        self.node().flush_attributes(&[]);
        self.node().writable().set_dirty(false);
        Ok(())
    }

    pub(crate) fn parse(&self, name: &str) -> Result<()> {
        self.node().enqueue(Parameter::OpenPath(OpenPath {
            path: name.to_owned(),
        }));
        let paths = ListPaths::default();
        let datasets = ListDatasets::default();
        self.node().enqueue(Parameter::ListPaths(paths.clone()));
        self.node()
            .enqueue(Parameter::ListDatasets(datasets.clone()));
        self.node().flush_handler(&FlushParams::default())?;

        for path in paths.paths.take().unwrap_or_default() {
            if path == PATCHES_GROUP {
                self.patches.parse()?;
                continue;
            }
            let record = self.records.get(path.as_str());
            record.parse(&path, true)?;
        }
        for dataset in datasets.datasets.take().unwrap_or_default() {
            let record = self.records.get(dataset.as_str());
            record.parse(&dataset, false)?;
        }
        self.node().read_attributes()?;
        Ok(())
    }
}

/// Decomposition metadata: which slab of the species' data each writing
/// patch produced.
#[derive(Debug, Clone)]
pub struct ParticlePatches {
    records: Container<PatchRecord>,
}

impl Attributable for ParticlePatches {
    fn node(&self) -> &AttributableData {
        self.records.node()
    }
}

impl ParticlePatches {
    fn wired(data: AttributableData) -> Self {
        Self {
            records: Container::with_data(data),
        }
    }

    pub fn record(&self, key: &str) -> PatchRecord {
        self.records.get(key)
    }

    pub fn record_keys(&self) -> Vec<String> {
        self.records.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn flush(&self, params: &FlushParams) -> Result<()> {
        if !self.node().writable().written() {
            self.node().enqueue(Parameter::CreatePath(CreatePath {
                path: PATCHES_GROUP.to_owned(),
            }));
        }
        for (key, record) in self.records.iter() {
            record.flush(&key, params)?;
        }
        self.node().flush_attributes(&[]);
        self.node().writable().set_dirty(false);
        Ok(())
    }

    fn parse(&self) -> Result<()> {
        self.node().enqueue(Parameter::OpenPath(OpenPath {
            path: PATCHES_GROUP.to_owned(),
        }));
        let paths = ListPaths::default();
        let datasets = ListDatasets::default();
        self.node().enqueue(Parameter::ListPaths(paths.clone()));
        self.node()
            .enqueue(Parameter::ListDatasets(datasets.clone()));
        self.node().flush_handler(&FlushParams::default())?;

        for path in paths.paths.take().unwrap_or_default() {
            self.records.get(path.as_str()).parse(&path, true)?;
        }
        for dataset in datasets.datasets.take().unwrap_or_default() {
            self.records.get(dataset.as_str()).parse(&dataset, false)?;
        }
        Ok(())
    }
}

/// One quantity of the patch decomposition; its components are 1-D,
/// indexed by patch id, and homogeneously typed.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    base: BaseRecord,
}

impl Attributable for PatchRecord {
    fn node(&self) -> &AttributableData {
        self.base.data()
    }
}

impl ContainerElement for PatchRecord {
    fn new_child(parent: &AttributableData, key: &str) -> Self {
        Self {
            base: BaseRecord::wired(AttributableData::child_of(parent, key)),
        }
    }

    fn element_node(&self) -> &AttributableData {
        self.base.data()
    }
}

impl PatchRecord {
    pub fn component(&self, key: &str) -> Result<PatchRecordComponent> {
        Ok(PatchRecordComponent {
            inner: self.base.component(key)?,
        })
    }

    pub fn scalar_component(&self) -> Result<PatchRecordComponent> {
        Ok(PatchRecordComponent {
            inner: self.base.component(crate::SCALAR)?,
        })
    }

    pub fn component_keys(&self) -> Vec<String> {
        self.base.components().keys()
    }

    pub(crate) fn all_components(&self) -> Vec<(String, RecordComponent)> {
        self.base.components().iter()
    }

    /// All components of a patch record share one datatype.
    fn check_homogeneous(&self, name: &str) -> Result<()> {
        let mut dtype: Option<Datatype> = None;
        for (_, component) in self.base.components().iter() {
            let current = component.datatype();
            match dtype {
                None => dtype = Some(current),
                Some(first) if first.is_same(&current) => {}
                Some(first) => {
                    return Err(invalid_operation(format!(
                        "patch record \"{name}\" mixes datatypes {first} and {current}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn flush(&self, name: &str, params: &FlushParams) -> Result<()> {
        self.check_homogeneous(name)?;
        self.base.flush(name, params, &["unitDimension"])
    }

    pub(crate) fn parse(&self, name: &str, is_group: bool) -> Result<()> {
        self.base.parse(name, is_group)
    }
}

/// A 1-D component of a [`PatchRecord`], one entry per patch.
#[derive(Debug, Clone)]
pub struct PatchRecordComponent {
    inner: RecordComponent,
}

impl Attributable for PatchRecordComponent {
    fn node(&self) -> &AttributableData {
        self.inner.node()
    }
}

impl PatchRecordComponent {
    pub fn reset_dataset(&self, dataset: Dataset) -> Result<&Self> {
        if dataset.rank() != 1 {
            return Err(invalid_operation(
                "patch record components are 1-D, indexed by patch id",
            ));
        }
        self.inner.reset_dataset(dataset)?;
        Ok(self)
    }

    pub fn store<T: PmdScalar>(&self, patch_id: u64, value: T) -> Result<()> {
        self.inner
            .store_chunk(vec![value], vec![patch_id], vec![1])
    }

    pub fn load<T: PmdScalar>(&self, offset: Offset, extent: Extent) -> Result<crate::DataHandle<T>> {
        self.inner.load_chunk(offset, extent)
    }

    pub fn datatype(&self) -> Datatype {
        self.inner.datatype()
    }

    pub fn extent(&self) -> Extent {
        self.inner.extent()
    }
}
