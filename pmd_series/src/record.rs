//! Records: named groupings of identically shaped components.
//!
//! A record is either scalar (exactly one component, stored at the
//! record's own location) or vector/tensor (components keyed by axis
//! name). The scalar case is encoded by a sentinel child key.

use crate::{
    wrong_api, Attributable, AttributableData, Container, ContainerElement, RecordComponent,
    Result,
};
use pmd_io::{CreatePath, FlushParams, ListAtts, ListDatasets, ListPaths, Parameter};
use pmd_types::{Attribute, UnitDimension};

/// Child key reserving the scalar case. Deliberately unspellable as a real
/// axis name.
pub const SCALAR: &str = "\u{000B}Scalar";

/// Shared machinery of meshes, particle records and patch records.
#[derive(Debug, Clone)]
pub(crate) struct BaseRecord {
    components: Container<RecordComponent>,
}

impl BaseRecord {
    pub(crate) fn wired(data: AttributableData) -> Self {
        Self {
            components: Container::with_data(data),
        }
    }

    pub(crate) fn data(&self) -> &AttributableData {
        self.components.node()
    }

    pub(crate) fn components(&self) -> &Container<RecordComponent> {
        &self.components
    }

    /// Whether this record is scalar: its only component is keyed by the
    /// sentinel.
    pub(crate) fn scalar(&self) -> bool {
        self.components.contains(SCALAR)
    }

    /// The component for `key`, auto-created. Mixing scalar and vector
    /// layouts is rejected.
    pub(crate) fn component(&self, key: &str) -> Result<RecordComponent> {
        if key == SCALAR {
            if !self.components.is_empty() && !self.scalar() {
                return Err(wrong_api(
                    "record already has vector components, cannot also be scalar",
                ));
            }
        } else if self.scalar() {
            return Err(wrong_api(
                "record is scalar, cannot add vector components to it",
            ));
        }
        Ok(self.components.get(key))
    }

    /// Write this record under `name`, relative to its parent group.
    pub(crate) fn flush(&self, name: &str, params: &FlushParams, priority: &[&str]) -> Result<()> {
        if self.scalar() {
            let component = self.components.get(SCALAR);
            component.flush(name, params)?;
            self.data()
                .flush_attributes_onto(component.node().writable(), priority);
        } else {
            if !self.data().writable().written() {
                self.data().enqueue(Parameter::CreatePath(CreatePath {
                    path: name.to_owned(),
                }));
            }
            for (key, component) in self.components.iter() {
                component.flush(&key, params)?;
            }
            self.data().flush_attributes(priority);
        }
        self.data().writable().set_dirty(false);
        Ok(())
    }

    /// Populate the record from the backend. `name` is the record's key
    /// under its parent; `is_group` tells whether the backend shows it as a
    /// group (vector record or scalar constant) or as a plain dataset
    /// (scalar record).
    pub(crate) fn parse(&self, name: &str, is_group: bool) -> Result<()> {
        if !is_group {
            let component = self.components.get(SCALAR);
            component.parse(name, false)?;
            pull_attributes_from(self.data(), &component)?;
            return Ok(());
        }

        // open the group and decide: a scalar constant carries value/shape
        // attributes, anything else is a vector record
        self.data().enqueue(Parameter::OpenPath(pmd_io::OpenPath {
            path: name.to_owned(),
        }));
        let attributes = ListAtts::default();
        self.data()
            .enqueue(Parameter::ListAtts(attributes.clone()));
        self.data().flush_handler(&FlushParams::default())?;
        let attribute_names = attributes.attributes.take().unwrap_or_default();
        if attribute_names.iter().any(|a| a == "value")
            && attribute_names.iter().any(|a| a == "shape")
        {
            // the record node itself encodes one constant component; reuse
            // its position for the scalar child
            let component = self.components.get(SCALAR);
            let position = self
                .data()
                .writable()
                .position()
                .ok_or_else(|| wrong_api("record group was not positioned by the backend"))?;
            component.node().writable().set_position(position);
            component.node().writable().set_written(true);
            component.parse_constant_in_place()?;
            pull_attributes_from(self.data(), &component)?;
            return Ok(());
        }

        let datasets = ListDatasets::default();
        let paths = ListPaths::default();
        self.data()
            .enqueue(Parameter::ListDatasets(datasets.clone()));
        self.data().enqueue(Parameter::ListPaths(paths.clone()));
        self.data().flush_handler(&FlushParams::default())?;

        for dataset in datasets.datasets.take().unwrap_or_default() {
            let component = self.components.get(dataset.as_str());
            component.parse(&dataset, false)?;
        }
        for path in paths.paths.take().unwrap_or_default() {
            // groups inside a record are constant components
            let component = self.components.get(path.as_str());
            component.parse(&path, true)?;
        }
        self.data().read_attributes()?;
        self.data().writable().set_dirty(false);
        Ok(())
    }
}

/// Scalar records keep their attributes on the component's node; copy them
/// into the record-level map after parsing.
fn pull_attributes_from(data: &AttributableData, component: &RecordComponent) -> Result<()> {
    for name in component.attribute_names() {
        if let Some(value) = component.get_attribute(&name) {
            data.set_attribute_raw(name, value);
        }
    }
    data.writable().set_dirty(false);
    Ok(())
}

/// Per-particle data for one quantity, e.g. `position/x`.
#[derive(Debug, Clone)]
pub struct Record {
    base: BaseRecord,
}

impl Attributable for Record {
    fn node(&self) -> &AttributableData {
        self.base.data()
    }
}

impl ContainerElement for Record {
    fn new_child(parent: &AttributableData, key: &str) -> Self {
        let record = Self {
            base: BaseRecord::wired(AttributableData::child_of(parent, key)),
        };
        record
            .node()
            .set_attribute_raw("unitDimension", Attribute::ArrDbl7([0.0; 7]));
        record
            .node()
            .set_attribute_raw("timeOffset", Attribute::Double(0.0));
        record
    }

    fn element_node(&self) -> &AttributableData {
        self.base.data()
    }
}

impl Record {
    /// The component for one axis, auto-created.
    pub fn component(&self, key: &str) -> Result<RecordComponent> {
        self.base.component(key)
    }

    /// The single component of a scalar record.
    pub fn scalar_component(&self) -> Result<RecordComponent> {
        self.base.component(SCALAR)
    }

    pub fn scalar(&self) -> bool {
        self.base.scalar()
    }

    pub fn component_keys(&self) -> Vec<String> {
        self.base.components().keys()
    }

    pub(crate) fn all_components(&self) -> Vec<(String, RecordComponent)> {
        self.base.components().iter()
    }

    /// Powers of the seven base measures characterizing this record.
    pub fn unit_dimension(&self) -> UnitDimension {
        self.node()
            .get_attribute_raw("unitDimension")
            .and_then(|a| a.as_unit_dimension())
            .unwrap_or([0.0; 7])
    }

    pub fn set_unit_dimension(&self, unit_dimension: UnitDimension) -> &Self {
        self.node()
            .set_attribute_raw("unitDimension", Attribute::ArrDbl7(unit_dimension));
        self
    }

    pub fn time_offset(&self) -> f64 {
        self.node()
            .get_attribute_raw("timeOffset")
            .and_then(|a| a.as_f64())
            .unwrap_or(0.0)
    }

    pub fn set_time_offset(&self, time_offset: f64) -> &Self {
        self.node()
            .set_attribute_raw("timeOffset", Attribute::Double(time_offset));
        self
    }

    pub(crate) fn flush(&self, name: &str, params: &FlushParams) -> Result<()> {
        self.base.flush(name, params, &["unitDimension", "timeOffset"])
    }

    pub(crate) fn parse(&self, name: &str, is_group: bool) -> Result<()> {
        self.base.parse(name, is_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pmd_io::{DummyIoHandler, SharedIoHandler};
    use pmd_types::Access;
    use std::sync::Arc;

    fn record() -> Record {
        let handler: SharedIoHandler = Arc::new(Mutex::new(DummyIoHandler::new(
            ".".to_owned(),
            Access::Create,
        )));
        let root = AttributableData::new(handler);
        Record::new_child(&root, "momentum")
    }

    #[test]
    fn scalar_and_vector_layouts_are_exclusive() {
        let r = record();
        r.component("x").unwrap();
        r.component("y").unwrap();
        assert!(!r.scalar());
        assert!(r.scalar_component().is_err());

        let s = record();
        s.scalar_component().unwrap();
        assert!(s.scalar());
        assert!(s.component("x").is_err());
        // the scalar component can be fetched again
        s.scalar_component().unwrap();
    }

    #[test]
    fn unit_dimension_defaults_to_dimensionless() {
        let r = record();
        assert_eq!(r.unit_dimension(), [0.0; 7]);
        r.set_unit_dimension([1.0, 1.0, -2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(r.unit_dimension()[2], -2.0);
        assert_eq!(r.time_offset(), 0.0);
    }
}
