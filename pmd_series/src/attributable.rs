//! Shared node state and the attribute surface every entity exposes.

use crate::{wrong_api, Result};
use parking_lot::Mutex;
use pmd_io::{
    DeleteAtt, FlushParams, IoTask, ListAtts, Parameter, ReadAtt, SharedIoHandler, Writable,
    WriteAtt,
};
use pmd_types::Attribute;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Keys owned by the schema; mutating them through the generic attribute
/// surface is rejected in favor of the typed setters.
const RESERVED_KEYS: &[&str] = &[
    "openPMD",
    "openPMDextension",
    "basePath",
    "meshesPath",
    "particlesPath",
    "iterationEncoding",
    "iterationFormat",
    "value",
    "shape",
];

/// The state every logical node shares with its copies: a [`Writable`]
/// identity, an attribute map and the backend handle.
#[derive(Debug, Clone)]
pub struct AttributableData {
    writable: Writable,
    attributes: Arc<Mutex<BTreeMap<String, Attribute>>>,
    handler: SharedIoHandler,
}

impl AttributableData {
    pub(crate) fn new(handler: SharedIoHandler) -> Self {
        Self {
            writable: Writable::new(),
            attributes: Arc::new(Mutex::new(BTreeMap::new())),
            handler,
        }
    }

    /// A fresh node linked under `parent` in the backend hierarchy.
    pub(crate) fn child_of(parent: &Self, key: impl Into<String>) -> Self {
        let child = Self::new(Arc::clone(&parent.handler));
        child.writable.set_parent(&parent.writable);
        child.writable.set_own_key(key);
        child
    }

    pub fn writable(&self) -> &Writable {
        &self.writable
    }

    pub(crate) fn handler(&self) -> &SharedIoHandler {
        &self.handler
    }

    pub(crate) fn enqueue(&self, parameter: Parameter) {
        self.handler
            .lock()
            .enqueue(IoTask::new(self.writable.clone(), parameter));
    }

    pub(crate) fn enqueue_for(&self, writable: &Writable, parameter: Parameter) {
        self.handler
            .lock()
            .enqueue(IoTask::new(writable.clone(), parameter));
    }

    pub(crate) fn flush_handler(&self, params: &FlushParams) -> Result<()> {
        self.handler.lock().flush(params)?;
        Ok(())
    }

    pub(crate) fn set_attribute_raw(&self, key: impl Into<String>, value: Attribute) {
        self.attributes.lock().insert(key.into(), value);
        self.writable.set_dirty(true);
    }

    pub(crate) fn get_attribute_raw(&self, key: &str) -> Option<Attribute> {
        self.attributes.lock().get(key).cloned()
    }

    pub(crate) fn delete_attribute_raw(&self, key: &str) -> bool {
        let removed = self.attributes.lock().remove(key).is_some();
        if removed {
            self.writable.set_dirty(true);
            if self.writable.written() {
                self.enqueue(Parameter::DeleteAtt(DeleteAtt {
                    name: key.to_owned(),
                }));
            }
        }
        removed
    }

    pub(crate) fn attribute_names_raw(&self) -> Vec<String> {
        self.attributes.lock().keys().cloned().collect()
    }

    /// Enqueue writes for all attributes: schema-required keys first, so a
    /// reader finding a partially flushed file can still identify it.
    pub(crate) fn flush_attributes(&self, priority: &[&str]) {
        self.flush_attributes_onto(&self.writable.clone(), priority)
    }

    /// Like [`Self::flush_attributes`], but targeting another node. Scalar
    /// records store their attributes on their single component's node.
    pub(crate) fn flush_attributes_onto(&self, target: &Writable, priority: &[&str]) {
        let attributes = self.attributes.lock();
        let write = |name: &str, value: &Attribute| {
            self.enqueue_for(
                target,
                Parameter::WriteAtt(WriteAtt {
                    name: name.to_owned(),
                    attribute: value.clone(),
                }),
            );
        };
        for key in priority {
            if let Some(value) = attributes.get(*key) {
                write(key, value);
            }
        }
        for (key, value) in attributes.iter() {
            if !priority.contains(&key.as_str()) {
                write(key, value);
            }
        }
    }

    /// Fetch every attribute of this node from the backend into the local
    /// map. Flushes internally.
    pub(crate) fn read_attributes(&self) -> Result<()> {
        let list = ListAtts::default();
        self.enqueue(Parameter::ListAtts(list.clone()));
        self.flush_handler(&FlushParams::default())?;
        let names = list.attributes.take().unwrap_or_default();

        let mut pending = Vec::with_capacity(names.len());
        for name in names {
            let read = ReadAtt {
                name: name.clone(),
                attribute: Default::default(),
            };
            self.enqueue(Parameter::ReadAtt(read.clone()));
            pending.push((name, read));
        }
        self.flush_handler(&FlushParams::default())?;

        let mut attributes = self.attributes.lock();
        for (name, read) in pending {
            if let Some(value) = read.attribute.take() {
                attributes.insert(name, value);
            }
        }
        self.writable.set_dirty(false);
        Ok(())
    }
}

/// The capability set shared by every entity of the hierarchy: typed access
/// to a mutable attribute map, plus dirty tracking against the backend.
pub trait Attributable {
    /// The shared node state behind this handle.
    fn node(&self) -> &AttributableData;

    /// Set a free-form attribute. Schema-owned keys are rejected; use the
    /// entity's typed setters for those.
    fn set_attribute(&self, key: &str, value: impl Into<Attribute>) -> Result<()> {
        if RESERVED_KEYS.contains(&key) {
            return Err(wrong_api(format!(
                "attribute \"{key}\" is controlled by the openPMD schema, use the typed setter"
            )));
        }
        self.node().set_attribute_raw(key, value.into());
        Ok(())
    }

    fn get_attribute(&self, key: &str) -> Option<Attribute> {
        self.node().get_attribute_raw(key)
    }

    fn contains_attribute(&self, key: &str) -> bool {
        self.node().get_attribute_raw(key).is_some()
    }

    fn delete_attribute(&self, key: &str) -> Result<bool> {
        if RESERVED_KEYS.contains(&key) {
            return Err(wrong_api(format!(
                "attribute \"{key}\" is controlled by the openPMD schema and cannot be deleted"
            )));
        }
        Ok(self.node().delete_attribute_raw(key))
    }

    fn attribute_names(&self) -> Vec<String> {
        self.node().attribute_names_raw()
    }

    fn num_attributes(&self) -> usize {
        self.node().attribute_names_raw().len()
    }

    /// Free-form documentation attribute.
    fn comment(&self) -> Option<String> {
        self.get_attribute("comment")
            .and_then(|a| a.as_str().map(str::to_owned))
    }

    fn set_comment(&self, comment: &str) -> Result<()> {
        self.set_attribute("comment", comment)
    }

    fn dirty(&self) -> bool {
        self.node().writable().dirty()
    }

    fn written(&self) -> bool {
        self.node().writable().written()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmd_io::DummyIoHandler;
    use pmd_types::Access;

    struct Plain {
        data: AttributableData,
    }

    impl Attributable for Plain {
        fn node(&self) -> &AttributableData {
            &self.data
        }
    }

    fn plain() -> Plain {
        let handler: SharedIoHandler = Arc::new(Mutex::new(DummyIoHandler::new(
            ".".to_owned(),
            Access::Create,
        )));
        Plain {
            data: AttributableData::new(handler),
        }
    }

    #[test]
    fn attribute_life_cycle() {
        let node = plain();
        assert!(!node.dirty());
        node.set_attribute("temperature", 273.15).unwrap();
        assert!(node.dirty());
        assert_eq!(
            node.get_attribute("temperature"),
            Some(Attribute::Double(273.15))
        );

        assert!(node.delete_attribute("temperature").unwrap());
        assert_eq!(node.get_attribute("temperature"), None);
        assert!(!node.delete_attribute("temperature").unwrap());
    }

    #[test]
    fn reserved_keys_are_rejected() {
        let node = plain();
        assert!(node.set_attribute("openPMD", "2.0").is_err());
        assert!(node.set_attribute("basePath", "/other/").is_err());
        assert!(node.delete_attribute("iterationEncoding").is_err());
    }

    #[test]
    fn copies_share_the_attribute_map() {
        let node = plain();
        let copy = Plain {
            data: node.data.clone(),
        };
        node.set_attribute("comment", "shared").unwrap();
        assert_eq!(copy.comment().as_deref(), Some("shared"));
    }
}
