//! The generic ordered mapping between hierarchy levels.

use crate::{Attributable, AttributableData};
use parking_lot::Mutex;
use pmd_io::{DeletePath, Parameter};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An entity that can live inside a [`Container`].
pub trait ContainerElement: Clone {
    /// Construct a default child wired under the container's node.
    fn new_child(parent: &AttributableData, key: &str) -> Self;

    /// The child's shared node state.
    fn element_node(&self) -> &AttributableData;
}

/// Ordered mapping `key -> child entity` that is itself a node of the
/// hierarchy.
///
/// Lookup of a missing key auto-creates a default child, wires it to this
/// container's backend handle and marks both dirty. Copies share entries.
#[derive(Debug)]
pub struct Container<T, K = String> {
    data: AttributableData,
    entries: Arc<Mutex<BTreeMap<K, T>>>,
}

impl<T, K> Clone for Container<T, K> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T, K> Attributable for Container<T, K> {
    fn node(&self) -> &AttributableData {
        &self.data
    }
}

impl<T, K> Container<T, K>
where
    T: ContainerElement,
    K: Clone + Ord + ToString,
{
    pub(crate) fn new(parent: &AttributableData, own_key: &str) -> Self {
        Self::with_data(AttributableData::child_of(parent, own_key))
    }

    /// A container living directly on an existing node, for entities that
    /// are themselves mappings (records over their components).
    pub(crate) fn with_data(data: AttributableData) -> Self {
        Self {
            data,
            entries: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// The child under `key`, created as a default child if absent.
    pub fn get(&self, key: impl Into<K>) -> T {
        let key = key.into();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            return existing.clone();
        }
        let child = T::new_child(&self.data, &key.to_string());
        self.data.writable().set_dirty(true);
        child.element_node().writable().set_dirty(true);
        entries.insert(key.clone(), child.clone());
        child
    }

    /// The child under `key`, without creating one.
    pub fn find(&self, key: impl Into<K>) -> Option<T> {
        self.entries.lock().get(&key.into()).cloned()
    }

    pub fn contains(&self, key: impl Into<K>) -> bool {
        self.entries.lock().contains_key(&key.into())
    }

    /// Drop the child, deleting its backend subtree if it was written.
    pub fn remove(&self, key: impl Into<K>) -> bool {
        let key = key.into();
        let mut entries = self.entries.lock();
        match entries.remove(&key) {
            Some(child) => {
                self.data.writable().set_dirty(true);
                if child.element_node().writable().written() {
                    self.data.enqueue_for(
                        child.element_node().writable(),
                        Parameter::DeletePath(DeletePath {
                            path: key.to_string(),
                        }),
                    );
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    /// A snapshot of all entries; the handles share state with the
    /// container's own.
    pub fn iter(&self) -> Vec<(K, T)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Insert an externally constructed child, used while parsing.
    pub(crate) fn insert(&self, key: K, child: T) {
        self.entries.lock().insert(key, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pmd_io::{DummyIoHandler, SharedIoHandler};
    use pmd_types::Access;

    #[derive(Debug, Clone)]
    struct Leaf {
        data: AttributableData,
    }

    impl ContainerElement for Leaf {
        fn new_child(parent: &AttributableData, key: &str) -> Self {
            let data = AttributableData::child_of(parent, key);
            Self { data }
        }

        fn element_node(&self) -> &AttributableData {
            &self.data
        }
    }

    fn container() -> Container<Leaf> {
        let handler: SharedIoHandler = Arc::new(Mutex::new(DummyIoHandler::new(
            ".".to_owned(),
            Access::Create,
        )));
        let root = AttributableData::new(handler);
        Container::new(&root, "leaves")
    }

    #[test]
    fn lookup_auto_creates_and_marks_dirty() {
        let c = container();
        assert!(!c.contains("a"));
        assert!(!c.node().writable().dirty());

        let leaf = c.get("a");
        assert!(c.contains("a"));
        assert!(c.node().writable().dirty());
        assert!(leaf.data.writable().dirty());

        // second lookup returns the same shared node
        let again = c.get("a");
        assert!(again.data.writable().same_node(leaf.data.writable()));
    }

    #[test]
    fn find_does_not_create() {
        let c = container();
        assert!(c.find("ghost").is_none());
        assert!(!c.contains("ghost"));
        c.get("real");
        assert!(c.find("real").is_some());
    }

    #[test]
    fn removal() {
        let c = container();
        c.get("a");
        assert!(c.remove("a"));
        assert!(!c.contains("a"));
        assert!(!c.remove("a"));
    }

    #[test]
    fn copies_observe_the_same_entries() {
        let c = container();
        let copy = c.clone();
        c.get("shared");
        assert!(copy.contains("shared"));
        assert_eq!(copy.len(), 1);
    }
}
