//! The shared identity anchoring a logical node to its backend state.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// An opaque, backend-assigned location inside an open file. Backends
/// downcast through [`FilePosition::as_any`] to their own position type.
pub trait FilePosition: Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Default)]
struct State {
    file_position: Option<Arc<dyn FilePosition>>,
    parent: Option<Weak<Inner>>,
    /// The key under which the parent container refers to this node.
    own_key: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    /// Unwritten local changes exist.
    dirty: AtomicBool,
    /// At least one task for this node has been executed.
    written: AtomicBool,
}

/// The shared node identity.
///
/// Every logical object holds one of these; copying a logical handle clones
/// the `Writable` and thereby shares identity, flags and backend position
/// with the original. Parent links are weak, so the graph stays acyclic for
/// ownership purposes.
#[derive(Debug, Clone, Default)]
pub struct Writable {
    inner: Arc<Inner>,
}

impl Writable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether two handles refer to the same node.
    pub fn same_node(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Relaxed)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.inner.dirty.store(dirty, Ordering::Relaxed);
    }

    pub fn written(&self) -> bool {
        self.inner.written.load(Ordering::Relaxed)
    }

    pub fn set_written(&self, written: bool) {
        self.inner.written.store(written, Ordering::Relaxed);
    }

    pub fn position(&self) -> Option<Arc<dyn FilePosition>> {
        self.inner.state.lock().file_position.clone()
    }

    pub fn set_position(&self, position: Arc<dyn FilePosition>) {
        self.inner.state.lock().file_position = Some(position);
    }

    pub fn clear_position(&self) {
        self.inner.state.lock().file_position = None;
    }

    pub fn parent(&self) -> Option<Self> {
        self.inner
            .state
            .lock()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    pub fn set_parent(&self, parent: &Self) {
        self.inner.state.lock().parent = Some(Arc::downgrade(&parent.inner));
    }

    pub fn own_key(&self) -> Option<String> {
        self.inner.state.lock().own_key.clone()
    }

    pub fn set_own_key(&self, key: impl Into<String>) {
        self.inner.state.lock().own_key = Some(key.into());
    }

    /// The nearest ancestor (possibly this node) that has a backend
    /// position.
    pub fn positioned_ancestor(&self) -> Option<(Self, Arc<dyn FilePosition>)> {
        let mut current = self.clone();
        loop {
            if let Some(position) = current.position() {
                return Some((current, position));
            }
            current = current.parent()?;
        }
    }
}
