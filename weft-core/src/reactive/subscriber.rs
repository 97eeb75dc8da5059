//! Subscriber sets for the reactive system.
//!
//! Every source of reactive values (a signal, or the output of a memo) owns a
//! subscriber set: the computations that read it during their last execution.
//! Sets hold weak references, so a computation whose last handle is dropped
//! simply falls out of every set it was in.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::graph::{ComputationId, Reactive};

/// Unique identifier for a reactive source.
///
/// A signal's ID is the ID of its subscriber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Generate a new unique source ID.
    ///
    /// Uses an atomic counter so IDs stay unique across runtimes.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

/// The computations subscribed to one reactive source.
pub struct SubscriberSet {
    id: SourceId,

    /// The computation that produces this source, if any. Only used to order
    /// staged derivations.
    owner: Option<ComputationId>,

    subscribers: RefCell<IndexMap<ComputationId, Weak<dyn Reactive>>>,
}

impl SubscriberSet {
    /// Create an empty set, optionally owned by a computation.
    pub(crate) fn new(owner: Option<ComputationId>) -> Self {
        Self {
            id: SourceId::new(),
            owner,
            subscribers: RefCell::new(IndexMap::new()),
        }
    }

    /// Get the source ID.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Get the owning computation, if any.
    pub fn owner(&self) -> Option<ComputationId> {
        self.owner
    }

    pub(crate) fn subscribe(&self, id: ComputationId, subscriber: Weak<dyn Reactive>) {
        self.subscribers.borrow_mut().insert(id, subscriber);
    }

    pub(crate) fn unsubscribe(&self, id: ComputationId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn clear(&self) {
        self.subscribers.borrow_mut().clear();
    }

    pub fn contains(&self, id: ComputationId) -> bool {
        self.subscribers.borrow().contains_key(&id)
    }

    /// Get the number of subscribers, including ones that were dropped but
    /// not yet pruned.
    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.borrow().is_empty()
    }

    /// Upgrade every live subscriber, pruning the ones that were dropped.
    pub(crate) fn live(&self) -> SmallVec<[Rc<dyn Reactive>; 4]> {
        let mut live = SmallVec::new();
        self.subscribers.borrow_mut().retain(|_, weak| match weak.upgrade() {
            Some(subscriber) => {
                live.push(subscriber);
                true
            }
            None => false,
        });
        live
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::graph::{Node, NodeKind};

    struct Probe(Node);

    impl Reactive for Probe {
        fn node(&self) -> &Node {
            &self.0
        }

        fn run(&self) -> Result<(), ReactiveError> {
            Ok(())
        }
    }

    #[test]
    fn source_ids_are_unique() {
        let id1 = SourceId::new();
        let id2 = SourceId::new();
        let id3 = SourceId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn membership_is_by_identity() {
        let set = SubscriberSet::new(None);
        let probe: Rc<dyn Reactive> = Rc::new(Probe(Node::new(NodeKind::Effect)));
        let id = probe.node().id();

        set.subscribe(id, Rc::downgrade(&probe));
        set.subscribe(id, Rc::downgrade(&probe));
        assert_eq!(set.len(), 1);
        assert!(set.contains(id));

        set.unsubscribe(id);
        assert!(set.is_empty());
    }

    #[test]
    fn live_prunes_dropped_subscribers() {
        let set = SubscriberSet::new(None);
        let kept: Rc<dyn Reactive> = Rc::new(Probe(Node::new(NodeKind::Effect)));
        let dropped: Rc<dyn Reactive> = Rc::new(Probe(Node::new(NodeKind::Derivation)));

        set.subscribe(kept.node().id(), Rc::downgrade(&kept));
        set.subscribe(dropped.node().id(), Rc::downgrade(&dropped));
        drop(dropped);

        let live = set.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].node().id(), kept.node().id());
        assert_eq!(set.len(), 1);
    }
}
