//! Graph Nodes
//!
//! This module defines the computation node shared by memos and effects:
//! its identity, its kind, its state flags, and its dependency edges.
//!
//! # Edge Invariant
//!
//! A node is in a subscriber set iff that set is in the node's dependencies.
//! Both sides are only ever changed together, through [`Node::link`] and
//! [`Node::clear_dependencies`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::ReactiveError;
use crate::reactive::{SourceId, SubscriberSet};

/// Unique identifier for a computation in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId(u64);

impl ComputationId {
    /// Generate a new unique computation ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ComputationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of computation a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A memo. Consumed for its value; drained at derivation priority.
    Derivation,

    /// An effect. Run for its side effects; drained at effect priority.
    Effect,
}

/// State flags of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeState {
    /// The cached value must be recomputed.
    pub stale: bool,
    /// The node is executing right now.
    pub running: bool,
    /// The node has been disposed and will never run again.
    pub disposed: bool,
    /// The last execution failed.
    pub errored: bool,
}

/// A computation that can sit in the dependency graph.
///
/// Implemented by the memo and effect internals so subscriber sets and batch
/// frames can hold them without knowing their value type.
pub(crate) trait Reactive {
    /// The shared node state.
    fn node(&self) -> &Node;

    /// Execute the computation if it is stale.
    fn run(&self) -> Result<(), ReactiveError>;

    /// The subscriber set of the value this computation produces, if other
    /// computations can read it.
    fn output(&self) -> Option<&SubscriberSet> {
        None
    }
}

/// A computation node.
pub struct Node {
    id: ComputationId,
    kind: NodeKind,
    state: Cell<NodeState>,

    /// Subscriber sets read during the last execution, keyed by source.
    dependencies: RefCell<IndexMap<SourceId, Rc<SubscriberSet>>>,
}

impl Node {
    /// Create a new node. Nodes start stale so their first execution runs.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: ComputationId::new(),
            kind,
            state: Cell::new(NodeState {
                stale: true,
                ..NodeState::default()
            }),
            dependencies: RefCell::new(IndexMap::new()),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get a snapshot of the state flags.
    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    pub fn is_stale(&self) -> bool {
        self.state.get().stale
    }

    pub fn is_running(&self) -> bool {
        self.state.get().running
    }

    pub fn is_disposed(&self) -> bool {
        self.state.get().disposed
    }

    pub fn is_errored(&self) -> bool {
        self.state.get().errored
    }

    fn update(&self, f: impl FnOnce(&mut NodeState)) {
        let mut state = self.state.get();
        f(&mut state);
        self.state.set(state);
    }

    /// Flag the node as needing recomputation. Disposed nodes are left alone.
    pub fn mark_stale(&self) {
        if !self.is_disposed() {
            self.update(|s| s.stale = true);
        }
    }

    /// Enter the running state and drop every edge from the previous run.
    pub(crate) fn begin_run(&self) {
        self.update(|s| {
            s.running = true;
            s.stale = false;
            s.errored = false;
        });
        self.clear_dependencies();
    }

    /// Leave the running state.
    pub(crate) fn finish_run(&self) {
        self.update(|s| s.running = false);
    }

    /// Record a failed execution.
    pub(crate) fn fail_run(&self) {
        self.update(|s| {
            s.running = false;
            s.errored = true;
        });
    }

    /// Mark the node disposed and drop its edges.
    ///
    /// Returns `false` if the node was already disposed.
    pub(crate) fn dispose(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.update(|s| {
            s.disposed = true;
            s.stale = false;
        });
        self.clear_dependencies();
        true
    }

    /// Record an edge between this node and `source`, on both sides.
    ///
    /// Idempotent; disposed nodes record nothing.
    pub(crate) fn link(&self, source: &Rc<SubscriberSet>, this: Weak<dyn Reactive>) {
        if self.is_disposed() {
            return;
        }
        let mut dependencies = self.dependencies.borrow_mut();
        if dependencies.contains_key(&source.id()) {
            return;
        }
        source.subscribe(self.id, this);
        dependencies.insert(source.id(), Rc::clone(source));
    }

    /// Remove every edge this node holds, on both sides.
    pub(crate) fn clear_dependencies(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.borrow_mut());
        for source in dependencies.values() {
            source.unsubscribe(self.id);
        }
    }

    /// Owners of the subscriber sets this node depends on.
    ///
    /// Signals have no owner; a memo's output set is owned by the memo.
    pub(crate) fn dependency_owners(&self) -> SmallVec<[ComputationId; 4]> {
        self.dependencies
            .borrow()
            .values()
            .filter_map(|source| source.owner())
            .collect()
    }

    /// Check whether this node currently depends on `source`.
    pub fn depends_on(&self, source: SourceId) -> bool {
        self.dependencies.borrow().contains_key(&source)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}
