//! Dependency Graph
//!
//! This module implements the graph side of the engine: computation nodes,
//! the batch coordinator that drains them, and the scheduler capability that
//! can defer them.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Sources are signals and the outputs of memos, each owning a subscriber set
//! - Nodes are computations (memos, effects)
//! - Edges point from a source to every computation that read it during its
//!   last execution
//!
//! There is no central adjacency table. Edges live on both ends: the source's
//! subscriber set and the node's dependency list. When a source changes, its
//! subscribers are flagged stale and staged in the open batch frame; the frame
//! is drained effects first, then derivations in topological order.
//!
//! # Design Decisions
//!
//! 1. Edges are rebuilt on every execution, so a computation only depends on
//!    what it actually read last time.
//!
//! 2. Subscriber sets hold weak references. Dropping the last handle of a
//!    memo or effect removes it from the graph without explicit unsubscription.
//!
//! 3. Cycles are tolerated rather than rejected: the topological sort skips
//!    the node that closes a cycle and logs it.

mod batch;
mod node;
mod scheduler;

pub(crate) use batch::BatchCoordinator;
pub use batch::DEFAULT_MAX_DRAIN_PASSES;
pub(crate) use node::Reactive;
pub use node::{ComputationId, Node, NodeKind, NodeState};
pub use scheduler::{Scheduler, Task, TaskQueue};
