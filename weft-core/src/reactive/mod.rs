//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects.
//! These primitives form the foundation of Weft's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal automatically
//! registers that context as a dependent. When the signal's value changes, all
//! dependents are staged for re-execution.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only notifies its own readers when the
//! new result differs from the cached one.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems.
//!
//! # Implementation Notes
//!
//! Every primitive is created from a [`Runtime`], which owns the tracking
//! context. When a signal is read, we check whether the runtime has an active
//! computation and, if so, record the dependency on both ends.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod context;
mod effect;
mod equality;
mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use context::ReactiveContext;
pub use effect::{Cleanup, Effect, EffectOutput};
pub use equality::{shallow_equals, EqualsFn, ShallowEq};
pub use memo::Memo;
pub use runtime::{Runtime, RuntimeConfig};
pub use signal::Signal;
pub use subscriber::{SourceId, SubscriberSet};
