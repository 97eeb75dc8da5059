//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a subscriber.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns exactly one context with a single
//! "active computation" slot. Entering a computation saves the previous
//! occupant of the slot and installs the new one; the returned guard puts the
//! previous one back when dropped, so the slot is restored even if the
//! computation returns an error or panics.
//!
//! Nesting (a memo read from inside an effect) works because each guard
//! restores exactly what it replaced.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::graph::{ComputationId, Node, Reactive};

use super::SubscriberSet;

/// The dependency tracker of a runtime.
pub struct ReactiveContext {
    /// The computation currently executing, if any.
    active: RefCell<Option<Weak<dyn Reactive>>>,
}

/// Guard that restores the previously active computation when dropped.
///
/// Dropping the guard also clears the running flag of the node it was
/// created for.
pub(crate) struct ActiveScope<'a> {
    context: &'a ReactiveContext,
    node: &'a Node,
    previous: Option<Weak<dyn Reactive>>,
}

impl ReactiveContext {
    pub(crate) fn new() -> Self {
        Self {
            active: RefCell::new(None),
        }
    }

    /// Install `this` as the active computation until the guard is dropped.
    pub(crate) fn enter<'a>(&'a self, node: &'a Node, this: Weak<dyn Reactive>) -> ActiveScope<'a> {
        let previous = self.active.replace(Some(this));
        ActiveScope {
            context: self,
            node,
            previous,
        }
    }

    /// Check if there is an active computation.
    pub fn is_active(&self) -> bool {
        self.active.borrow().is_some()
    }

    /// Get the ID of the active computation, if any.
    pub fn current(&self) -> Option<ComputationId> {
        self.active
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|reader| reader.node().id())
    }

    /// Record that the active computation read `source`.
    ///
    /// Called by signals and memos when they are read. No-op outside a
    /// computation.
    pub(crate) fn track(&self, source: &Rc<SubscriberSet>) {
        let Some(weak) = self.active.borrow().clone() else {
            return;
        };
        if let Some(reader) = weak.upgrade() {
            reader.node().link(source, weak);
        }
    }

    /// Run `f` with no active computation, so nothing it reads is tracked.
    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore<'a> {
            context: &'a ReactiveContext,
            previous: Option<Weak<dyn Reactive>>,
        }

        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.context.active.replace(self.previous.take());
            }
        }

        let _restore = Restore {
            context: self,
            previous: self.active.replace(None),
        };
        f()
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        self.context.active.replace(self.previous.take());
        self.node.finish_run();
    }
}
