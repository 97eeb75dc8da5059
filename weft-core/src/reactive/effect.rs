//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is staged and re-runs when the
//!    batch drains. Effects drain before memos and are never handed to a
//!    scheduler.
//!
//! 3. Before re-running, the effect clears its old dependencies and tracks
//!    new ones during execution.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos can be pulled by a read; effects only run when drained.
//! - Memos cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Effects can optionally return a [`Cleanup`]. It is called before the
//! effect re-runs and when the effect is disposed. This is useful for
//! releasing resources like subscriptions or timers.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, error, warn};

use crate::error::{BoxError, ReactiveError};
use crate::graph::{ComputationId, Node, NodeKind, Reactive};
use crate::pipeline::{Point, Target};

use super::runtime::Runtime;

/// Teardown returned by an effect run.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// What an effect closure may return.
pub trait EffectOutput {
    /// Split the result into a failure or an optional cleanup.
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError>;
}

impl EffectOutput for () {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        Ok(self)
    }
}

impl<O, E> EffectOutput for Result<O, E>
where
    O: EffectOutput,
    E: Into<BoxError>,
{
    fn into_cleanup(self) -> Result<Option<Cleanup>, BoxError> {
        self.map_err(Into::into)?.into_cleanup()
    }
}

type EffectFn = dyn FnMut() -> Result<Option<Cleanup>, BoxError>;

struct EffectInner {
    this: Weak<EffectInner>,
    runtime: Runtime,
    node: Node,
    body: RefCell<Box<EffectFn>>,

    /// Cleanup returned by the last run, waiting for the next run or disposal.
    cleanup: RefCell<Option<Cleanup>>,

    /// Number of times the effect has run.
    run_count: Cell<usize>,
}

impl EffectInner {
    fn target(&self) -> Target {
        Target::Computation {
            id: self.node.id(),
            kind: self.node.kind(),
        }
    }

    fn run_cleanup(&self) {
        let pending = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = pending {
            cleanup.run();
        }
    }

    fn execute(&self) -> Result<(), ReactiveError> {
        let node = &self.node;
        if node.is_running() {
            warn!(computation = %node.id(), "effect re-entered while running");
            return Err(ReactiveError::Reentrant { id: node.id() });
        }
        if node.is_disposed() || !node.is_stale() {
            return Ok(());
        }

        self.run_cleanup();
        // The cleanup may have disposed us
        if node.is_disposed() {
            return Ok(());
        }

        let runtime = &self.runtime;
        let pipeline = runtime.pipeline();
        let target = self.target();

        node.begin_run();
        pipeline.observe(Point::BeforeCompute, target, None);
        pipeline.observe(Point::BeforeEffect, target, None);
        let result = {
            let this: Weak<dyn Reactive> = self.this.clone();
            let _scope = runtime.context().enter(node, this);
            let mut body = self.body.borrow_mut();
            (*body)()
        };
        self.run_count.set(self.run_count.get() + 1);
        pipeline.observe(Point::AfterEffect, target, None);
        pipeline.observe(Point::AfterCompute, target, None);

        match result {
            Ok(Some(cleanup)) if node.is_disposed() => {
                cleanup.run();
                Ok(())
            }
            Ok(cleanup) => {
                self.cleanup.replace(cleanup);
                Ok(())
            }
            Err(source) => {
                node.fail_run();
                error!(computation = %node.id(), error = %source, "effect failed");
                Err(ReactiveError::Computation { id: node.id(), source })
            }
        }
    }

    fn dispose(&self) {
        if !self.node.dispose() {
            return;
        }
        self.run_cleanup();
        debug!(computation = %self.node.id(), runs = self.run_count.get(), "effect disposed");
        self.runtime
            .pipeline()
            .observe(Point::Dispose, self.target(), None);
    }
}

impl Reactive for EffectInner {
    fn node(&self) -> &Node {
        &self.node
    }

    fn run(&self) -> Result<(), ReactiveError> {
        self.execute()
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        if self.node.dispose() {
            self.run_cleanup();
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Dropping the handle disposes the effect.
///
/// # Example
///
/// ```rust
/// use weft_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
///
/// let c = count.clone();
/// let effect = runtime
///     .effect(move || println!("count is {}", c.get()))
///     .unwrap();
///
/// count.set(5).unwrap(); // prints "count is 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it once.
    pub(crate) fn new<F, O>(runtime: &Runtime, mut f: F) -> Result<Self, ReactiveError>
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        let inner = Rc::new_cyclic(|this| EffectInner {
            this: this.clone(),
            runtime: runtime.clone(),
            node: Node::new(NodeKind::Effect),
            body: RefCell::new(Box::new(move || f().into_cleanup())),
            cleanup: RefCell::new(None),
            run_count: Cell::new(0),
        });

        let effect = Self { inner };
        runtime.batch(|| effect.inner.run())?;
        Ok(effect)
    }

    /// Get the effect's computation ID.
    pub fn id(&self) -> ComputationId {
        self.inner.node.id()
    }

    /// Dispose the effect, running its pending cleanup.
    ///
    /// Safe to call from inside the effect itself.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.node.is_disposed()
    }

    /// Check whether the most recent run failed.
    pub fn is_errored(&self) -> bool {
        self.inner.node.is_errored()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of sources read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.node.dependency_count()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("state", &self.inner.node.state())
            .field("run_count", &self.run_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
