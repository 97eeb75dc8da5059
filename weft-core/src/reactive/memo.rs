//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. The memo runs its computation once when it is created and caches the
//!    result, recording every source the computation read.
//!
//! 2. When one of those sources changes, the memo is flagged stale and staged
//!    in the batch frame. The drain recomputes it in dependency order.
//!
//! 3. A read of a stale memo (for example one whose recomputation was handed
//!    to a scheduler and has not run yet) recomputes it on the spot.
//!
//! 4. If the recomputed value differs from the cached one, the memo's own
//!    readers are staged exactly as if a signal had been written. An equal
//!    value stops propagation here.
//!
//! # Errors
//!
//! A failing computation keeps the previous cached value and flags the node
//! errored. [`Memo::try_get`] reports the failure; [`Memo::get`] logs it and
//! returns the cached value.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::{debug, error, warn};

use crate::error::{BoxError, ReactiveError};
use crate::graph::{ComputationId, Node, NodeKind, Reactive};
use crate::pipeline::{Point, Target};

use super::equality::EqualsFn;
use super::runtime::Runtime;
use super::subscriber::SubscriberSet;

type ComputeFn<T> = dyn Fn() -> Result<T, BoxError>;

pub(crate) struct MemoInner<T: 'static> {
    this: Weak<MemoInner<T>>,
    runtime: Runtime,
    node: Node,
    compute: Box<ComputeFn<T>>,

    /// The cached value. `None` only until the first successful run.
    value: RefCell<Option<T>>,

    /// Computations that read this memo. Owned by this memo's node, so the
    /// batch coordinator can order readers after it.
    output: Rc<SubscriberSet>,

    equals: EqualsFn<T>,
}

impl<T: 'static> MemoInner<T> {
    fn target(&self) -> Target {
        Target::Computation {
            id: self.node.id(),
            kind: self.node.kind(),
        }
    }

    /// Recompute if stale.
    fn execute(&self) -> Result<(), ReactiveError> {
        let node = &self.node;
        if node.is_running() {
            warn!(computation = %node.id(), "memo re-entered while running");
            return Err(ReactiveError::Reentrant { id: node.id() });
        }
        if node.is_disposed() || !node.is_stale() {
            return Ok(());
        }

        let runtime = &self.runtime;
        let pipeline = runtime.pipeline();
        let target = self.target();

        node.begin_run();
        pipeline.observe(Point::BeforeCompute, target, None);
        let result = {
            let this: Weak<dyn Reactive> = self.this.clone();
            let _scope = runtime.context().enter(node, this);
            (self.compute)().map(|value| pipeline.transform(Point::Compute, value, target, None, None))
        };

        let value = match result {
            Ok(value) => value,
            Err(source) => {
                node.fail_run();
                error!(computation = %node.id(), error = %source, "memo computation failed");
                pipeline.observe(Point::AfterCompute, target, None);
                return Err(ReactiveError::Computation { id: node.id(), source });
            }
        };

        let changed = match &*self.value.borrow() {
            Some(cached) => !(self.equals)(cached, &value),
            None => true,
        };
        let first_run = self.value.borrow().is_none();
        if changed {
            self.value.replace(Some(value));
        }
        pipeline.observe(Point::AfterCompute, target, None);

        if changed && !first_run && !node.is_disposed() {
            runtime.propagate(&self.output)?;
        }
        Ok(())
    }

    fn dispose(&self) {
        if !self.node.dispose() {
            return;
        }
        self.output.clear();
        debug!(computation = %self.node.id(), "memo disposed");
        self.runtime
            .pipeline()
            .observe(Point::Dispose, self.target(), None);
    }
}

impl<T: 'static> Reactive for MemoInner<T> {
    fn node(&self) -> &Node {
        &self.node
    }

    fn run(&self) -> Result<(), ReactiveError> {
        self.execute()
    }

    fn output(&self) -> Option<&SubscriberSet> {
        Some(&self.output)
    }
}

impl<T: 'static> Drop for MemoInner<T> {
    fn drop(&mut self) {
        self.node.dispose();
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Clones share the same computation. Dropping the last clone disposes it.
/// There is no setter.
pub struct Memo<T: 'static> {
    inner: Rc<MemoInner<T>>,
}

impl<T: 'static> Memo<T> {
    fn create<F>(runtime: &Runtime, compute: F, equals: EqualsFn<T>) -> Self
    where
        F: Fn() -> Result<T, BoxError> + 'static,
    {
        let inner = Rc::new_cyclic(|this| {
            let node = Node::new(NodeKind::Derivation);
            let output = Rc::new(SubscriberSet::new(Some(node.id())));
            MemoInner {
                this: this.clone(),
                runtime: runtime.clone(),
                node,
                compute: Box::new(compute),
                value: RefCell::new(None),
                output,
                equals,
            }
        });
        Self { inner }
    }

    /// Create a memo from an infallible computation and evaluate it.
    pub(crate) fn new<F>(runtime: &Runtime, compute: F, equals: EqualsFn<T>) -> Self
    where
        F: Fn() -> Result<T, BoxError> + 'static,
    {
        let memo = Self::create(runtime, compute, equals);
        // Only failures of other computations can surface here. The memo
        // holds its value either way.
        if let Err(err) = runtime.batch(|| memo.inner.run()) {
            warn!(computation = %memo.id(), error = %err, "memo created despite drain failure");
        }
        memo
    }

    /// Create a memo and evaluate it, failing if the evaluation fails.
    pub(crate) fn try_new<F>(runtime: &Runtime, compute: F, equals: EqualsFn<T>) -> Result<Self, ReactiveError>
    where
        F: Fn() -> Result<T, BoxError> + 'static,
    {
        let memo = Self::create(runtime, compute, equals);
        runtime.batch(|| memo.inner.run())?;
        Ok(memo)
    }

    /// Get the memo's computation ID.
    pub fn id(&self) -> ComputationId {
        self.inner.node.id()
    }

    pub fn is_stale(&self) -> bool {
        self.inner.node.is_stale()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.node.is_disposed()
    }

    /// Check whether the most recent computation failed.
    pub fn is_errored(&self) -> bool {
        self.inner.node.is_errored()
    }

    /// Get the number of sources read during the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.node.dependency_count()
    }

    /// Get the number of computations reading this memo.
    pub fn subscriber_count(&self) -> usize {
        self.inner.output.len()
    }

    /// Detach the memo from the graph. It keeps returning its last value.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check whether two handles refer to the same memo.
    pub fn ptr_eq(&self, other: &Memo<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Register the active computation as a reader, unless it is this memo.
    fn track(&self) {
        if !self.inner.node.is_running() {
            self.inner.runtime.context().track(&self.inner.output);
        }
    }

    fn cached(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Get the current value, recomputing first if stale.
    ///
    /// If called within a memo or effect, this also registers that
    /// computation as a reader.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.inner.execute()?;
        self.track();
        self.cached()
            .ok_or(ReactiveError::Reentrant { id: self.id() })
    }

    /// Get the current value, recomputing first if stale.
    ///
    /// A failed recomputation is logged and the last cached value returned.
    ///
    /// # Panics
    ///
    /// Panics if the memo reads itself during its first computation.
    pub fn get(&self) -> T {
        if let Err(err) = self.inner.execute() {
            debug!(computation = %self.id(), error = %err, "memo read fell back to cached value");
        }
        self.track();
        self.cached()
            .expect("memo has a value after its first computation")
    }

    /// Like [`get`](Self::get) but never registers a reader.
    pub fn peek(&self) -> T {
        self.inner.runtime.untrack(|| self.get())
    }

    /// Turn the memo into a plain callable.
    pub fn into_fn(self) -> impl Fn() -> T {
        move || self.get()
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Memo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("state", &self.inner.node.state())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::pipeline::{keep, replace, Middleware};

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        (count.clone(), count)
    }

    #[test]
    fn memo_computes_on_creation() {
        let runtime = Runtime::new();
        let (calls, c) = counter();

        let memo = runtime.memo(move || {
            c.set(c.get() + 1);
            42
        });

        assert_eq!(calls.get(), 1);
        assert_eq!(memo.get(), 42);
        assert!(!memo.is_stale());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let runtime = Runtime::new();
        let (calls, c) = counter();
        let memo = runtime.memo(move || {
            c.set(c.get() + 1);
            42
        });

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.peek(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn memo_follows_its_sources() {
        let runtime = Runtime::new();
        let a = runtime.signal(2);
        let b = runtime.signal(3);

        let (x, y) = (a.clone(), b.clone());
        let sum = runtime.memo(move || x.get() + y.get());
        assert_eq!(sum.get(), 5);
        assert_eq!(sum.dependency_count(), 2);

        a.set(5).unwrap();
        assert_eq!(sum.get(), 8);
    }

    #[test]
    fn memo_clone_shares_state() {
        let runtime = Runtime::new();
        let memo1 = runtime.memo(|| 42);
        let memo2 = memo1.clone();

        assert_eq!(memo1.id(), memo2.id());
        assert!(memo1.ptr_eq(&memo2));
        assert_eq!(memo2.get(), 42);
    }

    #[test]
    fn unchanged_result_stops_propagation() {
        let runtime = Runtime::new();
        let n = runtime.signal(2);
        let (runs, r) = counter();

        let src = n.clone();
        let parity = runtime.memo(move || src.get() % 2);
        let p = parity.clone();
        let _effect = runtime
            .effect(move || {
                p.get();
                r.set(r.get() + 1);
            })
            .unwrap();
        assert_eq!(runs.get(), 1);

        n.set(4).unwrap();
        assert_eq!(parity.get(), 0);
        assert_eq!(runs.get(), 1);

        n.set(5).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn try_memo_reports_failures() {
        let runtime = Runtime::new();
        let input = runtime.signal(1);

        let src = input.clone();
        let memo = runtime
            .try_memo(move || match src.get() {
                v if v < 0 => Err("negative input"),
                v => Ok(v * 10),
            })
            .unwrap();
        assert_eq!(memo.get(), 10);

        let err = input.set(-1).unwrap_err();
        assert!(matches!(err, ReactiveError::Computation { id, .. } if id == memo.id()));
        assert!(memo.is_errored());

        // The cached value survives the failure
        assert_eq!(memo.get(), 10);

        input.set(2).unwrap();
        assert_eq!(memo.try_get().unwrap(), 20);
        assert!(!memo.is_errored());
    }

    #[test]
    fn try_memo_fails_on_first_run() {
        let runtime = Runtime::new();
        let result = runtime.try_memo(|| Err::<i32, _>("no value yet"));
        assert!(matches!(result, Err(ReactiveError::Computation { .. })));
    }

    #[test]
    fn disposed_memo_keeps_last_value() {
        let runtime = Runtime::new();
        let input = runtime.signal(1);
        let (calls, c) = counter();

        let src = input.clone();
        let memo = runtime.memo(move || {
            c.set(c.get() + 1);
            src.get() * 2
        });

        memo.dispose();
        memo.dispose();
        assert!(memo.is_disposed());
        assert_eq!(input.subscriber_count(), 0);

        input.set(10).unwrap();
        assert_eq!(memo.get(), 2);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn dropping_last_handle_detaches() {
        let runtime = Runtime::new();
        let input = runtime.signal(1);

        let src = input.clone();
        let memo = runtime.memo(move || src.get());
        assert_eq!(input.subscriber_count(), 1);

        drop(memo);
        assert_eq!(input.subscriber_count(), 0);
        input.set(2).unwrap();
    }

    #[test]
    fn compute_middleware_replaces_result() {
        let runtime = Runtime::new();
        let _handle = runtime.register_middleware(
            [Middleware::new(|_, value, _| match value.downcast_ref::<i32>() {
                Some(v) => replace(v.abs()),
                None => keep(),
            })],
            &[Point::Compute],
        );

        let memo = runtime.memo(|| -7);
        assert_eq!(memo.get(), 7);
    }

    #[test]
    fn compute_middleware_reads_are_tracked_by_the_memo() {
        let runtime = Runtime::new();
        let base = runtime.signal(1);
        let extra = runtime.signal(0);

        let ex = extra.clone();
        let _handle = runtime.register_middleware(
            [Middleware::new(move |_, _, _| {
                ex.get();
                keep()
            })],
            &[Point::Compute],
        );

        let b = base.clone();
        let memo = runtime.memo(move || b.get() * 10);
        assert_eq!(memo.dependency_count(), 2);

        let (b, m) = (base.clone(), memo.clone());
        let effect = runtime
            .effect(move || {
                b.get();
                m.get();
            })
            .unwrap();

        // The effect runs first and pulls the memo inside its own run
        base.set(2).unwrap();
        assert_eq!(memo.get(), 20);
        assert_eq!(memo.dependency_count(), 2);
        assert_eq!(effect.dependency_count(), 2);
        assert_eq!(extra.subscriber_count(), 1);
    }

    #[test]
    fn construction_drain_failures_reach_try_memo_only() {
        let runtime = Runtime::new();
        let flag = runtime.signal(0);

        let f = flag.clone();
        let failing = runtime
            .effect(move || -> Result<(), &'static str> {
                if f.get() > 0 {
                    return Err("flag raised");
                }
                Ok(())
            })
            .unwrap();

        let w = flag.clone();
        let memo = runtime.memo(move || {
            w.set(1).ok();
            5
        });
        assert_eq!(memo.get(), 5);
        assert!(failing.is_errored());

        let w = flag.clone();
        let err = runtime.try_memo(move || w.set(2).map(|()| 6)).unwrap_err();
        assert_eq!(err.computation(), Some(failing.id()));
    }

    #[test]
    fn into_fn_is_callable() {
        let runtime = Runtime::new();
        let input = runtime.signal(3);
        let src = input.clone();
        let square = runtime.memo(move || src.get() * src.get()).into_fn();

        assert_eq!(square(), 9);
        input.set(4).unwrap();
        assert_eq!(square(), 16);
    }
}
