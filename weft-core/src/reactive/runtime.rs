//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns everything the engine keeps between calls: the tracking
//! slot, the batch frame, the middleware registries, the scratch-record pool,
//! and the optional scheduler.
//!
//! # How It Works
//!
//! 1. Signals, memos, and effects are created from a runtime and keep a
//!    handle to it.
//!
//! 2. When a memo or effect reads a source, the runtime's context records the
//!    edge.
//!
//! 3. When a source changes, the runtime:
//!    a. Opens a batch frame, or reuses the open one
//!    b. Flags every subscriber stale and stages it
//!    c. Drains the frame once the outermost caller returns: effects first,
//!       then memos in dependency order
//!
//! # Ownership
//!
//! A [`Runtime`] is a cheap handle; clones share one engine. Nothing is kept
//! in thread-locals or statics, so independent runtimes never observe each
//! other. Handles are `!Send`.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, ReactiveError};
use crate::graph::{BatchCoordinator, Scheduler, DEFAULT_MAX_DRAIN_PASSES};
use crate::pipeline::{
    ContextPool, Middleware, MiddlewareHandle, Options, Pipeline, Point, Target, DEFAULT_POOL_CAPACITY,
};

use super::context::ReactiveContext;
use super::effect::{Effect, EffectOutput};
use super::equality::{shallow_equals, EqualsFn, ShallowEq};
use super::memo::Memo;
use super::signal::Signal;
use super::subscriber::SubscriberSet;

/// Tunables of a runtime.
///
/// Deserializes from a partial document; missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scratch records kept for reuse by the transform pipeline.
    pub context_pool_capacity: usize,

    /// Drain passes allowed per outermost batch before giving up.
    pub max_drain_passes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            context_pool_capacity: DEFAULT_POOL_CAPACITY,
            max_drain_passes: DEFAULT_MAX_DRAIN_PASSES,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

struct RuntimeInner {
    context: ReactiveContext,
    batch: BatchCoordinator,
    pipeline: Rc<Pipeline>,
    config: RuntimeConfig,
}

/// Handle to a reactive engine.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with `config`.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                context: ReactiveContext::new(),
                batch: BatchCoordinator::new(config.max_drain_passes),
                pipeline: Rc::new(Pipeline::new(config.context_pool_capacity)),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The dependency tracker of this runtime.
    pub fn context(&self) -> &ReactiveContext {
        &self.inner.context
    }

    pub(crate) fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// The scratch-record pool shared by this runtime's middleware.
    pub fn context_pool(&self) -> &ContextPool {
        self.inner.pipeline.pool()
    }

    /// Check whether two handles share one engine.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a signal compared with [`ShallowEq`].
    pub fn signal<T: ShallowEq + 'static>(&self, value: T) -> Signal<T> {
        Signal::new(self, value, Options::new(), shallow_equals::<T>)
    }

    /// Create a signal carrying an options bag for middleware.
    pub fn signal_with<T: ShallowEq + 'static>(&self, value: T, options: Options) -> Signal<T> {
        Signal::new(self, value, options, shallow_equals::<T>)
    }

    /// Create a signal with a custom change test.
    pub fn signal_with_equals<T: 'static>(&self, value: T, options: Options, equals: EqualsFn<T>) -> Signal<T> {
        Signal::new(self, value, options, equals)
    }

    /// Create a memo. It is evaluated once before this returns.
    ///
    /// Failures of other computations triggered by that first evaluation are
    /// logged, not returned. Use [`try_memo`](Self::try_memo) to receive them.
    pub fn memo<T, F>(&self, f: F) -> Memo<T>
    where
        T: ShallowEq + 'static,
        F: Fn() -> T + 'static,
    {
        Memo::new(self, move || Ok(f()), shallow_equals::<T>)
    }

    /// Create a memo whose closure may fail.
    ///
    /// Fails if the first evaluation fails, or if a computation it triggers
    /// fails while the construction batch drains.
    pub fn try_memo<T, E, F>(&self, f: F) -> Result<Memo<T>, ReactiveError>
    where
        T: ShallowEq + 'static,
        E: Into<BoxError>,
        F: Fn() -> Result<T, E> + 'static,
    {
        Memo::try_new(self, move || f().map_err(Into::into), shallow_equals::<T>)
    }

    /// Create a memo with a custom change test.
    pub fn memo_with_equals<T, F>(&self, f: F, equals: EqualsFn<T>) -> Memo<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
    {
        Memo::new(self, move || Ok(f()), equals)
    }

    /// Create an effect. It runs once before this returns.
    ///
    /// The closure may return `()`, a [`Cleanup`](super::Cleanup), an
    /// `Option<Cleanup>`, or a `Result` of any of those.
    pub fn effect<F, O>(&self, f: F) -> Result<Effect, ReactiveError>
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        Effect::new(self, f)
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Run `f` with propagation deferred until it returns.
    ///
    /// Nested calls run inline in the open frame. When `f` fails the frame is
    /// torn down without draining and the error returned; writes `f` already
    /// made are kept.
    pub fn batch<R>(&self, f: impl FnOnce() -> Result<R, ReactiveError>) -> Result<R, ReactiveError> {
        let coordinator = &self.inner.batch;
        if coordinator.is_open() {
            return f();
        }

        let pipeline = &self.inner.pipeline;
        let frame = coordinator.open();
        pipeline.observe(Point::BeforeBatch, Target::Batch, None);

        let result = f().and_then(|value| coordinator.drain().map(|()| value));

        drop(frame);
        pipeline.observe(Point::AfterBatch, Target::Batch, None);
        result
    }

    /// Check whether a batch frame is open.
    pub fn is_batching(&self) -> bool {
        self.inner.batch.is_open()
    }

    /// Stage every subscriber of `source`, draining if no frame was open.
    pub(crate) fn propagate(&self, source: &SubscriberSet) -> Result<(), ReactiveError> {
        if source.is_empty() {
            return Ok(());
        }
        self.batch(|| {
            self.inner.batch.stage(source);
            Ok(())
        })
    }

    /// Run `f` without recording any dependency it reads.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.context.untracked(f)
    }

    /// Check whether a memo or effect is executing.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_active()
    }

    // ------------------------------------------------------------------
    // Extension
    // ------------------------------------------------------------------

    /// Register middleware at `points`, or globally if `points` is empty.
    pub fn register_middleware(
        &self,
        middleware: impl IntoIterator<Item = Middleware>,
        points: &[Point],
    ) -> MiddlewareHandle {
        MiddlewareHandle::register(&self.inner.pipeline, middleware.into_iter().collect(), points)
    }

    /// Number of registered middleware entries across all points.
    pub fn middleware_count(&self) -> usize {
        self.inner.pipeline.len()
    }

    /// Install or remove the scheduler that memo recomputation is deferred to.
    pub fn configure_scheduler(&self, scheduler: Option<Rc<dyn Scheduler>>) {
        self.inner.batch.set_scheduler(scheduler);
    }

    pub fn has_scheduler(&self) -> bool {
        self.inner.batch.has_scheduler()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("batching", &self.is_batching())
            .field("tracking", &self.is_tracking())
            .field("middleware", &self.middleware_count())
            .finish()
    }
}
