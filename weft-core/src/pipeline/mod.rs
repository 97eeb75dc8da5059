//! Transform Pipeline
//!
//! Middleware hooks into the engine at named [`Point`]s. At each point the
//! flowing value is handed to every registered middleware in turn; each one
//! may observe it or replace it.
//!
//! # Ordering
//!
//! Middleware registered for the specific point runs first, in registration
//! order, followed by global middleware, also in registration order.
//!
//! # Failure Isolation
//!
//! Middleware can never abort the reactive operation it is attached to. An
//! `Err` result, a panic, or a replacement of the wrong type is logged and
//! treated as "no replacement".
//!
//! # Fast Path
//!
//! When nothing is registered for a point, running it costs one emptiness
//! check: no snapshot, no pooled record, no allocation.

mod context;
mod point;

pub use context::{ContextPool, ContextRecord, Options, PooledRecord, TransformContext, DEFAULT_POOL_CAPACITY};
pub use point::{Point, Target, UnknownPoint};

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::warn;

use crate::error::BoxError;

/// What a middleware returns: `Ok(None)` keeps the current value,
/// `Ok(Some(v))` replaces it.
pub type MiddlewareResult = Result<Option<Box<dyn Any>>, BoxError>;

type MiddlewareFn = dyn Fn(Point, &dyn Any, &TransformContext<'_>) -> MiddlewareResult;

/// Keep the current value.
pub fn keep() -> MiddlewareResult {
    Ok(None)
}

/// Replace the current value with `value`.
pub fn replace<T: 'static>(value: T) -> MiddlewareResult {
    Ok(Some(Box::new(value)))
}

/// A transform function.
///
/// Cloning shares the function; unregistering removes every registration of
/// the same function instance.
#[derive(Clone)]
pub struct Middleware(Rc<MiddlewareFn>);

impl Middleware {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Point, &dyn Any, &TransformContext<'_>) -> MiddlewareResult + 'static,
    {
        Self(Rc::new(f))
    }

    fn same(&self, other: &Middleware) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Call the middleware, turning errors and panics into "no replacement".
    fn invoke(&self, point: Point, value: &dyn Any, ctx: &TransformContext<'_>) -> Option<Box<dyn Any>> {
        match catch_unwind(AssertUnwindSafe(|| (self.0)(point, value, ctx))) {
            Ok(Ok(replacement)) => replacement,
            Ok(Err(error)) => {
                warn!(%point, %error, "middleware failed; value left unchanged");
                None
            }
            Err(_) => {
                warn!(%point, "middleware panicked; value left unchanged");
                None
            }
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// What one `register` call added, so it can be removed exactly.
#[derive(Debug)]
struct Registration {
    middleware: Vec<Middleware>,
    /// Empty means global.
    points: SmallVec<[Point; 4]>,
}

/// The middleware registries of a runtime.
pub(crate) struct Pipeline {
    scoped: RefCell<IndexMap<Point, Vec<Middleware>>>,
    global: RefCell<Vec<Middleware>>,
    pool: ContextPool,
}

impl Pipeline {
    pub(crate) fn new(pool_capacity: usize) -> Self {
        Self {
            scoped: RefCell::new(IndexMap::new()),
            global: RefCell::new(Vec::new()),
            pool: ContextPool::new(pool_capacity),
        }
    }

    /// Check whether anything would run at `point`.
    pub(crate) fn is_active(&self, point: Point) -> bool {
        !self.global.borrow().is_empty() || self.scoped.borrow().contains_key(&point)
    }

    /// Total number of registered middleware entries.
    pub(crate) fn len(&self) -> usize {
        self.global.borrow().len() + self.scoped.borrow().values().map(Vec::len).sum::<usize>()
    }

    pub(crate) fn pool(&self) -> &ContextPool {
        &self.pool
    }

    fn register(&self, middleware: Vec<Middleware>, points: &[Point]) -> Registration {
        if points.is_empty() {
            self.global.borrow_mut().extend(middleware.iter().cloned());
        } else {
            let mut scoped = self.scoped.borrow_mut();
            for point in points {
                scoped
                    .entry(*point)
                    .or_default()
                    .extend(middleware.iter().cloned());
            }
        }
        Registration {
            middleware,
            points: points.iter().copied().collect(),
        }
    }

    fn unregister(&self, registration: &Registration) {
        let registered = |m: &Middleware| registration.middleware.iter().any(|r| r.same(m));

        if registration.points.is_empty() {
            self.global.borrow_mut().retain(|m| !registered(m));
            return;
        }

        let mut scoped = self.scoped.borrow_mut();
        for point in &registration.points {
            if let Some(list) = scoped.get_mut(point) {
                list.retain(|m| !registered(m));
                if list.is_empty() {
                    scoped.shift_remove(point);
                }
            }
        }
    }

    /// Snapshot the chain for `point` so middleware may (un)register freely
    /// while it runs.
    fn chain(&self, point: Point) -> SmallVec<[Middleware; 4]> {
        let mut chain = SmallVec::new();
        if let Some(list) = self.scoped.borrow().get(&point) {
            chain.extend(list.iter().cloned());
        }
        chain.extend(self.global.borrow().iter().cloned());
        chain
    }

    /// Run `value` through every middleware registered for `point`.
    pub(crate) fn transform<T: 'static>(
        &self,
        point: Point,
        value: T,
        target: Target,
        options: Option<&Options>,
        previous: Option<&dyn Any>,
    ) -> T {
        if !self.is_active(point) {
            return value;
        }

        let chain = self.chain(point);
        let record = self.pool.acquire();
        let ctx = TransformContext {
            point,
            target,
            options,
            previous,
            record: &record,
        };

        let mut current = value;
        for middleware in &chain {
            let Some(replacement) = middleware.invoke(point, &current, &ctx) else {
                continue;
            };
            match replacement.downcast::<T>() {
                Ok(replacement) => current = *replacement,
                Err(_) => warn!(
                    %point,
                    expected = std::any::type_name::<T>(),
                    "middleware replacement has the wrong type; ignored"
                ),
            }
        }
        current
    }

    /// Run an observe-only point.
    pub(crate) fn observe(&self, point: Point, target: Target, options: Option<&Options>) {
        self.transform(point, (), target, options, None);
    }
}

/// Handle returned by [`Runtime::register_middleware`](crate::Runtime::register_middleware).
///
/// Dropping the handle leaves the middleware registered.
pub struct MiddlewareHandle {
    pipeline: Weak<Pipeline>,
    registration: RefCell<Option<Registration>>,
}

impl MiddlewareHandle {
    pub(crate) fn register(pipeline: &Rc<Pipeline>, middleware: Vec<Middleware>, points: &[Point]) -> Self {
        let registration = pipeline.register(middleware, points);
        Self {
            pipeline: Rc::downgrade(pipeline),
            registration: RefCell::new(Some(registration)),
        }
    }

    /// Remove exactly the middleware this handle registered. Idempotent.
    pub fn unregister(&self) {
        let Some(registration) = self.registration.borrow_mut().take() else {
            return;
        };
        if let Some(pipeline) = self.pipeline.upgrade() {
            pipeline.unregister(&registration);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration.borrow().is_some()
    }
}

impl fmt::Debug for MiddlewareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareHandle")
            .field("registered", &self.is_registered())
            .finish()
    }
}
