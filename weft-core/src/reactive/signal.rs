//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a memo or effect, the signal registers
//!    that computation as a subscriber.
//!
//! 2. When a write changes the value (as decided by the signal's equality
//!    function), every subscriber is flagged stale and staged.
//!
//! 3. Staged computations re-run when the outermost batch drains.
//!
//! Reads and writes pass through the transform pipeline at
//! [`Point::Get`], [`Point::Peek`], and [`Point::Set`]. The initial value
//! passes through [`Point::Init`].

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use tracing::debug;

use crate::error::ReactiveError;
use crate::pipeline::{Options, Point, Target};

use super::equality::EqualsFn;
use super::runtime::Runtime;
use super::subscriber::{SourceId, SubscriberSet};

struct SignalInner<T> {
    runtime: Runtime,

    value: RefCell<T>,

    /// Computations that read this signal during their last execution.
    subscribers: Rc<SubscriberSet>,

    /// Forwarded verbatim to middleware.
    options: Options,

    equals: EqualsFn<T>,

    disposed: Cell<bool>,
}

/// A reactive signal holding a value of type T.
///
/// Clones share the same value and subscribers.
///
/// # Example
///
/// ```rust
/// use weft_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
///
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    pub(crate) fn new(runtime: &Runtime, value: T, options: Options, equals: EqualsFn<T>) -> Self {
        let subscribers = Rc::new(SubscriberSet::new(None));
        let target = Target::Signal(subscribers.id());
        let value = runtime
            .pipeline()
            .transform(Point::Init, value, target, Some(&options), None);

        Self {
            inner: Rc::new(SignalInner {
                runtime: runtime.clone(),
                value: RefCell::new(value),
                subscribers,
                options,
                equals,
                disposed: Cell::new(false),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.subscribers.id()
    }

    /// The options bag given at creation.
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Check whether two handles refer to the same signal.
    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn target(&self) -> Target {
        Target::Signal(self.id())
    }

    /// Borrow the stored value without tracking or middleware.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.borrow())
    }

    /// Set a new value and propagate it to subscribers.
    ///
    /// Writes equal to the current value do nothing. Errors raised by
    /// computations that re-ran because of this write are returned here;
    /// the write itself is kept.
    pub fn set(&self, value: T) -> Result<(), ReactiveError>
    where
        T: Clone,
    {
        let inner = &*self.inner;
        let pipeline = inner.runtime.pipeline();

        let next = if pipeline.is_active(Point::Set) {
            let previous = inner.value.borrow().clone();
            pipeline.transform(
                Point::Set,
                value,
                self.target(),
                Some(&inner.options),
                Some(&previous as &dyn Any),
            )
        } else {
            value
        };

        if (inner.equals)(&*inner.value.borrow(), &next) {
            return Ok(());
        }
        inner.value.replace(next);

        if inner.disposed.get() {
            return Ok(());
        }
        inner.runtime.propagate(&inner.subscribers)
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReactiveError>
    where
        T: Clone,
    {
        let next = f(&*self.inner.value.borrow());
        self.set(next)
    }

    /// Detach every subscriber and stop tracking.
    ///
    /// Reads and writes keep working afterwards but reach nobody.
    pub fn dispose(&self) {
        let inner = &*self.inner;
        if inner.disposed.replace(true) {
            return;
        }
        inner.subscribers.clear();
        debug!(signal = ?self.id(), name = inner.options.name(), "signal disposed");
        inner
            .runtime
            .pipeline()
            .observe(Point::Dispose, self.target(), Some(&inner.options));
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a memo or effect, this also registers that
    /// computation as a subscriber.
    pub fn get(&self) -> T {
        let inner = &*self.inner;
        if !inner.disposed.get() {
            inner.runtime.context().track(&inner.subscribers);
        }
        let value = inner.value.borrow().clone();
        inner
            .runtime
            .pipeline()
            .transform(Point::Get, value, self.target(), Some(&inner.options), None)
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self) -> T {
        let inner = &*self.inner;
        let value = inner.value.borrow().clone();
        inner
            .runtime
            .pipeline()
            .transform(Point::Peek, value, self.target(), Some(&inner.options), None)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
