//! Transform contexts and the scratch-record pool.
//!
//! Every pipeline event hands its middleware a [`TransformContext`]: the point,
//! the target, the signal's options bag, the previous value on writes, and a
//! scratch map shared by all middleware of that one event. Scratch maps are
//! recycled through a bounded free list so busy signals do not allocate a
//! fresh map per event.

use std::any::Any;
use std::cell::RefCell;
use std::ops::Deref;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Point, Target};

/// Default number of scratch records kept for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 50;

/// Open configuration bag attached to a signal.
///
/// The engine never interprets it; it is forwarded verbatim to middleware.
/// By convention the `"name"` key holds a debug name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Map<String, Value>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying only a debug name.
    pub fn named(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::new().with("name", name)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The debug name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Scratch storage shared by the middleware of a single event.
#[derive(Debug, Default)]
pub struct ContextRecord {
    scratch: RefCell<IndexMap<String, Value>>,
}

impl ContextRecord {
    fn reset(&self) {
        self.scratch.borrow_mut().clear();
    }
}

/// Bounded free list of [`ContextRecord`]s.
#[derive(Debug)]
pub struct ContextPool {
    free: RefCell<Vec<ContextRecord>>,
    capacity: usize,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: RefCell::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a record from the free list, or allocate one if it is empty.
    pub fn acquire(&self) -> PooledRecord<'_> {
        let record = self.free.borrow_mut().pop().unwrap_or_default();
        PooledRecord {
            pool: self,
            record: Some(record),
        }
    }

    fn release(&self, record: ContextRecord) {
        record.reset();
        let mut free = self.free.borrow_mut();
        if free.len() < self.capacity {
            free.push(record);
        }
    }

    /// Number of records waiting for reuse.
    pub fn available(&self) -> usize {
        self.free.borrow().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

/// A record on loan from a [`ContextPool`]; returned when dropped.
pub struct PooledRecord<'a> {
    pool: &'a ContextPool,
    record: Option<ContextRecord>,
}

impl Deref for PooledRecord<'_> {
    type Target = ContextRecord;

    fn deref(&self) -> &ContextRecord {
        self.record
            .as_ref()
            .expect("pooled record is present until dropped")
    }
}

impl Drop for PooledRecord<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.pool.release(record);
        }
    }
}

/// What middleware sees about the event it is transforming.
pub struct TransformContext<'a> {
    pub(crate) point: Point,
    pub(crate) target: Target,
    pub(crate) options: Option<&'a Options>,
    pub(crate) previous: Option<&'a dyn Any>,
    pub(crate) record: &'a ContextRecord,
}

impl<'a> TransformContext<'a> {
    pub fn point(&self) -> Point {
        self.point
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// The options bag of the signal this event is about.
    pub fn options(&self) -> Option<&'a Options> {
        self.options
    }

    /// Shorthand for `options().and_then(Options::name)`.
    pub fn name(&self) -> Option<&'a str> {
        self.options.and_then(Options::name)
    }

    /// The value being replaced. Only present on [`Point::Set`].
    pub fn previous<T: 'static>(&self) -> Option<&'a T> {
        self.previous.and_then(|value| value.downcast_ref::<T>())
    }

    /// Stash a value for middleware later in the chain.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.record.scratch.borrow_mut().insert(key.into(), value.into());
    }

    /// Read a value stashed earlier in the chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.record.scratch.borrow().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_round_trip_through_json() {
        let options = Options::named("count").with("persist", json!({"key": "count"}));
        let text = serde_json::to_string(&options).unwrap();
        let back: Options = serde_json::from_str(&text).unwrap();

        assert_eq!(back, options);
        assert_eq!(back.name(), Some("count"));
        assert_eq!(back.get("persist"), Some(&json!({"key": "count"})));
    }

    #[test]
    fn pool_reuses_records() {
        let pool = ContextPool::new(2);
        assert_eq!(pool.available(), 0);

        {
            let record = pool.acquire();
            record.scratch.borrow_mut().insert("k".into(), json!(1));
        }
        assert_eq!(pool.available(), 1);

        // The recycled record comes back empty
        let record = pool.acquire();
        assert!(record.scratch.borrow().is_empty());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let pool = ContextPool::new(2);
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
            let _c = pool.acquire();
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn context_exposes_previous_and_scratch() {
        let pool = ContextPool::default();
        let record = pool.acquire();
        let options = Options::named("price");
        let previous = 7i32;
        let ctx = TransformContext {
            point: Point::Set,
            target: Target::Batch,
            options: Some(&options),
            previous: Some(&previous),
            record: &record,
        };

        assert_eq!(ctx.previous::<i32>(), Some(&7));
        assert_eq!(ctx.previous::<String>(), None);
        assert_eq!(ctx.name(), Some("price"));

        ctx.insert("seen", true);
        assert_eq!(ctx.get("seen"), Some(json!(true)));
    }
}
