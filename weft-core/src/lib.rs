//! Weft Core
//!
//! This crate provides a fine-grained reactive engine. It implements:
//!
//! - Reactive primitives (signals, memos, effects) with automatic dependency
//!   tracking
//! - Batched, glitch-free propagation with topological ordering of memos
//! - A transform pipeline that lets middleware observe or rewrite values at
//!   named points
//! - An injectable scheduler for deferring memo recomputation
//!
//! The engine is single-threaded. All of its state lives in a [`Runtime`];
//! independent runtimes never see each other.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Computation nodes, batch coordination, and scheduling
//! - `pipeline`: Transform points, middleware, and pooled contexts
//! - `transforms`: Stock middleware
//! - `error`: Errors surfaced to callers
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use weft_core::Runtime;
//!
//! let runtime = Runtime::new();
//!
//! // Create a signal
//! let count = runtime.signal(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = runtime.memo(move || c.get() * 2);
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let (c, d, l) = (count.clone(), doubled.clone(), log.clone());
//! let _effect = runtime
//!     .effect(move || l.borrow_mut().push((c.get(), d.get())))
//!     .unwrap();
//!
//! // Update the signal
//! count.set(5).unwrap();
//! assert_eq!(*log.borrow(), vec![(0, 0), (5, 10)]);
//! ```

pub mod error;
pub mod graph;
pub mod pipeline;
pub mod reactive;
pub mod transforms;

pub use error::{BoxError, ReactiveError};
pub use graph::{ComputationId, NodeKind, Scheduler, Task, TaskQueue};
pub use pipeline::{keep, replace, Middleware, MiddlewareHandle, MiddlewareResult, Options, Point, Target, TransformContext};
pub use reactive::{Cleanup, Effect, EffectOutput, Memo, Runtime, RuntimeConfig, ShallowEq, Signal, SourceId};
