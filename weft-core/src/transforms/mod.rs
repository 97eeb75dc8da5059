//! Stock Transforms
//!
//! Ready-made middleware built on the transform pipeline. They are plain
//! [`Middleware`](crate::pipeline::Middleware) values and are registered like
//! any other:
//!
//! ```rust
//! use weft_core::{transforms, Point, Runtime};
//!
//! let runtime = Runtime::new();
//! let _trace = runtime.register_middleware([transforms::logging(tracing::Level::DEBUG)], &[]);
//! let _guard = runtime.register_middleware(
//!     [transforms::validate(|v: &i32| *v >= 0)],
//!     &[Point::Set],
//! );
//!
//! let count = runtime.signal(1);
//! count.set(-5).unwrap();
//! assert_eq!(count.get(), 1);
//! ```

mod logging;
mod validate;

pub use logging::logging;
pub use validate::validate;
