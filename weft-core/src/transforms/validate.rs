//! Write validation middleware.

use tracing::warn;

use crate::pipeline::{keep, replace, Middleware, Point};

/// Reject writes whose candidate fails `predicate`.
///
/// A rejected candidate is replaced by the previous value, which turns the
/// write into a no-op. Only acts at [`Point::Set`] and only on values of type
/// `T`; anything else passes through.
pub fn validate<T, P>(predicate: P) -> Middleware
where
    T: Clone + 'static,
    P: Fn(&T) -> bool + 'static,
{
    Middleware::new(move |point, value, ctx| {
        if point != Point::Set {
            return keep();
        }
        let Some(candidate) = value.downcast_ref::<T>() else {
            return keep();
        };
        if predicate(candidate) {
            return keep();
        }
        match ctx.previous::<T>() {
            Some(previous) => {
                warn!(subject = ?ctx.target(), name = ctx.name(), "write rejected by validation");
                replace(previous.clone())
            }
            None => keep(),
        }
    })
}
