//! Event logging middleware.

use tracing::Level;

use crate::pipeline::{keep, Middleware};

/// Emit one `tracing` event per pipeline event at `level`.
///
/// Observes only; values are never replaced. Register it globally to see
/// every point, or at selected points.
pub fn logging(level: Level) -> Middleware {
    Middleware::new(move |point, _, ctx| {
        let subject = ctx.target();
        let name = ctx.name();
        macro_rules! emit {
            ($event:ident) => {
                tracing::$event!(%point, ?subject, name, "reactive event")
            };
        }
        if level == Level::TRACE {
            emit!(trace);
        } else if level == Level::DEBUG {
            emit!(debug);
        } else if level == Level::INFO {
            emit!(info);
        } else if level == Level::WARN {
            emit!(warn);
        } else {
            emit!(error);
        }
        keep()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Point, Runtime};

    #[test]
    fn logging_never_changes_values() {
        let runtime = Runtime::new();
        let _handle = runtime.register_middleware([logging(Level::TRACE)], &[]);

        let count = runtime.signal(1);
        let c = count.clone();
        let doubled = runtime.memo(move || c.get() * 2);

        count.set(4).unwrap();
        assert_eq!(doubled.get(), 8);
        assert_eq!(count.peek(), 4);
    }

    #[test]
    fn logging_can_be_scoped() {
        let runtime = Runtime::new();
        let handle = runtime.register_middleware([logging(Level::INFO)], &[Point::Set, Point::Dispose]);
        assert_eq!(runtime.middleware_count(), 2);

        handle.unregister();
        assert_eq!(runtime.middleware_count(), 0);
    }
}
