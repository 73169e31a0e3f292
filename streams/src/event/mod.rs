pub mod emitter;
pub mod value;

pub use emitter::{DEFAULT_MAX_LISTENERS, ERROR, Emitter, HandlerResult, Subscription};
pub use value::{Chunk, Value};

use crate::error::HandlerError;

/// Capability to emit and observe named events.
///
/// Types gain notification support by embedding an [`Emitter`] and returning it from
/// [`emitter()`](Self::emitter); every other method delegates to it.
///
/// Implementors may override [`listener_added()`](Self::listener_added) to react to new
/// subscriptions. Streams use it to start flowing when a `"data"` handler is attached.
pub trait Emits {
    /// The embedded registry.
    fn emitter(&self) -> &Emitter;

    /// Called after a handler was registered through this trait.
    fn listener_added(&self, _event: &str) {}

    fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) -> HandlerResult + 'static,
        Self: Sized,
    {
        let subscription = self.emitter().on(event, callback);
        self.listener_added(event);
        subscription
    }

    fn once<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) -> HandlerResult + 'static,
        Self: Sized,
    {
        let subscription = self.emitter().once(event, callback);
        self.listener_added(event);
        subscription
    }

    fn prepend<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) -> HandlerResult + 'static,
        Self: Sized,
    {
        let subscription = self.emitter().prepend(event, callback);
        self.listener_added(event);
        subscription
    }

    fn off(&self, subscription: &Subscription) -> bool {
        self.emitter().off(subscription)
    }

    fn emit(&self, event: &str, args: &[Value]) -> Result<bool, HandlerError> {
        self.emitter().emit(event, args)
    }

    fn listener_count(&self, event: &str) -> usize {
        self.emitter().listener_count(event)
    }
}

impl Emits for Emitter {
    fn emitter(&self) -> &Emitter {
        self
    }
}
