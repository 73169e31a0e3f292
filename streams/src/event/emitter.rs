//! Named-event registry with synchronous, ordered dispatch.
//!
//! This module provides [`Emitter`], the observer registry every stream embeds.
//! Handlers are registered per event name and invoked in registration order when the
//! name is emitted.
//!
//! # Dispatch Model
//!
//! [`emit()`](Emitter::emit) snapshots the handler list for the event before invoking
//! anything:
//! - Handlers added during the dispatch are not called until the next `emit`.
//! - Handlers removed during the dispatch still run in the current pass.
//! - `once` handlers are unregistered right before they run and never fire twice, even
//!   when a handler re-enters `emit` for the same event.
//!
//! A handler returning `Err` stops the dispatch and the error is returned to the caller.
//!
//! # The `"error"` Event
//!
//! Emitting `"error"` with no handler attached is treated as a fatal programming error and
//! panics. Attach an `"error"` handler to anything that can fail.
//!
//! # Example
//!
//! ```rust,ignore
//! let emitter = Emitter::new();
//!
//! let sub = emitter.on("tick", |args| {
//!     println!("tick {}", args[0]);
//!     Ok(())
//! });
//!
//! assert_eq!(emitter.emit("tick", &[Value::from(1)]), Ok(true));
//! emitter.off(&sub);
//! assert_eq!(emitter.emit("tick", &[]), Ok(false));
//! ```

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fmt,
    rc::Rc,
};

use crate::error::HandlerError;
use crate::event::Value;

/// Result returned by event handlers.
pub type HandlerResult = Result<(), HandlerError>;

type Callback = dyn Fn(&[Value]) -> HandlerResult;

/// Reserved event name for failures.
pub const ERROR: &str = "error";

/// Listener count per event above which a leak warning is logged.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// Handle identifying one registration. Pass it to [`Emitter::off`] to unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: Rc<str>,
    id: u64,
}

impl Subscription {
    /// The event name this subscription is registered for.
    #[inline]
    pub fn event(&self) -> &str {
        &self.event
    }
}

struct Entry {
    id: u64,
    once: bool,
    fired: Cell<bool>,
    callback: Rc<Callback>,
}

struct Registry {
    handlers: HashMap<Rc<str>, Vec<Rc<Entry>>>,
    next_id: u64,
    max_listeners: usize,
    warned: HashSet<Rc<str>>,
}

/// Registry of named-event handlers.
///
/// All methods take `&self`; the registry uses interior mutability so handlers can
/// subscribe, unsubscribe and emit while a dispatch is running.
pub struct Emitter {
    registry: RefCell<Registry>,
}

impl Emitter {
    /// Creates an emitter with no handlers.
    pub fn new() -> Self {
        Self {
            registry: RefCell::new(Registry {
                handlers: HashMap::new(),
                next_id: 0,
                max_listeners: DEFAULT_MAX_LISTENERS,
                warned: HashSet::new(),
            }),
        }
    }

    /// Registers `callback` for `event`.
    ///
    /// Registering the same callback twice keeps both registrations; both fire.
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) -> HandlerResult + 'static,
    {
        self.register(event, Rc::new(callback), false, false)
    }

    /// Registers `callback` for the next `event` only.
    pub fn once<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) -> HandlerResult + 'static,
    {
        self.register(event, Rc::new(callback), true, false)
    }

    /// Registers `callback` ahead of every handler already registered for `event`.
    pub fn prepend<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) -> HandlerResult + 'static,
    {
        self.register(event, Rc::new(callback), false, true)
    }

    fn register(
        &self,
        event: &str,
        callback: Rc<Callback>,
        once: bool,
        prepend: bool,
    ) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;

        let key: Rc<str> = match registry.handlers.get_key_value(event) {
            Some((key, _)) => key.clone(),
            None => Rc::from(event),
        };
        let entry = Rc::new(Entry {
            id,
            once,
            fired: Cell::new(false),
            callback,
        });

        let max = registry.max_listeners;
        let entries = registry.handlers.entry(key.clone()).or_default();
        if prepend {
            entries.insert(0, entry);
        } else {
            entries.push(entry);
        }

        let count = entries.len();
        if max > 0 && count > max && !registry.warned.contains(&key) {
            log::warn!(
                "possible listener leak: {count} '{key}' listeners added, max is {max}"
            );
            registry.warned.insert(key.clone());
        }

        Subscription { event: key, id }
    }

    /// Removes a registration.
    ///
    /// Returns `false` if the subscription was already removed. Safe to call from inside a
    /// handler; a handler removed mid-dispatch still runs in the current pass.
    pub fn off(&self, subscription: &Subscription) -> bool {
        self.remove_entry(&subscription.event, subscription.id)
    }

    fn remove_entry(&self, event: &str, id: u64) -> bool {
        let mut registry = self.registry.borrow_mut();
        let Some(entries) = registry.handlers.get_mut(event) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        entries.remove(pos);
        if entries.is_empty() {
            registry.handlers.remove(event);
        }
        true
    }

    /// Removes every handler for `event`, or every handler at all when `event` is `None`.
    pub fn remove_all(&self, event: Option<&str>) {
        let mut registry = self.registry.borrow_mut();
        match event {
            Some(event) => {
                registry.handlers.remove(event);
            }
            None => registry.handlers.clear(),
        }
    }

    /// Number of handlers registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.registry
            .borrow()
            .handlers
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Returns `true` if at least one handler is registered for `event`.
    #[inline]
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    /// Names of the events that currently have handlers, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .borrow()
            .handlers
            .keys()
            .map(|name| name.to_string())
            .collect();
        names.sort();
        names
    }

    /// Sets the per-event handler count above which a leak warning is logged. `0` disables
    /// the warning.
    pub fn set_max_listeners(&self, max: usize) {
        self.registry.borrow_mut().max_listeners = max;
    }

    /// Invokes every handler registered for `event`, in order, with `args`.
    ///
    /// Returns `Ok(true)` if at least one handler was registered.
    ///
    /// # Errors
    ///
    /// Returns the first [`HandlerError`] produced by a handler. Handlers after the failing
    /// one are not invoked.
    ///
    /// # Panics
    ///
    /// Panics if `event` is `"error"` and no handler is registered for it.
    pub fn emit(&self, event: &str, args: &[Value]) -> Result<bool, HandlerError> {
        let snapshot: Vec<Rc<Entry>> = self
            .registry
            .borrow()
            .handlers
            .get(event)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            if event == ERROR {
                let detail = args
                    .first()
                    .map_or_else(|| String::from("unspecified error"), Value::to_string);
                log::error!("unhandled 'error' event: {detail}");
                panic!("Unhandled 'error' event: {detail}");
            }
            return Ok(false);
        }

        for entry in &snapshot {
            if entry.once {
                if entry.fired.replace(true) {
                    continue;
                }
                self.remove_entry(event, entry.id);
            }
            (entry.callback)(args)?;
        }
        Ok(true)
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.borrow();
        let mut map = f.debug_map();
        for (name, entries) in &registry.handlers {
            map.entry(name, &entries.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    // ==================== Registration ====================

    #[test]
    fn new_creates_empty_emitter() {
        let emitter = Emitter::new();

        assert_eq!(emitter.listener_count("tick"), 0);
        assert!(emitter.event_names().is_empty());
    }

    #[test]
    fn emit_without_handlers_returns_false() {
        let emitter = Emitter::new();

        assert_eq!(emitter.emit("tick", &[]), Ok(false));
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        // Given
        let emitter = Emitter::new();
        let log = recorder();
        for name in ["first", "second", "third"] {
            let log = log.clone();
            emitter.on("tick", move |_| {
                log.borrow_mut().push(name.to_string());
                Ok(())
            });
        }

        // When
        let handled = emitter.emit("tick", &[]);

        // Then
        assert_eq!(handled, Ok(true));
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_registrations_both_fire() {
        let emitter = Emitter::new();
        let count = Rc::new(Cell::new(0));
        let handler = {
            let count = count.clone();
            move |_: &[Value]| {
                count.set(count.get() + 1);
                Ok(())
            }
        };

        emitter.on("tick", handler.clone());
        emitter.on("tick", handler);
        emitter.emit("tick", &[]).unwrap();

        assert_eq!(count.get(), 2);
        assert_eq!(emitter.listener_count("tick"), 2);
    }

    #[test]
    fn handlers_receive_arguments() {
        let emitter = Emitter::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            emitter.on("sum", move |args| {
                seen.borrow_mut().extend(args.iter().filter_map(Value::as_int));
                Ok(())
            });
        }

        emitter.emit("sum", &[1.into(), 2.into()]).unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn prepend_runs_before_existing_handlers() {
        let emitter = Emitter::new();
        let log = recorder();
        {
            let log = log.clone();
            emitter.on("tick", move |_| {
                log.borrow_mut().push("on".into());
                Ok(())
            });
        }
        {
            let log = log.clone();
            emitter.prepend("tick", move |_| {
                log.borrow_mut().push("prepend".into());
                Ok(())
            });
        }

        emitter.emit("tick", &[]).unwrap();

        assert_eq!(*log.borrow(), vec!["prepend", "on"]);
    }

    // ==================== Once ====================

    #[test]
    fn once_fires_exactly_one_time() {
        let emitter = Emitter::new();
        let count = Rc::new(Cell::new(0));
        {
            let count = count.clone();
            emitter.once("tick", move |_| {
                count.set(count.get() + 1);
                Ok(())
            });
        }

        emitter.emit("tick", &[]).unwrap();
        emitter.emit("tick", &[]).unwrap();
        emitter.emit("tick", &[]).unwrap();

        assert_eq!(count.get(), 1);
        assert_eq!(emitter.listener_count("tick"), 0);
    }

    #[test]
    fn once_is_removed_before_it_runs() {
        let emitter = Rc::new(Emitter::new());
        let observed = Rc::new(Cell::new(usize::MAX));
        {
            let observed = observed.clone();
            let weak = Rc::downgrade(&emitter);
            emitter.once("tick", move |_| {
                if let Some(emitter) = weak.upgrade() {
                    observed.set(emitter.listener_count("tick"));
                }
                Ok(())
            });
        }

        emitter.emit("tick", &[]).unwrap();

        assert_eq!(observed.get(), 0);
    }

    #[test]
    fn once_does_not_fire_twice_on_reentrant_emit() {
        // Given - a regular handler that re-emits the event once, followed by a once handler
        let emitter = Rc::new(Emitter::new());
        let count = Rc::new(Cell::new(0));
        let depth = Rc::new(Cell::new(0));
        {
            let weak = Rc::downgrade(&emitter);
            let depth = depth.clone();
            emitter.on("tick", move |_| {
                if depth.get() == 0 {
                    depth.set(1);
                    if let Some(emitter) = weak.upgrade() {
                        emitter.emit("tick", &[])?;
                    }
                }
                Ok(())
            });
        }
        {
            let count = count.clone();
            emitter.once("tick", move |_| {
                count.set(count.get() + 1);
                Ok(())
            });
        }

        // When
        emitter.emit("tick", &[]).unwrap();

        // Then
        assert_eq!(count.get(), 1);
    }

    // ==================== Off ====================

    #[test]
    fn off_removes_registration() {
        let emitter = Emitter::new();
        let sub = emitter.on("tick", |_| Ok(()));

        assert!(emitter.off(&sub));
        assert_eq!(emitter.emit("tick", &[]), Ok(false));
    }

    #[test]
    fn off_twice_is_noop() {
        let emitter = Emitter::new();
        let sub = emitter.on("tick", |_| Ok(()));

        assert!(emitter.off(&sub));
        assert!(!emitter.off(&sub));
    }

    #[test]
    fn self_removal_during_emit_does_not_skip_others() {
        // Given
        let emitter = Rc::new(Emitter::new());
        let log = recorder();
        let own: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        {
            let log = log.clone();
            emitter.on("tick", move |_| {
                log.borrow_mut().push("a".into());
                Ok(())
            });
        }
        {
            let log = log.clone();
            let slot = own.clone();
            let weak = Rc::downgrade(&emitter);
            let sub = emitter.on("tick", move |_| {
                log.borrow_mut().push("b".into());
                if let (Some(emitter), Some(sub)) = (weak.upgrade(), slot.borrow().as_ref()) {
                    emitter.off(sub);
                }
                Ok(())
            });
            *own.borrow_mut() = Some(sub);
        }
        {
            let log = log.clone();
            emitter.on("tick", move |_| {
                log.borrow_mut().push("c".into());
                Ok(())
            });
        }

        // When
        emitter.emit("tick", &[]).unwrap();
        emitter.emit("tick", &[]).unwrap();

        // Then
        assert_eq!(*log.borrow(), vec!["a", "b", "c", "a", "c"]);
    }

    #[test]
    fn removal_of_later_handler_during_dispatch_keeps_snapshot() {
        let emitter = Rc::new(Emitter::new());
        let log = recorder();
        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        {
            let later = later.clone();
            let weak = Rc::downgrade(&emitter);
            emitter.on("tick", move |_| {
                if let (Some(emitter), Some(sub)) = (weak.upgrade(), later.borrow().as_ref()) {
                    emitter.off(sub);
                }
                Ok(())
            });
        }
        {
            let log = log.clone();
            let sub = emitter.on("tick", move |_| {
                log.borrow_mut().push("later".into());
                Ok(())
            });
            *later.borrow_mut() = Some(sub);
        }

        emitter.emit("tick", &[]).unwrap();
        emitter.emit("tick", &[]).unwrap();

        assert_eq!(*log.borrow(), vec!["later"]);
    }

    #[test]
    fn handlers_added_during_emit_wait_for_next_emit() {
        let emitter = Rc::new(Emitter::new());
        let count = Rc::new(Cell::new(0));
        {
            let weak = Rc::downgrade(&emitter);
            let count = count.clone();
            emitter.once("tick", move |_| {
                if let Some(emitter) = weak.upgrade() {
                    let count = count.clone();
                    emitter.on("tick", move |_| {
                        count.set(count.get() + 1);
                        Ok(())
                    });
                }
                Ok(())
            });
        }

        emitter.emit("tick", &[]).unwrap();
        assert_eq!(count.get(), 0);

        emitter.emit("tick", &[]).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn remove_all_for_one_event() {
        let emitter = Emitter::new();
        emitter.on("a", |_| Ok(()));
        emitter.on("a", |_| Ok(()));
        emitter.on("b", |_| Ok(()));

        emitter.remove_all(Some("a"));

        assert_eq!(emitter.event_names(), vec!["b"]);

        emitter.remove_all(None);
        assert!(emitter.event_names().is_empty());
    }

    // ==================== Failures ====================

    #[test]
    fn handler_error_aborts_remaining_handlers() {
        // Given
        let emitter = Emitter::new();
        let log = recorder();
        emitter.on("tick", |_| Err(HandlerError::new("observer broke")));
        {
            let log = log.clone();
            emitter.on("tick", move |_| {
                log.borrow_mut().push("after".into());
                Ok(())
            });
        }

        // When
        let result = emitter.emit("tick", &[]);

        // Then
        assert_eq!(result, Err(HandlerError::new("observer broke")));
        assert!(log.borrow().is_empty());
    }

    #[test]
    #[should_panic(expected = "Unhandled 'error' event")]
    fn unhandled_error_event_is_fatal() {
        let emitter = Emitter::new();

        let _ = emitter.emit(ERROR, &[Value::from("boom")]);
    }

    #[test]
    fn handled_error_event_returns_true() {
        let emitter = Emitter::new();
        emitter.on(ERROR, |_| Ok(()));

        assert_eq!(emitter.emit(ERROR, &[Value::from("boom")]), Ok(true));
    }

    #[test]
    fn exceeding_max_listeners_still_registers() {
        let emitter = Emitter::new();
        emitter.set_max_listeners(2);

        for _ in 0..5 {
            emitter.on("tick", |_| Ok(()));
        }

        assert_eq!(emitter.listener_count("tick"), 5);
    }
}
