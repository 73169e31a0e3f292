//! Shared fixtures for stream tests.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::event::{Chunk, Emits, Value};
use crate::stream::{Ack, DATA, ERROR, Options, Writable};
use crate::tasks::EventLoop;

pub(crate) type Log = Rc<RefCell<Vec<String>>>;

/// A writable that acknowledges every chunk at once and records it as text.
pub(crate) fn recording_sink(tasks: &EventLoop, options: Options) -> (Writable, Log) {
    let received: Log = Rc::default();
    let writable = {
        let received = received.clone();
        Writable::with_consumer(tasks, options, move |chunk: Chunk, ack: Ack| {
            received.borrow_mut().push(chunk.to_text());
            ack.ok();
        })
    };
    (writable, received)
}

/// A writable whose acks are completed by the test.
pub(crate) struct ManualSink {
    pub(crate) writable: Writable,
    pub(crate) received: Log,
    pub(crate) acks: Rc<RefCell<VecDeque<Ack>>>,
}

impl ManualSink {
    /// Completes the oldest outstanding ack. Returns `false` if none is pending.
    pub(crate) fn ack_next(&self) -> bool {
        let ack = self.acks.borrow_mut().pop_front();
        match ack {
            Some(ack) => {
                ack.ok();
                true
            }
            None => false,
        }
    }
}

pub(crate) fn manual_sink(tasks: &EventLoop, options: Options) -> ManualSink {
    let received: Log = Rc::default();
    let acks: Rc<RefCell<VecDeque<Ack>>> = Rc::default();
    let writable = {
        let received = received.clone();
        let acks = acks.clone();
        Writable::with_consumer(tasks, options, move |chunk: Chunk, ack: Ack| {
            received.borrow_mut().push(chunk.to_text());
            acks.borrow_mut().push_back(ack);
        })
    };
    ManualSink {
        writable,
        received,
        acks,
    }
}

/// Records `"data"` chunks as text.
///
/// Subscribes on the emitter directly, so a readable does not start flowing.
pub(crate) fn data_of(target: &impl Emits) -> Log {
    let log: Log = Rc::default();
    {
        let log = log.clone();
        target.emitter().on(DATA, move |args: &[Value]| {
            if let Some(chunk) = args.first().and_then(Value::as_chunk) {
                log.borrow_mut().push(chunk.to_text());
            }
            Ok(())
        });
    }
    log
}

/// Records the given events in order: `"data:<text>"`, `"error:<code>"` or the event name.
///
/// Subscribes on the emitter directly, so a readable does not start flowing.
pub(crate) fn events_of(target: &impl Emits, events: &[&str]) -> Log {
    let log: Log = Rc::default();
    for &event in events {
        let log = log.clone();
        let name = event.to_string();
        target.emitter().on(event, move |args: &[Value]| {
            let entry = match (name.as_str(), args.first()) {
                (DATA, Some(Value::Chunk(chunk))) => format!("data:{}", chunk.to_text()),
                (ERROR, Some(Value::Error(error))) => format!("error:{}", error.code()),
                (name, _) => name.to_string(),
            };
            log.borrow_mut().push(entry);
            Ok(())
        });
    }
    log
}
