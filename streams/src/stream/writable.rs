//! The write side of a stream.
//!
//! Chunks are handed to a [`Consumer`] one at a time. The next chunk is only handed over
//! after the previous one was acknowledged through its [`Ack`]; everything written in the
//! meantime waits in the buffer.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Weak,
};

use crate::error::StreamError;
use crate::event::Chunk;
use crate::stream::{DRAIN, FINISH, Inner, Options, State, Stream};
use crate::tasks::LoopHandle;

/// Accepts chunks from a write side.
pub trait Consumer {
    /// Handles one chunk. Complete `ack` when the chunk is fully written, now or later.
    fn write(&mut self, chunk: Chunk, ack: Ack);

    /// Called once after the last chunk was acknowledged following `end()`.
    fn finish(&mut self, ack: Ack) {
        ack.ok();
    }

    /// Called once when the stream is destroyed.
    fn destroy(&mut self, _error: Option<&StreamError>) {}
}

impl<F> Consumer for F
where
    F: FnMut(Chunk, Ack),
{
    fn write(&mut self, chunk: Chunk, ack: Ack) {
        self(chunk, ack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    Write,
    Finish,
}

/// Completion token for a single write or finish request.
///
/// Consuming `self` guarantees that each request is completed at most once. Completing a
/// token after its stream was dropped does nothing.
pub struct Ack {
    stream: Weak<Inner>,
    kind: AckKind,
}

impl Ack {
    fn new(stream: &Stream, kind: AckKind) -> Self {
        Self {
            stream: stream.downgrade(),
            kind,
        }
    }

    /// The request succeeded.
    pub fn ok(self) {
        self.complete(Ok(()));
    }

    /// The request failed. The stream is destroyed with `error`.
    pub fn fail(self, error: StreamError) {
        self.complete(Err(error));
    }

    pub fn complete(self, result: Result<(), StreamError>) {
        let Some(stream) = Stream::upgrade(&self.stream) else {
            log::trace!("ack completed after its stream was dropped");
            return;
        };
        match self.kind {
            AckKind::Write => stream.on_write(result),
            AckKind::Finish => stream.on_finish(result),
        }
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ack").field("kind", &self.kind).finish()
    }
}

/// A stream that only consumes data.
#[derive(Clone)]
pub struct Writable {
    pub(crate) stream: Stream,
}

impl Writable {
    /// Creates a writable that accepts and discards every chunk.
    pub fn new(tasks: impl Into<LoopHandle>, options: Options) -> Self {
        Self {
            stream: Stream::new(tasks.into(), options, false, true),
        }
    }

    /// Creates a writable that hands chunks to `consumer`.
    pub fn with_consumer<C>(tasks: impl Into<LoopHandle>, options: Options, consumer: C) -> Self
    where
        C: Consumer + 'static,
    {
        let writable = Self::new(tasks, options);
        writable.stream.set_consumer(Box::new(consumer));
        writable
    }

    /// The write side of a duplex or transform.
    pub(crate) fn view(stream: Stream) -> Self {
        Self { stream }
    }
}

pub(crate) struct WriteState {
    buffer: VecDeque<Chunk>,
    /// Buffered size plus the chunk in flight.
    length: usize,
    high_water_mark: usize,
    object_mode: bool,
    /// A chunk is with the consumer.
    writing: bool,
    /// The consumer is running on the stack right now.
    sync: bool,
    in_flight: usize,
    need_drain: bool,
    ending: bool,
    finishing: bool,
    finished: bool,
}

impl WriteState {
    #[inline]
    fn size_of(&self, chunk: &Chunk) -> usize {
        if self.object_mode { 1 } else { chunk.len() }
    }
}

pub(crate) struct WriteSide {
    state: RefCell<WriteState>,
    consumer: RefCell<Option<Box<dyn Consumer>>>,
    has_consumer: Cell<bool>,
}

impl WriteSide {
    pub(crate) fn new(options: &Options) -> Self {
        Self {
            state: RefCell::new(WriteState {
                buffer: VecDeque::new(),
                length: 0,
                high_water_mark: options.high_water_mark(),
                object_mode: options.object_mode(),
                writing: false,
                sync: false,
                in_flight: 0,
                need_drain: false,
                ending: false,
                finishing: false,
                finished: false,
            }),
            consumer: RefCell::new(None),
            has_consumer: Cell::new(false),
        }
    }

    pub(crate) fn state(&self) -> State {
        if self.state.borrow().ending {
            State::Ended
        } else {
            State::Idle
        }
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.state.borrow().finished
    }

    /// Drops buffered chunks and the consumer.
    pub(crate) fn release(&self, error: Option<&StreamError>) {
        {
            let mut state = self.state.borrow_mut();
            state.buffer.clear();
            state.length = 0;
            state.need_drain = false;
        }
        let consumer = self.consumer.borrow_mut().take();
        if let Some(mut consumer) = consumer {
            consumer.destroy(error);
        }
    }
}

impl Stream {
    #[inline]
    fn write_side(&self) -> Option<&WriteSide> {
        self.inner.write.as_ref()
    }

    pub(crate) fn set_consumer(&self, consumer: Box<dyn Consumer>) {
        if let Some(side) = self.write_side() {
            *side.consumer.borrow_mut() = Some(consumer);
            side.has_consumer.set(true);
        }
    }

    pub(crate) fn write(&self, chunk: Chunk) -> bool {
        let Some(side) = self.write_side() else {
            log::warn!("write() on a stream without a write side");
            return false;
        };
        if self.is_destroyed() {
            self.report(StreamError::Destroyed);
            return false;
        }

        let accepted = {
            let mut state = side.state.borrow_mut();
            if state.ending {
                None
            } else {
                let size = state.size_of(&chunk);
                state.length += size;
                let below = state.length < state.high_water_mark;
                if !below {
                    state.need_drain = true;
                }
                if state.writing || !state.buffer.is_empty() {
                    state.buffer.push_back(chunk);
                    Some((below, None))
                } else {
                    state.writing = true;
                    state.in_flight = size;
                    Some((below, Some(chunk)))
                }
            }
        };

        let Some((below, start)) = accepted else {
            self.report(StreamError::WriteAfterEnd);
            return false;
        };
        if let Some(chunk) = start {
            self.start_write(chunk);
        }
        below && !self.is_destroyed()
    }

    fn start_write(&self, chunk: Chunk) {
        let Some(side) = self.write_side() else {
            return;
        };
        log::trace!("writing chunk of {}", chunk.len());
        side.state.borrow_mut().sync = true;
        let taken = side.consumer.borrow_mut().take();
        match taken {
            Some(mut consumer) => {
                consumer.write(chunk, Ack::new(self, AckKind::Write));
                self.restore_consumer(consumer);
            }
            None => Ack::new(self, AckKind::Write).ok(),
        }
        side.state.borrow_mut().sync = false;
    }

    fn restore_consumer(&self, mut consumer: Box<dyn Consumer>) {
        let Some(side) = self.write_side() else {
            return;
        };
        if self.is_destroyed() {
            consumer.destroy(self.errored().as_ref());
        } else {
            *side.consumer.borrow_mut() = Some(consumer);
        }
    }

    pub(crate) fn on_write(&self, result: Result<(), StreamError>) {
        let Some(side) = self.write_side() else {
            return;
        };
        if self.is_destroyed() {
            return;
        }
        if let Err(error) = result {
            log::debug!("write failed: {error}");
            self.destroy(Some(error));
            return;
        }

        let sync = {
            let mut state = side.state.borrow_mut();
            state.length -= state.in_flight;
            state.in_flight = 0;
            state.sync
        };
        if sync {
            // Acknowledged inside write(): continue on the next turn.
            let stream = self.clone();
            self.tasks().defer(move || stream.after_write());
        } else {
            self.after_write();
        }
    }

    fn after_write(&self) {
        let Some(side) = self.write_side() else {
            return;
        };
        if self.is_destroyed() {
            return;
        }
        let (next, drain) = {
            let mut state = side.state.borrow_mut();
            match state.buffer.pop_front() {
                Some(chunk) => {
                    state.in_flight = state.size_of(&chunk);
                    (Some(chunk), false)
                }
                None => {
                    state.writing = false;
                    let drain = state.need_drain && state.length == 0 && !state.ending;
                    if drain {
                        state.need_drain = false;
                    }
                    (None, drain)
                }
            }
        };

        match next {
            Some(chunk) => self.start_write(chunk),
            None => {
                if drain {
                    log::trace!("write side drained");
                    self.dispatch(DRAIN, &[]);
                }
                self.maybe_finish();
            }
        }
    }

    pub(crate) fn end(&self, chunk: Option<Chunk>) {
        let Some(side) = self.write_side() else {
            return;
        };
        if let Some(chunk) = chunk {
            self.write(chunk);
        }
        if self.is_destroyed() {
            return;
        }
        {
            let mut state = side.state.borrow_mut();
            if state.ending {
                return;
            }
            state.ending = true;
        }
        log::debug!("write side ending");
        self.maybe_finish();
    }

    fn maybe_finish(&self) {
        let Some(side) = self.write_side() else {
            return;
        };
        if self.is_destroyed() {
            return;
        }
        {
            let mut state = side.state.borrow_mut();
            let ready = state.ending
                && !state.writing
                && state.buffer.is_empty()
                && !state.finishing
                && !state.finished;
            if !ready {
                return;
            }
            state.finishing = true;
            state.sync = true;
        }

        let taken = side.consumer.borrow_mut().take();
        match taken {
            Some(mut consumer) => {
                consumer.finish(Ack::new(self, AckKind::Finish));
                self.restore_consumer(consumer);
            }
            None => Ack::new(self, AckKind::Finish).ok(),
        }
        side.state.borrow_mut().sync = false;
    }

    pub(crate) fn on_finish(&self, result: Result<(), StreamError>) {
        let Some(side) = self.write_side() else {
            return;
        };
        if self.is_destroyed() {
            return;
        }
        if let Err(error) = result {
            log::debug!("finish failed: {error}");
            self.destroy(Some(error));
            return;
        }
        if side.state.borrow().sync {
            let stream = self.clone();
            self.tasks().defer(move || stream.on_finish(Ok(())));
            return;
        }

        {
            let mut state = side.state.borrow_mut();
            state.finishing = false;
            state.finished = true;
        }
        log::debug!("write side finished");
        self.dispatch(FINISH, &[]);
        if self.is_destroyed() {
            return;
        }
        if self.is_readable() && !self.options().allow_half_open() {
            self.push(None);
        }
        self.maybe_auto_destroy();
    }

    pub(crate) fn writable_state(&self) -> State {
        if let Some(state) = self.terminal_state() {
            return state;
        }
        self.write_side().map_or(State::Idle, WriteSide::state)
    }

    pub(crate) fn writable_length(&self) -> usize {
        self.write_side()
            .map_or(0, |side| side.state.borrow().length)
    }

    pub(crate) fn needs_drain(&self) -> bool {
        self.write_side()
            .is_some_and(|side| side.state.borrow().need_drain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Emits;
    use crate::stream::{AsStream, CLOSE, ERROR, Sink, testing};
    use crate::tasks::EventLoop;

    // ==================== Writing ====================

    #[test]
    fn chunks_reach_consumer_in_order() {
        // Given
        let tasks = EventLoop::new();
        let (sink, received) = testing::recording_sink(&tasks, Options::default());

        // When
        assert!(sink.write(Chunk::from("a")));
        assert!(sink.write(Chunk::from("b")));
        assert!(sink.write(Chunk::from("c")));

        // Then - the first chunk is handed over at once, the rest after each ack
        assert_eq!(*received.borrow(), vec!["a"]);
        tasks.run();
        assert_eq!(*received.borrow(), vec!["a", "b", "c"]);
        assert_eq!(sink.writable_length(), 0);
    }

    #[test]
    fn write_reports_backpressure_at_high_water_mark() {
        let tasks = EventLoop::new();
        let sink = testing::manual_sink(&tasks, Options::new().with_high_water_mark(4));

        assert!(sink.writable.write(Chunk::from("ab")));
        assert!(!sink.writable.write(Chunk::from("cd")));
        assert_eq!(sink.writable.writable_length(), 4);
        assert!(sink.writable.needs_drain());
    }

    #[test]
    fn drain_follows_backpressure_once_flushed() {
        // Given
        let tasks = EventLoop::new();
        let sink = testing::manual_sink(&tasks, Options::new().with_high_water_mark(2));
        let events = testing::events_of(&sink.writable, &[DRAIN]);
        assert!(!sink.writable.write(Chunk::from("ab")));
        assert!(!sink.writable.write(Chunk::from("c")));

        // When
        assert!(sink.ack_next());

        // Then - "c" is still in flight
        assert!(events.borrow().is_empty());
        assert_eq!(*sink.received.borrow(), vec!["ab", "c"]);

        // When
        assert!(sink.ack_next());

        // Then
        assert_eq!(*events.borrow(), vec!["drain"]);
        assert!(!sink.writable.needs_drain());
    }

    #[test]
    fn no_drain_without_backpressure() {
        let tasks = EventLoop::new();
        let sink = testing::manual_sink(&tasks, Options::default());
        let events = testing::events_of(&sink.writable, &[DRAIN]);

        sink.writable.write(Chunk::from("a"));
        sink.ack_next();

        assert!(events.borrow().is_empty());
    }

    #[test]
    fn object_mode_counts_chunks() {
        let tasks = EventLoop::new();
        let sink = testing::manual_sink(
            &tasks,
            Options::new().with_object_mode(true).with_high_water_mark(2),
        );

        assert!(sink.writable.write(Chunk::object(1)));
        assert!(!sink.writable.write(Chunk::object(2)));
        assert_eq!(sink.writable.writable_length(), 2);
    }

    #[test]
    fn writable_without_consumer_discards() {
        let tasks = EventLoop::new();
        let sink = Writable::new(&tasks, Options::default());
        let events = testing::events_of(&sink, &[FINISH]);

        sink.write(Chunk::from("a"));
        sink.end(Some(Chunk::from("b")));
        tasks.run();

        assert_eq!(*events.borrow(), vec!["finish"]);
    }

    // ==================== Ending ====================

    #[test]
    fn finish_waits_for_pending_writes() {
        // Given
        let tasks = EventLoop::new();
        let sink = testing::manual_sink(&tasks, Options::default());
        let events = testing::events_of(&sink.writable, &[FINISH]);
        sink.writable.write(Chunk::from("a"));
        sink.writable.write(Chunk::from("b"));

        // When
        sink.writable.end(None);
        tasks.run();

        // Then
        assert!(events.borrow().is_empty());
        assert_eq!(sink.writable.writable_state(), State::Ended);

        // When
        sink.ack_next();
        sink.ack_next();
        tasks.run();

        // Then
        assert_eq!(*events.borrow(), vec!["finish"]);
    }

    #[test]
    fn end_with_chunk_writes_it_first() {
        let tasks = EventLoop::new();
        let (sink, received) = testing::recording_sink(&tasks, Options::default());
        let events = testing::events_of(&sink, &[FINISH]);

        sink.write(Chunk::from("a"));
        sink.end(Some(Chunk::from("z")));
        tasks.run();

        assert_eq!(*received.borrow(), vec!["a", "z"]);
        assert_eq!(*events.borrow(), vec!["finish"]);
    }

    #[test]
    fn second_end_is_ignored() {
        let tasks = EventLoop::new();
        let (sink, _) = testing::recording_sink(&tasks, Options::default());
        let events = testing::events_of(&sink, &[FINISH, ERROR]);

        sink.end(None);
        sink.end(None);
        tasks.run();

        assert_eq!(*events.borrow(), vec!["finish"]);
    }

    #[test]
    fn write_after_end_reports_error() {
        // Given
        let tasks = EventLoop::new();
        let (sink, received) = testing::recording_sink(&tasks, Options::default());
        let events = testing::events_of(&sink, &[ERROR]);
        sink.end(None);

        // When
        let accepted = sink.write(Chunk::from("x"));

        // Then
        assert!(!accepted);
        assert_eq!(*events.borrow(), vec!["error:ERR_STREAM_WRITE_AFTER_END"]);
        assert_eq!(sink.state(), State::Ended);
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn consumer_finish_hook_runs_before_finish_event() {
        // Given
        struct Flushing {
            log: std::rc::Rc<RefCell<Vec<String>>>,
        }
        impl Consumer for Flushing {
            fn write(&mut self, chunk: Chunk, ack: Ack) {
                self.log.borrow_mut().push(chunk.to_text());
                ack.ok();
            }
            fn finish(&mut self, ack: Ack) {
                self.log.borrow_mut().push("flush".into());
                ack.ok();
            }
        }
        let tasks = EventLoop::new();
        let log = std::rc::Rc::new(RefCell::new(Vec::new()));
        let sink = Writable::with_consumer(
            &tasks,
            Options::default(),
            Flushing { log: log.clone() },
        );
        {
            let log = log.clone();
            sink.on(FINISH, move |_| {
                log.borrow_mut().push("finish".into());
                Ok(())
            });
        }

        // When
        sink.end(Some(Chunk::from("a")));
        tasks.run();

        // Then
        assert_eq!(*log.borrow(), vec!["a", "flush", "finish"]);
    }

    #[test]
    fn auto_destroy_closes_after_finish() {
        let tasks = EventLoop::new();
        let sink = Writable::new(&tasks, Options::new().with_auto_destroy(true));
        let events = testing::events_of(&sink, &[FINISH, CLOSE]);

        sink.end(None);
        tasks.run();

        assert_eq!(*events.borrow(), vec!["finish", "close"]);
        assert!(sink.is_destroyed());
    }

    // ==================== Failure ====================

    #[test]
    fn failed_ack_destroys_stream() {
        // Given
        let tasks = EventLoop::new();
        let sink = Writable::with_consumer(
            &tasks,
            Options::default(),
            |_chunk: Chunk, ack: Ack| ack.fail(StreamError::Io("disk full".into())),
        );
        let events = testing::events_of(&sink, &[ERROR, CLOSE]);

        // When
        sink.write(Chunk::from("a"));

        // Then
        assert_eq!(*events.borrow(), vec!["error:ERR_STREAM_IO", "close"]);
        assert_eq!(sink.state(), State::Errored);
        assert_eq!(sink.errored(), Some(StreamError::Io("disk full".into())));
    }

    #[test]
    fn write_after_destroy_reports_destroyed() {
        let tasks = EventLoop::new();
        let (sink, received) = testing::recording_sink(&tasks, Options::default());
        let events = testing::events_of(&sink, &[ERROR]);
        sink.destroy(None);

        assert!(!sink.write(Chunk::from("a")));

        assert_eq!(*events.borrow(), vec!["error:ERR_STREAM_DESTROYED"]);
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn destroy_is_idempotent() {
        // Given
        let tasks = EventLoop::new();
        let sink = Writable::new(&tasks, Options::default());
        let events = testing::events_of(&sink, &[ERROR, CLOSE]);

        // When
        sink.destroy(Some(StreamError::Io("first".into())));
        sink.destroy(Some(StreamError::Io("second".into())));

        // Then
        assert_eq!(*events.borrow(), vec!["error:ERR_STREAM_IO", "close"]);
        assert_eq!(sink.errored(), Some(StreamError::Io("first".into())));
    }

    #[test]
    fn ack_after_stream_dropped_is_ignored() {
        let tasks = EventLoop::new();
        let sink = testing::manual_sink(&tasks, Options::default());
        sink.writable.write(Chunk::from("a"));
        let ack = sink.acks.borrow_mut().pop_front();
        let testing::ManualSink { writable, .. } = sink;
        drop(writable);

        // Should not panic
        if let Some(ack) = ack {
            ack.ok();
        }
    }
}
