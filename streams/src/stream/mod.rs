//! Composable streams built on the [`Emitter`].
//!
//! Every stream is a [`Stream`] handle with a read side, a write side, or both. The public
//! variants wrap a handle and expose the matching capability traits:
//!
//! | Variant       | [`Source`] | [`Sink`] |
//! |---------------|:----------:|:--------:|
//! | [`Readable`]  | yes        |          |
//! | [`Writable`]  |            | yes      |
//! | [`Duplex`]    | yes        | yes      |
//! | [`Transform`] | yes        | yes      |
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Flowing <-> Paused -> Ended -> Destroyed
//!   \________\__________\________\-> Errored
//! ```
//!
//! `destroy(None)` leads to `Destroyed` and `destroy(Some(error))` to `Errored`. Both are
//! terminal.
//!
//! [`destroy()`](AsStream::destroy) is the only cancellation primitive. It is immediate and
//! idempotent: buffers are dropped, every pipe touching the stream is removed, the producer
//! and consumer hooks are released, then `"error"` (when given) and `"close"` are emitted.
//!
//! # Errors
//!
//! Stream faults are never returned from methods. They are emitted as `"error"` with a
//! [`Value::Error`] payload, so attach an `"error"` handler to any stream that can fail:
//! emitting `"error"` without one panics.

mod duplex;
mod options;
mod pipe;
mod pipeline;
mod readable;
mod transform;
mod writable;

#[cfg(test)]
pub(crate) mod testing;

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use crate::error::StreamError;
use crate::event::{Chunk, Emits, Emitter, Value};
use crate::tasks::LoopHandle;

pub use crate::event::ERROR;
pub use duplex::Duplex;
pub use options::{DEFAULT_HIGH_WATER_MARK, DEFAULT_OBJECT_HIGH_WATER_MARK, Options};
pub use pipe::PipeOptions;
pub use pipeline::{finished, pipeline};
pub use readable::{Producer, Readable};
pub use transform::{Transform, Transformer};
pub use writable::{Ack, Consumer, Writable};

use readable::ReadSide;
use writable::WriteSide;

pub const DATA: &str = "data";
pub const END: &str = "end";
pub const READABLE: &str = "readable";
pub const PAUSE: &str = "pause";
pub const RESUME: &str = "resume";
pub const DRAIN: &str = "drain";
pub const FINISH: &str = "finish";
pub const CLOSE: &str = "close";
pub const PIPE: &str = "pipe";
pub const UNPIPE: &str = "unpipe";

/// Observable state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, not yet flowing or paused.
    Idle,
    /// Emitting `"data"` as chunks arrive.
    Flowing,
    /// Buffering until resumed or read.
    Paused,
    /// `"end"` was emitted (read side) or `end()` was called (write side).
    Ended,
    /// Destroyed with an error. Terminal.
    Errored,
    /// Terminal.
    Destroyed,
}

#[derive(Default)]
struct Lifecycle {
    destroyed: bool,
    errored: Option<StreamError>,
}

pub(crate) struct Inner {
    emitter: Emitter,
    tasks: LoopHandle,
    options: Options,
    read: Option<ReadSide>,
    write: Option<WriteSide>,
    life: RefCell<Lifecycle>,
}

/// Type-erased handle to any stream variant.
///
/// Cloning is cheap and yields another handle to the same stream.
#[derive(Clone)]
pub struct Stream {
    inner: Rc<Inner>,
}

impl Stream {
    pub(crate) fn new(tasks: LoopHandle, options: Options, readable: bool, writable: bool) -> Self {
        Self {
            inner: Rc::new(Inner {
                emitter: Emitter::new(),
                tasks,
                read: readable.then(|| ReadSide::new(&options)),
                write: writable.then(|| WriteSide::new(&options)),
                options,
                life: RefCell::new(Lifecycle::default()),
            }),
        }
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Rc::downgrade(&self.inner)
    }

    #[inline]
    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Stream> {
        weak.upgrade().map(|inner| Stream { inner })
    }

    #[inline]
    pub(crate) fn is(&self, weak: &Weak<Inner>) -> bool {
        std::ptr::eq(Rc::as_ptr(&self.inner), weak.as_ptr())
    }

    #[inline]
    pub(crate) fn tasks(&self) -> &LoopHandle {
        &self.inner.tasks
    }

    #[inline]
    pub(crate) fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Returns `true` if both handles refer to the same stream.
    #[inline]
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` if the stream has a read side.
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.inner.read.is_some()
    }

    /// Returns `true` if the stream has a write side.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.inner.write.is_some()
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.inner.life.borrow().destroyed
    }

    /// The error the stream was destroyed with, if any.
    pub fn errored(&self) -> Option<StreamError> {
        self.inner.life.borrow().errored.clone()
    }

    /// Overall state: the read side's state when there is one, otherwise the write side's.
    pub fn state(&self) -> State {
        if let Some(state) = self.terminal_state() {
            return state;
        }
        match (&self.inner.read, &self.inner.write) {
            (Some(read), _) => read.state(),
            (None, Some(write)) => write.state(),
            (None, None) => State::Idle,
        }
    }

    pub(crate) fn terminal_state(&self) -> Option<State> {
        let life = self.inner.life.borrow();
        if life.errored.is_some() {
            Some(State::Errored)
        } else if life.destroyed {
            Some(State::Destroyed)
        } else {
            None
        }
    }

    /// Destroys the stream. Calling it again has no effect.
    pub fn destroy(&self, error: Option<StreamError>) {
        {
            let mut life = self.inner.life.borrow_mut();
            if life.destroyed {
                return;
            }
            life.destroyed = true;
            if let Some(error) = &error {
                life.errored.get_or_insert_with(|| error.clone());
            }
        }
        match &error {
            Some(error) => log::debug!("destroying stream: {error}"),
            None => log::debug!("destroying stream"),
        }

        self.unpipe(None);
        if let Some(read) = &self.inner.read {
            read.release(error.as_ref());
        }
        if let Some(write) = &self.inner.write {
            write.release(error.as_ref());
        }

        if let Some(error) = error {
            self.emit_logged(ERROR, &[Value::Error(error)]);
        }
        self.emit_logged(CLOSE, &[]);
    }

    /// Emits a stream event. A failing handler destroys the stream with
    /// [`StreamError::Handler`].
    pub(crate) fn dispatch(&self, event: &str, args: &[Value]) {
        if let Err(error) = self.inner.emitter.emit(event, args) {
            log::warn!("'{event}' handler failed: {error}");
            self.destroy(Some(StreamError::Handler(error.message().to_string())));
        }
    }

    /// Emits `"error"` without destroying the stream.
    pub(crate) fn report(&self, error: StreamError) {
        log::debug!("stream error: {error}");
        self.emit_logged(ERROR, &[Value::Error(error)]);
    }

    fn emit_logged(&self, event: &str, args: &[Value]) {
        if let Err(error) = self.inner.emitter.emit(event, args) {
            log::warn!("'{event}' handler failed: {error}");
        }
    }

    /// Destroys the stream once every side is done, when configured to.
    pub(crate) fn maybe_auto_destroy(&self) {
        if !self.inner.options.auto_destroy() || self.is_destroyed() {
            return;
        }
        if self.read_done() && self.write_done() {
            self.destroy(None);
        }
    }

    /// `"end"` was emitted, or there is no read side.
    pub(crate) fn read_done(&self) -> bool {
        self.inner.read.as_ref().is_none_or(ReadSide::is_done)
    }

    /// `"finish"` was emitted, or there is no write side.
    pub(crate) fn write_done(&self) -> bool {
        self.inner.write.as_ref().is_none_or(WriteSide::is_done)
    }

    pub(crate) fn listener_added(&self, event: &str) {
        if event == DATA {
            if let Some(read) = &self.inner.read {
                if read.is_idle() {
                    self.resume();
                }
            }
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .field("state", &self.state())
            .finish()
    }
}

/// Access to the underlying [`Stream`] handle and its lifecycle.
pub trait AsStream {
    fn as_stream(&self) -> &Stream;

    fn destroy(&self, error: Option<StreamError>) {
        self.as_stream().destroy(error);
    }

    fn is_destroyed(&self) -> bool {
        self.as_stream().is_destroyed()
    }

    fn errored(&self) -> Option<StreamError> {
        self.as_stream().errored()
    }

    fn state(&self) -> State {
        self.as_stream().state()
    }
}

impl AsStream for Stream {
    fn as_stream(&self) -> &Stream {
        self
    }
}

impl Emits for Stream {
    fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    fn listener_added(&self, event: &str) {
        Stream::listener_added(self, event);
    }
}

/// The read capability: a lazy, finite sequence of chunks.
pub trait Source: AsStream + Emits {
    /// Adds a chunk, or end-of-stream for `None`.
    ///
    /// Returns `false` once the buffer reached the high-water mark or the stream ended;
    /// producers should stop until asked again.
    fn push(&self, chunk: Option<Chunk>) -> bool {
        self.as_stream().push(chunk)
    }

    /// Puts a chunk back at the front of the buffer.
    fn unshift(&self, chunk: Chunk) {
        self.as_stream().unshift(chunk);
    }

    /// Pulls up to `size` bytes (one chunk in object mode) from the buffer.
    ///
    /// Returns `None` when not enough data is buffered. After end-of-stream the remainder
    /// is returned. `None` as `size` takes everything buffered.
    fn read(&self, size: Option<usize>) -> Option<Chunk> {
        self.as_stream().read(size)
    }

    fn pause(&self) {
        self.as_stream().pause();
    }

    fn resume(&self) {
        self.as_stream().resume();
    }

    fn is_paused(&self) -> bool {
        self.as_stream().is_paused()
    }

    fn readable_state(&self) -> State {
        self.as_stream().readable_state()
    }

    /// Buffered size, in bytes or chunks.
    fn readable_length(&self) -> usize {
        self.as_stream().readable_length()
    }

    /// Connects this source to `dest` and returns `dest` for chaining.
    fn pipe<D>(&self, dest: &D) -> D
    where
        D: Sink + Clone,
        Self: Sized,
    {
        self.pipe_with(dest, PipeOptions::default())
    }

    fn pipe_with<D>(&self, dest: &D, options: PipeOptions) -> D
    where
        D: Sink + Clone,
        Self: Sized,
    {
        self.as_stream().pipe(dest.as_stream(), options);
        dest.clone()
    }

    /// Disconnects `dest`, or every destination for `None`.
    fn unpipe(&self, dest: Option<&dyn AsStream>) {
        self.as_stream().unpipe(dest.map(|dest| dest.as_stream()));
    }
}

/// The write capability.
pub trait Sink: AsStream + Emits {
    /// Queues a chunk. Returns `false` once the caller should wait for `"drain"`.
    fn write(&self, chunk: Chunk) -> bool {
        self.as_stream().write(chunk)
    }

    /// Writes an optional last chunk and emits `"finish"` once everything was written.
    fn end(&self, chunk: Option<Chunk>) {
        self.as_stream().end(chunk);
    }

    fn writable_state(&self) -> State {
        self.as_stream().writable_state()
    }

    /// Buffered size including the chunk being written, in bytes or chunks.
    fn writable_length(&self) -> usize {
        self.as_stream().writable_length()
    }

    /// Returns `true` while a `"drain"` is owed to a writer that saw `false`.
    fn needs_drain(&self) -> bool {
        self.as_stream().needs_drain()
    }
}

crate::util::macros::stream_handle!(Readable, Writable, Duplex, Transform);

impl Source for Readable {}
impl Source for Duplex {}
impl Source for Transform {}
impl Sink for Writable {}
impl Sink for Duplex {}
impl Sink for Transform {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::tasks::EventLoop;

    // ==================== Lifecycle ====================

    #[test]
    fn state_follows_flow_control() {
        let tasks = EventLoop::new();
        let readable = Readable::new(&tasks, Options::default());
        assert_eq!(readable.state(), State::Idle);

        readable.resume();
        assert_eq!(readable.state(), State::Flowing);

        readable.pause();
        assert_eq!(readable.state(), State::Paused);

        readable.destroy(None);
        assert_eq!(readable.state(), State::Destroyed);
    }

    #[test]
    fn destroy_emits_error_then_close_once() {
        // Given
        let tasks = EventLoop::new();
        let readable = Readable::new(&tasks, Options::default());
        let events = testing::events_of(&readable, &[ERROR, CLOSE]);
        readable.pause();
        readable.push(Some(Chunk::from("buffered")));

        // When
        readable.destroy(Some(StreamError::Io("reset".into())));
        readable.destroy(None);

        // Then
        assert_eq!(*events.borrow(), vec!["error:ERR_STREAM_IO", "close"]);
        assert_eq!(readable.readable_length(), 0);
        assert_eq!(readable.errored(), Some(StreamError::Io("reset".into())));
        assert!(readable.read(None).is_none());
    }

    #[test]
    fn destroy_with_error_reports_errored() {
        let tasks = EventLoop::new();
        let readable = Readable::new(&tasks, Options::default());
        readable.on(ERROR, |_| Ok(()));

        readable.destroy(Some(StreamError::Io("reset".into())));

        assert_eq!(readable.state(), State::Errored);
        assert_eq!(readable.readable_state(), State::Errored);
        assert!(readable.is_destroyed());

        // Then - terminal, a later destroy changes nothing
        readable.destroy(None);
        assert_eq!(readable.state(), State::Errored);
    }

    #[test]
    fn failing_handler_destroys_stream() {
        // Given
        let tasks = EventLoop::new();
        let readable = Readable::new(&tasks, Options::default());
        let events = testing::events_of(&readable, &[ERROR, CLOSE]);
        readable.on(DATA, |_| Err(HandlerError::new("boom")));

        // When
        readable.push(Some(Chunk::from("a")));

        // Then
        assert_eq!(*events.borrow(), vec!["error:ERR_STREAM_HANDLER", "close"]);
        assert_eq!(readable.errored(), Some(StreamError::Handler("boom".into())));
    }

    #[test]
    #[should_panic(expected = "Unhandled 'error' event")]
    fn unhandled_stream_error_panics() {
        let tasks = EventLoop::new();
        let writable = Writable::new(&tasks, Options::default());
        writable.end(None);

        writable.write(Chunk::from("late"));
    }

    #[test]
    fn handles_convert_to_stream() {
        let tasks = EventLoop::new();
        let readable = Readable::new(&tasks, Options::default());
        let stream: Stream = readable.clone().into();

        assert!(stream.ptr_eq(readable.as_stream()));
        assert!(stream.is_readable());
        assert!(!stream.is_writable());
        assert_eq!(
            format!("{readable:?}"),
            "Readable(Stream { readable: true, writable: false, state: Idle })"
        );
    }
}
