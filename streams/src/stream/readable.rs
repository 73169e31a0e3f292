//! The read side of a stream.
//!
//! Chunks enter through [`push()`](Source::push), either from an external collaborator or
//! from a [`Producer`] that the stream asks for more whenever its buffer is below the
//! high-water mark. They leave as `"data"` notifications while flowing, or through
//! [`read()`](Source::read) while paused.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
};

use crate::error::StreamError;
use crate::event::{Chunk, Value};
use crate::stream::{
    DATA, END, Options, PAUSE, READABLE, RESUME, State, Stream, pipe::PipeSet,
};
use crate::tasks::LoopHandle;

/// Supplies chunks to a read side on request.
///
/// `read` is called when the stream wants more data. The producer answers by calling
/// [`push()`](crate::stream::Source::push) on the given handle, now or later, and pushes
/// `None` once exhausted. The stream does not call `read` again until something was pushed.
pub trait Producer {
    fn read(&mut self, size: usize, stream: &Readable);

    /// Called once when the stream is destroyed.
    fn destroy(&mut self, _error: Option<&StreamError>) {}
}

impl<F> Producer for F
where
    F: FnMut(usize, &Readable),
{
    fn read(&mut self, size: usize, stream: &Readable) {
        self(size, stream)
    }
}

struct IterProducer<I> {
    iter: I,
}

impl<I> Producer for IterProducer<I>
where
    I: Iterator<Item = Chunk>,
{
    fn read(&mut self, _size: usize, stream: &Readable) {
        loop {
            match self.iter.next() {
                Some(chunk) => {
                    if !stream.stream.push(Some(chunk)) {
                        return;
                    }
                }
                None => {
                    stream.stream.push(None);
                    return;
                }
            }
        }
    }
}

/// A stream that only produces data.
#[derive(Clone)]
pub struct Readable {
    pub(crate) stream: Stream,
}

impl Readable {
    /// Creates a readable fed only by external [`push()`](crate::stream::Source::push) calls.
    pub fn new(tasks: impl Into<LoopHandle>, options: Options) -> Self {
        Self {
            stream: Stream::new(tasks.into(), options, true, false),
        }
    }

    /// Creates a readable that asks `producer` for data.
    pub fn with_producer<P>(tasks: impl Into<LoopHandle>, options: Options, producer: P) -> Self
    where
        P: Producer + 'static,
    {
        let readable = Self::new(tasks, options);
        readable.stream.set_producer(Box::new(producer));
        readable
    }

    /// Creates an object mode readable that yields every chunk of `iter`, then ends.
    pub fn from_iter<I>(tasks: impl Into<LoopHandle>, iter: I) -> Self
    where
        I: IntoIterator<Item = Chunk>,
        I::IntoIter: 'static,
    {
        Self::with_producer(
            tasks,
            Options::new().with_object_mode(true),
            IterProducer {
                iter: iter.into_iter(),
            },
        )
    }

    /// The read side of a duplex or transform.
    pub(crate) fn view(stream: Stream) -> Self {
        Self { stream }
    }
}

pub(crate) struct ReadState {
    buffer: VecDeque<Chunk>,
    length: usize,
    high_water_mark: usize,
    object_mode: bool,
    /// `None` until the stream first flows or is paused.
    flowing: Option<bool>,
    ended: bool,
    end_emitted: bool,
    /// A producer request is outstanding.
    reading: bool,
    /// The producer is running on the stack right now.
    sync: bool,
    /// A `"data"` dispatch is in progress.
    emitting: bool,
    readable_pending: bool,
    pub(crate) pipes: PipeSet,
}

impl ReadState {
    #[inline]
    fn size_of(&self, chunk: &Chunk) -> usize {
        if self.object_mode { 1 } else { chunk.len() }
    }

    #[inline]
    fn wants_more(&self) -> bool {
        self.length < self.high_water_mark || (self.flowing == Some(true) && self.length == 0)
    }

    fn take(&mut self, size: Option<usize>) -> Option<Chunk> {
        if self.buffer.is_empty() {
            return None;
        }
        if self.object_mode {
            let chunk = self.buffer.pop_front()?;
            self.length -= 1;
            return Some(chunk);
        }

        let wanted = match size {
            Some(0) => return None,
            Some(n) if n > self.length && !self.ended => return None,
            Some(n) => n.min(self.length),
            None => self.length,
        };

        let mut out: Vec<u8> = Vec::with_capacity(wanted);
        while out.len() < wanted {
            let Some(chunk) = self.buffer.pop_front() else {
                break;
            };
            match chunk {
                Chunk::Bytes(bytes) => {
                    let need = wanted - out.len();
                    if bytes.len() <= need {
                        out.extend_from_slice(&bytes);
                    } else {
                        out.extend_from_slice(&bytes[..need]);
                        self.buffer.push_front(Chunk::from(&bytes[need..]));
                    }
                }
                object @ Chunk::Object(_) => {
                    if out.is_empty() {
                        self.length -= 1;
                        return Some(object);
                    }
                    self.buffer.push_front(object);
                    break;
                }
            }
        }
        self.length -= out.len();
        Some(Chunk::from(out))
    }
}

pub(crate) struct ReadSide {
    pub(crate) state: RefCell<ReadState>,
    producer: RefCell<Option<Box<dyn Producer>>>,
    has_producer: Cell<bool>,
}

impl ReadSide {
    pub(crate) fn new(options: &Options) -> Self {
        Self {
            state: RefCell::new(ReadState {
                buffer: VecDeque::new(),
                length: 0,
                high_water_mark: options.high_water_mark(),
                object_mode: options.object_mode(),
                flowing: None,
                ended: false,
                end_emitted: false,
                reading: false,
                sync: false,
                emitting: false,
                readable_pending: false,
                pipes: PipeSet::default(),
            }),
            producer: RefCell::new(None),
            has_producer: Cell::new(false),
        }
    }

    pub(crate) fn state(&self) -> State {
        let state = self.state.borrow();
        if state.end_emitted {
            return State::Ended;
        }
        match state.flowing {
            None => State::Idle,
            Some(true) => State::Flowing,
            Some(false) => State::Paused,
        }
    }

    #[inline]
    pub(crate) fn is_idle(&self) -> bool {
        self.state.borrow().flowing.is_none()
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.state.borrow().end_emitted
    }

    /// Drops buffered chunks and the producer.
    pub(crate) fn release(&self, error: Option<&StreamError>) {
        {
            let mut state = self.state.borrow_mut();
            state.buffer.clear();
            state.length = 0;
        }
        let producer = self.producer.borrow_mut().take();
        if let Some(mut producer) = producer {
            producer.destroy(error);
        }
    }
}

enum PushPlan {
    Rejected,
    Ignored,
    Direct(Chunk),
    Buffered { was_empty: bool },
}

impl Stream {
    #[inline]
    fn read_side(&self) -> Option<&ReadSide> {
        self.inner.read.as_ref()
    }

    pub(crate) fn set_producer(&self, producer: Box<dyn Producer>) {
        if let Some(side) = self.read_side() {
            *side.producer.borrow_mut() = Some(producer);
            side.has_producer.set(true);
        }
    }

    pub(crate) fn push(&self, chunk: Option<Chunk>) -> bool {
        let Some(side) = self.read_side() else {
            log::warn!("push() on a stream without a read side");
            return false;
        };
        if self.is_destroyed() {
            return false;
        }

        let Some(chunk) = chunk else {
            {
                let mut state = side.state.borrow_mut();
                if state.ended {
                    return false;
                }
                state.ended = true;
                state.reading = false;
            }
            log::debug!("read side reached end of input");
            self.after_push();
            return false;
        };

        let plan = {
            let mut state = side.state.borrow_mut();
            if state.ended {
                PushPlan::Rejected
            } else if !state.object_mode && chunk.is_empty() {
                PushPlan::Ignored
            } else {
                state.reading = false;
                if state.flowing == Some(true)
                    && state.buffer.is_empty()
                    && !state.sync
                    && !state.emitting
                {
                    state.emitting = true;
                    PushPlan::Direct(chunk)
                } else {
                    let was_empty = state.buffer.is_empty();
                    state.length += state.size_of(&chunk);
                    state.buffer.push_back(chunk);
                    PushPlan::Buffered { was_empty }
                }
            }
        };

        match plan {
            PushPlan::Rejected => {
                self.report(StreamError::PushAfterEof);
                return false;
            }
            PushPlan::Ignored => {}
            PushPlan::Direct(chunk) => {
                log::trace!("emitting pushed chunk of {} directly", chunk.len());
                self.dispatch(DATA, &[Value::Chunk(chunk)]);
                side.state.borrow_mut().emitting = false;
            }
            PushPlan::Buffered { was_empty } => {
                if was_empty {
                    side.state.borrow_mut().readable_pending = true;
                }
            }
        }

        self.after_push();
        !self.is_destroyed() && {
            let state = side.state.borrow();
            !state.ended && state.length < state.high_water_mark
        }
    }

    fn after_push(&self) {
        let Some(side) = self.read_side() else {
            return;
        };
        if self.is_destroyed() || side.state.borrow().sync {
            return;
        }
        self.flow();
        self.notify_readable();
        self.maybe_read_more();
    }

    /// Emits `"readable"` when data or end-of-stream is waiting for a paused consumer.
    fn notify_readable(&self) {
        let Some(side) = self.read_side() else {
            return;
        };
        let notify = {
            let mut state = side.state.borrow_mut();
            let waiting = state.readable_pending || (state.ended && !state.end_emitted);
            if waiting && state.flowing != Some(true) && !state.emitting {
                state.readable_pending = false;
                true
            } else {
                false
            }
        };
        if notify {
            self.dispatch(READABLE, &[]);
        }
    }

    pub(crate) fn unshift(&self, chunk: Chunk) {
        let Some(side) = self.read_side() else {
            return;
        };
        if self.is_destroyed() {
            return;
        }
        let rejected = {
            let mut state = side.state.borrow_mut();
            if state.end_emitted {
                true
            } else {
                state.length += state.size_of(&chunk);
                state.buffer.push_front(chunk);
                false
            }
        };
        if rejected {
            self.report(StreamError::UnshiftAfterEnd);
        } else {
            self.flow();
        }
    }

    pub(crate) fn read(&self, size: Option<usize>) -> Option<Chunk> {
        let side = self.read_side()?;
        if self.is_destroyed() {
            return None;
        }

        self.maybe_read_more();
        let (chunk, drained) = {
            let mut state = side.state.borrow_mut();
            let chunk = state.take(size);
            let drained = state.ended && state.buffer.is_empty() && !state.end_emitted;
            (chunk, drained)
        };

        if drained {
            // The caller sees the last chunk before "end".
            let stream = self.clone();
            self.tasks().defer(move || stream.maybe_end(true));
        } else {
            self.maybe_read_more();
        }
        chunk
    }

    pub(crate) fn pause(&self) {
        let Some(side) = self.read_side() else {
            return;
        };
        let changed = {
            let mut state = side.state.borrow_mut();
            let changed = state.flowing != Some(false);
            state.flowing = Some(false);
            changed
        };
        if changed {
            log::trace!("read side paused");
            self.dispatch(PAUSE, &[]);
        }
    }

    pub(crate) fn resume(&self) {
        let Some(side) = self.read_side() else {
            return;
        };
        if self.is_destroyed() {
            return;
        }
        let changed = {
            let mut state = side.state.borrow_mut();
            let changed = state.flowing != Some(true);
            state.flowing = Some(true);
            changed
        };
        if changed {
            log::trace!("read side resumed");
            self.dispatch(RESUME, &[]);
        }
        self.flow();
        self.maybe_read_more();
    }

    /// Switches to flowing at once but only starts pulling buffered and produced data on
    /// the next turn, so that several destinations can be attached first.
    pub(crate) fn resume_deferred(&self) {
        let Some(side) = self.read_side() else {
            return;
        };
        if self.is_destroyed() {
            return;
        }
        let changed = {
            let mut state = side.state.borrow_mut();
            let changed = state.flowing != Some(true);
            state.flowing = Some(true);
            changed
        };
        if changed {
            self.dispatch(RESUME, &[]);
        }
        let stream = self.clone();
        self.tasks().defer(move || {
            if !stream.is_destroyed() {
                stream.flow();
                stream.maybe_read_more();
            }
        });
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.read_side()
            .is_some_and(|side| side.state.borrow().flowing == Some(false))
    }

    pub(crate) fn readable_state(&self) -> State {
        if let Some(state) = self.terminal_state() {
            return state;
        }
        self.read_side().map_or(State::Idle, ReadSide::state)
    }

    pub(crate) fn readable_length(&self) -> usize {
        self.read_side().map_or(0, |side| side.state.borrow().length)
    }

    /// Returns `true` while the read side's buffer is below its high-water mark.
    pub(crate) fn read_has_room(&self) -> bool {
        self.read_side().is_some_and(|side| {
            let state = side.state.borrow();
            state.length < state.high_water_mark
        })
    }

    /// Emits buffered chunks while flowing, then `"end"` if the input is exhausted.
    pub(crate) fn flow(&self) {
        let Some(side) = self.read_side() else {
            return;
        };
        loop {
            let next = {
                let mut state = side.state.borrow_mut();
                if state.flowing != Some(true) || state.emitting || self.is_destroyed() {
                    None
                } else {
                    let chunk = state.buffer.pop_front();
                    if let Some(chunk) = &chunk {
                        state.length -= state.size_of(chunk);
                        state.emitting = true;
                    }
                    chunk
                }
            };
            let Some(chunk) = next else {
                break;
            };
            self.dispatch(DATA, &[Value::Chunk(chunk)]);
            side.state.borrow_mut().emitting = false;
        }
        self.maybe_end(false);
    }

    /// Emits `"end"` once the input ended and the buffer was consumed, either by flowing or
    /// by `read()`.
    fn maybe_end(&self, consumed: bool) {
        let Some(side) = self.read_side() else {
            return;
        };
        let emit = {
            let mut state = side.state.borrow_mut();
            let ready = state.ended
                && !state.end_emitted
                && state.buffer.is_empty()
                && !state.emitting
                && (consumed || state.flowing == Some(true));
            if ready && !self.is_destroyed() {
                state.end_emitted = true;
                true
            } else {
                false
            }
        };
        if !emit {
            return;
        }

        log::debug!("read side ended");
        self.dispatch(END, &[]);
        if self.is_destroyed() {
            return;
        }
        if self.is_writable() && !self.options().allow_half_open() {
            self.end(None);
        }
        self.maybe_auto_destroy();
    }

    /// Asks the producer for data until the buffer reaches the high-water mark or the
    /// producer stops answering synchronously.
    pub(crate) fn maybe_read_more(&self) {
        let Some(side) = self.read_side() else {
            return;
        };
        if !side.has_producer.get() {
            return;
        }
        loop {
            let request = {
                let mut state = side.state.borrow_mut();
                if state.ended
                    || state.reading
                    || state.sync
                    || !state.wants_more()
                    || self.is_destroyed()
                {
                    None
                } else {
                    state.reading = true;
                    state.sync = true;
                    Some((state.high_water_mark.max(1), state.length))
                }
            };
            let Some((size, before)) = request else {
                return;
            };

            let taken = side.producer.borrow_mut().take();
            let Some(mut producer) = taken else {
                let mut state = side.state.borrow_mut();
                state.reading = false;
                state.sync = false;
                return;
            };
            producer.read(size, &Readable::view(self.clone()));
            if self.is_destroyed() {
                producer.destroy(self.errored().as_ref());
            } else {
                *side.producer.borrow_mut() = Some(producer);
            }

            let progressed = {
                let mut state = side.state.borrow_mut();
                state.sync = false;
                state.ended || state.length != before
            };
            self.flow();
            self.notify_readable();
            if !progressed {
                return;
            }
        }
    }
}
