//! Streams whose read side is computed from their write side.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::error::StreamError;
use crate::event::Chunk;
use crate::stream::{Ack, Consumer, Inner, Options, Producer, Readable, Stream};
use crate::tasks::LoopHandle;

/// Maps written chunks to readable chunks.
pub trait Transformer {
    /// Converts one written chunk into zero or more output chunks.
    fn transform(&mut self, chunk: Chunk, out: &mut Vec<Chunk>) -> Result<(), StreamError>;

    /// Emits whatever is still held back once the write side ended.
    fn flush(&mut self, _out: &mut Vec<Chunk>) -> Result<(), StreamError> {
        Ok(())
    }
}

impl<F> Transformer for F
where
    F: FnMut(Chunk, &mut Vec<Chunk>) -> Result<(), StreamError>,
{
    fn transform(&mut self, chunk: Chunk, out: &mut Vec<Chunk>) -> Result<(), StreamError> {
        self(chunk, out)
    }
}

struct Core {
    transformer: Box<dyn Transformer>,
    /// The write ack withheld while the read side is full.
    held: Option<Ack>,
}

type SharedCore = Rc<RefCell<Core>>;

struct TransformConsumer {
    core: SharedCore,
    stream: Weak<Inner>,
}

impl Consumer for TransformConsumer {
    fn write(&mut self, chunk: Chunk, ack: Ack) {
        let mut out = Vec::new();
        let result = self.core.borrow_mut().transformer.transform(chunk, &mut out);
        if let Err(error) = result {
            log::debug!("transform failed: {error}");
            ack.fail(error);
            return;
        }
        let Some(stream) = Stream::upgrade(&self.stream) else {
            return;
        };

        for chunk in out {
            stream.push(Some(chunk));
        }
        if stream.read_has_room() {
            ack.ok();
        } else {
            log::trace!("read side full; holding write ack");
            self.core.borrow_mut().held = Some(ack);
        }
    }

    fn finish(&mut self, ack: Ack) {
        let mut out = Vec::new();
        let result = self.core.borrow_mut().transformer.flush(&mut out);
        if let Err(error) = result {
            log::debug!("flush failed: {error}");
            ack.fail(error);
            return;
        }
        let Some(stream) = Stream::upgrade(&self.stream) else {
            return;
        };

        for chunk in out {
            stream.push(Some(chunk));
        }
        stream.push(None);
        ack.ok();
    }
}

struct TransformProducer {
    core: SharedCore,
}

impl Producer for TransformProducer {
    fn read(&mut self, _size: usize, _stream: &Readable) {
        let held = self.core.borrow_mut().held.take();
        if let Some(ack) = held {
            ack.ok();
        }
    }

    fn destroy(&mut self, _error: Option<&StreamError>) {
        self.core.borrow_mut().held = None;
    }
}

/// A duplex whose output is derived from its input by a [`Transformer`].
///
/// A written chunk is only acknowledged once its output fits in the read buffer, so a
/// slow reader eventually makes `write()` report backpressure.
#[derive(Clone)]
pub struct Transform {
    pub(crate) stream: Stream,
}

impl Transform {
    pub fn new<T>(tasks: impl Into<LoopHandle>, options: Options, transformer: T) -> Self
    where
        T: Transformer + 'static,
    {
        let stream = Stream::new(tasks.into(), options, true, true);
        let core = Rc::new(RefCell::new(Core {
            transformer: Box::new(transformer),
            held: None,
        }));
        stream.set_producer(Box::new(TransformProducer { core: core.clone() }));
        stream.set_consumer(Box::new(TransformConsumer {
            core,
            stream: stream.downgrade(),
        }));
        Self { stream }
    }

    /// A transform that forwards every chunk unchanged.
    pub fn pass_through(tasks: impl Into<LoopHandle>, options: Options) -> Self {
        Self::new(tasks, options, |chunk: Chunk, out: &mut Vec<Chunk>| {
            out.push(chunk);
            Ok(())
        })
    }
}
