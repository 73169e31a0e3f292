//! Streams with independent read and write sides.

use std::{cell::RefCell, rc::Rc};

use crate::error::StreamError;
use crate::event::Chunk;
use crate::stream::{Ack, Consumer, Options, Producer, Readable, Stream, Writable};
use crate::tasks::LoopHandle;

/// A stream that both produces and consumes data.
///
/// The sides share one emitter and one lifecycle but buffer independently. With
/// [`Options::with_allow_half_open`] set to `false` ending either side ends the other.
#[derive(Clone)]
pub struct Duplex {
    pub(crate) stream: Stream,
}

impl Duplex {
    pub fn new<P, C>(tasks: impl Into<LoopHandle>, options: Options, producer: P, consumer: C) -> Self
    where
        P: Producer + 'static,
        C: Consumer + 'static,
    {
        let stream = Stream::new(tasks.into(), options, true, true);
        stream.set_producer(Box::new(producer));
        stream.set_consumer(Box::new(consumer));
        Self { stream }
    }

    /// Creates a duplex backed by one object serving both sides, such as a connection.
    ///
    /// A call that arrives while the transport is already busy on the other side is
    /// retried on the next turn of the loop.
    pub fn with_transport<T>(tasks: impl Into<LoopHandle>, options: Options, transport: T) -> Self
    where
        T: Producer + Consumer + 'static,
    {
        let tasks = tasks.into();
        let shared = Rc::new(RefCell::new(transport));
        Self::new(
            tasks.clone(),
            options,
            SharedProducer {
                transport: shared.clone(),
                tasks: tasks.clone(),
            },
            SharedConsumer {
                transport: shared,
                tasks,
            },
        )
    }

    /// A handle exposing only the read side.
    pub fn readable_side(&self) -> Readable {
        Readable::view(self.stream.clone())
    }

    /// A handle exposing only the write side.
    pub fn writable_side(&self) -> Writable {
        Writable::view(self.stream.clone())
    }
}

struct SharedProducer<T> {
    transport: Rc<RefCell<T>>,
    tasks: LoopHandle,
}

impl<T> Producer for SharedProducer<T>
where
    T: Producer + 'static,
{
    fn read(&mut self, size: usize, stream: &Readable) {
        if let Ok(mut transport) = self.transport.try_borrow_mut() {
            transport.read(size, stream);
            return;
        }
        log::trace!("transport busy; retrying read");
        let transport = self.transport.clone();
        let stream = stream.clone();
        self.tasks.defer(move || match transport.try_borrow_mut() {
            Ok(mut transport) => transport.read(size, &stream),
            Err(_) => stream
                .stream
                .destroy(Some(StreamError::Io("transport busy".into()))),
        });
    }

    fn destroy(&mut self, error: Option<&StreamError>) {
        if let Ok(mut transport) = self.transport.try_borrow_mut() {
            Producer::destroy(&mut *transport, error);
        }
    }
}

struct SharedConsumer<T> {
    transport: Rc<RefCell<T>>,
    tasks: LoopHandle,
}

impl<T> Consumer for SharedConsumer<T>
where
    T: Consumer + 'static,
{
    fn write(&mut self, chunk: Chunk, ack: Ack) {
        if let Ok(mut transport) = self.transport.try_borrow_mut() {
            transport.write(chunk, ack);
            return;
        }
        log::trace!("transport busy; retrying write");
        let transport = self.transport.clone();
        self.tasks.defer(move || match transport.try_borrow_mut() {
            Ok(mut transport) => transport.write(chunk, ack),
            Err(_) => ack.fail(StreamError::Io("transport busy".into())),
        });
    }

    fn finish(&mut self, ack: Ack) {
        if let Ok(mut transport) = self.transport.try_borrow_mut() {
            transport.finish(ack);
            return;
        }
        let transport = self.transport.clone();
        self.tasks.defer(move || match transport.try_borrow_mut() {
            Ok(mut transport) => transport.finish(ack),
            Err(_) => ack.fail(StreamError::Io("transport busy".into())),
        });
    }

    fn destroy(&mut self, error: Option<&StreamError>) {
        if let Ok(mut transport) = self.transport.try_borrow_mut() {
            Consumer::destroy(&mut *transport, error);
        }
    }
}
