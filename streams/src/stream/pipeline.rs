//! Completion tracking and pipe chains with shared teardown.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::error::StreamError;
use crate::event::{Subscription, Value};
use crate::stream::{AsStream, CLOSE, END, ERROR, FINISH, Inner, PipeOptions, Stream};

type Callback = Box<dyn FnOnce(Result<(), StreamError>)>;

struct Completion {
    callback: RefCell<Option<Callback>>,
    subscriptions: RefCell<Vec<Subscription>>,
    stream: Weak<Inner>,
}

impl Completion {
    fn complete(&self, result: Result<(), StreamError>) {
        let callback = self.callback.borrow_mut().take();
        let Some(callback) = callback else {
            return;
        };
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        if let Some(stream) = Stream::upgrade(&self.stream) {
            for subscription in &subscriptions {
                stream.inner.emitter.off(subscription);
            }
        }
        callback(result);
    }
}

/// Calls `callback` once when `stream` is done.
///
/// Done means every side the stream has completed: `"end"` for the read side, `"finish"`
/// for the write side. The callback gets the error if `"error"` is emitted first, and
/// [`StreamError::PrematureClose`] if the stream closes before completing. For a stream
/// that is already done the callback runs on the next loop turn.
pub fn finished<S, F>(stream: &S, callback: F)
where
    S: AsStream + ?Sized,
    F: FnOnce(Result<(), StreamError>) + 'static,
{
    let stream = stream.as_stream();
    let completion = Rc::new(Completion {
        callback: RefCell::new(Some(Box::new(callback))),
        subscriptions: RefCell::new(Vec::new()),
        stream: stream.downgrade(),
    });

    let done = stream.read_done() && stream.write_done();
    if done || stream.is_destroyed() {
        let result = match stream.errored() {
            Some(error) => Err(error),
            None if done => Ok(()),
            None => Err(StreamError::PrematureClose),
        };
        stream.tasks().defer(move || completion.complete(result));
        return;
    }

    let emitter = &stream.inner.emitter;
    let side_done = |check: fn(&Stream) -> bool| {
        let completion = completion.clone();
        let weak = stream.downgrade();
        move |_: &[Value]| {
            if Stream::upgrade(&weak).is_some_and(|stream| check(&stream)) {
                completion.complete(Ok(()));
            }
            Ok(())
        }
    };
    let on_end = emitter.once(END, side_done(Stream::write_done));
    let on_finish = emitter.once(FINISH, side_done(Stream::read_done));
    let on_error = {
        let completion = completion.clone();
        emitter.on(ERROR, move |args: &[Value]| {
            let error = args
                .first()
                .and_then(Value::as_error)
                .cloned()
                .unwrap_or(StreamError::PrematureClose);
            completion.complete(Err(error));
            Ok(())
        })
    };
    let on_close = {
        let completion = completion.clone();
        let weak = stream.downgrade();
        emitter.once(CLOSE, move |_| {
            let result = match Stream::upgrade(&weak) {
                Some(stream) if stream.read_done() && stream.write_done() => Ok(()),
                Some(stream) => Err(stream.errored().unwrap_or(StreamError::PrematureClose)),
                None => Err(StreamError::PrematureClose),
            };
            completion.complete(result);
            Ok(())
        })
    };

    completion
        .subscriptions
        .borrow_mut()
        .extend([on_end, on_finish, on_error, on_close]);
}

struct Run {
    callback: RefCell<Option<Callback>>,
    failed: Cell<bool>,
    stages: Vec<Weak<Inner>>,
}

impl Run {
    fn fail(&self, error: StreamError) {
        if self.failed.replace(true) {
            return;
        }
        let callback = self.callback.borrow_mut().take();
        log::debug!("pipeline failed: {error}");
        for stage in self.stages.iter().filter_map(Stream::upgrade) {
            stage.destroy(None);
        }
        if let Some(callback) = callback {
            callback(Err(error));
        }
    }

    fn succeed(&self) {
        if self.failed.get() {
            return;
        }
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            log::debug!("pipeline finished");
            callback(Ok(()));
        }
    }
}

/// Pipes `stages` into each other and tracks the chain as a whole.
///
/// The first error or premature close in any stage destroys every stage and passes the
/// error to `callback`. Otherwise `callback` gets `Ok` once the last stage is done.
/// Returns the last stage.
///
/// Fails without touching any stage if there are fewer than two stages, or a stage cannot
/// read (every one but the last) or write (every one but the first).
pub fn pipeline<F>(stages: &[&dyn AsStream], callback: F) -> Result<Stream, StreamError>
where
    F: FnOnce(Result<(), StreamError>) + 'static,
{
    if stages.len() < 2 {
        return Err(StreamError::InvalidPipeline(
            "at least two streams are required".to_string(),
        ));
    }
    let streams: Vec<Stream> = stages.iter().map(|stage| stage.as_stream().clone()).collect();
    let last = streams.len() - 1;
    for (index, stream) in streams.iter().enumerate() {
        if index < last && !stream.is_readable() {
            return Err(StreamError::InvalidPipeline(format!(
                "stage {index} is not readable"
            )));
        }
        if index > 0 && !stream.is_writable() {
            return Err(StreamError::InvalidPipeline(format!(
                "stage {index} is not writable"
            )));
        }
    }

    let run = Rc::new(Run {
        callback: RefCell::new(Some(Box::new(callback))),
        failed: Cell::new(false),
        stages: streams.iter().map(Stream::downgrade).collect(),
    });
    for (index, stream) in streams.iter().enumerate() {
        let run = run.clone();
        finished(stream, move |result| match result {
            Err(error) => run.fail(error),
            Ok(()) if index == last => run.succeed(),
            Ok(()) => {}
        });
    }
    for pair in streams.windows(2) {
        pair[0].pipe(&pair[1], PipeOptions::default());
    }

    Ok(streams[last].clone())
}
