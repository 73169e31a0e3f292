//! Typed event emission and stream piping.
//!
//! The crate is layered bottom-up:
//!
//! - [`event`]: the named-event registry ([`Emitter`]) and the dynamic payload types.
//! - [`tasks`]: a single-threaded cooperative [`EventLoop`] used for deferred callbacks.
//! - [`stream`]: readable, writable, duplex and transform streams built on the emitter,
//!   plus `pipe`, [`pipeline`](stream::pipeline) and [`finished`](stream::finished).
//!
//! Everything here is `!Send`. Handles are reference counted and all callbacks run on the
//! thread that owns the [`EventLoop`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rusty_streams::prelude::*;
//!
//! let tasks = EventLoop::new();
//! let source = Readable::from_iter(&tasks, ["a", "b", "c"].map(Chunk::from));
//! let sink = Writable::new(&tasks, Options::default());
//!
//! sink.on(FINISH, |_| {
//!     println!("done");
//!     Ok(())
//! });
//! source.pipe(&sink);
//! tasks.run();
//! ```

pub mod error;
pub mod event;
pub mod stream;
pub mod tasks;
mod util;

pub use error::{HandlerError, StreamError};
pub use event::{Chunk, Emits, Emitter, Subscription, Value};
pub use tasks::{EventLoop, LoopHandle};

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::error::{HandlerError, StreamError};
    pub use crate::event::{Chunk, Emits, Emitter, HandlerResult, Subscription, Value};
    pub use crate::stream::{
        Ack, AsStream, CLOSE, DATA, DRAIN, Duplex, END, ERROR, FINISH, Options, PipeOptions,
        Producer, Consumer, Readable, Sink, Source, State, Stream, Transform, Transformer,
        Writable, finished, pipeline,
    };
    pub use crate::tasks::{EventLoop, LoopHandle};
}
