//! Error types shared by the emitter and the streams.

use thiserror::Error;

/// Faults raised by stream operations.
///
/// Streams never return these from their public methods. They are delivered as the payload
/// of an `"error"` event (see [`Value::Error`](crate::Value::Error)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// `write()` was called after `end()`.
    #[error("write after end")]
    WriteAfterEnd,

    /// The stream was already destroyed.
    #[error("cannot call write after a stream was destroyed")]
    Destroyed,

    /// `push()` was called after end-of-stream was pushed.
    #[error("stream.push() after EOF")]
    PushAfterEof,

    /// `unshift()` was called after `"end"` was emitted.
    #[error("stream.unshift() after end event")]
    UnshiftAfterEnd,

    /// The stream closed before it ended or finished.
    #[error("premature close")]
    PrematureClose,

    /// A transformer rejected a chunk.
    #[error("transform failed: {0}")]
    Transform(String),

    /// A handler failed while the stream was dispatching one of its own events.
    #[error("handler failed: {0}")]
    Handler(String),

    /// Reported by an external producer or consumer.
    #[error("i/o failure: {0}")]
    Io(String),

    /// `pipeline()` was given stages that cannot be connected.
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),
}

impl StreamError {
    /// Stable classification string for the error.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::WriteAfterEnd => "ERR_STREAM_WRITE_AFTER_END",
            StreamError::Destroyed => "ERR_STREAM_DESTROYED",
            StreamError::PushAfterEof => "ERR_STREAM_PUSH_AFTER_EOF",
            StreamError::UnshiftAfterEnd => "ERR_STREAM_UNSHIFT_AFTER_END_EVENT",
            StreamError::PrematureClose => "ERR_STREAM_PREMATURE_CLOSE",
            StreamError::Transform(_) => "ERR_STREAM_TRANSFORM",
            StreamError::Handler(_) => "ERR_STREAM_HANDLER",
            StreamError::Io(_) => "ERR_STREAM_IO",
            StreamError::InvalidPipeline(_) => "ERR_INVALID_PIPELINE",
        }
    }
}

/// Failure returned by an event handler.
///
/// Returning this from a handler aborts the rest of the dispatch and is handed back to the
/// caller of [`Emitter::emit`](crate::Emitter::emit).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<StreamError> for HandlerError {
    fn from(error: StreamError) -> Self {
        Self::new(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_after_end_has_stable_code() {
        let error = StreamError::WriteAfterEnd;

        assert_eq!(error.code(), "ERR_STREAM_WRITE_AFTER_END");
        assert_eq!(error.to_string(), "write after end");
    }

    #[test]
    fn transform_error_includes_reason() {
        let error = StreamError::Transform("bad input".into());

        assert_eq!(error.to_string(), "transform failed: bad input");
        assert_eq!(error.code(), "ERR_STREAM_TRANSFORM");
    }

    #[test]
    fn handler_error_from_stream_error() {
        let error: HandlerError = StreamError::PrematureClose.into();

        assert_eq!(error.message(), "premature close");
    }
}
