//! Error types for flowpipe streams
//!
//! Errors travel in-band with stream items; the two sentinels are
//! distinguished by variant tag, never by message comparison.

use std::fmt;

/// Error half of a stream item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The producer has closed and the buffer is drained. Terminal and
    /// idempotent: every subsequent receive returns it again.
    EndOfStream,
    /// Returned by a conversion closure to drop the current element.
    /// Never observed by a final consumer.
    NoValue,
    /// Any other error value flowing as data alongside the stream.
    Custom(String),
}

impl StreamError {
    /// Build an in-band error from any displayable message.
    pub fn custom(msg: impl Into<String>) -> Self {
        StreamError::Custom(msg.into())
    }

    /// Whether this is the terminal end-of-stream sentinel.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, StreamError::EndOfStream)
    }

    /// Whether this is the conversion filter sentinel.
    pub fn is_no_value(&self) -> bool {
        matches!(self, StreamError::NoValue)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::EndOfStream => write!(f, "end of stream"),
            StreamError::NoValue => write!(f, "no value for this element"),
            StreamError::Custom(msg) => write!(f, "stream error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {}

/// One stream item: a value or an in-band error.
pub type StreamResult<T> = Result<T, StreamError>;
