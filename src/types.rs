// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::io;
use thiserror::Error;

/// A single metric, fully formatted and sanitized, ready to be written to
/// the wire as one datagram.
///
/// Lines are produced by the functions in the `builder` module and are
/// never modified after that point. They can't be made from arbitrary
/// strings outside of this crate.
///
/// ```compile_fail
/// let line = tally::MetricLine::from("not sanitized:1|c".to_string());
/// ```
#[derive(PartialEq, Eq, Debug, Hash, Clone)]
pub struct MetricLine {
    repr: String,
}

impl MetricLine {
    pub(crate) fn new(repr: String) -> Self {
        MetricLine { repr }
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }

    pub fn len(&self) -> usize {
        self.repr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repr.is_empty()
    }

    pub fn into_string(self) -> String {
        self.repr
    }
}

impl AsRef<str> for MetricLine {
    fn as_ref(&self) -> &str {
        &self.repr
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.repr.fmt(f)
    }
}

/// Potential categories an error from this library falls into.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ErrorKind {
    /// A mandatory configuration value was missing or malformed.
    Configuration,
    /// The address of the metric server could not be resolved or parsed.
    InvalidInput,
    /// A socket level connect or send failure.
    Connection,
    /// Too many consecutive connect attempts failed and the connection
    /// refuses to try again until it is reset.
    ConnectionExhausted,
    /// A metric could not be represented in the single byte wire encoding.
    Encoding,
    /// The requested operation is part of the API but not supported.
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match *self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Connection => "connection error",
            ErrorKind::ConnectionExhausted => "connection attempts exhausted",
            ErrorKind::Encoding => "encoding error",
            ErrorKind::Unsupported => "unsupported operation",
        };

        desc.fmt(f)
    }
}

#[derive(Debug, Error)]
enum ErrorRepr {
    #[error("{1}")]
    WithDescription(ErrorKind, &'static str),
    #[error("{1}")]
    WithDescriptionAndDetail(ErrorKind, String),
    #[error(transparent)]
    IoError(#[from] io::Error),
}

/// Error generated by this library, potentially wrapping another
/// type of error (exposed via the `Error` trait).
#[derive(Debug, Error)]
#[error(transparent)]
pub struct MetricError {
    repr: ErrorRepr,
}

impl MetricError {
    /// Return the kind of the error
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::IoError(_) => ErrorKind::Connection,
            ErrorRepr::WithDescription(kind, _) => kind,
            ErrorRepr::WithDescriptionAndDetail(kind, _) => kind,
        }
    }
}

impl From<io::Error> for MetricError {
    fn from(err: io::Error) -> MetricError {
        MetricError {
            repr: ErrorRepr::IoError(err),
        }
    }
}

impl From<(ErrorKind, &'static str)> for MetricError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> MetricError {
        MetricError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, String)> for MetricError {
    fn from((kind, desc): (ErrorKind, String)) -> MetricError {
        MetricError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc),
        }
    }
}

pub type MetricResult<T> = Result<T, MetricError>;

#[cfg(test)]
mod tests {
    use super::{ErrorKind, MetricError, MetricLine};
    use std::error::Error;
    use std::io;

    #[test]
    fn test_metric_line_display() {
        let line = MetricLine::new("app.metric:5|c".to_string());
        assert_eq!("app.metric:5|c", line.to_string());
        assert_eq!("app.metric:5|c", line.as_str());
        assert_eq!(14, line.len());
    }

    #[test]
    fn test_metric_error_kind_io_error() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "Broken!");
        let our_err = MetricError::from(io_err);
        assert_eq!(ErrorKind::Connection, our_err.kind());
    }

    #[test]
    fn test_metric_error_kind_various() {
        let our_err = MetricError::from((ErrorKind::Unsupported, "Nope!"));
        assert_eq!(ErrorKind::Unsupported, our_err.kind());

        let our_err = MetricError::from((ErrorKind::Configuration, format!("missing {}", "statsd.host")));
        assert_eq!(ErrorKind::Configuration, our_err.kind());
    }

    #[test]
    fn test_metric_error_display() {
        let our_err = MetricError::from((ErrorKind::ConnectionExhausted, "Too many failures"));
        assert_eq!("Too many failures", our_err.to_string());

        let our_err = MetricError::from((ErrorKind::Configuration, "missing statsd.port".to_string()));
        assert_eq!("missing statsd.port", our_err.to_string());
    }

    #[test]
    fn test_metric_error_display_io_error() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "Timeout!");
        let our_err = MetricError::from(io_err);
        assert_eq!("Timeout!", our_err.to_string());
    }

    #[test]
    fn test_metric_error_no_source_with_description() {
        let our_err = MetricError::from((ErrorKind::Encoding, "Not latin-1"));
        assert!(our_err.source().is_none());
    }
}
