//! Error types shared by every component of the core.
//!
//! Each failure is scoped to the single requested operation; nothing here is fatal to
//! the process. Cancellation is modelled as an error only inside the core; the public
//! async search entry points turn it into an empty result.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the document buffer, caches and search engine
#[derive(Error, Debug)]
pub enum CoreError {
    /// An offset, length or line index violates a stated bound
    #[error("{what} {value} out of range (bound {bound})")]
    OutOfRange {
        /// What was being addressed ("offset", "line", "range end", ...)
        what: &'static str,
        /// The offending value
        value: usize,
        /// The bound it had to respect
        bound: usize,
    },

    /// Invalid or unsafe search pattern
    #[error("invalid search pattern: {0}")]
    Pattern(String),

    /// A single scan window exceeded its time budget
    #[error("search for {pattern:?} timed out in window starting at {window_start}")]
    SearchTimeout {
        /// The pattern that was being searched for
        pattern: String,
        /// Document offset of the window that timed out
        window_start: usize,
    },

    /// The backing resource was released before use
    #[error("backing source has been disposed")]
    Disposed,

    /// A cooperative cancellation request was observed
    #[error("operation cancelled")]
    Cancelled,

    /// I/O failure while opening or mapping a backing source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or was invalid
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub(crate) fn out_of_range(what: &'static str, value: usize, bound: usize) -> Self {
        CoreError::OutOfRange { what, value, bound }
    }

    /// True for errors the user can correct (bad pattern, slow pattern)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::Pattern(_) | CoreError::SearchTimeout { .. })
    }

    /// True if this error represents an observed cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

impl From<regex::Error> for CoreError {
    fn from(err: regex::Error) -> Self {
        CoreError::Pattern(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_message() {
        let err = CoreError::out_of_range("offset", 12, 10);
        assert_eq!(err.to_string(), "offset 12 out of range (bound 10)");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_pattern_errors_are_recoverable() {
        let err: CoreError = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, CoreError::Pattern(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(CoreError::Cancelled.is_cancelled());
        assert!(!CoreError::Disposed.is_cancelled());
    }
}
