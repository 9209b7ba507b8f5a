//! Error types for executable editing operations.
//!
//! Every failure in the library maps onto one of four contract kinds:
//! a violated on-wire invariant, a valid-but-unhandled layout, an I/O
//! failure from the device collaborator, or a caller mistake.

use thiserror::Error;

/// Result type for editing operations
pub type EditResult<T> = Result<T, EditError>;

/// Error kinds raised by the editing session
#[derive(Error, Debug, miette::Diagnostic)]
pub enum EditError {
    /// A signature, magic number, count, alignment, or tree-shape
    /// expectation of one of the consumed binary formats was violated.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The layout is valid but deliberately not handled, e.g. a missing
    /// resource section or a resource tree that no longer fits the
    /// existing section allocation.
    #[error("unsupported layout: {0}")]
    Unsupported(String),

    /// Short read, short write, or open/close failure from the
    /// random-access device.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid arguments supplied by the caller.
    #[error("invalid usage: {0}")]
    Usage(String),
}

impl From<std::io::Error> for EditError {
    fn from(error: std::io::Error) -> Self {
        EditError::Io(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EditError::InvalidFormat("missing MZ signature".to_string());
        assert_eq!(error.to_string(), "invalid format: missing MZ signature");

        let error = EditError::Unsupported("no resource section".to_string());
        assert_eq!(error.to_string(), "unsupported layout: no resource section");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let error: EditError = io.into();
        match error {
            EditError::Io(msg) => assert!(msg.contains("short read")),
            _ => panic!("wrong error kind"),
        }
    }
}
