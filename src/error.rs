//! Error types for the hex record engine.
//!
//! This module defines all error types used throughout the library,
//! providing detailed error information for debugging and user feedback.

use thiserror::Error;

/// Primary error type for the hex record engine.
#[derive(Debug, Error)]
pub enum HexError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A line does not match the format's record grammar.
    ///
    /// `line` is the 1-based line number when known, 0 otherwise.
    #[error("syntax error at line {line}")]
    Syntax { line: usize },

    /// A record field exceeds the range allowed by its format and tag.
    #[error("{field} overflow")]
    FieldOverflow { field: &'static str },

    /// Stored checksum differs from the recomputed one.
    #[error("checksum mismatch: expected {expected:#06X}, got {actual:#06X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Stored count differs from the recomputed one.
    #[error("count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: u32, actual: u32 },

    /// A required record field is absent.
    #[error("missing {field}")]
    MissingField { field: &'static str },

    /// Record sequence violates the format structure (missing or misplaced
    /// EOF/count/start/header, non-uniform tags, unordered data, ...).
    #[error("invalid record structure: {message}")]
    Structural { message: String },

    /// A role accessor was used while the needed side cannot be derived.
    #[error("{message}")]
    Role { message: &'static str },

    /// Invalid meta value (maxdatalen, start address, header).
    #[error("invalid meta: {message}")]
    Meta { message: String },

    /// Record trivia carries bytes the format does not tolerate.
    #[error("invalid trivia: {message}")]
    Trivia { message: &'static str },

    /// Substring not found within memory (`index`).
    #[error("subsection not found")]
    NotFound,

    /// The requested range spans a memory hole.
    #[error("non-contiguous data within range")]
    NonContiguous,

    /// Format name not present in the registry.
    #[error("unknown format name: {name:?}")]
    UnknownFormat { name: String },

    /// File extension matches no registered format.
    #[error("extension not found: {extension:?}")]
    UnknownExtension { extension: String },

    /// Textual integer does not match the accepted syntax.
    #[error("invalid integer syntax: {text:?}")]
    IntSyntax { text: String },
}

impl HexError {
    /// Builds a structural error from a message.
    pub fn structural(message: impl Into<String>) -> Self {
        HexError::Structural {
            message: message.into(),
        }
    }

    /// Builds a meta error from a message.
    pub fn meta(message: impl Into<String>) -> Self {
        HexError::Meta {
            message: message.into(),
        }
    }

    /// Attaches a line number to a syntax error that has none yet.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            HexError::Syntax { line: 0 } => HexError::Syntax { line },
            other => other,
        }
    }
}

/// Result type alias for hex record operations.
pub type Result<T> = std::result::Result<T, HexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HexError::ChecksumMismatch {
            expected: 0x91,
            actual: 0x92,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x0091"));
        assert!(msg.contains("0x0092"));
    }

    #[test]
    fn test_field_overflow_display() {
        let err = HexError::FieldOverflow { field: "address" };
        assert_eq!(err.to_string(), "address overflow");
    }

    #[test]
    fn test_at_line() {
        let err = HexError::Syntax { line: 0 }.at_line(12);
        assert!(matches!(err, HexError::Syntax { line: 12 }));

        let err = HexError::NotFound.at_line(12);
        assert!(matches!(err, HexError::NotFound));
    }
}
