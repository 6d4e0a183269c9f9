//! Storage error types.

use std::path::{Path, PathBuf};

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

/// Malformed snapshot table
///
/// Record numbers are 1-based and count the header as record 1.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Table has no header record
    #[error("Missing header")]
    MissingHeader,

    /// Header does not match the expected column list
    #[error("Header mismatch: expected {expected}, found {found}")]
    HeaderMismatch {
        /// Expected header line
        expected: String,
        /// Header line found
        found: String,
    },

    /// Record has the wrong number of columns
    #[error("Record {record}: expected {expected} columns, found {found}")]
    ColumnCount {
        /// Record number
        record: usize,
        /// Columns in the header
        expected: usize,
        /// Columns in the record
        found: usize,
    },

    /// Field cannot be parsed as its column type
    #[error("Record {record}: invalid {column} value {value:?}")]
    InvalidField {
        /// Record number
        record: usize,
        /// Column name
        column: &'static str,
        /// Raw field text
        value: String,
    },

    /// Quoted field runs to end of input
    #[error("Record {record}: unterminated quoted field")]
    UnterminatedQuote {
        /// Record number
        record: usize,
    },

    /// Row cannot be represented in, or rebuilt from, the table
    #[error("Record {record}: {reason}")]
    InvalidRow {
        /// Record number
        record: usize,
        /// Failure reason
        reason: String,
    },
}

/// Storage error type
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Table content is malformed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Journal line cannot be written or parsed
    #[error("Journal error: {reason}")]
    Journal {
        /// Failure reason
        reason: String,
    },
}

impl StorageError {
    /// Wrap an I/O error with its path
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::ColumnCount {
            record: 3,
            expected: 13,
            found: 12,
        };
        assert_eq!(err.to_string(), "Record 3: expected 13 columns, found 12");

        let err = CodecError::InvalidField {
            record: 2,
            column: "existed",
            value: "maybe".to_string(),
        };
        assert_eq!(err.to_string(), "Record 2: invalid existed value \"maybe\"");
    }

    #[test]
    fn test_storage_error_wraps_codec() {
        let err: StorageError = CodecError::MissingHeader.into();
        assert!(matches!(err, StorageError::Codec(CodecError::MissingHeader)));
        assert_eq!(err.to_string(), "Missing header");
    }

    #[test]
    fn test_io_error_names_path() {
        let err = StorageError::io(
            "/tmp/missing.csv.gz",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert_eq!(err.to_string(), "I/O error at /tmp/missing.csv.gz: not found");
    }
}
