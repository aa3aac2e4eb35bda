//! WAL error types.
//!
//! All errors are explicit and typed. No string errors. Torn tails are a
//! distinct kind from inner corruption so that the repair path never has to
//! guess from a conflated sentinel.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// The WAL directory already exists on create.
    #[error("wal directory already exists: {}", dir.display())]
    Exists {
        /// The directory that was found.
        dir: PathBuf,
    },

    /// No contiguous run of segment files covers the requested snapshot.
    #[error("wal file not found in {}", dir.display())]
    FileNotFound {
        /// The directory that was searched.
        dir: PathBuf,
    },

    /// A `.wal` file name does not parse as `<seq:016x>-<index:016x>.wal`.
    #[error("malformed segment file name: {name}")]
    MalformedSegmentName {
        /// The offending file name.
        name: String,
    },

    /// Two metadata records in the same directory disagree.
    #[error("conflicting metadata found")]
    MetadataConflict,

    /// Replay finished without seeing a marker for the requested snapshot.
    #[error("snapshot marker with index {index} not found")]
    SnapshotNotFound {
        /// The snapshot index that was expected.
        index: u64,
    },

    /// An entry's index would leave a gap in the replayed entry buffer.
    #[error("entry index {index} out of range for snapshot {start} with {buffered} buffered entries")]
    SliceOutOfRange {
        /// The decoded entry index.
        index: u64,
        /// The snapshot index replay started from.
        start: u64,
        /// Number of entries buffered so far.
        buffered: u64,
    },

    /// A record's stored CRC disagrees with the running CRC and intact
    /// records follow it. Never repairable.
    #[error("crc mismatch at offset {offset}: computed {expected:#010x}, stored {actual:#010x}")]
    CrcMismatch {
        /// Byte offset of the record within its segment file.
        offset: u64,
        /// Running CRC computed over the stream.
        expected: u32,
        /// CRC stored in the record.
        actual: u32,
    },

    /// A trailing record of the tail segment is partially written. The one
    /// repairable failure: truncating at `offset` restores a clean tail.
    #[error("torn record after offset {offset} of the tail segment")]
    TornTail {
        /// Byte offset just past the last intact record.
        offset: u64,
    },

    /// Structural damage before the tail segment.
    #[error("corrupt record stream at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset within the damaged segment file.
        offset: u64,
        /// What was found there.
        reason: &'static str,
    },

    /// A decoded frame length exceeds the configured maximum.
    #[error("record too large: {size} bytes exceeds max {max} bytes")]
    RecordTooLarge {
        /// Decoded payload length.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Replay met a record type that is neither built in nor registered.
    #[error("unexpected record type {tag}")]
    UnexpectedRecordType {
        /// The unrecognized type tag.
        tag: i64,
    },

    /// `save_records` was called with a tag no handler is registered for.
    #[error("custom record type {tag} is not registered")]
    UnregisteredType {
        /// The unregistered type tag.
        tag: i64,
    },

    /// An item in a `save_records` batch carries a different tag than the
    /// batch declares.
    #[error("custom record tag mismatch: batch declares {expected}, item carries {actual}")]
    TypeMismatch {
        /// Tag the batch was submitted under.
        expected: i64,
        /// Tag the offending item reports.
        actual: i64,
    },

    /// `read_all` was called on a WAL that is not in read mode.
    #[error("wal is not in read mode")]
    NotInReadMode,

    /// I/O error from the filesystem.
    #[error("I/O error during {operation}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl WalError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// Returns true if this error indicates unrecoverable data corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CrcMismatch { .. }
                | Self::Corrupt { .. }
                | Self::MetadataConflict
                | Self::RecordTooLarge { .. }
                | Self::UnexpectedRecordType { .. }
        )
    }

    /// Returns true if this error can be healed by a one-shot [`repair`].
    ///
    /// [`repair`]: crate::repair
    #[must_use]
    pub const fn is_repairable(&self) -> bool {
        matches!(self, Self::TornTail { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repairable_is_not_corruption() {
        let torn = WalError::TornTail { offset: 128 };
        assert!(torn.is_repairable());
        assert!(!torn.is_corruption());

        let mismatch = WalError::CrcMismatch {
            offset: 128,
            expected: 1,
            actual: 2,
        };
        assert!(mismatch.is_corruption());
        assert!(!mismatch.is_repairable());
    }

    #[test]
    fn test_error_display_carries_offsets() {
        let err = WalError::CrcMismatch {
            offset: 4096,
            expected: 0xDEAD_BEEF,
            actual: 0xCAFE_BABE,
        };
        let msg = format!("{err}");
        assert!(msg.contains("4096"));
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("0xcafebabe"));
    }
}
