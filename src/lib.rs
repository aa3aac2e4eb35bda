//! Quorum WAL - crash-safe write-ahead log for consensus state.
//!
//! A consensus/replication engine persists its state transitions here
//! before applying them: replicated entries, hard-state updates (term,
//! vote, committed), snapshot markers, and optional custom records. The log
//! is a directory of preallocated segment files holding a stream of
//! length-prefixed records sealed by a running CRC32-Castagnoli chain that
//! is re-seeded at every segment boundary.
//!
//! # Design Principles
//!
//! - **Crash safety**: a record is durable once its save call returns
//! - **Checksums**: every record is sealed by the running CRC chain
//! - **Explicit failure kinds**: a repairable torn tail is never conflated
//!   with inner corruption
//! - **No unsafe code**
//!
//! # Example
//!
//! ```ignore
//! use quorum_wal::{Entry, HardState, SnapshotMarker, Wal};
//! use bytes::Bytes;
//!
//! // Create, append, close.
//! let wal = Wal::create("/var/lib/node/wal", Bytes::from_static(b"node-1"))?;
//! wal.save(
//!     HardState::new(1, 1, 1),
//!     &[Entry::new(1, 1, Bytes::from_static(b"command"))],
//! )?;
//! wal.close()?;
//!
//! // Reopen at a snapshot and replay everything after it.
//! let wal = Wal::open("/var/lib/node/wal", SnapshotMarker::default())?;
//! let replay = wal.read_all()?;
//! assert_eq!(replay.entries.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod dir;
mod error;
mod metrics;
mod pipeline;
mod record;
mod registry;
mod repair;
mod segment;
mod types;
mod wal;

pub use error::{WalError, WalResult};
pub use metrics::{NoopMetrics, WalMetrics};
pub use record::{Record, RecordType, CUSTOM_TAG_MIN};
pub use registry::{CustomRecord, CustomRecordHandler, RecordRegistry};
pub use repair::repair;
pub use types::{Entry, HardState, SnapshotMarker};
pub use wal::{exists, valid_snapshot_entries, verify, Replay, Wal, WalOptions};

/// WAL configuration limits and defaults.
pub mod limits {
    /// Default nominal (preallocated) segment size in bytes (64 MB).
    pub const SEGMENT_SIZE_BYTES_DEFAULT: u64 = 64 * 1024 * 1024;

    /// Default maximum record data size in bytes (10 MB).
    pub const RECORD_SIZE_BYTES_MAX_DEFAULT: u64 = 10 * 1024 * 1024;
}
