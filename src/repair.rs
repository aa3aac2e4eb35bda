//! One-shot torn-tail repair.
//!
//! Heals exactly one class of damage: a trailing record of the last segment
//! whose frame was only partially persisted. The damaged tail is backed up
//! to `<name>.broken`, then truncated to the last intact record boundary
//! and synced. Inner corruption is never repaired.

use std::path::Path;

use tracing::{info, warn};

use crate::codec::Decoder;
use crate::dir::{read_segment_names, LockedFile};
use crate::error::WalError;
use crate::limits::RECORD_SIZE_BYTES_MAX_DEFAULT;
use crate::record::RecordType;

/// Attempts to repair a torn tail in the WAL at `dir`.
///
/// Returns `true` if the log is clean or was truncated back to its last
/// intact record, `false` if it is not repairable (inner corruption, or the
/// directory cannot be opened). Callers invoke this at most once per open
/// attempt; a second torn tail on the next open is fatal to them.
#[must_use]
pub fn repair(dir: &Path) -> bool {
    let names = match read_segment_names(dir) {
        Ok(names) => names,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "repair: cannot enumerate segments");
            return false;
        }
    };
    let last = names.last().expect("read_segment_names is non-empty");
    let path = dir.join(last);

    let tail = match LockedFile::open(path.clone()) {
        Ok(tail) => tail,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "repair: cannot lock tail segment");
            return false;
        }
    };
    let reader = match tail.file.try_clone() {
        Ok(reader) => reader,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "repair: cannot clone tail handle");
            return false;
        }
    };

    // Decode the tail segment alone; its leading crc record re-seeds the
    // chain with the previous segment's terminal CRC.
    let mut decoder = Decoder::new(vec![reader], RECORD_SIZE_BYTES_MAX_DEFAULT);
    loop {
        let rec = match decoder.decode() {
            Ok(Some(rec)) => rec,
            Ok(None) => {
                info!(path = %path.display(), "repair: tail segment is intact");
                return true;
            }
            Err(WalError::TornTail { offset }) => {
                return truncate_torn_tail(&tail, offset);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "repair: unrepairable corruption");
                return false;
            }
        };
        if rec.rtype == RecordType::Crc {
            if let Err(e) = decoder.verify_seed(&rec) {
                warn!(path = %path.display(), error = %e, "repair: crc chain broken");
                return false;
            }
        }
    }
}

/// Backs the damaged file up, truncates it to `offset`, and syncs.
fn truncate_torn_tail(tail: &LockedFile, offset: u64) -> bool {
    let backup = tail.path.with_extension("broken");
    if let Err(e) = std::fs::copy(&tail.path, &backup) {
        warn!(path = %tail.path.display(), error = %e, "repair: cannot back up damaged segment");
        return false;
    }
    if let Err(e) = tail.file.set_len(offset) {
        warn!(path = %tail.path.display(), error = %e, "repair: cannot truncate torn tail");
        return false;
    }
    if let Err(e) = tail.file.sync_data() {
        warn!(path = %tail.path.display(), error = %e, "repair: cannot sync repaired tail");
        return false;
    }
    info!(path = %tail.path.display(), offset, "repaired torn tail");
    true
}
