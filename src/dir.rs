//! Locked segment files and directory operations.
//!
//! A WAL directory is exclusively owned by one writer through per-segment
//! advisory locks. This module provides the locked-file handle, strict
//! enumeration of segment names, selection of the suffix covering a
//! snapshot, all-or-nothing lock acquisition, and the fsync primitives that
//! make renames durable.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use crate::error::{WalError, WalResult};
use crate::segment::{is_valid_seq, parse_segment_name, search_index, SEGMENT_EXT};
use crate::types::SnapshotMarker;

/// A segment file held under an exclusive advisory lock.
///
/// The lock follows the open file description: it survives `rename(2)` of
/// the path and is released when the last duplicated handle closes.
#[derive(Debug)]
pub(crate) struct LockedFile {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
}

impl LockedFile {
    /// Opens `path` read-write and takes the exclusive lock, failing
    /// immediately if another process holds it.
    pub(crate) fn open(path: PathBuf) -> WalResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| WalError::io("open segment", e))?;
        file.try_lock_exclusive()
            .map_err(|e| WalError::io("lock segment", e))?;
        Ok(Self { file, path })
    }

    /// Creates (or truncates) `path`, takes the exclusive lock, and
    /// preallocates `size` bytes.
    pub(crate) fn create(path: PathBuf, size: u64) -> WalResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| WalError::io("create segment", e))?;
        file.try_lock_exclusive()
            .map_err(|e| WalError::io("lock segment", e))?;
        file.allocate(size)
            .map_err(|e| WalError::io("preallocate segment", e))?;
        Ok(Self { file, path })
    }

    /// The file name portion of the canonical path.
    pub(crate) fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Lists the segment file names in `dir`, sorted by name (and therefore by
/// `seq`).
///
/// Files without the `.wal` extension are ignored with a warning; a `.wal`
/// file that does not parse is fatal. An empty result is `FileNotFound`.
pub(crate) fn read_segment_names(dir: &Path) -> WalResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| WalError::io("read dir", e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WalError::io("read dir", e))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if Path::new(name).extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
            if !name.ends_with(".tmp") && !name.contains(".broken") {
                warn!(file = name, "ignoring non-segment file in WAL directory");
            }
            continue;
        }
        parse_segment_name(name)?;
        names.push(name.to_owned());
    }

    if names.is_empty() {
        return Err(WalError::FileNotFound {
            dir: dir.to_owned(),
        });
    }
    names.sort_unstable();
    Ok(names)
}

/// Selects the contiguous suffix of segments whose coverage includes
/// `snap.index`: the last segment with `first-index <= snap.index` and all
/// of its successors.
pub(crate) fn select_segments(dir: &Path, snap: SnapshotMarker) -> WalResult<(Vec<String>, usize)> {
    let names = read_segment_names(dir)?;
    let Some(name_index) = search_index(&names, snap.index) else {
        return Err(WalError::FileNotFound {
            dir: dir.to_owned(),
        });
    };
    if !is_valid_seq(&names[name_index..]) {
        return Err(WalError::FileNotFound {
            dir: dir.to_owned(),
        });
    }
    Ok((names, name_index))
}

/// Opens the selected segments, oldest first.
///
/// In write mode every file is exclusively locked; failure to lock any of
/// them releases everything already acquired. In read mode the files are
/// opened plain so the scan cannot conflict with a live writer. Returns the
/// read handles alongside the locked files (empty in read mode).
pub(crate) fn open_segments(
    dir: &Path,
    names: &[String],
    write: bool,
) -> WalResult<(Vec<File>, Vec<LockedFile>)> {
    let mut readers = Vec::with_capacity(names.len());
    let mut locks = Vec::new();

    for name in names {
        let path = dir.join(name);
        if write {
            // An error drops `locks`, releasing every lock taken so far.
            let locked = LockedFile::open(path)?;
            readers.push(
                locked
                    .file
                    .try_clone()
                    .map_err(|e| WalError::io("clone segment handle", e))?,
            );
            locks.push(locked);
        } else {
            let file = File::open(&path).map_err(|e| WalError::io("open segment", e))?;
            readers.push(file);
        }
    }

    Ok((readers, locks))
}

/// Fsyncs `dir` itself so a completed rename survives a crash.
pub(crate) fn fsync_dir(dir: &Path) -> WalResult<()> {
    let handle = File::open(dir).map_err(|e| WalError::io("open dir", e))?;
    handle.sync_all().map_err(|e| WalError::io("fsync dir", e))
}

/// Zero-fills `file` from `offset` to its current end, leaving the handle
/// positioned at `offset`.
///
/// Truncating and re-extending lets the filesystem supply the zeros instead
/// of streaming them through a write.
pub(crate) fn zero_to_end(file: &mut File, offset: u64) -> WalResult<()> {
    let size = file
        .metadata()
        .map_err(|e| WalError::io("stat segment", e))?
        .len();
    file.set_len(offset)
        .map_err(|e| WalError::io("truncate segment", e))?;
    if size > offset {
        file.allocate(size)
            .map_err(|e| WalError::io("preallocate segment", e))?;
    }
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| WalError::io("seek segment", e))?;
    Ok(())
}

/// Best-effort removal of a no-longer-needed file, used on shutdown paths.
pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::segment::segment_name;

    #[test]
    fn test_read_segment_names_sorted_and_strict() {
        let dir = tempfile::tempdir().unwrap();
        for (seq, index) in [(1u64, 8u64), (0, 0), (2, 20)] {
            std::fs::write(dir.path().join(segment_name(seq, index)), b"").unwrap();
        }
        std::fs::write(dir.path().join("0.tmp"), b"").unwrap();

        let names = read_segment_names(dir.path()).unwrap();
        assert_eq!(
            names,
            vec![segment_name(0, 0), segment_name(1, 8), segment_name(2, 20)]
        );

        std::fs::write(dir.path().join("bogus-name.wal"), b"").unwrap();
        assert!(matches!(
            read_segment_names(dir.path()),
            Err(WalError::MalformedSegmentName { .. })
        ));
    }

    #[test]
    fn test_empty_dir_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_segment_names(dir.path()),
            Err(WalError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_select_segments_requires_coverage() {
        let dir = tempfile::tempdir().unwrap();
        for (seq, index) in [(0u64, 10u64), (1, 20)] {
            std::fs::write(dir.path().join(segment_name(seq, index)), b"").unwrap();
        }

        let (names, name_index) =
            select_segments(dir.path(), SnapshotMarker::new(15, 0)).unwrap();
        assert_eq!(name_index, 0);
        assert_eq!(names.len(), 2);

        // Nothing covers index 5: every segment starts above it.
        assert!(matches!(
            select_segments(dir.path(), SnapshotMarker::new(5, 0)),
            Err(WalError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_select_segments_rejects_gapped_suffix() {
        let dir = tempfile::tempdir().unwrap();
        for (seq, index) in [(0u64, 0u64), (2, 20)] {
            std::fs::write(dir.path().join(segment_name(seq, index)), b"").unwrap();
        }
        assert!(matches!(
            select_segments(dir.path(), SnapshotMarker::new(0, 0)),
            Err(WalError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_zero_to_end_clears_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(segment_name(0, 0));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.write_all(b"keep-this").unwrap();
        file.write_all(&[0xAB; 32]).unwrap();

        zero_to_end(&mut file, 9).unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[..9], b"keep-this");
        assert!(contents[9..].iter().all(|&b| b == 0));
        assert_eq!(contents.len(), 41);
        assert_eq!(file.stream_position().unwrap(), 9);
    }

    #[test]
    fn test_locked_file_excludes_second_locker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(segment_name(0, 0));
        let first = LockedFile::create(path.clone(), 1024).unwrap();
        assert!(LockedFile::open(path.clone()).is_err());
        drop(first);
        assert!(LockedFile::open(path).is_ok());
    }
}
