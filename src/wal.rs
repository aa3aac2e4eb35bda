//! The WAL engine.
//!
//! A [`Wal`] owns a directory of segment files and is either in *read* mode
//! (just opened, ready to replay) or *append* mode (fresh create, or a
//! completed replay). All public operations serialize on one engine mutex;
//! the only internal thread is the file pipeline pre-creating the next
//! segment.
//!
//! # Directory layout
//!
//! ```text
//! /w/
//!   0000000000000000-0000000000000000.wal   # sealed segment
//!   0000000000000001-0000000000000021.wal   # sealed segment
//!   0000000000000002-0000000000000047.wal   # active tail
//!   0.tmp                                   # file pipeline spare
//! ```
//!
//! Create builds the directory under `<dir>.tmp` and renames it into place,
//! so initialization appears atomic; a create that fails after the rename
//! quarantines the directory as `<dir>.broken.<timestamp>`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::codec::{Decoder, Encoder};
use crate::dir::{fsync_dir, open_segments, read_segment_names, select_segments, zero_to_end, LockedFile};
use crate::error::{WalError, WalResult};
use crate::limits::{RECORD_SIZE_BYTES_MAX_DEFAULT, SEGMENT_SIZE_BYTES_DEFAULT};
use crate::metrics::{NoopMetrics, WalMetrics};
use crate::pipeline::FilePipeline;
use crate::record::RecordType;
use crate::registry::{CustomRecord, RecordRegistry};
use crate::segment::{parse_segment_name, segment_name};
use crate::types::{Entry, HardState, SnapshotMarker};

/// Fsyncs slower than this are reported with a warning.
const WARN_SYNC_DURATION: Duration = Duration::from_secs(1);

/// Construction-time WAL configuration.
#[derive(Clone)]
pub struct WalOptions {
    segment_size_bytes: u64,
    max_record_size: u64,
    metrics: Arc<dyn WalMetrics>,
    registry: Arc<RecordRegistry>,
}

impl WalOptions {
    /// Creates options with defaults: 64 MB segments, 10 MB record cap, a
    /// no-op metrics sink, and an empty custom-record registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            segment_size_bytes: SEGMENT_SIZE_BYTES_DEFAULT,
            max_record_size: RECORD_SIZE_BYTES_MAX_DEFAULT,
            metrics: Arc::new(NoopMetrics),
            registry: Arc::new(RecordRegistry::new()),
        }
    }

    /// Sets the nominal (preallocated) segment size in bytes.
    ///
    /// # Panics
    /// Panics if `bytes` is zero.
    #[must_use]
    pub fn with_segment_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "segment size must be positive");
        self.segment_size_bytes = bytes;
        self
    }

    /// Sets the maximum decodable record data size in bytes.
    #[must_use]
    pub fn with_max_record_size(mut self, bytes: u64) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Injects a metrics sink for fsync observations.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn WalMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Injects the custom-record registry consulted during replay.
    #[must_use]
    pub fn with_registry(mut self, registry: RecordRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }
}

impl Default for WalOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WalOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalOptions")
            .field("segment_size_bytes", &self.segment_size_bytes)
            .field("max_record_size", &self.max_record_size)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Everything a replay reconstructs from the record stream.
pub struct Replay {
    /// Metadata recorded at the head of every segment.
    pub metadata: Bytes,
    /// The last hard state observed in the stream.
    pub hard_state: HardState,
    /// All entries after the opening snapshot, later writes at the same
    /// index superseding earlier ones.
    pub entries: Vec<Entry>,
    /// Decoded custom records, in stream order.
    pub custom_records: Vec<Box<dyn CustomRecord>>,
}

impl std::fmt::Debug for Replay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replay")
            .field("metadata_len", &self.metadata.len())
            .field("hard_state", &self.hard_state)
            .field("entries", &self.entries.len())
            .field("custom_records", &self.custom_records.len())
            .finish()
    }
}

/// A write-ahead log over one exclusively owned directory.
pub struct Wal {
    dir: PathBuf,
    options: WalOptions,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Directory handle used to fsync renames. `None` in read-only mode.
    dir_file: Option<File>,
    /// Metadata recorded at the head of every segment.
    metadata: Bytes,
    /// Last hard state written or replayed.
    state: HardState,
    /// Snapshot the WAL was opened at; zeroed once replay completes.
    start: SnapshotMarker,
    /// Index of the last entry encoded into the log.
    last_index: u64,
    /// Present in read mode.
    decoder: Option<Decoder>,
    /// Present in append mode.
    encoder: Option<Encoder>,
    /// Exclusively locked segment files, oldest first; the tail is active.
    locks: Vec<LockedFile>,
    /// Pre-creates the next segment. `None` in read-only mode.
    pipeline: Option<FilePipeline>,
    /// Skips fdatasync. Testing only.
    unsafe_no_sync: bool,
}

impl Wal {
    /// Creates a WAL directory ready for appending, recording `metadata` at
    /// the head of every segment.
    ///
    /// # Errors
    /// Fails with [`WalError::Exists`] if `dir` is already present, or with
    /// an I/O error if the directory cannot be materialized.
    pub fn create(dir: impl Into<PathBuf>, metadata: impl Into<Bytes>) -> WalResult<Self> {
        Self::create_with(WalOptions::default(), dir, metadata)
    }

    /// [`Wal::create`] with explicit options.
    ///
    /// # Errors
    /// See [`Wal::create`].
    pub fn create_with(
        options: WalOptions,
        dir: impl Into<PathBuf>,
        metadata: impl Into<Bytes>,
    ) -> WalResult<Self> {
        let dir = dir.into();
        let metadata = metadata.into();

        if exists(&dir) {
            return Err(WalError::Exists { dir });
        }

        // Build under a temp directory so initialization appears atomic. A
        // leftover from a crashed create is discarded.
        let tmp = sibling_path(&dir, ".tmp");
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp).map_err(|e| WalError::io("remove tmp dir", e))?;
        }
        std::fs::create_dir_all(&tmp).map_err(|e| WalError::io("create tmp dir", e))?;

        let tail = LockedFile::create(tmp.join(segment_name(0, 0)), options.segment_size_bytes)?;
        let file = tail
            .file
            .try_clone()
            .map_err(|e| WalError::io("clone segment handle", e))?;
        let mut encoder = Encoder::new(file, 0, 0);
        encoder.encode(RecordType::Crc, &[])?;
        encoder.encode(RecordType::Metadata, &metadata)?;

        let wal = Self {
            dir: dir.clone(),
            options,
            inner: Mutex::new(Inner {
                dir_file: None,
                metadata,
                state: HardState::default(),
                start: SnapshotMarker::default(),
                last_index: 0,
                decoder: None,
                encoder: Some(encoder),
                locks: vec![tail],
                pipeline: None,
                unsafe_no_sync: false,
            }),
        };
        wal.save_snapshot(SnapshotMarker::default())?;

        std::fs::rename(&tmp, &dir).map_err(|e| WalError::io("rename wal dir", e))?;
        {
            let mut inner = wal.inner.lock();
            inner.locks[0].path = dir.join(segment_name(0, 0));
            inner.pipeline = Some(FilePipeline::new(
                dir.clone(),
                wal.options.segment_size_bytes,
            ));
            inner.dir_file = Some(File::open(&dir).map_err(|e| WalError::io("open dir", e))?);
        }

        // The rename is not durable until the parent directory is synced.
        if let Err(e) = wal.fsync_dir_timed(parent_of(&dir)) {
            drop(wal);
            quarantine_broken(&dir);
            return Err(e);
        }

        info!(dir = %dir.display(), "created WAL");
        Ok(wal)
    }

    /// Opens the WAL at `snap` for appending. The returned WAL is in read
    /// mode; [`Wal::read_all`] must complete before any write.
    ///
    /// # Errors
    /// Fails with [`WalError::FileNotFound`] if no contiguous run of
    /// segments covers `snap.index`, or with an I/O error if any segment in
    /// the run cannot be exclusively locked.
    pub fn open(dir: impl Into<PathBuf>, snap: SnapshotMarker) -> WalResult<Self> {
        Self::open_with(WalOptions::default(), dir, snap)
    }

    /// [`Wal::open`] with explicit options.
    ///
    /// # Errors
    /// See [`Wal::open`].
    pub fn open_with(
        options: WalOptions,
        dir: impl Into<PathBuf>,
        snap: SnapshotMarker,
    ) -> WalResult<Self> {
        Self::open_at(options, dir.into(), snap, true)
    }

    /// Opens the WAL at `snap` for reading only. No locks are taken and
    /// appending is disallowed.
    ///
    /// # Errors
    /// See [`Wal::open`].
    pub fn open_for_read(dir: impl Into<PathBuf>, snap: SnapshotMarker) -> WalResult<Self> {
        Self::open_for_read_with(WalOptions::default(), dir, snap)
    }

    /// [`Wal::open_for_read`] with explicit options.
    ///
    /// # Errors
    /// See [`Wal::open`].
    pub fn open_for_read_with(
        options: WalOptions,
        dir: impl Into<PathBuf>,
        snap: SnapshotMarker,
    ) -> WalResult<Self> {
        Self::open_at(options, dir.into(), snap, false)
    }

    fn open_at(
        options: WalOptions,
        dir: PathBuf,
        snap: SnapshotMarker,
        write: bool,
    ) -> WalResult<Self> {
        let (names, name_index) = select_segments(&dir, snap)?;
        let (readers, locks) = open_segments(&dir, &names[name_index..], write)?;
        let decoder = Decoder::new(readers, options.max_record_size);

        let (dir_file, pipeline) = if write {
            (
                Some(File::open(&dir).map_err(|e| WalError::io("open dir", e))?),
                Some(FilePipeline::new(dir.clone(), options.segment_size_bytes)),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            dir,
            options,
            inner: Mutex::new(Inner {
                dir_file,
                metadata: Bytes::new(),
                state: HardState::default(),
                start: snap,
                last_index: 0,
                decoder: Some(decoder),
                encoder: None,
                locks,
                pipeline,
                unsafe_no_sync: false,
            }),
        })
    }

    /// Disables fdatasync. Encoded bytes are unchanged; only durability
    /// semantics differ. Testing only.
    pub fn set_unsafe_no_sync(&self) {
        self.inner.lock().unsafe_no_sync = true;
    }

    /// Replays every record after the opening snapshot and transitions the
    /// WAL from read mode to append mode.
    ///
    /// In read-only mode a torn tail is tolerated and replay stops at the
    /// last intact record. In write mode a torn tail is returned as
    /// [`WalError::TornTail`], repairable once via [`repair`].
    ///
    /// # Errors
    /// [`WalError::NotInReadMode`] if replay already ran,
    /// [`WalError::SnapshotNotFound`] if no marker matches the opening
    /// snapshot, [`WalError::MetadataConflict`] /
    /// [`WalError::CrcMismatch`] / [`WalError::UnexpectedRecordType`] on a
    /// corrupt stream.
    ///
    /// [`repair`]: crate::repair
    pub fn read_all(&self) -> WalResult<Replay> {
        let mut inner = self.inner.lock();
        let mut decoder = inner.decoder.take().ok_or(WalError::NotInReadMode)?;

        let mut metadata: Option<Bytes> = None;
        let mut state = HardState::default();
        let mut entries: Vec<Entry> = Vec::new();
        let mut custom_records: Vec<Box<dyn CustomRecord>> = Vec::new();
        let mut matched = false;

        let terminal: Option<WalError> = loop {
            let rec = match decoder.decode() {
                Ok(Some(rec)) => rec,
                Ok(None) => break None,
                Err(e) => break Some(e),
            };
            match rec.rtype {
                RecordType::Entry => {
                    let entry = Entry::must_unmarshal(&rec.data);
                    let index = entry.index;
                    if index > inner.start.index {
                        // Rewind is allowed: a later entry at an already
                        // buffered index supersedes it (leader change). A
                        // forward gap cannot be represented.
                        let up = (index - inner.start.index - 1) as usize;
                        if up > entries.len() {
                            return Err(WalError::SliceOutOfRange {
                                index,
                                start: inner.start.index,
                                buffered: entries.len() as u64,
                            });
                        }
                        entries.truncate(up);
                        entries.push(entry);
                    }
                    inner.last_index = index;
                }
                RecordType::State => state = HardState::must_unmarshal(&rec.data),
                RecordType::Metadata => match &metadata {
                    Some(prev) if *prev != rec.data => return Err(WalError::MetadataConflict),
                    Some(_) => {}
                    None => metadata = Some(rec.data.clone()),
                },
                RecordType::Crc => decoder.verify_seed(&rec)?,
                RecordType::Snapshot => {
                    let marker = SnapshotMarker::must_unmarshal(&rec.data);
                    if marker.index == inner.start.index {
                        matched = true;
                    }
                }
                RecordType::Custom(tag) => {
                    let Some(handler) = self.options.registry.handler(tag) else {
                        return Err(WalError::UnexpectedRecordType { tag });
                    };
                    custom_records.push(handler.unmarshal(&rec.data)?);
                }
            }
        };

        let write_mode = !inner.locks.is_empty();
        match terminal {
            None => {}
            Some(WalError::TornTail { .. }) if !write_mode => {}
            Some(err) => return Err(err),
        }

        // Clean EOF in write mode: the zero region past the tail may still
        // hold non-zero garbage from a torn prior write. Zero it so future
        // records cannot collide with stale bytes under the CRC chain.
        let append_file = if write_mode {
            let tail = inner
                .locks
                .last()
                .expect("write-mode WAL holds locked segments");
            let mut file = tail
                .file
                .try_clone()
                .map_err(|e| WalError::io("clone segment handle", e))?;
            zero_to_end(&mut file, decoder.last_offset())?;
            Some(file)
        } else {
            None
        };

        if !matched {
            return Err(WalError::SnapshotNotFound {
                index: inner.start.index,
            });
        }

        let metadata = metadata.unwrap_or_default();
        inner.metadata = metadata.clone();
        inner.state = state;
        inner.start = SnapshotMarker::default();
        if let Some(file) = append_file {
            inner.encoder = Some(Encoder::new(file, decoder.last_crc(), decoder.last_offset()));
        }

        Ok(Replay {
            metadata,
            hard_state: state,
            entries,
            custom_records,
        })
    }

    /// Appends `entries` and, when `state.committed` is non-zero and
    /// changed, a hard-state record; then syncs, cutting to a new segment
    /// if the tail crossed its nominal size.
    ///
    /// By the time this returns, the entries are durable in index order.
    ///
    /// # Errors
    /// Returns an I/O error if encoding or syncing fails; the caller should
    /// treat the WAL as inconsistent afterwards.
    ///
    /// # Panics
    /// Panics if the WAL is not in append mode.
    pub fn save(&self, state: HardState, entries: &[Entry]) -> WalResult<()> {
        if entries.is_empty() && state.committed == 0 {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        for entry in entries {
            Self::append_entry(&mut inner, entry)?;
        }
        Self::append_state(&mut inner, state)?;
        self.sync_or_cut(&mut inner)
    }

    /// [`Wal::save`] with no entries.
    ///
    /// # Errors
    /// See [`Wal::save`].
    pub fn save_state(&self, state: HardState) -> WalResult<()> {
        self.save(state, &[])
    }

    /// Appends a snapshot marker and syncs.
    ///
    /// # Errors
    /// See [`Wal::save`].
    ///
    /// # Panics
    /// Panics if the WAL is not in append mode.
    pub fn save_snapshot(&self, marker: SnapshotMarker) -> WalResult<()> {
        let data = marker.marshal();
        let mut inner = self.inner.lock();
        Self::encoder_mut(&mut inner).encode(RecordType::Snapshot, &data)?;
        if inner.last_index < marker.index {
            inner.last_index = marker.index;
        }
        self.sync_locked(&mut inner)
    }

    /// Appends a batch of custom records under the registered `tag`,
    /// mirroring [`Wal::save`]'s sync-or-cut behavior.
    ///
    /// # Errors
    /// [`WalError::UnregisteredType`] if `tag` has no handler,
    /// [`WalError::TypeMismatch`] if an item reports a different tag.
    ///
    /// # Panics
    /// Panics if the WAL is not in append mode.
    pub fn save_records(&self, tag: i64, records: &[Box<dyn CustomRecord>]) -> WalResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        if !self.options.registry.is_registered(tag) {
            return Err(WalError::UnregisteredType { tag });
        }
        for record in records {
            let actual = record.record_tag();
            if actual != tag {
                return Err(WalError::TypeMismatch {
                    expected: tag,
                    actual,
                });
            }
        }

        let mut inner = self.inner.lock();
        for record in records {
            let data = record.marshal();
            Self::encoder_mut(&mut inner).encode(RecordType::Custom(tag), &data)?;
        }
        self.sync_or_cut(&mut inner)
    }

    /// Releases locks on segments older than the one covering `index`,
    /// keeping the straddling segment and everything after it.
    ///
    /// # Errors
    /// Returns an error if a held segment name fails to parse.
    pub fn release_lock_to(&self, index: u64) -> WalResult<()> {
        let mut inner = self.inner.lock();
        if inner.locks.is_empty() {
            return Ok(());
        }

        let mut keep_from = None;
        for (i, lock) in inner.locks.iter().enumerate() {
            let (_, first_index) = parse_segment_name(lock.name())?;
            if first_index >= index {
                // The previous segment straddles `index`; keep it.
                keep_from = Some(i.saturating_sub(1));
                break;
            }
        }
        // Nothing starts at or above `index`: everything but the tail is
        // releasable.
        let keep_from = keep_from.unwrap_or(inner.locks.len() - 1);

        // Dropping closes the descriptors, releasing the locks in order.
        inner.locks.drain(..keep_from);
        Ok(())
    }

    /// Flushes buffered records and fdatasyncs the tail.
    ///
    /// # Errors
    /// Returns an I/O error if the flush or sync fails.
    pub fn sync(&self) -> WalResult<()> {
        let mut inner = self.inner.lock();
        self.sync_locked(&mut inner)
    }

    /// Syncs the tail, releases every lock in order, closes the directory,
    /// and drains the file pipeline.
    ///
    /// # Errors
    /// Returns an I/O error if the final sync fails; locks are still
    /// released.
    pub fn close(self) -> WalResult<()> {
        let Self { options, inner, .. } = self;
        let mut inner = inner.into_inner();

        let result = if inner.encoder.is_some() {
            Self::sync_inner(&options, &mut inner)
        } else {
            Ok(())
        };

        inner.locks.clear();
        inner.dir_file = None;

        // Joining the producer removes any pending spare file.
        inner.pipeline = None;

        result
    }

    fn append_entry(inner: &mut Inner, entry: &Entry) -> WalResult<()> {
        let data = entry.marshal();
        Self::encoder_mut(inner).encode(RecordType::Entry, &data)?;
        inner.last_index = entry.index;
        Ok(())
    }

    fn append_state(inner: &mut Inner, state: HardState) -> WalResult<()> {
        if state.committed == 0 || state.committed == inner.state.committed {
            return Ok(());
        }
        inner.state = state;
        let data = state.marshal();
        Self::encoder_mut(inner).encode(RecordType::State, &data)
    }

    fn encoder_mut(inner: &mut Inner) -> &mut Encoder {
        inner
            .encoder
            .as_mut()
            .expect("WAL is not in append mode; complete read_all before writing")
    }

    fn sync_or_cut(&self, inner: &mut Inner) -> WalResult<()> {
        if Self::encoder_mut(inner).offset() < self.options.segment_size_bytes {
            self.sync_locked(inner)
        } else {
            self.cut_locked(inner)
        }
    }

    fn sync_locked(&self, inner: &mut Inner) -> WalResult<()> {
        Self::sync_inner(&self.options, inner)
    }

    fn sync_inner(options: &WalOptions, inner: &mut Inner) -> WalResult<()> {
        let Some(encoder) = inner.encoder.as_mut() else {
            return Ok(());
        };
        encoder.flush()?;
        if inner.unsafe_no_sync {
            return Ok(());
        }

        let start = Instant::now();
        encoder
            .file()
            .sync_data()
            .map_err(|e| WalError::io("fdatasync", e))?;
        let took = start.elapsed();
        if took > WARN_SYNC_DURATION {
            warn!(took_ms = took.as_millis() as u64, "slow fdatasync");
        }
        options.metrics.observe_fsync(took);
        Ok(())
    }

    /// Seals the tail and activates the next segment. Fsync-critical
    /// ordering: truncate + sync the old tail, write + sync the new tail's
    /// header under its temp name, then rename and fsync the directory.
    fn cut_locked(&self, inner: &mut Inner) -> WalResult<()> {
        {
            let encoder = Self::encoder_mut(inner);
            encoder.flush()?;
            let offset = encoder.offset();
            // Discard the unused preallocated region of the sealed tail.
            encoder
                .file()
                .set_len(offset)
                .map_err(|e| WalError::io("truncate segment", e))?;
        }
        self.sync_locked(inner)?;

        let target = self
            .dir
            .join(segment_name(Self::tail_seq(inner) + 1, inner.last_index + 1));

        let pipeline = inner
            .pipeline
            .as_ref()
            .expect("append-mode WAL runs a file pipeline");
        let new_tail = pipeline.open()?;
        let file = new_tail
            .file
            .try_clone()
            .map_err(|e| WalError::io("clone segment handle", e))?;
        let prev_crc = Self::encoder_mut(inner).crc();
        inner.locks.push(new_tail);
        inner.encoder = Some(Encoder::new(file, prev_crc, 0));

        let metadata = inner.metadata.clone();
        let state_data = inner.state.marshal();
        {
            let encoder = Self::encoder_mut(inner);
            encoder.encode(RecordType::Crc, &[])?;
            encoder.encode(RecordType::Metadata, &metadata)?;
            encoder.encode(RecordType::State, &state_data)?;
        }
        self.sync_locked(inner)?;

        // Activate under the canonical name. The descriptor and its
        // advisory lock survive the rename; only the recorded path changes.
        let tmp_path = inner
            .locks
            .last()
            .expect("new tail was just pushed")
            .path
            .clone();
        std::fs::rename(&tmp_path, &target).map_err(|e| WalError::io("rename segment", e))?;

        let start = Instant::now();
        inner
            .dir_file
            .as_ref()
            .expect("append-mode WAL holds the directory")
            .sync_all()
            .map_err(|e| WalError::io("fsync dir", e))?;
        self.options.metrics.observe_fsync(start.elapsed());

        inner
            .locks
            .last_mut()
            .expect("new tail was just pushed")
            .path = target.clone();

        info!(path = %target.display(), "created a new WAL segment");
        Ok(())
    }

    fn tail_seq(inner: &Inner) -> u64 {
        let tail = inner
            .locks
            .last()
            .expect("append-mode WAL holds locked segments");
        let (seq, _) = parse_segment_name(tail.name()).expect("tail segment name is canonical");
        seq
    }

    fn fsync_dir_timed(&self, dir: &Path) -> WalResult<()> {
        let start = Instant::now();
        fsync_dir(dir)?;
        self.options.metrics.observe_fsync(start.elapsed());
        Ok(())
    }
}

/// Returns true if a WAL directory is present at `dir`.
#[must_use]
pub fn exists(dir: &Path) -> bool {
    dir.exists()
}

/// Re-validates the CRC chain of the WAL at `dir` and confirms the marker
/// for `snap` is present, without taking any locks or mutating anything.
///
/// # Errors
/// [`WalError::CrcMismatch`] or [`WalError::MetadataConflict`] on a corrupt
/// stream, [`WalError::SnapshotNotFound`] if the marker is missing.
pub fn verify(dir: &Path, snap: SnapshotMarker) -> WalResult<()> {
    let (names, name_index) = select_segments(dir, snap)?;
    let (readers, _locks) = open_segments(dir, &names[name_index..], false)?;
    let mut decoder = Decoder::new(readers, RECORD_SIZE_BYTES_MAX_DEFAULT);

    let mut metadata: Option<Bytes> = None;
    let mut matched = false;
    loop {
        let rec = match decoder.decode() {
            Ok(Some(rec)) => rec,
            Ok(None) => break,
            // A torn tail is acceptable in a read-only scan.
            Err(WalError::TornTail { .. }) => break,
            Err(e) => return Err(e),
        };
        match rec.rtype {
            RecordType::Metadata => match &metadata {
                Some(prev) if *prev != rec.data => return Err(WalError::MetadataConflict),
                Some(_) => {}
                None => metadata = Some(rec.data.clone()),
            },
            RecordType::Crc => decoder.verify_seed(&rec)?,
            RecordType::Snapshot => {
                let marker = SnapshotMarker::must_unmarshal(&rec.data);
                if marker.index == snap.index {
                    matched = true;
                }
            }
            // Entry, state, and custom payloads are already covered by the
            // running CRC; their contents are not needed for verification.
            RecordType::Entry | RecordType::State | RecordType::Custom(_) => {}
        }
    }

    if !matched {
        return Err(WalError::SnapshotNotFound { index: snap.index });
    }
    Ok(())
}

/// Returns every snapshot marker in `dir` whose index is at or below the
/// committed index of the final hard state. Those are the snapshots
/// consensus has durably committed, and they are safe to load.
///
/// Opens the segments read-only, so it does not conflict with a live
/// writer.
///
/// # Errors
/// Returns an error if the directory cannot be enumerated or the stream is
/// corrupt before its tail.
pub fn valid_snapshot_entries(dir: &Path) -> WalResult<Vec<SnapshotMarker>> {
    let names = read_segment_names(dir)?;
    let (readers, _locks) = open_segments(dir, &names, false)?;
    let mut decoder = Decoder::new(readers, RECORD_SIZE_BYTES_MAX_DEFAULT);

    let mut snaps = Vec::new();
    let mut state = HardState::default();
    loop {
        let rec = match decoder.decode() {
            Ok(Some(rec)) => rec,
            Ok(None) => break,
            Err(WalError::TornTail { .. }) => break,
            Err(e) => return Err(e),
        };
        match rec.rtype {
            RecordType::Snapshot => snaps.push(SnapshotMarker::must_unmarshal(&rec.data)),
            RecordType::State => state = HardState::must_unmarshal(&rec.data),
            RecordType::Crc => decoder.verify_seed(&rec)?,
            _ => {}
        }
    }

    snaps.retain(|s| s.index <= state.committed);
    Ok(snaps)
}

/// `<dir><suffix>` as a sibling path of `dir`.
fn sibling_path(dir: &Path, suffix: &str) -> PathBuf {
    let mut os = dir.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn parent_of(dir: &Path) -> &Path {
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Moves a half-created directory aside so the next create starts clean.
fn quarantine_broken(dir: &Path) {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or_default();
    let broken = sibling_path(dir, &format!(".broken.{micros}"));
    match std::fs::rename(dir, &broken) {
        Ok(()) => warn!(dir = %broken.display(), "moved broken WAL directory aside"),
        Err(e) => error!(dir = %dir.display(), error = %e, "failed to quarantine broken WAL directory"),
    }
}
