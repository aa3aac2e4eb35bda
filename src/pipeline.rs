//! Background segment pre-creation.
//!
//! Cutting to a new segment must not pay allocation latency on the write
//! path, so a dedicated thread keeps exactly one preallocated, locked temp
//! file ready and hands it over through a rendezvous channel. The temp
//! names alternate between `0.tmp` and `1.tmp`; whichever file is pending
//! at shutdown is removed.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::dir::{remove_quietly, LockedFile};
use crate::error::{WalError, WalResult};

/// Hands preallocated segment files from a producer thread to `cut`.
pub(crate) struct FilePipeline {
    rx: Option<Receiver<WalResult<LockedFile>>>,
    handle: Option<JoinHandle<()>>,
}

impl FilePipeline {
    /// Starts the producer for `dir`, preallocating `size` bytes per file.
    pub(crate) fn new(dir: PathBuf, size: u64) -> Self {
        let (tx, rx) = std::sync::mpsc::sync_channel(0);
        let handle = std::thread::Builder::new()
            .name("wal-filepipeline".to_owned())
            .spawn(move || run(&dir, size, &tx))
            .expect("failed to spawn wal-filepipeline thread");
        Self {
            rx: Some(rx),
            handle: Some(handle),
        }
    }

    /// Takes the pending preallocated file, blocking until one is ready.
    pub(crate) fn open(&self) -> WalResult<LockedFile> {
        let rx = self.rx.as_ref().expect("file pipeline is running");
        rx.recv().map_err(|_| {
            WalError::io(
                "file pipeline",
                std::io::Error::other("pipeline producer stopped"),
            )
        })?
    }
}

impl Drop for FilePipeline {
    fn drop(&mut self) {
        // Closing the channel unblocks the producer, which cleans up the
        // pending file before exiting.
        drop(self.rx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("wal-filepipeline thread panicked");
            }
        }
    }
}

fn run(dir: &Path, size: u64, tx: &SyncSender<WalResult<LockedFile>>) {
    let mut count = 0u64;
    loop {
        let path = dir.join(format!("{}.tmp", count % 2));
        count += 1;

        let result = LockedFile::create(path, size);
        let failed = result.is_err();
        match tx.send(result) {
            // An allocation error has been delivered; stop producing.
            Ok(()) if failed => return,
            Ok(()) => {}
            Err(send_error) => {
                if let Ok(pending) = send_error.0 {
                    debug!(path = %pending.path.display(), "discarding pending segment file");
                    remove_quietly(&pending.path);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_hands_over_preallocated_files() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FilePipeline::new(dir.path().to_owned(), 4096);

        let first = pipeline.open().unwrap();
        let second = pipeline.open().unwrap();

        assert_ne!(first.path, second.path);
        assert_eq!(first.file.metadata().unwrap().len(), 4096);
        assert_eq!(second.file.metadata().unwrap().len(), 4096);
    }

    #[test]
    fn test_drop_removes_pending_file() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FilePipeline::new(dir.path().to_owned(), 1024);

        // Take one file and give it away, the way cut renames its handout.
        let taken = pipeline.open().unwrap();
        let renamed = dir.path().join("taken.seg");
        std::fs::rename(&taken.path, &renamed).unwrap();

        // Give the producer time to allocate the next spare, then shut down.
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(pipeline);

        let tmp_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(tmp_files.is_empty(), "pending temp files must be removed");
    }
}
