//! Record stream encoder and decoder.
//!
//! The encoder appends framed records to the tail segment through a buffered
//! writer, folding every payload byte into a running CRC32-Castagnoli. The
//! decoder walks the concatenated record stream of one or more segment files
//! and classifies how the stream ends: cleanly (a zero length field or a
//! byte-boundary end of file), with a repairable torn tail, or with inner
//! corruption.
//!
//! Torn-tail classification is explicit rather than inferred from a single
//! sentinel: a record that fails its CRC check is only a torn tail when it
//! sits at the end of the last segment with nothing but zeros (or nothing at
//! all) behind it. A mismatch with further records behind it is corruption.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use bytes::{Bytes, BytesMut};

use crate::error::{WalError, WalResult};
use crate::record::{
    decode_frame_len, decode_record, encode_record, Record, RecordType, FRAME_LEN_SIZE,
    RECORD_OVERHEAD,
};

/// Appends framed records to a segment file.
pub(crate) struct Encoder {
    out: BufWriter<File>,
    buf: BytesMut,
    crc: u32,
    offset: u64,
}

impl Encoder {
    /// Creates an encoder over `file`, which the caller has positioned at
    /// `offset`. The running CRC is seeded with `prev_crc`.
    pub(crate) fn new(file: File, prev_crc: u32, offset: u64) -> Self {
        Self {
            out: BufWriter::new(file),
            buf: BytesMut::with_capacity(4096),
            crc: prev_crc,
            offset,
        }
    }

    /// Encodes one record and buffers its frame.
    ///
    /// The record's stored CRC is the running CRC after folding `data`, so a
    /// [`RecordType::Crc`] record (whose data is empty) carries exactly the
    /// seed it was constructed with.
    pub(crate) fn encode(&mut self, rtype: RecordType, data: &[u8]) -> WalResult<()> {
        self.crc = crc32c::crc32c_append(self.crc, data);

        self.buf.clear();
        encode_record(&mut self.buf, rtype.tag(), self.crc, data);
        self.out
            .write_all(&self.buf)
            .map_err(|e| WalError::io("write record", e))?;
        self.offset += self.buf.len() as u64;
        Ok(())
    }

    /// Drains buffered frames to the file.
    pub(crate) fn flush(&mut self) -> WalResult<()> {
        self.out.flush().map_err(|e| WalError::io("flush", e))
    }

    /// The current running CRC.
    pub(crate) fn crc(&self) -> u32 {
        self.crc
    }

    /// Absolute file offset just past the last buffered frame.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// The underlying segment file.
    pub(crate) fn file(&self) -> &File {
        self.out.get_ref()
    }
}

/// Reads framed records from an ordered chain of segment files.
pub(crate) struct Decoder {
    readers: Vec<BufReader<File>>,
    index: usize,
    crc: u32,
    last_offset: u64,
    max_record_size: u64,
}

impl Decoder {
    /// Creates a decoder over `files`, ordered oldest segment first.
    pub(crate) fn new(files: Vec<File>, max_record_size: u64) -> Self {
        Self {
            readers: files.into_iter().map(BufReader::new).collect(),
            index: 0,
            crc: 0,
            last_offset: 0,
            max_record_size,
        }
    }

    /// Decodes the next record.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly: a zero length field
    /// (the writable tail) or a byte-boundary end of the last file.
    ///
    /// # Errors
    /// [`WalError::TornTail`] for a repairable partial tail record,
    /// [`WalError::CrcMismatch`]/[`WalError::Corrupt`] for inner damage,
    /// [`WalError::RecordTooLarge`] for an oversize frame.
    pub(crate) fn decode(&mut self) -> WalResult<Option<Record>> {
        let mut header = [0u8; FRAME_LEN_SIZE as usize];
        let n = loop {
            let Some(reader) = self.readers.get_mut(self.index) else {
                return Ok(None);
            };
            let n = read_full(reader, &mut header)?;
            if n == 0 {
                // Byte-boundary end of this segment; move to the next.
                self.index += 1;
                self.last_offset = 0;
                continue;
            }
            break n;
        };

        if n < header.len() {
            return Err(self.structural_failure("partial frame length field"));
        }

        let field = u64::from_le_bytes(header);
        if field == 0 {
            if self.at_tail() {
                return Ok(None);
            }
            return Err(self.structural_failure("zero length field before the tail segment"));
        }

        let (payload_len, pad) = decode_frame_len(field);
        if payload_len < RECORD_OVERHEAD {
            return Err(self.structural_failure("frame shorter than a record header"));
        }
        if payload_len - RECORD_OVERHEAD > self.max_record_size {
            return Err(WalError::RecordTooLarge {
                size: payload_len - RECORD_OVERHEAD,
                max: self.max_record_size,
            });
        }

        let framed = payload_len + pad;
        let mut payload = vec![0u8; framed as usize];
        let reader = &mut self.readers[self.index];
        let n = read_full(reader, &mut payload)?;
        if (n as u64) < framed {
            return Err(self.structural_failure("partial record payload"));
        }
        payload.truncate(payload_len as usize);

        let rec = decode_record(Bytes::from(payload));

        // Crc records are verified against the running CRC by the replay
        // loop before re-seeding; all other records are verified here.
        if rec.rtype != RecordType::Crc {
            self.crc = crc32c::crc32c_append(self.crc, &rec.data);
            if rec.crc != self.crc {
                return Err(self.crc_failure(self.crc, rec.crc));
            }
        }

        self.last_offset += FRAME_LEN_SIZE + framed;
        Ok(Some(rec))
    }

    /// Byte offset, within the current segment file, just past the last
    /// intact frame.
    pub(crate) fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// The running CRC at [`Self::last_offset`].
    pub(crate) fn last_crc(&self) -> u32 {
        self.crc
    }

    /// Re-seeds the running CRC at a segment boundary.
    pub(crate) fn update_crc(&mut self, seed: u32) {
        self.crc = seed;
    }

    /// Verifies a [`RecordType::Crc`] record against the running CRC, then
    /// re-seeds the chain with the record's stored value.
    ///
    /// A zero running CRC means a fresh decoder and accepts any seed.
    pub(crate) fn verify_seed(&mut self, rec: &Record) -> WalResult<()> {
        let running = self.crc;
        if running != 0 && rec.crc != running {
            return Err(WalError::CrcMismatch {
                offset: self.last_offset,
                expected: running,
                actual: rec.crc,
            });
        }
        self.update_crc(rec.crc);
        Ok(())
    }

    fn at_tail(&self) -> bool {
        self.index + 1 >= self.readers.len()
    }

    /// Classifies a structurally damaged frame: a torn tail when it sits in
    /// the last segment, corruption otherwise.
    fn structural_failure(&self, reason: &'static str) -> WalError {
        if self.at_tail() {
            WalError::TornTail {
                offset: self.last_offset,
            }
        } else {
            WalError::Corrupt {
                offset: self.last_offset,
                reason,
            }
        }
    }

    /// Classifies a CRC mismatch by looking one length field ahead: a
    /// mismatched record followed by nothing but zeros (or nothing at all)
    /// in the last segment is a torn tail; anything else is corruption.
    fn crc_failure(&mut self, expected: u32, actual: u32) -> WalError {
        let mismatch = WalError::CrcMismatch {
            offset: self.last_offset,
            expected,
            actual,
        };
        if !self.at_tail() {
            return mismatch;
        }
        let mut probe = [0u8; FRAME_LEN_SIZE as usize];
        match read_full(&mut self.readers[self.index], &mut probe) {
            Ok(n) if n < probe.len() => WalError::TornTail {
                offset: self.last_offset,
            },
            Ok(_) if probe == [0u8; 8] => WalError::TornTail {
                offset: self.last_offset,
            },
            Ok(_) => mismatch,
            Err(_) => WalError::TornTail {
                offset: self.last_offset,
            },
        }
    }
}

/// Reads until `buf` is full or the reader is exhausted; returns the number
/// of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> WalResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(WalError::io("read record", e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    use crate::limits::RECORD_SIZE_BYTES_MAX_DEFAULT;

    fn temp_file() -> File {
        tempfile::tempfile().expect("failed to create temp file")
    }

    fn reopen_for_read(file: &File) -> File {
        let mut clone = file.try_clone().expect("failed to clone file");
        clone.seek(SeekFrom::Start(0)).expect("failed to seek");
        clone
    }

    #[test]
    fn test_encode_decode_chain() {
        let file = temp_file();
        let mut enc = Encoder::new(file.try_clone().unwrap(), 0, 0);

        enc.encode(RecordType::Crc, &[]).unwrap();
        enc.encode(RecordType::Metadata, b"meta").unwrap();
        enc.encode(RecordType::Entry, b"payload-1").unwrap();
        enc.encode(RecordType::Entry, b"payload-two").unwrap();
        enc.flush().unwrap();

        let mut dec = Decoder::new(vec![reopen_for_read(&file)], RECORD_SIZE_BYTES_MAX_DEFAULT);

        let crc_rec = dec.decode().unwrap().unwrap();
        assert_eq!(crc_rec.rtype, RecordType::Crc);
        assert_eq!(crc_rec.crc, 0);
        dec.update_crc(crc_rec.crc);

        let meta = dec.decode().unwrap().unwrap();
        assert_eq!(meta.rtype, RecordType::Metadata);
        assert_eq!(&meta.data[..], b"meta");

        let e1 = dec.decode().unwrap().unwrap();
        assert_eq!(&e1.data[..], b"payload-1");
        let e2 = dec.decode().unwrap().unwrap();
        assert_eq!(&e2.data[..], b"payload-two");

        assert!(dec.decode().unwrap().is_none());
        assert_eq!(dec.last_crc(), enc.crc());
        assert_eq!(dec.last_offset(), enc.offset());
    }

    #[test]
    fn test_zero_length_field_ends_stream() {
        let file = temp_file();
        let mut enc = Encoder::new(file.try_clone().unwrap(), 0, 0);
        enc.encode(RecordType::Entry, b"only").unwrap();
        enc.flush().unwrap();

        // Preallocated tail: a run of zeros after the last record.
        let mut f = file.try_clone().unwrap();
        f.seek(SeekFrom::Start(enc.offset())).unwrap();
        f.write_all(&[0u8; 64]).unwrap();

        let mut dec = Decoder::new(vec![reopen_for_read(&file)], RECORD_SIZE_BYTES_MAX_DEFAULT);
        assert!(dec.decode().unwrap().is_some());
        assert!(dec.decode().unwrap().is_none());
        assert_eq!(dec.last_offset(), enc.offset());
    }

    #[test]
    fn test_partial_tail_record_is_torn() {
        let file = temp_file();
        let mut enc = Encoder::new(file.try_clone().unwrap(), 0, 0);
        enc.encode(RecordType::Entry, b"intact").unwrap();
        let intact_end = enc.offset();
        enc.encode(RecordType::Entry, b"will be cut short").unwrap();
        enc.flush().unwrap();

        // Chop the last record mid-frame.
        file.set_len(enc.offset() - 6).unwrap();

        let mut dec = Decoder::new(vec![reopen_for_read(&file)], RECORD_SIZE_BYTES_MAX_DEFAULT);
        assert!(dec.decode().unwrap().is_some());
        let err = dec.decode().unwrap_err();
        assert!(matches!(err, WalError::TornTail { offset } if offset == intact_end));
    }

    #[test]
    fn test_trailing_garbage_record_is_torn() {
        let file = temp_file();
        let mut enc = Encoder::new(file.try_clone().unwrap(), 0, 0);
        enc.encode(RecordType::Entry, b"intact").unwrap();
        let intact_end = enc.offset();
        enc.encode(RecordType::Entry, b"damaged-entry").unwrap();
        enc.flush().unwrap();

        // Overwrite the final 8 bytes of the last frame with garbage.
        let mut f = file.try_clone().unwrap();
        f.seek(SeekFrom::Start(enc.offset() - 8)).unwrap();
        f.write_all(&[0xAB; 8]).unwrap();

        let mut dec = Decoder::new(vec![reopen_for_read(&file)], RECORD_SIZE_BYTES_MAX_DEFAULT);
        assert!(dec.decode().unwrap().is_some());
        let err = dec.decode().unwrap_err();
        assert!(matches!(err, WalError::TornTail { offset } if offset == intact_end));
    }

    #[test]
    fn test_mid_stream_corruption_is_not_torn() {
        let file = temp_file();
        let mut enc = Encoder::new(file.try_clone().unwrap(), 0, 0);
        enc.encode(RecordType::Entry, b"first-entry").unwrap();
        let first_end = enc.offset();
        enc.encode(RecordType::Entry, b"second-entry").unwrap();
        enc.flush().unwrap();

        // Corrupt the first record's data; the second record stays intact
        // behind it, so this is inner corruption, not a torn tail.
        let mut f = file.try_clone().unwrap();
        f.seek(SeekFrom::Start(first_end - 8)).unwrap();
        f.write_all(&[0xAB; 4]).unwrap();

        let mut dec = Decoder::new(vec![reopen_for_read(&file)], RECORD_SIZE_BYTES_MAX_DEFAULT);
        let err = dec.decode().unwrap_err();
        assert!(matches!(err, WalError::CrcMismatch { .. }));
    }

    #[test]
    fn test_decode_spans_files() {
        let first = temp_file();
        let mut enc = Encoder::new(first.try_clone().unwrap(), 0, 0);
        enc.encode(RecordType::Entry, b"in-first").unwrap();
        enc.flush().unwrap();
        let seed = enc.crc();

        let second = temp_file();
        let mut enc2 = Encoder::new(second.try_clone().unwrap(), seed, 0);
        enc2.encode(RecordType::Crc, &[]).unwrap();
        enc2.encode(RecordType::Entry, b"in-second").unwrap();
        enc2.flush().unwrap();

        let mut dec = Decoder::new(
            vec![reopen_for_read(&first), reopen_for_read(&second)],
            RECORD_SIZE_BYTES_MAX_DEFAULT,
        );

        assert_eq!(&dec.decode().unwrap().unwrap().data[..], b"in-first");
        let boundary = dec.decode().unwrap().unwrap();
        assert_eq!(boundary.rtype, RecordType::Crc);
        assert_eq!(boundary.crc, dec.last_crc());
        dec.update_crc(boundary.crc);
        assert_eq!(&dec.decode().unwrap().unwrap().data[..], b"in-second");
        assert!(dec.decode().unwrap().is_none());
    }

    #[test]
    fn test_oversize_record_rejected() {
        let file = temp_file();
        let mut enc = Encoder::new(file.try_clone().unwrap(), 0, 0);
        enc.encode(RecordType::Entry, &[7u8; 256]).unwrap();
        enc.flush().unwrap();

        let mut dec = Decoder::new(vec![reopen_for_read(&file)], 64);
        let err = dec.decode().unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge { size: 256, max: 64 }));
    }
}
