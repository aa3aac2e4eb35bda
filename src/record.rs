//! Framed record format.
//!
//! Every durable unit in the log is a record with the following on-disk
//! frame:
//!
//! ```text
//! +---------------+----------------------------------+-------------+
//! | Length        | Payload                          | Padding     |
//! | (8 bytes, LE) |                                  | (0-7 bytes) |
//! +---------------+----------------------------------+-------------+
//!
//! Payload:
//! +---------------+---------------+------------------+
//! |  Type         |  CRC32-C      |  Data            |
//! | (8 bytes, LE) | (4 bytes, LE) | (N bytes)        |
//! +---------------+---------------+------------------+
//! ```
//!
//! Frames are padded to an 8-byte boundary. The length field's low 56 bits
//! carry the payload length; when padding is present, bit 63 is set and bits
//! 56..59 carry the pad width. A length field of zero marks the writable
//! tail of the log.
//!
//! The `crc` field carries the running CRC32-Castagnoli of every payload
//! byte written so far, so each record seals the whole stream before it. A
//! `Crc` record carries no data; its `crc` field re-seeds the chain at a
//! segment boundary with the previous segment's terminal CRC.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame length field in bytes.
pub const FRAME_LEN_SIZE: u64 = 8;

/// Fixed payload bytes before the data: type (8) + crc (4).
pub const RECORD_OVERHEAD: u64 = 12;

/// Smallest tag usable for caller-defined record types.
pub const CUSTOM_TAG_MIN: i64 = 6;

const LEN_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;
const PAD_FLAG: u64 = 1 << 63;

/// The kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Opaque metadata, written as the first non-crc record of every segment.
    Metadata,
    /// A replicated log entry.
    Entry,
    /// A hard-state update (term, vote, committed).
    State,
    /// A CRC chain seed at a segment boundary.
    Crc,
    /// A snapshot marker.
    Snapshot,
    /// A caller-defined record; tags below [`CUSTOM_TAG_MIN`] are reserved.
    Custom(i64),
}

impl RecordType {
    /// Returns the on-disk tag for this type.
    #[must_use]
    pub const fn tag(self) -> i64 {
        match self {
            Self::Metadata => 1,
            Self::Entry => 2,
            Self::State => 3,
            Self::Crc => 4,
            Self::Snapshot => 5,
            Self::Custom(tag) => tag,
        }
    }

    /// Maps an on-disk tag back to a record type.
    ///
    /// Tags outside the built-in range are returned as [`RecordType::Custom`]
    /// and resolved against the registry during replay.
    #[must_use]
    pub const fn from_tag(tag: i64) -> Self {
        match tag {
            1 => Self::Metadata,
            2 => Self::Entry,
            3 => Self::State,
            4 => Self::Crc,
            5 => Self::Snapshot,
            other => Self::Custom(other),
        }
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record kind.
    pub rtype: RecordType,
    /// Running CRC32-Castagnoli stored with the record. For [`RecordType::Crc`]
    /// records this is the chain seed; for all others it seals the payload
    /// stream up to and including this record's data.
    pub crc: u32,
    /// Opaque record data. Empty for [`RecordType::Crc`] records.
    pub data: Bytes,
}

/// Returns the number of zero bytes needed to pad `payload_len` to an
/// 8-byte boundary.
#[must_use]
pub const fn pad_len(payload_len: u64) -> u64 {
    (8 - (payload_len & 7)) & 7
}

/// Encodes a frame length field for a payload of `payload_len` bytes.
#[must_use]
pub const fn encode_frame_len(payload_len: u64) -> u64 {
    let pad = pad_len(payload_len);
    if pad == 0 {
        payload_len
    } else {
        payload_len | PAD_FLAG | (pad << 56)
    }
}

/// Decodes a frame length field into `(payload_len, pad_len)`.
#[must_use]
pub const fn decode_frame_len(field: u64) -> (u64, u64) {
    if field & PAD_FLAG == 0 {
        (field, 0)
    } else {
        (field & LEN_MASK, (field >> 56) & 0x7)
    }
}

/// Serializes one record frame into `buf`.
pub fn encode_record(buf: &mut BytesMut, tag: i64, crc: u32, data: &[u8]) {
    let payload_len = RECORD_OVERHEAD + data.len() as u64;
    buf.put_u64_le(encode_frame_len(payload_len));
    buf.put_i64_le(tag);
    buf.put_u32_le(crc);
    buf.put_slice(data);
    buf.put_bytes(0, pad_len(payload_len) as usize);
}

/// Deserializes a record payload (frame length already consumed).
///
/// The caller guarantees `payload` holds at least [`RECORD_OVERHEAD`] bytes.
#[must_use]
pub fn decode_record(mut payload: Bytes) -> Record {
    let tag = payload.get_i64_le();
    let crc = payload.get_u32_le();
    Record {
        rtype: RecordType::from_tag(tag),
        crc,
        data: payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len_roundtrip() {
        for payload_len in [12u64, 13, 15, 16, 20, 1024, 1029] {
            let field = encode_frame_len(payload_len);
            let (len, pad) = decode_frame_len(field);
            assert_eq!(len, payload_len);
            assert_eq!((len + pad) % 8, 0, "frame must be 8-byte aligned");
        }
    }

    #[test]
    fn test_aligned_payload_has_no_pad_flag() {
        let field = encode_frame_len(16);
        assert_eq!(field, 16);
    }

    #[test]
    fn test_record_roundtrip() {
        let mut buf = BytesMut::new();
        encode_record(&mut buf, RecordType::Entry.tag(), 0x1234_5678, b"hello");
        assert_eq!(buf.len() % 8, 0);

        let mut frame = buf.freeze();
        let (len, _pad) = decode_frame_len(frame.get_u64_le());
        let payload = frame.split_to(len as usize);
        let rec = decode_record(payload);

        assert_eq!(rec.rtype, RecordType::Entry);
        assert_eq!(rec.crc, 0x1234_5678);
        assert_eq!(&rec.data[..], b"hello");
    }

    #[test]
    fn test_custom_tag_mapping() {
        assert_eq!(RecordType::from_tag(4), RecordType::Crc);
        assert_eq!(RecordType::from_tag(9), RecordType::Custom(9));
        assert_eq!(RecordType::Custom(9).tag(), 9);
    }
}
