//! Consensus payload types stored in the log.
//!
//! These are the values carried inside [`Record`](crate::Record) data:
//! replicated entries, hard-state updates, and snapshot markers. Their
//! binary form is a compact little-endian layout; the WAL itself treats the
//! encoded bytes as opaque and only the replay loop interprets them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Term under which the entry was proposed.
    pub term: u64,
    /// Log index of this entry.
    pub index: u64,
    /// Opaque replicated command.
    pub data: Bytes,
}

impl Entry {
    /// Creates a new entry.
    #[must_use]
    pub const fn new(term: u64, index: u64, data: Bytes) -> Self {
        Self { term, index, data }
    }

    /// Encodes the entry to bytes.
    ///
    /// Format: term (8 bytes) + index (8 bytes) + data.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.term);
        buf.put_u64_le(self.index);
        buf.put_slice(&self.data);
    }

    /// Decodes an entry from bytes.
    ///
    /// Returns `None` if the buffer is too small.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 16 {
            return None;
        }
        let term = buf.get_u64_le();
        let index = buf.get_u64_le();
        let data = buf.copy_to_bytes(buf.remaining());
        Some(Self { term, index, data })
    }

    /// Encodes into a fresh buffer.
    #[must_use]
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + self.data.len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes CRC-verified record data; the format guarantees success.
    pub(crate) fn must_unmarshal(mut data: &[u8]) -> Self {
        Self::decode(&mut data).expect("entry record failed to decode after crc verification")
    }
}

/// Persistent consensus state (term, vote, committed).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardState {
    /// Latest term the node has seen.
    pub term: u64,
    /// Candidate that received the vote in the current term (zero if none).
    pub vote: u64,
    /// Highest log index known to be committed.
    pub committed: u64,
}

impl HardState {
    /// Creates a hard state with the given values.
    #[must_use]
    pub const fn new(term: u64, vote: u64, committed: u64) -> Self {
        Self {
            term,
            vote,
            committed,
        }
    }

    /// Encodes the state to bytes.
    ///
    /// Format: term (8 bytes) + vote (8 bytes) + committed (8 bytes).
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.term);
        buf.put_u64_le(self.vote);
        buf.put_u64_le(self.committed);
    }

    /// Decodes a hard state from bytes.
    ///
    /// Returns `None` if the buffer is too small.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 24 {
            return None;
        }
        Some(Self {
            term: buf.get_u64_le(),
            vote: buf.get_u64_le(),
            committed: buf.get_u64_le(),
        })
    }

    /// Encodes into a fresh buffer.
    #[must_use]
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        self.encode(&mut buf);
        buf.freeze()
    }

    pub(crate) fn must_unmarshal(mut data: &[u8]) -> Self {
        Self::decode(&mut data).expect("state record failed to decode after crc verification")
    }
}

/// A marker recording the `(index, term)` of a state snapshot stored
/// elsewhere. The zero marker names the empty log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotMarker {
    /// Log index the snapshot covers.
    pub index: u64,
    /// Term of the entry at that index.
    pub term: u64,
}

impl SnapshotMarker {
    /// Creates a snapshot marker.
    #[must_use]
    pub const fn new(index: u64, term: u64) -> Self {
        Self { index, term }
    }

    /// Encodes the marker to bytes.
    ///
    /// Format: index (8 bytes) + term (8 bytes).
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.index);
        buf.put_u64_le(self.term);
    }

    /// Decodes a marker from bytes.
    ///
    /// Returns `None` if the buffer is too small.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 16 {
            return None;
        }
        Some(Self {
            index: buf.get_u64_le(),
            term: buf.get_u64_le(),
        })
    }

    /// Encodes into a fresh buffer.
    #[must_use]
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        self.encode(&mut buf);
        buf.freeze()
    }

    pub(crate) fn must_unmarshal(mut data: &[u8]) -> Self {
        Self::decode(&mut data).expect("snapshot record failed to decode after crc verification")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_roundtrip() {
        let entry = Entry::new(3, 42, Bytes::from_static(b"command"));
        let mut data = entry.marshal();
        let decoded = Entry::decode(&mut data).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_hard_state_roundtrip() {
        let state = HardState::new(7, 2, 100);
        let mut data = state.marshal();
        assert_eq!(HardState::decode(&mut data).unwrap(), state);
    }

    #[test]
    fn test_snapshot_marker_roundtrip() {
        let snap = SnapshotMarker::new(55, 6);
        let mut data = snap.marshal();
        assert_eq!(SnapshotMarker::decode(&mut data).unwrap(), snap);
    }

    #[test]
    fn test_truncated_decode_returns_none() {
        assert!(Entry::decode(&mut &b"short"[..]).is_none());
        assert!(HardState::decode(&mut &b"short"[..]).is_none());
        assert!(SnapshotMarker::decode(&mut &b"short"[..]).is_none());
    }
}
