//! Segment file naming and ordering.
//!
//! Segments are named `<seq:016x>-<first-index:016x>.wal`: `seq` is dense
//! and strictly increasing, `first-index` is the log index of the first
//! entry written into the segment at creation time. Name parsing is strict;
//! a `.wal` file that does not match the format fails the open.

use crate::error::{WalError, WalResult};

/// File extension of segment files, without the dot.
pub(crate) const SEGMENT_EXT: &str = "wal";

/// Formats the canonical name for segment `seq` starting at `index`.
pub(crate) fn segment_name(seq: u64, index: u64) -> String {
    format!("{seq:016x}-{index:016x}.{SEGMENT_EXT}")
}

/// Parses a segment file name into `(seq, first_index)`.
pub(crate) fn parse_segment_name(name: &str) -> WalResult<(u64, u64)> {
    let malformed = || WalError::MalformedSegmentName {
        name: name.to_owned(),
    };

    let stem = name
        .strip_suffix(&format!(".{SEGMENT_EXT}"))
        .ok_or_else(malformed)?;
    let (seq_hex, index_hex) = stem.split_once('-').ok_or_else(malformed)?;
    if seq_hex.len() != 16 || index_hex.len() != 16 {
        return Err(malformed());
    }
    let seq = u64::from_str_radix(seq_hex, 16).map_err(|_| malformed())?;
    let index = u64::from_str_radix(index_hex, 16).map_err(|_| malformed())?;
    Ok((seq, index))
}

/// Returns the position of the last name whose `first_index` is at or below
/// `index`, searching the sorted name list from the tail.
pub(crate) fn search_index(names: &[String], index: u64) -> Option<usize> {
    for (i, name) in names.iter().enumerate().rev() {
        let Ok((_, first_index)) = parse_segment_name(name) else {
            continue;
        };
        if first_index <= index {
            return Some(i);
        }
    }
    None
}

/// Returns true if the sorted names carry dense, strictly increasing
/// sequence numbers.
pub(crate) fn is_valid_seq(names: &[String]) -> bool {
    let mut last_seq = None;
    for name in names {
        let Ok((seq, _)) = parse_segment_name(name) else {
            return false;
        };
        if let Some(last) = last_seq {
            if seq != last + 1 {
                return false;
            }
        }
        last_seq = Some(seq);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let name = segment_name(5, 0x10);
        assert_eq!(name, "0000000000000005-0000000000000010.wal");
        assert_eq!(parse_segment_name(&name).unwrap(), (5, 0x10));
    }

    #[test]
    fn test_parse_is_strict() {
        for name in [
            "0000000000000005-0000000000000010",
            "5-10.wal",
            "0000000000000005_0000000000000010.wal",
            "000000000000000g-0000000000000010.wal",
            "0000000000000005-0000000000000010.tmp",
        ] {
            assert!(
                matches!(
                    parse_segment_name(name),
                    Err(WalError::MalformedSegmentName { .. })
                ),
                "expected {name:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_search_index_picks_covering_segment() {
        let names: Vec<String> = [(0, 0), (1, 10), (2, 20)]
            .iter()
            .map(|&(s, i)| segment_name(s, i))
            .collect();

        assert_eq!(search_index(&names, 0), Some(0));
        assert_eq!(search_index(&names, 5), Some(0));
        assert_eq!(search_index(&names, 10), Some(1));
        assert_eq!(search_index(&names, 15), Some(1));
        assert_eq!(search_index(&names, 25), Some(2));
    }

    #[test]
    fn test_is_valid_seq_rejects_gaps() {
        let dense: Vec<String> = [(0, 0), (1, 4), (2, 9)]
            .iter()
            .map(|&(s, i)| segment_name(s, i))
            .collect();
        assert!(is_valid_seq(&dense));

        let gapped: Vec<String> = [(0, 0), (2, 9)]
            .iter()
            .map(|&(s, i)| segment_name(s, i))
            .collect();
        assert!(!is_valid_seq(&gapped));
    }
}
