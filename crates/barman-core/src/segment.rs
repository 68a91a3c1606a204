//! WAL segment name grammar.
//!
//! A WAL segment file name is a 24-character hexadecimal string:
//! `TTTTTTTTXXXXXXXXYYYYYYYY`, where `T` is the timeline id, `X` is the
//! high 32 bits of the segment's logical log file number and `Y` is the
//! segment's position within that log file. Two related, equally
//! well-known names share the prefix:
//!
//! - a timeline history file: `TTTTTTTT.history`
//! - a backup label left in the archive: `TTTTTTTTXXXXXXXXYYYYYYYY.OOOOOOOO.backup`
//!
//! Segment names sort correctly as plain strings as long as they share a
//! timeline: the fixed-width zero-padded hex encoding makes lexicographic
//! order equal to chronological order.

use crate::error::{Error, Result};
use std::fmt;

/// Default WAL segment size used by most installations (16 MiB).
pub const DEFAULT_XLOG_SEG_SIZE: u64 = 16 * 1024 * 1024;

/// Number of segments in one logical 4 GiB log file at a given segment size.
pub(crate) fn segments_per_logfile(segment_size: u64) -> u64 {
    0x1_0000_0000 / segment_size
}

/// A parsed WAL segment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentName {
    pub timeline: u32,
    pub log_id: u32,
    pub seg_id: u32,
}

impl SegmentName {
    /// Parses a 24-character hex segment file name.
    pub fn parse(name: &str) -> Result<Self> {
        if name.len() != 24 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::BadSegmentName(name.to_string()));
        }
        let timeline = u32::from_str_radix(&name[0..8], 16)
            .map_err(|_| Error::BadSegmentName(name.to_string()))?;
        let log_id = u32::from_str_radix(&name[8..16], 16)
            .map_err(|_| Error::BadSegmentName(name.to_string()))?;
        let seg_id = u32::from_str_radix(&name[16..24], 16)
            .map_err(|_| Error::BadSegmentName(name.to_string()))?;
        Ok(Self {
            timeline,
            log_id,
            seg_id,
        })
    }

    /// Renders back to the canonical 24-character hex file name.
    pub fn to_file_name(&self) -> String {
        format!(
            "{:08X}{:08X}{:08X}",
            self.timeline, self.log_id, self.seg_id
        )
    }

    /// Returns the next segment name at the given segment size, rolling
    /// over `log_id` when `seg_id` reaches the last segment of the
    /// current logical log file. The timeline never advances on its own;
    /// timeline switches are driven by history files, not plain sequence.
    pub fn next(&self, segment_size: u64) -> Self {
        let per_file = segments_per_logfile(segment_size);
        let mut log_id = self.log_id;
        let mut seg_id = self.seg_id as u64 + 1;
        if seg_id >= per_file {
            seg_id = 0;
            log_id += 1;
        }
        Self {
            timeline: self.timeline,
            log_id,
            seg_id: seg_id as u32,
        }
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_file_name())
    }
}

/// Returns true if `name` is a plain 24-hex-character WAL segment.
pub fn is_wal_file(name: &str) -> bool {
    name.len() == 24 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Returns true if `name` is a timeline history file (`TTTTTTTT.history`).
pub fn is_history_file(name: &str) -> bool {
    name.len() == 16
        && name.ends_with(".history")
        && name[0..8].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Returns true if `name` is a backup label left behind in the WAL archive
/// (`TTTTTTTTXXXXXXXXYYYYYYYY.OOOOOOOO.backup`).
pub fn is_backup_file(name: &str) -> bool {
    if name.len() != 24 + 1 + 8 + 7 {
        return false;
    }
    let (segment, rest) = name.split_at(24);
    is_wal_file(segment)
        && rest.starts_with('.')
        && rest.ends_with(".backup")
        && rest[1..9].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Returns true if `name` is any recognised xlog-directory entry: a plain
/// segment, a history file, or a backup label. Partial (`.partial`)
/// streaming-in-progress files are deliberately excluded: they are not
/// yet eligible for catalog bookkeeping.
pub fn is_any_xlog_file(name: &str) -> bool {
    is_wal_file(name) || is_history_file(name) || is_backup_file(name)
}

/// Computes the per-server hash directory a segment belongs to, matching
/// the convention of grouping WALs by their first 16 characters (timeline
/// + log id) to keep any one directory from accumulating too many entries.
///
/// A timeline history file carries no log id of its own, so it hashes
/// under the same directory as the first logfile of its timeline
/// (`TTTTTTTT` zero-extended to 16 characters) rather than getting a
/// directory to itself.
pub fn hash_dir(segment_name: &str) -> Result<String> {
    if is_wal_file(segment_name) {
        return Ok(segment_name[0..16].to_string());
    }
    if is_history_file(segment_name) {
        return Ok(format!("{}00000000", &segment_name[0..8]));
    }
    Err(Error::BadSegmentName(segment_name.to_string()))
}

/// Enumerates every segment name from `begin` to `end` inclusive, in
/// ascending order, at the given segment size. Used by retention and
/// catalog rebuilding to know which WALs a backup requires without
/// touching the filesystem.
pub fn generate_range(begin: SegmentName, end: SegmentName, segment_size: u64) -> Vec<SegmentName> {
    let mut out = Vec::new();
    let mut current = begin;
    loop {
        out.push(current);
        if current == end {
            break;
        }
        current = current.next(segment_size);
        // Defensive bound: a corrupt/reversed range must not loop forever.
        if out.len() > 10_000_000 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_through_to_file_name() {
        let name = "00000001000000020000003A";
        let parsed = SegmentName::parse(name).unwrap();
        assert_eq!(parsed.timeline, 1);
        assert_eq!(parsed.log_id, 2);
        assert_eq!(parsed.seg_id, 0x3A);
        assert_eq!(parsed.to_file_name(), name);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(SegmentName::parse("0000000100000002").is_err());
    }

    #[test]
    fn parse_rejects_non_hex_characters() {
        assert!(SegmentName::parse("ZZZZZZZZ000000020000003A").is_err());
    }

    #[test]
    fn next_rolls_over_seg_id_into_log_id() {
        let last_segment_of_file = SegmentName {
            timeline: 1,
            log_id: 0,
            seg_id: (segments_per_logfile(DEFAULT_XLOG_SEG_SIZE) - 1) as u32,
        };
        let next = last_segment_of_file.next(DEFAULT_XLOG_SEG_SIZE);
        assert_eq!(next.log_id, 1);
        assert_eq!(next.seg_id, 0);
        assert_eq!(next.timeline, 1);
    }

    #[test]
    fn is_history_file_matches_only_timeline_history_names() {
        assert!(is_history_file("00000002.history"));
        assert!(!is_history_file("000000020000003A.history"));
        assert!(!is_history_file("0000000100000002000003A"));
    }

    #[test]
    fn is_backup_file_matches_label_naming_convention() {
        assert!(is_backup_file(
            "00000001000000020000003A.00000028.backup"
        ));
        assert!(!is_backup_file("00000001000000020000003A"));
    }

    #[test]
    fn generate_range_is_ascending_and_inclusive() {
        let begin = SegmentName::parse("000000010000000000000001").unwrap();
        let end = SegmentName::parse("000000010000000000000004").unwrap();
        let range = generate_range(begin, end, DEFAULT_XLOG_SEG_SIZE);
        assert_eq!(range.len(), 4);
        assert_eq!(range.first().unwrap(), &begin);
        assert_eq!(range.last().unwrap(), &end);
    }

    proptest::proptest! {
        #[test]
        fn parse_accepts_every_syntactically_valid_name(
            timeline in 0u32..=0xFFFF_FFFF,
            log_id in 0u32..=0xFFFF_FFFF,
            seg_id in 0u32..=0xFFFF_FFFF,
        ) {
            let name = format!("{:08X}{:08X}{:08X}", timeline, log_id, seg_id);
            let parsed = SegmentName::parse(&name).unwrap();
            proptest::prop_assert_eq!(parsed.to_file_name(), name);
        }
    }
}
