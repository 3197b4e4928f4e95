//! Single byte-range requests.
//!
//! Supports the three `bytes=` forms: `START-END`, `START-` and `-SUFFIX`.
//! Multi-range lists are rejected rather than answered with multipart.

use super::ProtocolError;

/// A parsed `Range` header, before the file size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-END`, inclusive
    FromTo { start: u64, end: u64 },
    /// `bytes=START-`
    From { start: u64 },
    /// `bytes=-SUFFIX`, the last `length` bytes
    Suffix { length: u64 },
}

/// A range clamped to a concrete file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
    pub size: u64,
}

impl ResolvedRange {
    /// Number of bytes selected; never zero.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `Content-Range` response header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.size)
    }
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedRange` - Wrong unit, missing `-`, no
    ///   numbers, non-digit characters, or an end before the start
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedRange {
            value: value.to_string(),
        };

        let (unit, set) = value.trim().split_once('=').ok_or_else(malformed)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(malformed());
        }
        let (start, end) = set.split_once('-').ok_or_else(malformed)?;
        let start = parse_bound(start.trim()).ok_or_else(malformed)?;
        let end = parse_bound(end.trim()).ok_or_else(malformed)?;

        match (start, end) {
            (Some(start), Some(end)) if end < start => Err(malformed()),
            (Some(start), Some(end)) => Ok(ByteRange::FromTo { start, end }),
            (Some(start), None) => Ok(ByteRange::From { start }),
            (None, Some(length)) => Ok(ByteRange::Suffix { length }),
            (None, None) => Err(malformed()),
        }
    }

    /// Clamp the range to a file of `size` bytes.
    ///
    /// Returns `None` when no byte of the file is selected: a start at or
    /// past the end, an empty file, or a zero-length suffix.
    pub fn resolve(&self, size: u64) -> Option<ResolvedRange> {
        let last = size.checked_sub(1)?;
        let (start, end) = match *self {
            ByteRange::FromTo { start, end } => (start, end.min(last)),
            ByteRange::From { start } => (start, last),
            ByteRange::Suffix { length: 0 } => return None,
            ByteRange::Suffix { length } => (size.saturating_sub(length), last),
        };
        (start <= end).then_some(ResolvedRange { start, end, size })
    }
}

/// `Some(None)` for an empty bound, `None` for anything but plain digits.
fn parse_bound(raw: &str) -> Option<Option<u64>> {
    if raw.is_empty() {
        return Some(None);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            ByteRange::parse("bytes=0-99"),
            Ok(ByteRange::FromTo { start: 0, end: 99 })
        );
        assert_eq!(
            ByteRange::parse("bytes=100-"),
            Ok(ByteRange::From { start: 100 })
        );
        assert_eq!(
            ByteRange::parse("bytes=-500"),
            Ok(ByteRange::Suffix { length: 500 })
        );
        assert_eq!(
            ByteRange::parse(" Bytes = 5 - 6 "),
            Ok(ByteRange::FromTo { start: 5, end: 6 })
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for value in [
            "bytes=10-5",
            "bytes=",
            "bytes=-",
            "bytes=5",
            "bytes=a-b",
            "bytes=1-2,4-5",
            "bytes=+1-2",
            "items=0-1",
            "0-1",
            "bytes=99999999999999999999999-",
        ] {
            assert!(
                matches!(ByteRange::parse(value), Err(ProtocolError::MalformedRange { .. })),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_clamps_end() {
        let range = ByteRange::FromTo { start: 10, end: 5000 }.resolve(100).unwrap();
        assert_eq!((range.start, range.end, range.content_length()), (10, 99, 90));
        assert_eq!(range.content_range(), "bytes 10-99/100");
    }

    #[test]
    fn test_resolve_suffix_longer_than_file() {
        let range = ByteRange::Suffix { length: 500 }.resolve(100).unwrap();
        assert_eq!((range.start, range.end), (0, 99));
    }

    #[test]
    fn test_resolve_unsatisfiable() {
        assert_eq!(ByteRange::From { start: 100 }.resolve(100), None);
        assert_eq!(ByteRange::FromTo { start: 0, end: 0 }.resolve(0), None);
        assert_eq!(ByteRange::Suffix { length: 0 }.resolve(100), None);
        assert_eq!(ByteRange::Suffix { length: 5 }.resolve(0), None);
    }

    proptest! {
        #[test]
        fn prop_explicit_range_within_file(size in 1u64..1_000_000, a in 0u64..1_000_000, b in 0u64..1_000_000) {
            let (start, end) = (a.min(b) % size, a.max(b) % size);
            prop_assume!(start <= end);
            let range = ByteRange::parse(&format!("bytes={start}-{end}")).unwrap();
            let resolved = range.resolve(size).unwrap();
            prop_assert_eq!((resolved.start, resolved.end), (start, end));
            prop_assert_eq!(resolved.content_length(), end - start + 1);
        }

        #[test]
        fn prop_suffix_selects_tail(size in 1u64..1_000_000, n in 1u64..2_000_000) {
            let resolved = ByteRange::Suffix { length: n }.resolve(size).unwrap();
            prop_assert_eq!(resolved.start, size.saturating_sub(n));
            prop_assert_eq!(resolved.end, size - 1);
        }

        #[test]
        fn prop_open_range_runs_to_end(size in 1u64..1_000_000, a in 0u64..1_000_000) {
            let start = a % size;
            let resolved = ByteRange::From { start }.resolve(size).unwrap();
            prop_assert_eq!((resolved.start, resolved.end), (start, size - 1));
        }
    }
}
