//! Inbound `Range` header negotiation.
//!
//! Parsing is permissive: anything that cannot be honored yields `None` and the
//! full body is served instead of an error.

use media_extractor::ByteRange;

/// Inclusive serving window within a body of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    pub start: u64,
    pub end: u64,
}

impl RangeWindow {
    /// Number of bytes in the window.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a body of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

impl From<RangeWindow> for ByteRange {
    fn from(window: RangeWindow) -> Self {
        ByteRange {
            start: window.start,
            end: window.end,
        }
    }
}

/// Compute the serving window for a `Range` header.
///
/// Only the first clause of a multi-range request is considered. Suffix ranges
/// (`bytes=-500`) have no numeric start and are ignored. An end past the body
/// is clamped to the last byte.
pub fn negotiate(range_header: Option<&str>, total_length: Option<u64>) -> Option<RangeWindow> {
    let header = range_header?;
    let total = total_length.filter(|&t| t > 0)?;

    let ranges = header.trim().strip_prefix("bytes=")?;
    let first = ranges.split(',').next()?.trim();
    let (start, end) = first.split_once('-')?;

    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => total - 1,
        e => e.parse::<u64>().ok()?.min(total - 1),
    };

    if start > end || start >= total {
        return None;
    }
    Some(RangeWindow { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_ended_range() {
        assert_eq!(
            negotiate(Some("bytes=100-"), Some(1000)),
            Some(RangeWindow { start: 100, end: 999 })
        );
    }

    #[test]
    fn test_closed_range() {
        let window = negotiate(Some("bytes=0-499"), Some(1000)).unwrap();
        assert_eq!(window, RangeWindow { start: 0, end: 499 });
        assert_eq!(window.length(), 500);
        assert_eq!(window.content_range(1000), "bytes 0-499/1000");
    }

    #[test]
    fn test_absent_header_or_unknown_length() {
        assert_eq!(negotiate(None, Some(1000)), None);
        assert_eq!(negotiate(Some("bytes=0-10"), None), None);
        assert_eq!(negotiate(Some("bytes=0-10"), Some(0)), None);
    }

    #[test]
    fn test_malformed_is_ignored() {
        for header in [
            "bytes=abc-10",
            "bytes=-500",
            "bytes=10",
            "items=0-10",
            "bytes=5-x",
            "",
            "bytes=",
        ] {
            assert_eq!(negotiate(Some(header), Some(1000)), None, "{header}");
        }
    }

    #[test]
    fn test_start_after_end_or_past_body() {
        assert_eq!(negotiate(Some("bytes=500-100"), Some(1000)), None);
        assert_eq!(negotiate(Some("bytes=1000-"), Some(1000)), None);
        assert_eq!(negotiate(Some("bytes=2000-3000"), Some(1000)), None);
    }

    #[test]
    fn test_end_clamped_to_body() {
        assert_eq!(
            negotiate(Some("bytes=900-5000"), Some(1000)),
            Some(RangeWindow { start: 900, end: 999 })
        );
    }

    #[test]
    fn test_only_first_clause_honored() {
        assert_eq!(
            negotiate(Some("bytes=0-9, 20-29"), Some(1000)),
            Some(RangeWindow { start: 0, end: 9 })
        );
    }

    #[test]
    fn test_converts_to_upstream_range() {
        let range: ByteRange = RangeWindow { start: 5, end: 9 }.into();
        assert_eq!(range.header_value(), "bytes=5-9");
    }
}
