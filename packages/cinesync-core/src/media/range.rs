//! HTTP `Range` header parsing and `Content-Range` synthesis.
//!
//! Only single-range requests are supported, matching what video elements
//! actually send: `bytes=a-b`, `bytes=a-`, and the suffix form `bytes=-n`.

use super::{MediaError, MediaResult};

/// A parsed (not yet bounds-checked) range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=a-b`, both ends inclusive.
    Bounded(u64, u64),
    /// `bytes=a-`.
    From(u64),
    /// `bytes=-n`: the final `n` bytes.
    Suffix(u64),
}

impl RangeSpec {
    /// First byte offset requested, before clamping against the total size.
    /// Suffix ranges have no absolute start until satisfied.
    #[must_use]
    pub fn start(&self) -> Option<u64> {
        match self {
            Self::Bounded(start, _) | Self::From(start) => Some(*start),
            Self::Suffix(_) => None,
        }
    }

    /// Renders the spec back into a `Range` header value for the upstream.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        match self {
            Self::Bounded(start, end) => format!("bytes={start}-{end}"),
            Self::From(start) => format!("bytes={start}-"),
            Self::Suffix(n) => format!("bytes=-{n}"),
        }
    }

    /// Resolves the spec against a known total size.
    pub fn satisfy(&self, total: u64) -> MediaResult<SatisfiedRange> {
        let (start, end) = match *self {
            Self::Bounded(start, end) => (start, end.min(total.saturating_sub(1))),
            Self::From(start) => (start, total.saturating_sub(1)),
            Self::Suffix(n) => {
                if n == 0 {
                    return Err(MediaError::InvalidRange("zero-length suffix".to_string()));
                }
                (total.saturating_sub(n), total.saturating_sub(1))
            }
        };
        if total == 0 || start >= total || start > end {
            return Err(MediaError::InvalidRange(format!(
                "{}/{total}",
                self.to_header_value()
            )));
        }
        Ok(SatisfiedRange { start, end, total })
    }
}

/// A range resolved against the object size. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatisfiedRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl SatisfiedRange {
    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false // start > end is rejected at construction
    }

    /// `Content-Range` header value, e.g. `bytes 0-1048575/10485760`.
    #[must_use]
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Parses a `Range` request header.
pub fn parse_range_header(value: &str) -> MediaResult<RangeSpec> {
    let invalid = || MediaError::InvalidRange(value.to_string());

    let spec = value.strip_prefix("bytes=").ok_or_else(invalid)?.trim();
    if spec.contains(',') {
        // Multi-range requests are not worth the multipart machinery here.
        return Err(invalid());
    }
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    match (start.is_empty(), end.is_empty()) {
        (true, true) => Err(invalid()),
        (true, false) => {
            let n = end.parse().map_err(|_| invalid())?;
            Ok(RangeSpec::Suffix(n))
        }
        (false, true) => {
            let start = start.parse().map_err(|_| invalid())?;
            Ok(RangeSpec::From(start))
        }
        (false, false) => {
            let start: u64 = start.parse().map_err(|_| invalid())?;
            let end: u64 = end.parse().map_err(|_| invalid())?;
            if end < start {
                return Err(invalid());
            }
            Ok(RangeSpec::Bounded(start, end))
        }
    }
}

/// Parses an upstream `Content-Range` response header into
/// `(first, last, total)`. Returns `None` for the unknown-length form.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<(u64, u64, u64)> {
    let rest = value.strip_prefix("bytes ")?;
    let (span, total) = rest.split_once('/')?;
    let (first, last) = span.split_once('-')?;
    Some((
        first.trim().parse().ok()?,
        last.trim().parse().ok()?,
        total.trim().parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_single_range_forms() {
        assert_eq!(
            parse_range_header("bytes=0-1048575").unwrap(),
            RangeSpec::Bounded(0, 1048575)
        );
        assert_eq!(parse_range_header("bytes=500-").unwrap(), RangeSpec::From(500));
        assert_eq!(parse_range_header("bytes=-200").unwrap(), RangeSpec::Suffix(200));
    }

    #[test]
    fn rejects_malformed_headers() {
        for bad in [
            "bytes",
            "bytes=",
            "bytes=-",
            "bytes=a-b",
            "bytes=5-2",
            "bytes=0-10,20-30",
            "items=0-5",
        ] {
            assert!(parse_range_header(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn satisfies_against_total_size() {
        // The S6 shape: first MiB of a 10 MiB object.
        let range = RangeSpec::Bounded(0, 1048575).satisfy(10 * 1024 * 1024).unwrap();
        assert_eq!(range.len(), 1048576);
        assert_eq!(range.content_range(), "bytes 0-1048575/10485760");

        let range = RangeSpec::From(10).satisfy(20).unwrap();
        assert_eq!((range.start, range.end), (10, 19));

        let range = RangeSpec::Suffix(5).satisfy(20).unwrap();
        assert_eq!((range.start, range.end), (15, 19));

        // End past EOF is clamped, per RFC 7233.
        let range = RangeSpec::Bounded(10, 999).satisfy(20).unwrap();
        assert_eq!(range.end, 19);
    }

    #[test]
    fn unsatisfiable_ranges_error() {
        assert!(RangeSpec::From(20).satisfy(20).is_err());
        assert!(RangeSpec::Bounded(25, 30).satisfy(20).is_err());
        assert!(RangeSpec::Suffix(0).satisfy(20).is_err());
        assert!(RangeSpec::From(0).satisfy(0).is_err());
    }

    #[test]
    fn upstream_content_range_round_trips() {
        assert_eq!(
            parse_content_range("bytes 0-0/10485760"),
            Some((0, 0, 10485760))
        );
        assert_eq!(parse_content_range("bytes 5-9/20"), Some((5, 9, 20)));
        assert_eq!(parse_content_range("bytes 0-0/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }
}
