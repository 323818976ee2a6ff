//! HTTP Range header handling for file streaming
//!
//! Supports a single `bytes=` range per request. Every accepted range lies
//! entirely inside the file; anything else is unsatisfiable.

use axum::http::HeaderMap;
use axum::http::header::RANGE;
use undertow_core::ByteRange;

/// Parse a `Range` header value against a file of `total_size` bytes.
///
/// Accepts `bytes=start-end`, `bytes=start-` (through the last byte) and
/// `bytes=-suffix` (the last `suffix` bytes). Returns `None` for malformed
/// headers, multiple ranges, inverted bounds, and bounds at or past
/// `total_size`.
///
/// # Examples
/// ```
/// use undertow_web::streaming::range::parse_range_header;
/// let range = parse_range_header("bytes=100-199", 1000).unwrap();
/// assert_eq!((range.start, range.end, range.len()), (100, 199, 100));
/// ```
pub fn parse_range_header(header: &str, total_size: u64) -> Option<ByteRange> {
    let ranges = header.trim().strip_prefix("bytes=")?.trim();
    if ranges.contains(',') {
        return None;
    }

    let (start_str, end_str) = ranges.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());
    let last = total_size.checked_sub(1)?;

    let (start, end) = if start_str.is_empty() {
        let suffix = end_str.parse::<u64>().ok()?;
        if suffix == 0 {
            return None;
        }
        (total_size.saturating_sub(suffix), last)
    } else {
        let start = start_str.parse::<u64>().ok()?;
        let end = if end_str.is_empty() {
            last
        } else {
            end_str.parse::<u64>().ok()?
        };
        (start, end)
    };

    if start > end || start > last || end > last {
        return None;
    }
    Some(ByteRange::new(start, end))
}

/// Extract the raw Range header value.
///
/// Returns None if the header is absent or not valid UTF-8.
pub fn extract_range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(RANGE).and_then(|range| range.to_str().ok())
}
