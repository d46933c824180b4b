//! Interpretation of size-discovery and range response headers.

use reqwest::header::{ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap};

/// Status codes accepted on size discovery and chunk responses.
pub const ACCEPTED_STATUS_CODES: [u16; 3] = [200, 201, 206];

/// Returns true when `status` is one of 200, 201 or 206.
#[must_use]
pub fn is_accepted_status(status: u16) -> bool {
    ACCEPTED_STATUS_CODES.contains(&status)
}

/// Returns true when the body is compressed with anything other than `identity`.
#[must_use]
pub fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|coding| !coding.is_empty() && !coding.eq_ignore_ascii_case("identity"))
}

/// Returns the total body size when it can be trusted.
///
/// The length is ignored when it is missing, not a non-negative integer, or
/// describes a compressed body.
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    if has_content_encoding(headers) {
        return None;
    }
    let value = headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim();
    let parsed: i64 = value.parse().ok()?;
    u64::try_from(parsed).ok()
}

/// Returns true when the server advertises byte-range support.
#[must_use]
pub fn accepts_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .is_some_and(|value| !value.is_empty() && !value.eq_ignore_ascii_case("none"))
}

/// Returns the first byte of a `Content-Range: bytes start-end/total` header.
#[must_use]
pub fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?.trim();
    let (unit, spec) = value.split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (start, _) = spec.trim_start().split_once('-')?;
    start.trim().parse().ok()
}
