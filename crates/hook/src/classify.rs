//! Prefix heuristic deciding whether a single buffer is HTTP/1.x traffic.
//!
//! Classification is per call, not per stream: a request line split across
//! two `send()` calls is not recognised.  Only the methods below are
//! matched; `PATCH`, `CONNECT`, `TRACE` and HTTP/2 framing are ignored.

/// Request-line prefixes, method plus the separating space.
const REQUEST_PREFIXES: [&[u8]; 6] = [
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
];

const RESPONSE_PREFIX: &[u8] = b"HTTP/";

/// Buffers shorter than this are never classified.
pub const MIN_LEN: usize = 4;

/// What an accepted buffer looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
}

/// Classify `buf`, looking at no more than its first 8 bytes.
pub fn classify(buf: &[u8]) -> Option<Kind> {
    if buf.len() < MIN_LEN {
        return None;
    }
    if REQUEST_PREFIXES.iter().any(|p| buf.starts_with(p)) {
        return Some(Kind::Request);
    }
    if buf.starts_with(RESPONSE_PREFIX) {
        return Some(Kind::Response);
    }
    None
}

#[inline]
pub fn is_http(buf: &[u8]) -> bool {
    classify(buf).is_some()
}
