//! multipart/x-mixed-replace part framing
//!
//! Wire format of one part:
//! `--<boundary>\r\nContent-Type: image/jpeg\r\nContent-Length: <N>\r\n\r\n<N bytes>\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const DEFAULT_BOUNDARY: &str = "MJPEGBOUNDARY";

const PART_CONTENT_TYPE: &str = "image/jpeg";
const HEADER_END: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkParseError {
    #[error("need more data")]
    Incomplete,

    #[error("part does not start with the boundary marker")]
    MissingBoundary,

    #[error("malformed part header: {0}")]
    MalformedHeader(String),

    #[error("part has no Content-Length header")]
    MissingContentLength,

    #[error("unexpected part content type: {0}")]
    UnexpectedContentType(String),

    #[error("payload is not followed by CRLF")]
    MissingTrailer,
}

/// Response `Content-Type` announcing `boundary`
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Wrap one JPEG image in a complete multipart part
pub fn build_chunk(boundary: &str, jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        boundary,
        PART_CONTENT_TYPE,
        jpeg.len()
    );

    let mut buf = BytesMut::with_capacity(header.len() + jpeg.len() + CRLF.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(jpeg);
    buf.put_slice(CRLF);
    buf.freeze()
}

/// One part recovered from a byte stream
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedChunk<'a> {
    /// Value of the `Content-Length` header
    pub content_length: usize,
    pub payload: &'a [u8],
    /// Bytes of `buf` taken by this part, trailer included
    pub consumed: usize,
}

/// Parse the part at the start of `buf`.
///
/// Returns `ChunkParseError::Incomplete` when `buf` ends before the part
/// does, so callers reading from a socket can append and retry.
pub fn parse_chunk<'a>(boundary: &str, buf: &'a [u8]) -> Result<ParsedChunk<'a>, ChunkParseError> {
    let marker = format!("--{}\r\n", boundary);
    if buf.len() < marker.len() {
        return if marker.as_bytes().starts_with(buf) {
            Err(ChunkParseError::Incomplete)
        } else {
            Err(ChunkParseError::MissingBoundary)
        };
    }
    if !buf.starts_with(marker.as_bytes()) {
        return Err(ChunkParseError::MissingBoundary);
    }

    let rest = &buf[marker.len()..];
    let header_len = find(rest, HEADER_END).ok_or(ChunkParseError::Incomplete)?;
    let header = std::str::from_utf8(&rest[..header_len])
        .map_err(|_| ChunkParseError::MalformedHeader("not UTF-8".to_string()))?;

    let mut content_length = None;
    for line in header.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ChunkParseError::MalformedHeader(line.to_string()))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            let len = value
                .parse::<usize>()
                .map_err(|_| ChunkParseError::MalformedHeader(line.to_string()))?;
            content_length = Some(len);
        } else if name.eq_ignore_ascii_case("content-type") && value != PART_CONTENT_TYPE {
            return Err(ChunkParseError::UnexpectedContentType(value.to_string()));
        }
    }
    let content_length = content_length.ok_or(ChunkParseError::MissingContentLength)?;

    let body_start = marker.len() + header_len + HEADER_END.len();
    let (body_end, part_end) = body_start
        .checked_add(content_length)
        .and_then(|end| Some((end, end.checked_add(CRLF.len())?)))
        .ok_or_else(|| {
            ChunkParseError::MalformedHeader(format!("Content-Length: {}", content_length))
        })?;
    if buf.len() < part_end {
        return Err(ChunkParseError::Incomplete);
    }
    if &buf[body_end..part_end] != CRLF {
        return Err(ChunkParseError::MissingTrailer);
    }

    Ok(ParsedChunk {
        content_length,
        payload: &buf[body_start..body_end],
        consumed: part_end,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
