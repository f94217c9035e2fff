//! Minimal HTTP/1.x request parsing and response framing

use super::connection::ConnectionError;
use bytes::{Buf, Bytes, BytesMut};
use once_cell::sync::Lazy;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on request line plus headers
pub(crate) const MAX_HEAD_LEN: usize = 8 * 1024;

/// Terminates a chunked body
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

const VIEWER_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>IP Camera</title>
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        html, body {
            margin: 0;
            padding: 0;
            background-color: black;
            height: 100%;
            width: 100%;
            display: flex;
            justify-content: center;
            align-items: center;
        }
        #camera {
            max-width: 100%;
            max-height: 100%;
            object-fit: contain;
            background-color: black;
        }
    </style>
</head>
<body>
    <img id="camera" src="/stream" />
</body>
</html>"#;

/// Full `GET /` response, built on first use and shared afterwards
pub(crate) static VIEWER_RESPONSE: Lazy<Bytes> =
    Lazy::new(|| fixed_response("200 OK", "text/html; charset=utf-8", VIEWER_HTML));

pub(crate) static NOT_FOUND_RESPONSE: Lazy<Bytes> =
    Lazy::new(|| fixed_response("404 Not Found", "text/plain", "404 Not Found"));

pub(crate) static METHOD_NOT_ALLOWED_RESPONSE: Lazy<Bytes> = Lazy::new(|| {
    fixed_response("405 Method Not Allowed", "text/plain", "405 Method Not Allowed")
});

pub(crate) static BAD_REQUEST_RESPONSE: Lazy<Bytes> =
    Lazy::new(|| fixed_response("400 Bad Request", "text/plain", "400 Bad Request"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HttpVersion {
    Http10,
    Http11,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: HttpVersion,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Viewer,
    Stream,
    NotFound,
    MethodNotAllowed,
}

impl RequestHead {
    pub fn route(&self) -> Route {
        if self.method != "GET" {
            return Route::MethodNotAllowed;
        }

        // Query strings do not affect routing.
        let path = self.path.split('?').next().unwrap_or_default();
        match path {
            "/" => Route::Viewer,
            "/stream" => Route::Stream,
            _ => Route::NotFound,
        }
    }

    /// HTTP/1.0 clients do not understand chunked transfer coding
    pub fn accepts_chunked(&self) -> bool {
        self.version == HttpVersion::Http11
    }
}

/// Read until the blank line ending the request head.
///
/// Anything the client sent after the head is left unparsed.
pub(crate) async fn read_request_head<R>(reader: &mut R) -> Result<BytesMut, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if let Some(end) = find_head_end(&buf) {
            buf.truncate(end);
            return Ok(buf);
        }
        if buf.len() >= MAX_HEAD_LEN {
            return Err(ConnectionError::BadRequest("request head too large"));
        }

        if reader.read_buf(&mut buf).await? == 0 {
            return Err(ConnectionError::ClosedByPeer);
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the request line; header fields are not needed for routing
pub(crate) fn parse_request_head(head: &[u8]) -> Result<RequestHead, ConnectionError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| ConnectionError::BadRequest("request head is not UTF-8"))?;
    let line = head.lines().next().unwrap_or_default();

    let mut parts = line.split_whitespace();
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ConnectionError::BadRequest("malformed request line"));
    };

    if !path.starts_with('/') {
        return Err(ConnectionError::BadRequest("request target is not an absolute path"));
    }

    let version = match version {
        "HTTP/1.1" => HttpVersion::Http11,
        "HTTP/1.0" => HttpVersion::Http10,
        _ => return Err(ConnectionError::BadRequest("unsupported HTTP version")),
    };

    Ok(RequestHead {
        method: method.to_string(),
        path: path.to_string(),
        version,
    })
}

/// Response head of `/stream`; the body follows and never ends on its own
pub(crate) fn stream_response_head(content_type: &str, chunked: bool) -> Bytes {
    let transfer = if chunked {
        "Transfer-Encoding: chunked\r\n"
    } else {
        ""
    };

    Bytes::from(format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\n{}Connection: close\r\nCache-Control: no-cache\r\nPragma: no-cache\r\n\r\n",
        content_type, transfer
    ))
}

/// Frame `data` as one chunk of a chunked body without copying it
pub(crate) fn transfer_chunk(data: Bytes) -> impl Buf {
    let size_line = Bytes::from(format!("{:X}\r\n", data.len()));
    size_line.chain(data).chain(&b"\r\n"[..])
}

fn fixed_response(status: &str, content_type: &str, body: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    ))
}
