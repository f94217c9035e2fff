//! Per-connection request handling and the `/stream` serving loop

use super::http::{self, Route};
use super::stats::{ClientGuard, ServerCounters};
use crate::config::ServerConfig;
use crate::frame::FrameSlot;
use crate::stream::MultipartFrameStream;
use bytes::Bytes;
use futures_util::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Time given to the terminating chunk when the server shuts down
const FAREWELL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("client closed the connection")]
    ClosedByPeer,

    #[error("client sent no complete request within {0:?}")]
    RequestTimeout(Duration),

    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("client did not accept a part within {0:?}")]
    WriteTimeout(Duration),
}

impl ConnectionError {
    /// Ordinary ways for a viewer to go away
    fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::ClosedByPeer => true,
            ConnectionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// State shared by all connections of one running server
pub(crate) struct ConnectionContext {
    pub config: ServerConfig,
    pub content_type: String,
    pub slot: FrameSlot,
    pub counters: Arc<ServerCounters>,
    pub shutdown: watch::Receiver<bool>,
}

pub(crate) async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) {
    let _guard = ClientGuard::new(Arc::clone(&ctx.counters));
    debug!(peer = %peer, "Client connected");

    match serve(&mut socket, &ctx).await {
        Ok(()) => debug!(peer = %peer, "Client connection finished"),
        Err(e) if e.is_disconnect() => debug!(peer = %peer, "Client disconnected"),
        Err(e @ ConnectionError::WriteTimeout(_)) => {
            ctx.counters.write_timeout();
            warn!(peer = %peer, error = %e, "Dropping stalled client");
        }
        Err(e) => debug!(peer = %peer, error = %e, "Client connection failed"),
    }

    let _ = socket.shutdown().await;
}

async fn serve(socket: &mut TcpStream, ctx: &ConnectionContext) -> Result<(), ConnectionError> {
    let request_timeout = ctx.config.request_timeout();
    let head = timeout(request_timeout, http::read_request_head(socket))
        .await
        .map_err(|_| ConnectionError::RequestTimeout(request_timeout))??;

    let request = match http::parse_request_head(&head) {
        Ok(request) => request,
        Err(e) => {
            write_response(socket, &http::BAD_REQUEST_RESPONSE, ctx).await?;
            return Err(e);
        }
    };
    debug!(method = %request.method, path = %request.path, "Request");

    match request.route() {
        Route::Viewer => write_response(socket, &http::VIEWER_RESPONSE, ctx).await,
        Route::NotFound => write_response(socket, &http::NOT_FOUND_RESPONSE, ctx).await,
        Route::MethodNotAllowed => {
            write_response(socket, &http::METHOD_NOT_ALLOWED_RESPONSE, ctx).await
        }
        Route::Stream => serve_stream(socket, ctx, request.accepts_chunked()).await,
    }
}

async fn write_response(
    socket: &mut TcpStream,
    response: &[u8],
    ctx: &ConnectionContext,
) -> Result<(), ConnectionError> {
    let write_timeout = ctx.config.write_timeout();
    timeout(write_timeout, socket.write_all(response))
        .await
        .map_err(|_| ConnectionError::WriteTimeout(write_timeout))??;
    Ok(())
}

/// Push parts to the client until it leaves, stalls, or the server stops.
///
/// A part is either written completely or the connection is closed; nothing
/// else is ever interleaved with it.
async fn serve_stream(
    socket: &mut TcpStream,
    ctx: &ConnectionContext,
    chunked: bool,
) -> Result<(), ConnectionError> {
    let write_timeout = ctx.config.write_timeout();
    let (mut reader, mut writer) = socket.split();

    let head = http::stream_response_head(&ctx.content_type, chunked);
    timeout(write_timeout, writer.write_all(&head))
        .await
        .map_err(|_| ConnectionError::WriteTimeout(write_timeout))??;

    let mut frames = MultipartFrameStream::new(&ctx.slot, ctx.config.boundary.as_str());
    if let Some(interval) = ctx.config.keepalive() {
        frames = frames.with_keepalive(interval);
    }
    let frames = frames.into_stream();
    futures_util::pin_mut!(frames);

    let mut shutdown = ctx.shutdown.clone();
    let mut scratch = [0u8; 512];

    loop {
        let part = tokio::select! {
            part = frames.next() => match part {
                Some(part) => part,
                None => break,
            },
            _ = shutdown.changed() => {
                if chunked {
                    let _ = timeout(FAREWELL_TIMEOUT, writer.write_all(http::LAST_CHUNK)).await;
                }
                return Ok(());
            }
            read = reader.read(&mut scratch) => match read {
                Ok(0) => return Err(ConnectionError::ClosedByPeer),
                Ok(_) => continue,
                Err(e) => return Err(e.into()),
            },
        };

        let len = part.len() as u64;
        tokio::select! {
            written = timeout(write_timeout, write_part(&mut writer, part, chunked)) => {
                written.map_err(|_| ConnectionError::WriteTimeout(write_timeout))??;
                ctx.counters.part_sent(len);
            }
            // Leaving mid-part closes the socket, so the client sees a cut
            // stream rather than a corrupted one.
            _ = shutdown.changed() => return Ok(()),
        }
    }

    Ok(())
}

async fn write_part<W>(writer: &mut W, part: Bytes, chunked: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // An empty transfer chunk would end the response body.
    if part.is_empty() {
        return Ok(());
    }

    if chunked {
        let mut framed = http::transfer_chunk(part);
        writer.write_all_buf(&mut framed).await
    } else {
        writer.write_all(&part).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_part_chunked() {
        let mut out = Vec::new();
        write_part(&mut out, Bytes::from_static(b"hello"), true).await.unwrap();
        assert_eq!(out, b"5\r\nhello\r\n");
    }

    #[tokio::test]
    async fn test_write_part_skips_empty() {
        let mut out = Vec::new();
        write_part(&mut out, Bytes::new(), true).await.unwrap();
        write_part(&mut out, Bytes::new(), false).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_write_part_raw() {
        let mut out = Vec::new();
        write_part(&mut out, Bytes::from_static(b"raw"), false).await.unwrap();
        assert_eq!(out, b"raw");
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(ConnectionError::ClosedByPeer.is_disconnect());
        assert!(ConnectionError::Io(io::ErrorKind::BrokenPipe.into()).is_disconnect());
        assert!(!ConnectionError::WriteTimeout(Duration::from_secs(1)).is_disconnect());
        assert!(!ConnectionError::BadRequest("x").is_disconnect());
    }
}
