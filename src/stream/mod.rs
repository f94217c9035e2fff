//! Per-client multipart frame stream
//!
//! Every `/stream` connection owns one `MultipartFrameStream`. Each pull
//! snapshots the frame slot and wraps the JPEG in a multipart part; nothing
//! is cached between pulls and nothing is queued.

mod chunk;

pub use chunk::{
    build_chunk, content_type, parse_chunk, ChunkParseError, ParsedChunk, DEFAULT_BOUNDARY,
};

use crate::frame::FrameSlot;
use bytes::Bytes;
use futures_util::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Lazy, infinite sequence of multipart parts read from a `FrameSlot`.
///
/// Not restartable: a new connection builds a new stream over the same slot.
pub struct MultipartFrameStream {
    // Keeps the slot's sender alive, so `rx.changed()` never reports closure.
    _slot: FrameSlot,
    rx: watch::Receiver<Option<Bytes>>,
    boundary: Arc<str>,
    keepalive: Option<Duration>,
    first_pull: bool,
}

impl MultipartFrameStream {
    pub fn new(slot: &FrameSlot, boundary: impl Into<Arc<str>>) -> Self {
        Self {
            _slot: slot.clone(),
            rx: slot.subscribe(),
            boundary: boundary.into(),
            keepalive: None,
            first_pull: true,
        }
    }

    /// Re-send the current frame when the slot has not changed for
    /// `interval`. Without it an idle producer means an idle connection.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Snapshot pull: one complete part for the current frame, or an empty
    /// buffer when no frame has been produced yet. Empty means "try again",
    /// never end-of-stream.
    pub fn next_chunk(&mut self) -> Bytes {
        let frame = self.rx.borrow_and_update().clone();
        match frame {
            Some(jpeg) => build_chunk(&self.boundary, &jpeg),
            None => Bytes::new(),
        }
    }

    /// Waiting pull: returns a non-empty part as soon as the slot holds a
    /// frame that this stream has not sent yet, or when the keepalive
    /// interval elapses with a frame present.
    pub async fn next_frame_chunk(&mut self) -> Bytes {
        if self.first_pull {
            self.first_pull = false;
            let chunk = self.next_chunk();
            if !chunk.is_empty() {
                return chunk;
            }
        }

        loop {
            let changed = match self.keepalive {
                Some(interval) => tokio::time::timeout(interval, self.rx.changed())
                    .await
                    .unwrap_or(Ok(())),
                None => self.rx.changed().await,
            };
            if changed.is_err() {
                // Unreachable while `_slot` is held; park rather than spin.
                std::future::pending::<()>().await;
            }

            let chunk = self.next_chunk();
            if !chunk.is_empty() {
                return chunk;
            }
        }
    }

    /// The stream as a `futures` stream that never terminates on its own
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            let chunk = stream.next_frame_chunk().await;
            Some((chunk, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::time::timeout;

    #[test]
    fn test_empty_slot_gives_empty_chunk() {
        let slot = FrameSlot::new();
        let mut stream = MultipartFrameStream::new(&slot, DEFAULT_BOUNDARY);
        assert!(stream.next_chunk().is_empty());
        assert!(stream.next_chunk().is_empty());
    }

    #[test]
    fn test_chunk_matches_current_frame() {
        let slot = FrameSlot::new();
        let mut stream = MultipartFrameStream::new(&slot, DEFAULT_BOUNDARY);
        let image = Bytes::from_static(b"\xFF\xD8jpeg-bytes\xFF\xD9");
        slot.set(image.clone());

        let chunk = stream.next_chunk();
        let parsed = parse_chunk(DEFAULT_BOUNDARY, &chunk).unwrap();
        assert_eq!(parsed.content_length, image.len());
        assert_eq!(parsed.payload, &image[..]);
        assert_eq!(parsed.consumed, chunk.len());

        // No caching: a second pull without a new frame repeats it.
        assert_eq!(stream.next_chunk(), chunk);
    }

    #[test]
    fn test_pull_reflects_latest_write() {
        let slot = FrameSlot::new();
        let mut stream = MultipartFrameStream::new(&slot, "B");
        slot.set(Bytes::from_static(b"a"));
        slot.set(Bytes::from_static(b"b"));
        assert_eq!(&stream.next_chunk()[..], b"--B\r\nContent-Type: image/jpeg\r\nContent-Length: 1\r\n\r\nb\r\n");

        slot.clear();
        assert!(stream.next_chunk().is_empty());
    }

    #[tokio::test]
    async fn test_waiting_pull_returns_existing_frame() {
        let slot = FrameSlot::new();
        slot.set(Bytes::from_static(b"ready"));
        let mut stream = MultipartFrameStream::new(&slot, DEFAULT_BOUNDARY);

        let chunk = timeout(Duration::from_secs(1), stream.next_frame_chunk())
            .await
            .expect("frame already present");
        assert_eq!(parse_chunk(DEFAULT_BOUNDARY, &chunk).unwrap().payload, b"ready");
    }

    #[tokio::test]
    async fn test_waiting_pull_blocks_until_frame() {
        let slot = FrameSlot::new();
        let mut stream = MultipartFrameStream::new(&slot, DEFAULT_BOUNDARY);

        assert!(timeout(Duration::from_millis(50), stream.next_frame_chunk())
            .await
            .is_err());

        let writer = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set(Bytes::from_static(b"late"));
        });

        let chunk = timeout(Duration::from_secs(1), stream.next_frame_chunk())
            .await
            .expect("frame should arrive");
        assert_eq!(parse_chunk(DEFAULT_BOUNDARY, &chunk).unwrap().payload, b"late");
    }

    #[tokio::test]
    async fn test_keepalive_repeats_frame() {
        let slot = FrameSlot::new();
        slot.set(Bytes::from_static(b"still"));
        let mut stream = MultipartFrameStream::new(&slot, DEFAULT_BOUNDARY)
            .with_keepalive(Duration::from_millis(20));

        let first = stream.next_frame_chunk().await;
        let second = timeout(Duration::from_secs(1), stream.next_frame_chunk())
            .await
            .expect("keepalive should resend");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_independent_streams_see_update() {
        let slot = FrameSlot::new();
        slot.set(Bytes::from_static(b"v1"));

        let a = MultipartFrameStream::new(&slot, DEFAULT_BOUNDARY).into_stream();
        let b = MultipartFrameStream::new(&slot, DEFAULT_BOUNDARY).into_stream();
        futures_util::pin_mut!(a);
        futures_util::pin_mut!(b);

        let a1 = a.next().await.unwrap();
        let b1 = b.next().await.unwrap();
        assert_eq!(a1, b1);

        slot.set(Bytes::from_static(b"v2"));

        for s in [&mut a, &mut b] {
            let chunk = timeout(Duration::from_secs(1), s.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(parse_chunk(DEFAULT_BOUNDARY, &chunk).unwrap().payload, b"v2");
        }
    }
}
