//! Latest-frame holder.
//!
//! One capture thread overwrites the slot, any number of connection tasks
//! read it. There is no queue: a reader slower than the writer skips frames,
//! a reader faster than the writer sees the same frame again.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared handle to the most recently encoded JPEG frame.
///
/// Cloning is cheap and every clone refers to the same slot. The value is a
/// `Bytes`, so handing a frame to N readers never copies the JPEG payload.
#[derive(Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<Bytes>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current frame. Never waits for readers to catch up.
    pub fn set(&self, frame: Bytes) {
        self.tx.send_replace(Some(frame));
    }

    /// Snapshot of the current frame, `None` until the first `set`.
    pub fn get(&self) -> Option<Bytes> {
        self.tx.borrow().clone()
    }

    /// Drop the current frame so new readers start from "no frame yet"
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Change-notified reader used by async consumers to wait for the next
    /// frame instead of polling.
    pub fn subscribe(&self) -> watch::Receiver<Option<Bytes>> {
        self.tx.subscribe()
    }

    pub fn has_frame(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("frame_len", &self.tx.borrow().as_ref().map(Bytes::len))
            .finish()
    }
}
