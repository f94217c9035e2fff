//! Frame types shared between the capture side and the HTTP side.

mod raw;
mod slot;

pub use raw::{PixelFormat, RawFrame};
pub use slot::FrameSlot;
