//! Latest-frame MJPEG distribution over HTTP
//!
//! One capture source keeps overwriting a single frame slot; every HTTP
//! client on `/stream` pulls from that slot at its own pace and receives a
//! `multipart/x-mixed-replace` body of JPEG parts. Slow clients skip frames
//! and never hold up capture.
//!
//! # Example
//!
//! ```no_run
//! use mjpeg_stream_server::{FrameSlot, ServerConfig, StreamingServer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let slot = FrameSlot::new();
//! let mut server = StreamingServer::new(slot.clone());
//! let addr = server.start(ServerConfig::with_port(8080)).await?;
//!
//! // ... capture thread calls `slot.set(jpeg)` or a `FramePublisher`
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod encoder;
pub mod frame;
pub mod server;
pub mod stream;

// Re-exports for convenience
pub use capture::{
    CaptureError, CaptureStats, CaptureWorker, FramePublisher, FrameSource, TestPatternSource,
};
pub use config::{CaptureConfig, Config, ConfigError, ServerConfig};
pub use encoder::{
    crop_to_ratio, AspectRatio, CropRegion, EncodeError, FrameEncoder, ParseAspectRatioError,
};
pub use frame::{FrameSlot, PixelFormat, RawFrame};
pub use server::{ServerError, ServerState, ServerStats, StatsHandle, StreamingServer};
pub use stream::{build_chunk, parse_chunk, MultipartFrameStream, DEFAULT_BOUNDARY};
