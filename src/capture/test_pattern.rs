use super::{CaptureError, FrameSource};
use crate::frame::{PixelFormat, RawFrame};

/// SMPTE-style colour bars
const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Pixels the bars move per frame
const SCROLL_STEP: u64 = 4;

/// Synthetic source: colour bars scrolling left, so a viewer can tell a
/// live stream from a frozen one without any camera attached.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_index: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_index: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let width = self.width as usize;
        let bar_width = (width / BARS.len()).max(1);
        let shift = (self.frame_index * SCROLL_STEP) as usize;

        let mut row = Vec::with_capacity(width * 3);
        for x in 0..width {
            let bar = ((x + shift) / bar_width) % BARS.len();
            row.extend_from_slice(&BARS[bar]);
        }

        row.repeat(self.height as usize)
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Source(format!(
                "invalid test pattern size {}x{}",
                self.width, self.height
            )));
        }

        let frame = RawFrame::new(self.width, self.height, PixelFormat::Rgb8, self.render());
        self.frame_index += 1;
        Ok(frame)
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        let mut source = TestPatternSource::new(64, 48);
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.data.len(), frame.expected_len());
    }

    #[test]
    fn test_pattern_moves() {
        let mut source = TestPatternSource::new(64, 8);
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        assert_ne!(first.data, second.data);
    }

    #[test]
    fn test_zero_size_is_an_error() {
        let mut source = TestPatternSource::new(0, 8);
        assert!(source.next_frame().is_err());
    }
}
