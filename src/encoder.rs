//! Raw frame → JPEG, with centred crop to a target aspect ratio

use crate::frame::{PixelFormat, RawFrame};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("buffer holds {actual} bytes but {width}x{height} {format:?} needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("target aspect ratio must be positive and finite, got {0}")]
    InvalidAspectRatio(f64),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid aspect ratio '{0}', expected W:H or a positive number")]
pub struct ParseAspectRatioError(String);

/// Width / height ratio, always positive and finite.
///
/// Parses from `"16:9"` style pairs or plain decimals such as `"1.5"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AspectRatio(f64);

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio(1.0);

    pub fn new(ratio: f64) -> Option<Self> {
        (ratio.is_finite() && ratio > 0.0).then_some(Self(ratio))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl FromStr for AspectRatio {
    type Err = ParseAspectRatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAspectRatioError(s.to_string());
        let trimmed = s.trim();

        let ratio = match trimmed.split_once(':') {
            Some((w, h)) => {
                let w: f64 = w.trim().parse().map_err(|_| err())?;
                let h: f64 = h.trim().parse().map_err(|_| err())?;
                if h == 0.0 {
                    return Err(err());
                }
                w / h
            }
            None => trimmed.parse().map_err(|_| err())?,
        };

        AspectRatio::new(ratio).ok_or_else(err)
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = ParseAspectRatioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(ratio: AspectRatio) -> Self {
        ratio.to_string()
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rectangle of the source image kept after cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest centred region of a `width`x`height` image with ratio `target`.
///
/// Wider-than-target images lose columns on both sides, everything else
/// loses rows at the top and bottom. The kept dimension is rounded to the
/// nearest pixel.
pub fn crop_to_ratio(width: u32, height: u32, target: f64) -> Result<CropRegion, EncodeError> {
    if width == 0 || height == 0 {
        return Err(EncodeError::EmptyImage { width, height });
    }
    if !target.is_finite() || target <= 0.0 {
        return Err(EncodeError::InvalidAspectRatio(target));
    }

    let current = width as f64 / height as f64;

    if current > target {
        let new_width = ((height as f64 * target).round() as u32).clamp(1, width);
        Ok(CropRegion {
            x: (width - new_width) / 2,
            y: 0,
            width: new_width,
            height,
        })
    } else {
        let new_height = ((width as f64 / target).round() as u32).clamp(1, height);
        Ok(CropRegion {
            x: 0,
            y: (height - new_height) / 2,
            width,
            height: new_height,
        })
    }
}

/// Stateless JPEG encoder for capture frames
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    /// `quality` is clamped to 1..=100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Crop `raw` to `target` (if given) and encode it as a baseline JPEG.
    ///
    /// The output depends only on the input pixels, the ratio and the
    /// quality setting.
    pub fn encode(&self, raw: &RawFrame, target: Option<AspectRatio>) -> Result<Bytes, EncodeError> {
        if raw.width == 0 || raw.height == 0 {
            return Err(EncodeError::EmptyImage {
                width: raw.width,
                height: raw.height,
            });
        }

        let expected = raw.expected_len();
        if raw.data.len() != expected {
            return Err(EncodeError::BufferSize {
                width: raw.width,
                height: raw.height,
                format: raw.format,
                expected,
                actual: raw.data.len(),
            });
        }

        let region = match target {
            Some(ratio) => crop_to_ratio(raw.width, raw.height, ratio.value())?,
            None => CropRegion {
                x: 0,
                y: 0,
                width: raw.width,
                height: raw.height,
            },
        };

        let (pixels, color) = extract_region(raw, region);

        let mut out = Vec::with_capacity(pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode(
            &pixels,
            region.width,
            region.height,
            color,
        )?;

        Ok(Bytes::from(out))
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

/// Copy `region` out of `raw`, dropping alpha since JPEG has none
fn extract_region(raw: &RawFrame, region: CropRegion) -> (Vec<u8>, ExtendedColorType) {
    let bpp = raw.format.bytes_per_pixel();
    let stride = raw.stride();
    let row_start = region.x as usize * bpp;
    let row_len = region.width as usize * bpp;

    let out_bpp = match raw.format {
        PixelFormat::Luma8 => 1,
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => 3,
    };
    let mut pixels = Vec::with_capacity(region.width as usize * region.height as usize * out_bpp);

    for y in region.y..region.y + region.height {
        let offset = y as usize * stride + row_start;
        let row = &raw.data[offset..offset + row_len];
        match raw.format {
            PixelFormat::Luma8 | PixelFormat::Rgb8 => pixels.extend_from_slice(row),
            PixelFormat::Rgba8 => {
                for px in row.chunks_exact(4) {
                    pixels.extend_from_slice(&px[..3]);
                }
            }
        }
    }

    let color = match raw.format {
        PixelFormat::Luma8 => ExtendedColorType::L8,
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => ExtendedColorType::Rgb8,
    };
    (pixels, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn gradient(width: u32, height: u32, format: PixelFormat) -> RawFrame {
        let bpp = format.bytes_per_pixel();
        let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
        for y in 0..height {
            for x in 0..width {
                let v = ((x + y) % 256) as u8;
                data.extend(std::iter::repeat(v).take(bpp));
            }
        }
        RawFrame::new(width, height, format, data)
    }

    fn decoded_dimensions(jpeg: &[u8]) -> (u32, u32) {
        use image::GenericImageView;
        let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
            .expect("output should decode as JPEG");
        img.dimensions()
    }

    #[rstest]
    #[case(640, 480, 1.0, CropRegion { x: 80, y: 0, width: 480, height: 480 })]
    #[case(480, 640, 1.0, CropRegion { x: 0, y: 80, width: 480, height: 480 })]
    #[case(640, 480, 16.0 / 9.0, CropRegion { x: 0, y: 60, width: 640, height: 360 })]
    #[case(1920, 1080, 4.0 / 3.0, CropRegion { x: 240, y: 0, width: 1440, height: 1080 })]
    #[case(640, 480, 2.0, CropRegion { x: 0, y: 80, width: 640, height: 320 })]
    #[case(640, 480, 4.0 / 3.0, CropRegion { x: 0, y: 0, width: 640, height: 480 })]
    fn test_crop_to_ratio(
        #[case] width: u32,
        #[case] height: u32,
        #[case] ratio: f64,
        #[case] expected: CropRegion,
    ) {
        assert_eq!(crop_to_ratio(width, height, ratio).unwrap(), expected);
    }

    #[rstest]
    #[case(641, 479, 1.0)]
    #[case(1280, 721, 16.0 / 9.0)]
    #[case(333, 777, 2.0)]
    #[case(1001, 999, 0.75)]
    fn test_crop_ratio_within_rounding(#[case] width: u32, #[case] height: u32, #[case] ratio: f64) {
        let region = crop_to_ratio(width, height, ratio).unwrap();

        // One pixel of rounding on the cropped axis bounds the ratio error.
        let tolerance = if region.width < width {
            1.0 / region.height as f64
        } else {
            ratio * ratio / region.width as f64
        };
        let actual = region.width as f64 / region.height as f64;
        assert!((actual - ratio).abs() <= tolerance, "{} vs {}", actual, ratio);

        assert_eq!(region.x, (width - region.width) / 2);
        assert_eq!(region.y, (height - region.height) / 2);
    }

    #[test]
    fn test_crop_rejects_bad_input() {
        assert_matches!(crop_to_ratio(0, 10, 1.0), Err(EncodeError::EmptyImage { .. }));
        assert_matches!(crop_to_ratio(10, 10, 0.0), Err(EncodeError::InvalidAspectRatio(_)));
        assert_matches!(crop_to_ratio(10, 10, f64::NAN), Err(EncodeError::InvalidAspectRatio(_)));
    }

    #[test]
    fn test_encode_crops_to_square() {
        let encoder = FrameEncoder::default();
        let jpeg = encoder
            .encode(&gradient(640, 480, PixelFormat::Rgb8), Some(AspectRatio::SQUARE))
            .unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(decoded_dimensions(&jpeg), (480, 480));
    }

    #[test]
    fn test_encode_without_crop_keeps_size() {
        let jpeg = FrameEncoder::default()
            .encode(&gradient(64, 32, PixelFormat::Luma8), None)
            .unwrap();
        assert_eq!(decoded_dimensions(&jpeg), (64, 32));
    }

    #[test]
    fn test_encode_rgba_drops_alpha() {
        let ratio: AspectRatio = "2:1".parse().unwrap();
        let jpeg = FrameEncoder::new(90)
            .encode(&gradient(100, 100, PixelFormat::Rgba8), Some(ratio))
            .unwrap();
        assert_eq!(decoded_dimensions(&jpeg), (100, 50));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = FrameEncoder::default();
        let frame = gradient(160, 120, PixelFormat::Rgb8);
        let a = encoder.encode(&frame, Some(AspectRatio::SQUARE)).unwrap();
        let b = encoder.encode(&frame, Some(AspectRatio::SQUARE)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = RawFrame::new(10, 10, PixelFormat::Rgb8, vec![0u8; 10]);
        assert_matches!(
            FrameEncoder::default().encode(&frame, None),
            Err(EncodeError::BufferSize { expected: 300, actual: 10, .. })
        );
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(FrameEncoder::new(0).quality(), 1);
        assert_eq!(FrameEncoder::new(250).quality(), 100);
        assert_eq!(FrameEncoder::default().quality(), DEFAULT_JPEG_QUALITY);
    }

    #[rstest]
    #[case("1:1", 1.0)]
    #[case("16:9", 16.0 / 9.0)]
    #[case(" 4 : 3 ", 4.0 / 3.0)]
    #[case("1.5", 1.5)]
    fn test_parse_aspect_ratio(#[case] input: &str, #[case] expected: f64) {
        let ratio: AspectRatio = input.parse().unwrap();
        assert!((ratio.value() - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case("")]
    #[case("16:0")]
    #[case("-1")]
    #[case("wide")]
    #[case("inf")]
    fn test_parse_aspect_ratio_rejects(#[case] input: &str) {
        assert!(input.parse::<AspectRatio>().is_err());
    }
}
