//! Frame rasterization: turning a narrative frame into an encoded video frame.
//!
//! Text layout is left to richer rasterizers supplied by the host; the
//! default one composes the frame image onto the background colour.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::warn;

use reel_common::{ExportSettings, Frame};
use reel_mux::VideoFrame;

use crate::error::{ExportError, ExportResult};

/// Produces one encoded picture per frame. Every picture of an export must
/// have the same pixel size.
pub trait FrameRasterizer: Send {
    fn render(&mut self, frame: &Frame) -> ExportResult<VideoFrame>;
}

/// Letterboxes the frame image onto a solid background and encodes JPEG.
#[derive(Clone, Debug)]
pub struct JpegRasterizer {
    width: u32,
    height: u32,
    quality: u8,
    background: [u8; 3],
}

impl JpegRasterizer {
    pub fn new(width: u32, height: u32, quality: u8, background: [u8; 3]) -> Self {
        Self {
            width,
            height,
            quality: quality.clamp(1, 100),
            background,
        }
    }

    pub fn from_settings(settings: &ExportSettings) -> Self {
        Self::new(
            settings.width,
            settings.height,
            settings.image_quality,
            settings.background_colour,
        )
    }

    /// Background-filled canvas with the frame image scaled to fit and centred.
    fn compose(&self, frame: &Frame) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(self.width, self.height, Rgb(self.background));
        let Some(path) = frame.image.as_deref() else {
            return canvas;
        };
        match image::open(path) {
            Ok(picture) => {
                let fitted = picture
                    .resize(self.width, self.height, FilterType::Triangle)
                    .to_rgb8();
                let x = (self.width - fitted.width()) / 2;
                let y = (self.height - fitted.height()) / 2;
                imageops::overlay(&mut canvas, &fitted, i64::from(x), i64::from(y));
            }
            Err(e) => warn!(
                frame = frame.sequence_id,
                path = %path.display(),
                error = %e,
                "Frame image could not be loaded, using background only"
            ),
        }
        canvas
    }
}

impl FrameRasterizer for JpegRasterizer {
    fn render(&mut self, frame: &Frame) -> ExportResult<VideoFrame> {
        let canvas = self.compose(frame);
        let mut data = Vec::new();
        JpegEncoder::new_with_quality(&mut Cursor::new(&mut data), self.quality)
            .encode_image(&canvas)
            .map_err(|e| ExportError::RenderFailed {
                frame: frame.sequence_id,
                reason: e.to_string(),
            })?;
        Ok(VideoFrame::new(self.width, self.height, data))
    }
}
