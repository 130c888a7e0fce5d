use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::SessionError;

/// A decoded RGB8 still from the remote participant's video.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8, row-major
    pub rgb: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl VideoFrame {
    /// Non-empty with a buffer matching its dimensions.
    pub fn is_decodable(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgb.len() == self.width as usize * self.height as usize * 3
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, SessionError> {
        if !self.is_decodable() {
            return Err(SessionError::CaptureTaskTransientFailure(format!(
                "frame {}x{} has {} bytes",
                self.width,
                self.height,
                self.rgb.len()
            )));
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode(&self.rgb, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| SessionError::CaptureTaskTransientFailure(e.to_string()))?;
        Ok(jpeg)
    }

    /// Base64 JPEG as the analyzer's analyze-frame endpoint expects it.
    pub fn to_jpeg_base64(&self, quality: u8) -> Result<String, SessionError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_jpeg(quality)?))
    }
}

/// Read-only access to the latest remote video frame.
pub trait VideoSink: Send + Sync {
    fn snapshot(&self) -> Option<Arc<VideoFrame>>;
}

/// Latest-frame slot filled by whatever decodes the remote track.
#[derive(Debug)]
pub struct FrameSlot {
    tx: watch::Sender<Option<Arc<VideoFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, frame: VideoFrame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSink for FrameSlot {
    fn snapshot(&self) -> Option<Arc<VideoFrame>> {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32) -> VideoFrame {
        VideoFrame {
            width,
            height,
            rgb: vec![128; (width * height * 3) as usize],
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_jpeg_encoding_produces_soi_marker() {
        let jpeg = gray_frame(16, 8).to_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_truncated_frame_is_not_decodable() {
        let mut frame = gray_frame(4, 4);
        frame.rgb.truncate(10);
        assert!(!frame.is_decodable());
        assert!(frame.to_jpeg_base64(80).is_err());
    }

    #[test]
    fn test_frame_slot_keeps_latest() {
        let slot = FrameSlot::new();
        assert!(slot.snapshot().is_none());

        slot.publish(gray_frame(2, 2));
        slot.publish(gray_frame(4, 4));
        assert_eq!(slot.snapshot().unwrap().width, 4);

        slot.clear();
        assert!(slot.snapshot().is_none());
    }
}
