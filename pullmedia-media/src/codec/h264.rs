//! H.264 backend on openh264

use super::{CodecConfig, DecodedPicture, VideoCodecBackend};
use openh264::decoder::Decoder as H264Decoder;
use openh264::formats::YUVSource;
use pullmedia_core::{MediaError, MediaResult};
use std::fmt;
use tracing::debug;

/// Video backend wrapping an openh264 decoder
pub struct OpenH264Backend {
    decoder: Option<H264Decoder>,
}

impl fmt::Debug for OpenH264Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenH264Backend")
            .field("initialized", &self.decoder.is_some())
            .finish()
    }
}

impl OpenH264Backend {
    /// New, uninitialized backend
    pub fn new() -> Self {
        Self { decoder: None }
    }
}

impl Default for OpenH264Backend {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy a strided plane into a tightly packed one
fn pack_plane(out: &mut Vec<u8>, plane: &[u8], stride: usize, width: usize, height: usize) {
    for row in plane.chunks(stride).take(height) {
        out.extend_from_slice(&row[..width.min(row.len())]);
    }
}

impl VideoCodecBackend for OpenH264Backend {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn initialize(&mut self, config: &CodecConfig) -> MediaResult<()> {
        let decoder = H264Decoder::new().map_err(|e| MediaError::DecodingFailed {
            codec: "openh264".to_string(),
            reason: format!("Failed to create H.264 decoder: {}", e),
        })?;
        debug!(width = ?config.width, height = ?config.height, "openh264 decoder created");
        self.decoder = Some(decoder);
        if let Some(csd) = config.codec_specific_data.as_deref() {
            // SPS/PPS in Annex B form prime the decoder
            self.decode(csd)?;
        }
        Ok(())
    }

    fn decode(&mut self, access_unit: &[u8]) -> MediaResult<Option<DecodedPicture>> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state("initialized", "uninitialized"))?;
        let decoded = decoder
            .decode(access_unit)
            .map_err(|e| MediaError::DecodingFailed {
                codec: "openh264".to_string(),
                reason: format!("H.264 decoding failed: {}", e),
            })?;
        let Some(yuv) = decoded else {
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));
        let mut data = Vec::with_capacity(DecodedPicture::i420_size(width as u32, height as u32));
        pack_plane(&mut data, yuv.y(), y_stride, width, height);
        pack_plane(&mut data, yuv.u(), u_stride, chroma_w, chroma_h);
        pack_plane(&mut data, yuv.v(), v_stride, chroma_w, chroma_h);
        Ok(Some(DecodedPicture {
            width: width as u32,
            height: height as u32,
            data,
        }))
    }

    fn reset(&mut self) {
        // openh264 has no flush entry point; a fresh decoder drops references
        if self.decoder.is_some() {
            self.decoder = H264Decoder::new().ok();
        }
    }

    fn release(&mut self) {
        self.decoder = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_plane_drops_padding() {
        let mut out = Vec::new();
        pack_plane(&mut out, &[1, 2, 0, 0, 3, 4, 0, 0], 4, 2, 2);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_requires_initialize() {
        let mut backend = OpenH264Backend::new();
        assert!(backend.decode(&[0, 0, 0, 1, 0x65]).is_err());
    }
}
