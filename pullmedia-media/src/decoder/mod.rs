//! Decoder adapters
//!
//! A decoder adapter owns an upstream [`MediaSource`] and a codec backend and
//! is itself a [`MediaSource`] producing raw PCM or YUV.

pub mod audio;
pub mod video;

use crate::codec::CodecRegistry;
use pullmedia_core::{MediaError, MediaResult, MediaSource};
use tracing::info;

pub use audio::AudioDecoder;
pub use video::VideoDecoder;

/// Decoder adapter configuration
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Output buffers preallocated at start; matches downstream double buffering
    pub output_buffers: usize,
    /// Capacity of each audio output buffer in bytes
    pub audio_buffer_size: usize,
    /// Samples per channel substituted when a frame fails to decode and the
    /// backend does not report a frame size
    pub default_frame_samples: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            output_buffers: 2,
            audio_buffer_size: 32 * 1024,
            default_frame_samples: 1024,
        }
    }
}

impl DecoderConfig {
    /// Validate the configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.output_buffers == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "output_buffers must be at least 1".to_string(),
            });
        }
        // one 16-bit sample of eight channels
        if self.audio_buffer_size < 16 {
            return Err(MediaError::InvalidConfiguration {
                message: "audio_buffer_size must be at least 16 bytes".to_string(),
            });
        }
        if self.default_frame_samples == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "default_frame_samples must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Wrap `source` in the decoder its format calls for
pub fn create_decoder(
    source: Box<dyn MediaSource>,
    registry: &CodecRegistry,
    config: DecoderConfig,
) -> MediaResult<Box<dyn MediaSource>> {
    config.validate()?;
    let format = source.format();
    let mime_type = format.mime().unwrap_or_default().to_string();
    if mime_type.starts_with("audio/") {
        let backend = registry.create_audio(&mime_type)?;
        info!(mime = %mime_type, backend = backend.name(), "creating audio decoder");
        Ok(Box::new(AudioDecoder::new(source, backend, config)))
    } else if mime_type.starts_with("video/") {
        let backend = registry.create_video(&mime_type)?;
        info!(mime = %mime_type, backend = backend.name(), "creating video decoder");
        Ok(Box::new(VideoDecoder::new(source, backend, config)))
    } else {
        Err(MediaError::unsupported(mime_type))
    }
}
