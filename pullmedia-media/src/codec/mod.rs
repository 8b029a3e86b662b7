//! Codec backends behind the decoder adapters
//!
//! A backend is driven through an initialize/decode/release triad. The
//! decoder adapters in [`crate::decoder`] own all stream bookkeeping
//! (timestamps, format changes, seek resets); backends only turn access units
//! into samples or pictures.

pub mod aac_config;
pub mod adpcm;
pub mod m4v_h263;
pub mod registry;

#[cfg(feature = "h264")]
pub mod h264;
#[cfg(feature = "symphonia")]
pub mod symphonia;

use pullmedia_core::{MetaData, MetaKey};
use std::fmt;

pub use adpcm::ImaAdpcmBackend;
pub use registry::CodecRegistry;

/// Parameters handed to a backend's `initialize`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecConfig {
    /// Input MIME type
    pub mime: String,
    /// Sample rate (for audio)
    pub sample_rate: Option<u32>,
    /// Number of channels (for audio)
    pub channels: Option<u32>,
    /// Out-of-band configuration bytes, e.g. an AudioSpecificConfig
    pub codec_specific_data: Option<Vec<u8>>,
    /// Bytes per block for block-based codecs
    pub block_align: Option<usize>,
    /// Video width (for video)
    pub width: Option<u32>,
    /// Video height (for video)
    pub height: Option<u32>,
}

impl CodecConfig {
    /// Create new codec config
    pub fn new(mime: &str) -> Self {
        Self {
            mime: mime.to_string(),
            ..Self::default()
        }
    }

    /// Build from a track format
    pub fn from_format(format: &MetaData) -> Self {
        let positive = |key| {
            format
                .find_i32(key)
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
        };
        Self {
            mime: format.mime().unwrap_or_default().to_string(),
            sample_rate: positive(MetaKey::SampleRate),
            channels: positive(MetaKey::ChannelCount),
            codec_specific_data: format
                .find_data(MetaKey::CodecSpecificData)
                .map(<[u8]>::to_vec),
            block_align: positive(MetaKey::BlockAlign).map(|v| v as usize),
            width: positive(MetaKey::Width),
            height: positive(MetaKey::Height),
        }
    }

    /// Set sample rate
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Set channels
    pub fn channels(mut self, channels: u32) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Set codec specific data
    pub fn codec_specific_data(mut self, data: &[u8]) -> Self {
        self.codec_specific_data = Some(data.to_vec());
        self
    }

    /// Set block alignment
    pub fn block_align(mut self, block_align: usize) -> Self {
        self.block_align = Some(block_align);
        self
    }

    /// Set video resolution
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// Interleaved 16-bit PCM produced by one decode call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedAudio {
    /// Interleaved samples
    pub pcm: Vec<i16>,
    /// Sample rate negotiated by the codec
    pub sample_rate: u32,
    /// Channel count negotiated by the codec
    pub channels: u32,
}

impl DecodedAudio {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.pcm.len() / self.channels as usize
        }
    }

    /// `frames` samples per channel of silence
    pub fn silence(frames: usize, sample_rate: u32, channels: u32) -> Self {
        Self {
            pcm: vec![0; frames * channels as usize],
            sample_rate,
            channels,
        }
    }
}

/// Planar YUV 4:2:0 picture with tightly packed planes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPicture {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Y plane followed by U and V planes
    pub data: Vec<u8>,
}

impl DecodedPicture {
    /// Bytes needed for an I420 picture of the given size
    pub fn i420_size(width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))
    }

    /// Black picture of the given size
    pub fn blank(width: u32, height: u32) -> Self {
        let luma = width as usize * height as usize;
        let mut data = vec![16u8; Self::i420_size(width, height)];
        data[luma..].fill(128);
        Self {
            width,
            height,
            data,
        }
    }
}

/// Audio codec backend
pub trait AudioCodecBackend: Send + fmt::Debug {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Prepare for decoding; called once before the first `decode` and again
    /// whenever the stream configuration changes
    fn initialize(&mut self, config: &CodecConfig) -> pullmedia_core::MediaResult<()>;

    /// Decode one access unit
    fn decode(&mut self, access_unit: &[u8]) -> pullmedia_core::MediaResult<DecodedAudio>;

    /// Drop decoder history, e.g. after a seek
    fn reset(&mut self);

    /// Free codec resources
    fn release(&mut self);

    /// Samples per channel in one access unit, when fixed
    fn frame_samples(&self) -> Option<u32>;
}

/// Video codec backend
pub trait VideoCodecBackend: Send + fmt::Debug {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Prepare for decoding
    fn initialize(&mut self, config: &CodecConfig) -> pullmedia_core::MediaResult<()>;

    /// Decode one access unit; `None` when the codec needs more input
    fn decode(
        &mut self,
        access_unit: &[u8],
    ) -> pullmedia_core::MediaResult<Option<DecodedPicture>>;

    /// Drop reference pictures, e.g. after a seek
    fn reset(&mut self);

    /// Free codec resources
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullmedia_core::mime;

    #[test]
    fn test_config_from_format() {
        let mut format = MetaData::with_mime(mime::AUDIO_AAC);
        format
            .set_i32(MetaKey::SampleRate, 44100)
            .set_i32(MetaKey::ChannelCount, 2)
            .set_data(MetaKey::CodecSpecificData, &[0x12, 0x10]);
        let config = CodecConfig::from_format(&format);
        assert_eq!(
            config,
            CodecConfig::new(mime::AUDIO_AAC)
                .sample_rate(44100)
                .channels(2)
                .codec_specific_data(&[0x12, 0x10])
        );
    }

    #[test]
    fn test_blank_picture_layout() {
        let picture = DecodedPicture::blank(4, 2);
        assert_eq!(picture.data.len(), 8 + 2 + 2);
        assert_eq!(&picture.data[..8], &[16; 8]);
        assert_eq!(&picture.data[8..], &[128; 4]);
    }
}
