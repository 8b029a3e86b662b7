//! AAC and MPEG audio backends on symphonia's codec implementations
//!
//! Only symphonia's decoders are used; framing is handled by the extractors
//! and [`AacUnpacker`](super::aac_config::AacUnpacker).

use super::{AudioCodecBackend, CodecConfig, DecodedAudio};
use pullmedia_core::{mime, MediaError, MediaResult};
use std::fmt;
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_MP3,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::{debug, error};

/// Audio backend wrapping one symphonia decoder
pub struct SymphoniaAudioBackend {
    name: &'static str,
    codec_type: CodecType,
    decoder: Option<Box<dyn Decoder>>,
    frame_samples: Option<u32>,
    packet_ts: u64,
}

impl fmt::Debug for SymphoniaAudioBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymphoniaAudioBackend")
            .field("name", &self.name)
            .field("initialized", &self.decoder.is_some())
            .field("frame_samples", &self.frame_samples)
            .finish()
    }
}

impl SymphoniaAudioBackend {
    /// AAC decoder taking raw access units
    pub fn aac() -> Self {
        Self::with_codec("symphonia-aac", CODEC_TYPE_AAC)
    }

    /// MPEG audio layer III decoder taking whole frames
    pub fn mp3() -> Self {
        Self::with_codec("symphonia-mp3", CODEC_TYPE_MP3)
    }

    fn with_codec(name: &'static str, codec_type: CodecType) -> Self {
        Self {
            name,
            codec_type,
            decoder: None,
            frame_samples: None,
            packet_ts: 0,
        }
    }

    fn decoding_failed(&self, reason: impl Into<String>) -> MediaError {
        MediaError::DecodingFailed {
            codec: self.name.to_string(),
            reason: reason.into(),
        }
    }
}

impl AudioCodecBackend for SymphoniaAudioBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&mut self, config: &CodecConfig) -> MediaResult<()> {
        let mut params = CodecParameters::new();
        params.for_codec(self.codec_type);
        if let Some(rate) = config.sample_rate {
            params.with_sample_rate(rate);
        }
        if let Some(channels) = config.channels.filter(|c| (1..=8).contains(c)) {
            params.with_channels(Channels::from_bits_truncate((1u32 << channels) - 1));
        }
        if let Some(csd) = &config.codec_specific_data {
            params.with_extra_data(csd.clone().into_boxed_slice());
        }
        if self.codec_type == CODEC_TYPE_AAC && config.mime != mime::AUDIO_AAC {
            return Err(MediaError::unsupported(config.mime.clone()));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| {
                error!("Failed to create decoder: {}", e);
                MediaError::unsupported(format!("{}: {}", self.name, e))
            })?;
        self.frame_samples = decoder.codec_params().max_frames_per_packet.map(|n| n as u32);
        debug!(backend = self.name, sample_rate = ?config.sample_rate, "decoder initialized");
        self.decoder = Some(decoder);
        self.packet_ts = 0;
        Ok(())
    }

    fn decode(&mut self, access_unit: &[u8]) -> MediaResult<DecodedAudio> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(MediaError::invalid_state("initialized", "uninitialized"));
        };
        let packet = Packet::new_from_slice(0, self.packet_ts, 0, access_unit);
        // AudioBufferRef borrows the decoder; copy out before the next call.
        let result = match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frames = decoded.frames();
                let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                samples.copy_interleaved_ref(decoded);
                Ok((
                    samples.samples()[..frames * spec.channels.count()].to_vec(),
                    spec,
                    frames,
                ))
            }
            Err(SymphoniaError::DecodeError(reason)) => Err(format!("invalid data: {reason}")),
            Err(other) => Err(other.to_string()),
        };
        match result {
            Ok((pcm, spec, frames)) => {
                self.packet_ts += frames as u64;
                Ok(DecodedAudio {
                    pcm,
                    sample_rate: spec.rate,
                    channels: spec.channels.count() as u32,
                })
            }
            Err(reason) => Err(self.decoding_failed(reason)),
        }
    }

    fn reset(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
        self.packet_ts = 0;
    }

    fn release(&mut self) {
        self.decoder = None;
    }

    fn frame_samples(&self) -> Option<u32> {
        self.frame_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aac_initializes_from_config() {
        let mut backend = SymphoniaAudioBackend::aac();
        backend
            .initialize(
                &CodecConfig::new(mime::AUDIO_AAC)
                    .sample_rate(44100)
                    .channels(2)
                    .codec_specific_data(&[0x12, 0x10]),
            )
            .unwrap();
        assert_eq!(backend.name(), "symphonia-aac");
    }

    #[test]
    fn test_decode_before_initialize_fails() {
        let mut backend = SymphoniaAudioBackend::mp3();
        assert!(matches!(
            backend.decode(&[0xFF, 0xFB, 0x90, 0x00]),
            Err(MediaError::InvalidState { .. })
        ));
    }
}
