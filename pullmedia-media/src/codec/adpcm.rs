//! IMA ADPCM block decoder

use super::{AudioCodecBackend, CodecConfig, DecodedAudio};
use pullmedia_core::{MediaError, MediaResult};

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

const INDEX_TABLE: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];

/// Per-channel predictor state
#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    predictor: i32,
    step_index: i32,
}

impl Channel {
    fn expand(&mut self, nibble: u8) -> i16 {
        let step = STEP_TABLE[self.step_index as usize];
        let mut diff = step >> 3;
        if nibble & 4 != 0 {
            diff += step;
        }
        if nibble & 2 != 0 {
            diff += step >> 1;
        }
        if nibble & 1 != 0 {
            diff += step >> 2;
        }
        if nibble & 8 != 0 {
            self.predictor -= diff;
        } else {
            self.predictor += diff;
        }
        self.predictor = self.predictor.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        self.step_index = (self.step_index + INDEX_TABLE[usize::from(nibble & 7)]).clamp(0, 88);
        self.predictor as i16
    }
}

/// Samples per channel in a block of `block_align` bytes
pub fn samples_per_block(block_align: usize, channels: usize) -> usize {
    if channels == 0 || block_align < 4 * channels {
        return 0;
    }
    (block_align - 4 * channels) * 2 / channels + 1
}

/// Native IMA ADPCM backend for WAV-style blocks
#[derive(Debug, Default)]
pub struct ImaAdpcmBackend {
    sample_rate: u32,
    channels: usize,
    block_align: usize,
    initialized: bool,
}

impl ImaAdpcmBackend {
    /// New, uninitialized backend
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_block(&self, block: &[u8], pcm: &mut Vec<i16>) -> MediaResult<()> {
        let channels = self.channels;
        if block.len() < 4 * channels {
            return Err(MediaError::DecodingFailed {
                codec: "ima-adpcm".to_string(),
                reason: format!("block of {} bytes has no room for headers", block.len()),
            });
        }
        let mut state = vec![Channel::default(); channels];
        for (c, channel) in state.iter_mut().enumerate() {
            let header = &block[4 * c..4 * c + 4];
            channel.predictor = i32::from(i16::from_le_bytes([header[0], header[1]]));
            if header[2] > 88 {
                return Err(MediaError::DecodingFailed {
                    codec: "ima-adpcm".to_string(),
                    reason: format!("step index {} out of range", header[2]),
                });
            }
            channel.step_index = i32::from(header[2]);
        }

        let frames = samples_per_block(block.len(), channels);
        let base = pcm.len();
        pcm.resize(base + frames * channels, 0);
        for (c, channel) in state.iter().enumerate() {
            pcm[base + c] = channel.predictor as i16;
        }

        // Data is interleaved in 4-byte words per channel, 8 samples per word.
        let data = &block[4 * channels..];
        for (group, words) in data.chunks_exact(4 * channels).enumerate() {
            for (c, word) in words.chunks_exact(4).enumerate() {
                for (i, &byte) in word.iter().enumerate() {
                    let frame = 1 + group * 8 + i * 2;
                    let low = state[c].expand(byte & 0x0F);
                    let high = state[c].expand(byte >> 4);
                    pcm[base + frame * channels + c] = low;
                    pcm[base + (frame + 1) * channels + c] = high;
                }
            }
        }
        Ok(())
    }
}

impl AudioCodecBackend for ImaAdpcmBackend {
    fn name(&self) -> &'static str {
        "ima-adpcm"
    }

    fn initialize(&mut self, config: &CodecConfig) -> MediaResult<()> {
        let (Some(sample_rate), Some(channels), Some(block_align)) =
            (config.sample_rate, config.channels, config.block_align)
        else {
            return Err(MediaError::unsupported(
                "IMA ADPCM needs sample rate, channel count and block alignment",
            ));
        };
        let channels = channels as usize;
        if channels == 0 || channels > 2 || samples_per_block(block_align, channels) == 0 {
            return Err(MediaError::unsupported(format!(
                "IMA ADPCM with {channels} channels and {block_align}-byte blocks"
            )));
        }
        if (block_align - 4 * channels) % (4 * channels) != 0 {
            return Err(MediaError::unsupported(format!(
                "IMA ADPCM block alignment {block_align} is not word aligned"
            )));
        }
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.block_align = block_align;
        self.initialized = true;
        Ok(())
    }

    fn decode(&mut self, access_unit: &[u8]) -> MediaResult<DecodedAudio> {
        if !self.initialized {
            return Err(MediaError::invalid_state("initialized", "uninitialized"));
        }
        let mut pcm = Vec::new();
        for block in access_unit.chunks(self.block_align) {
            if block.len() < self.block_align {
                // trailing partial block
                break;
            }
            self.decode_block(block, &mut pcm)?;
        }
        Ok(DecodedAudio {
            pcm,
            sample_rate: self.sample_rate,
            channels: self.channels as u32,
        })
    }

    fn reset(&mut self) {}

    fn release(&mut self) {
        self.initialized = false;
    }

    fn frame_samples(&self) -> Option<u32> {
        self.initialized
            .then(|| samples_per_block(self.block_align, self.channels) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullmedia_core::mime;

    fn backend(channels: u32, block_align: usize) -> ImaAdpcmBackend {
        let mut backend = ImaAdpcmBackend::new();
        backend
            .initialize(
                &CodecConfig::new(mime::AUDIO_IMA_ADPCM)
                    .sample_rate(8000)
                    .channels(channels)
                    .block_align(block_align),
            )
            .unwrap();
        backend
    }

    #[test]
    fn test_samples_per_block() {
        assert_eq!(samples_per_block(256, 1), 505);
        assert_eq!(samples_per_block(512, 2), 505);
        assert_eq!(samples_per_block(2, 1), 0);
    }

    #[test]
    fn test_decode_mono_block() {
        let mut backend = backend(1, 8);
        // predictor 100, step index 0, then nibbles 0x0 and 0x8 alternating
        let block = [100, 0, 0, 0, 0x80, 0x80, 0x80, 0x80];
        let decoded = backend.decode(&block).unwrap();
        assert_eq!(decoded.frames(), 9);
        assert_eq!(decoded.pcm[0], 100);
        // nibble 0 adds step >> 3, nibble 8 subtracts it again
        assert_eq!(decoded.pcm[1], 100);
        assert_eq!(decoded.pcm[2], 100);
        assert_eq!(backend.frame_samples(), Some(9));
    }

    #[test]
    fn test_decode_stereo_interleaves() {
        let mut backend = backend(2, 16);
        let mut block = vec![10, 0, 0, 0, 0xF6, 0xFF, 0, 0];
        block.extend_from_slice(&[0x44; 4]);
        block.extend_from_slice(&[0xCC; 4]);
        let decoded = backend.decode(&block).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.frames(), 9);
        assert_eq!(decoded.pcm[0], 10);
        assert_eq!(decoded.pcm[1], -10);
        assert!(decoded.pcm[2] > 10, "left channel rises");
        assert!(decoded.pcm[3] < -10, "right channel falls");
    }

    #[test]
    fn test_rejects_bad_config() {
        let mut backend = ImaAdpcmBackend::new();
        assert!(backend
            .initialize(&CodecConfig::new(mime::AUDIO_IMA_ADPCM).sample_rate(8000))
            .is_err());
        assert!(backend.decode(&[0; 8]).is_err());
    }
}
