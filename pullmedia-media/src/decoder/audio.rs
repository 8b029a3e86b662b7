//! Audio decoder adapter producing interleaved 16-bit PCM
//!
//! Output timestamps are reconstructed as
//! `anchor + samples_emitted * 1_000_000 / sample_rate` in integer math, where
//! the anchor is the time of the first input buffer after start, seek or a
//! format change.

use super::DecoderConfig;
use crate::codec::aac_config::AacUnpacker;
use crate::codec::{AudioCodecBackend, CodecConfig, DecodedAudio};
use crate::extractor::mp3::parse_mpeg_audio_header;
use pullmedia_core::{
    mime, BufferPool, Lifecycle, MediaBuffer, MediaError, MediaResult, MediaSource, MetaData,
    MetaKey, PoolConfig, ReadOptions, ReadOutcome,
};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Decoded samples not yet handed downstream
#[derive(Debug)]
struct PendingPcm {
    pcm: Vec<i16>,
    /// Next unread sample frame
    position: usize,
    channels: usize,
}

impl PendingPcm {
    fn remaining_frames(&self) -> usize {
        self.pcm.len() / self.channels - self.position
    }
}

/// Media source decoding an upstream compressed audio source
pub struct AudioDecoder<S: MediaSource> {
    source: S,
    backend: Box<dyn AudioCodecBackend>,
    config: DecoderConfig,
    lifecycle: Lifecycle,
    input_format: Arc<MetaData>,
    format: Arc<MetaData>,
    pool: Option<BufferPool>,
    codec_ready: bool,
    unpacker: Option<AacUnpacker>,
    sample_rate: u32,
    channels: u32,
    anchor_time_us: Option<i64>,
    samples_emitted: i64,
    target_time_us: Option<i64>,
    pending: Option<PendingPcm>,
    last_frame_samples: Option<u32>,
    input_done: bool,
}

impl<S: MediaSource> AudioDecoder<S> {
    /// Wrap `source`; the output format is published immediately
    pub fn new(source: S, backend: Box<dyn AudioCodecBackend>, config: DecoderConfig) -> Self {
        let input_format = source.format();
        let sample_rate = positive(&input_format, MetaKey::SampleRate);
        let channels = positive(&input_format, MetaKey::ChannelCount);
        let format = Arc::new(output_format(&input_format, sample_rate, channels));
        Self {
            source,
            backend,
            config,
            lifecycle: Lifecycle::new("audio-decoder"),
            input_format,
            format,
            pool: None,
            codec_ready: false,
            unpacker: None,
            sample_rate,
            channels,
            anchor_time_us: None,
            samples_emitted: 0,
            target_time_us: None,
            pending: None,
            last_frame_samples: None,
            input_done: false,
        }
    }

    /// The wrapped source
    pub fn source(&self) -> &S {
        &self.source
    }

    fn reset_stream_state(&mut self) {
        self.anchor_time_us = None;
        self.samples_emitted = 0;
        self.target_time_us = None;
        self.pending = None;
        self.input_done = false;
    }

    fn input_mime(&self) -> &str {
        self.input_format.mime().unwrap_or_default()
    }

    /// Config for the backend, from the track format or the first access unit
    fn codec_config(&self, first_unit: &[u8]) -> CodecConfig {
        let mut config = CodecConfig::from_format(&self.input_format);
        if let Some(asc) = self.unpacker.as_ref().and_then(AacUnpacker::config) {
            config.codec_specific_data = Some(asc.to_bytes());
            config.sample_rate = Some(asc.sample_rate);
            config.channels = Some(asc.channels());
        }
        if config.mime == mime::AUDIO_MPEG && config.sample_rate.is_none() {
            let word = first_unit
                .get(..4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
            if let Some(header) = word.and_then(|w| parse_mpeg_audio_header(w).ok()) {
                config.sample_rate = Some(header.sample_rate);
                config.channels = Some(header.channels);
            }
        }
        config
    }

    fn initialize_codec(&mut self, first_unit: &[u8]) -> MediaResult<()> {
        let codec_config = self.codec_config(first_unit);
        if codec_config.sample_rate.unwrap_or(self.sample_rate) == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("{} stream has no sample rate", codec_config.mime),
            });
        }
        self.backend.initialize(&codec_config)?;
        info!(
            backend = self.backend.name(),
            sample_rate = ?codec_config.sample_rate,
            channels = ?codec_config.channels,
            "audio codec initialized"
        );
        self.codec_ready = true;
        Ok(())
    }

    /// Strip framing and bring the codec up to date with the stream config
    fn prepare_access_unit<'a>(&mut self, data: &'a [u8]) -> MediaResult<Cow<'a, [u8]>> {
        if self.input_mime() == mime::AUDIO_AAC && self.unpacker.is_none() {
            self.unpacker = Some(AacUnpacker::new(
                self.input_format.find_data(MetaKey::CodecSpecificData),
            )?);
        }
        let unit = match self.unpacker.as_mut() {
            Some(unpacker) => {
                let (unit, changed) = unpacker.unpack(data)?;
                if changed && self.codec_ready {
                    debug!("AAC stream config changed, reinitializing codec");
                    self.codec_ready = false;
                }
                Cow::Owned(unit)
            }
            None => Cow::Borrowed(data),
        };
        if !self.codec_ready {
            self.initialize_codec(&unit)?;
        }
        Ok(unit)
    }

    fn silence(&self) -> DecodedAudio {
        let frames = self
            .backend
            .frame_samples()
            .or(self.last_frame_samples)
            .unwrap_or(self.config.default_frame_samples);
        DecodedAudio::silence(frames as usize, self.sample_rate, self.channels.max(1))
    }

    fn decode_input(&mut self, input: &MediaBuffer) -> MediaResult<DecodedAudio> {
        let unit = match self.prepare_access_unit(input.data()) {
            Ok(unit) => unit,
            Err(e) if self.codec_ready => {
                warn!(error = %e, "unparseable access unit, substituting silence");
                return Ok(self.silence());
            }
            Err(e) => return Err(e),
        };
        match self.backend.decode(&unit) {
            Ok(decoded) => {
                if decoded.frames() > 0 {
                    self.last_frame_samples = Some(decoded.frames() as u32);
                }
                Ok(decoded)
            }
            Err(e) => {
                warn!(
                    backend = self.backend.name(),
                    error = %e,
                    time_us = ?input.time_us(),
                    "decode failed, substituting silence"
                );
                Ok(self.silence())
            }
        }
    }

    fn publish_format(&mut self, sample_rate: u32, channels: u32) {
        info!(
            old_rate = self.sample_rate,
            new_rate = sample_rate,
            old_channels = self.channels,
            new_channels = channels,
            "audio output format changed"
        );
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.format = Arc::new(output_format(&self.input_format, sample_rate, channels));
    }

    fn output_rate(&self) -> MediaResult<i64> {
        match self.sample_rate {
            0 => Err(MediaError::InvalidConfiguration {
                message: "decoded audio has no sample rate".into(),
            }),
            rate => Ok(i64::from(rate)),
        }
    }

    fn current_time_us(&self, rate: i64) -> i64 {
        self.anchor_time_us.unwrap_or(0) + self.samples_emitted * 1_000_000 / rate
    }

    /// Emit the next slice of pending PCM, honouring a pending target time
    fn emit_pending(&mut self) -> MediaResult<Option<MediaBuffer>> {
        if self.pending.is_none() {
            return Ok(None);
        }
        let rate = self.output_rate()?;
        let now = self.current_time_us(rate);
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };

        if let Some(target) = self.target_time_us {
            if now < target {
                // round up so the first delivered sample is at or after the target
                let behind = (((target - now) * rate + 999_999) / 1_000_000) as usize;
                let dropped = behind.min(pending.remaining_frames());
                pending.position += dropped;
                self.samples_emitted += dropped as i64;
                trace!(dropped, target, "trimming output before target time");
            }
            if pending.remaining_frames() > 0 {
                self.target_time_us = None;
            }
        }

        let channels = pending.channels;
        let remaining = pending.remaining_frames();
        if remaining == 0 {
            self.pending = None;
            return Ok(None);
        }
        let pool = self.pool.as_ref().ok_or(MediaError::Stopped)?;
        let mut buffer = pool.try_acquire()?;
        let frames = remaining.min(buffer.capacity() / (2 * channels));
        let start = pending.position * channels;
        let samples = &pending.pcm[start..start + frames * channels];
        for (dst, sample) in buffer.data_mut().chunks_exact_mut(2).zip(samples) {
            dst.copy_from_slice(&sample.to_le_bytes());
        }
        buffer.set_range(0, frames * channels * 2)?;
        pending.position += frames;
        if pending.remaining_frames() == 0 {
            self.pending = None;
        }

        let time_us = self.current_time_us(rate);
        buffer.meta_mut().set_i64(MetaKey::Time, time_us);
        self.samples_emitted += frames as i64;
        trace!(time_us, frames, "audio output");
        Ok(Some(buffer.freeze()))
    }
}

fn positive(format: &MetaData, key: MetaKey) -> u32 {
    format
        .find_i32(key)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

fn output_format(input: &MetaData, sample_rate: u32, channels: u32) -> MetaData {
    let mut format = MetaData::with_mime(mime::AUDIO_RAW);
    format
        .set_i32(MetaKey::SampleRate, sample_rate as i32)
        .set_i32(MetaKey::ChannelCount, channels as i32);
    if let Some(duration) = input.find_i64(MetaKey::Duration) {
        format.set_i64(MetaKey::Duration, duration);
    }
    format
}

impl<S: MediaSource> MediaSource for AudioDecoder<S> {
    #[instrument(skip_all)]
    fn start(&mut self, params: Option<&MetaData>) -> MediaResult<()> {
        self.lifecycle.start()?;
        if let Err(e) = self.source.start(params) {
            self.lifecycle.stop()?;
            return Err(e);
        }
        let pool = BufferPool::new(PoolConfig::new(
            "audio-decoder",
            self.config.output_buffers,
            self.config.audio_buffer_size,
        ));
        match pool {
            Ok(pool) => self.pool = Some(pool),
            Err(e) => {
                let _ = self.source.stop();
                self.lifecycle.stop()?;
                return Err(e);
            }
        }
        self.input_format = self.source.format();
        self.reset_stream_state();
        Ok(())
    }

    #[instrument(skip_all)]
    fn stop(&mut self) -> MediaResult<()> {
        self.lifecycle.stop()?;
        self.pending = None;
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        self.backend.release();
        self.codec_ready = false;
        self.unpacker = None;
        self.source.stop()
    }

    fn format(&self) -> Arc<MetaData> {
        Arc::clone(&self.format)
    }

    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome> {
        self.lifecycle.check_readable()?;

        let mut upstream = ReadOptions::new();
        if let Some(seek) = options.seek() {
            debug!(time_us = seek.time_us, mode = ?seek.mode, "audio decoder seek");
            upstream.set_seek_to(seek.time_us, seek.mode);
            self.reset_stream_state();
            if self.codec_ready {
                self.backend.reset();
            }
        }
        if let Some(skip) = options.skip_until_us() {
            upstream.set_skip_until(skip);
        }

        loop {
            if let Some(buffer) = self.emit_pending()? {
                return Ok(ReadOutcome::Buffer(buffer));
            }
            if self.input_done {
                return Ok(ReadOutcome::EndOfStream);
            }

            let outcome = self.source.read(&upstream)?;
            upstream = ReadOptions::new();
            let input = match outcome {
                ReadOutcome::Buffer(input) => input,
                ReadOutcome::EndOfStream => {
                    debug!(samples = self.samples_emitted, "audio input exhausted");
                    self.input_done = true;
                    continue;
                }
                ReadOutcome::FormatChanged => {
                    self.input_format = self.source.format();
                    self.codec_ready = false;
                    self.unpacker = None;
                    continue;
                }
            };

            if self.anchor_time_us.is_none() {
                self.anchor_time_us = Some(input.time_us().unwrap_or(0));
                self.samples_emitted = 0;
            }
            if let Some(target) = input.meta().find_i64(MetaKey::TargetTime) {
                self.target_time_us = Some(target);
            }

            let decoded = self.decode_input(&input)?;
            input.release();

            if decoded.sample_rate != 0
                && (decoded.sample_rate != self.sample_rate || decoded.channels != self.channels)
            {
                // Published format first; the decoded buffer is discarded.
                self.publish_format(decoded.sample_rate, decoded.channels);
                self.anchor_time_us = None;
                self.samples_emitted = 0;
                return Ok(ReadOutcome::FormatChanged);
            }
            if decoded.pcm.is_empty() || decoded.channels == 0 {
                continue;
            }
            self.pending = Some(PendingPcm {
                pcm: decoded.pcm,
                position: 0,
                channels: decoded.channels as usize,
            });
        }
    }
}
