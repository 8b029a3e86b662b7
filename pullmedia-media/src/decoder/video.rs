//! Video decoder adapter producing I420 pictures

use super::DecoderConfig;
use crate::codec::m4v_h263::sniff_dimensions;
use crate::codec::{CodecConfig, DecodedPicture, VideoCodecBackend};
use pullmedia_core::{
    mime, BufferPool, Lifecycle, MediaBuffer, MediaError, MediaResult, MediaSource, MetaData,
    MetaKey, PoolConfig, ReadOptions, ReadOutcome,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Color format tag for planar YUV 4:2:0
pub const COLOR_FORMAT_I420: i32 = 19;

/// Media source decoding an upstream compressed video source
pub struct VideoDecoder<S: MediaSource> {
    source: S,
    backend: Box<dyn VideoCodecBackend>,
    config: DecoderConfig,
    lifecycle: Lifecycle,
    input_format: Arc<MetaData>,
    format: Arc<MetaData>,
    pool: Option<BufferPool>,
    width: u32,
    height: u32,
    codec_ready: bool,
    target_time_us: Option<i64>,
}

impl<S: MediaSource> VideoDecoder<S> {
    /// Wrap `source`; dimensions come from its format or its codec config
    pub fn new(source: S, backend: Box<dyn VideoCodecBackend>, config: DecoderConfig) -> Self {
        let input_format = source.format();
        let (width, height) = input_dimensions(&input_format).unwrap_or((0, 0));
        let format = Arc::new(output_format(&input_format, width, height));
        Self {
            source,
            backend,
            config,
            lifecycle: Lifecycle::new("video-decoder"),
            input_format,
            format,
            pool: None,
            width,
            height,
            codec_ready: false,
            target_time_us: None,
        }
    }

    fn initialize_codec(&mut self, first_unit: &[u8]) -> MediaResult<()> {
        if self.width == 0 || self.height == 0 {
            let mime_type = self.input_format.mime().unwrap_or_default();
            if let Some((width, height)) = sniff_dimensions(mime_type, first_unit) {
                debug!(width, height, "dimensions taken from bitstream");
                self.width = width;
                self.height = height;
                self.format = Arc::new(output_format(&self.input_format, width, height));
            }
        }
        let mut codec_config = CodecConfig::from_format(&self.input_format);
        if self.width > 0 && self.height > 0 {
            codec_config = codec_config.resolution(self.width, self.height);
        }
        self.backend.initialize(&codec_config)?;
        info!(
            backend = self.backend.name(),
            width = self.width,
            height = self.height,
            "video codec initialized"
        );
        self.codec_ready = true;
        Ok(())
    }

    /// Pool sized for the current picture, recreated on a size change
    fn output_pool(&mut self, picture_size: usize) -> MediaResult<&BufferPool> {
        let stale = self
            .pool
            .as_ref()
            .map_or(true, |pool| pool.buffer_size() < picture_size);
        if stale {
            if let Some(old) = self.pool.take() {
                old.close();
            }
            self.pool = Some(BufferPool::new(PoolConfig::new(
                "video-decoder",
                self.config.output_buffers,
                picture_size,
            ))?);
        }
        self.pool.as_ref().ok_or(MediaError::Stopped)
    }

    fn emit(&mut self, picture: DecodedPicture, input: &MediaBuffer) -> MediaResult<MediaBuffer> {
        let pool = self.output_pool(picture.data.len())?;
        let mut buffer = pool.try_acquire()?;
        buffer.fill_from(&picture.data)?;
        if let Some(time_us) = input.time_us() {
            buffer.meta_mut().set_i64(MetaKey::Time, time_us);
        }
        if input.meta().is_sync_frame() {
            buffer.meta_mut().set_i32(MetaKey::IsSyncFrame, 1);
        }
        Ok(buffer.freeze())
    }
}

fn input_dimensions(format: &MetaData) -> Option<(u32, u32)> {
    let width = format.find_i32(MetaKey::Width).and_then(|w| u32::try_from(w).ok());
    let height = format.find_i32(MetaKey::Height).and_then(|h| u32::try_from(h).ok());
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => {
            let mime_type = format.mime()?;
            let csd = format.find_data(MetaKey::CodecSpecificData)?;
            sniff_dimensions(mime_type, csd)
        }
    }
}

fn output_format(input: &MetaData, width: u32, height: u32) -> MetaData {
    let mut format = MetaData::with_mime(mime::VIDEO_RAW);
    format
        .set_i32(MetaKey::Width, width as i32)
        .set_i32(MetaKey::Height, height as i32)
        .set_i32(MetaKey::ColorFormat, COLOR_FORMAT_I420);
    if let Some(duration) = input.find_i64(MetaKey::Duration) {
        format.set_i64(MetaKey::Duration, duration);
    }
    if let Some(rate) = input.find_i32(MetaKey::FrameRate) {
        format.set_i32(MetaKey::FrameRate, rate);
    }
    format
}

impl<S: MediaSource> MediaSource for VideoDecoder<S> {
    #[instrument(skip_all)]
    fn start(&mut self, params: Option<&MetaData>) -> MediaResult<()> {
        self.lifecycle.start()?;
        if let Err(e) = self.source.start(params) {
            self.lifecycle.stop()?;
            return Err(e);
        }
        self.input_format = self.source.format();
        self.target_time_us = None;
        if self.width > 0 && self.height > 0 {
            let size = DecodedPicture::i420_size(self.width, self.height);
            if let Err(e) = self.output_pool(size) {
                let _ = self.source.stop();
                self.lifecycle.stop()?;
                return Err(e);
            }
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn stop(&mut self) -> MediaResult<()> {
        self.lifecycle.stop()?;
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        self.backend.release();
        self.codec_ready = false;
        self.source.stop()
    }

    fn format(&self) -> Arc<MetaData> {
        Arc::clone(&self.format)
    }

    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome> {
        self.lifecycle.check_readable()?;

        let mut upstream = ReadOptions::new();
        if let Some(seek) = options.seek() {
            debug!(time_us = seek.time_us, mode = ?seek.mode, "video decoder seek");
            upstream.set_seek_to(seek.time_us, seek.mode);
            self.target_time_us = None;
            if self.codec_ready {
                self.backend.reset();
            }
        }
        if let Some(skip) = options.skip_until_us() {
            upstream.set_skip_until(skip);
        }

        loop {
            let outcome = self.source.read(&upstream)?;
            upstream = ReadOptions::new();
            let input = match outcome {
                ReadOutcome::Buffer(input) => input,
                ReadOutcome::EndOfStream => return Ok(ReadOutcome::EndOfStream),
                ReadOutcome::FormatChanged => {
                    self.input_format = self.source.format();
                    self.codec_ready = false;
                    continue;
                }
            };
            if let Some(target) = input.meta().find_i64(MetaKey::TargetTime) {
                self.target_time_us = Some(target);
            }
            if !self.codec_ready {
                self.initialize_codec(input.data())?;
            }

            let picture = match self.backend.decode(input.data()) {
                Ok(Some(picture)) => picture,
                Ok(None) => continue,
                Err(e) if self.width > 0 && self.height > 0 => {
                    warn!(
                        backend = self.backend.name(),
                        error = %e,
                        time_us = ?input.time_us(),
                        "decode failed, substituting blank picture"
                    );
                    DecodedPicture::blank(self.width, self.height)
                }
                Err(e) => {
                    warn!(error = %e, "decode failed before dimensions are known");
                    continue;
                }
            };

            if (picture.width, picture.height) != (self.width, self.height) {
                info!(
                    old_width = self.width,
                    old_height = self.height,
                    new_width = picture.width,
                    new_height = picture.height,
                    "video output format changed"
                );
                self.width = picture.width;
                self.height = picture.height;
                self.format = Arc::new(output_format(&self.input_format, self.width, self.height));
                return Ok(ReadOutcome::FormatChanged);
            }

            if let (Some(target), Some(time_us)) = (self.target_time_us, input.time_us()) {
                if time_us < target {
                    trace!(time_us, target, "dropping picture before target time");
                    continue;
                }
            }
            self.target_time_us = None;
            let buffer = self.emit(picture, &input)?;
            return Ok(ReadOutcome::Buffer(buffer));
        }
    }
}
