//! ADTS framed AAC extractor
//!
//! Exposes one audio track of raw AAC access units (the ADTS header is
//! stripped) with the AudioSpecificConfig published as codec specific data.
//! Bit rate and duration are estimated from a bounded run of frame headers,
//! so the duration of variable bit rate content is an approximation.

use super::{id3, samples_to_us, Extractor, ExtractorConfig, Resync, SniffResult};
use pullmedia_core::{
    check_skip, mime, BufferPool, DataSource, Lifecycle, MediaError, MediaResult, MediaSource,
    MetaData, MetaKey, PoolConfig, ReadOptions, ReadOutcome, SeekMode, SkipDecision,
    UNKNOWN_SIZE,
};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Length of an ADTS header without CRC
pub const ADTS_HEADER_LEN: usize = 7;
/// Largest possible ADTS frame (13-bit length field)
pub const MAX_ADTS_FRAME: usize = 8191;

const SAMPLES_PER_RAW_BLOCK: u32 = 1024;

/// Sampling frequencies indexed by the 4-bit ADTS/ASC index
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Index of `rate` in [`SAMPLE_RATES`]
pub fn sample_rate_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|&r| r == rate).map(|i| i as u8)
}

/// Fields of one ADTS frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type (profile + 1)
    pub object_type: u8,
    /// Sampling frequency index
    pub sample_rate_index: u8,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel configuration
    pub channel_config: u8,
    /// Total frame size including the header
    pub frame_length: usize,
    /// 7 without CRC, 9 with
    pub header_length: usize,
    /// Raw data blocks in the frame
    pub raw_blocks: u8,
}

impl AdtsHeader {
    /// Output channels for the channel configuration
    pub fn channels(&self) -> u32 {
        match self.channel_config {
            7 => 8,
            n => u32::from(n),
        }
    }

    /// Samples per channel carried by the frame
    pub fn samples(&self) -> u32 {
        SAMPLES_PER_RAW_BLOCK * (u32::from(self.raw_blocks) + 1)
    }

    /// Payload bytes after the header
    pub fn payload_length(&self) -> usize {
        self.frame_length - self.header_length
    }

    /// Two-byte AudioSpecificConfig equivalent to this header
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let value = (u16::from(self.object_type) << 11)
            | (u16::from(self.sample_rate_index) << 7)
            | (u16::from(self.channel_config) << 3);
        value.to_be_bytes()
    }

    /// Whether `other` belongs to the same stream
    pub fn same_stream(&self, other: &AdtsHeader) -> bool {
        self.object_type == other.object_type
            && self.sample_rate_index == other.sample_rate_index
            && self.channel_config == other.channel_config
    }
}

/// Parse an ADTS header from the first bytes of `data`
///
/// Rejects a bad sync word, a non-zero layer, the reserved profile, reserved
/// sampling indices, PCE-only channel configuration and frame lengths shorter
/// than the header.
pub fn aac_parse_header(data: &[u8]) -> MediaResult<AdtsHeader> {
    if data.len() < ADTS_HEADER_LEN {
        return Err(MediaError::malformed("ADTS header truncated"));
    }
    // 12 sync bits plus the two layer bits must match exactly
    if data[0] != 0xFF || data[1] & 0xF6 != 0xF0 {
        return Err(MediaError::malformed("bad ADTS sync word"));
    }
    let protection_absent = data[1] & 0x01 != 0;
    let profile = data[2] >> 6;
    if profile == 3 {
        return Err(MediaError::unsupported("ADTS reserved profile"));
    }
    let sample_rate_index = (data[2] >> 2) & 0x0F;
    let sample_rate = *SAMPLE_RATES
        .get(usize::from(sample_rate_index))
        .ok_or_else(|| MediaError::unsupported("reserved ADTS sampling frequency index"))?;
    let channel_config = ((data[2] & 0x01) << 2) | (data[3] >> 6);
    if channel_config == 0 {
        return Err(MediaError::unsupported("ADTS channel configuration 0"));
    }
    let frame_length = (usize::from(data[3] & 0x03) << 11)
        | (usize::from(data[4]) << 3)
        | usize::from(data[5] >> 5);
    let header_length = if protection_absent { 7 } else { 9 };
    if frame_length <= header_length {
        return Err(MediaError::malformed(format!(
            "ADTS frame length {frame_length} too short"
        )));
    }
    Ok(AdtsHeader {
        object_type: profile + 1,
        sample_rate_index,
        sample_rate,
        channel_config,
        frame_length,
        header_length,
        raw_blocks: data[6] & 0x03,
    })
}

/// Frame size of the ADTS frame at `offset`, or `-1` when no valid header is there
pub fn aac_frame_size(source: &dyn DataSource, offset: u64) -> i64 {
    match read_header(source, offset) {
        Ok(Some(header)) => header.frame_length as i64,
        _ => -1,
    }
}

fn read_header(source: &dyn DataSource, offset: u64) -> MediaResult<Option<AdtsHeader>> {
    let mut bytes = [0u8; ADTS_HEADER_LEN];
    let n = source.read_at(offset, &mut bytes)?;
    if n < ADTS_HEADER_LEN {
        return Ok(None);
    }
    Ok(aac_parse_header(&bytes).ok())
}

/// Detect ADTS by two consecutive valid frame headers
pub(crate) fn sniff(source: &dyn DataSource) -> Option<SniffResult> {
    let offset = id3::skip_id3v2(source, 0).ok()?;
    let first = read_header(source, offset).ok()??;
    let second = read_header(source, offset + first.frame_length as u64).ok()??;
    if !first.same_stream(&second) {
        return None;
    }
    Some(SniffResult {
        mime: mime::CONTAINER_ADTS,
        confidence: 0.2,
    })
}

/// Search forward from `offset` for two consecutive headers of the same stream
fn resync(source: &dyn DataSource, offset: u64, limit: usize) -> MediaResult<Resync<u64>> {
    let wanted = limit.saturating_add(ADTS_HEADER_LEN);
    let mut window = vec![0u8; wanted];
    let n = source.read_at(offset, &mut window)?;
    let window = &window[..n];
    for pos in 0..n.saturating_sub(ADTS_HEADER_LEN - 1) {
        if window[pos] != 0xFF {
            continue;
        }
        let Ok(first) = aac_parse_header(&window[pos..]) else {
            continue;
        };
        let next = offset + (pos + first.frame_length) as u64;
        match read_header(source, next)? {
            Some(second) if first.same_stream(&second) => {
                return Ok(Resync::Found(offset + pos as u64))
            }
            // last frame of the stream
            None if source.read_at(next, &mut [0u8; 1])? == 0 => {
                return Ok(Resync::Found(offset + pos as u64))
            }
            _ => {}
        }
    }
    if n < wanted {
        Ok(Resync::EndOfData)
    } else {
        Ok(Resync::LimitReached)
    }
}

#[derive(Debug, Clone)]
struct StreamInfo {
    first_offset: u64,
    header: AdtsHeader,
}

/// Extractor for ADTS framed AAC
pub struct AacExtractor {
    source: Arc<dyn DataSource>,
    config: ExtractorConfig,
    info: Option<StreamInfo>,
    format: Option<Arc<MetaData>>,
}

impl AacExtractor {
    /// Parse the stream head; never fails, an unparseable stream has no tracks
    #[instrument(skip_all)]
    pub fn new(source: Arc<dyn DataSource>, config: ExtractorConfig) -> Self {
        let mut extractor = Self {
            source,
            config,
            info: None,
            format: None,
        };
        if let Err(e) = extractor.init() {
            warn!(error = %e, "ADTS extractor not initialized");
        }
        extractor
    }

    /// Whether the stream head parsed
    pub fn is_initialized(&self) -> bool {
        self.info.is_some()
    }

    fn init(&mut self) -> MediaResult<()> {
        let source = self.source.as_ref();
        let first_offset = id3::skip_id3v2(source, 0)?;
        let header = read_header(source, first_offset)?
            .ok_or_else(|| MediaError::malformed("no ADTS header at stream start"))?;

        // Bit rate from a bounded run of headers rather than the whole file.
        let mut offset = first_offset;
        let mut bytes: u64 = 0;
        let mut samples: u64 = 0;
        let mut max_frame = header.frame_length;
        for _ in 0..self.config.bitrate_probe_frames {
            let Some(frame) = read_header(source, offset)? else {
                break;
            };
            bytes += frame.frame_length as u64;
            samples += u64::from(frame.samples());
            max_frame = max_frame.max(frame.frame_length);
            offset += frame.frame_length as u64;
        }
        let bitrate = if samples > 0 {
            bytes * 8 * u64::from(header.sample_rate) / samples
        } else {
            0
        };

        let mut format = MetaData::with_mime(mime::AUDIO_AAC);
        format
            .set_i32(MetaKey::SampleRate, header.sample_rate as i32)
            .set_i32(MetaKey::ChannelCount, header.channels() as i32)
            .set_i32(MetaKey::SamplesPerFrame, header.samples() as i32)
            .set_i32(MetaKey::MaxInputSize, MAX_ADTS_FRAME as i32)
            .set_data(MetaKey::CodecSpecificData, &header.audio_specific_config());
        if bitrate > 0 {
            format.set_i32(MetaKey::BitRate, i32::try_from(bitrate).unwrap_or(i32::MAX));
        }
        let size = source.size()?;
        if size != UNKNOWN_SIZE && bitrate > 0 {
            let duration = (size.saturating_sub(first_offset)) * 8_000_000 / bitrate;
            format.set_i64(MetaKey::Duration, duration as i64);
        }
        debug!(
            sample_rate = header.sample_rate,
            channels = header.channels(),
            bitrate,
            max_frame,
            "ADTS stream parsed"
        );

        self.info = Some(StreamInfo {
            first_offset,
            header,
        });
        self.format = Some(Arc::new(format));
        Ok(())
    }
}

impl Extractor for AacExtractor {
    fn count_tracks(&self) -> usize {
        usize::from(self.info.is_some())
    }

    fn track_format(&self, index: usize) -> Option<Arc<MetaData>> {
        if index == 0 {
            self.format.clone()
        } else {
            None
        }
    }

    fn track(&self, index: usize) -> MediaResult<Box<dyn MediaSource>> {
        match (&self.info, &self.format, index) {
            (Some(info), Some(format), 0) => Ok(Box::new(AacTrack::new(
                Arc::clone(&self.source),
                info.clone(),
                Arc::clone(format),
                self.config.clone(),
            ))),
            _ => Err(MediaError::Unknown {
                reason: format!("no ADTS track {index}"),
            }),
        }
    }

    fn format(&self) -> MetaData {
        MetaData::with_mime(mime::CONTAINER_ADTS)
    }
}

/// One ADTS track
struct AacTrack {
    source: Arc<dyn DataSource>,
    info: StreamInfo,
    format: Arc<MetaData>,
    config: ExtractorConfig,
    lifecycle: Lifecycle,
    pool: Option<BufferPool>,
    /// Offsets of frames discovered so far; frame `n` starts at `frame_offsets[n]`
    frame_offsets: Vec<u64>,
    next_frame: usize,
    /// Offset of the next frame, possibly past the discovered index after a resync
    next_offset: u64,
}

impl AacTrack {
    fn new(
        source: Arc<dyn DataSource>,
        info: StreamInfo,
        format: Arc<MetaData>,
        config: ExtractorConfig,
    ) -> Self {
        let first = info.first_offset;
        Self {
            source,
            info,
            format,
            config,
            lifecycle: Lifecycle::new("adts-track"),
            pool: None,
            frame_offsets: vec![first],
            next_frame: 0,
            next_offset: first,
        }
    }

    fn frame_duration_us(&self) -> i64 {
        samples_to_us(
            i64::from(self.info.header.samples()),
            self.info.header.sample_rate,
        )
    }

    fn frame_time_us(&self, frame: usize) -> i64 {
        samples_to_us(
            frame as i64 * i64::from(self.info.header.samples()),
            self.info.header.sample_rate,
        )
    }

    /// Extend the index until it covers `frame`; returns false past the end
    fn index_up_to(&mut self, frame: usize) -> MediaResult<bool> {
        while self.frame_offsets.len() <= frame {
            let Some(&last) = self.frame_offsets.last() else {
                return Ok(false);
            };
            let Some(header) = read_header(self.source.as_ref(), last)? else {
                return Ok(false);
            };
            let next = last + header.frame_length as u64;
            if read_header(self.source.as_ref(), next)?.is_none() {
                return Ok(false);
            }
            self.frame_offsets.push(next);
        }
        Ok(true)
    }

    fn seek(&mut self, time_us: i64, mode: SeekMode) -> MediaResult<Option<i64>> {
        let duration = self.frame_duration_us().max(1);
        let time_us = time_us.max(0);
        let frame = match mode {
            SeekMode::PreviousSync | SeekMode::Closest => time_us / duration,
            SeekMode::NextSync => (time_us + duration - 1) / duration,
            SeekMode::ClosestSync => (time_us + duration / 2) / duration,
        } as usize;

        let frame = if self.index_up_to(frame)? {
            frame
        } else {
            self.frame_offsets.len().saturating_sub(1)
        };
        debug!(time_us, ?mode, frame, "ADTS seek");
        self.next_frame = frame;
        self.next_offset = self.frame_offsets[frame];
        Ok((mode == SeekMode::Closest).then_some(time_us))
    }

    fn read_frame(&mut self, target_time: Option<i64>) -> MediaResult<ReadOutcome> {
        let source = Arc::clone(&self.source);
        let header = match read_header(source.as_ref(), self.next_offset)? {
            Some(header) => header,
            None => {
                // Either a clean end or garbage between frames.
                if source.read_at(self.next_offset, &mut [0u8; ADTS_HEADER_LEN])?
                    < ADTS_HEADER_LEN
                {
                    return Ok(ReadOutcome::EndOfStream);
                }
                let found = match resync(
                    source.as_ref(),
                    self.next_offset,
                    self.config.max_resync_bytes,
                )? {
                    Resync::Found(found) => found,
                    Resync::EndOfData => return Ok(ReadOutcome::EndOfStream),
                    Resync::LimitReached => {
                        return Err(MediaError::malformed(format!(
                            "lost ADTS sync at offset {}",
                            self.next_offset
                        )))
                    }
                };
                warn!(from = self.next_offset, to = found, "ADTS resync");
                self.next_offset = found;
                self.frame_offsets.truncate(self.next_frame);
                self.frame_offsets.push(found);
                match read_header(source.as_ref(), found)? {
                    Some(header) => header,
                    None => return Ok(ReadOutcome::EndOfStream),
                }
            }
        };

        let pool = self.pool.as_ref().ok_or(MediaError::Stopped)?;
        let mut buffer = pool.try_acquire()?;
        let payload = header.payload_length();
        let payload_offset = self.next_offset + header.header_length as u64;
        source.read_exact_at(payload_offset, &mut buffer.data_mut()[..payload])?;
        buffer.set_range(0, payload)?;

        let time_us = self.frame_time_us(self.next_frame);
        let meta = buffer.meta_mut();
        meta.set_i64(MetaKey::Time, time_us)
            .set_i32(MetaKey::IsSyncFrame, 1);
        if let Some(target) = target_time {
            meta.set_i64(MetaKey::TargetTime, target);
        }
        trace!(frame = self.next_frame, time_us, payload, "ADTS frame");

        self.next_offset += header.frame_length as u64;
        self.next_frame += 1;
        if self.frame_offsets.len() == self.next_frame {
            self.frame_offsets.push(self.next_offset);
        }
        Ok(ReadOutcome::Buffer(buffer.freeze()))
    }
}

impl MediaSource for AacTrack {
    #[instrument(skip_all)]
    fn start(&mut self, _params: Option<&MetaData>) -> MediaResult<()> {
        self.lifecycle.start()?;
        let pool = BufferPool::new(PoolConfig::new("adts-track", 2, MAX_ADTS_FRAME));
        match pool {
            Ok(pool) => self.pool = Some(pool),
            Err(e) => {
                self.lifecycle.stop()?;
                return Err(e);
            }
        }
        self.next_frame = 0;
        self.next_offset = self.info.first_offset;
        Ok(())
    }

    #[instrument(skip_all)]
    fn stop(&mut self) -> MediaResult<()> {
        self.lifecycle.stop()?;
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        Ok(())
    }

    fn format(&self) -> Arc<MetaData> {
        Arc::clone(&self.format)
    }

    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome> {
        self.lifecycle.check_readable()?;
        let target_time = match options.seek() {
            Some(request) => self.seek(request.time_us, request.mode)?,
            None => None,
        };
        let Some(skip_until) = options.skip_until_us() else {
            return self.read_frame(target_time);
        };
        loop {
            match self.read_frame(target_time)? {
                ReadOutcome::Buffer(buffer) => {
                    let time_us = buffer.time_us().unwrap_or(0);
                    match check_skip(time_us, skip_until, self.config.skip_window_us)? {
                        SkipDecision::Deliver => return Ok(ReadOutcome::Buffer(buffer)),
                        SkipDecision::Drop => {
                            trace!(time_us, skip_until, "dropping frame before skip target")
                        }
                    }
                }
                other => return Ok(other),
            }
        }
    }
}
