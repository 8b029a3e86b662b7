//! MPEG audio (layers I-III) extractor
//!
//! Finds the first frame by requiring a run of consecutive headers whose
//! fixed fields agree, reads an optional Xing/Info header for an exact frame
//! count and seek table, and otherwise falls back to the bounded bit rate
//! estimate used for ADTS.

use super::{id3, samples_to_us, Extractor, ExtractorConfig, Resync, SniffResult};
use pullmedia_core::{
    check_skip, mime, BufferPool, DataSource, Lifecycle, MediaError, MediaResult, MediaSource,
    MetaData, MetaKey, PoolConfig, ReadOptions, ReadOutcome, SeekMode, SkipDecision,
    UNKNOWN_SIZE,
};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Sync, version, layer, protection and sample rate bits; stable within a stream
const FIXED_HEADER_MASK: u32 = 0xFFFE_0C00;
/// Headers required in a row before a position is accepted as a frame start
const MIN_CONSECUTIVE_HEADERS: usize = 3;
/// Larger than any layer I-III frame
pub const MAX_MPEG_AUDIO_FRAME: usize = 8192;

const BITRATES_V1: [[u32; 14]; 3] = [
    [32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const BITRATES_V2_L1: [u32; 14] = [32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATES_V2_L23: [u32; 14] = [8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];
const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];

/// MPEG audio version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    /// MPEG-1
    V1,
    /// MPEG-2 LSF
    V2,
    /// MPEG-2.5
    V25,
}

/// Fields of one MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegAudioHeader {
    /// Raw 32-bit header
    pub raw: u32,
    /// Version
    pub version: MpegVersion,
    /// Layer, 1 to 3
    pub layer: u8,
    /// Bit rate in kbit/s
    pub bitrate_kbps: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// 1 or 2
    pub channels: u32,
    /// Whole frame size in bytes
    pub frame_size: usize,
    /// Samples per channel in the frame
    pub samples_per_frame: u32,
}

impl MpegAudioHeader {
    fn matches(&self, other: u32) -> bool {
        self.raw & FIXED_HEADER_MASK == other & FIXED_HEADER_MASK
    }

    /// Offset of a Xing/Info tag inside a layer III frame
    fn xing_offset(&self) -> usize {
        let side_info = match (self.version, self.channels) {
            (MpegVersion::V1, 1) => 17,
            (MpegVersion::V1, _) => 32,
            (_, 1) => 9,
            _ => 17,
        };
        4 + side_info
    }
}

/// Parse a big-endian 32-bit MPEG audio header
///
/// Free-format bit rates are rejected since the frame size cannot be derived
/// from the header alone.
pub fn parse_mpeg_audio_header(raw: u32) -> MediaResult<MpegAudioHeader> {
    if raw & 0xFFE0_0000 != 0xFFE0_0000 {
        return Err(MediaError::malformed("bad MPEG audio sync"));
    }
    let version = match (raw >> 19) & 3 {
        0 => MpegVersion::V25,
        2 => MpegVersion::V2,
        3 => MpegVersion::V1,
        _ => return Err(MediaError::unsupported("reserved MPEG audio version")),
    };
    let layer = match (raw >> 17) & 3 {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => return Err(MediaError::unsupported("reserved MPEG audio layer")),
    };
    let bitrate_index = ((raw >> 12) & 0xF) as usize;
    if bitrate_index == 0 || bitrate_index == 15 {
        return Err(MediaError::unsupported("free or invalid MPEG audio bit rate"));
    }
    let sample_rate_index = ((raw >> 10) & 3) as usize;
    if sample_rate_index == 3 {
        return Err(MediaError::unsupported("reserved MPEG audio sample rate"));
    }
    let padding = (raw >> 9) & 1;
    let channels = if (raw >> 6) & 3 == 3 { 1 } else { 2 };

    let bitrate_kbps = match (version, layer) {
        (MpegVersion::V1, l) => BITRATES_V1[usize::from(l - 1)][bitrate_index - 1],
        (_, 1) => BITRATES_V2_L1[bitrate_index - 1],
        _ => BITRATES_V2_L23[bitrate_index - 1],
    };
    let sample_rate = match version {
        MpegVersion::V1 => SAMPLE_RATES_V1[sample_rate_index],
        MpegVersion::V2 => SAMPLE_RATES_V1[sample_rate_index] / 2,
        MpegVersion::V25 => SAMPLE_RATES_V1[sample_rate_index] / 4,
    };
    let bitrate = bitrate_kbps * 1000;
    let (frame_size, samples_per_frame) = match (layer, version) {
        (1, _) => ((12 * bitrate / sample_rate + padding) * 4, 384),
        (2, _) => (144 * bitrate / sample_rate + padding, 1152),
        (_, MpegVersion::V1) => (144 * bitrate / sample_rate + padding, 1152),
        _ => (72 * bitrate / sample_rate + padding, 576),
    };

    Ok(MpegAudioHeader {
        raw,
        version,
        layer,
        bitrate_kbps,
        sample_rate,
        channels,
        frame_size: frame_size as usize,
        samples_per_frame,
    })
}

fn read_raw_header(source: &dyn DataSource, offset: u64) -> MediaResult<Option<u32>> {
    let mut bytes = [0u8; 4];
    if source.read_at(offset, &mut bytes)? < 4 {
        return Ok(None);
    }
    Ok(Some(u32::from_be_bytes(bytes)))
}

/// How much of a header run must actually be present in the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunCheck {
    /// At least the next header must exist; used to locate the first frame
    Strict,
    /// Running out of data counts as agreement so the tail of a stream still resyncs
    TailTolerant,
}

/// Find a frame start at or after `offset`
///
/// A candidate is accepted when the following headers parse and agree with
/// it (and with `fixed`, when given).
fn resync(
    source: &dyn DataSource,
    offset: u64,
    limit: usize,
    fixed: Option<u32>,
    check: RunCheck,
) -> MediaResult<Resync<(u64, MpegAudioHeader)>> {
    let wanted = limit.saturating_add(4);
    let mut window = vec![0u8; wanted];
    let n = source.read_at(offset, &mut window)?;
    let window = &window[..n];
    'scan: for pos in 0..n.saturating_sub(3) {
        if window[pos] != 0xFF {
            continue;
        }
        let raw = u32::from_be_bytes([
            window[pos],
            window[pos + 1],
            window[pos + 2],
            window[pos + 3],
        ]);
        let Ok(first) = parse_mpeg_audio_header(raw) else {
            continue;
        };
        if fixed.is_some_and(|fixed| !first.matches(fixed)) {
            continue;
        }
        let mut next = offset + pos as u64 + first.frame_size as u64;
        for seen in 1..MIN_CONSECUTIVE_HEADERS {
            let Some(raw) = read_raw_header(source, next)? else {
                if check == RunCheck::Strict && seen < 2 {
                    continue 'scan;
                }
                break;
            };
            match parse_mpeg_audio_header(raw) {
                Ok(header) if first.matches(raw) => next += header.frame_size as u64,
                _ => continue 'scan,
            }
        }
        return Ok(Resync::Found((offset + pos as u64, first)));
    }
    if n < wanted {
        Ok(Resync::EndOfData)
    } else {
        Ok(Resync::LimitReached)
    }
}

/// Detect MPEG audio by a run of consecutive agreeing headers at the stream head
pub(crate) fn sniff(source: &dyn DataSource) -> Option<SniffResult> {
    let offset = id3::skip_id3v2(source, 0).ok()?;
    match resync(source, offset, 4096, None, RunCheck::Strict).ok()? {
        Resync::Found((pos, _)) => Some(SniffResult {
            mime: mime::AUDIO_MPEG,
            // garbage before the first frame lowers confidence
            confidence: if pos == offset { 0.3 } else { 0.2 },
        }),
        _ => None,
    }
}

/// Xing/Info VBR header
#[derive(Debug, Clone)]
pub struct XingHeader {
    /// Number of frames in the stream
    pub frames: Option<u32>,
    /// Number of bytes in the stream, starting at the tag frame
    pub bytes: Option<u32>,
    /// 100-entry seek table
    pub toc: Option<[u8; 100]>,
}

impl XingHeader {
    /// Parse a Xing/Info tag from the first frame
    pub fn parse(frame: &[u8], header: &MpegAudioHeader) -> Option<Self> {
        if header.layer != 3 {
            return None;
        }
        let mut pos = header.xing_offset();
        let tag = frame.get(pos..pos + 4)?;
        if tag != b"Xing" && tag != b"Info" {
            return None;
        }
        pos += 4;
        let flags = read_u32(frame, pos)?;
        pos += 4;
        let mut xing = XingHeader {
            frames: None,
            bytes: None,
            toc: None,
        };
        if flags & 1 != 0 {
            xing.frames = Some(read_u32(frame, pos)?);
            pos += 4;
        }
        if flags & 2 != 0 {
            xing.bytes = Some(read_u32(frame, pos)?);
            pos += 4;
        }
        if flags & 4 != 0 {
            let mut toc = [0u8; 100];
            toc.copy_from_slice(frame.get(pos..pos + 100)?);
            xing.toc = Some(toc);
        }
        Some(xing)
    }

    /// Byte offset, relative to the tag frame, for `time_us` of `duration_us`
    fn seek_offset(&self, time_us: i64, duration_us: i64) -> Option<u64> {
        let (toc, bytes) = (self.toc.as_ref()?, self.bytes?);
        if duration_us <= 0 {
            return None;
        }
        let percent = (time_us as f64 * 100.0 / duration_us as f64).clamp(0.0, 100.0);
        let fx = if percent >= 100.0 {
            256.0
        } else {
            let a = (percent as usize).min(99);
            let fa = f64::from(toc[a]);
            let fb = if a < 99 { f64::from(toc[a + 1]) } else { 256.0 };
            fa + (fb - fa) * (percent - a as f64)
        };
        Some((fx / 256.0 * f64::from(bytes)) as u64)
    }
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[derive(Debug, Clone)]
struct StreamInfo {
    /// First frame, the Xing frame when there is one
    first_frame: u64,
    /// First audio frame
    audio_start: u64,
    header: MpegAudioHeader,
    xing: Option<XingHeader>,
    bitrate: u64,
    duration_us: Option<i64>,
}

/// Extractor for MPEG audio elementary streams
pub struct Mp3Extractor {
    source: Arc<dyn DataSource>,
    config: ExtractorConfig,
    info: Option<StreamInfo>,
    format: Option<Arc<MetaData>>,
}

impl Mp3Extractor {
    /// Locate the first frame; never fails, an unparseable stream has no tracks
    #[instrument(skip_all)]
    pub fn new(source: Arc<dyn DataSource>, config: ExtractorConfig) -> Self {
        let mut extractor = Self {
            source,
            config,
            info: None,
            format: None,
        };
        if let Err(e) = extractor.init() {
            warn!(error = %e, "MPEG audio extractor not initialized");
        }
        extractor
    }

    /// Whether a first frame was found
    pub fn is_initialized(&self) -> bool {
        self.info.is_some()
    }

    fn init(&mut self) -> MediaResult<()> {
        let source = self.source.as_ref();
        let start = id3::skip_id3v2(source, 0)?;
        let (first_frame, header) = match resync(
            source,
            start,
            self.config.max_resync_bytes,
            None,
            RunCheck::Strict,
        )? {
            Resync::Found(found) => found,
            _ => return Err(MediaError::malformed("no MPEG audio frame found")),
        };

        let mut frame = vec![0u8; header.frame_size];
        let n = source.read_at(first_frame, &mut frame)?;
        let xing = XingHeader::parse(&frame[..n], &header);
        let audio_start = if xing.is_some() {
            first_frame + header.frame_size as u64
        } else {
            first_frame
        };

        let duration_from_xing = xing
            .as_ref()
            .and_then(|x| x.frames)
            .map(|frames| {
                samples_to_us(
                    i64::from(frames) * i64::from(header.samples_per_frame),
                    header.sample_rate,
                )
            });
        let bitrate = match (&xing, duration_from_xing) {
            (Some(XingHeader { bytes: Some(bytes), .. }), Some(duration)) if duration > 0 => {
                u64::from(*bytes) * 8_000_000 / duration as u64
            }
            _ => self.probe_bitrate(audio_start, &header)?,
        };
        let size = source.size()?;
        let duration_us = duration_from_xing.or_else(|| {
            (size != UNKNOWN_SIZE && bitrate > 0)
                .then(|| (size.saturating_sub(audio_start) * 8_000_000 / bitrate) as i64)
        });

        let mut format = MetaData::with_mime(mime::AUDIO_MPEG);
        format
            .set_i32(MetaKey::SampleRate, header.sample_rate as i32)
            .set_i32(MetaKey::ChannelCount, header.channels as i32)
            .set_i32(MetaKey::SamplesPerFrame, header.samples_per_frame as i32)
            .set_i32(MetaKey::MaxInputSize, MAX_MPEG_AUDIO_FRAME as i32);
        if bitrate > 0 {
            format.set_i32(MetaKey::BitRate, i32::try_from(bitrate).unwrap_or(i32::MAX));
        }
        if let Some(duration) = duration_us {
            format.set_i64(MetaKey::Duration, duration);
        }
        debug!(
            first_frame,
            layer = header.layer,
            sample_rate = header.sample_rate,
            bitrate,
            xing = xing.is_some(),
            "MPEG audio stream parsed"
        );

        self.info = Some(StreamInfo {
            first_frame,
            audio_start,
            header,
            xing,
            bitrate,
            duration_us,
        });
        self.format = Some(Arc::new(format));
        Ok(())
    }

    fn probe_bitrate(&self, start: u64, first: &MpegAudioHeader) -> MediaResult<u64> {
        let source = self.source.as_ref();
        let mut offset = start;
        let mut bytes: u64 = 0;
        let mut samples: u64 = 0;
        for _ in 0..self.config.bitrate_probe_frames {
            let Some(raw) = read_raw_header(source, offset)? else {
                break;
            };
            let Ok(header) = parse_mpeg_audio_header(raw) else {
                break;
            };
            if !first.matches(raw) {
                break;
            }
            bytes += header.frame_size as u64;
            samples += u64::from(header.samples_per_frame);
            offset += header.frame_size as u64;
        }
        if samples == 0 {
            return Ok(u64::from(first.bitrate_kbps) * 1000);
        }
        Ok(bytes * 8 * u64::from(first.sample_rate) / samples)
    }
}

impl Extractor for Mp3Extractor {
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
            (Some(info), Some(format), 0) => Ok(Box::new(Mp3Track {
                source: Arc::clone(&self.source),
                info: info.clone(),
                format: Arc::clone(format),
                config: self.config.clone(),
                lifecycle: Lifecycle::new("mpeg-audio-track"),
                pool: None,
                offset: info.audio_start,
                base_time_us: 0,
                samples_since_base: 0,
            })),
            _ => Err(MediaError::Unknown {
                reason: format!("no MPEG audio track {index}"),
            }),
        }
    }

    fn format(&self) -> MetaData {
        MetaData::with_mime(mime::AUDIO_MPEG)
    }
}

struct Mp3Track {
    source: Arc<dyn DataSource>,
    info: StreamInfo,
    format: Arc<MetaData>,
    config: ExtractorConfig,
    lifecycle: Lifecycle,
    pool: Option<BufferPool>,
    offset: u64,
    base_time_us: i64,
    samples_since_base: i64,
}

impl Mp3Track {
    /// Average frame size in bytes, used to map between offsets and frame numbers
    fn bytes_per_frame(&self) -> f64 {
        let header = &self.info.header;
        if let Some(XingHeader {
            frames: Some(frames),
            bytes: Some(bytes),
            ..
        }) = &self.info.xing
        {
            let audio_bytes = u64::from(*bytes).saturating_sub(header.frame_size as u64);
            if *frames > 0 && audio_bytes > 0 {
                return audio_bytes as f64 / f64::from(*frames);
            }
        }
        if self.info.bitrate == 0 || header.sample_rate == 0 {
            return header.frame_size as f64;
        }
        self.info.bitrate as f64 * f64::from(header.samples_per_frame)
            / (8.0 * f64::from(header.sample_rate))
    }

    fn frame_time_us(&self, frame: u64) -> i64 {
        let header = &self.info.header;
        samples_to_us(
            frame as i64 * i64::from(header.samples_per_frame),
            header.sample_rate,
        )
    }

    /// Sync to the frame boundary nearest `estimate`, returning its offset and frame number
    fn sync_near(&self, estimate: u64, frame_bytes: f64) -> MediaResult<(u64, u64)> {
        let audio_start = self.info.audio_start;
        let from = estimate
            .saturating_sub((frame_bytes / 2.0) as u64)
            .max(audio_start);
        let found = match resync(
            self.source.as_ref(),
            from,
            self.config.max_resync_bytes,
            Some(self.info.header.raw),
            RunCheck::TailTolerant,
        )? {
            Resync::Found((found, _)) => found,
            // left for the next read to report end of stream or lost sync
            Resync::EndOfData | Resync::LimitReached => from,
        };
        let frame = ((found - audio_start) as f64 / frame_bytes).round() as u64;
        Ok((found, frame))
    }

    fn seek(&mut self, time_us: i64, mode: SeekMode) -> MediaResult<Option<i64>> {
        let time_us = match self.info.duration_us {
            Some(duration) => time_us.clamp(0, duration),
            None => time_us.max(0),
        };
        let frame_bytes = self.bytes_per_frame().max(1.0);
        let xing_offset = match (&self.info.xing, self.info.duration_us) {
            (Some(xing), Some(duration)) => xing
                .seek_offset(time_us, duration)
                .map(|rel| self.info.first_frame + rel),
            _ => None,
        };
        let estimate = xing_offset.unwrap_or_else(|| {
            self.info.audio_start + (time_us as u64).saturating_mul(self.info.bitrate) / 8_000_000
        });

        let (mut position, mut frame) = self.sync_near(estimate, frame_bytes)?;
        match mode {
            SeekMode::PreviousSync | SeekMode::Closest
                if frame > 0 && self.frame_time_us(frame) > time_us =>
            {
                let back = position.saturating_sub(frame_bytes as u64);
                (position, frame) = self.sync_near(back, frame_bytes)?;
            }
            SeekMode::NextSync if self.frame_time_us(frame) < time_us => {
                (position, frame) = self.sync_near(position + frame_bytes as u64, frame_bytes)?;
            }
            _ => {}
        }
        debug!(time_us, ?mode, position, frame, "MPEG audio seek");

        self.offset = position;
        self.base_time_us = self.frame_time_us(frame);
        self.samples_since_base = 0;
        Ok((mode == SeekMode::Closest).then_some(time_us))
    }

    fn next_header(&mut self) -> MediaResult<Option<MpegAudioHeader>> {
        let source = Arc::clone(&self.source);
        if let Some(raw) = read_raw_header(source.as_ref(), self.offset)? {
            if let Ok(header) = parse_mpeg_audio_header(raw) {
                if header.matches(self.info.header.raw) {
                    return Ok(Some(header));
                }
            }
        } else {
            return Ok(None);
        }
        match resync(
            source.as_ref(),
            self.offset,
            self.config.max_resync_bytes,
            Some(self.info.header.raw),
            RunCheck::TailTolerant,
        )? {
            Resync::Found((found, header)) => {
                if found != self.offset {
                    warn!(from = self.offset, to = found, "MPEG audio resync");
                }
                self.offset = found;
                Ok(Some(header))
            }
            Resync::EndOfData => Ok(None),
            Resync::LimitReached => Err(MediaError::malformed(format!(
                "lost MPEG audio sync at offset {}",
                self.offset
            ))),
        }
    }

    fn read_frame(&mut self, target_time: Option<i64>) -> MediaResult<ReadOutcome> {
        let Some(header) = self.next_header()? else {
            return Ok(ReadOutcome::EndOfStream);
        };
        let pool = self.pool.as_ref().ok_or(MediaError::Stopped)?;
        let mut buffer = pool.try_acquire()?;
        self.source
            .read_exact_at(self.offset, &mut buffer.data_mut()[..header.frame_size])?;
        buffer.set_range(0, header.frame_size)?;

        let time_us = self.base_time_us
            + samples_to_us(self.samples_since_base, header.sample_rate);
        let meta = buffer.meta_mut();
        meta.set_i64(MetaKey::Time, time_us)
            .set_i32(MetaKey::IsSyncFrame, 1);
        if let Some(target) = target_time {
            meta.set_i64(MetaKey::TargetTime, target);
        }
        trace!(offset = self.offset, time_us, size = header.frame_size, "MPEG audio frame");

        self.offset += header.frame_size as u64;
        self.samples_since_base += i64::from(header.samples_per_frame);
        Ok(ReadOutcome::Buffer(buffer.freeze()))
    }
}

impl MediaSource for Mp3Track {
    #[instrument(skip_all)]
    fn start(&mut self, _params: Option<&MetaData>) -> MediaResult<()> {
        self.lifecycle.start()?;
        match BufferPool::new(PoolConfig::new("mpeg-audio-track", 2, MAX_MPEG_AUDIO_FRAME)) {
            Ok(pool) => self.pool = Some(pool),
            Err(e) => {
                self.lifecycle.stop()?;
                return Err(e);
            }
        }
        self.offset = self.info.audio_start;
        self.base_time_us = 0;
        self.samples_since_base = 0;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layer3_header() {
        let header = parse_mpeg_audio_header(0xFFFB_9000).unwrap();
        assert_eq!(header.version, MpegVersion::V1);
        assert_eq!(header.layer, 3);
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.frame_size, 417);
        assert_eq!(header.samples_per_frame, 1152);
    }

    #[test]
    fn test_parse_mpeg2_mono() {
        // MPEG-2 layer III, 64 kbit/s, 22050 Hz, padded, mono
        let header = parse_mpeg_audio_header(0xFFF3_82C0).unwrap();
        assert_eq!(header.version, MpegVersion::V2);
        assert_eq!(header.sample_rate, 22050);
        assert_eq!(header.channels, 1);
        assert_eq!(header.samples_per_frame, 576);
        assert_eq!(header.frame_size, 72 * 64_000 / 22050 + 1);
    }

    #[test]
    fn test_rejects_reserved_fields() {
        assert!(parse_mpeg_audio_header(0xFFF9_9000).is_err()); // layer bits 00
        assert!(parse_mpeg_audio_header(0xFFFB_F000).is_err()); // bit rate 15
        assert!(parse_mpeg_audio_header(0xFFFB_9C00).is_err()); // sample rate 3
        assert!(parse_mpeg_audio_header(0x1234_5678).is_err());
    }
}
