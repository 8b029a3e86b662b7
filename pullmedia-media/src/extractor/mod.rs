//! Container and elementary-stream extractors
//!
//! An extractor parses a random-access [`DataSource`] into tracks, each
//! described by format metadata and readable as a [`MediaSource`].
//! Construction never fails on bad input: an extractor that cannot make sense
//! of its data reports zero tracks.

pub mod aac;
pub mod id3;
pub mod mp3;

use pullmedia_core::{mime, DataSource, MediaError, MediaResult, MediaSource, MetaData};
use std::sync::Arc;
use tracing::{debug, info};

pub use aac::{aac_frame_size, aac_parse_header, AacExtractor, AdtsHeader};
pub use mp3::{parse_mpeg_audio_header, Mp3Extractor, MpegAudioHeader};

/// Tunables shared by the bitstream extractors
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Frames sampled to estimate the bit rate
    pub bitrate_probe_frames: usize,
    /// Bytes scanned while searching for a frame boundary
    pub max_resync_bytes: usize,
    /// Gap tolerated between a frame's time and a skip target
    pub skip_window_us: i64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            bitrate_probe_frames: 100,
            max_resync_bytes: 64 * 1024,
            skip_window_us: pullmedia_core::DEFAULT_SKIP_WINDOW_US,
        }
    }
}

impl ExtractorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.bitrate_probe_frames == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "bitrate_probe_frames must be at least 1".to_string(),
            });
        }
        if self.max_resync_bytes < 16 {
            return Err(MediaError::InvalidConfiguration {
                message: "max_resync_bytes must be at least 16".to_string(),
            });
        }
        if self.skip_window_us <= 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "skip_window_us must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Track-level view of a parsed container
pub trait Extractor: Send {
    /// Number of tracks; zero when the data could not be parsed
    fn count_tracks(&self) -> usize;

    /// Format of track `index`
    fn track_format(&self, index: usize) -> Option<Arc<MetaData>>;

    /// A fresh, stopped source reading track `index`
    fn track(&self, index: usize) -> MediaResult<Box<dyn MediaSource>>;

    /// Container-level metadata
    fn format(&self) -> MetaData;
}

/// Outcome of a successful sniff
#[derive(Debug, Clone, PartialEq)]
pub struct SniffResult {
    /// Container MIME type
    pub mime: &'static str,
    /// Confidence in `0.0..=1.0`
    pub confidence: f32,
}

/// Detect the container type of `source`
pub fn sniff(source: &dyn DataSource) -> Option<SniffResult> {
    let candidates = [aac::sniff(source), mp3::sniff(source)];
    let best = candidates
        .into_iter()
        .flatten()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
    if let Some(result) = &best {
        debug!(mime = result.mime, confidence = result.confidence, "sniffed container");
    }
    best
}

/// Sniff `source` and build the matching extractor
pub fn create_extractor(
    source: Arc<dyn DataSource>,
    config: ExtractorConfig,
) -> MediaResult<Box<dyn Extractor>> {
    config.validate()?;
    let sniffed = sniff(source.as_ref())
        .ok_or_else(|| MediaError::unsupported("no extractor recognises the data"))?;
    info!(mime = sniffed.mime, "creating extractor");
    create_extractor_for_mime(source, sniffed.mime, config)
}

/// Build the extractor for a known container MIME type
pub fn create_extractor_for_mime(
    source: Arc<dyn DataSource>,
    container_mime: &str,
    config: ExtractorConfig,
) -> MediaResult<Box<dyn Extractor>> {
    match container_mime {
        mime::CONTAINER_ADTS | mime::AUDIO_AAC => Ok(Box::new(AacExtractor::new(source, config))),
        mime::AUDIO_MPEG => Ok(Box::new(Mp3Extractor::new(source, config))),
        other => Err(MediaError::unsupported(other)),
    }
}

/// Outcome of a bounded search for the next frame boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resync<T> {
    /// A frame starts here
    Found(T),
    /// The data ended before a frame was found
    EndOfData,
    /// The scan limit was reached without finding a frame
    LimitReached,
}

/// Microseconds covered by `samples` at `sample_rate`, in integer math
pub(crate) fn samples_to_us(samples: i64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    samples * 1_000_000 / i64::from(sample_rate)
}
