//! Format metadata and per-buffer metadata records
//!
//! A [`MetaData`] is a typed key/value map. Track formats are published as
//! `Arc<MetaData>` and never mutated after publication; a source that changes
//! its format publishes a fresh map and signals
//! [`ReadOutcome::FormatChanged`](crate::source::ReadOutcome::FormatChanged).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// MIME type strings used across the pipeline
pub mod mime {
    /// AAC elementary stream (raw access units, ADTS or LATM framed)
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    /// ADTS framed AAC container
    pub const CONTAINER_ADTS: &str = "audio/aac-adts";
    /// MPEG audio layers I-III
    pub const AUDIO_MPEG: &str = "audio/mpeg";
    /// IMA ADPCM blocks
    pub const AUDIO_IMA_ADPCM: &str = "audio/x-ima-adpcm";
    /// Interleaved signed 16-bit PCM
    pub const AUDIO_RAW: &str = "audio/raw";
    /// MPEG-4 part 2 visual
    pub const VIDEO_MPEG4: &str = "video/mp4v-es";
    /// H.263
    pub const VIDEO_H263: &str = "video/3gpp";
    /// H.264 / AVC
    pub const VIDEO_AVC: &str = "video/avc";
    /// Planar YUV 4:2:0 frames
    pub const VIDEO_RAW: &str = "video/raw";
    /// Opaque broadcast transport bytes from a character device
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// Typed metadata keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetaKey {
    /// MIME type (string)
    MimeType,
    /// Channel count (i32)
    ChannelCount,
    /// Sample rate in Hz (i32)
    SampleRate,
    /// Width in pixels (i32)
    Width,
    /// Height in pixels (i32)
    Height,
    /// Bit rate in bits per second (i32)
    BitRate,
    /// Duration in microseconds (i64)
    Duration,
    /// Largest access unit a consumer must accept (i32)
    MaxInputSize,
    /// Presentation time in microseconds (i64)
    Time,
    /// Access unit is a sync point (i32, 0 or 1)
    IsSyncFrame,
    /// Decoder should drop output before this time in microseconds (i64)
    TargetTime,
    /// Out-of-band codec configuration, e.g. an AudioSpecificConfig (bytes)
    CodecSpecificData,
    /// Opaque platform tag carried alongside a buffer (i64)
    PlatformPrivate,
    /// Nominal frame rate in frames per second (i32)
    FrameRate,
    /// Block alignment of block-based codecs (i32)
    BlockAlign,
    /// Samples per channel in one access unit (i32)
    SamplesPerFrame,
    /// Encoder delay in samples (i32)
    EncoderDelay,
    /// Color format tag of raw video (i32)
    ColorFormat,
}

/// Metadata value variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetaValue {
    /// 32-bit integer
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// UTF-8 string
    String(String),
    /// Opaque bytes
    Data(Vec<u8>),
}

/// Typed key/value metadata map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    entries: BTreeMap<MetaKey, MetaValue>,
}

impl MetaData {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map holding only a MIME type
    pub fn with_mime(mime: &str) -> Self {
        let mut meta = Self::new();
        meta.set_string(MetaKey::MimeType, mime);
        meta
    }

    /// Store a 32-bit integer
    pub fn set_i32(&mut self, key: MetaKey, value: i32) -> &mut Self {
        self.entries.insert(key, MetaValue::Int32(value));
        self
    }

    /// Store a 64-bit integer
    pub fn set_i64(&mut self, key: MetaKey, value: i64) -> &mut Self {
        self.entries.insert(key, MetaValue::Int64(value));
        self
    }

    /// Store a string
    pub fn set_string(&mut self, key: MetaKey, value: &str) -> &mut Self {
        self.entries.insert(key, MetaValue::String(value.to_string()));
        self
    }

    /// Store opaque bytes
    pub fn set_data(&mut self, key: MetaKey, value: &[u8]) -> &mut Self {
        self.entries.insert(key, MetaValue::Data(value.to_vec()));
        self
    }

    /// Look up a 32-bit integer
    pub fn find_i32(&self, key: MetaKey) -> Option<i32> {
        match self.entries.get(&key) {
            Some(MetaValue::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Look up a 64-bit integer
    pub fn find_i64(&self, key: MetaKey) -> Option<i64> {
        match self.entries.get(&key) {
            Some(MetaValue::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    /// Look up a string
    pub fn find_string(&self, key: MetaKey) -> Option<&str> {
        match self.entries.get(&key) {
            Some(MetaValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Look up opaque bytes
    pub fn find_data(&self, key: MetaKey) -> Option<&[u8]> {
        match self.entries.get(&key) {
            Some(MetaValue::Data(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Check whether a key is present
    pub fn contains(&self, key: MetaKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: MetaKey) -> Option<MetaValue> {
        self.entries.remove(&key)
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&MetaKey, &MetaValue)> {
        self.entries.iter()
    }

    /// MIME type, if set
    pub fn mime(&self) -> Option<&str> {
        self.find_string(MetaKey::MimeType)
    }

    /// Presentation time in microseconds, if set
    pub fn time_us(&self) -> Option<i64> {
        self.find_i64(MetaKey::Time)
    }

    /// Whether the buffer is flagged as a sync point
    pub fn is_sync_frame(&self) -> bool {
        self.find_i32(MetaKey::IsSyncFrame).unwrap_or(0) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_lookup() {
        let mut meta = MetaData::with_mime(mime::AUDIO_AAC);
        meta.set_i32(MetaKey::SampleRate, 44100)
            .set_i32(MetaKey::ChannelCount, 2)
            .set_i64(MetaKey::Duration, 1_000_000);

        assert_eq!(meta.mime(), Some(mime::AUDIO_AAC));
        assert_eq!(meta.find_i32(MetaKey::SampleRate), Some(44100));
        // wrong width is a miss, not a conversion
        assert_eq!(meta.find_i64(MetaKey::SampleRate), None);
        assert_eq!(meta.find_i64(MetaKey::Duration), Some(1_000_000));
        assert_eq!(meta.len(), 4);
    }

    #[test]
    fn test_json_round_trip() {
        let mut meta = MetaData::with_mime(mime::VIDEO_MPEG4);
        meta.set_i32(MetaKey::Width, 176)
            .set_i32(MetaKey::Height, 144)
            .set_i32(MetaKey::MaxInputSize, 8192)
            .set_data(MetaKey::CodecSpecificData, &[0x12, 0x10]);

        let json = serde_json::to_string(&meta).unwrap();
        let back: MetaData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.find_data(MetaKey::CodecSpecificData), Some(&[0x12, 0x10][..]));
    }

    #[test]
    fn test_sync_flag_defaults_false() {
        let mut meta = MetaData::new();
        assert!(!meta.is_sync_frame());
        meta.set_i32(MetaKey::IsSyncFrame, 1);
        assert!(meta.is_sync_frame());
    }
}
