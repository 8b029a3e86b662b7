//! Configuration types and defaults

use pullmedia_core::{MediaError, MediaResult, DEFAULT_SKIP_WINDOW_US};
use pullmedia_media::{DecoderConfig, DeviceSourceConfig, ExtractorConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pipeline-wide tunables
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```rust
/// use pullmedia::PipelineConfig;
///
/// let config = PipelineConfig::from_json_str(r#"{ "decoder_output_buffers": 4 }"#)?;
/// assert_eq!(config.decoder_output_buffers, 4);
/// assert_eq!(config.bitrate_probe_frames, 100);
/// # Ok::<(), pullmedia::MediaError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest gap between a buffer's time and a skip target before the
    /// read fails instead of dropping
    pub skip_sanity_window_us: i64,
    /// Frames sampled when estimating a stream's bit rate
    pub bitrate_probe_frames: usize,
    /// Output buffers preallocated by decoders
    pub decoder_output_buffers: usize,
    /// A device frame arriving later than this many nominal intervals is a glitch
    pub glitch_factor: f64,
    /// Bytes scanned while searching for a frame boundary
    pub max_resync_bytes: usize,
    /// Install a debug-level subscriber on [`crate::init`]
    pub debug_logging: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_sanity_window_us: DEFAULT_SKIP_WINDOW_US,
            bitrate_probe_frames: 100,
            decoder_output_buffers: 2,
            glitch_factor: 2.0,
            max_resync_bytes: 64 * 1024,
            debug_logging: false,
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> MediaResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MediaError::InvalidConfiguration {
                message: format!("invalid pipeline config: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> MediaResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> MediaResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MediaError::InvalidConfiguration {
            message: format!("cannot serialize pipeline config: {e}"),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> MediaResult<()> {
        self.extractor_config().validate()?;
        self.decoder_config().validate()?;
        if self.glitch_factor.is_nan() || self.glitch_factor < 1.0 {
            return Err(MediaError::InvalidConfiguration {
                message: "glitch_factor must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Extractor settings derived from this configuration
    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            bitrate_probe_frames: self.bitrate_probe_frames,
            max_resync_bytes: self.max_resync_bytes,
            skip_window_us: self.skip_sanity_window_us,
        }
    }

    /// Decoder settings derived from this configuration
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            output_buffers: self.decoder_output_buffers,
            ..DecoderConfig::default()
        }
    }

    /// Device source settings for a device delivering one frame every
    /// `nominal_interval_us`
    pub fn device_config(
        &self,
        name: &'static str,
        nominal_interval_us: i64,
    ) -> DeviceSourceConfig {
        DeviceSourceConfig {
            name,
            nominal_interval_us,
            glitch_factor: self.glitch_factor,
            skip_window_us: self.skip_sanity_window_us,
            ..DeviceSourceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_json() {
        let config = PipelineConfig::default();
        let parsed = PipelineConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.extractor_config().skip_window_us, 1_000_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{ "decoder_output_buffers": 0 }"#),
            Err(MediaError::InvalidConfiguration { .. })
        ));
        assert!(PipelineConfig::from_json_str(r#"{ "glitch_factor": 0.5 }"#).is_err());
        assert!(PipelineConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_device_config_inherits_thresholds() {
        let config = PipelineConfig {
            glitch_factor: 3.0,
            ..PipelineConfig::default()
        };
        let device = config.device_config("camera", 33_333);
        assert_eq!(device.glitch_factor, 3.0);
        assert_eq!(device.nominal_interval_us, 33_333);
        device.validate().unwrap();
    }
}
