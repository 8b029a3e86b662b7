//! Camera source delivering raw pictures from a capture device

use super::{
    CaptureDevice, DeviceSourceConfig, DeviceSourceCore, DeviceStats, FrameRecycler, StopHandle,
};
use crate::decoder::video::COLOR_FORMAT_I420;
use pullmedia_core::{
    mime, MediaError, MediaResult, MediaSource, MetaData, MetaKey, ReadOptions, ReadOutcome,
    DEFAULT_SKIP_WINDOW_US,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Picture width in pixels
    pub width: u32,
    /// Picture height in pixels
    pub height: u32,
    /// Nominal frames per second
    pub frame_rate: f64,
    /// Color format tag published in the track format
    pub color_format: i32,
    /// Gap multiple of the frame interval counted as a glitch
    pub glitch_factor: f64,
    /// Skip sanity window in microseconds
    pub skip_window_us: i64,
    /// Longest `stop` waits for pictures still held downstream
    pub loan_timeout: Option<Duration>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30.0,
            color_format: COLOR_FORMAT_I420,
            glitch_factor: 2.0,
            skip_window_us: DEFAULT_SKIP_WINDOW_US,
            loan_timeout: None,
        }
    }
}

impl CameraConfig {
    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid resolution".to_string(),
            });
        }
        if self.frame_rate <= 0.0 || self.frame_rate > 240.0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid framerate".to_string(),
            });
        }
        Ok(())
    }

    fn device_config(&self) -> DeviceSourceConfig {
        DeviceSourceConfig {
            name: "camera",
            nominal_interval_us: (1_000_000.0 / self.frame_rate).round() as i64,
            glitch_factor: self.glitch_factor,
            skip_window_us: self.skip_window_us,
            loan_timeout: self.loan_timeout,
        }
    }

    fn format(&self) -> MetaData {
        let mut format = MetaData::with_mime(mime::VIDEO_RAW);
        format
            .set_i32(MetaKey::Width, self.width as i32)
            .set_i32(MetaKey::Height, self.height as i32)
            .set_i32(MetaKey::ColorFormat, self.color_format)
            .set_i32(MetaKey::FrameRate, self.frame_rate.round() as i32);
        format
    }
}

/// Media source fed by a camera driver
pub struct CameraSource {
    config: CameraConfig,
    core: DeviceSourceCore,
    device: Box<dyn CaptureDevice>,
    format: Arc<MetaData>,
}

impl CameraSource {
    /// Camera source over `device`; pictures return through `recycler`
    pub fn new(
        config: CameraConfig,
        device: Box<dyn CaptureDevice>,
        recycler: Arc<dyn FrameRecycler>,
    ) -> MediaResult<Self> {
        config.validate()?;
        let core = DeviceSourceCore::new(config.device_config(), recycler)?;
        let format = Arc::new(config.format());
        Ok(Self {
            config,
            core,
            device,
            format,
        })
    }

    /// Frame counters
    pub fn stats(&self) -> DeviceStats {
        self.core.stats()
    }

    /// Handle that wakes a blocked `read` from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.core.stop_handle()
    }
}

impl MediaSource for CameraSource {
    #[instrument(skip_all, fields(width = self.config.width, height = self.config.height))]
    fn start(&mut self, _params: Option<&MetaData>) -> MediaResult<()> {
        self.core.start()?;
        if let Err(e) = self.device.start_capture(self.core.feeder()) {
            warn!(error = %e, "camera failed to start");
            self.core.stop()?;
            return Err(e);
        }
        info!(frame_rate = self.config.frame_rate, "camera recording");
        Ok(())
    }

    #[instrument(skip_all)]
    fn stop(&mut self) -> MediaResult<()> {
        if !self.core.is_started() {
            // rejected uniformly by the lifecycle guard
            return self.core.stop();
        }
        if let Err(e) = self.device.stop_capture() {
            warn!(error = %e, "camera failed to stop cleanly");
        }
        let stats = self.core.stats();
        self.core.stop()?;
        info!(
            received = stats.received,
            emitted = stats.emitted,
            dropped = stats.dropped,
            glitches = stats.glitches,
            "camera stopped"
        );
        Ok(())
    }

    fn format(&self) -> Arc<MetaData> {
        Arc::clone(&self.format)
    }

    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome> {
        self.core.read(options, &self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceFrame, FrameFeeder, NoopRecycler};
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct ManualDevice {
        feeder: Arc<Mutex<Option<FrameFeeder>>>,
    }

    impl CaptureDevice for ManualDevice {
        fn start_capture(&mut self, feeder: FrameFeeder) -> MediaResult<()> {
            *self.feeder.lock() = Some(feeder);
            Ok(())
        }

        fn stop_capture(&mut self) -> MediaResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_camera_publishes_format_and_frames() {
        let device = ManualDevice::default();
        let mut camera = CameraSource::new(
            CameraConfig::default(),
            Box::new(device.clone()),
            Arc::new(NoopRecycler),
        )
        .unwrap();
        let format = camera.format();
        assert_eq!(format.mime(), Some(mime::VIDEO_RAW));
        assert_eq!(format.find_i32(MetaKey::Width), Some(640));

        camera.start(None).unwrap();
        let feeder = device.feeder.lock().clone().unwrap();
        feeder.push(DeviceFrame::new(1, vec![0u8; 16], 0));
        feeder.push(DeviceFrame::new(2, vec![0u8; 16], 33_333));

        let first = camera.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
        let second = camera.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
        assert!(first.time_us() < second.time_us());
        drop((first, second));

        camera.stop().unwrap();
        assert_eq!(camera.stats().emitted, 2);
        assert!(matches!(camera.stop(), Err(MediaError::InvalidState { .. })));
    }

    #[test]
    fn test_invalid_frame_rate_rejected() {
        let config = CameraConfig {
            frame_rate: 0.0,
            ..CameraConfig::default()
        };
        assert!(CameraSource::new(
            config,
            Box::new(ManualDevice::default()),
            Arc::new(NoopRecycler)
        )
        .is_err());
    }
}
