//! FM radio source delivering PCM periods from a tuner

use super::{
    CaptureDevice, DeviceSourceConfig, DeviceSourceCore, DeviceStats, FrameRecycler, StopHandle,
};
use pullmedia_core::{
    mime, MediaError, MediaResult, MediaSource, MetaData, MetaKey, ReadOptions, ReadOutcome,
    DEFAULT_SKIP_WINDOW_US,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// FM tuner configuration
#[derive(Debug, Clone)]
pub struct FmRadioConfig {
    /// PCM sample rate
    pub sample_rate: u32,
    /// PCM channel count
    pub channels: u32,
    /// Samples per channel in one tuner period
    pub frames_per_period: u32,
    /// Gap multiple of the period counted as a glitch
    pub glitch_factor: f64,
    /// Skip sanity window in microseconds
    pub skip_window_us: i64,
}

impl Default for FmRadioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_period: 1024,
            glitch_factor: 2.0,
            skip_window_us: DEFAULT_SKIP_WINDOW_US,
        }
    }
}

impl FmRadioConfig {
    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.sample_rate == 0 || self.frames_per_period == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "sample_rate and frames_per_period must be positive".to_string(),
            });
        }
        if !(1..=2).contains(&self.channels) {
            return Err(MediaError::InvalidConfiguration {
                message: format!("unsupported channel count {}", self.channels),
            });
        }
        Ok(())
    }

    /// Duration of one tuner period
    pub fn period_us(&self) -> i64 {
        i64::from(self.frames_per_period) * 1_000_000 / i64::from(self.sample_rate)
    }

    /// Bytes in one period of 16-bit PCM
    pub fn period_bytes(&self) -> usize {
        self.frames_per_period as usize * self.channels as usize * 2
    }
}

/// Media source fed by an FM tuner driver
pub struct FmRadioSource {
    config: FmRadioConfig,
    core: DeviceSourceCore,
    tuner: Box<dyn CaptureDevice>,
    format: Arc<MetaData>,
}

impl FmRadioSource {
    /// FM source over `tuner`; periods return through `recycler`
    pub fn new(
        config: FmRadioConfig,
        tuner: Box<dyn CaptureDevice>,
        recycler: Arc<dyn FrameRecycler>,
    ) -> MediaResult<Self> {
        config.validate()?;
        let core = DeviceSourceCore::new(
            DeviceSourceConfig {
                name: "fm-radio",
                nominal_interval_us: config.period_us().max(1),
                glitch_factor: config.glitch_factor,
                skip_window_us: config.skip_window_us,
                loan_timeout: None,
            },
            recycler,
        )?;
        let mut format = MetaData::with_mime(mime::AUDIO_RAW);
        format
            .set_i32(MetaKey::SampleRate, config.sample_rate as i32)
            .set_i32(MetaKey::ChannelCount, config.channels as i32)
            .set_i32(MetaKey::MaxInputSize, config.period_bytes() as i32);
        Ok(Self {
            config,
            core,
            tuner,
            format: Arc::new(format),
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

impl MediaSource for FmRadioSource {
    #[instrument(skip_all, fields(sample_rate = self.config.sample_rate))]
    fn start(&mut self, _params: Option<&MetaData>) -> MediaResult<()> {
        self.core.start()?;
        if let Err(e) = self.tuner.start_capture(self.core.feeder()) {
            warn!(error = %e, "tuner failed to start");
            self.core.stop()?;
            return Err(e);
        }
        info!(channels = self.config.channels, "fm radio started");
        Ok(())
    }

    #[instrument(skip_all)]
    fn stop(&mut self) -> MediaResult<()> {
        if self.core.is_started() {
            if let Err(e) = self.tuner.stop_capture() {
                warn!(error = %e, "tuner failed to stop cleanly");
            }
        }
        self.core.stop()
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
    use std::thread::{self, JoinHandle};

    /// Tuner pushing a fixed number of periods from its own thread
    struct ThreadedTuner {
        periods: u64,
        period_us: i64,
        worker: Option<JoinHandle<()>>,
    }

    impl CaptureDevice for ThreadedTuner {
        fn start_capture(&mut self, feeder: FrameFeeder) -> MediaResult<()> {
            let (periods, period_us) = (self.periods, self.period_us);
            self.worker = Some(thread::spawn(move || {
                for i in 0..periods {
                    feeder.push(DeviceFrame::new(i, vec![0u8; 64], i as i64 * period_us));
                }
            }));
            Ok(())
        }

        fn stop_capture(&mut self) -> MediaResult<()> {
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
            Ok(())
        }
    }

    #[test]
    fn test_periods_arrive_in_order() {
        let config = FmRadioConfig::default();
        assert_eq!(config.period_us(), 21_333);
        let tuner = ThreadedTuner {
            periods: 5,
            period_us: config.period_us(),
            worker: None,
        };
        let mut radio = FmRadioSource::new(config, Box::new(tuner), Arc::new(NoopRecycler)).unwrap();
        assert_eq!(radio.format().find_i32(MetaKey::SampleRate), Some(48_000));

        radio.start(None).unwrap();
        let mut last = -1;
        for _ in 0..5 {
            let buffer = radio.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
            let time = buffer.time_us().unwrap();
            assert!(time > last);
            last = time;
        }
        radio.stop().unwrap();
        let stats = radio.stats();
        assert_eq!((stats.received, stats.emitted, stats.glitches), (5, 5, 0));
    }
}
