//! Device-backed media sources
//!
//! A device driver pushes captured frames through a [`FrameFeeder`] from its
//! own thread; the consumer pulls them with `read`. Frames are handed out
//! without copying and returned to the device through a [`FrameRecycler`]
//! when the last reference drops. `stop` wakes blocked readers, drains the
//! queue and waits for loaned frames, so the device never sees a callback
//! into a torn-down source.

pub mod camera;
pub mod char_device;
pub mod fm;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use pullmedia_core::{
    check_skip, Lifecycle, MediaBuffer, MediaError, MediaResult, MetaData, MetaKey, ReadOptions,
    ReadOutcome, SkipDecision, DEFAULT_SKIP_WINDOW_US,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub use camera::{CameraConfig, CameraSource};
pub use char_device::{CharDeviceConfig, CharDeviceSource};
pub use fm::{FmRadioConfig, FmRadioSource};

/// One captured frame in device-owned memory
#[derive(Debug, Clone)]
pub struct DeviceFrame {
    /// Device-assigned identifier handed back on recycle
    pub id: u64,
    /// Frame payload
    pub data: Bytes,
    /// Device capture time in microseconds
    pub time_us: i64,
}

impl DeviceFrame {
    /// New frame
    pub fn new(id: u64, data: impl Into<Bytes>, time_us: i64) -> Self {
        Self {
            id,
            data: data.into(),
            time_us,
        }
    }
}

/// Returns frames to the device once nobody references them
pub trait FrameRecycler: Send + Sync {
    /// Give frame `id` back to the device
    fn recycle(&self, id: u64);
}

/// Recycler for devices whose frames need no explicit return
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecycler;

impl FrameRecycler for NoopRecycler {
    fn recycle(&self, _id: u64) {}
}

/// Driver side of a device source
pub trait CaptureDevice: Send {
    /// Begin delivering frames to `feeder`
    fn start_capture(&mut self, feeder: FrameFeeder) -> MediaResult<()>;

    /// Stop delivering frames; anything pushed afterwards is dropped
    fn stop_capture(&mut self) -> MediaResult<()>;
}

/// Frame counters of one device source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    /// Frames accepted from the device
    pub received: u64,
    /// Frames handed to the consumer
    pub emitted: u64,
    /// Frames returned without being delivered
    pub dropped: u64,
    /// Gaps between consecutive device timestamps above the glitch threshold
    pub glitches: u64,
}

/// Device source configuration
#[derive(Debug, Clone)]
pub struct DeviceSourceConfig {
    /// Name used in logs
    pub name: &'static str,
    /// Expected time between frames in microseconds
    pub nominal_interval_us: i64,
    /// A gap above `glitch_factor * nominal_interval_us` counts as a glitch
    pub glitch_factor: f64,
    /// Largest tolerated distance between a frame and a skip target
    pub skip_window_us: i64,
    /// Longest `stop` waits for loaned frames; `None` waits indefinitely
    pub loan_timeout: Option<Duration>,
}

impl Default for DeviceSourceConfig {
    fn default() -> Self {
        Self {
            name: "device",
            nominal_interval_us: 33_333,
            glitch_factor: 2.0,
            skip_window_us: DEFAULT_SKIP_WINDOW_US,
            loan_timeout: None,
        }
    }
}

impl DeviceSourceConfig {
    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.nominal_interval_us <= 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "nominal_interval_us must be positive".to_string(),
            });
        }
        if self.glitch_factor.is_nan() || self.glitch_factor < 1.0 {
            return Err(MediaError::InvalidConfiguration {
                message: "glitch_factor must be at least 1.0".to_string(),
            });
        }
        if self.skip_window_us <= 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "skip_window_us must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn glitch_threshold_us(&self) -> i64 {
        (self.nominal_interval_us as f64 * self.glitch_factor) as i64
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    fifo: VecDeque<DeviceFrame>,
    accepting: bool,
    loaned: usize,
    last_device_time_us: Option<i64>,
    stats: DeviceStats,
}

struct Shared {
    name: &'static str,
    glitch_threshold_us: i64,
    state: Mutex<DeviceState>,
    frame_available: Condvar,
    frame_returned: Condvar,
    recycler: Arc<dyn FrameRecycler>,
}

impl Shared {
    /// Mark a delivered frame as returned; runs once per loaned frame
    fn return_loan(&self, id: u64) {
        {
            let mut state = self.state.lock();
            state.loaned = state.loaned.saturating_sub(1);
            self.frame_returned.notify_all();
        }
        self.recycler.recycle(id);
    }

    fn recycle_all(&self, frames: impl IntoIterator<Item = DeviceFrame>) {
        for frame in frames {
            self.recycler.recycle(frame.id);
        }
    }
}

/// Producer side of a device source, handed to the device driver
#[derive(Clone)]
pub struct FrameFeeder {
    shared: Arc<Shared>,
}

impl FrameFeeder {
    /// Enqueue a captured frame; frames arriving while stopped are recycled
    pub fn push(&self, frame: DeviceFrame) {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            state.stats.dropped += 1;
            drop(state);
            trace!(source = self.shared.name, id = frame.id, "frame after stop dropped");
            self.shared.recycler.recycle(frame.id);
            return;
        }
        if let Some(last) = state.last_device_time_us {
            if frame.time_us <= last {
                state.stats.dropped += 1;
                drop(state);
                warn!(
                    source = self.shared.name,
                    time_us = frame.time_us,
                    last_us = last,
                    "non-increasing device timestamp, frame dropped"
                );
                self.shared.recycler.recycle(frame.id);
                return;
            }
            if frame.time_us - last > self.shared.glitch_threshold_us {
                state.stats.glitches += 1;
                debug!(
                    source = self.shared.name,
                    gap_us = frame.time_us - last,
                    "capture glitch"
                );
            }
        }
        state.last_device_time_us = Some(frame.time_us);
        state.stats.received += 1;
        state.fifo.push_back(frame);
        self.shared.frame_available.notify_one();
    }

    /// Frames queued and not yet read
    pub fn queued(&self) -> usize {
        self.shared.state.lock().fifo.len()
    }
}

/// Wakes a blocked `read` from another thread ahead of `stop`
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Stop accepting frames and wake every blocked reader
    pub fn request_stop(&self) {
        let mut state = self.shared.state.lock();
        state.accepting = false;
        self.shared.frame_available.notify_all();
    }
}

/// Queue, statistics and loan accounting shared by the device sources
pub struct DeviceSourceCore {
    config: DeviceSourceConfig,
    lifecycle: Lifecycle,
    shared: Arc<Shared>,
}

impl DeviceSourceCore {
    /// New core; frames are returned through `recycler`
    pub fn new(config: DeviceSourceConfig, recycler: Arc<dyn FrameRecycler>) -> MediaResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            name: config.name,
            glitch_threshold_us: config.glitch_threshold_us(),
            state: Mutex::new(DeviceState::default()),
            frame_available: Condvar::new(),
            frame_returned: Condvar::new(),
            recycler,
        });
        Ok(Self {
            lifecycle: Lifecycle::new(config.name),
            config,
            shared,
        })
    }

    /// Handle for the device driver
    pub fn feeder(&self) -> FrameFeeder {
        FrameFeeder {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Handle for asynchronous stop requests
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Snapshot of the frame counters
    pub fn stats(&self) -> DeviceStats {
        self.shared.state.lock().stats
    }

    /// Frames currently held by consumers
    pub fn loaned(&self) -> usize {
        self.shared.state.lock().loaned
    }

    /// Whether the source is started
    pub fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    /// Begin accepting frames
    pub fn start(&mut self) -> MediaResult<()> {
        self.lifecycle.start()?;
        let mut state = self.shared.state.lock();
        state.accepting = true;
        state.last_device_time_us = None;
        state.stats = DeviceStats::default();
        info!(source = self.config.name, "device source started");
        Ok(())
    }

    /// Stop, drain and wait for every loaned frame to come back
    pub fn stop(&mut self) -> MediaResult<()> {
        self.lifecycle.stop()?;
        let drained: Vec<DeviceFrame> = {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            self.shared.frame_available.notify_all();
            let drained: Vec<_> = state.fifo.drain(..).collect();
            state.stats.dropped += drained.len() as u64;
            drained
        };
        if !drained.is_empty() {
            debug!(source = self.config.name, frames = drained.len(), "drained queued frames");
        }
        self.shared.recycle_all(drained);

        let mut state = self.shared.state.lock();
        while state.loaned > 0 {
            match self.config.loan_timeout {
                Some(timeout) => {
                    if self
                        .shared
                        .frame_returned
                        .wait_for(&mut state, timeout)
                        .timed_out()
                    {
                        warn!(
                            source = self.config.name,
                            loaned = state.loaned,
                            "timed out waiting for loaned frames"
                        );
                        return Err(MediaError::Timeout {
                            operation: format!("{} stop", self.config.name),
                            duration: timeout,
                        });
                    }
                }
                None => self.shared.frame_returned.wait(&mut state),
            }
        }
        info!(source = self.config.name, stats = ?state.stats, "device source stopped");
        Ok(())
    }

    /// Block for the next frame, honouring `skip_until`
    pub fn read(&mut self, options: &ReadOptions, format: &MetaData) -> MediaResult<ReadOutcome> {
        self.lifecycle.check_readable()?;
        let skip_until = options.skip_until_us();
        let mut skipped = Vec::new();

        let mut state = self.shared.state.lock();
        let outcome = loop {
            while state.fifo.is_empty() && state.accepting {
                self.shared.frame_available.wait(&mut state);
            }
            // queued frames are left for stop to drain
            if !state.accepting {
                break Ok(None);
            }
            let Some(frame) = state.fifo.pop_front() else {
                break Ok(None);
            };
            if let Some(target) = skip_until {
                match check_skip(frame.time_us, target, self.config.skip_window_us) {
                    Ok(SkipDecision::Deliver) => {}
                    Ok(SkipDecision::Drop) => {
                        state.stats.dropped += 1;
                        skipped.push(frame);
                        continue;
                    }
                    Err(e) => {
                        state.fifo.push_front(frame);
                        break Err(e);
                    }
                }
            }
            state.loaned += 1;
            state.stats.emitted += 1;
            break Ok(Some(frame));
        };
        drop(state);
        self.shared.recycle_all(skipped);

        let Some(frame) = outcome? else {
            debug!(source = self.config.name, "read after stop request");
            return Ok(ReadOutcome::EndOfStream);
        };
        let mut meta = MetaData::new();
        meta.set_i64(MetaKey::Time, frame.time_us)
            .set_i32(MetaKey::IsSyncFrame, 1);
        if let Some(mime) = format.mime() {
            meta.set_string(MetaKey::MimeType, mime);
        }
        let shared = Arc::clone(&self.shared);
        let id = frame.id;
        Ok(ReadOutcome::Buffer(MediaBuffer::from_bytes_with_observer(
            frame.data,
            meta,
            Box::new(move || shared.return_loan(id)),
        )))
    }
}

impl Drop for DeviceSourceCore {
    fn drop(&mut self) {
        if self.lifecycle.is_started() {
            if let Err(e) = self.stop() {
                warn!(source = self.config.name, error = %e, "stop on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    #[derive(Default)]
    struct CountingRecycler(AtomicU64);

    impl FrameRecycler for CountingRecycler {
        fn recycle(&self, _id: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn core() -> (DeviceSourceCore, Arc<CountingRecycler>) {
        let recycler = Arc::new(CountingRecycler::default());
        let core = DeviceSourceCore::new(DeviceSourceConfig::default(), recycler.clone()).unwrap();
        (core, recycler)
    }

    #[test]
    fn test_skip_far_ahead_fails_with_unknown() {
        let (mut core, _) = core();
        core.start().unwrap();
        let feeder = core.feeder();
        for i in 0..3 {
            feeder.push(DeviceFrame::new(i, vec![0u8; 4], i as i64 * 33_000));
        }
        let result = core.read(&ReadOptions::skip_until(2_000_000), &MetaData::new());
        assert!(matches!(result, Err(MediaError::Unknown { .. })));
        // the frame stays queued
        assert_eq!(feeder.queued(), 3);
        core.stop().unwrap();
    }

    #[test]
    fn test_skip_drops_older_frames() {
        let (mut core, recycler) = core();
        core.start().unwrap();
        let feeder = core.feeder();
        for i in 0..4 {
            feeder.push(DeviceFrame::new(i, vec![0u8; 4], i as i64 * 33_000));
        }
        let buffer = core
            .read(&ReadOptions::skip_until(60_000), &MetaData::new())
            .unwrap()
            .into_buffer()
            .unwrap();
        assert_eq!(buffer.time_us(), Some(66_000));
        assert_eq!(recycler.0.load(Ordering::SeqCst), 2);
        drop(buffer);
        let stats = core.stats();
        assert_eq!((stats.received, stats.emitted, stats.dropped), (4, 1, 2));
        core.stop().unwrap();
        assert_eq!(recycler.0.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_stop_request_ends_stream_before_queued_frames() {
        let (mut core, recycler) = core();
        core.start().unwrap();
        let feeder = core.feeder();
        for i in 0..2 {
            feeder.push(DeviceFrame::new(i, vec![0u8; 4], i as i64 * 33_000));
        }
        core.stop_handle().request_stop();
        assert!(core
            .read(&ReadOptions::new(), &MetaData::new())
            .unwrap()
            .is_end_of_stream());
        assert_eq!(feeder.queued(), 2);

        core.stop().unwrap();
        let stats = core.stats();
        assert_eq!((stats.emitted, stats.dropped), (0, 2));
        assert_eq!(recycler.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_glitches_counted() {
        let (mut core, _) = core();
        core.start().unwrap();
        let feeder = core.feeder();
        for (i, t) in [0, 33_333, 66_666, 200_000].into_iter().enumerate() {
            feeder.push(DeviceFrame::new(i as u64, vec![1u8], t));
        }
        assert_eq!(core.stats().glitches, 1);
        core.stop().unwrap();
    }

    #[test]
    fn test_stop_wakes_blocked_reader() {
        let (mut core, _) = core();
        core.start().unwrap();
        let stop = core.stop_handle();
        let reader = thread::spawn(move || {
            let outcome = core.read(&ReadOptions::new(), &MetaData::new()).unwrap();
            (core, outcome.is_end_of_stream())
        });
        thread::sleep(Duration::from_millis(20));
        stop.request_stop();
        let (mut core, eos) = reader.join().unwrap();
        assert!(eos);
        core.stop().unwrap();
    }

    #[test]
    fn test_stop_waits_for_loaned_frames() {
        let (mut core, recycler) = core();
        core.start().unwrap();
        core.feeder().push(DeviceFrame::new(7, vec![0u8; 8], 0));
        let buffer = core
            .read(&ReadOptions::new(), &MetaData::new())
            .unwrap()
            .into_buffer()
            .unwrap();
        assert_eq!(core.loaned(), 1);
        let holder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(buffer);
        });
        core.stop().unwrap();
        assert_eq!(core.loaned(), 0);
        assert_eq!(recycler.0.load(Ordering::SeqCst), 1);
        holder.join().unwrap();

        // frames pushed after stop are recycled immediately
        core.feeder().push(DeviceFrame::new(8, vec![0u8; 8], 10));
        assert_eq!(recycler.0.load(Ordering::SeqCst), 2);
        assert_eq!(core.stats().dropped, 1);
    }

    #[test]
    fn test_stop_twice_is_rejected() {
        let (mut core, _) = core();
        assert!(matches!(core.stop(), Err(MediaError::InvalidState { .. })));
        core.start().unwrap();
        core.stop().unwrap();
        assert!(matches!(core.stop(), Err(MediaError::InvalidState { .. })));
    }
}
