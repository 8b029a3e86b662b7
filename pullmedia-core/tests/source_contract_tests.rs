//! Contract tests for a pooled, clock-stamped source built from the core primitives

use pullmedia_core::*;
use std::sync::Arc;

/// Emits one 64-byte pooled buffer per read, stamped with the time source
struct TickSource {
    lifecycle: Lifecycle,
    pool: Option<BufferPool>,
    clock: ManualClock,
    time: Arc<dyn TimeSource>,
    format: Arc<MetaData>,
    ticks: u8,
}

impl TickSource {
    fn new() -> Self {
        let clock = ManualClock::new();
        let time = Arc::new(SystemTimeSource::with_clock(Arc::new(clock.clone())));
        Self {
            lifecycle: Lifecycle::new("tick"),
            pool: None,
            clock,
            time,
            format: Arc::new(MetaData::with_mime(mime::OCTET_STREAM)),
            ticks: 0,
        }
    }
}

impl MediaSource for TickSource {
    fn start(&mut self, _params: Option<&MetaData>) -> MediaResult<()> {
        self.lifecycle.start()?;
        self.pool = Some(BufferPool::new(PoolConfig::new("tick", 2, 64))?);
        Ok(())
    }

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
        let pool = self.pool.as_ref().ok_or(MediaError::Stopped)?;
        loop {
            self.clock.advance_ms(10);
            self.ticks = self.ticks.wrapping_add(1);
            let now = self.time.real_time_us();
            if let Some(target) = options.skip_until_us() {
                if check_skip(now, target, DEFAULT_SKIP_WINDOW_US)? == SkipDecision::Drop {
                    continue;
                }
            }
            let mut buffer = pool.try_acquire()?;
            buffer.fill_from(&[self.ticks; 64])?;
            buffer.meta_mut().set_i64(MetaKey::Time, now);
            return Ok(ReadOutcome::Buffer(buffer.freeze()));
        }
    }
}

#[test]
fn test_pool_bounds_outstanding_reads() {
    let mut source = TickSource::new();
    source.start(None).unwrap();

    let first = source.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
    let second = source.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
    assert!(second.time_us() > first.time_us());
    assert!(matches!(
        source.read(&ReadOptions::new()),
        Err(MediaError::PoolExhausted { capacity: 2, .. })
    ));

    first.release();
    let third = source.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
    assert_eq!(third.range_length(), 64);
    source.stop().unwrap();
}

#[test]
fn test_skip_drops_until_target() {
    let mut source = TickSource::new();
    source.start(None).unwrap();
    let buffer = source
        .read(&ReadOptions::skip_until(55_000))
        .unwrap()
        .into_buffer()
        .unwrap();
    assert_eq!(buffer.time_us(), Some(60_000));
    assert!(matches!(
        source.read(&ReadOptions::skip_until(10_000_000)),
        Err(MediaError::Unknown { .. })
    ));
    drop(buffer);
    source.stop().unwrap();
}

#[test]
fn test_buffer_outlives_stopped_source() {
    let mut source = TickSource::new();
    source.start(None).unwrap();
    let held = source.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
    source.stop().unwrap();

    assert_eq!(held.data(), &[1u8; 64][..]);
    assert!(matches!(
        source.read(&ReadOptions::new()),
        Err(MediaError::InvalidState { .. })
    ));
    assert_eq!(
        MediaError::invalid_state("started", "stopped").category(),
        ErrorCategory::State
    );
}
