//! Byte-stream source over a blocking character device

use pullmedia_core::{
    check_skip, mime, BufferPool, Lifecycle, MediaError, MediaResult, MediaSource, MetaData,
    MetaKey, PoolConfig, ReadOptions, ReadOutcome, SkipDecision, TimeSource,
    DEFAULT_SKIP_WINDOW_US,
};
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

/// Character device source configuration
#[derive(Debug, Clone)]
pub struct CharDeviceConfig {
    /// MIME type published for the byte stream
    pub mime: String,
    /// Bytes requested from the device per `read`
    pub chunk_size: usize,
    /// Pool buffers preallocated at start
    pub buffer_count: usize,
    /// Skip sanity window in microseconds
    pub skip_window_us: i64,
}

impl Default for CharDeviceConfig {
    fn default() -> Self {
        Self {
            mime: mime::OCTET_STREAM.to_string(),
            chunk_size: 4096,
            buffer_count: 2,
            skip_window_us: DEFAULT_SKIP_WINDOW_US,
        }
    }
}

/// Media source reading fixed-size chunks from a blocking reader
///
/// Chunks are stamped with the time source's clock at the moment the read
/// returns, bumped past the previous chunk when the clock has not moved.
pub struct CharDeviceSource<R: Read + Send> {
    config: CharDeviceConfig,
    device: R,
    clock: Arc<dyn TimeSource>,
    lifecycle: Lifecycle,
    pool: Option<BufferPool>,
    format: Arc<MetaData>,
    bytes_read: u64,
    last_time_us: Option<i64>,
}

impl<R: Read + Send> CharDeviceSource<R> {
    /// Source over `device` timestamped by `clock`
    pub fn new(config: CharDeviceConfig, device: R, clock: Arc<dyn TimeSource>) -> MediaResult<Self> {
        if config.chunk_size == 0 || config.buffer_count == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "chunk_size and buffer_count must be positive".to_string(),
            });
        }
        let mut format = MetaData::with_mime(&config.mime);
        format.set_i32(MetaKey::MaxInputSize, config.chunk_size as i32);
        Ok(Self {
            config,
            device,
            clock,
            lifecycle: Lifecycle::new("char-device"),
            pool: None,
            format: Arc::new(format),
            bytes_read: 0,
            last_time_us: None,
        })
    }

    /// Total bytes read since start
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn read_chunk(&mut self) -> MediaResult<ReadOutcome> {
        let pool = self.pool.as_ref().ok_or(MediaError::Stopped)?;
        let mut buffer = pool.acquire()?;
        let chunk = self.config.chunk_size.min(buffer.capacity());
        let n = loop {
            match self.device.read(&mut buffer.data_mut()[..chunk]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            debug!(bytes = self.bytes_read, "character device reached end of input");
            return Ok(ReadOutcome::EndOfStream);
        }
        buffer.set_range(0, n)?;
        let now = self.clock.real_time_us();
        let time_us = self.last_time_us.map_or(now, |last| now.max(last + 1));
        self.last_time_us = Some(time_us);
        buffer.meta_mut().set_i64(MetaKey::Time, time_us);
        self.bytes_read += n as u64;
        trace!(bytes = n, time_us, "character device chunk");
        Ok(ReadOutcome::Buffer(buffer.freeze()))
    }
}

impl<R: Read + Send> MediaSource for CharDeviceSource<R> {
    #[instrument(skip_all)]
    fn start(&mut self, _params: Option<&MetaData>) -> MediaResult<()> {
        self.lifecycle.start()?;
        match BufferPool::new(PoolConfig::new(
            "char-device",
            self.config.buffer_count,
            self.config.chunk_size,
        )) {
            Ok(pool) => self.pool = Some(pool),
            Err(e) => {
                self.lifecycle.stop()?;
                return Err(e);
            }
        }
        self.bytes_read = 0;
        self.last_time_us = None;
        info!(chunk_size = self.config.chunk_size, "character device source started");
        Ok(())
    }

    #[instrument(skip_all)]
    fn stop(&mut self) -> MediaResult<()> {
        self.lifecycle.stop()?;
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        info!(bytes = self.bytes_read, "character device source stopped");
        Ok(())
    }

    fn format(&self) -> Arc<MetaData> {
        Arc::clone(&self.format)
    }

    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome> {
        self.lifecycle.check_readable()?;
        let Some(target) = options.skip_until_us() else {
            return self.read_chunk();
        };
        loop {
            let outcome = self.read_chunk()?;
            let time_us = match &outcome {
                ReadOutcome::Buffer(buffer) => buffer.time_us().unwrap_or_default(),
                _ => return Ok(outcome),
            };
            match check_skip(time_us, target, self.config.skip_window_us)? {
                SkipDecision::Deliver => return Ok(outcome),
                SkipDecision::Drop => trace!(time_us, target, "chunk before skip target dropped"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullmedia_core::{ManualClock, SystemTimeSource};
    use std::io::Cursor;

    #[test]
    fn test_chunks_until_end_of_input() {
        let clock = ManualClock::new();
        let time_source = Arc::new(SystemTimeSource::with_clock(Arc::new(clock.clone())));
        let config = CharDeviceConfig {
            chunk_size: 4,
            ..CharDeviceConfig::default()
        };
        let mut source =
            CharDeviceSource::new(config, Cursor::new(vec![1u8, 2, 3, 4, 5, 6]), time_source)
                .unwrap();
        source.start(None).unwrap();

        let first = source.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
        assert_eq!(first.data(), &[1, 2, 3, 4]);
        assert_eq!(first.time_us(), Some(0));
        drop(first);

        clock.advance_ms(10);
        let second = source.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
        assert_eq!(second.data(), &[5, 6]);
        assert_eq!(second.time_us(), Some(10_000));
        drop(second);

        assert!(source.read(&ReadOptions::new()).unwrap().is_end_of_stream());
        assert_eq!(source.bytes_read(), 6);
        source.stop().unwrap();
    }

    #[test]
    fn test_timestamps_increase_without_clock_movement() {
        let time_source = Arc::new(SystemTimeSource::with_clock(Arc::new(ManualClock::new())));
        let config = CharDeviceConfig {
            chunk_size: 2,
            ..CharDeviceConfig::default()
        };
        let mut source =
            CharDeviceSource::new(config, Cursor::new(vec![0u8; 8]), time_source).unwrap();
        source.start(None).unwrap();

        let mut times = Vec::new();
        while let ReadOutcome::Buffer(buffer) = source.read(&ReadOptions::new()).unwrap() {
            times.push(buffer.time_us().unwrap());
        }
        assert_eq!(times, vec![0, 1, 2, 3]);
        source.stop().unwrap();
    }

    #[test]
    fn test_read_before_start_rejected() {
        let mut source = CharDeviceSource::new(
            CharDeviceConfig::default(),
            Cursor::new(Vec::new()),
            Arc::new(SystemTimeSource::new()),
        )
        .unwrap();
        assert!(matches!(
            source.read(&ReadOptions::new()),
            Err(MediaError::InvalidState { .. })
        ));
    }
}
