//! Writer thread pulling buffers from a source into a sink
//!
//! The loop runs on its own thread: wait while the backpressure flag is
//! raised, pull one buffer, hand it to the sink, release it, repeat until
//! end of stream or a stop request. [`SinkWriter::stop`] joins the thread
//! and reports the worst error seen; end of stream counts as success.

use pullmedia_core::{
    MediaBuffer, MediaError, MediaResult, MediaSource, MetaData, ReadOptions, ReadOutcome,
};
use serde::Serialize;
use std::fs::File;
use parking_lot::Mutex;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Downstream consumer of pulled buffers
pub trait MediaSink: Send {
    /// Consume one buffer; the buffer is released after this returns
    fn write(&mut self, buffer: &MediaBuffer, format: &MetaData) -> MediaResult<()>;

    /// The source published a new format
    fn format_changed(&mut self, _format: &MetaData) -> MediaResult<()> {
        Ok(())
    }

    /// No more buffers will arrive
    fn finish(&mut self) -> MediaResult<()> {
        Ok(())
    }
}

impl<K: MediaSink + ?Sized> MediaSink for Box<K> {
    fn write(&mut self, buffer: &MediaBuffer, format: &MetaData) -> MediaResult<()> {
        (**self).write(buffer, format)
    }

    fn format_changed(&mut self, format: &MetaData) -> MediaResult<()> {
        (**self).format_changed(format)
    }

    fn finish(&mut self) -> MediaResult<()> {
        (**self).finish()
    }
}

/// Sink writing buffer payloads to any [`Write`]
pub struct WriteSink<W: Write + Send> {
    inner: W,
}

impl<W: Write + Send> WriteSink<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> MediaSink for WriteSink<W> {
    fn write(&mut self, buffer: &MediaBuffer, _format: &MetaData) -> MediaResult<()> {
        self.inner.write_all(buffer.data())?;
        Ok(())
    }

    fn finish(&mut self) -> MediaResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Sink appending payloads to a file
pub type FileSink = WriteSink<BufWriter<File>>;

impl FileSink {
    /// Create or truncate `path`
    pub fn create(path: impl AsRef<Path>) -> MediaResult<Self> {
        Ok(WriteSink::new(BufWriter::new(File::create(path)?)))
    }
}

/// Writer configuration
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Thread name
    pub name: String,
    /// Parameters passed to the source's `start`
    pub start_params: Option<MetaData>,
    /// While set, the loop waits before pulling the next buffer
    pub backpressure: Option<Arc<AtomicBool>>,
    /// How often a raised backpressure flag is polled
    pub poll_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            name: "media-writer".to_string(),
            start_params: None,
            backpressure: None,
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// Counters reported when the writer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Buffers handed to the sink
    pub buffers: u64,
    /// Payload bytes handed to the sink
    pub bytes: u64,
    /// Format changes seen
    pub format_changes: u64,
    /// Whether the source reached end of stream
    pub reached_end: bool,
}

struct WriterOutcome {
    stats: WriterStats,
    error: Option<MediaError>,
}

/// Keep the more severe of two errors; the first wins on a tie
fn worse(current: Option<MediaError>, next: MediaError) -> Option<MediaError> {
    match current {
        Some(existing) if severity(&existing) >= severity(&next) => Some(existing),
        _ => Some(next),
    }
}

fn severity(e: &MediaError) -> u8 {
    if e.is_recoverable() {
        1
    } else {
        2
    }
}

fn pull_loop<S: MediaSource>(
    source: &mut S,
    sink: &mut dyn MediaSink,
    stop: &AtomicBool,
    config: &WriterConfig,
) -> WriterOutcome {
    let mut stats = WriterStats::default();
    let mut error = None;
    let mut format = source.format();
    let options = ReadOptions::new();

    'pull: while !stop.load(Ordering::Acquire) {
        if let Some(flag) = &config.backpressure {
            while flag.load(Ordering::Acquire) {
                if stop.load(Ordering::Acquire) {
                    break 'pull;
                }
                thread::sleep(config.poll_interval);
            }
        }
        match source.read(&options) {
            Ok(ReadOutcome::Buffer(buffer)) => {
                if let Err(e) = sink.write(&buffer, &format) {
                    error!(error = %e, "sink rejected buffer");
                    error = worse(error, e);
                    break;
                }
                stats.buffers += 1;
                stats.bytes += buffer.data().len() as u64;
                buffer.release();
            }
            Ok(ReadOutcome::FormatChanged) => {
                format = source.format();
                stats.format_changes += 1;
                debug!(mime = ?format.mime(), "writer picked up new format");
                if let Err(e) = sink.format_changed(&format) {
                    error = worse(error, e);
                    break;
                }
            }
            Ok(ReadOutcome::EndOfStream) => {
                stats.reached_end = true;
                break;
            }
            Err(e) => {
                warn!(error = %e, "read failed, terminating writer");
                error = worse(error, e);
                break;
            }
        }
    }

    if let Err(e) = sink.finish() {
        error = worse(error, e);
    }
    // stop happens after the last read on this thread
    if let Err(e) = source.stop() {
        error = worse(error, e);
    }
    WriterOutcome { stats, error }
}

type PullBody = Box<dyn FnOnce() -> WriterOutcome + Send>;

/// Drives one source into one sink on a dedicated thread
///
/// Dropping the writer requests a stop and joins the thread.
pub struct SinkWriter {
    name: String,
    stop: Arc<AtomicBool>,
    wake: Option<Box<dyn FnOnce() + Send>>,
    worker: Option<JoinHandle<WriterOutcome>>,
}

impl SinkWriter {
    /// Start `source` and spawn the pull loop
    pub fn start<S, K>(source: S, sink: K, config: WriterConfig) -> MediaResult<Self>
    where
        S: MediaSource + 'static,
        K: MediaSink + 'static,
    {
        Self::start_with(source, sink, config, |builder, body| builder.spawn(body))
    }

    /// Like [`SinkWriter::start`] with a custom thread spawner
    fn start_with<S, K, F>(
        mut source: S,
        mut sink: K,
        config: WriterConfig,
        spawn: F,
    ) -> MediaResult<Self>
    where
        S: MediaSource + 'static,
        K: MediaSink + 'static,
        F: FnOnce(thread::Builder, PullBody) -> io::Result<JoinHandle<WriterOutcome>>,
    {
        source.start(config.start_params.as_ref())?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let name = config.name.clone();
        // the source stays reachable here in case the thread never runs
        let slot = Arc::new(Mutex::new(Some(source)));
        let thread_slot = Arc::clone(&slot);
        let body: PullBody = Box::new(move || {
            let taken = thread_slot.lock().take();
            match taken {
                Some(mut source) => pull_loop(&mut source, &mut sink, &thread_stop, &config),
                None => WriterOutcome {
                    stats: WriterStats::default(),
                    error: Some(MediaError::Stopped),
                },
            }
        });
        let worker = match spawn(thread::Builder::new().name(name.clone()), body) {
            Ok(worker) => worker,
            Err(e) => {
                error!(writer = %name, error = %e, "failed to spawn writer thread");
                if let Some(mut source) = slot.lock().take() {
                    if let Err(stop_error) = source.stop() {
                        warn!(writer = %name, error = %stop_error, "source stop failed");
                    }
                }
                return Err(e.into());
            }
        };
        info!(writer = %name, "writer started");
        Ok(Self {
            name,
            stop,
            wake: None,
            worker: Some(worker),
        })
    }

    /// Run `wake` on stop to unblock a `read` that may block indefinitely
    pub fn with_wake_hook(mut self, wake: impl FnOnce() + Send + 'static) -> Self {
        self.wake = Some(Box::new(wake));
        self
    }

    /// Whether the pull loop has exited on its own
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the loop, join the thread and report the worst error
    pub fn stop(&mut self) -> MediaResult<WriterStats> {
        let Some(worker) = self.worker.take() else {
            return Err(MediaError::invalid_state("running", "stopped"));
        };
        self.stop.store(true, Ordering::Release);
        if let Some(wake) = self.wake.take() {
            wake();
        }
        let outcome = worker.join().map_err(|_| MediaError::Unknown {
            reason: format!("writer thread {} panicked", self.name),
        })?;
        info!(
            writer = %self.name,
            buffers = outcome.stats.buffers,
            bytes = outcome.stats.bytes,
            "writer stopped"
        );
        match outcome.error {
            Some(e) => Err(e),
            None => Ok(outcome.stats),
        }
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                warn!(writer = %self.name, error = %e, "writer stopped with error on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pullmedia_core::{mime, MetaKey};

    struct CountingSource {
        remaining: u32,
        fail_at_end: bool,
        format: Arc<MetaData>,
        stopped: Arc<AtomicBool>,
    }

    impl CountingSource {
        fn new(count: u32) -> Self {
            Self {
                remaining: count,
                fail_at_end: false,
                format: Arc::new(MetaData::with_mime(mime::AUDIO_RAW)),
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl MediaSource for CountingSource {
        fn start(&mut self, _params: Option<&MetaData>) -> MediaResult<()> {
            Ok(())
        }
        fn stop(&mut self) -> MediaResult<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn format(&self) -> Arc<MetaData> {
            Arc::clone(&self.format)
        }
        fn read(&mut self, _options: &ReadOptions) -> MediaResult<ReadOutcome> {
            if self.remaining == 0 {
                if self.fail_at_end {
                    return Err(MediaError::ShortRead {
                        offset: 0,
                        expected: 4,
                        actual: 1,
                    });
                }
                return Ok(ReadOutcome::EndOfStream);
            }
            self.remaining -= 1;
            let mut meta = MetaData::new();
            meta.set_i64(MetaKey::Time, i64::from(self.remaining));
            Ok(ReadOutcome::Buffer(MediaBuffer::from_bytes(
                Bytes::from_static(b"abcd"),
                meta,
            )))
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl MediaSink for SharedSink {
        fn write(&mut self, buffer: &MediaBuffer, _format: &MetaData) -> MediaResult<()> {
            self.0.lock().extend_from_slice(buffer.data());
            Ok(())
        }
    }

    fn wait_finished(writer: &SinkWriter) {
        while !writer.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_end_of_stream_is_success() {
        let sink = SharedSink::default();
        let mut writer =
            SinkWriter::start(CountingSource::new(3), sink.clone(), WriterConfig::default())
                .unwrap();
        wait_finished(&writer);
        let stats = writer.stop().unwrap();
        assert_eq!(stats.buffers, 3);
        assert!(stats.reached_end);
        assert_eq!(sink.0.lock().len(), 12);
        assert!(writer.stop().is_err());
    }

    #[test]
    fn test_spawn_failure_stops_source() {
        let source = CountingSource::new(3);
        let stopped = Arc::clone(&source.stopped);
        let result = SinkWriter::start_with(
            source,
            SharedSink::default(),
            WriterConfig::default(),
            |_, _| Err(io::Error::new(io::ErrorKind::OutOfMemory, "no threads left")),
        );
        assert!(matches!(result, Err(MediaError::Io { .. })));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_read_error_surfaces_on_stop() {
        let mut source = CountingSource::new(2);
        source.fail_at_end = true;
        let mut writer =
            SinkWriter::start(source, SharedSink::default(), WriterConfig::default()).unwrap();
        wait_finished(&writer);
        assert!(matches!(writer.stop(), Err(MediaError::ShortRead { .. })));
    }

    #[test]
    fn test_backpressure_holds_the_loop() {
        let flag = Arc::new(AtomicBool::new(true));
        let sink = SharedSink::default();
        let config = WriterConfig {
            backpressure: Some(Arc::clone(&flag)),
            ..WriterConfig::default()
        };
        let mut writer = SinkWriter::start(CountingSource::new(2), sink.clone(), config).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(sink.0.lock().is_empty());
        flag.store(false, Ordering::Release);
        wait_finished(&writer);
        assert_eq!(writer.stop().unwrap().buffers, 2);
    }

    #[test]
    fn test_write_sink_collects_payloads() {
        let mut sink = WriteSink::new(Vec::new());
        let buffer = MediaBuffer::from_bytes(Bytes::from_static(b"xyz"), MetaData::new());
        sink.write(&buffer, &MetaData::new()).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.into_inner(), b"xyz");
    }
}
