//! Async adapter exposing a pull source as a [`Stream`]
//!
//! The source runs on a tokio blocking thread and pushes buffers through a
//! bounded channel, so a slow consumer holds the producer back. Format
//! changes are absorbed: the new format is available from
//! [`SourceStream::format`] and the stream simply continues.

use futures::Stream;
use parking_lot::Mutex;
use pullmedia_core::{
    MediaBuffer, MediaError, MediaResult, MediaSource, MetaData, ReadOptions, ReadOutcome,
};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Stream of buffers pulled from a [`MediaSource`] on a blocking thread
pub struct SourceStream {
    rx: mpsc::Receiver<MediaResult<MediaBuffer>>,
    format: Arc<Mutex<Arc<MetaData>>>,
    stop: Arc<AtomicBool>,
    task: Option<JoinHandle<MediaResult<()>>>,
}

impl SourceStream {
    /// Start `source` on the blocking pool; at most `capacity` buffers queue up
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S: MediaSource + 'static>(mut source: S, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let format = Arc::new(Mutex::new(source.format()));
        let stop = Arc::new(AtomicBool::new(false));
        let task_format = Arc::clone(&format);
        let task_stop = Arc::clone(&stop);

        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = source.start(None) {
                let _ = tx.blocking_send(Err(e));
                return Ok(());
            }
            *task_format.lock() = source.format();
            let options = ReadOptions::new();
            while !task_stop.load(Ordering::Acquire) {
                match source.read(&options) {
                    Ok(ReadOutcome::Buffer(buffer)) => {
                        if tx.blocking_send(Ok(buffer)).is_err() {
                            debug!("stream receiver dropped");
                            break;
                        }
                    }
                    Ok(ReadOutcome::FormatChanged) => {
                        *task_format.lock() = source.format();
                    }
                    Ok(ReadOutcome::EndOfStream) => break,
                    Err(e) => {
                        warn!(error = %e, "source read failed");
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
            source.stop()
        });

        Self {
            rx,
            format,
            stop,
            task: Some(task),
        }
    }

    /// Most recent format published by the source
    pub fn format(&self) -> Arc<MetaData> {
        self.format.lock().clone()
    }

    /// Stop pulling and wait for the source to stop
    pub async fn stop(mut self) -> MediaResult<()> {
        self.stop.store(true, Ordering::Release);
        self.rx.close();
        // free a producer blocked on a full channel
        while self.rx.try_recv().is_ok() {}
        match self.task.take() {
            Some(task) => task.await.map_err(|e| MediaError::Unknown {
                reason: format!("source task failed: {e}"),
            })?,
            None => Ok(()),
        }
    }
}

impl Stream for SourceStream {
    type Item = MediaResult<MediaBuffer>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
