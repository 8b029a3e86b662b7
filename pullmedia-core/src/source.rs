//! The pull-based media source contract
//!
//! Every stage of a pipeline (extractor track, device capture, decoder)
//! implements [`MediaSource`]. Stages compose by ownership: a decoder holds
//! the source it pulls from.

use crate::buffer::MediaBuffer;
use crate::error::{MediaError, MediaResult};
use crate::meta::MetaData;
use crate::options::ReadOptions;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Result of a successful `read`
#[derive(Debug)]
pub enum ReadOutcome {
    /// One unit of data
    Buffer(MediaBuffer),
    /// Format changed; call [`MediaSource::format`] again and retry the read
    /// without the options already consumed
    FormatChanged,
    /// The stream is exhausted
    EndOfStream,
}

impl ReadOutcome {
    /// The buffer, if this outcome carries one
    pub fn into_buffer(self) -> Option<MediaBuffer> {
        match self {
            ReadOutcome::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Whether this is end of stream
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }
}

/// Polymorphic pull interface shared by demuxers, decoders and device captures
///
/// `read` must only be called from one thread at a time per instance, and
/// never concurrently with `stop`.
pub trait MediaSource: Send {
    /// STOPPED → STARTED. `params` may carry start hints such as a start time.
    fn start(&mut self, params: Option<&MetaData>) -> MediaResult<()>;

    /// STARTED → STOPPED. Calling it on a stopped source is a precondition
    /// violation reported as [`MediaError::InvalidState`].
    fn stop(&mut self) -> MediaResult<()>;

    /// Current track format
    fn format(&self) -> Arc<MetaData>;

    /// Pull one unit of data
    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome>;
}

impl<S: MediaSource + ?Sized> MediaSource for Box<S> {
    fn start(&mut self, params: Option<&MetaData>) -> MediaResult<()> {
        (**self).start(params)
    }

    fn stop(&mut self) -> MediaResult<()> {
        (**self).stop()
    }

    fn format(&self) -> Arc<MetaData> {
        (**self).format()
    }

    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome> {
        (**self).read(options)
    }
}

/// Lifecycle state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    /// Not started, or stopped
    #[default]
    Stopped,
    /// Started and readable
    Started,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Stopped => write!(f, "stopped"),
            SourceState::Started => write!(f, "started"),
        }
    }
}

/// Lifecycle guard shared by source implementations
///
/// Rejects start-while-started, stop-while-stopped and read-while-stopped
/// uniformly with [`MediaError::InvalidState`].
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: SourceState,
    name: &'static str,
}

impl Lifecycle {
    /// New guard in the stopped state
    pub fn new(name: &'static str) -> Self {
        Self {
            state: SourceState::Stopped,
            name,
        }
    }

    /// Current state
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Whether the source is started
    pub fn is_started(&self) -> bool {
        self.state == SourceState::Started
    }

    /// Check and perform STOPPED → STARTED
    pub fn start(&mut self) -> MediaResult<()> {
        self.require(SourceState::Stopped, "start")?;
        self.state = SourceState::Started;
        Ok(())
    }

    /// Check and perform STARTED → STOPPED
    pub fn stop(&mut self) -> MediaResult<()> {
        self.require(SourceState::Started, "stop")?;
        self.state = SourceState::Stopped;
        Ok(())
    }

    /// Check that `read` is allowed
    pub fn check_readable(&self) -> MediaResult<()> {
        self.require(SourceState::Started, "read")
    }

    fn require(&self, expected: SourceState, operation: &str) -> MediaResult<()> {
        if self.state != expected {
            error!(
                source = self.name,
                operation,
                state = %self.state,
                "lifecycle precondition violated"
            );
            return Err(MediaError::invalid_state(
                expected.to_string(),
                self.state.to_string(),
            ));
        }
        Ok(())
    }
}

/// Default gap tolerated between a buffer's time and a skip target
pub const DEFAULT_SKIP_WINDOW_US: i64 = 1_000_000;

/// What to do with a buffer while honouring a skip-until request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    /// The buffer is at or past the target; deliver it
    Deliver,
    /// The buffer is older than the target; drop it and pull the next one
    Drop,
}

/// Decide whether a buffer at `buffer_time_us` satisfies `skip_until_us`
///
/// A target further than `window_us` ahead of the buffer is treated as an
/// internal inconsistency and fails with [`MediaError::Unknown`] instead of
/// dropping buffers indefinitely.
pub fn check_skip(
    buffer_time_us: i64,
    skip_until_us: i64,
    window_us: i64,
) -> MediaResult<SkipDecision> {
    if buffer_time_us >= skip_until_us {
        return Ok(SkipDecision::Deliver);
    }
    let gap = skip_until_us - buffer_time_us;
    if gap > window_us {
        error!(
            buffer_time_us,
            skip_until_us, window_us, "skip target beyond sanity window"
        );
        return Err(MediaError::Unknown {
            reason: format!(
                "skip target {skip_until_us}us is {gap}us ahead of buffer at {buffer_time_us}us"
            ),
        });
    }
    Ok(SkipDecision::Drop)
}
