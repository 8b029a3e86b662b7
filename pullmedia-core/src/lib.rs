//! # PullMedia Core
//!
//! Contracts and primitives of the pull-based media pipeline: reference
//! counted pooled buffers, format metadata, per-call read options, the
//! [`MediaSource`] trait, random-access data sources and time sources.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod data_source;
pub mod error;
pub mod meta;
pub mod options;
pub mod source;
pub mod time_source;

// Re-export main types
pub use buffer::{BufferId, BufferPool, MediaBuffer, MutableBuffer, PoolConfig, ReleaseObserver};
pub use data_source::{DataSource, FileSource, MemorySource, UNKNOWN_SIZE};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use meta::{mime, MetaData, MetaKey, MetaValue};
pub use options::{ReadOptions, SeekMode, SeekRequest};
pub use source::{
    check_skip, Lifecycle, MediaSource, ReadOutcome, SkipDecision, SourceState,
    DEFAULT_SKIP_WINDOW_US,
};
pub use time_source::{
    Clock, ManualClock, MonotonicClock, SyncTimeSource, SystemTimeSource, TimeSource,
};
