//! # PullMedia - Pull-Based Media Streaming
//!
//! Media flows through a chain of sources, each pulling from the one
//! upstream: a container extractor reads frames from a data source, a
//! decoder adapter turns them into raw PCM or YUV, and a writer thread pulls
//! the result into a sink. Device-backed sources (camera, FM tuner, byte
//! devices) plug into the same chain.
//!
//! ## Key Features
//!
//! - **Pooled buffers**: reference-counted buffers returned to their pool on release
//! - **ADTS AAC and MPEG audio**: sniffing, seeking and bit-rate based durations
//! - **Decoder adapters**: AAC and MP3 via symphonia, AVC via openh264, IMA ADPCM natively
//! - **Device sources**: bounded loans, glitch accounting and prompt stop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pullmedia::{FileSink, FileSource, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), pullmedia::MediaError> {
//!     let config = PipelineConfig::default();
//!     pullmedia::init(&config)?;
//!
//!     let pipeline = Pipeline::builder(config)
//!         .data_source(Arc::new(FileSource::open("song.aac")?))
//!         .decode(true)
//!         .sink(FileSink::create("song.pcm")?)
//!         .build()?;
//!
//!     while !pipeline.is_finished() {
//!         std::thread::sleep(std::time::Duration::from_millis(50));
//!     }
//!     let stats = pipeline.stop()?;
//!     println!("wrote {} bytes", stats.bytes);
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use pullmedia_core::{
    mime, BufferPool, DataSource, FileSource, MediaBuffer, MediaError, MediaResult, MediaSource,
    MemorySource, MetaData, MetaKey, PoolConfig, ReadOptions, ReadOutcome, SeekMode,
    SystemTimeSource, TimeSource,
};

pub use pullmedia_media::{
    create_decoder, create_extractor, sniff, CameraConfig, CameraSource, CharDeviceConfig,
    CharDeviceSource, CodecRegistry, DecoderConfig, Extractor, ExtractorConfig, FileSink,
    FmRadioConfig, FmRadioSource, MediaSink, SinkWriter, SourceStream, WriteSink, WriterConfig,
    WriterStats,
};

#[cfg(feature = "diagnostics")]
pub use pullmedia_diagnostics::{LoggingConfig, ProbeReport, ProbedSource};

// Public API modules
pub mod config;
pub mod pipeline;

// Re-export main API types
pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineBuilder};

/// Validate `config` and install the log subscriber
///
/// Returns `Ok(true)` when this call installed the subscriber and `Ok(false)`
/// when one was already in place or diagnostics are compiled out.
///
/// # Example
/// ```rust,no_run
/// let config = pullmedia::PipelineConfig::default();
/// pullmedia::init(&config)?;
/// # Ok::<(), pullmedia::MediaError>(())
/// ```
pub fn init(config: &PipelineConfig) -> MediaResult<bool> {
    config.validate()?;
    install_logging(config)
}

#[cfg(feature = "diagnostics")]
fn install_logging(config: &PipelineConfig) -> MediaResult<bool> {
    let logging = if config.debug_logging {
        LoggingConfig::debug()
    } else {
        LoggingConfig::default()
    };
    pullmedia_diagnostics::DebugLogger::new(logging).init_logging()
}

#[cfg(not(feature = "diagnostics"))]
fn install_logging(_config: &PipelineConfig) -> MediaResult<bool> {
    Ok(false)
}
