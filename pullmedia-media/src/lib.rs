//! # PullMedia Media
//!
//! Everything that produces or consumes buffers on top of the core
//! contracts: container extractors, codec backends and the decoder adapters
//! built on them, device-backed sources, the writer thread and an async
//! stream adapter.

#![warn(clippy::all)]

pub mod async_source;
pub mod codec;
pub mod decoder;
pub mod device;
pub mod extractor;
pub mod writer;

// Re-export main types
pub use async_source::SourceStream;
pub use codec::{
    AudioCodecBackend, CodecConfig, CodecRegistry, DecodedAudio, DecodedPicture,
    ImaAdpcmBackend, VideoCodecBackend,
};
pub use decoder::{create_decoder, AudioDecoder, DecoderConfig, VideoDecoder};
pub use device::{
    CameraConfig, CameraSource, CaptureDevice, CharDeviceConfig, CharDeviceSource, DeviceFrame,
    DeviceSourceConfig, DeviceSourceCore, DeviceStats, FmRadioConfig, FmRadioSource,
    FrameFeeder, FrameRecycler, NoopRecycler, StopHandle,
};
pub use extractor::{
    aac_frame_size, aac_parse_header, create_extractor, create_extractor_for_mime, sniff,
    AacExtractor, AdtsHeader, Extractor, ExtractorConfig, Mp3Extractor, MpegAudioHeader,
    SniffResult,
};
pub use writer::{FileSink, MediaSink, SinkWriter, WriteSink, WriterConfig, WriterStats};
