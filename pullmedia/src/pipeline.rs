//! Pipeline assembly: data source → extractor → decoder → writer

use crate::PipelineConfig;
use pullmedia_core::{DataSource, MediaError, MediaResult, MediaSource, MetaData};
use pullmedia_media::{
    create_decoder, create_extractor_for_mime, sniff, CodecRegistry, MediaSink, SinkWriter,
    WriterConfig, WriterStats,
};
use std::sync::Arc;
use tracing::{info, instrument};

#[cfg(feature = "diagnostics")]
use pullmedia_diagnostics::{ProbeHandle, ProbeReport, ProbedSource};

/// Fluent builder for a running [`Pipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    registry: Option<CodecRegistry>,
    data_source: Option<Arc<dyn DataSource>>,
    track: usize,
    decode: bool,
    sink: Option<Box<dyn MediaSink>>,
    writer: WriterConfig,
    #[cfg(feature = "diagnostics")]
    probe: bool,
}

impl PipelineBuilder {
    pub(crate) fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: None,
            data_source: None,
            track: 0,
            decode: false,
            sink: None,
            writer: WriterConfig::default(),
            #[cfg(feature = "diagnostics")]
            probe: false,
        }
    }

    /// Data to demultiplex (required)
    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(source);
        self
    }

    /// Track to play; defaults to 0
    pub fn track(mut self, index: usize) -> Self {
        self.track = index;
        self
    }

    /// Decode the track before it reaches the sink
    pub fn decode(mut self, decode: bool) -> Self {
        self.decode = decode;
        self
    }

    /// Codec backends used when decoding; defaults to [`CodecRegistry::with_defaults`]
    pub fn registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Destination of the pulled buffers (required)
    pub fn sink(mut self, sink: impl MediaSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Writer thread settings
    pub fn writer_config(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }

    /// Audit timestamps and traffic of the buffers handed to the sink
    #[cfg(feature = "diagnostics")]
    pub fn probe(mut self) -> Self {
        self.probe = true;
        self
    }

    /// Assemble the chain and start the writer
    #[instrument(skip_all, fields(track = self.track, decode = self.decode))]
    pub fn build(self) -> MediaResult<Pipeline> {
        self.config.validate()?;
        let data_source = self.data_source.ok_or_else(|| MediaError::InvalidConfiguration {
            message: "pipeline needs a data source".to_string(),
        })?;
        let sink = self.sink.ok_or_else(|| MediaError::InvalidConfiguration {
            message: "pipeline needs a sink".to_string(),
        })?;

        let sniffed = sniff(data_source.as_ref())
            .ok_or_else(|| MediaError::unsupported("no extractor recognises the data"))?;
        let extractor =
            create_extractor_for_mime(data_source, sniffed.mime, self.config.extractor_config())?;
        if self.track >= extractor.count_tracks() {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "track {} requested but the container has {}",
                    self.track,
                    extractor.count_tracks()
                ),
            });
        }
        let track_format = extractor.track_format(self.track);

        let mut source = extractor.track(self.track)?;
        if self.decode {
            let registry = self.registry.unwrap_or_else(CodecRegistry::with_defaults);
            source = create_decoder(source, &registry, self.config.decoder_config())?;
        }
        let format = source.format();

        #[cfg(feature = "diagnostics")]
        let (source, probe) = if self.probe {
            let probed = ProbedSource::new(source, format!("track-{}", self.track));
            let handle = probed.handle();
            (Box::new(probed) as Box<dyn MediaSource>, Some(handle))
        } else {
            (source, None)
        };

        let writer = SinkWriter::start(source, sink, self.writer)?;
        info!(
            container = sniffed.mime,
            track_mime = ?track_format.as_deref().and_then(MetaData::mime),
            output_mime = ?format.mime(),
            "pipeline running"
        );
        Ok(Pipeline {
            container_mime: sniffed.mime,
            format,
            writer,
            #[cfg(feature = "diagnostics")]
            probe,
        })
    }
}

/// A running chain pulled by a writer thread
///
/// Dropping the pipeline stops it; errors are then only logged.
pub struct Pipeline {
    container_mime: &'static str,
    format: Arc<MetaData>,
    writer: SinkWriter,
    #[cfg(feature = "diagnostics")]
    probe: Option<ProbeHandle>,
}

impl Pipeline {
    /// Start configuring a pipeline
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Container type detected in the data source
    pub fn container_mime(&self) -> &'static str {
        self.container_mime
    }

    /// Format of the buffers handed to the sink, as of start
    pub fn format(&self) -> Arc<MetaData> {
        Arc::clone(&self.format)
    }

    /// Whether the writer has exited on its own, usually at end of stream
    pub fn is_finished(&self) -> bool {
        self.writer.is_finished()
    }

    /// Traffic seen so far, when built with [`PipelineBuilder::probe`]
    #[cfg(feature = "diagnostics")]
    pub fn probe_report(&self) -> Option<ProbeReport> {
        self.probe.as_ref().map(ProbeHandle::report)
    }

    /// Stop the writer and report its worst error
    pub fn stop(mut self) -> MediaResult<WriterStats> {
        self.writer.stop()
    }
}
