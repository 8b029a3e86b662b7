//! MIME-keyed codec backend registry

use super::{AudioCodecBackend, ImaAdpcmBackend, VideoCodecBackend};
use pullmedia_core::{mime, MediaError, MediaResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Constructor for an audio backend
pub type AudioBackendFactory = Arc<dyn Fn() -> Box<dyn AudioCodecBackend> + Send + Sync>;
/// Constructor for a video backend
pub type VideoBackendFactory = Arc<dyn Fn() -> Box<dyn VideoCodecBackend> + Send + Sync>;

/// Codec registry for dynamic backend selection
#[derive(Clone, Default)]
pub struct CodecRegistry {
    audio: HashMap<String, AudioBackendFactory>,
    video: HashMap<String, VideoBackendFactory>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.list_codecs())
            .finish()
    }
}

impl CodecRegistry {
    /// Create an empty codec registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every backend compiled in
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_audio(mime::AUDIO_IMA_ADPCM, || Box::new(ImaAdpcmBackend::new()));

        #[cfg(feature = "symphonia")]
        {
            use super::symphonia::SymphoniaAudioBackend;
            registry.register_audio(mime::AUDIO_AAC, || Box::new(SymphoniaAudioBackend::aac()));
            registry.register_audio(mime::AUDIO_MPEG, || Box::new(SymphoniaAudioBackend::mp3()));
        }

        #[cfg(feature = "h264")]
        {
            use super::h264::OpenH264Backend;
            registry.register_video(mime::VIDEO_AVC, || Box::new(OpenH264Backend::new()));
        }

        registry
    }

    /// Register an audio backend for `mime_type`, replacing any previous one
    pub fn register_audio<F>(&mut self, mime_type: &str, factory: F)
    where
        F: Fn() -> Box<dyn AudioCodecBackend> + Send + Sync + 'static,
    {
        self.audio.insert(mime_type.to_string(), Arc::new(factory));
    }

    /// Register a video backend for `mime_type`, replacing any previous one
    pub fn register_video<F>(&mut self, mime_type: &str, factory: F)
    where
        F: Fn() -> Box<dyn VideoCodecBackend> + Send + Sync + 'static,
    {
        self.video.insert(mime_type.to_string(), Arc::new(factory));
    }

    /// New audio backend for `mime_type`
    pub fn create_audio(&self, mime_type: &str) -> MediaResult<Box<dyn AudioCodecBackend>> {
        self.audio
            .get(mime_type)
            .map(|factory| factory())
            .ok_or_else(|| MediaError::unsupported(mime_type))
    }

    /// New video backend for `mime_type`
    pub fn create_video(&self, mime_type: &str) -> MediaResult<Box<dyn VideoCodecBackend>> {
        self.video
            .get(mime_type)
            .map(|factory| factory())
            .ok_or_else(|| MediaError::unsupported(mime_type))
    }

    /// Whether an audio backend handles `mime_type`
    pub fn supports_audio(&self, mime_type: &str) -> bool {
        self.audio.contains_key(mime_type)
    }

    /// Whether a video backend handles `mime_type`
    pub fn supports_video(&self, mime_type: &str) -> bool {
        self.video.contains_key(mime_type)
    }

    /// List registered MIME types
    pub fn list_codecs(&self) -> Vec<String> {
        let mut codecs: Vec<String> = self.audio.keys().chain(self.video.keys()).cloned().collect();
        codecs.sort();
        codecs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_include_native_adpcm() {
        let registry = CodecRegistry::with_defaults();
        assert!(registry.supports_audio(mime::AUDIO_IMA_ADPCM));
        let backend = registry.create_audio(mime::AUDIO_IMA_ADPCM).unwrap();
        assert_eq!(backend.name(), "ima-adpcm");
        #[cfg(feature = "symphonia")]
        assert!(registry.supports_audio(mime::AUDIO_AAC));
        #[cfg(feature = "h264")]
        assert!(registry.supports_video(mime::VIDEO_AVC));
    }

    #[test]
    fn test_unknown_mime_is_unsupported() {
        let registry = CodecRegistry::new();
        assert!(matches!(
            registry.create_video(mime::VIDEO_MPEG4),
            Err(MediaError::Unsupported { .. })
        ));
        assert!(registry.list_codecs().is_empty());
    }
}
