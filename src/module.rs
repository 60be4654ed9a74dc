//! Plugin module lifecycle
//!
//! Startup initializes the backend library once and registers a capture
//! factory with the host; shutdown reverses both steps.

use std::sync::Arc;
use tracing::{error, info};

use crate::audio::backend::InputBackend;
use crate::audio::BlockingCaptureFactory;
use crate::host::{AudioCaptureFactory, FeatureRegistry, AUDIO_CAPTURE_FACTORY_FEATURE};

pub struct CaptureModule {
    backend: Arc<dyn InputBackend>,
    audio_enabled: bool,
    frames_per_read: Option<usize>,
    factory: Option<Arc<dyn AudioCaptureFactory>>,
}

impl CaptureModule {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            audio_enabled: true,
            frames_per_read: None,
            factory: None,
        }
    }

    pub fn with_audio_enabled(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    pub fn with_frames_per_read(mut self, frames: usize) -> Self {
        self.frames_per_read = Some(frames);
        self
    }

    pub fn is_registered(&self) -> bool {
        self.factory.is_some()
    }

    pub fn startup(&mut self, registry: &dyn FeatureRegistry) {
        // Init failure is logged, not fatal
        if let Err(e) = self.backend.initialize() {
            error!("Audio backend initialization failed: {}", e);
        }

        let mut factory =
            BlockingCaptureFactory::new(self.backend.clone()).with_audio_enabled(self.audio_enabled);
        if let Some(frames) = self.frames_per_read {
            factory = factory.with_frames_per_read(frames);
        }
        let factory: Arc<dyn AudioCaptureFactory> = Arc::new(factory);

        registry.register_feature(AUDIO_CAPTURE_FACTORY_FEATURE, factory.clone());
        self.factory = Some(factory);
        info!("Capture module: factory registered");
    }

    pub fn shutdown(&mut self, registry: &dyn FeatureRegistry) {
        if let Some(factory) = self.factory.take() {
            registry.unregister_feature(AUDIO_CAPTURE_FACTORY_FEATURE, &factory);
            info!("Capture module: factory unregistered");
        }

        if let Err(e) = self.backend.terminate() {
            error!("Audio backend termination failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::SyntheticBackend;
    use crate::host::ModularFeatures;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_startup_and_shutdown() {
        let backend = Arc::new(SyntheticBackend::new());
        let stats = backend.stats();
        let registry = ModularFeatures::new();
        let mut module = CaptureModule::new(backend);

        module.startup(&registry);
        assert!(module.is_registered());
        assert_eq!(stats.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count(AUDIO_CAPTURE_FACTORY_FEATURE), 1);

        let factory = registry.first(AUDIO_CAPTURE_FACTORY_FEATURE).unwrap();
        assert!(factory.create_stream().is_some());

        module.shutdown(&registry);
        assert!(!module.is_registered());
        assert_eq!(stats.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count(AUDIO_CAPTURE_FACTORY_FEATURE), 0);
    }

    #[test]
    fn test_registered_factory_honours_audio_disabled() {
        let registry = ModularFeatures::new();
        let mut module =
            CaptureModule::new(Arc::new(SyntheticBackend::new())).with_audio_enabled(false);

        module.startup(&registry);
        let factory = registry.first(AUDIO_CAPTURE_FACTORY_FEATURE).unwrap();
        assert!(factory.create_stream().is_none());
        module.shutdown(&registry);
    }
}
