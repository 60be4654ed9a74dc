use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::AudioCaptureFactory;

/// Feature name capture factories are registered under
pub const AUDIO_CAPTURE_FACTORY_FEATURE: &str = "AudioCaptureFactory";

/// Host-owned registry of named feature implementations
pub trait FeatureRegistry {
    fn register_feature(&self, name: &str, factory: Arc<dyn AudioCaptureFactory>);

    fn unregister_feature(&self, name: &str, factory: &Arc<dyn AudioCaptureFactory>);
}

/// In-process feature registry
#[derive(Default)]
pub struct ModularFeatures {
    features: Mutex<HashMap<String, Vec<Arc<dyn AudioCaptureFactory>>>>,
}

impl ModularFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of implementations registered under `name`
    pub fn count(&self, name: &str) -> usize {
        self.features
            .lock()
            .map(|f| f.get(name).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// First implementation registered under `name`
    pub fn first(&self, name: &str) -> Option<Arc<dyn AudioCaptureFactory>> {
        self.features
            .lock()
            .ok()?
            .get(name)
            .and_then(|list| list.first().cloned())
    }
}

impl FeatureRegistry for ModularFeatures {
    fn register_feature(&self, name: &str, factory: Arc<dyn AudioCaptureFactory>) {
        match self.features.lock() {
            Ok(mut features) => {
                features.entry(name.to_string()).or_default().push(factory);
                debug!("Registered feature: {}", name);
            }
            Err(e) => warn!("Feature registry poisoned: {}", e),
        }
    }

    fn unregister_feature(&self, name: &str, factory: &Arc<dyn AudioCaptureFactory>) {
        match self.features.lock() {
            Ok(mut features) => {
                if let Some(list) = features.get_mut(name) {
                    list.retain(|f| !Arc::ptr_eq(f, factory));
                    if list.is_empty() {
                        features.remove(name);
                    }
                }
                debug!("Unregistered feature: {}", name);
            }
            Err(e) => warn!("Feature registry poisoned: {}", e),
        }
    }
}
