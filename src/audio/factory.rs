use std::sync::Arc;
use tracing::{error, info};

use super::backend::InputBackend;
use super::stream::{BlockingCaptureStream, DEFAULT_FRAMES_PER_READ};
use crate::host::{AudioCaptureFactory, AudioCaptureStream};

/// Creates [`BlockingCaptureStream`]s over a shared backend
pub struct BlockingCaptureFactory {
    backend: Arc<dyn InputBackend>,
    audio_enabled: bool,
    frames_per_read: usize,
}

impl BlockingCaptureFactory {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            audio_enabled: true,
            frames_per_read: DEFAULT_FRAMES_PER_READ,
        }
    }

    /// Whether the host engine has audio enabled. No streams are created when it doesn't.
    pub fn with_audio_enabled(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    pub fn with_frames_per_read(mut self, frames: usize) -> Self {
        self.frames_per_read = frames;
        self
    }
}

impl AudioCaptureFactory for BlockingCaptureFactory {
    fn create_stream(&self) -> Option<Box<dyn AudioCaptureStream>> {
        if !self.audio_enabled {
            error!("Cannot create capture stream: host audio is disabled");
            return None;
        }

        let stream = BlockingCaptureStream::new(self.backend.clone())
            .with_frames_per_read(self.frames_per_read);

        match stream.input_devices_available() {
            Ok(devices) => {
                info!("Found {} capture devices:", devices.len());
                for device in &devices {
                    info!(
                        "- Device: {} (ID: {}, Channels: {}, Rate: {} Hz)",
                        device.device_name,
                        device.device_id,
                        device.input_channels,
                        device.preferred_sample_rate
                    );
                }
            }
            Err(e) => error!("No audio capture devices found: {}", e),
        }

        Some(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::synthetic::{synthetic_device, SyntheticBackend};

    #[test]
    fn test_creates_closed_stream() {
        let factory = BlockingCaptureFactory::new(Arc::new(SyntheticBackend::new()));
        let stream = factory.create_stream().expect("stream");
        assert!(!stream.is_stream_open());
        assert!(!stream.is_capturing());
    }

    #[test]
    fn test_audio_disabled_creates_nothing() {
        let factory = BlockingCaptureFactory::new(Arc::new(SyntheticBackend::new()))
            .with_audio_enabled(false);
        assert!(factory.create_stream().is_none());
    }

    #[test]
    fn test_stream_created_without_input_devices() {
        let backend =
            SyntheticBackend::with_devices(vec![synthetic_device(0, "Speakers", 0, 48000)], None);
        let factory = BlockingCaptureFactory::new(Arc::new(backend));
        assert!(factory.create_stream().is_some());
    }
}
