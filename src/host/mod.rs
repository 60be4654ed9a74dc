//! Host engine capture interface
//!
//! These are the types and traits the host engine programs against. Streams
//! are created by a registered [`AudioCaptureFactory`] and push audio into the
//! host through an [`OnCaptureFn`].

pub mod registry;

pub use registry::{FeatureRegistry, ModularFeatures, AUDIO_CAPTURE_FACTORY_FEATURE};

use serde::{Deserialize, Serialize};

use crate::error::CaptureResult;

/// Description of one capture device as the host sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDeviceInfo {
    /// Backend device index, as a decimal string
    pub device_id: String,
    pub device_name: String,
    pub input_channels: u16,
    pub preferred_sample_rate: u32,
    pub supports_hardware_aec: bool,
}

/// Requested stream parameters. `None` means "use the device default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDeviceParams {
    pub device_index: Option<usize>,
    pub num_input_channels: Option<u16>,
    pub sample_rate: Option<u32>,
}

/// One block of captured audio handed to the host
#[derive(Debug, Clone, Copy)]
pub struct CaptureBuffer<'a> {
    /// Interleaved samples, `num_frames * num_channels` long
    pub samples: &'a [f32],
    pub num_frames: usize,
    pub num_channels: u16,
    pub sample_rate: u32,
    /// Seconds since the stream was started
    pub stream_time: f64,
    pub overflow: bool,
}

/// Capture callback, invoked on the capture thread
pub type OnCaptureFn = Box<dyn FnMut(&CaptureBuffer<'_>) + Send + 'static>;

/// A single audio capture stream
pub trait AudioCaptureStream: Send {
    fn register_user(&mut self, user_id: &str) -> bool;

    fn unregister_user(&mut self, user_id: &str) -> bool;

    /// Info for an input device, or the default input device when `None`
    fn capture_device_info(&self, device_index: Option<usize>) -> CaptureResult<CaptureDeviceInfo>;

    /// All devices with at least one input channel
    fn input_devices_available(&self) -> CaptureResult<Vec<CaptureDeviceInfo>>;

    fn open_stream(
        &mut self,
        params: &CaptureDeviceParams,
        on_capture: OnCaptureFn,
        frames_desired: u32,
    ) -> CaptureResult<()>;

    fn close_stream(&mut self) -> CaptureResult<()>;

    fn start_stream(&mut self) -> CaptureResult<()>;

    fn stop_stream(&mut self) -> CaptureResult<()>;

    fn abort_stream(&mut self) -> CaptureResult<()>;

    /// Seconds since capture started, `None` when not capturing
    fn stream_time(&self) -> Option<f64>;

    fn sample_rate(&self) -> u32;

    fn num_channels(&self) -> u16;

    fn is_stream_open(&self) -> bool;

    fn is_capturing(&self) -> bool;
}

/// Creates capture streams for the host
pub trait AudioCaptureFactory: Send + Sync {
    fn create_stream(&self) -> Option<Box<dyn AudioCaptureStream>>;
}
