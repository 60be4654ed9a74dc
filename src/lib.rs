//! Audio capture streams for a host engine, backed by a blocking read loop.

pub mod audio;
pub mod config;
pub mod error;
pub mod host;
pub mod module;


pub use audio::{BlockingCaptureFactory, BlockingCaptureStream, CpalBackend, SyntheticBackend};
pub use config::CaptureConfig;
pub use error::{CaptureError, CaptureResult};
pub use host::{
    AudioCaptureFactory, AudioCaptureStream, CaptureBuffer, CaptureDeviceInfo,
    CaptureDeviceParams, OnCaptureFn,
};
pub use module::CaptureModule;
