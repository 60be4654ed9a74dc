use thiserror::Error;

use crate::audio::backend::BackendError;

/// Errors returned by capture streams and factories
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture stream already open")]
    AlreadyOpen,

    #[error("Capture stream not open")]
    NotOpen,

    #[error("Capture stream already capturing")]
    AlreadyCapturing,

    #[error("Capture stream not capturing")]
    NotCapturing,

    #[error("No input device found")]
    NoDevice,

    #[error("No input devices available")]
    NoInputDevices,

    #[error("Invalid device index: {0}")]
    InvalidDevice(usize),

    #[error("Device {0} has no input channels")]
    NoInputChannels(usize),

    #[error("Device {0} reports no usable sample rate")]
    InvalidSampleRate(usize),

    #[error("Capture thread error: {0}")]
    Thread(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
