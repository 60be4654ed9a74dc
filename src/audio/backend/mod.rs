//! Blocking input backends
//!
//! The capture stream only needs a "read N frames" primitive. Backends hide
//! whether the underlying library is blocking or callback driven.

use std::time::Duration;
use thiserror::Error;

pub mod cpal_backend;
pub mod synthetic;

pub use cpal_backend::CpalBackend;
pub use synthetic::SyntheticBackend;

/// Backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Audio host error: {0}")]
    Host(String),

    #[error("Invalid device index: {0}")]
    InvalidDevice(usize),

    #[error("Failed to open input stream: {0}")]
    Open(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timed out waiting for input")]
    Timeout,

    #[error("Input stream disconnected")]
    Disconnected,
}

/// A device as reported by the backend, before input filtering
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
    pub default_low_input_latency: Duration,
}

/// Parameters for opening a blocking input stream
#[derive(Debug, Clone, PartialEq)]
pub struct InputStreamConfig {
    pub device_index: usize,
    pub channels: u16,
    pub sample_rate: u32,
    /// Host buffer size in frames (0 lets the backend choose)
    pub frames_per_buffer: u32,
    pub suggested_latency: Duration,
}

/// Outcome of a successful blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Complete,
    /// The buffer was filled but input was dropped since the last read
    Overflowed,
}

/// Library-wide entry point of an input backend
pub trait InputBackend: Send + Sync {
    /// Global library setup, called once at module startup
    fn initialize(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Global library teardown, called once at module shutdown
    fn terminate(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Every device the library knows about, including output-only ones
    fn devices(&self) -> Result<Vec<BackendDeviceInfo>, BackendError>;

    fn default_input_device(&self) -> Option<usize>;

    /// Open a stream for blocking reads. The stream starts stopped.
    fn open_input(&self, config: &InputStreamConfig)
        -> Result<Box<dyn BlockingInput>, BackendError>;

    fn device_info(&self, index: usize) -> Result<BackendDeviceInfo, BackendError> {
        self.devices()?
            .into_iter()
            .find(|d| d.index == index)
            .ok_or(BackendError::InvalidDevice(index))
    }
}

/// One open native input stream
pub trait BlockingInput: Send {
    fn start(&mut self) -> Result<(), BackendError>;

    fn stop(&mut self) -> Result<(), BackendError>;

    /// Fill `buf` completely with interleaved samples, blocking until enough
    /// input is available. `buf.len()` must be a multiple of the channel count.
    fn read(&mut self, buf: &mut [f32]) -> Result<ReadStatus, BackendError>;

    fn close(&mut self) -> Result<(), BackendError>;
}
