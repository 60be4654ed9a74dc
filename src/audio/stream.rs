//! Capture stream over a blocking input backend
//!
//! One stream owns at most one native input handle and at most one capture
//! thread. Lifecycle: closed -> open -> capturing -> open -> closed.
//!
//! While capturing, the input handle and the host callback are moved into the
//! capture thread and handed back when it is joined.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::backend::{
    BackendDeviceInfo, BackendError, BlockingInput, InputBackend, InputStreamConfig, ReadStatus,
};
use crate::error::{CaptureError, CaptureResult};
use crate::host::{
    AudioCaptureStream, CaptureBuffer, CaptureDeviceInfo, CaptureDeviceParams, OnCaptureFn,
};

/// Frames delivered to the host per callback
pub const DEFAULT_FRAMES_PER_READ: usize = 256;

/// Back-off after a failed read before trying again
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

impl From<&BackendDeviceInfo> for CaptureDeviceInfo {
    fn from(info: &BackendDeviceInfo) -> Self {
        Self {
            device_id: info.index.to_string(),
            device_name: info.name.clone(),
            input_channels: info.max_input_channels,
            preferred_sample_rate: info.default_sample_rate,
            supports_hardware_aec: false,
        }
    }
}

fn device_error(err: BackendError) -> CaptureError {
    match err {
        BackendError::InvalidDevice(index) => CaptureError::InvalidDevice(index),
        other => CaptureError::Backend(other),
    }
}

/// State that lives on the capture thread while capturing
struct CaptureWorker {
    input: Box<dyn BlockingInput>,
    on_capture: OnCaptureFn,
}

/// Fixed per-run parameters of the read loop
#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    num_channels: u16,
    sample_rate: u32,
    frames_per_read: usize,
    started_at: Instant,
}

/// Audio capture stream driven by a blocking read loop
pub struct BlockingCaptureStream {
    backend: Arc<dyn InputBackend>,
    input: Option<Box<dyn BlockingInput>>,
    on_capture: Option<OnCaptureFn>,
    worker: Option<JoinHandle<CaptureWorker>>,
    capturing: Arc<AtomicBool>,
    stream_open: bool,
    num_channels: u16,
    sample_rate: u32,
    frames_per_read: usize,
    started_at: Option<Instant>,
    users: HashSet<String>,
}

impl BlockingCaptureStream {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            input: None,
            on_capture: None,
            worker: None,
            capturing: Arc::new(AtomicBool::new(false)),
            stream_open: false,
            num_channels: 0,
            sample_rate: 0,
            frames_per_read: DEFAULT_FRAMES_PER_READ,
            started_at: None,
            users: HashSet::new(),
        }
    }

    /// Override the number of frames per callback (clamped to at least 1)
    pub fn with_frames_per_read(mut self, frames: usize) -> Self {
        self.frames_per_read = frames.max(1);
        self
    }

    pub fn frames_per_read(&self) -> usize {
        self.frames_per_read
    }

    pub fn registered_users(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }

    fn resolve_device(&self, device_index: Option<usize>) -> CaptureResult<BackendDeviceInfo> {
        let index = device_index
            .or_else(|| self.backend.default_input_device())
            .ok_or(CaptureError::NoDevice)?;
        self.backend.device_info(index).map_err(device_error)
    }

    fn open_input(
        &self,
        params: &CaptureDeviceParams,
        frames_desired: u32,
    ) -> CaptureResult<(Box<dyn BlockingInput>, u16, u32)> {
        let device = self.resolve_device(params.device_index)?;

        let num_channels = params
            .num_input_channels
            .filter(|c| *c > 0)
            .unwrap_or(device.max_input_channels);
        if num_channels == 0 {
            return Err(CaptureError::NoInputChannels(device.index));
        }
        let sample_rate = params
            .sample_rate
            .filter(|r| *r > 0)
            .unwrap_or(device.default_sample_rate);
        if sample_rate == 0 {
            return Err(CaptureError::InvalidSampleRate(device.index));
        }

        let config = InputStreamConfig {
            device_index: device.index,
            channels: num_channels,
            sample_rate,
            frames_per_buffer: frames_desired,
            suggested_latency: device.default_low_input_latency,
        };
        debug!("Opening input stream on '{}': {:?}", device.name, config);

        let input = self.backend.open_input(&config)?;
        Ok((input, num_channels, sample_rate))
    }
}

impl AudioCaptureStream for BlockingCaptureStream {
    fn register_user(&mut self, user_id: &str) -> bool {
        self.users.insert(user_id.to_string());
        true
    }

    fn unregister_user(&mut self, user_id: &str) -> bool {
        self.users.remove(user_id);
        true
    }

    fn capture_device_info(&self, device_index: Option<usize>) -> CaptureResult<CaptureDeviceInfo> {
        let device = self.resolve_device(device_index)?;
        if device.max_input_channels == 0 {
            return Err(CaptureError::NoInputChannels(device.index));
        }
        Ok(CaptureDeviceInfo::from(&device))
    }

    fn input_devices_available(&self) -> CaptureResult<Vec<CaptureDeviceInfo>> {
        let devices = self.backend.devices().map_err(|e| {
            error!("Failed to enumerate devices: {}", e);
            CaptureError::Backend(e)
        })?;

        let inputs: Vec<CaptureDeviceInfo> = devices
            .iter()
            .filter(|d| d.max_input_channels > 0)
            .map(CaptureDeviceInfo::from)
            .collect();

        if inputs.is_empty() {
            return Err(CaptureError::NoInputDevices);
        }
        Ok(inputs)
    }

    fn open_stream(
        &mut self,
        params: &CaptureDeviceParams,
        on_capture: OnCaptureFn,
        frames_desired: u32,
    ) -> CaptureResult<()> {
        if self.stream_open {
            warn!("Capture stream already open");
            return Err(CaptureError::AlreadyOpen);
        }

        let (input, num_channels, sample_rate) = self
            .open_input(params, frames_desired)
            .map_err(|e| {
                error!("Failed to open capture stream: {}", e);
                e
            })?;

        self.input = Some(input);
        self.on_capture = Some(on_capture);
        self.num_channels = num_channels;
        self.sample_rate = sample_rate;
        self.stream_open = true;

        info!(
            "Capture stream opened with {} channels at {} Hz",
            num_channels, sample_rate
        );
        Ok(())
    }

    fn close_stream(&mut self) -> CaptureResult<()> {
        if !self.stream_open {
            return Err(CaptureError::NotOpen);
        }

        // Capture must be stopped before the handle goes away
        match self.stop_stream() {
            Ok(()) | Err(CaptureError::NotCapturing) => {}
            Err(e) => warn!("Error stopping capture during close: {}", e),
        }

        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.close() {
                error!("Failed to close input stream: {}", e);
            }
        }
        self.on_capture = None;
        self.stream_open = false;
        info!("Capture stream closed");
        Ok(())
    }

    fn start_stream(&mut self) -> CaptureResult<()> {
        // Only the loop itself clears the flag while a worker is held
        if self.worker.is_some() && !self.capturing.load(Ordering::SeqCst) {
            debug!("Capture loop ended on its own, reaping worker");
            self.stop_stream()?;
        }
        if self.worker.is_some() {
            warn!("Capture stream already capturing");
            return Err(CaptureError::AlreadyCapturing);
        }
        let (Some(mut input), Some(on_capture)) = (self.input.take(), self.on_capture.take())
        else {
            warn!("Capture stream not open, cannot start");
            return Err(CaptureError::NotOpen);
        };

        if let Err(e) = input.start() {
            error!("Failed to start input stream: {}", e);
            self.input = Some(input);
            self.on_capture = Some(on_capture);
            return Err(e.into());
        }

        let started_at = Instant::now();
        let settings = LoopSettings {
            num_channels: self.num_channels,
            sample_rate: self.sample_rate,
            frames_per_read: self.frames_per_read,
            started_at,
        };
        self.capturing.store(true, Ordering::SeqCst);
        self.started_at = Some(started_at);

        let capturing = self.capturing.clone();
        let worker = CaptureWorker { input, on_capture };
        let spawned = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture_loop(worker, settings, &capturing));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("Capture started");
                Ok(())
            }
            Err(e) => {
                // The input handle went down with the closure
                error!("Failed to spawn capture thread: {}", e);
                self.capturing.store(false, Ordering::SeqCst);
                self.started_at = None;
                self.stream_open = false;
                Err(CaptureError::Thread(e.to_string()))
            }
        }
    }

    fn stop_stream(&mut self) -> CaptureResult<()> {
        let Some(handle) = self.worker.take() else {
            return Err(CaptureError::NotCapturing);
        };

        self.capturing.store(false, Ordering::SeqCst);
        self.started_at = None;

        let CaptureWorker {
            mut input,
            on_capture,
        } = match handle.join() {
            Ok(worker) => worker,
            Err(_) => {
                // The input handle was dropped while unwinding
                error!("Capture thread panicked; stream is no longer usable");
                self.stream_open = false;
                return Err(CaptureError::Thread("capture thread panicked".to_string()));
            }
        };

        if let Err(e) = input.stop() {
            error!("Failed to stop input stream: {}", e);
        }
        self.input = Some(input);
        self.on_capture = Some(on_capture);
        info!("Capture stopped");
        Ok(())
    }

    fn abort_stream(&mut self) -> CaptureResult<()> {
        self.stop_stream()
    }

    fn stream_time(&self) -> Option<f64> {
        if !self.capturing.load(Ordering::SeqCst) {
            return None;
        }
        self.started_at.map(|t| t.elapsed().as_secs_f64())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn num_channels(&self) -> u16 {
        self.num_channels
    }

    fn is_stream_open(&self) -> bool {
        self.stream_open
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

impl Drop for BlockingCaptureStream {
    fn drop(&mut self) {
        let _ = self.abort_stream();
        let _ = self.close_stream();
    }
}

/// Blocking read loop run on the capture thread
fn run_capture_loop(
    mut worker: CaptureWorker,
    settings: LoopSettings,
    capturing: &AtomicBool,
) -> CaptureWorker {
    let channels = settings.num_channels as usize;
    let mut buffer = vec![0.0f32; settings.frames_per_read * channels];
    let mut delivered: u64 = 0;

    debug!(
        "Capture loop running: {} frames x {} channels per read",
        settings.frames_per_read, channels
    );

    while capturing.load(Ordering::SeqCst) {
        let overflow = match worker.input.read(&mut buffer) {
            Ok(ReadStatus::Complete) => false,
            Ok(ReadStatus::Overflowed) => {
                // Delivered with the flag set rather than skipped
                warn!("Input overflow");
                true
            }
            Err(BackendError::Disconnected) => {
                error!("Input stream disconnected, capture loop exiting");
                capturing.store(false, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                warn!("Input read error: {}", e);
                thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };

        let capture = CaptureBuffer {
            samples: &buffer,
            num_frames: settings.frames_per_read,
            num_channels: settings.num_channels,
            sample_rate: settings.sample_rate,
            stream_time: settings.started_at.elapsed().as_secs_f64(),
            overflow,
        };
        (worker.on_capture)(&capture);
        delivered += 1;
    }

    debug!("Capture loop finished after {} buffers", delivered);
    worker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::synthetic::{synthetic_device, SyntheticBackend};

    fn noop() -> OnCaptureFn {
        Box::new(|_: &CaptureBuffer<'_>| {})
    }

    fn stream_with(backend: SyntheticBackend) -> BlockingCaptureStream {
        BlockingCaptureStream::new(Arc::new(backend.realtime(false)))
    }

    #[test]
    fn test_initial_state() {
        let stream = stream_with(SyntheticBackend::new());
        assert!(!stream.is_stream_open());
        assert!(!stream.is_capturing());
        assert_eq!(stream.sample_rate(), 0);
        assert_eq!(stream.stream_time(), None);
        assert_eq!(stream.frames_per_read(), DEFAULT_FRAMES_PER_READ);
    }

    #[test]
    fn test_input_devices_filtered_by_channels() {
        let stream = stream_with(SyntheticBackend::new());
        let devices = stream.input_devices_available().unwrap();

        let ids: Vec<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(devices[0].device_name, "Synthetic Microphone");
        assert_eq!(devices[1].input_channels, 2);
        assert!(devices.iter().all(|d| !d.supports_hardware_aec));
    }

    #[test]
    fn test_no_input_devices_is_error() {
        let backend = SyntheticBackend::with_devices(
            vec![synthetic_device(0, "Speakers", 0, 48000)],
            None,
        );
        let stream = stream_with(backend);
        assert!(matches!(
            stream.input_devices_available(),
            Err(CaptureError::NoInputDevices)
        ));
    }

    #[test]
    fn test_capture_device_info_defaults_to_default_input() {
        let stream = stream_with(SyntheticBackend::new());

        let info = stream.capture_device_info(None).unwrap();
        assert_eq!(info.device_id, "1");
        assert_eq!(info.preferred_sample_rate, 16000);

        let info = stream.capture_device_info(Some(2)).unwrap();
        assert_eq!(info.device_name, "Synthetic Stereo Line In");

        assert!(matches!(
            stream.capture_device_info(Some(0)),
            Err(CaptureError::NoInputChannels(0))
        ));
        assert!(matches!(
            stream.capture_device_info(Some(9)),
            Err(CaptureError::InvalidDevice(9))
        ));
    }

    #[test]
    fn test_open_uses_device_defaults() {
        let backend = Arc::new(SyntheticBackend::new().realtime(false));
        let mut stream = BlockingCaptureStream::new(backend.clone());

        stream
            .open_stream(&CaptureDeviceParams::default(), noop(), 512)
            .unwrap();

        assert!(stream.is_stream_open());
        assert_eq!(stream.sample_rate(), 16000);
        assert_eq!(stream.num_channels(), 1);

        let config = backend.last_config().unwrap();
        assert_eq!(config.device_index, 1);
        assert_eq!(config.frames_per_buffer, 512);
        assert_eq!(config.suggested_latency, Duration::from_millis(10));
    }

    #[test]
    fn test_open_uses_requested_params() {
        let mut stream = stream_with(SyntheticBackend::new());
        let params = CaptureDeviceParams {
            device_index: Some(2),
            num_input_channels: Some(1),
            sample_rate: Some(44100),
        };

        stream.open_stream(&params, noop(), 256).unwrap();
        assert_eq!(stream.sample_rate(), 44100);
        assert_eq!(stream.num_channels(), 1);
    }

    #[test]
    fn test_open_twice_fails() {
        let mut stream = stream_with(SyntheticBackend::new());
        stream
            .open_stream(&CaptureDeviceParams::default(), noop(), 256)
            .unwrap();
        assert!(matches!(
            stream.open_stream(&CaptureDeviceParams::default(), noop(), 256),
            Err(CaptureError::AlreadyOpen)
        ));
        assert!(stream.is_stream_open());
    }

    #[test]
    fn test_open_without_default_device() {
        let backend = SyntheticBackend::with_devices(
            vec![synthetic_device(0, "Line In", 2, 44100)],
            None,
        );
        let mut stream = stream_with(backend);
        assert!(matches!(
            stream.open_stream(&CaptureDeviceParams::default(), noop(), 256),
            Err(CaptureError::NoDevice)
        ));
        assert!(!stream.is_stream_open());
    }

    #[test]
    fn test_open_output_only_device_fails() {
        let mut stream = stream_with(SyntheticBackend::new());
        let params = CaptureDeviceParams {
            device_index: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            stream.open_stream(&params, noop(), 256),
            Err(CaptureError::NoInputChannels(0))
        ));
    }

    #[test]
    fn test_backend_open_failure_leaves_stream_closed() {
        let mut stream = stream_with(SyntheticBackend::new().fail_open());
        let result = stream.open_stream(&CaptureDeviceParams::default(), noop(), 256);
        assert!(matches!(
            result,
            Err(CaptureError::Backend(BackendError::Open(_)))
        ));
        assert!(!stream.is_stream_open());
        assert_eq!(stream.sample_rate(), 0);
    }

    #[test]
    fn test_open_zero_rate_device_fails() {
        let backend = SyntheticBackend::with_devices(
            vec![synthetic_device(0, "Broken Interface", 2, 0)],
            Some(0),
        );
        let mut stream = stream_with(backend);

        assert!(matches!(
            stream.open_stream(&CaptureDeviceParams::default(), noop(), 256),
            Err(CaptureError::InvalidSampleRate(0))
        ));
        assert!(!stream.is_stream_open());
        assert_eq!(stream.sample_rate(), 0);

        // An explicit rate still opens the device
        let params = CaptureDeviceParams {
            sample_rate: Some(48000),
            ..Default::default()
        };
        stream.open_stream(&params, noop(), 256).unwrap();
        assert_eq!(stream.sample_rate(), 48000);
    }

    #[test]
    fn test_users_are_tracked() {
        let mut stream = stream_with(SyntheticBackend::new());
        assert!(stream.register_user("voice-chat"));
        assert!(stream.register_user("recorder"));
        assert!(stream.unregister_user("voice-chat"));
        assert!(stream.unregister_user("never-registered"));

        let users: Vec<&str> = stream.registered_users().collect();
        assert_eq!(users, vec!["recorder"]);
    }
}
