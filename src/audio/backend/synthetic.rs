//! Synthetic input backend
//!
//! Generates a sine tone instead of talking to audio hardware. Used by the
//! `--synthetic` CLI mode and by tests, which can also script overflows,
//! disconnects and failures to open, start or close.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{
    BackendDeviceInfo, BackendError, BlockingInput, InputBackend, InputStreamConfig, ReadStatus,
};

const TONE_AMPLITUDE: f32 = 0.5;

/// Counters for every call the capture stream makes into the backend
#[derive(Debug, Default)]
pub struct SyntheticStats {
    pub initialized: AtomicUsize,
    pub terminated: AtomicUsize,
    pub opened: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub closed: AtomicUsize,
    pub reads: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    fail_open: bool,
    failed_starts: usize,
    fail_close: bool,
    overflow_every: Option<usize>,
    disconnect_after: Option<usize>,
}

pub struct SyntheticBackend {
    devices: Vec<BackendDeviceInfo>,
    default_device: Option<usize>,
    tone_hz: f32,
    realtime: bool,
    faults: Faults,
    stats: Arc<SyntheticStats>,
    last_config: Mutex<Option<InputStreamConfig>>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    /// An output-only device, a mono microphone (default) and a stereo line in
    pub fn new() -> Self {
        let devices = vec![
            synthetic_device(0, "Synthetic Output", 0, 48000),
            synthetic_device(1, "Synthetic Microphone", 1, 16000),
            synthetic_device(2, "Synthetic Stereo Line In", 2, 48000),
        ];
        Self::with_devices(devices, Some(1))
    }

    pub fn with_devices(devices: Vec<BackendDeviceInfo>, default_device: Option<usize>) -> Self {
        Self {
            devices,
            default_device,
            tone_hz: 440.0,
            realtime: true,
            faults: Faults::default(),
            stats: Arc::new(SyntheticStats::default()),
            last_config: Mutex::new(None),
        }
    }

    /// Pace reads to the stream's sample rate (on by default)
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn tone(mut self, hz: f32) -> Self {
        self.tone_hz = hz;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.faults.fail_open = true;
        self
    }

    /// Fail the first `n` calls to `start` on each opened input
    pub fn fail_first_starts(mut self, n: usize) -> Self {
        self.faults.failed_starts = n;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.faults.fail_close = true;
        self
    }

    /// Report an overflow on every `n`-th read
    pub fn overflow_every(mut self, n: usize) -> Self {
        self.faults.overflow_every = Some(n.max(1));
        self
    }

    /// Fail reads with `Disconnected` once `reads` reads have completed
    pub fn disconnect_after(mut self, reads: usize) -> Self {
        self.faults.disconnect_after = Some(reads);
        self
    }

    pub fn stats(&self) -> Arc<SyntheticStats> {
        self.stats.clone()
    }

    /// Config of the most recently opened stream
    pub fn last_config(&self) -> Option<InputStreamConfig> {
        self.last_config.lock().ok().and_then(|c| c.clone())
    }
}

/// Build a device entry for a synthetic device list
pub fn synthetic_device(
    index: usize,
    name: &str,
    max_input_channels: u16,
    default_sample_rate: u32,
) -> BackendDeviceInfo {
    BackendDeviceInfo {
        index,
        name: name.to_string(),
        max_input_channels,
        default_sample_rate,
        default_low_input_latency: Duration::from_millis(10),
    }
}

impl InputBackend for SyntheticBackend {
    fn initialize(&self) -> Result<(), BackendError> {
        self.stats.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) -> Result<(), BackendError> {
        self.stats.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn devices(&self) -> Result<Vec<BackendDeviceInfo>, BackendError> {
        Ok(self.devices.clone())
    }

    fn default_input_device(&self) -> Option<usize> {
        self.default_device
    }

    fn open_input(
        &self,
        config: &InputStreamConfig,
    ) -> Result<Box<dyn BlockingInput>, BackendError> {
        if self.faults.fail_open {
            return Err(BackendError::Open("synthetic open failure".to_string()));
        }
        let device = self.device_info(config.device_index)?;
        if config.channels > device.max_input_channels {
            return Err(BackendError::Open(format!(
                "{} channels requested, device supports {}",
                config.channels, device.max_input_channels
            )));
        }

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_config.lock() {
            *last = Some(config.clone());
        }

        Ok(Box::new(SyntheticInput {
            config: config.clone(),
            tone_hz: self.tone_hz,
            realtime: self.realtime,
            faults: self.faults,
            stats: self.stats.clone(),
            started: false,
            start_attempts: 0,
            frame: 0,
            reads: 0,
        }))
    }
}

struct SyntheticInput {
    config: InputStreamConfig,
    tone_hz: f32,
    realtime: bool,
    faults: Faults,
    stats: Arc<SyntheticStats>,
    started: bool,
    start_attempts: usize,
    frame: u64,
    reads: usize,
}

impl BlockingInput for SyntheticInput {
    fn start(&mut self) -> Result<(), BackendError> {
        self.start_attempts += 1;
        if self.start_attempts <= self.faults.failed_starts {
            return Err(BackendError::Stream("synthetic start failure".to_string()));
        }
        self.started = true;
        self.stats.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.started = false;
        self.stats.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<ReadStatus, BackendError> {
        if !self.started {
            return Err(BackendError::Stream("stream not started".to_string()));
        }
        if self.faults.disconnect_after.is_some_and(|n| self.reads >= n) {
            return Err(BackendError::Disconnected);
        }

        let channels = self.config.channels.max(1) as usize;
        let rate = self.config.sample_rate.max(1) as f32;
        for frame in buf.chunks_mut(channels) {
            let t = self.frame as f32 / rate;
            let sample = (TAU * self.tone_hz * t).sin() * TONE_AMPLITUDE;
            frame.fill(sample);
            self.frame += 1;
        }

        if self.realtime {
            let frames = buf.len() / channels;
            thread::sleep(Duration::from_secs_f64(frames as f64 / rate as f64));
        }

        self.reads += 1;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);

        match self.faults.overflow_every {
            Some(n) if self.reads % n == 0 => Ok(ReadStatus::Overflowed),
            _ => Ok(ReadStatus::Complete),
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_close {
            return Err(BackendError::Stream("synthetic close failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_default(backend: &SyntheticBackend, channels: u16) -> Box<dyn BlockingInput> {
        backend
            .open_input(&InputStreamConfig {
                device_index: 2,
                channels,
                sample_rate: 48000,
                frames_per_buffer: 256,
                suggested_latency: Duration::from_millis(10),
            })
            .expect("open should succeed")
    }

    #[test]
    fn test_read_requires_start() {
        let backend = SyntheticBackend::new().realtime(false);
        let mut input = open_default(&backend, 1);
        let mut buf = vec![0.0f32; 64];
        assert!(input.read(&mut buf).is_err());

        input.start().unwrap();
        assert_eq!(input.read(&mut buf).unwrap(), ReadStatus::Complete);
    }

    #[test]
    fn test_frames_are_interleaved_copies() {
        let backend = SyntheticBackend::new().realtime(false).tone(1000.0);
        let mut input = open_default(&backend, 2);
        input.start().unwrap();

        let mut buf = vec![0.0f32; 2 * 32];
        input.read(&mut buf).unwrap();

        for frame in buf.chunks(2) {
            assert_eq!(frame[0], frame[1]);
            assert!(frame[0].abs() <= TONE_AMPLITUDE);
        }
        assert!(buf.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_rejects_too_many_channels() {
        let backend = SyntheticBackend::new();
        let result = backend.open_input(&InputStreamConfig {
            device_index: 1,
            channels: 2,
            sample_rate: 16000,
            frames_per_buffer: 256,
            suggested_latency: Duration::ZERO,
        });
        assert!(matches!(result, Err(BackendError::Open(_))));
    }

    #[test]
    fn test_scripted_faults() {
        let backend = SyntheticBackend::new()
            .realtime(false)
            .overflow_every(2)
            .disconnect_after(3);
        let mut input = open_default(&backend, 1);
        input.start().unwrap();
        let mut buf = vec![0.0f32; 16];

        assert_eq!(input.read(&mut buf).unwrap(), ReadStatus::Complete);
        assert_eq!(input.read(&mut buf).unwrap(), ReadStatus::Overflowed);
        assert_eq!(input.read(&mut buf).unwrap(), ReadStatus::Complete);
        assert!(matches!(input.read(&mut buf), Err(BackendError::Disconnected)));
    }

    #[test]
    fn test_scripted_start_and_close_failures() {
        let backend = SyntheticBackend::new()
            .realtime(false)
            .fail_first_starts(1)
            .fail_close();
        let stats = backend.stats();
        let mut input = open_default(&backend, 1);

        assert!(matches!(input.start(), Err(BackendError::Stream(_))));
        assert_eq!(stats.started.load(Ordering::SeqCst), 0);
        input.start().unwrap();
        assert_eq!(stats.started.load(Ordering::SeqCst), 1);

        assert!(matches!(input.close(), Err(BackendError::Stream(_))));
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    }
}
