//! cpal input backend
//!
//! cpal delivers input through a callback. The callback pushes samples into a
//! lock-free ring buffer and `read` drains it from the capture thread, which
//! gives the capture stream the blocking read it expects.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedBufferSize};
use ringbuf::traits::{Consumer as ConsumerTrait, Observer, Producer as ProducerTrait, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{
    BackendDeviceInfo, BackendError, BlockingInput, InputBackend, InputStreamConfig, ReadStatus,
};

/// How long `read` waits for input before giving up
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Sleep between ring buffer polls while a read is pending
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Calculate ring buffer capacity (in samples) for a stream
pub fn ring_buffer_capacity(sample_rate: u32, channels: u16) -> usize {
    const BUFFER_DURATION_SECONDS: usize = 2;
    sample_rate as usize * BUFFER_DURATION_SECONDS * channels as usize
}

/// Input backend on the platform's default cpal host
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn device_by_index(index: usize) -> Result<Device, BackendError> {
    cpal::default_host()
        .devices()
        .map_err(|e| BackendError::Host(e.to_string()))?
        .nth(index)
        .ok_or(BackendError::InvalidDevice(index))
}

fn describe_device(index: usize, device: &Device) -> BackendDeviceInfo {
    let name = device.name().unwrap_or_else(|_| format!("Device {}", index));

    let max_input_channels = device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);

    let (default_sample_rate, default_low_input_latency) = match device.default_input_config() {
        Ok(config) => {
            let rate = config.sample_rate().0;
            let latency = match config.buffer_size() {
                SupportedBufferSize::Range { min, .. } if rate > 0 => {
                    Duration::from_secs_f64(*min as f64 / rate as f64)
                }
                _ => Duration::ZERO,
            };
            (rate, latency)
        }
        Err(_) => (0, Duration::ZERO),
    };

    BackendDeviceInfo {
        index,
        name,
        max_input_channels,
        default_sample_rate,
        default_low_input_latency,
    }
}

impl InputBackend for CpalBackend {
    fn devices(&self) -> Result<Vec<BackendDeviceInfo>, BackendError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| BackendError::Host(e.to_string()))?;

        Ok(devices
            .enumerate()
            .map(|(index, device)| describe_device(index, &device))
            .collect())
    }

    fn default_input_device(&self) -> Option<usize> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok())?;

        let mut devices = host.devices().ok()?;
        devices.position(|d| d.name().map(|n| n == default_name).unwrap_or(false))
    }

    fn device_info(&self, index: usize) -> Result<BackendDeviceInfo, BackendError> {
        let device = device_by_index(index)?;
        Ok(describe_device(index, &device))
    }

    fn open_input(
        &self,
        config: &InputStreamConfig,
    ) -> Result<Box<dyn BlockingInput>, BackendError> {
        CpalInput::open(config.clone()).map(|input| Box::new(input) as Box<dyn BlockingInput>)
    }
}

type Reply = mpsc::Sender<Result<(), BackendError>>;

/// Commands sent to the thread that owns the cpal stream
enum StreamCommand {
    Play(Reply),
    Pause(Reply),
    Close,
}

/// Blocking input handle over a cpal stream
///
/// `cpal::Stream` is not `Send` on every platform, so it lives on a dedicated
/// owner thread and this handle only holds the ring buffer consumer and a
/// command channel.
pub struct CpalInput {
    consumer: HeapCons<f32>,
    command_tx: mpsc::Sender<StreamCommand>,
    owner: Option<JoinHandle<()>>,
    overflowed: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
}

impl CpalInput {
    fn open(config: InputStreamConfig) -> Result<Self, BackendError> {
        let capacity = ring_buffer_capacity(config.sample_rate, config.channels);
        if capacity == 0 {
            return Err(BackendError::Open(format!(
                "cannot buffer {} channels at {} Hz",
                config.channels, config.sample_rate
            )));
        }
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        debug!(
            "Ring buffer capacity: {} samples ({} channels)",
            capacity, config.channels
        );

        let overflowed = Arc::new(AtomicBool::new(false));
        let disconnected = Arc::new(AtomicBool::new(false));
        let overflow_clone = overflowed.clone();
        let disconnected_clone = disconnected.clone();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        let owner = thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || {
                let stream = match build_stream(
                    &config,
                    producer,
                    overflow_clone,
                    disconnected_clone,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_owner(stream, command_rx);
            })
            .map_err(|e| BackendError::Open(e.to_string()))?;

        let ready = ready_rx.recv().map_err(|_| BackendError::Disconnected)?;
        if let Err(e) = ready {
            let _ = owner.join();
            return Err(e);
        }

        Ok(Self {
            consumer,
            command_tx,
            owner: Some(owner),
            overflowed,
            disconnected,
        })
    }

    fn round_trip(
        &self,
        command: impl FnOnce(Reply) -> StreamCommand,
    ) -> Result<(), BackendError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.command_tx
            .send(command(reply_tx))
            .map_err(|_| BackendError::Disconnected)?;
        reply_rx.recv().map_err(|_| BackendError::Disconnected)?
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
            || self.owner.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl BlockingInput for CpalInput {
    fn start(&mut self) -> Result<(), BackendError> {
        self.round_trip(StreamCommand::Play)
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.round_trip(StreamCommand::Pause)?;
        // Drop whatever arrived after the last read so a restart begins fresh
        let stale = self.consumer.occupied_len();
        self.consumer.skip(stale);
        Ok(())
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<ReadStatus, BackendError> {
        let deadline = Instant::now() + READ_TIMEOUT;
        let mut filled = 0;

        loop {
            filled += self.consumer.pop_slice(&mut buf[filled..]);
            if filled == buf.len() {
                break;
            }
            if self.is_disconnected() {
                return Err(BackendError::Disconnected);
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
        }

        if self.overflowed.swap(false, Ordering::Relaxed) {
            Ok(ReadStatus::Overflowed)
        } else {
            Ok(ReadStatus::Complete)
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        let Some(owner) = self.owner.take() else {
            return Ok(());
        };
        let _ = self.command_tx.send(StreamCommand::Close);
        owner
            .join()
            .map_err(|_| BackendError::Stream("cpal owner thread panicked".to_string()))
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close cpal input: {}", e);
        }
    }
}

fn run_owner(stream: Stream, command_rx: mpsc::Receiver<StreamCommand>) {
    while let Ok(command) = command_rx.recv() {
        match command {
            StreamCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| BackendError::Stream(e.to_string()));
                let _ = reply.send(result);
            }
            StreamCommand::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| BackendError::Stream(e.to_string()));
                let _ = reply.send(result);
            }
            StreamCommand::Close => break,
        }
    }
    debug!("cpal input stream dropped");
}

/// Pick a fixed host buffer size when the device supports it
fn buffer_size_for(requested: u32, supported: &SupportedBufferSize) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if requested >= *min && requested <= *max => {
            BufferSize::Fixed(requested)
        }
        _ => {
            if requested > 0 {
                debug!(
                    "Buffer size {} frames not supported ({:?}), using device default",
                    requested, supported
                );
            }
            BufferSize::Default
        }
    }
}

fn build_stream(
    config: &InputStreamConfig,
    mut producer: HeapProd<f32>,
    overflowed: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
) -> Result<Stream, BackendError> {
    let device = device_by_index(config.device_index)?;
    let supported = device
        .default_input_config()
        .map_err(|e| BackendError::Open(e.to_string()))?;
    let sample_format = supported.sample_format();

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: buffer_size_for(config.frames_per_buffer, supported.buffer_size()),
    };

    info!(
        "Building input stream: {} Hz, {} channels, format {:?}, buffer {:?}",
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format,
        stream_config.buffer_size
    );

    let error_callback = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            disconnected.store(true, Ordering::Relaxed);
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| handle_input_f32(data, &mut producer, &overflowed),
            error_callback,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| handle_input_i16(data, &mut producer, &overflowed),
            error_callback,
            None,
        ),
        SampleFormat::U8 => device.build_input_stream(
            &stream_config,
            move |data: &[u8], _| handle_input_u8(data, &mut producer, &overflowed),
            error_callback,
            None,
        ),
        other => {
            return Err(BackendError::Open(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| BackendError::Open(e.to_string()))
}

/// Handle f32 input samples
fn handle_input_f32(data: &[f32], producer: &mut HeapProd<f32>, overflowed: &AtomicBool) {
    let pushed = producer.push_slice(data);
    if pushed < data.len() {
        overflowed.store(true, Ordering::Relaxed);
    }
}

/// Handle i16 input samples (convert to f32)
fn handle_input_i16(data: &[i16], producer: &mut HeapProd<f32>, overflowed: &AtomicBool) {
    for &sample in data {
        if producer.try_push(sample as f32 / 32768.0).is_err() {
            overflowed.store(true, Ordering::Relaxed);
            break;
        }
    }
}

/// Handle u8 input samples (convert to f32)
fn handle_input_u8(data: &[u8], producer: &mut HeapProd<f32>, overflowed: &AtomicBool) {
    for &sample in data {
        // u8 is unsigned: 0-255, with 128 as center
        if producer.try_push((sample as f32 - 128.0) / 128.0).is_err() {
            overflowed.store(true, Ordering::Relaxed);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_capacity() {
        assert_eq!(ring_buffer_capacity(48000, 1), 96_000);
        assert_eq!(ring_buffer_capacity(44100, 2), 176_400);
        assert_eq!(ring_buffer_capacity(16000, 1), 32_000);
        assert_eq!(ring_buffer_capacity(0, 2), 0);
    }

    #[test]
    fn test_open_rejects_zero_sample_rate() {
        let config = InputStreamConfig {
            device_index: 0,
            channels: 2,
            sample_rate: 0,
            frames_per_buffer: 256,
            suggested_latency: Duration::ZERO,
        };
        assert!(matches!(
            CpalInput::open(config),
            Err(BackendError::Open(_))
        ));
    }

    #[test]
    fn test_buffer_size_selection() {
        let range = SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(buffer_size_for(256, &range), BufferSize::Fixed(256));
        assert_eq!(buffer_size_for(8192, &range), BufferSize::Default);
        assert_eq!(buffer_size_for(0, &range), BufferSize::Default);
        assert_eq!(
            buffer_size_for(256, &SupportedBufferSize::Unknown),
            BufferSize::Default
        );
    }

    #[test]
    fn test_overflow_flag_set_when_ring_full() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(4).split();
        let overflowed = AtomicBool::new(false);

        handle_input_f32(&[0.1, 0.2, 0.3], &mut producer, &overflowed);
        assert!(!overflowed.load(Ordering::Relaxed));

        handle_input_i16(&[16384, -16384], &mut producer, &overflowed);
        assert!(overflowed.load(Ordering::Relaxed));

        let mut out = [0.0f32; 4];
        assert_eq!(consumer.pop_slice(&mut out), 4);
        assert_eq!(out[3], 0.5);
    }

    #[test]
    fn test_u8_conversion_centered() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(8).split();
        let overflowed = AtomicBool::new(false);

        handle_input_u8(&[128, 0, 255], &mut producer, &overflowed);

        let mut out = [0.0f32; 3];
        assert_eq!(consumer.pop_slice(&mut out), 3);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert!((out[2] - 0.9921875).abs() < 1e-6);
    }

    #[test]
    fn test_list_devices() {
        // This test just checks that enumeration doesn't panic
        // Actual devices depend on the system
        let backend = CpalBackend::new();
        if let Ok(devices) = backend.devices() {
            println!("Found {} devices", devices.len());
        }
    }
}
