use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use capture_adapter::audio::backend::InputBackend;
use capture_adapter::audio::{CpalBackend, SyntheticBackend, WavRecorder};
use capture_adapter::host::{ModularFeatures, AUDIO_CAPTURE_FACTORY_FEATURE};
use capture_adapter::{
    AudioCaptureStream, CaptureBuffer, CaptureConfig, CaptureModule, OnCaptureFn,
};

/// Capture audio from an input device through a blocking read loop
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input device index (run with --list-devices)
    #[arg(short, long)]
    device: Option<usize>,

    /// Number of input channels (defaults to the device maximum)
    #[arg(short, long)]
    channels: Option<u16>,

    /// Sample rate in Hz (defaults to the device rate)
    #[arg(short = 'r', long)]
    sample_rate: Option<u32>,

    /// Host buffer size in frames
    #[arg(long)]
    frames_per_buffer: Option<u32>,

    /// Frames delivered per capture callback
    #[arg(long)]
    frames_per_read: Option<usize>,

    /// Stop after this many seconds (default: until Ctrl+C)
    #[arg(short = 't', long)]
    duration: Option<f64>,

    /// Write captured audio to this WAV file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file (default: ~/.capture-adapter/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save the effective settings back to the config file
    #[arg(long)]
    save_config: bool,

    /// Use a synthetic tone generator instead of audio hardware
    #[arg(long)]
    synthetic: bool,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// One captured buffer forwarded from the capture thread
struct Chunk {
    samples: Vec<f32>,
    stream_time: f64,
    overflow: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => CaptureConfig::default_config_path()?,
    };
    let config = apply_overrides(CaptureConfig::load(&config_path)?, &args);
    debug!("Effective config: {:?}", config);

    if args.save_config {
        config.save(&config_path)?;
        info!("Saved config to {:?}", config_path);
    }

    let backend: Arc<dyn InputBackend> = if args.synthetic {
        Arc::new(SyntheticBackend::new())
    } else {
        Arc::new(CpalBackend::new())
    };

    let registry = ModularFeatures::new();
    let mut module = CaptureModule::new(backend).with_frames_per_read(config.frames_per_read);
    module.startup(&registry);

    let result = match registry.first(AUDIO_CAPTURE_FACTORY_FEATURE) {
        Some(factory) => match factory.create_stream() {
            Some(stream) if args.list_devices => {
                list_devices(&*stream);
                Ok(())
            }
            Some(stream) => run_capture(stream, &config, &args).await,
            None => Err(anyhow::anyhow!("Capture factory did not create a stream")),
        },
        None => Err(anyhow::anyhow!("No capture factory registered")),
    };

    module.shutdown(&registry);
    result
}

fn apply_overrides(mut config: CaptureConfig, args: &Args) -> CaptureConfig {
    if args.device.is_some() {
        config.device_index = args.device;
    }
    if args.channels.is_some() {
        config.num_input_channels = args.channels;
    }
    if args.sample_rate.is_some() {
        config.sample_rate = args.sample_rate;
    }
    if let Some(frames) = args.frames_per_buffer {
        config.frames_per_buffer = frames;
    }
    if let Some(frames) = args.frames_per_read {
        config.frames_per_read = frames;
    }
    config
}

fn list_devices(stream: &dyn AudioCaptureStream) {
    println!("Available input devices:\n");

    let default_id = stream.capture_device_info(None).ok().map(|d| d.device_id);

    match stream.input_devices_available() {
        Ok(devices) => {
            for device in devices {
                let default_marker = if Some(&device.device_id) == default_id.as_ref() {
                    " (default)"
                } else {
                    ""
                };
                println!(
                    "  [{}] {} - {} ch, {} Hz{}",
                    device.device_id,
                    device.device_name,
                    device.input_channels,
                    device.preferred_sample_rate,
                    default_marker
                );
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("  No input devices found.");
        }
    }
}

async fn run_capture(
    mut stream: Box<dyn AudioCaptureStream>,
    config: &CaptureConfig,
    args: &Args,
) -> Result<()> {
    let duration = capture_duration(args.duration)?;

    let (tx, mut rx) = mpsc::channel::<Chunk>(64);
    let on_capture: OnCaptureFn = Box::new(move |capture: &CaptureBuffer<'_>| {
        let _ = tx.blocking_send(Chunk {
            samples: capture.samples.to_vec(),
            stream_time: capture.stream_time,
            overflow: capture.overflow,
        });
    });

    stream.register_user("capture-cli");
    stream
        .open_stream(&config.device_params(), on_capture, config.frames_per_buffer)
        .context("Failed to open capture stream")?;

    let sample_rate = stream.sample_rate();
    let channels = stream.num_channels();

    let mut recorder = match &args.output {
        Some(path) => {
            // Relative paths land in the configured output directory, if any
            let path = match config.output_dir {
                Some(_) if path.is_relative() => config.get_output_dir()?.join(path),
                _ => path.clone(),
            };
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
            Some(WavRecorder::create(&path, sample_rate, channels)?)
        }
        None => None,
    };

    stream.start_stream().context("Failed to start capture")?;
    println!(
        "\nCapturing {} ch at {} Hz... Press Ctrl+C to stop.\n",
        channels, sample_rate
    );

    let deadline = async {
        match duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut meter = LevelMeter::default();
    let mut last_report = 0.0f64;

    loop {
        tokio::select! {
            chunk = rx.recv() => {
                let Some(chunk) = chunk else { break };
                handle_chunk(&chunk, channels, sample_rate, recorder.as_mut(), &mut meter);

                let elapsed = chunk.stream_time;
                if elapsed - last_report >= 1.0 {
                    info!("{:.1}s captured, peak {:.3}", elapsed, meter.take_peak());
                    last_report = elapsed;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping...");
                break;
            }
            _ = &mut deadline => {
                info!("Capture duration reached");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if !stream.is_capturing() {
                    warn!("Capture ended unexpectedly");
                    break;
                }
            }
        }
    }

    // The capture thread may be parked in blocking_send; keep draining while it joins
    let drain = tokio::task::spawn_blocking(move || {
        let result = stream.stop_stream();
        (stream, result)
    });
    let mut drained = Vec::new();
    tokio::pin!(drain);
    let (mut stream, stop_result) = loop {
        tokio::select! {
            joined = &mut drain => break joined.context("Capture stop task failed")?,
            Some(chunk) = rx.recv() => drained.push(chunk),
        }
    };
    if let Err(e) = stop_result {
        warn!("Stop reported: {}", e);
    }
    while let Ok(chunk) = rx.try_recv() {
        drained.push(chunk);
    }
    for chunk in &drained {
        handle_chunk(chunk, channels, sample_rate, recorder.as_mut(), &mut meter);
    }

    stream.close_stream().context("Failed to close capture stream")?;
    stream.unregister_user("capture-cli");

    println!("\n--- Capture Summary ---");
    println!("Buffers: {}", meter.buffers);
    println!("Frames: {}", meter.frames);
    println!("Overflows: {}", meter.overflows);

    if let Some(recorder) = recorder {
        let summary = recorder.finalize()?;
        println!(
            "Wrote {:.1}s to {}",
            summary.duration_secs,
            summary.path.display()
        );
    }

    Ok(())
}

fn capture_duration(secs: Option<f64>) -> Result<Option<Duration>> {
    secs.map(|secs| {
        Duration::try_from_secs_f64(secs)
            .with_context(|| format!("Invalid capture duration: {} seconds", secs))
    })
    .transpose()
}

fn handle_chunk(
    chunk: &Chunk,
    channels: u16,
    sample_rate: u32,
    recorder: Option<&mut WavRecorder>,
    meter: &mut LevelMeter,
) {
    let num_frames = chunk.samples.len() / channels.max(1) as usize;
    let capture = CaptureBuffer {
        samples: &chunk.samples,
        num_frames,
        num_channels: channels,
        sample_rate,
        stream_time: chunk.stream_time,
        overflow: chunk.overflow,
    };

    meter.update(&capture);
    if let Some(recorder) = recorder {
        if let Err(e) = recorder.write(&capture) {
            error!("Failed to record audio: {:#}", e);
        }
    }
}

/// Running totals and peak level for status output
#[derive(Debug, Default)]
struct LevelMeter {
    buffers: u64,
    frames: u64,
    overflows: u64,
    peak: f32,
}

impl LevelMeter {
    fn update(&mut self, capture: &CaptureBuffer<'_>) {
        self.buffers += 1;
        self.frames += capture.num_frames as u64;
        if capture.overflow {
            self.overflows += 1;
        }
        let peak = capture.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        self.peak = self.peak.max(peak);
    }

    fn take_peak(&mut self) -> f32 {
        std::mem::take(&mut self.peak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_duration() {
        assert_eq!(capture_duration(None).unwrap(), None);
        assert_eq!(
            capture_duration(Some(2.5)).unwrap(),
            Some(Duration::from_millis(2500))
        );
        assert!(capture_duration(Some(f64::INFINITY)).is_err());
        assert!(capture_duration(Some(1e30)).is_err());
        assert!(capture_duration(Some(-1.0)).is_err());
    }
}
