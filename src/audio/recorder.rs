use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::host::CaptureBuffer;

type Writer = WavWriter<BufWriter<File>>;

/// Summary of a finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub overflows: u64,
    pub duration_secs: f64,
}

/// Writes captured buffers to a 32-bit float WAV file
pub struct WavRecorder {
    path: PathBuf,
    sample_rate: u32,
    writer: Writer,
    frames: u64,
    overflows: u64,
}

impl WavRecorder {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file {:?}", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            sample_rate,
            writer,
            frames: 0,
            overflows: 0,
        })
    }

    /// Append one captured buffer
    pub fn write(&mut self, capture: &CaptureBuffer<'_>) -> Result<()> {
        if capture.overflow {
            self.overflows += 1;
        }
        for &sample in capture.samples {
            self.writer
                .write_sample(sample)
                .context("Failed to write sample")?;
        }
        self.frames += capture.num_frames as u64;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Flush the WAV header and close the file
    pub fn finalize(self) -> Result<RecordingSummary> {
        self.writer
            .finalize()
            .context("Failed to finalize WAV file")?;

        let duration_secs = self.frames as f64 / self.sample_rate.max(1) as f64;
        info!("Wrote {:.1}s of audio to {:?}", duration_secs, self.path);

        Ok(RecordingSummary {
            path: self.path,
            frames: self.frames,
            overflows: self.overflows,
            duration_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn buffer(samples: &[f32], channels: u16, overflow: bool) -> CaptureBuffer<'_> {
        CaptureBuffer {
            samples,
            num_frames: samples.len() / channels as usize,
            num_channels: channels,
            sample_rate: 8000,
            stream_time: 0.0,
            overflow,
        }
    }

    #[test]
    fn test_writes_float_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.wav");
        let mut recorder = WavRecorder::create(&path, 8000, 2).unwrap();

        let samples = [0.25f32, -0.25, 0.5, -0.5];
        recorder.write(&buffer(&samples, 2, false)).unwrap();
        recorder.write(&buffer(&samples, 2, true)).unwrap();

        let summary = recorder.finalize().unwrap();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.overflows, 1);
        assert!((summary.duration_secs - 0.0005).abs() < 1e-9);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        let read: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(read.len(), 8);
        assert_eq!(read[2], 0.5);
    }

    #[test]
    fn test_counts_before_finalize() {
        let dir = tempdir().unwrap();
        let mut recorder = WavRecorder::create(&dir.path().join("mono.wav"), 8000, 1).unwrap();
        assert_eq!(recorder.frames(), 0);

        recorder.write(&buffer(&[0.1, 0.2, 0.3], 1, true)).unwrap();
        assert_eq!(recorder.frames(), 3);
        assert_eq!(recorder.overflows(), 1);

        let summary = recorder.finalize().unwrap();
        assert_eq!(summary.frames, 3);
        assert!(summary.path.ends_with("mono.wav"));
    }
}
