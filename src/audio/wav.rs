//! PCM16 WAV writer

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{AudioFormat, AudioSink};
use crate::error::{RecorderError, RecorderResult};

pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    samples: u64,
}

impl WavSink {
    pub fn create(path: &Path, format: AudioFormat) -> RecorderResult<Self> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(|e| RecorderError::WriterOpenError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            samples: 0,
        })
    }

    fn write_error(&self, e: hound::Error) -> RecorderError {
        RecorderError::SinkWriteError {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

impl AudioSink for WavSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_chunks(&mut self, chunks: &[Vec<i16>]) -> RecorderResult<()> {
        for chunk in chunks {
            for &sample in chunk {
                if let Err(e) = self.writer.write_sample(sample) {
                    return Err(self.write_error(e));
                }
            }
            self.samples += chunk.len() as u64;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> RecorderResult<()> {
        let WavSink {
            writer,
            path,
            samples,
        } = *self;
        writer
            .finalize()
            .map_err(|e| RecorderError::SinkWriteError {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        info!("Audio file written: {:?} ({} samples)", path, samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        let format = AudioFormat {
            channels: 2,
            sample_rate: 44_100,
            chunk_frames: 2,
        };

        let mut sink = Box::new(WavSink::create(&path, format).unwrap());
        sink.write_chunks(&[vec![1, 2, 3, 4], vec![5, 6, 7, 8]]).unwrap();
        sink.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("audio.wav");
        assert!(matches!(
            WavSink::create(&path, AudioFormat::default()),
            Err(RecorderError::WriterOpenError { .. })
        ));
    }
}
