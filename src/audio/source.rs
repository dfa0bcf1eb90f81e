//! cpal-backed microphone source
//!
//! cpal delivers samples on its own callback thread. The callback converts
//! them to PCM16 and forwards them over a channel; [`CpalAudioSource`]
//! reassembles fixed-size chunks on the capture loop thread. cpal streams are
//! `!Send`, so the source must be opened on the thread that reads it.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::device::find_input_device;
use super::{AudioFormat, AudioSource};
use crate::error::{RecorderError, RecorderResult};

enum Packet {
    Samples(Vec<i16>),
    Failed(String),
}

pub struct CpalAudioSource {
    stream: Option<cpal::Stream>,
    rx: Receiver<Packet>,
    pending: Vec<i16>,
    failure: Option<String>,
    format: AudioFormat,
}

impl CpalAudioSource {
    /// Open `device_id` as close to `preferred` as the device allows
    pub fn open(device_id: &str, preferred: AudioFormat) -> RecorderResult<Self> {
        let device = find_input_device(device_id)
            .ok_or_else(|| RecorderError::DeviceUnavailable(device_id.to_string()))?;

        let supported = negotiate_config(&device, preferred)
            .ok_or_else(|| RecorderError::DeviceUnavailable(device_id.to_string()))?;

        let format = AudioFormat {
            channels: supported.channels(),
            sample_rate: supported.sample_rate().0,
            chunk_frames: preferred.chunk_frames,
        };
        if format.channels != preferred.channels || format.sample_rate != preferred.sample_rate {
            warn!(
                "Audio device '{}' does not support {} ch @ {} Hz, using {} ch @ {} Hz",
                device_id,
                preferred.channels,
                preferred.sample_rate,
                format.channels,
                format.sample_rate
            );
        }

        let (tx, rx) = mpsc::channel();
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, tx, |s| s),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, tx, |s| (s >> 16) as i16),
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, tx, |s| (s as i32 - 32_768) as i16)
            }
            SampleFormat::F32 => build_stream::<f32>(&device, &config, tx, |s| {
                (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            }),
            other => {
                return Err(RecorderError::AudioStreamError(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| RecorderError::AudioStreamError(e.to_string()))?;

        info!(
            "Audio input opened: '{}' ({} ch @ {} Hz, {:?} -> PCM16)",
            device_id, format.channels, format.sample_rate, sample_format
        );

        Ok(Self {
            stream: Some(stream),
            rx,
            pending: Vec::with_capacity(format.chunk_samples() * 2),
            failure: None,
            format,
        })
    }
}

/// Prefer the requested channel count and rate, then fall back to the device default
fn negotiate_config(device: &cpal::Device, preferred: AudioFormat) -> Option<SupportedStreamConfig> {
    let rate = SampleRate(preferred.sample_rate);

    if let Ok(configs) = device.supported_input_configs() {
        let mut matching: Vec<_> = configs
            .filter(|c| {
                c.channels() == preferred.channels
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
            .collect();
        // PCM16 natively when offered
        matching.sort_by_key(|c| c.sample_format() != SampleFormat::I16);
        if let Some(range) = matching.into_iter().next() {
            return Some(range.with_sample_rate(rate));
        }
    }

    device.default_input_config().ok()
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    tx: Sender<Packet>,
    convert: fn(T) -> i16,
) -> RecorderResult<cpal::Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let err_tx = tx.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data.iter().map(|&s| convert(s)).collect();
                let _ = tx.send(Packet::Samples(samples));
            },
            move |err| {
                error!("Audio input stream error: {}", err);
                let _ = err_tx.send(Packet::Failed(err.to_string()));
            },
            None,
        )
        .map_err(|e| RecorderError::AudioStreamError(e.to_string()))
}

impl AudioSource for CpalAudioSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_chunk(&mut self, timeout: Duration) -> RecorderResult<Option<Vec<i16>>> {
        if let Some(reason) = self.failure.take() {
            return Err(RecorderError::AudioStreamError(reason));
        }

        let chunk_samples = self.format.chunk_samples();
        let deadline = Instant::now() + timeout;

        while self.pending.len() < chunk_samples {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(Packet::Samples(samples)) => self.pending.extend_from_slice(&samples),
                Ok(Packet::Failed(reason)) => return Err(RecorderError::AudioStreamError(reason)),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RecorderError::AudioStreamError(
                        "input stream closed".to_string(),
                    ))
                }
            }
        }

        let rest = self.pending.split_off(chunk_samples);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }

    fn discard_buffered(&mut self) {
        self.pending.clear();
        while let Ok(packet) = self.rx.try_recv() {
            if let Packet::Failed(reason) = packet {
                // Surfaced by the next read
                self.failure = Some(reason);
                break;
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Failed to pause audio stream on close: {}", e);
            }
            drop(stream);
            debug!("Audio input closed");
        }
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}
