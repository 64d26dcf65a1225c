//! cpal output stream
//!
//! Opening happens in two steps because the organ needs the negotiated
//! sample rate before it can build its engine:
//!
//! ```text
//!  CpalOutput::open(config) ──► sample_rate() ──► Organ::start ──► CpalOutput::start(bridge)
//!                                                                        │
//!                                            cpal thread owns the bridge ◄┘
//! ```
//!
//! The render bridge is moved into the stream callback, so the callback
//! never takes a lock.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::config::{AudioConfig, DEFAULT_SAMPLE_RATE};
use super::device::{default_output_device, find_device_by_id};
use super::error::{AudioError, AudioResult};
use crate::bridge::AudioRenderer;
use crate::transport::AudioHost;

/// A negotiated but not yet running output
pub struct CpalOutput {
    device: cpal::Device,
    stream_config: StreamConfig,
    buffer_size: Option<u32>,
}

impl CpalOutput {
    /// Pick the device and negotiate format, rate and buffer size
    pub fn open(config: &AudioConfig) -> AudioResult<Self> {
        let device = match &config.device {
            Some(id) => find_device_by_id(id)?,
            None => default_output_device()?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("[AUDIO] Using output device: {}", device_name);

        let supported = output_config(&device, config)?;
        let buffer_size = config.buffer_size.as_frames();
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: match buffer_size {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };

        match buffer_size {
            Some(frames) => log::info!(
                "[AUDIO] {} channels, {}Hz, {} frames (~{:.1}ms)",
                stream_config.channels,
                stream_config.sample_rate.0,
                frames,
                frames as f32 / stream_config.sample_rate.0 as f32 * 1000.0
            ),
            None => log::info!(
                "[AUDIO] {} channels, {}Hz, device buffer size",
                stream_config.channels,
                stream_config.sample_rate.0
            ),
        }

        Ok(Self {
            device,
            stream_config,
            buffer_size,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.stream_config.channels
    }

    /// Requested buffer size, if one was fixed
    pub fn buffer_size(&self) -> Option<u32> {
        self.buffer_size
    }

    /// Build the stream around `renderer`; it starts paused
    pub fn start<R: AudioRenderer + 'static>(self, mut renderer: R) -> AudioResult<CpalStream> {
        let channels = self.stream_config.channels as usize;
        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    renderer.fill_buffer(data, frames, channels);
                },
                |err| log::error!("[AUDIO] Stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        // Some backends start playing on build
        if let Err(e) = stream.pause() {
            log::debug!("[AUDIO] Initial pause not supported: {}", e);
        }

        Ok(CpalStream {
            stream,
            sample_rate: self.stream_config.sample_rate.0,
        })
    }
}

/// A built output stream; dropping it stops audio
pub struct CpalStream {
    stream: Stream,
    sample_rate: u32,
}

impl CpalStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioHost for CpalStream {
    fn play(&mut self) -> AudioResult<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::StreamControlError(e.to_string()))
    }

    fn pause(&mut self) -> AudioResult<()> {
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamControlError(e.to_string()))
    }
}

/// Best supported config: f32, stereo if possible, the requested rate if possible
fn output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<cpal::SupportedStreamConfig> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let target = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let in_range = |c: &&cpal::SupportedStreamConfigRange| {
        target >= c.min_sample_rate().0 && target <= c.max_sample_rate().0
    };

    let best = supported
        .iter()
        .filter(|c| c.channels() >= 2)
        .find(in_range)
        .or_else(|| supported.iter().find(in_range))
        .or_else(|| supported.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported.first())
        .ok_or_else(|| AudioError::ConfigError("No f32 output configuration".to_string()))?;

    let sample_rate = if in_range(&best) {
        cpal::SampleRate(target)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "[AUDIO] Device doesn't support {}Hz, using {}Hz",
            target,
            fallback.0
        );
        fallback
    };

    Ok(best.clone().with_sample_rate(sample_rate))
}
