//! Audio output configuration

use serde::{Deserialize, Serialize};

use crate::bridge::SampleLayout;

/// Largest block the backend will request from the render bridge
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Default buffer size when none is configured (frames)
///
/// 256 frames @ 48kHz ≈ 5.3ms, comfortably playable for an organ.
pub const DEFAULT_BUFFER_SIZE: u32 = 256;

/// Default sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Preferred buffer size for the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the device decide; the bridge adapts to whatever arrives
    #[default]
    Default,
    /// Request a specific size in frames (clamped to 64..=8192)
    Fixed(u32),
}

impl BufferSize {
    pub fn as_frames(&self) -> Option<u32> {
        match self {
            BufferSize::Default => None,
            BufferSize::Fixed(frames) => Some((*frames).clamp(64, MAX_BUFFER_SIZE)),
        }
    }

    /// Human-readable form for logs
    pub fn label(&self) -> String {
        match self.as_frames() {
            Some(frames) => format!("{} frames", frames),
            None => format!("device default (~{})", DEFAULT_BUFFER_SIZE),
        }
    }
}

/// Audio device identifier, optionally qualified by host ("ALSA", "JACK", ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Output stream settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = system default)
    pub device: Option<DeviceId>,
    pub buffer_size: BufferSize,
    /// Preferred sample rate (None = 48kHz if supported)
    pub sample_rate: Option<u32>,
    /// How samples are laid out in the buffer handed to the renderer
    pub layout: SampleLayout,
}
