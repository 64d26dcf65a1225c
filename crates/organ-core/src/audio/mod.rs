//! Audio output
//!
//! Device discovery and a cpal output stream that drives an
//! [`AudioRenderer`](crate::bridge::AudioRenderer).

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE, MAX_BUFFER_SIZE};
pub use cpal_backend::{CpalOutput, CpalStream};
pub use device::{default_output_device, find_device_by_id, list_output_devices};
pub use error::{AudioError, AudioResult};
