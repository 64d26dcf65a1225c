//! Organ Core - pipe organ synthesizer coordination

pub mod audio;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod event;
pub mod ingest;
pub mod instrument;
pub mod itc;
pub mod model;
pub mod observer;
pub mod organ;
pub mod slave;
pub mod transport;

pub use bridge::{AudioRenderer, RenderBridge, RenderStats, SampleLayout};
pub use config::OrganConfig;
pub use ingest::NoteCommand;
pub use model::ModelState;
pub use observer::StateListener;
pub use organ::{Organ, OrganBuilder, OrganError};
pub use transport::{AudioHost, Transport};
