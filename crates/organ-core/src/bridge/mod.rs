//! Realtime render bridge
//!
//! The host audio driver calls [`AudioRenderer::fill_buffer`] on its own
//! high-priority thread. [`RenderBridge`] is the only implementation: it
//! owns the synthesis engine, the consuming ends of the note and
//! communication queues, and the per-channel render buffers.
//!
//! ```text
//!  note queue (u32) ─┐
//!  comm queue (u32) ─┼─► engine.process_event ─► update_keys ─► render ─► copy out
//!  tables (rtrb)    ─┘         (install_tables)
//! ```
//!
//! Nothing here locks, blocks or logs. The only allocation happens when the
//! host changes the frame or channel count. Overruns and reallocations are
//! counted in [`RenderStats`] and reported by the audio-control thread.

pub mod control;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use basedrop::Shared;
use serde::{Deserialize, Serialize};

use crate::engine::{SynthEngine, TuningSet};
use crate::event::{EventConsumer, PackedEvent};

pub use control::AudioControl;

/// Highest channel count rendered; extra host channels receive silence
pub const MAX_CHANNELS: usize = 2;

/// Callback duration above which an overrun is reported
pub const DEFAULT_OVERRUN_THRESHOLD: Duration = Duration::from_millis(5);

/// Capacity of the tuning-set handoff queue
pub const TABLE_QUEUE_CAPACITY: usize = 4;

/// Sample layout of the host-owned buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleLayout {
    /// Frame after frame, channels interleaved (cpal)
    #[default]
    Interleaved,
    /// One contiguous block of `frames` samples per channel
    Planar,
}

/// The single capability an audio driver needs from the synthesizer
pub trait AudioRenderer: Send {
    /// Fill `buffer` with `frames` frames of `channels` channels
    fn fill_buffer(&mut self, buffer: &mut [f32], frames: usize, channels: usize);
}

/// Lock-free counters written by the render thread
#[derive(Debug, Default)]
pub struct RenderStats {
    callbacks: AtomicU64,
    overruns: AtomicU64,
    last_overrun_us: AtomicU64,
    reallocations: AtomicU64,
    frames: AtomicU64,
    channels: AtomicU64,
}

impl RenderStats {
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Duration of the most recent overrun in microseconds
    pub fn last_overrun_us(&self) -> u64 {
        self.last_overrun_us.load(Ordering::Relaxed)
    }

    /// How many times the render buffers were rebuilt
    pub fn reallocations(&self) -> u64 {
        self.reallocations.load(Ordering::Relaxed)
    }

    /// Frame and channel count of the most recent reallocation
    pub fn negotiated(&self) -> (usize, usize) {
        (
            self.frames.load(Ordering::Relaxed) as usize,
            self.channels.load(Ordering::Relaxed) as usize,
        )
    }
}

/// Per-channel render buffers sized to the last negotiated block
struct ChannelBuffers {
    frames: usize,
    channels: usize,
    data: Vec<Box<[f32]>>,
}

impl ChannelBuffers {
    fn empty() -> Self {
        Self {
            frames: 0,
            channels: 0,
            data: Vec::new(),
        }
    }

    fn matches(&self, frames: usize, channels: usize) -> bool {
        self.frames == frames && self.channels == channels
    }

    fn reallocate(&mut self, frames: usize, channels: usize) {
        // Release the old block before creating the new one
        self.data = Vec::new();
        self.data = (0..channels)
            .map(|_| vec![0.0f32; frames].into_boxed_slice())
            .collect();
        self.frames = frames;
        self.channels = channels;
    }
}

/// Queues the bridge consumes from
pub struct RenderInputs {
    pub notes: EventConsumer<u32>,
    pub comm: EventConsumer<u32>,
    pub tables: rtrb::Consumer<Shared<TuningSet>>,
}

/// [`AudioRenderer`] driving a [`SynthEngine`]
pub struct RenderBridge<E: SynthEngine> {
    engine: E,
    inputs: RenderInputs,
    buffers: ChannelBuffers,
    layout: SampleLayout,
    overrun_threshold: Duration,
    stats: Arc<RenderStats>,
}

impl<E: SynthEngine> RenderBridge<E> {
    pub fn new(engine: E, inputs: RenderInputs, layout: SampleLayout) -> Self {
        Self {
            engine,
            inputs,
            buffers: ChannelBuffers::empty(),
            layout,
            overrun_threshold: DEFAULT_OVERRUN_THRESHOLD,
            stats: Arc::new(RenderStats::default()),
        }
    }

    pub fn with_overrun_threshold(mut self, threshold: Duration) -> Self {
        self.overrun_threshold = threshold;
        self
    }

    pub fn set_layout(&mut self, layout: SampleLayout) {
        self.layout = layout;
    }

    /// Counters shared with non-realtime observers
    pub fn stats(&self) -> Arc<RenderStats> {
        self.stats.clone()
    }

    /// Frame and channel count of the current render buffers
    pub fn negotiated(&self) -> (usize, usize) {
        (self.buffers.frames, self.buffers.channels)
    }

    /// Length of each allocated channel buffer
    pub fn buffer_lengths(&self) -> Vec<usize> {
        self.buffers.data.iter().map(|b| b.len()).collect()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn drain_inputs(&mut self) {
        let engine = &mut self.engine;
        let mut apply = |word: u32| {
            if let Some(event) = PackedEvent::decode(word) {
                engine.process_event(event);
            }
        };
        self.inputs.notes.drain(&mut apply);
        self.inputs.comm.drain(&mut apply);

        while let Ok(tables) = self.inputs.tables.pop() {
            self.engine.install_tables(tables);
        }
    }

    fn copy_out(&self, buffer: &mut [f32], frames: usize, channels: usize) {
        let internal = &self.buffers.data;
        match self.layout {
            SampleLayout::Interleaved => {
                for (i, frame) in buffer.chunks_mut(channels).take(frames).enumerate() {
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        *sample = internal.get(ch).map(|b| b[i]).unwrap_or(0.0);
                    }
                }
            }
            SampleLayout::Planar => {
                for (ch, block) in buffer.chunks_mut(frames).take(channels).enumerate() {
                    match internal.get(ch) {
                        Some(source) => {
                            let n = block.len().min(source.len());
                            block[..n].copy_from_slice(&source[..n]);
                        }
                        None => block.iter_mut().for_each(|s| *s = 0.0),
                    }
                }
            }
        }
    }
}

impl<E: SynthEngine> AudioRenderer for RenderBridge<E> {
    fn fill_buffer(&mut self, buffer: &mut [f32], frames: usize, channels: usize) {
        if frames == 0 || channels == 0 {
            return;
        }

        let internal_channels = channels.min(MAX_CHANNELS);
        if !self.buffers.matches(frames, internal_channels) {
            self.buffers.reallocate(frames, internal_channels);
            self.stats.frames.store(frames as u64, Ordering::Relaxed);
            self.stats
                .channels
                .store(internal_channels as u64, Ordering::Relaxed);
            self.stats.reallocations.fetch_add(1, Ordering::Relaxed);
        }

        let start = Instant::now();

        self.drain_inputs();
        self.engine.update_keys();
        self.engine.render(&mut self.buffers.data);
        self.copy_out(buffer, frames, channels);

        let elapsed = start.elapsed();
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        if elapsed > self.overrun_threshold {
            let us = elapsed.as_micros() as u64;
            self.stats.last_overrun_us.store(us, Ordering::Relaxed);
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}
