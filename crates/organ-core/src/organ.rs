//! The organ context object
//!
//! [`Organ`] is created once by the application's composition root and
//! owns everything that is not realtime: the router, the model, slave,
//! observer, audio-control and MIDI ingestion threads, and the collector.
//! The realtime half is returned separately as a [`RenderBridge`] so the
//! audio backend can move it into its callback.
//!
//! ```text
//!                      ┌──────────── Organ (control surface) ─────────────┐
//!  note_on/off ───────►│ flume ──► ingestion ──► note queue ───────────┐  │
//!  activate_stop ─────►│ ToModel ─► model ──► comm queue ──────────────┤  │
//!  retune ────────────►│              │  └──► slave ──► audio ctl ──rtrb┤  │
//!  queries ◄───────────│ observer ◄───┘                                 │  │
//!                      └────────────────────────────────────────────────┼──┘
//!                                                                       ▼
//!                                                       RenderBridge (audio thread)
//! ```
//!
//! Every command returns immediately. Its effect becomes visible through
//! the queries once the corresponding notification reaches the observer.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use rtrb::RingBuffer;
use thiserror::Error;

use crate::bridge::{AudioControl, RenderBridge, RenderInputs, RenderStats, TABLE_QUEUE_CAPACITY};
use crate::config::{OrganConfig, StorageLayout};
use crate::engine::{EngineError, GcThread, PipeEngine};
use crate::event::{event_queue, KEY_BASE, NUM_KEYS};
use crate::ingest::{Ingest, NoteCommand};
use crate::instrument::{
    ElementKind, Instrument, MidiMap, Tuning, MAX_RANKS_PER_STOP, NUM_MIDI_CHANNELS, TEMPERAMENTS,
};
use crate::itc::{Endpoint, Message, Outbox, Router, RouterBuilder, RouterError, Tag};
use crate::model::{Model, ModelSetup, ModelState, ModelStatus, RetuneTracker};
use crate::observer::{count_elements, Observer, ObserverState, StateListener};
use crate::slave::{AdditiveGenerator, Slave, SlaveError, WaveCache, WaveGenerator};

#[derive(Debug, Error)]
pub enum OrganError {
    /// The synthesis engine could not be built; nothing was started
    #[error("Failed to create synthesis engine: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to set up recompute thread: {0}")]
    Slave(#[from] SlaveError),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: io::Error,
    },

    #[error("Invalid thread wiring: {0}")]
    Wiring(#[from] RouterError),
}

fn spawn_error(name: &'static str) -> impl FnOnce(io::Error) -> OrganError {
    move |source| OrganError::Spawn { name, source }
}

/// Static wiring between the organ's threads
fn wiring() -> Result<Router, RouterError> {
    let mut builder = RouterBuilder::new();
    for source in [
        Endpoint::Control,
        Endpoint::Midi,
        Endpoint::Iface,
        Endpoint::Audio,
        Endpoint::Slave,
    ] {
        builder.connect(source, Tag::ToModel, Endpoint::Model)?;
    }
    builder
        .connect(Endpoint::Model, Tag::ToSlave, Endpoint::Slave)?
        .connect(Endpoint::Slave, Tag::ToAudio, Endpoint::Audio)?
        .connect(Endpoint::Model, Tag::ToIface, Endpoint::Iface)?
        .connect(Endpoint::Model, Tag::ToMidi, Endpoint::Midi)?;
    for destination in Endpoint::ALL {
        if destination != Endpoint::Control {
            builder.connect(Endpoint::Control, Tag::Exit, destination)?;
        }
    }
    Ok(builder.build())
}

/// Collects the optional parts of an organ before starting it
pub struct OrganBuilder {
    config: OrganConfig,
    instrument: Instrument,
    generator: Arc<dyn WaveGenerator>,
    listener: Option<Arc<dyn StateListener>>,
}

impl OrganBuilder {
    pub fn new(config: OrganConfig) -> Self {
        Self {
            config,
            instrument: Instrument::default_organ(),
            generator: Arc::new(AdditiveGenerator),
            listener: None,
        }
    }

    pub fn instrument(mut self, instrument: Instrument) -> Self {
        self.instrument = instrument;
        self
    }

    pub fn generator(mut self, generator: Arc<dyn WaveGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Build the engine and start every thread
    ///
    /// Only engine, pool and thread creation failures are errors. A missing
    /// storage root or an empty instrument still starts the organ, which
    /// then reports [`ModelState::Degraded`] and never becomes ready.
    pub fn start(self, sample_rate: u32) -> Result<(Organ, RenderBridge<PipeEngine>), OrganError> {
        let OrganBuilder {
            config,
            instrument,
            generator,
            listener,
        } = self;

        let engine = PipeEngine::new(&instrument, sample_rate)?
            .with_master_gain(config.render.master_gain);

        let storage = match StorageLayout::prepare(config.storage_root.as_deref()) {
            Ok(layout) => {
                log::info!("[ORGAN] Storage root {:?}", layout.root);
                Some(layout)
            }
            Err(e) => {
                log::error!("[ORGAN] {}", e);
                None
            }
        };

        let (notes_tx, notes_rx) = event_queue(config.queues.note);
        let (comm_tx, comm_rx) = event_queue(config.queues.comm);
        let (midi_tx, midi_rx) = event_queue(config.queues.midi);
        let (tables_tx, tables_rx) = RingBuffer::new(TABLE_QUEUE_CAPACITY);
        let (commands_tx, commands_rx) = flume::unbounded();

        let mut router = wiring()?;
        let mut mailbox = |endpoint| {
            router
                .take_mailbox(endpoint)
                .ok_or(OrganError::Wiring(RouterError::NoRoute {
                    from: endpoint,
                    tag: Tag::Exit,
                }))
        };
        let model_box = mailbox(Endpoint::Model)?;
        let slave_box = mailbox(Endpoint::Slave)?;
        let iface_box = mailbox(Endpoint::Iface)?;
        let audio_box = mailbox(Endpoint::Audio)?;
        let midi_box = mailbox(Endpoint::Midi)?;

        let instrument = Arc::new(instrument);
        let status = Arc::new(ModelStatus::default());
        let observer = Arc::new(ObserverState::new());
        let retuning = Arc::new(RetuneTracker::default());
        let gc = GcThread::spawn().map_err(spawn_error("collector"))?;

        let bridge = RenderBridge::new(
            engine,
            RenderInputs {
                notes: notes_rx,
                comm: comm_rx,
                tables: tables_rx,
            },
            config.audio.layout,
        )
        .with_overrun_threshold(config.render.overrun_threshold());

        let slave = Slave::new(
            slave_box,
            router.outbox(Endpoint::Slave),
            generator,
            storage.as_ref().map(|layout| WaveCache::new(&layout.waves)),
        )?;
        let model = Model::new(
            model_box,
            router.outbox(Endpoint::Model),
            ModelSetup {
                instrument: instrument.clone(),
                tuning: config.tuning.resolve(),
                midimap: MidiMap::one_to_one(instrument.keyboards.len(), instrument.n_divisions()),
                sample_rate,
                storage_ok: storage.is_some(),
            },
            comm_tx,
            midi_rx,
            status.clone(),
            retuning.clone(),
        );
        let iface = Observer::new(
            iface_box,
            router.outbox(Endpoint::Iface),
            observer.clone(),
            listener,
        );
        let audio = AudioControl::new(
            audio_box,
            router.outbox(Endpoint::Audio),
            tables_tx,
            gc.handle(),
            bridge.stats(),
        );
        let ingest = Ingest::new(
            commands_rx,
            midi_box,
            router.outbox(Endpoint::Midi),
            notes_tx,
            midi_tx,
        );

        let control = router.outbox(Endpoint::Control);
        let mut threads: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        let spawned = (|| -> Result<(), OrganError> {
            threads.push(("observer", iface.spawn().map_err(spawn_error("observer"))?));
            threads.push(("audio-control", audio.spawn().map_err(spawn_error("audio-control"))?));
            threads.push(("slave", slave.spawn().map_err(spawn_error("slave"))?));
            threads.push(("ingestion", ingest.spawn().map_err(spawn_error("ingestion"))?));
            threads.push(("model", model.spawn().map_err(spawn_error("model"))?));
            Ok(())
        })();
        if let Err(e) = spawned {
            control.broadcast_exit();
            join_all(&mut threads);
            return Err(e);
        }

        log::info!(
            "[ORGAN] Started '{}' at {} Hz with {} threads",
            instrument.name,
            sample_rate,
            threads.len()
        );

        let organ = Organ {
            instrument,
            control,
            commands: commands_tx,
            observer,
            status,
            retuning,
            stats: bridge.stats(),
            threads,
            gc,
        };
        Ok((organ, bridge))
    }
}

fn join_all(threads: &mut Vec<(&'static str, JoinHandle<()>)>) {
    for (name, handle) in threads.drain(..) {
        if handle.join().is_err() {
            log::error!("[ORGAN] {} thread panicked", name);
        }
    }
}

/// Control surface and owner of the organ's threads
pub struct Organ {
    instrument: Arc<Instrument>,
    control: Outbox,
    commands: flume::Sender<NoteCommand>,
    observer: Arc<ObserverState>,
    status: Arc<ModelStatus>,
    retuning: Arc<RetuneTracker>,
    stats: Arc<RenderStats>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
    gc: GcThread,
}

impl Organ {
    /// Start with the default instrument and wave generator
    pub fn start(
        config: &OrganConfig,
        sample_rate: u32,
    ) -> Result<(Organ, RenderBridge<PipeEngine>), OrganError> {
        OrganBuilder::new(config.clone()).start(sample_rate)
    }

    fn send(&self, message: Message) {
        self.control.post(Tag::ToModel, message);
    }

    fn play(&self, command: NoteCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("[ORGAN] Ingestion thread gone, dropping {:?}", command);
        }
    }

    /// Sender for note sources running on other threads (MIDI ports)
    pub fn note_sender(&self) -> flume::Sender<NoteCommand> {
        self.commands.clone()
    }

    // Notes

    pub fn note_on(&self, channel: u8, note: u8, velocity: u8) {
        self.play(NoteCommand::NoteOn {
            channel,
            note,
            velocity,
        });
    }

    pub fn note_off(&self, channel: u8, note: u8) {
        self.play(NoteCommand::NoteOff { channel, note });
    }

    /// Forward a controller or program change to the model
    pub fn midi_control(&self, bytes: [u8; 3]) {
        self.play(NoteCommand::Control(bytes));
    }

    /// Hold every key of the compass on every channel
    pub fn panic_on(&self) {
        for channel in 0..NUM_MIDI_CHANNELS as u8 {
            for note in KEY_BASE..KEY_BASE + NUM_KEYS as u8 {
                self.note_on(channel, note, 127);
            }
        }
    }

    /// Release every key of the compass on every channel
    pub fn panic_off(&self) {
        for channel in 0..NUM_MIDI_CHANNELS as u8 {
            for note in KEY_BASE..KEY_BASE + NUM_KEYS as u8 {
                self.note_off(channel, note);
            }
        }
    }

    /// Sound two ranks and a C major chord, or silence them again
    pub fn self_test(&self, on: bool) {
        if on {
            self.activate_rank(0, 0);
            self.activate_rank(0, 2);
            for note in [60, 64, 67] {
                self.note_on(2, note, 100);
            }
        } else {
            for note in [60, 64, 67] {
                self.note_off(2, note);
            }
            self.stop_rank(0, 0);
            self.stop_rank(0, 2);
        }
    }

    // Ranks, stops, tremulants

    fn rank_activation(&self, division: usize, rank: usize, on: bool) {
        let Some(spec) = self.instrument.divisions.get(division) else {
            log::warn!("[ORGAN] No division {}, ignoring rank {}", division, rank);
            return;
        };
        if rank >= spec.ranks.len() {
            log::warn!("[ORGAN] Division {} has no rank {}", division, rank);
            return;
        }
        self.play(NoteCommand::RankActivation {
            division: division as u8,
            rank: rank as u8,
            on,
        });
    }

    /// Sound a rank from every keyboard, bypassing its stops
    pub fn activate_rank(&self, division: usize, rank: usize) {
        self.rank_activation(division, rank, true);
    }

    pub fn stop_rank(&self, division: usize, rank: usize) {
        self.rank_activation(division, rank, false);
    }

    /// Request an element change; false if the element does not exist
    pub fn set_element(&self, division: usize, index: usize, on: bool) -> bool {
        if self.instrument.element(division, index).is_none() {
            log::info!("[ORGAN] No element {} in division {}", index, division);
            return false;
        }
        let (group, ifelm) = (division as u8, index as u8);
        self.send(if on {
            Message::IfelmSet { group, ifelm }
        } else {
            Message::IfelmClear { group, ifelm }
        });
        true
    }

    fn set_nth(&self, division: usize, nth: usize, kind: ElementKind, on: bool) -> bool {
        match self.instrument.resolve_element(division, nth, kind) {
            Some(index) => self.set_element(division, index, on),
            None => {
                log::info!(
                    "[ORGAN] Division {} has no {:?} {}, ignoring",
                    division,
                    kind,
                    nth
                );
                false
            }
        }
    }

    pub fn activate_stop(&self, division: usize, stop: usize) -> bool {
        self.set_nth(division, stop, ElementKind::Stop, true)
    }

    pub fn deactivate_stop(&self, division: usize, stop: usize) -> bool {
        self.set_nth(division, stop, ElementKind::Stop, false)
    }

    pub fn activate_tremulant(&self, division: usize) -> bool {
        self.set_nth(division, 0, ElementKind::Tremulant, true)
    }

    pub fn deactivate_tremulant(&self, division: usize) -> bool {
        self.set_nth(division, 0, ElementKind::Tremulant, false)
    }

    /// Flip the tremulant based on the last observed state
    pub fn toggle_tremulant(&self, division: usize) -> bool {
        let on = !self.tremulant_active(division);
        self.set_nth(division, 0, ElementKind::Tremulant, on)
    }

    /// Switch every element of a division off
    pub fn clear_division(&self, division: usize) {
        if division < self.instrument.n_divisions() {
            self.send(Message::GroupClear {
                group: division as u8,
            });
        }
    }

    // Tuning, routing, gain

    /// Request a retune; false if the tuning is out of range
    pub fn retune(&self, temperament: usize, base_frequency: f32) -> bool {
        match Tuning::new(temperament, base_frequency) {
            Some(tuning) => {
                self.retuning.begin();
                self.send(Message::Retune(tuning));
                true
            }
            None => {
                log::warn!(
                    "[ORGAN] Invalid tuning: temperament {} at {} Hz",
                    temperament,
                    base_frequency
                );
                false
            }
        }
    }

    /// Route a MIDI channel to a division (and its keyboard), or remove it
    pub fn set_midi_routing(&self, channel: u8, division: u8, enabled: bool) {
        self.send(Message::MidiRouting {
            channel,
            division,
            enabled,
        });
    }

    pub fn set_division_gain(&self, division: u8, gain: f32) {
        self.send(Message::DivisionGain { division, gain });
    }

    // Queries

    pub fn model_state(&self) -> ModelState {
        self.status.get()
    }

    pub fn is_initializing(&self) -> bool {
        self.observer.is_initializing()
    }

    pub fn is_ready(&self) -> bool {
        self.status.get() == ModelState::Ready && !self.observer.is_initializing()
    }

    /// True from a retune request until the model has processed its done
    /// notification, including while a newer request waits its turn
    pub fn is_retuning(&self) -> bool {
        self.retuning.is_retuning()
    }

    fn layout(&self) -> Option<&Arc<Instrument>> {
        self.observer.instrument()
    }

    pub fn n_divisions(&self) -> usize {
        self.layout().map(|i| i.n_divisions()).unwrap_or(0)
    }

    pub fn division_label(&self, division: usize) -> Option<String> {
        Some(self.layout()?.divisions.get(division)?.label.clone())
    }

    pub fn n_stops(&self, division: usize) -> usize {
        count_elements(self.layout(), division, ElementKind::Stop)
    }

    pub fn stop_label(&self, division: usize, stop: usize) -> Option<String> {
        let layout = self.layout()?;
        let index = layout.resolve_element(division, stop, ElementKind::Stop)?;
        Some(layout.element(division, index)?.label.clone())
    }

    pub fn stop_activated(&self, division: usize, stop: usize) -> bool {
        self.layout()
            .and_then(|l| l.resolve_element(division, stop, ElementKind::Stop))
            .map(|index| self.observer.element_active(division, index))
            .unwrap_or(false)
    }

    /// Activation bits of a division, one per interface element
    pub fn group_mask(&self, division: usize) -> u32 {
        self.observer.group_mask(division)
    }

    pub fn has_tremulant(&self, division: usize) -> bool {
        count_elements(self.layout(), division, ElementKind::Tremulant) > 0
    }

    pub fn tremulant_active(&self, division: usize) -> bool {
        self.layout()
            .and_then(|l| l.resolve_element(division, 0, ElementKind::Tremulant))
            .map(|index| self.observer.element_active(division, index))
            .unwrap_or(false)
    }

    pub fn n_tunings(&self) -> usize {
        TEMPERAMENTS.len()
    }

    pub fn tuning_label(&self, temperament: usize) -> Option<&'static str> {
        TEMPERAMENTS.get(temperament).map(|t| t.label)
    }

    /// Tuning in effect, updated when a retune completes
    pub fn current_tuning(&self) -> Tuning {
        self.observer.tuning()
    }

    pub fn base_frequency(&self) -> f32 {
        self.observer.tuning().base_frequency
    }

    pub fn max_ranks_per_stop(&self) -> usize {
        MAX_RANKS_PER_STOP
    }

    pub fn n_midi_channels(&self) -> usize {
        NUM_MIDI_CHANNELS
    }

    pub fn midi_map_entry(&self, channel: usize) -> Option<u16> {
        self.observer.midimap().entry(channel)
    }

    pub fn division_gain(&self, division: usize) -> Option<f32> {
        (division < self.n_divisions())
            .then(|| self.observer.division_gain(division))
            .flatten()
    }

    pub fn render_stats(&self) -> Arc<RenderStats> {
        self.stats.clone()
    }

    /// Stop every thread and wait for them
    ///
    /// Returns once all loops have exited. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        let reached = self.control.broadcast_exit();
        log::info!("[ORGAN] Shutting down {} endpoints", reached);
        join_all(&mut self.threads);
        self.gc.stop();
        log::info!("[ORGAN] Stopped");
    }
}

impl Drop for Organ {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::AudioRenderer;
    use crate::engine::RankTable;
    use crate::instrument::{DivisionSpec, ElementAction, Group, Ifelm, RankSpec};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn test_config(dir: &tempfile::TempDir) -> OrganConfig {
        OrganConfig {
            storage_root: Some(dir.path().to_path_buf()),
            ..OrganConfig::default()
        }
    }

    /// One manual with two stops and a tremulant
    fn two_stop_instrument() -> Instrument {
        let flute = [1.0, 0.1, 0.3];
        let element = |label: &str, action| Ifelm {
            label: label.to_string(),
            mnemonic: label.to_string(),
            action,
        };
        Instrument::new(
            "Two stops",
            vec!["I".to_string()],
            vec![DivisionSpec {
                label: "Manual".to_string(),
                keyboard: Some(0),
                ranks: vec![
                    RankSpec::new("Flute 8", 8.0, &flute, 0.5),
                    RankSpec::new("Flute 4", 4.0, &flute, 0.4),
                ],
                group: Group {
                    label: "Manual".to_string(),
                    elements: vec![
                        element("Flute 8", ElementAction::Stop { ranks: vec![0] }),
                        element("Tremulant", ElementAction::Tremulant),
                        element("Flute 4", ElementAction::Stop { ranks: vec![1] }),
                    ],
                },
            }],
        )
        .unwrap()
    }

    /// Blocks while its gate is closed
    struct GatedGenerator {
        open: AtomicBool,
    }

    impl WaveGenerator for GatedGenerator {
        fn generate(
            &self,
            division: u8,
            rank: u8,
            spec: &RankSpec,
            tuning: &Tuning,
            sample_rate: u32,
        ) -> Result<RankTable, SlaveError> {
            while !self.open.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            AdditiveGenerator.generate(division, rank, spec, tuning, sample_rate)
        }
    }

    #[derive(Default)]
    struct ChangeCounter(AtomicUsize);

    impl StateListener for ChangeCounter {
        fn on_active_stops_changed(&self, _division: usize, _mask: u32) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RetuneCounter(AtomicUsize);

    impl StateListener for RetuneCounter {
        fn on_retuned(&self, _tuning: Tuning, _ok: bool) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_becomes_ready_and_reports_layout() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let (mut organ, _bridge) = Organ::start(&test_config(&dir), 48000).unwrap();

        assert!(wait_until(|| organ.is_ready()));
        assert!(!organ.is_initializing());
        assert_eq!(organ.n_divisions(), 3);
        assert_eq!(organ.division_label(1).as_deref(), Some("Swell"));
        assert_eq!(organ.n_stops(0), 4);
        assert_eq!(organ.stop_label(0, 3).as_deref(), Some("Mixture III"));
        assert_eq!(organ.stop_label(0, 4), None);
        assert!(organ.has_tremulant(1));
        assert!(!organ.has_tremulant(2));
        assert_eq!(organ.n_tunings(), 6);
        assert_eq!(organ.current_tuning(), Tuning::default());
        assert_eq!(organ.max_ranks_per_stop(), 5);
        assert_eq!(organ.n_midi_channels(), 16);
        assert_eq!(organ.midi_map_entry(0), MidiMap::one_to_one(3, 3).entry(0));
        organ.shutdown();
        organ.shutdown();
    }

    #[test]
    fn test_missing_stop_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(ChangeCounter::default());
        let (organ, _bridge) = OrganBuilder::new(test_config(&dir))
            .instrument(two_stop_instrument())
            .listener(counter.clone())
            .start(48000)
            .unwrap();
        assert!(wait_until(|| organ.is_ready()));

        assert!(!organ.stop_activated(0, 2));
        assert!(!organ.activate_stop(0, 2));
        // A real change afterwards proves earlier requests were processed
        assert!(organ.activate_stop(0, 1));
        assert!(wait_until(|| organ.stop_activated(0, 1)));
        assert!(!organ.stop_activated(0, 2));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        // Stop 1 is element 2, after the tremulant
        assert_eq!(organ.group_mask(0), 0b100);
    }

    #[test]
    fn test_activate_then_deactivate_leaves_bit_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(ChangeCounter::default());
        let (organ, _bridge) = OrganBuilder::new(test_config(&dir))
            .listener(counter.clone())
            .start(48000)
            .unwrap();
        assert!(wait_until(|| organ.is_ready()));

        organ.activate_stop(0, 0);
        organ.deactivate_stop(0, 0);
        assert!(wait_until(|| counter.0.load(Ordering::SeqCst) == 2));
        assert!(!organ.stop_activated(0, 0));
        assert_eq!(organ.group_mask(0), 0);

        assert!(organ.toggle_tremulant(1));
        assert!(wait_until(|| organ.tremulant_active(1)));
    }

    #[test]
    fn test_retune_cycle_is_observed_as_false_true_false() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(GatedGenerator {
            open: AtomicBool::new(true),
        });
        let (organ, _bridge) = OrganBuilder::new(test_config(&dir))
            .instrument(two_stop_instrument())
            .generator(generator.clone())
            .start(48000)
            .unwrap();
        assert!(wait_until(|| organ.is_ready()));
        assert!(!organ.is_retuning());

        generator.open.store(false, Ordering::SeqCst);
        let mut seen = vec![organ.is_retuning()];
        assert!(!organ.retune(0, 900.0));
        assert!(organ.retune(1, 415.0));

        assert!(wait_until(|| organ.is_retuning()));
        seen.push(true);
        thread::sleep(Duration::from_millis(50));
        assert!(organ.is_retuning(), "flag cleared before the recompute finished");
        assert_eq!(organ.current_tuning(), Tuning::default());

        generator.open.store(true, Ordering::SeqCst);
        assert!(wait_until(|| !organ.is_retuning()));
        seen.push(false);
        seen.dedup();
        assert_eq!(seen, vec![false, true, false]);

        let expected = Tuning::new(1, 415.0).unwrap();
        assert!(wait_until(|| organ.current_tuning() == expected));
        assert_eq!(organ.base_frequency(), 415.0);
    }

    #[test]
    fn test_queued_retune_is_one_busy_period() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(GatedGenerator {
            open: AtomicBool::new(true),
        });
        let counter = Arc::new(RetuneCounter::default());
        let (organ, _bridge) = OrganBuilder::new(test_config(&dir))
            .instrument(two_stop_instrument())
            .generator(generator.clone())
            .listener(counter.clone())
            .start(48000)
            .unwrap();
        assert!(wait_until(|| organ.is_ready()));

        generator.open.store(false, Ordering::SeqCst);
        assert!(organ.retune(1, 415.0));
        assert!(organ.retune(2, 430.0));
        let mut seen = vec![organ.is_retuning()];
        generator.open.store(true, Ordering::SeqCst);

        let finished = wait_until(|| {
            seen.push(organ.is_retuning());
            counter.0.load(Ordering::SeqCst) == 2
        });
        assert!(finished);
        seen.push(organ.is_retuning());
        seen.dedup();
        assert_eq!(seen, vec![true, false]);
        assert_eq!(organ.current_tuning(), Tuning::new(2, 430.0).unwrap());
    }

    #[test]
    fn test_retunes_reach_the_engine_while_paused() {
        let dir = tempfile::tempdir().unwrap();
        let (organ, mut bridge) = OrganBuilder::new(test_config(&dir))
            .instrument(two_stop_instrument())
            .start(48000)
            .unwrap();
        assert!(wait_until(|| organ.is_ready()));

        // No callbacks run, so the handoff queue fills up
        let mut last = Tuning::default();
        for (temperament, base) in [410.0, 420.0, 430.0, 450.0, 460.0].into_iter().enumerate() {
            last = Tuning::new(temperament, base).unwrap();
            assert!(organ.retune(temperament, base));
            assert!(wait_until(|| organ.current_tuning() == last));
        }
        assert!(!organ.is_retuning());

        let mut buffer = vec![0.0f32; 64 * 2];
        let playing_last = wait_until(|| {
            bridge.fill_buffer(&mut buffer, 64, 2);
            bridge.engine().tables().map(|t| t.tuning) == Some(last)
        });
        assert!(playing_last);
    }

    #[test]
    fn test_without_storage_the_organ_never_becomes_ready() {
        let config = OrganConfig {
            storage_root: None,
            ..OrganConfig::default()
        };
        let (organ, _bridge) = Organ::start(&config, 48000).unwrap();
        assert!(wait_until(|| organ.model_state() == ModelState::Degraded));
        thread::sleep(Duration::from_millis(20));
        assert!(organ.is_initializing());
        assert!(!organ.is_ready());
        assert!(!organ.activate_stop(0, 7));
    }

    #[test]
    fn test_engine_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Organ::start(&test_config(&dir), 0),
            Err(OrganError::Engine(EngineError::InvalidSampleRate(0)))
        ));
    }

    #[test]
    fn test_render_bridge_plays_a_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (organ, mut bridge) = Organ::start(&test_config(&dir), 48000).unwrap();
        assert!(wait_until(|| organ.is_ready()));

        organ.activate_stop(0, 0);
        assert!(wait_until(|| organ.stop_activated(0, 0)));
        organ.note_on(0, 60, 100);

        let mut buffer = vec![0.0f32; 256 * 2];
        let sounding = wait_until(|| {
            bridge.fill_buffer(&mut buffer, 256, 2);
            buffer.iter().any(|s| s.abs() > 1e-3)
        });
        assert!(sounding);
        assert!(buffer.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(bridge.engine().active_pipes() > 0);
        assert!(organ.render_stats().callbacks() > 0);

        organ.note_off(0, 60);
    }
}
