//! Model thread: the instrument state machine
//!
//! ```text
//!  Uninitialized ──start──► Loading ──acks from iface and audio──► Ready
//!                              │                                   │  ▲
//!                              └─ no storage / no divisions /      │  │ retune done
//!                                 first recompute failed           ▼  │
//!                                        ▼                     (retuning)
//!                                    Degraded
//! ```
//!
//! The model owns the producing end of the communication queue to the
//! render thread. Activation requests become packed events there and are
//! then forwarded to the observer, which updates the visible masks.
//!
//! Ready needs three things: the observer acknowledged the layout, audio
//! control delivered the first tables, and the initial recompute reported
//! success.

pub mod control;

use std::io;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::event::{EventConsumer, EventProducer, Opcode, PackedEvent};
use crate::instrument::{Instrument, MidiMap, Tuning};
use crate::itc::{
    Endpoint, Incoming, InterfaceInit, Mailbox, Message, Outbox, RecomputeRequest, Tag,
};

use control::{ControlMessage, IfelmMode, IfelmSelector};

/// Lifecycle of the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModelState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    /// Configuration error; the organ will not become ready
    Degraded = 3,
}

/// Model state readable from any thread
#[derive(Debug, Default)]
pub struct ModelStatus(AtomicU8);

impl ModelStatus {
    pub fn get(&self) -> ModelState {
        match self.0.load(Ordering::Acquire) {
            1 => ModelState::Loading,
            2 => ModelState::Ready,
            3 => ModelState::Degraded,
            _ => ModelState::Uninitialized,
        }
    }

    fn set(&self, state: ModelState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Outstanding retune work, readable from any thread
///
/// Counts retune requests sent to the model whose done notification it has
/// not processed yet, plus the initial recompute. Senders call
/// [`RetuneTracker::begin`] before posting a request; the model resolves
/// each one exactly once, whether it finished, was superseded by a newer
/// request or was rejected.
#[derive(Debug, Default)]
pub struct RetuneTracker(AtomicUsize);

impl RetuneTracker {
    pub fn is_retuning(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }

    pub fn begin(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Resolve one request; requests that never called `begin` are ignored
    pub(crate) fn finish(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// What the model is built from
#[derive(Debug, Clone)]
pub struct ModelSetup {
    pub instrument: Arc<Instrument>,
    pub tuning: Tuning,
    pub midimap: MidiMap,
    pub sample_rate: u32,
    /// Whether the storage root was usable
    pub storage_ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recompute {
    Initial,
    Retune,
}

pub struct Model {
    mailbox: Mailbox,
    outbox: Outbox,
    setup: ModelSetup,
    comm: EventProducer<u32>,
    midi: EventConsumer<u8>,
    status: Arc<ModelStatus>,
    retuning: Arc<RetuneTracker>,
    iface_acked: bool,
    audio_acked: bool,
    recompute: Option<Recompute>,
    queued_retune: Option<Tuning>,
    selector: IfelmSelector,
}

impl Model {
    pub fn new(
        mailbox: Mailbox,
        outbox: Outbox,
        setup: ModelSetup,
        comm: EventProducer<u32>,
        midi: EventConsumer<u8>,
        status: Arc<ModelStatus>,
        retuning: Arc<RetuneTracker>,
    ) -> Self {
        status.set(ModelState::Uninitialized);
        Self {
            mailbox,
            outbox,
            setup,
            comm,
            midi,
            status,
            retuning,
            iface_acked: false,
            audio_acked: false,
            recompute: None,
            queued_retune: None,
            selector: IfelmSelector::default(),
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("organ-model".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        log::info!("[MODEL] Model thread started");
        self.start_loading();
        loop {
            match self.mailbox.recv() {
                Incoming::Exit => break,
                Incoming::Message { source, message } => self.handle(source, message),
            }
        }
        self.mailbox.discard_pending();
        log::info!("[MODEL] Model thread stopped");
    }

    fn state(&self) -> ModelState {
        self.status.get()
    }

    fn start_loading(&mut self) {
        self.status.set(ModelState::Loading);
        if !self.setup.storage_ok {
            log::error!("[MODEL] No usable storage root, organ stays unavailable");
            self.status.set(ModelState::Degraded);
            return;
        }
        if self.setup.instrument.n_divisions() == 0 {
            log::error!(
                "[MODEL] Instrument '{}' has no divisions, organ stays unavailable",
                self.setup.instrument.name
            );
            self.status.set(ModelState::Degraded);
            return;
        }

        log::info!("[MODEL] Loading '{}'", self.setup.instrument.name);
        self.outbox.post(
            Tag::ToIface,
            Message::Init(Box::new(InterfaceInit {
                instrument: self.setup.instrument.clone(),
                tuning: self.setup.tuning,
                midimap: self.setup.midimap,
            })),
        );
        self.outbox
            .post(Tag::ToMidi, Message::MidiChannelConfig(self.setup.midimap));
        self.retuning.begin();
        self.start_recompute(self.setup.tuning, Recompute::Initial);
    }

    fn handle(&mut self, source: Endpoint, message: Message) {
        match message {
            Message::Ack(Endpoint::Iface) => {
                self.iface_acked = true;
                self.check_ready();
            }
            Message::Ack(Endpoint::Audio) => {
                self.audio_acked = true;
                self.check_ready();
            }
            Message::RetuningDone { tuning, ok } => self.retuning_done(tuning, ok),
            Message::Retune(tuning) => self.retune(tuning),
            Message::IfelmSet { group, ifelm } => self.set_element(group, ifelm, true),
            Message::IfelmClear { group, ifelm } => self.set_element(group, ifelm, false),
            Message::GroupClear { group } => self.clear_group(group),
            Message::MidiRouting {
                channel,
                division,
                enabled,
            } => self.route_midi(channel, division, enabled),
            Message::DivisionGain { division, gain } => self.set_gain(division, gain),
            Message::MidiPending => self.drain_midi(),
            other => log::debug!("[MODEL] Ignoring {} from {}", other.kind(), source),
        }
    }

    fn check_ready(&mut self) {
        let loaded = self.recompute != Some(Recompute::Initial);
        if self.state() == ModelState::Loading && loaded && self.iface_acked && self.audio_acked {
            self.status.set(ModelState::Ready);
            self.outbox.post(Tag::ToIface, Message::Ready);
            log::info!("[MODEL] Ready");
        }
    }

    fn accepting(&self, what: &str) -> bool {
        let state = self.state();
        if state != ModelState::Ready {
            log::debug!("[MODEL] Ignoring {} while {:?}", what, state);
        }
        state == ModelState::Ready
    }

    // Tuning

    fn start_recompute(&mut self, tuning: Tuning, kind: Recompute) {
        self.outbox.post(
            Tag::ToSlave,
            Message::Recompute(Box::new(RecomputeRequest {
                instrument: self.setup.instrument.clone(),
                tuning,
                sample_rate: self.setup.sample_rate,
            })),
        );
        self.recompute = Some(kind);
    }

    fn retune(&mut self, requested: Tuning) {
        let Some(tuning) = Tuning::new(requested.temperament, requested.base_frequency) else {
            log::warn!(
                "[MODEL] Rejecting retune to temperament {} at {} Hz",
                requested.temperament,
                requested.base_frequency
            );
            self.retuning.finish();
            return;
        };
        if self.state() == ModelState::Degraded {
            log::debug!("[MODEL] Ignoring retune while degraded");
            self.retuning.finish();
            return;
        }
        if self.recompute.is_some() {
            log::debug!("[MODEL] Recompute in progress, queueing retune");
            if self.queued_retune.replace(tuning).is_some() {
                self.retuning.finish();
            }
            return;
        }
        self.outbox.post(Tag::ToIface, Message::Retune(tuning));
        self.start_recompute(tuning, Recompute::Retune);
    }

    fn retuning_done(&mut self, tuning: Tuning, ok: bool) {
        match self.recompute.take() {
            Some(Recompute::Initial) => {
                self.retuning.finish();
                if ok {
                    self.setup.tuning = tuning;
                    self.check_ready();
                } else {
                    log::error!("[MODEL] Initial wavetables could not be built");
                    self.status.set(ModelState::Degraded);
                }
            }
            Some(Recompute::Retune) => {
                self.retuning.finish();
                if ok {
                    self.setup.tuning = tuning;
                }
                self.outbox
                    .post(Tag::ToIface, Message::RetuningDone { tuning, ok });
            }
            None => log::warn!("[MODEL] Unexpected retuning-done"),
        }

        if let Some(next) = self.queued_retune.take() {
            self.retune(next);
        }
    }

    // Interface elements

    fn write_events(&mut self, events: &[PackedEvent]) -> bool {
        let words: Vec<u32> = events.iter().map(|e| e.encode()).collect();
        match self.comm.write_all(&words) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[MODEL] Dropping {} events: {}", words.len(), e);
                false
            }
        }
    }

    fn set_element(&mut self, group: u8, ifelm: u8, on: bool) {
        if !self.accepting("element change") {
            return;
        }
        let (d, i) = (group as usize, ifelm as usize);
        if self.setup.instrument.element(d, i).is_none() {
            log::info!("[MODEL] No element {} in group {}, ignoring", ifelm, group);
            return;
        }
        let events = self.setup.instrument.element_events(d, i, on);
        if self.write_events(&events) {
            let message = if on {
                Message::IfelmSet { group, ifelm }
            } else {
                Message::IfelmClear { group, ifelm }
            };
            self.outbox.post(Tag::ToIface, message);
        }
    }

    fn clear_group(&mut self, group: u8) {
        if !self.accepting("group clear") {
            return;
        }
        let Some(count) = self
            .setup
            .instrument
            .group(group as usize)
            .map(|g| g.elements.len())
        else {
            log::info!("[MODEL] No group {}, ignoring", group);
            return;
        };
        let instrument = self.setup.instrument.clone();
        let cleared: Vec<u8> = (0..count)
            .filter(|&index| {
                let events = instrument.element_events(group as usize, index, false);
                self.write_events(&events)
            })
            .map(|index| index as u8)
            .collect();

        if cleared.len() == count {
            self.outbox.post(Tag::ToIface, Message::GroupClear { group });
        } else {
            // Elements whose events were dropped keep sounding, so keep their bits
            for ifelm in cleared {
                self.outbox
                    .post(Tag::ToIface, Message::IfelmClear { group, ifelm });
            }
        }
    }

    // Routing and gain

    fn route_midi(&mut self, channel: u8, division: u8, enabled: bool) {
        if self.state() == ModelState::Degraded {
            return;
        }
        let Some(spec) = self.setup.instrument.divisions.get(division as usize) else {
            log::info!("[MODEL] No division {}, ignoring routing", division);
            return;
        };
        let keyboard = spec.keyboard;
        if !self
            .setup
            .midimap
            .set_division_routing(channel as usize, division, keyboard, enabled)
        {
            log::warn!("[MODEL] Invalid MIDI channel {}", channel);
            return;
        }
        let map = self.setup.midimap;
        self.outbox.post(Tag::ToMidi, Message::MidiChannelConfig(map));
        self.outbox.post(Tag::ToIface, Message::MidiChannelConfig(map));
    }

    fn set_gain(&mut self, division: u8, gain: f32) {
        if !self.accepting("division gain") {
            return;
        }
        let gain = gain.clamp(0.0, 1.0);
        let Some(event) = self.setup.instrument.gain_event(division as usize, gain) else {
            log::info!("[MODEL] No division {}, ignoring gain", division);
            return;
        };
        if self.write_events(&[event]) {
            self.outbox
                .post(Tag::ToIface, Message::DivisionGain { division, gain });
        }
    }

    // MIDI control

    fn drain_midi(&mut self) {
        while self.midi.available_to_read() >= 3 {
            let (Some(status), Some(data1), Some(data2)) =
                (self.midi.read(), self.midi.read(), self.midi.read())
            else {
                break;
            };
            self.midi_control(control::decode([status, data1, data2]));
        }
    }

    fn midi_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::SelectIfelmMode { group, mode } => {
                self.selector.select(group, mode);
                if mode == IfelmMode::ClearGroup {
                    self.clear_group(group);
                }
            }
            ControlMessage::Ifelm { index } => {
                if let Some((group, on)) = self.selector.target() {
                    self.set_element(group, index, on);
                }
            }
            ControlMessage::AllNotesOff { channel } => {
                let mask = self.setup.midimap.keyboard_mask(channel as usize);
                if mask != 0 {
                    self.write_events(&[PackedEvent::new(Opcode::AllKeysOff, 0, 0, mask)]);
                }
            }
            ControlMessage::ProgramChange { channel, program } => {
                log::info!(
                    "[MODEL] Program change {} on channel {} (presets not supported)",
                    program,
                    channel
                );
            }
            ControlMessage::Other {
                status,
                data1,
                data2,
            } => {
                log::debug!(
                    "[MODEL] Unhandled MIDI {:02x} {:02x} {:02x}",
                    status,
                    data1,
                    data2
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{event_queue, DIVISION_BIT};
    use crate::itc::RouterBuilder;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        control: Outbox,
        audio: Outbox,
        iface: Outbox,
        slave: Outbox,
        iface_box: Mailbox,
        slave_box: Mailbox,
        midi_box: Mailbox,
        comm: EventConsumer<u32>,
        midi: EventProducer<u8>,
        status: Arc<ModelStatus>,
        retuning: Arc<RetuneTracker>,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn start(instrument: Instrument, storage_ok: bool) -> Self {
            Self::with_comm_capacity(instrument, storage_ok, 64)
        }

        fn with_comm_capacity(instrument: Instrument, storage_ok: bool, comm_capacity: usize) -> Self {
            let mut wiring = RouterBuilder::new();
            for source in [Endpoint::Control, Endpoint::Audio, Endpoint::Iface, Endpoint::Slave] {
                wiring.connect(source, Tag::ToModel, Endpoint::Model).unwrap();
            }
            wiring
                .connect(Endpoint::Model, Tag::ToIface, Endpoint::Iface)
                .unwrap()
                .connect(Endpoint::Model, Tag::ToSlave, Endpoint::Slave)
                .unwrap()
                .connect(Endpoint::Model, Tag::ToMidi, Endpoint::Midi)
                .unwrap()
                .connect(Endpoint::Control, Tag::Exit, Endpoint::Model)
                .unwrap();
            let mut router = wiring.build();

            let (comm_tx, comm) = event_queue(comm_capacity);
            let (midi, midi_rx) = event_queue(64);
            let status = Arc::new(ModelStatus::default());
            let retuning = Arc::new(RetuneTracker::default());
            let setup = ModelSetup {
                midimap: MidiMap::one_to_one(instrument.keyboards.len(), instrument.n_divisions()),
                instrument: Arc::new(instrument),
                tuning: Tuning::default(),
                sample_rate: 48000,
                storage_ok,
            };
            let handle = Model::new(
                router.take_mailbox(Endpoint::Model).unwrap(),
                router.outbox(Endpoint::Model),
                setup,
                comm_tx,
                midi_rx,
                status.clone(),
                retuning.clone(),
            )
            .spawn()
            .unwrap();

            Self {
                control: router.outbox(Endpoint::Control),
                audio: router.outbox(Endpoint::Audio),
                iface: router.outbox(Endpoint::Iface),
                slave: router.outbox(Endpoint::Slave),
                iface_box: router.take_mailbox(Endpoint::Iface).unwrap(),
                slave_box: router.take_mailbox(Endpoint::Slave).unwrap(),
                midi_box: router.take_mailbox(Endpoint::Midi).unwrap(),
                comm,
                midi,
                status,
                retuning,
                handle,
            }
        }

        fn next_recompute(&self) -> Tuning {
            match self.slave_box.recv_timeout(WAIT) {
                Some(Incoming::Message {
                    message: Message::Recompute(request),
                    ..
                }) => request.tuning,
                _ => panic!("expected recompute"),
            }
        }

        fn retuning_done(&self, tuning: Tuning) {
            self.slave
                .send(Tag::ToModel, Message::RetuningDone { tuning, ok: true })
                .unwrap();
        }

        fn next_iface(&self) -> Message {
            match self.iface_box.recv_timeout(WAIT) {
                Some(Incoming::Message { message, .. }) => message,
                _ => panic!("nothing arrived at iface"),
            }
        }

        /// Answer the load handshake the way observer, slave and audio do
        fn complete_load(&self) {
            assert!(matches!(self.next_iface(), Message::Init(_)));
            assert!(matches!(
                self.slave_box.recv_timeout(WAIT),
                Some(Incoming::Message {
                    message: Message::Recompute(_),
                    ..
                })
            ));
            self.iface.send(Tag::ToModel, Message::Ack(Endpoint::Iface)).unwrap();
            self.audio.send(Tag::ToModel, Message::Ack(Endpoint::Audio)).unwrap();
            self.slave
                .send(
                    Tag::ToModel,
                    Message::RetuningDone {
                        tuning: Tuning::default(),
                        ok: true,
                    },
                )
                .unwrap();
            assert!(matches!(self.next_iface(), Message::Ready));
            assert_eq!(self.status.get(), ModelState::Ready);
        }

        fn stop(self) {
            self.control.broadcast_exit();
            self.handle.join().unwrap();
        }
    }

    #[test]
    fn test_load_handshake_reaches_ready() {
        let h = Harness::start(Instrument::default_organ(), true);
        h.complete_load();
        assert!(matches!(
            h.midi_box.recv_timeout(WAIT),
            Some(Incoming::Message {
                message: Message::MidiChannelConfig(_),
                ..
            })
        ));
        h.stop();
    }

    #[test]
    fn test_ready_waits_for_initial_tables() {
        let h = Harness::start(Instrument::default_organ(), true);
        assert!(matches!(h.next_iface(), Message::Init(_)));
        assert_eq!(h.next_recompute(), Tuning::default());
        assert!(h.retuning.is_retuning());

        h.iface.send(Tag::ToModel, Message::Ack(Endpoint::Iface)).unwrap();
        h.audio.send(Tag::ToModel, Message::Ack(Endpoint::Audio)).unwrap();
        assert!(h.iface_box.recv_timeout(Duration::from_millis(50)).is_none());
        assert_eq!(h.status.get(), ModelState::Loading);

        h.retuning_done(Tuning::default());
        assert!(matches!(h.next_iface(), Message::Ready));
        assert!(!h.retuning.is_retuning());
        h.stop();
    }

    #[test]
    fn test_missing_storage_degrades() {
        let h = Harness::start(Instrument::default_organ(), false);
        h.control
            .send(Tag::ToModel, Message::IfelmSet { group: 0, ifelm: 0 })
            .unwrap();
        h.control
            .send(Tag::ToModel, Message::Retune(Tuning::default()))
            .unwrap();
        assert!(h.iface_box.recv_timeout(Duration::from_millis(100)).is_none());
        assert!(h.slave_box.try_recv().is_none());
        assert_eq!(h.status.get(), ModelState::Degraded);
        h.stop();
    }

    #[test]
    fn test_instrument_without_divisions_degrades() {
        let empty = Instrument::new("Empty", vec![], vec![]).unwrap();
        let h = Harness::start(empty, true);
        assert!(h.iface_box.recv_timeout(Duration::from_millis(100)).is_none());
        assert_eq!(h.status.get(), ModelState::Degraded);
        h.stop();
    }

    #[test]
    fn test_element_change_writes_events_then_notifies() {
        let mut h = Harness::start(Instrument::default_organ(), true);
        h.complete_load();

        h.control
            .send(Tag::ToModel, Message::IfelmSet { group: 0, ifelm: 0 })
            .unwrap();
        assert!(matches!(
            h.next_iface(),
            Message::IfelmSet { group: 0, ifelm: 0 }
        ));
        let event = PackedEvent::decode(h.comm.read().unwrap()).unwrap();
        assert_eq!(event, PackedEvent::rank_mask(0, 0, DIVISION_BIT, true));

        // Element 31 does not exist: nothing is written or forwarded
        h.control
            .send(Tag::ToModel, Message::IfelmSet { group: 0, ifelm: 31 })
            .unwrap();
        h.control
            .send(Tag::ToModel, Message::IfelmClear { group: 0, ifelm: 0 })
            .unwrap();
        assert!(matches!(
            h.next_iface(),
            Message::IfelmClear { group: 0, ifelm: 0 }
        ));
        let event = PackedEvent::decode(h.comm.read().unwrap()).unwrap();
        assert_eq!(event, PackedEvent::rank_mask(0, 0, DIVISION_BIT, false));
        assert_eq!(h.comm.read(), None);
        h.stop();
    }

    #[test]
    fn test_retunes_are_validated_and_serialised() {
        let h = Harness::start(Instrument::default_organ(), true);
        h.complete_load();

        h.control
            .send(Tag::ToModel, Message::Retune(Tuning { temperament: 0, base_frequency: 300.0 }))
            .unwrap();
        let first = Tuning::new(0, 415.0).unwrap();
        let second = Tuning::new(2, 440.0).unwrap();
        h.control.send(Tag::ToModel, Message::Retune(first)).unwrap();
        h.control.send(Tag::ToModel, Message::Retune(second)).unwrap();

        assert!(matches!(h.next_iface(), Message::Retune(t) if t == first));
        let recompute = |h: &Harness| match h.slave_box.recv_timeout(WAIT) {
            Some(Incoming::Message {
                message: Message::Recompute(request),
                ..
            }) => request.tuning,
            _ => panic!("expected recompute"),
        };
        assert_eq!(recompute(&h), first);
        // The second request waits for the first to finish
        assert!(h.slave_box.recv_timeout(Duration::from_millis(50)).is_none());

        h.slave
            .send(Tag::ToModel, Message::RetuningDone { tuning: first, ok: true })
            .unwrap();
        assert!(matches!(
            h.next_iface(),
            Message::RetuningDone { ok: true, .. }
        ));
        assert!(matches!(h.next_iface(), Message::Retune(t) if t == second));
        assert_eq!(recompute(&h), second);
        h.stop();
    }

    #[test]
    fn test_queued_retune_keeps_flag_raised() {
        let h = Harness::start(Instrument::default_organ(), true);
        h.complete_load();
        assert!(!h.retuning.is_retuning());

        let first = Tuning::new(0, 415.0).unwrap();
        let replaced = Tuning::new(1, 430.0).unwrap();
        let last = Tuning::new(2, 440.0).unwrap();
        for tuning in [first, replaced, last] {
            h.retuning.begin();
            h.control.send(Tag::ToModel, Message::Retune(tuning)).unwrap();
        }
        assert!(matches!(h.next_iface(), Message::Retune(t) if t == first));
        assert_eq!(h.next_recompute(), first);

        // The newest queued request replaces the older one
        h.retuning_done(first);
        assert!(matches!(h.next_iface(), Message::RetuningDone { tuning, .. } if tuning == first));
        assert!(matches!(h.next_iface(), Message::Retune(t) if t == last));
        assert!(h.retuning.is_retuning());
        assert_eq!(h.next_recompute(), last);
        assert!(h.retuning.is_retuning());

        h.retuning_done(last);
        assert!(matches!(h.next_iface(), Message::RetuningDone { tuning, .. } if tuning == last));
        assert!(!h.retuning.is_retuning());
        h.stop();
    }

    #[test]
    fn test_group_clear_reports_only_queued_clears() {
        let mut h = Harness::with_comm_capacity(Instrument::default_organ(), true, 8);
        h.complete_load();

        // Three single-rank stops take three slots
        for ifelm in 0..3 {
            h.control
                .send(Tag::ToModel, Message::IfelmSet { group: 0, ifelm })
                .unwrap();
            assert!(matches!(h.next_iface(), Message::IfelmSet { .. }));
        }

        // Five slots left: the three-rank mixture does not fit after the
        // first three clears, the coupler and tremulant still do
        h.control
            .send(Tag::ToModel, Message::GroupClear { group: 0 })
            .unwrap();
        let mut cleared = Vec::new();
        while let Some(Incoming::Message { message, .. }) =
            h.iface_box.recv_timeout(Duration::from_millis(100))
        {
            match message {
                Message::IfelmClear { group: 0, ifelm } => cleared.push(ifelm),
                other => panic!("unexpected {}", other.kind()),
            }
        }
        assert_eq!(cleared, vec![0, 1, 2, 4, 5]);
        assert_eq!(h.comm.available_to_read(), 8);

        h.comm.drain(|_| {});
        h.control
            .send(Tag::ToModel, Message::GroupClear { group: 0 })
            .unwrap();
        assert!(matches!(h.next_iface(), Message::GroupClear { group: 0 }));
        h.stop();
    }

    #[test]
    fn test_midi_control_switches_elements() {
        let mut h = Harness::start(Instrument::default_organ(), true);
        h.complete_load();

        // Select "set" on group 1, then switch element 2 on
        h.midi.write_all(&[0xB0, 98, 0b0111_0001]).unwrap();
        h.midi.write_all(&[0xB0, 98, 2]).unwrap();
        h.midi.write_all(&[0xB1, 123, 0]).unwrap();
        h.control.send(Tag::ToModel, Message::MidiPending).unwrap();

        assert!(matches!(
            h.next_iface(),
            Message::IfelmSet { group: 1, ifelm: 2 }
        ));
        // All-notes-off is written after the observer was notified
        let deadline = std::time::Instant::now() + WAIT;
        while h.comm.available_to_read() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        let mut events = Vec::new();
        h.comm.drain(|w| events.extend(PackedEvent::decode(w)));
        assert_eq!(events.len(), 2);
        let last = events.last().copied().unwrap();
        assert_eq!(last.opcode, Opcode::AllKeysOff);
        assert_eq!(last.mask, 0b10);
        h.stop();
    }
}
