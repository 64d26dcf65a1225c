//! State observer thread
//!
//! Consumes the model's notifications and publishes them through
//! [`ObserverState`]. This thread is the only writer of the activation
//! masks; requests to change them may come from anywhere but always arrive
//! here as messages, in send order per sender.

mod state;

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::instrument::{ElementKind, Instrument, Tuning};
use crate::itc::{Endpoint, Incoming, InterfaceInit, Mailbox, Message, Outbox, Tag};

pub use state::ObserverState;

/// Callbacks invoked on the observer thread
///
/// Implementations must return quickly; they delay every later
/// notification.
pub trait StateListener: Send + Sync {
    /// A division's activation mask changed
    fn on_active_stops_changed(&self, _division: usize, _mask: u32) {}

    /// The instrument finished loading
    fn on_load_complete(&self) {}

    /// A retune cycle finished; `ok` is false if the old tuning was kept
    fn on_retuned(&self, _tuning: Tuning, _ok: bool) {}
}

pub struct Observer {
    mailbox: Mailbox,
    outbox: Outbox,
    state: Arc<ObserverState>,
    listener: Option<Arc<dyn StateListener>>,
}

impl Observer {
    pub fn new(
        mailbox: Mailbox,
        outbox: Outbox,
        state: Arc<ObserverState>,
        listener: Option<Arc<dyn StateListener>>,
    ) -> Self {
        Self {
            mailbox,
            outbox,
            state,
            listener,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("organ-iface".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        log::info!("[IFACE] Observer thread started");
        loop {
            match self.mailbox.recv() {
                Incoming::Exit => break,
                Incoming::Message { message, .. } => self.handle(message),
            }
        }
        self.mailbox.discard_pending();
        log::info!("[IFACE] Observer thread stopped");
    }

    fn handle(&self, message: Message) {
        match message {
            Message::Init(init) => self.init(*init),
            Message::Ready => {
                if self.state.finish_initializing() {
                    self.log_summary();
                    if let Some(listener) = &self.listener {
                        listener.on_load_complete();
                    }
                }
            }
            Message::IfelmSet { group, ifelm } => {
                self.change_mask(group as usize, |m| m | bit(ifelm));
            }
            Message::IfelmClear { group, ifelm } => {
                self.change_mask(group as usize, |m| m & !bit(ifelm));
            }
            Message::GroupClear { group } => {
                self.change_mask(group as usize, |_| 0);
            }
            Message::Retune(tuning) => {
                log::info!(
                    "[IFACE] Retuning to {} at {:.1} Hz",
                    tuning.temperament().label,
                    tuning.base_frequency
                );
            }
            Message::RetuningDone { tuning, ok } => {
                if ok {
                    self.state.set_tuning(tuning);
                    log::info!("[IFACE] Retuned to {}", tuning.temperament().label);
                } else {
                    log::warn!("[IFACE] Retune failed, tuning unchanged");
                }
                self.state.count_retune();
                if let Some(listener) = &self.listener {
                    listener.on_retuned(tuning, ok);
                }
            }
            Message::MidiChannelConfig(map) => self.state.set_midimap(&map),
            Message::DivisionGain { division, gain } => {
                self.state.set_division_gain(division as usize, gain);
            }
            other => log::debug!("[IFACE] Ignoring {}", other.kind()),
        }
    }

    fn init(&self, init: InterfaceInit) {
        self.state.set_tuning(init.tuning);
        self.state.set_midimap(&init.midimap);
        if !self.state.set_instrument(init.instrument) {
            log::warn!("[IFACE] Instrument already initialised, keeping the first");
        }
        self.outbox
            .post(Tag::ToModel, Message::Ack(Endpoint::Iface));
    }

    fn change_mask(&self, division: usize, f: impl FnOnce(u32) -> u32) {
        if let Some(mask) = self.state.update_mask(division, f) {
            log::debug!("[IFACE] Division {} mask {:#010x}", division, mask);
            if let Some(listener) = &self.listener {
                listener.on_active_stops_changed(division, mask);
            }
        }
    }

    fn log_summary(&self) {
        let Some(instrument) = self.state.instrument() else {
            return;
        };
        log::info!(
            "[IFACE] {} ready: {} divisions, tuning {} at {:.1} Hz",
            instrument.name,
            instrument.n_divisions(),
            self.state.tuning().temperament().label,
            self.state.tuning().base_frequency
        );
        for (d, division) in instrument.divisions.iter().enumerate() {
            log::info!(
                "[IFACE]   {} {:<8} {} stops, {} ranks{}",
                d,
                division.label,
                division.group.count(ElementKind::Stop),
                division.ranks.len(),
                if division.group.count(ElementKind::Tremulant) > 0 {
                    ", tremulant"
                } else {
                    ""
                }
            );
        }
    }
}

fn bit(ifelm: u8) -> u32 {
    1u32.checked_shl(ifelm as u32).unwrap_or(0)
}

/// Number of elements of a kind in a division, 0 before initialisation
pub fn count_elements(
    instrument: Option<&Arc<Instrument>>,
    division: usize,
    kind: ElementKind,
) -> usize {
    instrument
        .and_then(|i| i.group(division))
        .map(|g| g.count(kind))
        .unwrap_or(0)
}
