//! Audio-control thread
//!
//! Non-realtime companion of the render bridge. It receives finished
//! tuning sets from the slave, wraps them for deferred deallocation and
//! hands them to the render thread through a small `rtrb` queue. It also
//! turns the bridge's [`RenderStats`] into log lines, since the callback
//! itself never logs.
//!
//! The handoff queue only drains while the stream runs. When it is full the
//! newest set waits here and replaces any older set still waiting, so the
//! render thread always ends up on the latest tuning once it pops again.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use basedrop::{Handle, Shared};
use rtrb::{Producer, PushError};

use super::RenderStats;
use crate::engine::TuningSet;
use crate::itc::{Endpoint, Incoming, Mailbox, Message, Outbox, Tag};

/// Retry period while a set waits for a free handoff slot
const HANDOFF_RETRY: Duration = Duration::from_millis(5);

/// How often render counters are checked
const REPORT_INTERVAL: Duration = Duration::from_millis(500);

pub struct AudioControl {
    mailbox: Mailbox,
    outbox: Outbox,
    tables: Producer<Shared<TuningSet>>,
    gc: Handle,
    pending: Option<Shared<TuningSet>>,
    delivered: bool,
    reporter: StatsReporter,
}

impl AudioControl {
    pub fn new(
        mailbox: Mailbox,
        outbox: Outbox,
        tables: Producer<Shared<TuningSet>>,
        gc: Handle,
        stats: Arc<RenderStats>,
    ) -> Self {
        Self {
            mailbox,
            outbox,
            tables,
            gc,
            pending: None,
            delivered: false,
            reporter: StatsReporter::new(stats),
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("organ-audio-ctl".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        log::info!("[AUDIO] Control thread started");
        let mut next_report = Instant::now() + REPORT_INTERVAL;
        loop {
            let wait = if self.pending.is_some() {
                HANDOFF_RETRY
            } else {
                next_report.saturating_duration_since(Instant::now())
            };
            match self.mailbox.recv_timeout(wait) {
                Some(Incoming::Exit) => break,
                Some(Incoming::Message {
                    message: Message::Tables(set),
                    ..
                }) => self.accept(*set),
                Some(Incoming::Message { source, message }) => {
                    log::debug!("[AUDIO] Ignoring {} from {}", message.kind(), source);
                }
                None => {}
            }
            self.flush();
            if Instant::now() >= next_report {
                self.reporter.report();
                next_report = Instant::now() + REPORT_INTERVAL;
            }
        }
        self.reporter.report();
        self.mailbox.discard_pending();
        log::info!("[AUDIO] Control thread stopped");
    }

    fn accept(&mut self, set: TuningSet) {
        let label = set.tuning.temperament().label;
        if let Some(older) = self.pending.replace(Shared::new(&self.gc, set)) {
            log::debug!(
                "[AUDIO] Tables for {} superseded before reaching the render thread",
                older.tuning.temperament().label
            );
        }
        if !self.flush() {
            log::debug!("[AUDIO] Handoff queue full, holding tables for {}", label);
        }
    }

    /// Push the waiting set, if any; false while it is still waiting
    fn flush(&mut self) -> bool {
        let Some(set) = self.pending.take() else {
            return true;
        };
        match self.tables.push(set) {
            Ok(()) => {
                log::debug!("[AUDIO] Queued tables for the render thread");
                if !self.delivered {
                    // The model waits for the first set before it reports ready
                    self.delivered = true;
                    self.outbox.post(Tag::ToModel, Message::Ack(Endpoint::Audio));
                }
                true
            }
            Err(PushError::Full(set)) => {
                self.pending = Some(set);
                false
            }
        }
    }
}

/// Changes in the render counters since the last check
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct StatsDelta {
    overruns: u64,
    reallocated: bool,
}

/// Reports what the render thread counted
struct StatsReporter {
    stats: Arc<RenderStats>,
    overruns: u64,
    reallocations: u64,
}

impl StatsReporter {
    fn new(stats: Arc<RenderStats>) -> Self {
        Self {
            stats,
            overruns: 0,
            reallocations: 0,
        }
    }

    fn poll(&mut self) -> StatsDelta {
        let overruns = self.stats.overruns();
        let reallocations = self.stats.reallocations();
        let delta = StatsDelta {
            overruns: overruns.saturating_sub(self.overruns),
            reallocated: reallocations != self.reallocations,
        };
        self.overruns = overruns;
        self.reallocations = reallocations;
        delta
    }

    fn report(&mut self) {
        let delta = self.poll();
        if delta.reallocated {
            let (frames, channels) = self.stats.negotiated();
            log::info!(
                "[AUDIO] Render buffers now {} frames x {} channels",
                frames,
                channels
            );
        }
        if delta.overruns > 0 {
            log::warn!(
                "[AUDIO] {} render overruns, last took {:.2}ms",
                delta.overruns,
                self.stats.last_overrun_us() as f64 / 1000.0
            );
        }
    }
}
