//! Background recompute thread
//!
//! Builds a [`TuningSet`] whenever the model asks for one: at load time and
//! after every accepted retune. Ranks are generated in parallel on a
//! private rayon pool and cached on disk when a storage root is available.
//!
//! ```text
//!  Model ──Recompute──► Slave ──Tables──────► Audio control ──rtrb──► render
//!                         └────RetuningDone──► Model
//! ```
//!
//! Every request is answered with exactly one done notification, failures
//! included, so the model can resolve its outstanding retunes.

pub mod cache;

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;

use crate::engine::{RankTable, TuningSet};
use crate::instrument::{Instrument, RankSpec, Tuning};
use crate::itc::{Incoming, Mailbox, Message, Outbox, RecomputeRequest, Tag};

pub use cache::{CacheError, TableKey, WaveCache};

#[derive(Debug, Error)]
pub enum SlaveError {
    #[error("Failed to create recompute thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Wave generation failed for division {division} rank {rank}: {reason}")]
    Generation {
        division: u8,
        rank: u8,
        reason: String,
    },
}

/// Source of single-cycle rank tables
pub trait WaveGenerator: Send + Sync {
    fn generate(
        &self,
        division: u8,
        rank: u8,
        spec: &RankSpec,
        tuning: &Tuning,
        sample_rate: u32,
    ) -> Result<RankTable, SlaveError>;
}

/// Additive synthesis from each rank's harmonic spectrum
#[derive(Debug, Default, Clone, Copy)]
pub struct AdditiveGenerator;

impl WaveGenerator for AdditiveGenerator {
    fn generate(
        &self,
        division: u8,
        rank: u8,
        spec: &RankSpec,
        tuning: &Tuning,
        sample_rate: u32,
    ) -> Result<RankTable, SlaveError> {
        if spec.harmonics.is_empty() {
            return Err(SlaveError::Generation {
                division,
                rank,
                reason: "rank has no harmonics".to_string(),
            });
        }
        Ok(RankTable::generate(division, rank, spec, tuning, sample_rate))
    }
}

pub struct Slave {
    mailbox: Mailbox,
    outbox: Outbox,
    generator: Arc<dyn WaveGenerator>,
    cache: Option<WaveCache>,
    pool: rayon::ThreadPool,
}

impl Slave {
    pub fn new(
        mailbox: Mailbox,
        outbox: Outbox,
        generator: Arc<dyn WaveGenerator>,
        cache: Option<WaveCache>,
    ) -> Result<Self, SlaveError> {
        let threads = thread::available_parallelism()
            .map(|n| n.get().clamp(1, 4))
            .unwrap_or(2);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("organ-wave-{}", i))
            .build()?;
        Ok(Self {
            mailbox,
            outbox,
            generator,
            cache,
            pool,
        })
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("organ-slave".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        log::info!("[SLAVE] Recompute thread started");
        loop {
            match self.mailbox.recv() {
                Incoming::Exit => break,
                Incoming::Message {
                    message: Message::Recompute(request),
                    ..
                } => self.recompute(*request),
                Incoming::Message { source, message } => {
                    log::debug!("[SLAVE] Ignoring {} from {}", message.kind(), source);
                }
            }
        }
        let dropped = self.mailbox.discard_pending();
        if dropped > 0 {
            log::debug!("[SLAVE] Discarded {} pending requests on exit", dropped);
        }
        log::info!("[SLAVE] Recompute thread stopped");
    }

    fn recompute(&self, request: RecomputeRequest) {
        let tuning = request.tuning;
        let start = Instant::now();

        let ok = match self.build(&request) {
            Ok(set) => {
                log::info!(
                    "[SLAVE] Built {} rank tables for {} at {:.1} Hz in {:.1}ms",
                    set.n_ranks(),
                    tuning.temperament().label,
                    tuning.base_frequency,
                    start.elapsed().as_secs_f64() * 1000.0
                );
                self.outbox.post(Tag::ToAudio, Message::Tables(Box::new(set)));
                true
            }
            Err(e) => {
                log::error!("[SLAVE] Recompute failed, keeping previous tuning: {}", e);
                false
            }
        };

        self.outbox
            .post(Tag::ToModel, Message::RetuningDone { tuning, ok });
    }

    fn build(&self, request: &RecomputeRequest) -> Result<TuningSet, SlaveError> {
        let instrument: &Instrument = &request.instrument;
        let divisions = self.pool.install(|| {
            instrument
                .divisions
                .par_iter()
                .enumerate()
                .map(|(d, division)| {
                    division
                        .ranks
                        .par_iter()
                        .enumerate()
                        .map(|(r, spec)| self.rank_table(d as u8, r as u8, spec, request))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        Ok(TuningSet {
            tuning: request.tuning,
            sample_rate: request.sample_rate,
            divisions,
        })
    }

    fn rank_table(
        &self,
        division: u8,
        rank: u8,
        spec: &RankSpec,
        request: &RecomputeRequest,
    ) -> Result<RankTable, SlaveError> {
        let key = TableKey {
            division,
            rank,
            label: &spec.label,
            tuning: &request.tuning,
            sample_rate: request.sample_rate,
        };

        if let Some(cache) = &self.cache {
            match cache.load(&key) {
                Ok(Some(samples)) => {
                    return Ok(RankTable::with_samples(
                        division,
                        rank,
                        samples,
                        spec,
                        &request.tuning,
                        request.sample_rate,
                    ));
                }
                Ok(None) => {}
                Err(e) => log::warn!("[SLAVE] Ignoring cached table: {}", e),
            }
        }

        let table = self.generator.generate(
            division,
            rank,
            spec,
            &request.tuning,
            request.sample_rate,
        )?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&key, &table.samples) {
                log::warn!("[SLAVE] Could not cache table: {}", e);
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itc::{Endpoint, RouterBuilder};
    use std::time::Duration;

    struct FailingGenerator;

    impl WaveGenerator for FailingGenerator {
        fn generate(
            &self,
            division: u8,
            rank: u8,
            _spec: &RankSpec,
            _tuning: &Tuning,
            _sample_rate: u32,
        ) -> Result<RankTable, SlaveError> {
            Err(SlaveError::Generation {
                division,
                rank,
                reason: "test".to_string(),
            })
        }
    }

    struct Harness {
        control: Outbox,
        model: Outbox,
        model_box: Mailbox,
        audio_box: Mailbox,
        handle: JoinHandle<()>,
    }

    fn start(generator: Arc<dyn WaveGenerator>, cache: Option<WaveCache>) -> Harness {
        let mut wiring = RouterBuilder::new();
        wiring
            .connect(Endpoint::Model, Tag::ToSlave, Endpoint::Slave)
            .unwrap()
            .connect(Endpoint::Slave, Tag::ToModel, Endpoint::Model)
            .unwrap()
            .connect(Endpoint::Slave, Tag::ToAudio, Endpoint::Audio)
            .unwrap()
            .connect(Endpoint::Control, Tag::Exit, Endpoint::Slave)
            .unwrap();
        let mut router = wiring.build();
        let slave = Slave::new(
            router.take_mailbox(Endpoint::Slave).unwrap(),
            router.outbox(Endpoint::Slave),
            generator,
            cache,
        )
        .unwrap();
        Harness {
            control: router.outbox(Endpoint::Control),
            model: router.outbox(Endpoint::Model),
            model_box: router.take_mailbox(Endpoint::Model).unwrap(),
            audio_box: router.take_mailbox(Endpoint::Audio).unwrap(),
            handle: slave.spawn().unwrap(),
        }
    }

    fn request(tuning: Tuning) -> Message {
        Message::Recompute(Box::new(RecomputeRequest {
            instrument: Arc::new(Instrument::default_organ()),
            tuning,
            sample_rate: 48000,
        }))
    }

    #[test]
    fn test_recompute_sends_tables_then_done() {
        let dir = tempfile::tempdir().unwrap();
        let h = start(Arc::new(AdditiveGenerator), Some(WaveCache::new(dir.path())));
        let tuning = Tuning::new(0, 415.0).unwrap();
        h.model.send(Tag::ToSlave, request(tuning)).unwrap();

        match h.audio_box.recv_timeout(Duration::from_secs(10)) {
            Some(Incoming::Message {
                message: Message::Tables(set),
                ..
            }) => {
                assert_eq!(set.tuning, tuning);
                assert_eq!(set.divisions.len(), 3);
                assert_eq!(set.divisions[0].len(), 6);
            }
            _ => panic!("expected tables"),
        }
        match h.model_box.recv_timeout(Duration::from_secs(10)) {
            Some(Incoming::Message {
                message: Message::RetuningDone { ok, .. },
                ..
            }) => assert!(ok),
            _ => panic!("expected retuning done"),
        }
        // Every rank landed in the cache
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 12);

        h.control.broadcast_exit();
        h.handle.join().unwrap();
    }

    #[test]
    fn test_failure_still_reports_done() {
        let h = start(Arc::new(FailingGenerator), None);
        h.model.send(Tag::ToSlave, request(Tuning::default())).unwrap();

        match h.model_box.recv_timeout(Duration::from_secs(10)) {
            Some(Incoming::Message {
                message: Message::RetuningDone { ok, .. },
                ..
            }) => assert!(!ok),
            _ => panic!("expected retuning done"),
        }
        assert!(h.audio_box.try_recv().is_none());

        h.control.broadcast_exit();
        h.handle.join().unwrap();
    }
}
