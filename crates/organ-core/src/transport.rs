//! Start/stop of the audio stream
//!
//! The playing flag can be flipped by the control surface and by
//! application lifecycle events at the same time. Both are rare and far
//! from the realtime path, so a plain mutex guards the flag together with
//! the host it controls.

use std::sync::Mutex;

use crate::audio::AudioResult;

/// Something that can start and pause an output stream
pub trait AudioHost {
    fn play(&mut self) -> AudioResult<()>;
    fn pause(&mut self) -> AudioResult<()>;
}

struct TransportState<H> {
    playing: bool,
    host: H,
}

/// Mutex-guarded play state of an [`AudioHost`]
pub struct Transport<H: AudioHost> {
    state: Mutex<TransportState<H>>,
}

impl<H: AudioHost> Transport<H> {
    /// Wrap a host that is currently paused
    pub fn new(host: H) -> Self {
        Self {
            state: Mutex::new(TransportState {
                playing: false,
                host,
            }),
        }
    }

    /// Start the stream; a no-op when already playing
    pub fn play(&self) -> AudioResult<()> {
        self.set_playing(true)
    }

    /// Pause the stream; a no-op when already stopped
    pub fn stop(&self) -> AudioResult<()> {
        self.set_playing(false)
    }

    pub fn is_playing(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state.playing,
            Err(poisoned) => poisoned.into_inner().playing,
        }
    }

    fn set_playing(&self, playing: bool) -> AudioResult<()> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.playing == playing {
            return Ok(());
        }
        if playing {
            state.host.play()?;
        } else {
            state.host.pause()?;
        }
        state.playing = playing;
        log::info!("[AUDIO] Transport {}", if playing { "playing" } else { "stopped" });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct CountingHost {
        plays: Arc<AtomicUsize>,
        pauses: Arc<AtomicUsize>,
        fail: bool,
    }

    impl AudioHost for CountingHost {
        fn play(&mut self) -> AudioResult<()> {
            if self.fail {
                return Err(AudioError::StreamControlError("device gone".to_string()));
            }
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn pause(&mut self) -> AudioResult<()> {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_play_and_stop_only_act_on_change() {
        let host = CountingHost::default();
        let plays = host.plays.clone();
        let pauses = host.pauses.clone();
        let transport = Transport::new(host);

        transport.stop().unwrap();
        assert_eq!(pauses.load(Ordering::SeqCst), 0);

        transport.play().unwrap();
        transport.play().unwrap();
        assert!(transport.is_playing());
        assert_eq!(plays.load(Ordering::SeqCst), 1);

        transport.stop().unwrap();
        assert!(!transport.is_playing());
        assert_eq!(pauses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_play_leaves_transport_stopped() {
        let transport = Transport::new(CountingHost {
            fail: true,
            ..Default::default()
        });
        assert!(transport.play().is_err());
        assert!(!transport.is_playing());
    }

    #[test]
    fn test_concurrent_toggles_keep_flag_consistent() {
        let host = CountingHost::default();
        let plays = host.plays.clone();
        let pauses = host.pauses.clone();
        let transport = Arc::new(Transport::new(host));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let transport = transport.clone();
                thread::spawn(move || {
                    for n in 0..200 {
                        if (n + i) % 2 == 0 {
                            transport.play().unwrap();
                        } else {
                            transport.stop().unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let plays = plays.load(Ordering::SeqCst);
        let pauses = pauses.load(Ordering::SeqCst);
        // Every transition alternates, so the counts differ by the final state
        assert_eq!(plays - pauses, transport.is_playing() as usize);
    }
}
