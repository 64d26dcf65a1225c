//! RT-safe deferred deallocation for tuning sets
//!
//! When the render thread installs a new [`TuningSet`](super::TuningSet)
//! the previous one is dropped right there, inside the audio callback.
//! Wrapping the sets in `basedrop::Shared` turns that drop into a pointer
//! push; the memory is freed later on the collector thread owned by
//! [`GcThread`].
//!
//! ```ignore
//! let gc = GcThread::spawn()?;
//! let tables = Shared::new(&gc.handle(), tuning_set);
//! // ... hand `tables` to the render thread ...
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use basedrop::{Collector, Handle};

/// Interval between collection passes
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Collector thread, stopped and joined on drop
pub struct GcThread {
    handle: Handle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GcThread {
    pub fn spawn() -> io::Result<Self> {
        // Collector is !Sync, so it is created on its own thread
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = thread::Builder::new()
            .name("organ-gc".to_string())
            .spawn(move || {
                let mut collector = Collector::new();
                if tx.send(collector.handle()).is_err() {
                    return;
                }
                log::debug!("[GC] Collector thread started");

                while flag.load(Ordering::Acquire) {
                    collector.collect();
                    thread::sleep(COLLECT_INTERVAL);
                }
                collector.collect();
                log::debug!("[GC] Collector thread stopped");
            })?;

        let handle = rx.recv().map_err(|_| {
            io::Error::new(io::ErrorKind::Other, "collector thread exited during startup")
        })?;

        Ok(Self {
            handle,
            running,
            thread: Some(thread),
        })
    }

    /// Handle for wrapping values in `Shared<T>`
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[GC] Collector thread panicked");
            }
        }
    }
}

impl Drop for GcThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    #[test]
    fn test_shared_values_are_collected_off_thread() {
        let mut gc = GcThread::spawn().unwrap();
        let value = Shared::new(&gc.handle(), vec![0.0f32; 4096]);
        let clone = value.clone();
        drop(value);
        assert_eq!(clone.len(), 4096);
        drop(clone);
        gc.stop();
        gc.stop();
    }
}
