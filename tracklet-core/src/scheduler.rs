//! Periodic flush timer for batch mode

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::recorder::EventRecorder;

/// Owns the background task that flushes the pending queue on a fixed
/// interval. Restartable, so a configuration update can rearm it with a
/// new interval.
#[derive(Default)]
pub struct FlushScheduler {
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    pub fn new() -> Self {
        FlushScheduler { handle: None }
    }

    /// Start (or restart) the periodic flush. Ticks that pile up while a
    /// flush is still running are skipped, not replayed.
    pub fn start(&mut self, recorder: Arc<EventRecorder>, interval: Duration) {
        self.stop();
        debug!(interval_ms = interval.as_millis() as u64, "starting flush timer");
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the first
            // flush happens one interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                recorder.flush_events().await;
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("stopping flush timer");
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
