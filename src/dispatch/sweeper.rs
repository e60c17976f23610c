//! Background release sweeper.
//!
//! Spawns a thread that periodically returns callbacks held past the
//! assignment timeout to the queue, so work claimed by a provider who
//! disappeared is picked up again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::service::DispatchService;

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(250);

/// Handle for the sweeper thread. Dropping it stops and joins the thread.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request graceful shutdown. A sweep in progress completes first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                tracing::error!("Release sweeper thread panicked");
            }
        }
    }
}

pub fn start_release_sweeper(service: Arc<DispatchService>, interval: Duration) -> SweeperHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Release sweeper started");
        sweeper_loop(&service, interval, &flag);
        tracing::info!("Release sweeper stopped");
    });

    SweeperHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn sweeper_loop(service: &DispatchService, interval: Duration, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        let mut slept = Duration::ZERO;
        while slept < interval {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let step = SLEEP_GRANULARITY.min(interval - slept);
            std::thread::sleep(step);
            slept += step;
        }

        match service.release_expired() {
            Ok(0) => {}
            Ok(released) => tracing::info!(released, "Expired assignments returned to queue"),
            Err(e) => tracing::warn!(error = %e, "Release sweep failed"),
        }
    }
}
