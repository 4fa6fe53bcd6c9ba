//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Runtime helpers supporting the gateway bridge."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Recurring job with a fixed delay between the end of one run and the start of the next.
///
/// Runs never overlap: a slow run simply pushes the next one back.
#[derive(Debug, Clone)]
pub struct FixedDelaySchedule {
    name: String,
    initial_delay: Duration,
    delay: Duration,
}

impl FixedDelaySchedule {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            initial_delay: Duration::ZERO,
            delay,
        }
    }

    /// Delay before the first run.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Spawn the loop on the current tokio runtime.
    ///
    /// A run in flight when shutdown is requested is dropped at its next await point.
    pub fn spawn<F, Fut>(self, mut job: F) -> ScheduleHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let name = self.name.clone();
        let initial_delay = self.initial_delay;
        let delay = self.delay;

        let task = tokio::spawn(async move {
            debug!(schedule = %name, delay_ms = delay.as_millis() as u64, "schedule started");
            if wait_or_shutdown(&mut shutdown_rx, initial_delay).await {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => break,
                        _ = job() => {}
                    }
                    if !wait_or_shutdown(&mut shutdown_rx, delay).await {
                        break;
                    }
                }
            }
            debug!(schedule = %name, "schedule stopped");
        });

        ScheduleHandle {
            name: self.name,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Sleep for `delay` unless shutdown is signalled first. Returns false on shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        _ = shutdown.changed() => false,
        _ = sleep(delay) => true,
    }
}

/// Cancellation handle returned by [`FixedDelaySchedule::spawn`].
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct ScheduleHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Cancel and wait until the loop has exited; no run executes after this returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(schedule = %self.name, error = %err, "scheduled task terminated abnormally");
        }
    }
}
