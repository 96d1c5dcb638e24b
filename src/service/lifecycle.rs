//! Startup and shutdown coordination.

use super::ConversionService;
use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often shutdown checks for in-flight conversions
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl ConversionService {
    /// Start the worker pool, claim reaper and retention sweeper
    ///
    /// The returned handles finish after [`ConversionService::shutdown`].
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self.start_workers();
        handles.push(self.start_reaper());
        handles.push(self.start_sweeper());

        tracing::info!(
            workers = self.config.workers.count,
            conversions = self.converters.len(),
            "Conversion service started"
        );
        handles
    }

    /// Gracefully shut down the service
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting submissions
    /// 2. Signals the workers, reaper and sweeper to stop
    /// 3. Waits up to `workers.shutdown_timeout` for in-flight conversions
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Tasks still processing when the timeout elapses keep their claim; the
    /// reaper of the next run takes them back once the lease expires.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new submissions
        self.workers.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new submissions");

        // 2. Stop background loops at their next wait
        self.workers.shutdown.cancel();

        // 3. Wait for in-flight conversions with timeout
        let shutdown_timeout = self.config.workers.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, self.wait_for_active_conversions()).await {
            Ok(()) => {
                tracing::info!("All in-flight conversions finished");
            }
            Err(_) => {
                let remaining = self.workers.active.lock().await.len();
                tracing::warn!(
                    remaining,
                    "Timeout waiting for conversions to finish, proceeding with shutdown"
                );
            }
        }

        // 4. Emit shutdown event
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_conversions(&self) {
        loop {
            let active_count = self.workers.active.lock().await.len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for in-flight conversions");
            tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
        }
    }
}
