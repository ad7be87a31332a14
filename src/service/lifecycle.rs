//! Startup recovery and shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::NewsletterService;

impl NewsletterService {
    /// Return interrupted runs to the queue and mark this session as started
    ///
    /// No run executes before the dispatcher starts, so every `running` row is orphaned:
    /// left by a crash, or by a run whose final status write failed. Interrupted runs
    /// keep their succeeded steps, so the engine replays them and continues with the
    /// first unfinished step.
    pub(crate) async fn recover(&self) -> Result<()> {
        let unclean = self.db.was_unclean_shutdown().await?;
        let requeued = self.db.requeue_interrupted_runs().await?;
        if requeued > 0 {
            tracing::warn!(requeued, unclean, "Requeued interrupted runs");
        } else if unclean {
            tracing::info!("Previous session ended uncleanly, no runs were interrupted");
        }

        self.db.set_clean_start().await
    }

    /// Gracefully shut down the service
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops the dispatcher so no new runs are claimed
    /// 2. Waits up to `scheduler.shutdown_grace` for in-flight runs
    /// 3. Marks a clean shutdown in the database, unless runs were still executing
    ///
    /// Runs still executing when the grace period ends are left `running`; the next
    /// startup treats the session as unclean and requeues them.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.lifecycle.cancel_token.cancel();

        let handle = self.lifecycle.dispatcher.lock().await.take();
        let drained = match handle {
            Some(handle) => match handle.await {
                Ok(drained) => drained,
                Err(e) => {
                    tracing::error!(error = %e, "Dispatcher task panicked");
                    false
                }
            },
            None => true,
        };

        if drained {
            if let Err(e) = self.db.set_clean_shutdown().await {
                tracing::error!(error = %e, "Failed to mark clean shutdown in database");
            } else {
                tracing::info!("Marked clean shutdown in database");
            }
        } else {
            tracing::warn!("Runs still executing, leaving them for recovery on next start");
        }

        self.event_tx.send(Event::Shutdown).ok();

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
