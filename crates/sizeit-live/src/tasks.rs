//! Background tasks: per-participant expiry timers and the room sweeper.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::model::SessionId;
use crate::service::Inner;

/// Wait out `grace`, then reap expired participants of `session_id`.
///
/// Exits without touching the room if `token` is cancelled first, which
/// happens on rejoin, on a newer leave and on shutdown.
pub(crate) fn spawn_reaper(
    inner: Arc<Inner>,
    session_id: SessionId,
    grace: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                trace!(session = %session_id, "Expiry timer cancelled");
            }
            () = tokio::time::sleep(grace) => {
                match inner.reap(&session_id).await {
                    Ok(0) => trace!(session = %session_id, "Nothing to reap"),
                    Ok(reaped) => debug!(session = %session_id, reaped, "Participants expired"),
                    Err(e) => warn!(session = %session_id, error = %e, "Failed to notify expiry"),
                }
            }
        }
    })
}

/// Periodically drop rooms nobody is active in.
///
/// The first sweep happens one `period` after start. The task ends on
/// shutdown or once the service is gone.
pub(crate) fn spawn_sweeper(
    inner: Weak<Inner>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticks.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.sweep().await;
                }
            }
        }

        debug!("Sweeper stopped");
    })
}
