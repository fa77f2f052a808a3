use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::pipeline::Pipeline;

/// Counts of what a single sweep tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub purged: usize,
    pub evicted: usize,
    pub resent: usize,
    pub waiting: usize,
    pub failed: usize,
}

/// Periodically drops stale entries and resends candidates whose debounce
/// window has elapsed.
#[derive(Clone)]
pub struct ResendSweep {
    pipeline: Arc<Pipeline>,
    debounce: Duration,
}

impl ResendSweep {
    pub fn new(pipeline: Arc<Pipeline>, debounce: Duration) -> Self {
        Self { pipeline, debounce }
    }

    /// One pass over the cache. Entries are handled serially and the cache
    /// lock is only taken for the snapshot and the per-entry updates.
    #[instrument(name = "sweep::tick", skip_all, level = "debug")]
    pub async fn tick(&self, now: Instant) -> SweepReport {
        let cache = self.pipeline.cache();
        let mut report = SweepReport {
            purged: cache.purge_tombstones(),
            ..Default::default()
        };

        for candidate in cache.snapshot() {
            let key = candidate.key;
            let account_nonce = match self.pipeline.chain().nonce(key.sender).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    warn!(sender = %key.sender, nonce = key.nonce, %err, "cannot read account nonce");
                    report.failed += 1;
                    continue;
                }
            };

            if account_nonce > key.nonce {
                if cache.evict(&key) {
                    debug!(sender = %key.sender, nonce = key.nonce, "nonce consumed, entry evicted");
                    report.evicted += 1;
                }
                continue;
            }

            if !candidate.is_due(now, self.debounce) {
                report.waiting += 1;
                continue;
            }

            let outcome = self.pipeline.resend(&candidate).await;
            // Success or not, the attempt opens a new debounce window.
            cache.mark_resent(&key, candidate.transaction.tx_hash(), now);
            match outcome {
                Ok(_) => {
                    metrics::counter!("encrypting_rpc_resends_total").increment(1);
                    report.resent += 1;
                }
                Err(err) => {
                    warn!(sender = %key.sender, nonce = key.nonce, %err, "resend failed");
                    report.failed += 1;
                }
            }
        }

        metrics::counter!("encrypting_rpc_evictions_total").increment(report.evicted as u64);
        report
    }

    /// Ticks every `interval` until `shutdown` is cancelled. A tick in
    /// progress is abandoned on cancellation.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = tokio::select! {
                () = shutdown.cancelled() => break,
                report = self.tick(Instant::now()) => report,
            };
            if report != SweepReport::default() {
                debug!(?report, "sweep finished");
            }
        }
        info!("resend sweep stopped");
    }
}
