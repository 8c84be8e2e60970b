/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The periodic rebalance loop, run as a supervised task rather than a
//! bare spawned future: a [`CancellationToken`] lets the composition root
//! ask it to stop and wait for the current iteration to finish before the
//! process exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::pipeline::Pipeline;

pub struct Supervisor {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Spawn the rebalance loop, firing `rebalance_once` every `interval`
    /// until cancelled. A single failed iteration is logged and does not
    /// stop the loop; the daemon keeps its existing assignments rather
    /// than exiting over a transient policy error.
    pub fn spawn(pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        info!("rebalance loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match pipeline.rebalance_once().await {
                            Ok(changed) => debug!(changed, "rebalance iteration completed"),
                            Err(e) => error!(error = %e, "rebalance iteration failed"),
                        }
                    }
                }
            }
        });
        Self { handle, cancel }
    }

    /// Request cancellation and wait for the current iteration to drain.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "rebalance task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::hooks::Hooks;
    use policy::{Multiplexer, PoolDef, PoolsPolicy};
    use statecache::Cache;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn supervisor_stops_cleanly_without_having_run() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let mut pools = BTreeMap::new();
        pools.insert("default".to_string(), PoolDef { cpus: "0-3".to_string(), exclusive: true });
        let policy = Multiplexer::new(Box::new(PoolsPolicy::new(pools)));
        let hooks = Hooks::new(BTreeMap::new());
        let pipeline = Arc::new(Pipeline::new(cache, policy, hooks, Arc::new(StubBackend)));

        let supervisor = Supervisor::spawn(pipeline, Duration::from_secs(3600));
        supervisor.stop().await;
    }
}
