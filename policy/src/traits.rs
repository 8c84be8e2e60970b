/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The Policy Engine contract. Described here is the interface every
//! implementation must satisfy; `pools` is this system's one reference
//! implementation.

use std::collections::BTreeMap;

use common::Result;
use statecache::{Controller, QosClass};

#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub cache_id: String,
    pub qos_class: QosClass,
    pub cpu_request_millis: u32,
    pub pod_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decision {
    pub cache_id: String,
    pub qos_class: QosClass,
    pub pool: String,
    pub cpus: String,
    pub pending: Vec<Controller>,
}

#[derive(Debug, Clone)]
pub enum PolicyEvent {
    MetricThresholdCrossed { name: String, value: f64 },
    ContainerStarted { cache_id: String },
}

/// Contract every pluggable resource-assignment backend implements. The
/// Request Pipeline holds one active implementation behind a
/// [`crate::multiplexer::Multiplexer`] and never calls a backend's
/// constructor directly.
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    /// Initialize with a snapshot of already-running containers to adopt
    /// and a list of stale ones to release. Must be idempotent given the
    /// same input, since a policy switch re-invokes it with the full
    /// current container set.
    fn start(&mut self, adopt: &[ContainerRequest], release: &[String]) -> Result<()>;

    /// Choose a resource assignment. Fails with `PolicyRejected` for both
    /// infeasible requests and requests that are malformed for this
    /// backend (the contract does not distinguish the two as separate
    /// error kinds; the message says which).
    fn allocate_resources(&mut self, request: &ContainerRequest) -> Result<Decision>;

    /// Reverse of allocate. Returns the cache ids of any other containers
    /// that became pending as a side effect (consolidation).
    fn release_resources(&mut self, cache_id: &str) -> Result<Vec<String>>;

    /// React to an in-place requirement change. Optional: the default
    /// rejects with a `PolicyRejected` carrying a "not supported" message.
    fn update_resources(&mut self, request: &ContainerRequest) -> Result<Decision> {
        let _ = request;
        Err(common::Error::PolicyRejected(format!(
            "{} does not support in-place resource updates",
            self.name()
        )))
    }

    /// Opportunistically reshuffle disruptible (non-`Guaranteed`)
    /// containers. Returns whether any assignment changed.
    fn rebalance(&mut self) -> Result<bool>;

    fn handle_event(&mut self, event: &PolicyEvent) -> Result<bool>;

    /// Transaction control. At most one transaction is active at a time;
    /// calls outside a transaction commit implicitly.
    fn prepare_decisions(&mut self) -> Result<()>;
    fn query_decisions(&self) -> Vec<Decision>;
    fn commit_decisions(&mut self) -> Result<()>;
    fn abort_decisions(&mut self) -> Result<()>;

    /// If true, the Request Pipeline forwards requests without invoking
    /// any hooks.
    fn bypassed(&self) -> bool {
        false
    }
}
