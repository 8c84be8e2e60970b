/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The reference policy: containers are assigned to one of a handful of
//! named, statically-sized CPU pools. Exclusive pools hand out whole CPUs
//! and track which ones are claimed; shared pools hand every container the
//! same cpuset. This is the percentage-partition sketch of the contract's
//! reference algorithm, specialized to pool definitions carried verbatim
//! (rather than resolved from percentages, since CPU pools are declared as
//! explicit ranges -- see DESIGN.md).

use std::collections::{BTreeMap, HashSet};

use cfgtree::FragmentSpec;
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use statecache::{Controller, QosClass};
use tracing::{debug, warn};

use crate::cpuset::{format_range, parse_range};
use crate::traits::{ContainerRequest, Decision, Policy, PolicyEvent};

pub const ANNOTATION_POOL: &str = "resourced.io/pool";
const DEFAULT_POOL: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PoolDef {
    pub cpus: String,
    #[serde(default)]
    pub exclusive: bool,
}

/// Registered at `policy.static-pools`; transparent so the YAML at that
/// path is just `{pool-name: {cpus, exclusive}, ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PoolsFragment(pub BTreeMap<String, PoolDef>);

impl FragmentSpec for PoolsFragment {
    fn validate(&self) -> std::result::Result<(), String> {
        for (name, pool) in &self.0 {
            parse_range(&pool.cpus).map_err(|e| format!("pool '{name}': {e}"))?;
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
struct PoolState {
    assignments: BTreeMap<String, Decision>,
    claimed: BTreeMap<String, HashSet<u32>>,
}

pub struct PoolsPolicy {
    pools: BTreeMap<String, PoolDef>,
    live: PoolState,
    staged: Option<PoolState>,
}

impl PoolsPolicy {
    pub fn new(pools: BTreeMap<String, PoolDef>) -> Self {
        Self {
            pools,
            live: PoolState::default(),
            staged: None,
        }
    }

    pub fn from_fragment(fragment: &PoolsFragment) -> Self {
        Self::new(fragment.0.clone())
    }

    fn choose_pool(&self, request: &ContainerRequest) -> Result<String> {
        if let Some(name) = request.pod_annotations.get(ANNOTATION_POOL) {
            if self.pools.contains_key(name) {
                return Ok(name.clone());
            }
            return Err(Error::PolicyRejected(format!(
                "invalid request: pool '{name}' named in annotations does not exist"
            )));
        }
        if self.pools.contains_key(DEFAULT_POOL) {
            return Ok(DEFAULT_POOL.to_string());
        }
        self.pools
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| Error::PolicyRejected("invalid request: no pools configured".into()))
    }

    fn required_cpu_count(request: &ContainerRequest) -> usize {
        (request.cpu_request_millis as usize).div_ceil(1000).max(1)
    }

    fn assign_exclusive(
        pool_name: &str,
        pool: &PoolDef,
        claimed: &mut HashSet<u32>,
        count: usize,
    ) -> Result<Vec<u32>> {
        let all = parse_range(&pool.cpus)
            .map_err(|e| Error::PolicyRejected(format!("invalid request: {e}")))?;
        let free: Vec<u32> = all.into_iter().filter(|c| !claimed.contains(c)).collect();
        if free.len() < count {
            return Err(Error::PolicyRejected(format!(
                "insufficient resources: pool '{pool_name}' has {} free cpus, needs {count}",
                free.len()
            )));
        }
        let chosen: Vec<u32> = free.into_iter().take(count).collect();
        claimed.extend(chosen.iter());
        Ok(chosen)
    }
}

fn active_state<'a>(live: &'a mut PoolState, staged: &'a mut Option<PoolState>) -> &'a mut PoolState {
    staged.as_mut().unwrap_or(live)
}

impl Policy for PoolsPolicy {
    fn name(&self) -> &str {
        "pools"
    }

    fn start(&mut self, adopt: &[ContainerRequest], release: &[String]) -> Result<()> {
        for cache_id in release {
            let _ = self.release_resources(cache_id);
        }
        for request in adopt {
            if self.live.assignments.contains_key(&request.cache_id) {
                continue;
            }
            self.allocate_resources(request)?;
        }
        Ok(())
    }

    fn allocate_resources(&mut self, request: &ContainerRequest) -> Result<Decision> {
        let pool_name = self.choose_pool(request)?;
        let pool = self
            .pools
            .get(&pool_name)
            .cloned()
            .ok_or_else(|| Error::PolicyRejected(format!("invalid request: unknown pool '{pool_name}'")))?;

        let Self { live, staged, .. } = self;
        let state = active_state(live, staged);

        if let Some(existing) = state.assignments.get(&request.cache_id) {
            return Ok(existing.clone());
        }

        let cpus = if pool.exclusive {
            let count = Self::required_cpu_count(request);
            let claimed = state.claimed.entry(pool_name.clone()).or_default();
            let chosen = PoolsPolicy::assign_exclusive(&pool_name, &pool, claimed, count)?;
            format_range(&chosen)
        } else {
            pool.cpus.clone()
        };

        let decision = Decision {
            cache_id: request.cache_id.clone(),
            qos_class: request.qos_class,
            pool: pool_name,
            cpus,
            pending: vec![
                Controller::CpuSet,
                Controller::Cache,
                Controller::MemoryBandwidth,
                Controller::Io,
            ],
        };
        state.assignments.insert(request.cache_id.clone(), decision.clone());
        Ok(decision)
    }

    fn release_resources(&mut self, cache_id: &str) -> Result<Vec<String>> {
        let Self { pools, live, staged, .. } = self;
        let state = active_state(live, staged);
        let Some(decision) = state.assignments.remove(cache_id) else {
            debug!(cache_id, "release_resources on unknown container, ignoring");
            return Ok(Vec::new());
        };
        if let Some(pool) = pools.get(&decision.pool) {
            if pool.exclusive {
                if let Ok(freed) = parse_range(&decision.cpus) {
                    if let Some(claimed) = state.claimed.get_mut(&decision.pool) {
                        for cpu in freed {
                            claimed.remove(&cpu);
                        }
                    }
                }
            }
        }
        Ok(Vec::new())
    }

    fn rebalance(&mut self) -> Result<bool> {
        let Self { pools, live, staged, .. } = self;
        let state = active_state(live, staged);
        let mut changed = false;

        let candidates: Vec<String> = state
            .assignments
            .iter()
            .filter(|(_, d)| d.qos_class != QosClass::Guaranteed)
            .map(|(id, _)| id.clone())
            .collect();

        for cache_id in candidates {
            let decision = state.assignments.get(&cache_id).unwrap().clone();
            let Some(pool) = pools.get(&decision.pool) else { continue };
            if !pool.exclusive {
                continue;
            }
            let Ok(current_cpus) = parse_range(&decision.cpus) else { continue };
            let count = current_cpus.len();

            let claimed = state.claimed.entry(decision.pool.clone()).or_default();
            for cpu in &current_cpus {
                claimed.remove(cpu);
            }

            match PoolsPolicy::assign_exclusive(&decision.pool, pool, claimed, count) {
                Ok(new_cpus) => {
                    let new_range = format_range(&new_cpus);
                    if new_range != decision.cpus {
                        changed = true;
                    }
                    let entry = state.assignments.get_mut(&cache_id).unwrap();
                    entry.cpus = new_range;
                    entry.pending.push(Controller::CpuSet);
                }
                Err(e) => {
                    warn!(cache_id, error = %e, "rebalance could not re-place container, restoring prior claim");
                    let claimed = state.claimed.entry(decision.pool.clone()).or_default();
                    claimed.extend(current_cpus.iter());
                }
            }
        }

        Ok(changed)
    }

    fn handle_event(&mut self, event: &PolicyEvent) -> Result<bool> {
        match event {
            PolicyEvent::MetricThresholdCrossed { name, value } => {
                debug!(name, value, "metric threshold crossed, triggering rebalance");
                self.rebalance()
            }
            PolicyEvent::ContainerStarted { cache_id } => {
                debug!(cache_id, "container started");
                Ok(false)
            }
        }
    }

    fn prepare_decisions(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(Error::PolicyRejected(
                "a policy transaction is already active".into(),
            ));
        }
        self.staged = Some(self.live.clone());
        Ok(())
    }

    fn query_decisions(&self) -> Vec<Decision> {
        self.staged
            .as_ref()
            .unwrap_or(&self.live)
            .assignments
            .values()
            .cloned()
            .collect()
    }

    fn commit_decisions(&mut self) -> Result<()> {
        if let Some(staged) = self.staged.take() {
            self.live = staged;
        }
        Ok(())
    }

    fn abort_decisions(&mut self) -> Result<()> {
        self.staged = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> BTreeMap<String, PoolDef> {
        let mut pools = BTreeMap::new();
        pools.insert(
            "default".to_string(),
            PoolDef { cpus: "0-3".to_string(), exclusive: true },
        );
        pools.insert(
            "shared".to_string(),
            PoolDef { cpus: "4-7".to_string(), exclusive: false },
        );
        pools
    }

    fn request(cache_id: &str, qos: QosClass, millis: u32) -> ContainerRequest {
        ContainerRequest {
            cache_id: cache_id.to_string(),
            qos_class: qos,
            cpu_request_millis: millis,
            pod_annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn allocate_claims_distinct_cpus_in_exclusive_pool() {
        let mut policy = PoolsPolicy::new(pools());
        let a = policy
            .allocate_resources(&request("c1", QosClass::Guaranteed, 1000))
            .unwrap();
        let b = policy
            .allocate_resources(&request("c2", QosClass::Guaranteed, 1000))
            .unwrap();
        assert_ne!(a.cpus, b.cpus);
    }

    #[test]
    fn allocate_is_idempotent_for_the_same_container() {
        let mut policy = PoolsPolicy::new(pools());
        let first = policy
            .allocate_resources(&request("c1", QosClass::Guaranteed, 1000))
            .unwrap();
        let second = policy
            .allocate_resources(&request("c1", QosClass::Guaranteed, 1000))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn exhausting_exclusive_pool_rejects_with_insufficient_resources() {
        let mut policy = PoolsPolicy::new(pools());
        for i in 0..4 {
            policy
                .allocate_resources(&request(&format!("c{i}"), QosClass::Guaranteed, 1000))
                .unwrap();
        }
        let err = policy
            .allocate_resources(&request("c5", QosClass::Guaranteed, 1000))
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejected(_)));
    }

    #[test]
    fn shared_pool_gives_every_container_the_same_cpuset() {
        let mut policy = PoolsPolicy::new(pools());
        let mut req = request("c1", QosClass::BestEffort, 100);
        req.pod_annotations.insert(ANNOTATION_POOL.to_string(), "shared".to_string());
        let a = policy.allocate_resources(&req).unwrap();
        req.cache_id = "c2".to_string();
        let b = policy.allocate_resources(&req).unwrap();
        assert_eq!(a.cpus, b.cpus);
        assert_eq!(a.cpus, "4-7");
    }

    #[test]
    fn release_frees_claimed_cpus_for_reuse() {
        let mut policy = PoolsPolicy::new(pools());
        let first = policy
            .allocate_resources(&request("c1", QosClass::Guaranteed, 4000))
            .unwrap();
        assert_eq!(first.cpus, "0-3");
        policy.release_resources("c1").unwrap();
        let second = policy
            .allocate_resources(&request("c2", QosClass::Guaranteed, 4000))
            .unwrap();
        assert_eq!(second.cpus, "0-3");
    }

    #[test]
    fn rebalance_never_touches_guaranteed_containers() {
        let mut policy = PoolsPolicy::new(pools());
        let guaranteed = policy
            .allocate_resources(&request("g1", QosClass::Guaranteed, 1000))
            .unwrap();
        let _best_effort = policy
            .allocate_resources(&request("b1", QosClass::BestEffort, 1000))
            .unwrap();
        policy.release_resources("g1").ok();
        policy.live.assignments.insert("g1".to_string(), guaranteed.clone());
        policy.live.claimed.entry("default".to_string()).or_default().extend(
            parse_range(&guaranteed.cpus).unwrap(),
        );

        policy.rebalance().unwrap();
        let after = policy.query_decisions();
        let still_guaranteed = after.iter().find(|d| d.cache_id == "g1").unwrap();
        assert_eq!(still_guaranteed.cpus, guaranteed.cpus);
    }

    #[test]
    fn abort_discards_staged_decisions() {
        let mut policy = PoolsPolicy::new(pools());
        policy.prepare_decisions().unwrap();
        policy
            .allocate_resources(&request("c1", QosClass::Guaranteed, 1000))
            .unwrap();
        assert_eq!(policy.query_decisions().len(), 1);
        policy.abort_decisions().unwrap();
        assert!(policy.live.assignments.is_empty());
    }

    #[test]
    fn commit_applies_staged_decisions_to_live_state() {
        let mut policy = PoolsPolicy::new(pools());
        policy.prepare_decisions().unwrap();
        policy
            .allocate_resources(&request("c1", QosClass::Guaranteed, 1000))
            .unwrap();
        policy.commit_decisions().unwrap();
        assert_eq!(policy.live.assignments.len(), 1);
    }
}
