/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The orchestration heart: brackets every runtime request with the cache,
//! policy, controller and forwarding actions described for each operation.
//! Every method here acquires the single pipeline lock for its whole
//! duration, matching the coarse-grained critical-section discipline.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use api::proto::runtime::{
    CreateContainerRequest, CreateContainerResponse, ListContainersRequest,
    ListContainersResponse, Mount, RemoveContainerRequest, RemoveContainerResponse,
    RemovePodSandboxRequest, RemovePodSandboxResponse, RunPodSandboxRequest,
    RunPodSandboxResponse, StartContainerRequest, StartContainerResponse, StopContainerRequest,
    StopContainerResponse, StopPodSandboxRequest, StopPodSandboxResponse,
    UpdateContainerResourcesRequest, UpdateContainerResourcesResponse,
};

use common::{Error, Result};
use policy::{ContainerRequest, Multiplexer, PolicyEvent};
use statecache::{Cache, Container, ContainerState, Pod, QosClass, ALL_CONTROLLERS};

use crate::backend::RuntimeBackend;
use crate::hooks::Hooks;

pub struct Pipeline {
    inner: Mutex<Inner>,
}

struct Inner {
    cache: Cache,
    policy: Multiplexer,
    hooks: Hooks,
    backend: Arc<dyn RuntimeBackend>,
}

fn status_to_error(status: tonic::Status) -> Error {
    Error::RuntimeFailed(status.message().to_string())
}

fn proto_qos(raw: i32) -> QosClass {
    match raw {
        0 => QosClass::Guaranteed,
        1 => QosClass::Burstable,
        _ => QosClass::BestEffort,
    }
}

fn assignment_pool(container: &Container) -> String {
    container
        .assignment
        .as_ref()
        .and_then(|v| v.get("pool"))
        .and_then(|v| v.as_str())
        .unwrap_or("default")
        .to_string()
}

impl Pipeline {
    pub fn new(
        cache: Cache,
        policy: Multiplexer,
        hooks: Hooks,
        backend: Arc<dyn RuntimeBackend>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner { cache, policy, hooks, backend }),
        }
    }

    /// Best-effort resource release plus post-release hooks, used by every
    /// path that tears a container down. Errors are returned to the
    /// caller, which decides whether to propagate or merely log them --
    /// the contract differs between CreateContainer rollback (propagate)
    /// and Stop/Remove (never prevented by policy errors).
    fn release_container(inner: &mut Inner, cache_id: &str, container: &Container) -> Result<()> {
        let class = assignment_pool(container);
        let _ = inner.policy.policy_mut().release_resources(cache_id);
        inner.hooks.run_post_release(cache_id, &class, &ALL_CONTROLLERS)
    }

    pub async fn run_pod_sandbox(&self, req: RunPodSandboxRequest) -> Result<RunPodSandboxResponse> {
        let mut inner = self.inner.lock().await;
        let config = req.config.clone().ok_or_else(|| {
            Error::InvariantViolation("RunPodSandboxRequest missing config".to_string())
        })?;
        let resp = inner.backend.run_pod_sandbox(req).await.map_err(status_to_error)?;
        inner.cache.insert_pod(Pod {
            id: resp.pod_id.clone(),
            name: config.name,
            namespace: String::new(),
            qos_class: proto_qos(config.qos_class),
            cgroup_parent: config.cgroup_parent,
        });
        Ok(resp)
    }

    pub async fn stop_pod_sandbox(&self, req: StopPodSandboxRequest) -> Result<StopPodSandboxResponse> {
        let mut inner = self.inner.lock().await;
        inner.backend.stop_pod_sandbox(req).await.map_err(status_to_error)
    }

    pub async fn remove_pod_sandbox(
        &self,
        req: RemovePodSandboxRequest,
    ) -> Result<RemovePodSandboxResponse> {
        let mut inner = self.inner.lock().await;
        let pod_id = req.pod_id.clone();
        let resp = inner.backend.remove_pod_sandbox(req).await.map_err(status_to_error)?;
        inner.cache.delete_pod(&pod_id);
        Ok(resp)
    }

    /// Critical sequence: CreateContainer.
    pub async fn create_container(
        &self,
        req: CreateContainerRequest,
    ) -> Result<CreateContainerResponse> {
        let mut inner = self.inner.lock().await;
        let pod_id = req.pod_id.clone();
        let config = req.config.clone().ok_or_else(|| {
            Error::InvariantViolation("CreateContainerRequest missing config".to_string())
        })?;

        let pod = inner
            .cache
            .lookup_pod(&pod_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pod {pod_id}")))?;

        // Step 2-3: dedupe a crashed predecessor sharing pod+name, insert Creating.
        let (container, evicted) =
            inner.cache.insert_container(pod_id.clone(), config.name.clone(), pod.qos_class);
        let cache_id = container.cache_id.clone();
        if let Some(old) = evicted {
            if let Err(e) = Self::release_container(&mut inner, &old.cache_id, &old) {
                warn!(cache_id = %old.cache_id, error = %e, "failed releasing crashed predecessor");
            }
        }

        // Step 4: PrepareDecisions; AllocateResources.
        let resources = config.resources.clone().unwrap_or_default();
        let request = ContainerRequest {
            cache_id: cache_id.clone(),
            qos_class: pod.qos_class,
            cpu_request_millis: resources.cpu_millis.max(0) as u32,
            pod_annotations: BTreeMap::new(),
        };
        inner.policy.policy_mut().prepare_decisions()?;
        let decision = match inner.policy.policy_mut().allocate_resources(&request) {
            Ok(d) => d,
            Err(e) => {
                let _ = inner.policy.policy_mut().abort_decisions();
                inner.cache.delete_container(&cache_id);
                return Err(e);
            }
        };
        if let Some(c) = inner.cache.lookup_container_mut(&cache_id) {
            c.assignment = Some(serde_json::to_value(&decision).unwrap_or_default());
            c.mark_pending(decision.pending.iter().copied());
        }

        // Step 5: inject the cache directory mount, stage env overrides.
        let mount_dir = inner.cache.ensure_container_dir(&cache_id)?;
        let mut mutated_config = config.clone();
        mutated_config.mounts.push(Mount {
            host_path: mount_dir.display().to_string(),
            container_path: "/etc/resourced".to_string(),
            read_only: true,
        });
        mutated_config
            .env
            .insert("RESOURCED_CPUSET".to_string(), decision.cpus.clone());

        // Step 6: post-allocate hooks. A policy's allocate_resources can mark
        // other already-existing containers pending too (consolidation);
        // flush those the same way rebalance does before forwarding this
        // container's own creation, which is the only failure that aborts it.
        Self::flush_pending_hooks(&mut inner, Some(&cache_id));
        if let Err(e) = inner.hooks.run_post_allocate(&mut inner.cache, &cache_id, &decision.pool) {
            warn!(cache_id, error = %e, "post-allocate hook failed, reversing allocation");
            let _ = inner.policy.policy_mut().abort_decisions();
            let _ = inner.policy.policy_mut().release_resources(&cache_id);
            inner.cache.delete_container(&cache_id);
            return Err(e);
        }

        // Step 7: forward to the runtime.
        let forward = CreateContainerRequest { pod_id: pod_id.clone(), config: Some(mutated_config) };
        let resp = match inner.backend.create_container(forward).await {
            Ok(resp) => resp,
            Err(status) => {
                let _ = inner.policy.policy_mut().release_resources(&cache_id);
                let _ = inner.hooks.run_post_release(&cache_id, &decision.pool, &ALL_CONTROLLERS);
                inner.cache.delete_container(&cache_id);
                let _ = inner.policy.policy_mut().abort_decisions();
                return Err(status_to_error(status));
            }
        };

        // Step 8-9: record runtime id, transition to Created, commit.
        inner
            .cache
            .update_container_runtime_id(&cache_id, resp.container_id.clone(), None)?;
        inner.cache.set_state(&cache_id, ContainerState::Created)?;
        inner.policy.policy_mut().commit_decisions()?;
        Ok(resp)
    }

    /// Critical sequence: StartContainer.
    pub async fn start_container(&self, req: StartContainerRequest) -> Result<StartContainerResponse> {
        let mut inner = self.inner.lock().await;
        let cache_id = req.container_id.clone();

        let Some(container) = inner.cache.lookup_container(&cache_id).cloned() else {
            return inner.backend.start_container(req).await.map_err(status_to_error);
        };
        if container.state != ContainerState::Created {
            return Err(Error::InvariantViolation(format!(
                "container {cache_id} is not in Created state"
            )));
        }

        let resp = inner.backend.start_container(req).await.map_err(status_to_error)?;
        inner.cache.set_state(&cache_id, ContainerState::Running)?;
        let _ = inner
            .policy
            .policy_mut()
            .handle_event(&PolicyEvent::ContainerStarted { cache_id: cache_id.clone() });

        let class = assignment_pool(&container);
        if let Err(e) = inner.hooks.run_post_allocate(&mut inner.cache, &cache_id, &class) {
            warn!(cache_id, error = %e, "post-start hook failed");
        }
        Ok(resp)
    }

    /// Critical sequence: StopContainer. Forward first, then release and
    /// run post-release hooks; failures here are logged, never surfaced,
    /// since removal progress is preferred over a stuck workload.
    pub async fn stop_container(&self, req: StopContainerRequest) -> Result<StopContainerResponse> {
        let mut inner = self.inner.lock().await;
        let cache_id = req.container_id.clone();
        let resp = inner.backend.stop_container(req).await.map_err(status_to_error)?;

        if let Some(container) = inner.cache.lookup_container(&cache_id).cloned() {
            if let Err(e) = Self::release_container(&mut inner, &cache_id, &container) {
                warn!(cache_id, error = %e, "post-release hook failed during stop");
            }
        }
        Ok(resp)
    }

    /// Critical sequence: RemoveContainer.
    pub async fn remove_container(
        &self,
        req: RemoveContainerRequest,
    ) -> Result<RemoveContainerResponse> {
        let mut inner = self.inner.lock().await;
        let cache_id = req.container_id.clone();
        let resp = inner.backend.remove_container(req).await.map_err(status_to_error)?;

        if let Some(container) = inner.cache.lookup_container(&cache_id).cloned() {
            if let Err(e) = Self::release_container(&mut inner, &cache_id, &container) {
                warn!(cache_id, error = %e, "post-release hook failed during remove");
            }
        }
        inner.cache.delete_container(&cache_id);
        Ok(resp)
    }

    /// Critical sequence: ListContainers cross-check. On an unfiltered
    /// reply, reconciles the cache against what the runtime actually
    /// reports -- the primary drift-recovery path.
    pub async fn list_containers(
        &self,
        req: ListContainersRequest,
    ) -> Result<ListContainersResponse> {
        let mut inner = self.inner.lock().await;
        let unfiltered = req.filter.is_empty();
        let resp = inner.backend.list_containers(req).await.map_err(status_to_error)?;

        if unfiltered {
            let runtime_ids: Vec<String> =
                resp.containers.iter().map(|c| c.container_id.clone()).collect();
            let (_, deleted) = inner.cache.refresh(&runtime_ids);
            for cache_id in deleted {
                if let Some(container) = inner.cache.lookup_container(&cache_id).cloned() {
                    if let Err(e) = Self::release_container(&mut inner, &cache_id, &container) {
                        warn!(cache_id, error = %e, "post-release hook failed during list cross-check");
                    }
                }
            }
        }
        Ok(resp)
    }

    /// The runtime's own idea of which containers currently exist, queried
    /// without touching the cache. The composition root uses this to seed
    /// `resync` with the real reported set at startup rather than an empty
    /// list, which would otherwise look identical to "the runtime has
    /// nothing" and release every previously-tracked container.
    pub async fn runtime_container_ids(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let resp = inner
            .backend
            .list_containers(ListContainersRequest::default())
            .await
            .map_err(status_to_error)?;
        Ok(resp.containers.into_iter().map(|c| c.container_id).collect())
    }

    /// Deliberately unsupported: the reference policy has no path for
    /// reacting to an in-place requirement change.
    pub async fn update_container_resources(
        &self,
        _req: UpdateContainerResourcesRequest,
    ) -> Result<UpdateContainerResourcesResponse> {
        Err(Error::PolicyRejected(
            "UpdateContainerResources is not supported".to_string(),
        ))
    }

    /// Startup resync: reconcile the cache against a runtime listing, then
    /// hand the adopt/release lists to the active policy.
    pub async fn resync(&self, runtime_container_ids: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let (added, deleted) = inner.cache.refresh(runtime_container_ids);

        for cache_id in &deleted {
            if let Some(container) = inner.cache.lookup_container(cache_id).cloned() {
                if let Err(e) = Self::release_container(&mut inner, cache_id, &container) {
                    warn!(cache_id, error = %e, "post-release hook failed during resync");
                }
            }
        }

        let adopt: Vec<ContainerRequest> = added
            .iter()
            .filter_map(|id| {
                inner.cache.lookup_container(id).map(|c| ContainerRequest {
                    cache_id: c.cache_id.clone(),
                    qos_class: c.qos_class,
                    cpu_request_millis: 0,
                    pod_annotations: BTreeMap::new(),
                })
            })
            .collect();
        inner.policy.policy_mut().start(&adopt, &deleted)?;
        Ok(())
    }

    /// Run post-allocate hooks for every container the cache still has
    /// marked pending, skipping `skip` (the caller runs that one itself,
    /// since only it gates an outer operation's success). A single
    /// container's hook failure is logged and does not block the rest --
    /// each container's enforcement is independent of its siblings'.
    fn flush_pending_hooks(inner: &mut Inner, skip: Option<&str>) {
        let pending_ids: Vec<String> = inner
            .cache
            .get_pending_containers()
            .iter()
            .map(|c| c.cache_id.clone())
            .filter(|id| skip != Some(id.as_str()))
            .collect();
        for cache_id in pending_ids {
            let class = inner
                .cache
                .lookup_container(&cache_id)
                .map(assignment_pool)
                .unwrap_or_else(|| "default".to_string());
            if let Err(e) = inner.hooks.run_post_allocate(&mut inner.cache, &cache_id, &class) {
                warn!(cache_id, error = %e, "post-allocate hook failed for pending container");
            }
        }
    }

    /// One iteration of the rebalance loop: ask the policy to reshuffle
    /// disruptible containers, run hooks for anything it changed, persist.
    pub async fn rebalance_once(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let changed = inner.policy.policy_mut().rebalance()?;
        if changed {
            Self::flush_pending_hooks(&mut inner, None);
            if let Err(e) = inner.cache.save() {
                warn!(error = %e, "failed to persist cache after rebalance");
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::proto::runtime::{ContainerConfig, PodSandboxConfig, ResourceRequirements};
    use std::collections::BTreeMap as Map;

    fn pools() -> Map<String, policy::PoolDef> {
        let mut pools = Map::new();
        pools.insert("default".to_string(), policy::PoolDef { cpus: "0-3".to_string(), exclusive: true });
        pools
    }

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        let cache = Cache::open(dir).unwrap();
        let policy = Multiplexer::new(Box::new(policy::PoolsPolicy::new(pools())));
        let hooks = Hooks::new(BTreeMap::new());
        Pipeline::new(cache, policy, hooks, Arc::new(crate::backend::StubBackend))
    }

    #[tokio::test]
    async fn full_lifecycle_runs_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        let pod = pipeline
            .run_pod_sandbox(RunPodSandboxRequest {
                config: Some(PodSandboxConfig {
                    name: "pod-a".to_string(),
                    uid: "uid-a".to_string(),
                    qos_class: 0,
                    cgroup_parent: "/kubepods".to_string(),
                    annotations: Default::default(),
                }),
            })
            .await
            .unwrap();

        let created = pipeline
            .create_container(CreateContainerRequest {
                pod_id: pod.pod_id.clone(),
                config: Some(ContainerConfig {
                    name: "app".to_string(),
                    resources: Some(ResourceRequirements {
                        cpu_millis: 1000,
                        memory_bytes: 0,
                        exclusive_cpus: false,
                    }),
                    env: Default::default(),
                    mounts: vec![],
                    command: vec![],
                }),
            })
            .await
            .unwrap();

        pipeline
            .start_container(StartContainerRequest { container_id: created.container_id.clone() })
            .await
            .unwrap();
        pipeline
            .stop_container(StopContainerRequest {
                container_id: created.container_id.clone(),
                timeout_seconds: 5,
            })
            .await
            .unwrap();
        pipeline
            .remove_container(RemoveContainerRequest { container_id: created.container_id.clone() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_container_rejects_unknown_pod() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let err = pipeline
            .create_container(CreateContainerRequest {
                pod_id: "missing".to_string(),
                config: Some(ContainerConfig {
                    name: "app".to_string(),
                    resources: None,
                    env: Default::default(),
                    mounts: vec![],
                    command: vec![],
                }),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_container_resources_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let err = pipeline
            .update_container_resources(UpdateContainerResourcesRequest {
                container_id: "c1".to_string(),
                resources: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejected(_)));
    }
}
