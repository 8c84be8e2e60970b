/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The in-memory cache, its persistence to `<dir>/cache.json`, and the
//! per-container directory the Request Pipeline mounts into workloads.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use common::{Error, Result};

use crate::types::{Container, ContainerState, Pod, QosClass, Snapshot};

const SNAPSHOT_FILE: &str = "cache.json";
const LOCK_FILE: &str = ".lock";
const CONTAINERS_DIR: &str = "containers";

pub struct Cache {
    persistent_dir: PathBuf,
    _lock: File,
    pods: HashMap<String, Pod>,
    containers: HashMap<String, Container>,
    by_pod_and_name: HashMap<(String, String), String>,
    by_runtime_id: HashMap<String, String>,
    by_cgroup: HashMap<String, String>,
}

impl Cache {
    /// Take an advisory exclusive lock on `dir/.lock` and load any existing
    /// snapshot. A corrupted snapshot is logged and treated as empty rather
    /// than failing startup; the caller is expected to follow up with a
    /// full resync against the runtime.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let persistent_dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&persistent_dir)
            .map_err(|e| Error::PersistFailed(format!("creating {persistent_dir:?}: {e}")))?;
        fs::create_dir_all(persistent_dir.join(CONTAINERS_DIR))
            .map_err(|e| Error::PersistFailed(format!("creating containers dir: {e}")))?;

        let lock_path = persistent_dir.join(LOCK_FILE);
        let lock_file = File::create(&lock_path)
            .map_err(|e| Error::PersistFailed(format!("opening {lock_path:?}: {e}")))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::InvariantViolation(format!(
                "persistent directory {persistent_dir:?} is already owned by another daemon instance"
            ))
        })?;

        let mut cache = Self {
            persistent_dir,
            _lock: lock_file,
            pods: HashMap::new(),
            containers: HashMap::new(),
            by_pod_and_name: HashMap::new(),
            by_runtime_id: HashMap::new(),
            by_cgroup: HashMap::new(),
        };

        match cache.load_snapshot() {
            Ok(Some(snapshot)) => cache.restore_snapshot(snapshot),
            Ok(None) => debug!("no existing cache snapshot, starting empty"),
            Err(e) => warn!(error = %e, "cache snapshot unreadable, starting empty"),
        }

        Ok(cache)
    }

    fn load_snapshot(&self) -> std::result::Result<Option<Snapshot>, String> {
        let path = self.persistent_dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| e.to_string())?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
        Ok(Some(snapshot))
    }

    fn restore_snapshot(&mut self, snapshot: Snapshot) {
        for pod in snapshot.pods {
            self.pods.insert(pod.id.clone(), pod);
        }
        for container in snapshot.containers {
            self.index_container(&container);
            self.containers.insert(container.cache_id.clone(), container);
        }
        info!(
            pods = self.pods.len(),
            containers = self.containers.len(),
            "restored cache from persistent snapshot"
        );
    }

    fn index_container(&mut self, container: &Container) {
        self.by_pod_and_name.insert(
            (container.pod_id.clone(), container.name.clone()),
            container.cache_id.clone(),
        );
        if let Some(rid) = &container.runtime_id {
            self.by_runtime_id
                .insert(rid.clone(), container.cache_id.clone());
        }
        if let Some(cg) = &container.cgroup_path {
            self.by_cgroup.insert(cg.clone(), container.cache_id.clone());
        }
    }

    fn unindex_container(&mut self, container: &Container) {
        self.by_pod_and_name
            .remove(&(container.pod_id.clone(), container.name.clone()));
        if let Some(rid) = &container.runtime_id {
            self.by_runtime_id.remove(rid);
        }
        if let Some(cg) = &container.cgroup_path {
            self.by_cgroup.remove(cg);
        }
    }

    pub fn insert_pod(&mut self, pod: Pod) {
        self.pods.insert(pod.id.clone(), pod);
    }

    pub fn delete_pod(&mut self, id: &str) -> Option<Pod> {
        self.pods.remove(id)
    }

    pub fn lookup_pod(&self, id: &str) -> Option<&Pod> {
        self.pods.get(id)
    }

    /// Insert a request-derived container. If one with the same pod and
    /// name already exists, it is evicted and returned to the caller, which
    /// must release its resources -- the cache-level half of "re-create on
    /// crashed predecessor".
    pub fn insert_container(
        &mut self,
        pod_id: impl Into<String>,
        name: impl Into<String>,
        qos_class: QosClass,
    ) -> (Container, Option<Container>) {
        let pod_id = pod_id.into();
        let name = name.into();

        let evicted = self
            .by_pod_and_name
            .get(&(pod_id.clone(), name.clone()))
            .cloned()
            .and_then(|old_id| self.containers.remove(&old_id))
            .inspect(|old| self.unindex(old));

        let cache_id = common::ids::new_cache_id();
        let container = Container::new(cache_id.clone(), pod_id, name, qos_class);
        self.index_container(&container);
        self.containers.insert(cache_id, container.clone());
        (container, evicted)
    }

    fn unindex(&mut self, container: &Container) {
        self.unindex_container(container);
    }

    pub fn update_container_runtime_id(
        &mut self,
        cache_id: &str,
        runtime_id: impl Into<String>,
        cgroup_path: Option<String>,
    ) -> Result<()> {
        let container = self
            .containers
            .get_mut(cache_id)
            .ok_or_else(|| Error::NotFound(cache_id.to_string()))?;
        container.runtime_id = Some(runtime_id.into());
        container.cgroup_path = cgroup_path;
        let snapshot = container.clone();
        self.index_container(&snapshot);
        Ok(())
    }

    pub fn set_state(&mut self, cache_id: &str, state: ContainerState) -> Result<()> {
        self.containers
            .get_mut(cache_id)
            .ok_or_else(|| Error::NotFound(cache_id.to_string()))?
            .state = state;
        Ok(())
    }

    pub fn delete_container(&mut self, cache_id: &str) -> Option<Container> {
        let container = self.containers.remove(cache_id)?;
        self.unindex_container(&container);
        let dir = self.container_dir(cache_id);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(cache_id, error = %e, "failed to remove container directory");
            }
        }
        Some(container)
    }

    pub fn lookup_container(&self, cache_id: &str) -> Option<&Container> {
        self.containers.get(cache_id)
    }

    pub fn lookup_container_mut(&mut self, cache_id: &str) -> Option<&mut Container> {
        self.containers.get_mut(cache_id)
    }

    pub fn lookup_container_by_runtime_id(&self, runtime_id: &str) -> Option<&Container> {
        self.by_runtime_id
            .get(runtime_id)
            .and_then(|id| self.containers.get(id))
    }

    pub fn lookup_container_by_cgroup(&self, cgroup_path: &str) -> Option<&Container> {
        self.by_cgroup
            .get(cgroup_path)
            .and_then(|id| self.containers.get(id))
    }

    pub fn get_pending_containers(&self) -> Vec<&Container> {
        self.containers.values().filter(|c| c.is_pending()).collect()
    }

    pub fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    /// Reconcile against an authoritative runtime listing, keyed by
    /// runtime id. Returns `(added, deleted)` cache ids: `added` are
    /// runtime-visible containers missing or not `Running` locally;
    /// `deleted` are local containers the runtime no longer reports, which
    /// this call transitions to `Stale` before returning.
    pub fn refresh(&mut self, runtime_ids: &[String]) -> (Vec<String>, Vec<String>) {
        let seen: std::collections::HashSet<&str> =
            runtime_ids.iter().map(String::as_str).collect();

        let mut added = Vec::new();
        for runtime_id in runtime_ids {
            match self.by_runtime_id.get(runtime_id) {
                Some(cache_id) => {
                    let state = self.containers.get(cache_id).map(|c| c.state);
                    if state != Some(ContainerState::Running) {
                        added.push(cache_id.clone());
                    }
                }
                None => added.push(runtime_id.clone()),
            }
        }

        let mut deleted = Vec::new();
        let stale_ids: Vec<String> = self
            .containers
            .values()
            .filter(|c| {
                !c.runtime_id
                    .as_deref()
                    .map(|rid| seen.contains(rid))
                    .unwrap_or(false)
            })
            .map(|c| c.cache_id.clone())
            .collect();
        for cache_id in stale_ids {
            if let Some(c) = self.containers.get_mut(&cache_id) {
                c.state = ContainerState::Stale;
                deleted.push(cache_id);
            }
        }

        (added, deleted)
    }

    pub fn container_dir(&self, cache_id: &str) -> PathBuf {
        self.persistent_dir.join(CONTAINERS_DIR).join(cache_id)
    }

    pub fn ensure_container_dir(&self, cache_id: &str) -> Result<PathBuf> {
        let dir = self.container_dir(cache_id);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::PersistFailed(format!("creating {dir:?}: {e}")))?;
        Ok(dir)
    }

    /// Best-effort atomic persist: write to a temp file, then rename.
    pub fn save(&self) -> Result<()> {
        let snapshot = Snapshot {
            pods: self.pods.values().cloned().collect(),
            containers: self.containers.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| Error::PersistFailed(e.to_string()))?;
        let final_path = self.persistent_dir.join(SNAPSHOT_FILE);
        let tmp_path = self.persistent_dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        fs::write(&tmp_path, bytes).map_err(|e| Error::PersistFailed(e.to_string()))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| Error::PersistFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(dir.path()).unwrap();
        let (container, evicted) = cache.insert_container("pod-1", "c1", QosClass::BestEffort);
        assert!(evicted.is_none());
        assert!(cache.lookup_container(&container.cache_id).is_some());
    }

    #[test]
    fn re_create_evicts_previous_entry_for_same_pod_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(dir.path()).unwrap();
        let (first, _) = cache.insert_container("pod-1", "c1", QosClass::BestEffort);
        cache.set_state(&first.cache_id, ContainerState::Stale).unwrap();

        let (second, evicted) = cache.insert_container("pod-1", "c1", QosClass::BestEffort);
        let evicted = evicted.expect("crashed predecessor should be evicted");
        assert_eq!(evicted.cache_id, first.cache_id);
        assert_ne!(second.cache_id, first.cache_id);
        assert!(cache.lookup_container(&first.cache_id).is_none());
    }

    #[test]
    fn second_open_fails_while_first_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let _first = Cache::open(dir.path()).unwrap();
        let second = Cache::open(dir.path());
        assert!(second.is_err());
    }

    #[test]
    fn save_and_reopen_restores_containers() {
        let dir = tempfile::tempdir().unwrap();
        let cache_id = {
            let mut cache = Cache::open(dir.path()).unwrap();
            let (container, _) = cache.insert_container("pod-1", "c1", QosClass::Guaranteed);
            cache.save().unwrap();
            container.cache_id
        };
        let reopened = Cache::open(dir.path()).unwrap();
        assert!(reopened.lookup_container(&cache_id).is_some());
    }

    #[test]
    fn refresh_marks_unseen_containers_stale_and_reports_delta() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(dir.path()).unwrap();
        let (container, _) = cache.insert_container("pod-1", "c1", QosClass::BestEffort);
        cache
            .update_container_runtime_id(&container.cache_id, "rt-1", None)
            .unwrap();
        cache.set_state(&container.cache_id, ContainerState::Running).unwrap();

        let (added, deleted) = cache.refresh(&["rt-2".to_string()]);
        assert_eq!(added, vec!["rt-2".to_string()]);
        assert_eq!(deleted, vec![container.cache_id.clone()]);
        assert_eq!(
            cache.lookup_container(&container.cache_id).unwrap().state,
            ContainerState::Stale
        );
    }

    #[test]
    fn get_pending_containers_filters_by_pending_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(dir.path()).unwrap();
        let (container, _) = cache.insert_container("pod-1", "c1", QosClass::BestEffort);
        assert!(cache.get_pending_containers().is_empty());
        cache
            .lookup_container_mut(&container.cache_id)
            .unwrap()
            .mark_pending([crate::types::Controller::CpuSet]);
        assert_eq!(cache.get_pending_containers().len(), 1);
    }
}
