/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Running the enforcement controllers pending on a container: pre-create
//! for containers still `Creating`, post-update for anything already
//! `Created`/`Running`, post-release once resources are freed.

use std::collections::BTreeMap;

use common::{Error, Result};
use rdt::{Controller, EnforcementRequest};
use statecache::{Cache, ContainerState};
use tracing::debug;

pub struct Hooks {
    controllers: BTreeMap<statecache::Controller, Box<dyn Controller>>,
}

impl Hooks {
    pub fn new(controllers: BTreeMap<statecache::Controller, Box<dyn Controller>>) -> Self {
        Self { controllers }
    }

    /// Run every still-pending controller for `cache_id`, clearing each on
    /// success. Any single failure aborts the whole batch: the caller is
    /// expected to reverse the allocation.
    pub fn run_post_allocate(&self, cache: &mut Cache, cache_id: &str, class: &str) -> Result<()> {
        let Some(container) = cache.lookup_container(cache_id) else {
            return Err(Error::NotFound(cache_id.to_string()));
        };
        let state = container.state;
        let pending: Vec<statecache::Controller> = container.pending.iter().copied().collect();

        for kind in pending {
            let Some(controller) = self.controllers.get(&kind) else {
                debug!(?kind, "no controller registered for pending kind, skipping");
                continue;
            };
            let req = EnforcementRequest {
                cache_id: cache_id.to_string(),
                class: class.to_string(),
                pids: Vec::new(),
            };
            let result = match state {
                ContainerState::Creating => controller.pre_create(&req),
                ContainerState::Created | ContainerState::Running => controller.post_update(&req),
                ContainerState::Stale => Ok(()),
            };
            result?;
            if let Some(container) = cache.lookup_container_mut(cache_id) {
                container.clear_pending(kind);
            }
        }
        Ok(())
    }

    /// Run post-release hooks for every controller kind that was pending
    /// (or all of them, if the caller doesn't know which).
    pub fn run_post_release(&self, cache_id: &str, class: &str, kinds: &[statecache::Controller]) -> Result<()> {
        let mut errors = Vec::new();
        for kind in kinds {
            if let Some(controller) = self.controllers.get(kind) {
                let req = EnforcementRequest {
                    cache_id: cache_id.to_string(),
                    class: class.to_string(),
                    pids: Vec::new(),
                };
                if let Err(e) = controller.post_release(&req) {
                    errors.push(e);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Multi(errors))
        }
    }
}
