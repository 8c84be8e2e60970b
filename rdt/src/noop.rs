/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Pass-through stand-in for the CPU-set and I/O-class controllers. The
//! request pipeline's post-allocate hook ordering needs to run the same
//! way whether or not real cgroup hardware is present; these controllers
//! let that happen in tests.

use common::Result;
use tracing::debug;

use crate::controller::{Controller, EnforcementRequest};

pub struct NoopController {
    name: &'static str,
}

impl NoopController {
    pub fn cpuset() -> Self {
        Self { name: "cpuset" }
    }

    pub fn io() -> Self {
        Self { name: "io" }
    }

    pub fn cache() -> Self {
        Self { name: "cache" }
    }

    pub fn memory_bandwidth() -> Self {
        Self { name: "memory-bandwidth" }
    }
}

impl Controller for NoopController {
    fn name(&self) -> &str {
        self.name
    }

    fn pre_create(&self, req: &EnforcementRequest) -> Result<()> {
        debug!(controller = self.name, cache_id = %req.cache_id, "no-op pre_create");
        Ok(())
    }

    fn post_update(&self, req: &EnforcementRequest) -> Result<()> {
        debug!(controller = self.name, cache_id = %req.cache_id, "no-op post_update");
        Ok(())
    }

    fn post_release(&self, req: &EnforcementRequest) -> Result<()> {
        debug!(controller = self.name, cache_id = %req.cache_id, "no-op post_release");
        Ok(())
    }
}
