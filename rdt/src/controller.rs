/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The generic enforcement-controller seam. Every pending controller the
//! Policy Engine marks a container for implements this trait; the Request
//! Pipeline calls it during the post-allocate/post-release hook phases
//! without knowing which concrete enforcement mechanism is behind it.

use common::Result;

/// Narrow view of the container a controller needs to act on -- deliberately
/// independent of `statecache::Container` so this crate doesn't carry a
/// dependency the enforcement layer has no other use for.
#[derive(Debug, Clone)]
pub struct EnforcementRequest {
    pub cache_id: String,
    pub class: String,
    pub pids: Vec<u32>,
}

pub trait Controller: Send + Sync {
    fn name(&self) -> &str;

    /// Run before a container transitions out of `Creating`.
    fn pre_create(&self, req: &EnforcementRequest) -> Result<()>;

    /// Run after an already-running container's assignment changes.
    fn post_update(&self, req: &EnforcementRequest) -> Result<()>;

    /// Run after a container's resources are released.
    fn post_release(&self, req: &EnforcementRequest) -> Result<()>;
}
