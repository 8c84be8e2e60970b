/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The Request Pipeline: the seam every runtime and configuration request
//! passes through on its way to (or away from) cache, policy and
//! enforcement controllers.

pub mod backend;
pub mod hooks;
pub mod pipeline;
pub mod rebalance;
pub mod service;

pub use backend::{RuntimeBackend, StubBackend};
pub use hooks::Hooks;
pub use pipeline::Pipeline;
pub use rebalance::Supervisor;
pub use service::{AgentConfigService, RuntimeRelayService};
