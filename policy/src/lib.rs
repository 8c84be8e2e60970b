/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The Policy Engine: a pluggable contract for deciding which resources
//! each container gets, multiplexed behind one active named
//! implementation. `pools` is the reference implementation.

pub mod cpuset;
pub mod multiplexer;
pub mod pools;
pub mod traits;

pub use multiplexer::Multiplexer;
pub use pools::{PoolDef, PoolsFragment, PoolsPolicy};
pub use traits::{ContainerRequest, Decision, Policy, PolicyEvent};
