/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Enforcement controllers: translate policy decisions into kernel-visible
//! enforcement. `resctrl` is the fully specified cache/memory-bandwidth
//! controller; `noop` stands in for the cpuset/I/O controllers the pipeline
//! also calls into but which this system does not implement in full.

pub mod controller;
pub mod fragment;
pub mod noop;
pub mod resctrl;
pub mod resolve;

pub use controller::{Controller, EnforcementRequest};
pub use fragment::RdtFragment;
