/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The single source of truth for pods, containers, and per-policy state
//! between request phases. Mutations are expected to be serialized by a
//! caller-held lock (the Request Pipeline's pipeline lock); this crate does
//! not lock internally, matching the "invariants on concurrent access"
//! contract that ownership of the critical section belongs one level up.

pub mod cache;
pub mod types;

pub use cache::Cache;
pub use types::{Container, ContainerState, Controller, Pod, QosClass, Snapshot, ALL_CONTROLLERS};
