/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Stable identifier generation.
//!
//! Cache identifiers must stay stable across runtime restarts, so they are
//! generated once on first insert and persisted, never derived from the
//! runtime-assigned id.

use uuid::Uuid;

pub fn new_cache_id() -> String {
    format!("cache-{}", Uuid::new_v4())
}
