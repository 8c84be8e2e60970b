/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Holds the single active policy backend and handles switching between
//! named implementations.

use common::Result;
use tracing::info;

use crate::traits::{ContainerRequest, Policy};

pub struct Multiplexer {
    active: Box<dyn Policy>,
}

impl Multiplexer {
    pub fn new(active: Box<dyn Policy>) -> Self {
        Self { active }
    }

    pub fn name(&self) -> &str {
        self.active.name()
    }

    pub fn policy(&self) -> &dyn Policy {
        self.active.as_ref()
    }

    pub fn policy_mut(&mut self) -> &mut dyn Policy {
        self.active.as_mut()
    }

    /// Switch to a different backend, re-running `Start` with the full
    /// current container set so the new policy adopts everything the old
    /// one was managing.
    pub fn switch_to(&mut self, next: Box<dyn Policy>, current: &[ContainerRequest]) -> Result<()> {
        info!(from = self.active.name(), to = next.name(), "switching policy");
        self.active = next;
        self.active.start(current, &[])
    }
}
