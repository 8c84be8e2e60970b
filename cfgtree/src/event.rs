/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Notification events delivered to subscribers after every commit.

/// What kind of change produced this notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Update,
    Rollback,
}

/// Where the triggering document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    File,
    Agent,
    Backup,
    CommandLine,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub path: String,
    pub kind: EventKind,
    pub source: Source,
}
