/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Shared error taxonomy, logging bootstrap, and small utilities used by
//! every crate in the workspace.

pub mod error;
pub mod ids;
pub mod logging;

pub use error::{Error, Result};
