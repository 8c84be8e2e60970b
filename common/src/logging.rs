/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Logging bootstrap.
//!
//! Installed once by the binary's `main`. The returned [`LogHandle`] lets
//! the Configuration Tree's `logger` fragment retune verbosity at runtime
//! without restarting the process, since subscribers can only be installed
//! once per process.

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry,
};

pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Clone)]
pub struct LogHandle {
    filter: FilterHandle,
}

impl LogHandle {
    /// Replace the active filter directive, e.g. `"info"` or
    /// `"resourced=debug,tower=warn"`.
    pub fn set_level(&self, directive: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
        self.filter.reload(filter).map_err(|e| e.to_string())
    }
}

/// Install the global subscriber. `default_directive` seeds the filter
/// before any configuration has been applied; `json` selects structured
/// output for log aggregation versus a human-readable console format.
pub fn init(default_directive: &str, json: bool) -> LogHandle {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let (filter, reload_handle) = reload::Layer::new(env_filter);

    let registry = Registry::default().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    LogHandle {
        filter: reload_handle,
    }
}
