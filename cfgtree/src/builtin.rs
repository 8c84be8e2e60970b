/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The two fragments the tree owns directly rather than delegating to a
//! subsystem crate: `logger` (re-tunes the global tracing filter) and
//! `instrumentation` (a metrics/tracing toggle with no scrape server
//! behind it -- that surface is an external collaborator).

use serde::{Deserialize, Serialize};

use crate::fragment::FragmentSpec;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerFragment {
    pub level: String,
    pub format: String,
}

impl Default for LoggerFragment {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "text".to_string() }
    }
}

impl FragmentSpec for LoggerFragment {
    fn validate(&self) -> std::result::Result<(), String> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(format!("unknown log level '{other}'")),
        }
        match self.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(format!("unknown log format '{other}', expected 'text' or 'json'")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstrumentationFragment {
    pub enabled: bool,
}

impl FragmentSpec for InstrumentationFragment {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logger_level_and_format_are_valid() {
        assert!(LoggerFragment::default().validate().is_ok());
    }

    #[test]
    fn unknown_level_is_rejected() {
        let fragment = LoggerFragment { level: "verbose".to_string(), format: "text".to_string() };
        assert!(fragment.validate().is_err());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let fragment = LoggerFragment { level: "info".to_string(), format: "xml".to_string() };
        assert!(fragment.validate().is_err());
    }
}
