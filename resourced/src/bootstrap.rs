/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Startup configuration document loading: `--force-config` wins when
//! present and readable, `--fallback-config` is used otherwise. Neither
//! being set (or reset-config) leaves the tree at its registered defaults.

use std::path::Path;

use tracing::{info, warn};

/// Load a YAML document from `path` through the `config` crate's layered
/// source loader (a single file source here, but this is the same
/// machinery a future multi-source bootstrap would extend) and convert it
/// into the `serde_yaml::Value` the Configuration Tree expects.
pub(crate) fn load_document(path: &Path) -> Option<serde_yaml::Value> {
    let built = config::Config::builder()
        .add_source(config::File::from(path).required(true))
        .build();
    match built {
        Ok(cfg) => match cfg.try_deserialize::<serde_yaml::Value>() {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(?path, error = %e, "configuration document failed to deserialize");
                None
            }
        },
        Err(e) => {
            warn!(?path, error = %e, "failed to load configuration document");
            None
        }
    }
}

/// Resolve the startup document: `force_config` first, then
/// `fallback_config`, then nothing (registered defaults stand).
pub fn startup_document(
    force_config: Option<&Path>,
    fallback_config: Option<&Path>,
) -> Option<serde_yaml::Value> {
    if let Some(path) = force_config {
        if let Some(doc) = load_document(path) {
            info!(?path, "loaded force-config document");
            return Some(doc);
        }
        warn!(?path, "force-config document unavailable, falling back");
    }
    if let Some(path) = fallback_config {
        if let Some(doc) = load_document(path) {
            info!(?path, "loaded fallback-config document");
            return Some(doc);
        }
        warn!(?path, "fallback-config document unavailable, starting from defaults");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn force_config_wins_when_readable() {
        let dir = tempfile::tempdir().unwrap();
        let force_path = dir.path().join("force.yaml");
        let mut f = std::fs::File::create(&force_path).unwrap();
        writeln!(f, "logger:\n  level: debug\n").unwrap();

        let doc = startup_document(Some(&force_path), None).unwrap();
        assert_eq!(doc.get("logger").unwrap().get("level").unwrap().as_str(), Some("debug"));
    }

    #[test]
    fn falls_back_when_force_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        let fallback_path = dir.path().join("fallback.yaml");
        let mut f = std::fs::File::create(&fallback_path).unwrap();
        writeln!(f, "logger:\n  level: warn\n").unwrap();

        let doc = startup_document(Some(&missing), Some(&fallback_path)).unwrap();
        assert_eq!(doc.get("logger").unwrap().get("level").unwrap().as_str(), Some("warn"));
    }

    #[test]
    fn returns_none_when_nothing_configured() {
        assert!(startup_document(None, None).is_none());
    }
}
