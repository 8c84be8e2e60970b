/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The configuration tree itself: registration, atomic document application,
//! snapshot/rollback and change notification.
//!
//! Applying a document is two-phase. First every touched node is staged --
//! its fragment is cloned, the incoming YAML is merged into the clone, and
//! the clone is validated -- all without mutating the live tree. Only once
//! every staged node passes validation are the clones swapped in. If any
//! registered notifier then rejects the update, the tree is restored from
//! the pre-update snapshot and a rollback notification goes out on the same
//! paths. This keeps the tree in a state callers already saw and validated,
//! never a half-applied document.

use std::collections::{BTreeMap, HashSet};

use serde_yaml::Value;
use tracing::{debug, warn};

use common::{Error, Result};

use crate::event::{Event, EventKind, Source};
use crate::fragment::{Fragment, FragmentSpec};
use crate::node::Node;

type Notifier = Box<dyn Fn(&Event) -> std::result::Result<(), String> + Send + Sync>;

struct Subscription {
    /// Empty means tree-wide; otherwise the subscriber only hears events at
    /// this path or at any descendant of it.
    path: String,
    notifier: Notifier,
}

impl Subscription {
    fn matches(&self, event_path: &str) -> bool {
        self.path.is_empty()
            || event_path == self.path
            || event_path.starts_with(&format!("{}.", self.path))
    }
}

pub struct Tree {
    root: Node,
    subscriptions: Vec<Subscription>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Node::empty(),
            subscriptions: Vec::new(),
        }
    }

    /// Register a fragment owner at a dotted path, creating namespace nodes
    /// along the way. Re-registering the same path is rejected: the source
    /// treats this the same class of error as any other malformed update.
    pub fn register<T: FragmentSpec>(&mut self, path: &str, initial: T) -> Result<()> {
        let segments: Vec<&str> = split_path(path);
        let mut node = &mut self.root;
        for seg in &segments {
            node = node
                .children
                .entry(seg.to_string())
                .or_insert_with(Node::empty);
        }
        if node.fragment.is_some() {
            return Err(Error::config_rejected(
                path,
                "a fragment is already registered at this path",
            ));
        }
        node.fragment = Some(Box::new(crate::fragment::TypedFragment::new(initial)));
        debug!(path, "registered configuration fragment");
        Ok(())
    }

    /// Subscribe to every event in the tree.
    pub fn add_notify<F>(&mut self, f: F)
    where
        F: Fn(&Event) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.add_notify_at("", f);
    }

    /// Subscribe to events affecting `path` or any of its descendants.
    /// `path` need not itself carry a registered fragment -- subscribing at
    /// a namespace like `rdt` hears every `rdt.*` update.
    pub fn add_notify_at<F>(&mut self, path: &str, f: F)
    where
        F: Fn(&Event) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.subscriptions.push(Subscription {
            path: path.to_string(),
            notifier: Box::new(f),
        });
    }

    pub fn fragment<T: FragmentSpec>(&self, path: &str) -> Option<&T> {
        let node = self.node(path)?;
        node.fragment.as_ref()?.as_any().downcast_ref::<T>()
    }

    fn node(&self, path: &str) -> Option<&Node> {
        let mut node = &self.root;
        for seg in split_path(path) {
            node = node.child(seg)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for seg in split_path(path) {
            node = node.child_mut(seg)?;
        }
        Some(node)
    }

    /// Reset every registered fragment to its default value. Does not
    /// notify; callers that want subscribers to see the reset should follow
    /// up with an empty document applied through [`Tree::apply_document`].
    pub fn reset(&mut self) {
        self.root.reset_recursive();
    }

    pub fn backup(&self) -> Node {
        self.root.deep_clone()
    }

    pub fn restore(&mut self, backup: Node) {
        self.root = backup;
    }

    pub fn load_file(&mut self, path: &std::path::Path) -> Result<Vec<Event>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config_rejected(path.display().to_string(), e.to_string()))?;
        let doc: Value = serde_yaml::from_str(&text)
            .map_err(|e| Error::config_rejected(path.display().to_string(), e.to_string()))?;
        self.apply_document(&doc, Source::File)
    }

    pub fn apply_yaml_str(&mut self, text: &str, source: Source) -> Result<Vec<Event>> {
        let doc: Value = serde_yaml::from_str(text)
            .map_err(|e| Error::config_rejected("<document>", e.to_string()))?;
        self.apply_document(&doc, source)
    }

    /// Validate and apply `doc` against the whole tree, notifying
    /// subscribers on success and rolling back on any notifier rejection.
    pub fn apply_document(&mut self, doc: &Value, source: Source) -> Result<Vec<Event>> {
        let backup = self.backup();

        let mut touched = Vec::new();
        stage(&self.root, "", doc, &mut touched)
            .map_err(|(path, reason)| Error::config_rejected(path, reason))?;

        if touched.is_empty() {
            return Ok(Vec::new());
        }

        for (path, fragment) in touched.iter() {
            let node = self
                .node_mut(path)
                .expect("staged path was resolved from the live tree");
            node.fragment = Some(fragment.clone_box());
        }

        let events = events_for(&touched, source, EventKind::Update);
        if let Err(failed_at) = self.notify_all(&events) {
            warn!(path = %failed_at, "notifier rejected update, rolling back");
            self.restore(backup);
            let rollback_events = events_for(&touched, Source::Backup, EventKind::Rollback);
            let _ = self.notify_all(&rollback_events);
            return Err(Error::RollbackDegraded(format!(
                "update to '{failed_at}' rejected by a subscriber, configuration rolled back"
            )));
        }

        Ok(events)
    }

    fn notify_all(&self, events: &[Event]) -> std::result::Result<(), String> {
        for event in events {
            for sub in &self.subscriptions {
                if !sub.matches(&event.path) {
                    continue;
                }
                if let Err(reason) = (sub.notifier)(event) {
                    warn!(path = %event.path, reason, "configuration notifier failed");
                    return Err(event.path.clone());
                }
            }
        }
        Ok(())
    }
}

fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Depth-first post-order staging: children are resolved (and validated)
/// before the owning node's own fragment, so `touched` ends up ordered from
/// leaves to root.
fn stage(
    node: &Node,
    path: &str,
    value: &Value,
    touched: &mut Vec<(String, Box<dyn Fragment>)>,
) -> std::result::Result<(), (String, String)> {
    if value.is_null() {
        return Ok(());
    }
    let mapping = value
        .as_mapping()
        .ok_or_else(|| (path.to_string(), "expected a mapping".to_string()))?;

    let mut own = serde_yaml::Mapping::new();
    for (key, sub_value) in mapping {
        let key_str = key.as_str().unwrap_or_default();
        if let Some(child) = node.child(key_str) {
            let child_path = join_path(path, key_str);
            stage(child, &child_path, sub_value, touched)?;
        } else {
            own.insert(key.clone(), sub_value.clone());
        }
    }

    if !own.is_empty() {
        match node.fragment.as_ref() {
            Some(fragment) => {
                let mut clone = fragment.clone_box();
                clone
                    .apply_yaml(&Value::Mapping(own))
                    .map_err(|e| (path.to_string(), e))?;
                clone.validate().map_err(|e| (path.to_string(), e))?;
                touched.push((path.to_string(), clone));
            }
            None => {
                let unknown: Vec<String> = own
                    .keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect();
                return Err((
                    path.to_string(),
                    format!("unknown configuration key(s): {}", unknown.join(", ")),
                ));
            }
        }
    }

    Ok(())
}

/// Depth-first post-order across the *whole* touched set, not per leaf
/// chain: a document can touch more than one top-level subtree (e.g.
/// `logger` and `policy.static-pools` in the same apply), and the
/// synthetic root event must not fire until every touched subtree's own
/// path has. Collecting every distinct path first and sorting by depth
/// descending guarantees each path's ancestors only ever appear after it,
/// since an ancestor's segment count is always smaller; the sort is
/// stable, so unrelated paths at the same depth keep the order they were
/// first discovered in.
fn events_for(
    touched: &[(String, Box<dyn Fragment>)],
    source: Source,
    kind: EventKind,
) -> Vec<Event> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for (path, _) in touched {
        let segments: Vec<&str> = split_path(path);
        for i in (0..=segments.len()).rev() {
            let p = segments[..i].join(".");
            if seen.insert(p.clone()) {
                paths.push(p);
            }
        }
    }
    paths.sort_by_key(|p| std::cmp::Reverse(path_depth(p)));
    paths
        .into_iter()
        .map(|path| Event { path, kind, source })
        .collect()
}

fn path_depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.matches('.').count() + 1
    }
}

/// Snapshot of every registered fragment's current YAML, for `--describe`
/// style introspection. Intermediate namespace nodes are omitted.
pub fn dump(root: &Node) -> BTreeMap<String, Value> {
    fn walk(node: &Node, path: &str, out: &mut BTreeMap<String, Value>) {
        if let Some(fragment) = &node.fragment {
            out.insert(path.to_string(), fragment.to_yaml());
        }
        for (name, child) in &node.children {
            walk(child, &join_path(path, name), out);
        }
    }
    let mut out = BTreeMap::new();
    walk(root, "", &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Logger {
        level: String,
    }

    impl FragmentSpec for Logger {
        fn validate(&self) -> std::result::Result<(), String> {
            match self.level.as_str() {
                "" | "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
                other => Err(format!("unknown log level '{other}'")),
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Pools {
        enabled: bool,
    }

    impl FragmentSpec for Pools {}

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        tree.register("logger", Logger::default()).unwrap();
        tree.register("policy.static-pools", Pools::default())
            .unwrap();
        tree
    }

    #[test]
    fn apply_document_updates_nested_path() {
        let mut tree = sample_tree();
        let doc: Value = serde_yaml::from_str("policy:\n  static-pools:\n    enabled: true\n")
            .unwrap();
        let events = tree.apply_document(&doc, Source::File).unwrap();
        assert!(tree
            .fragment::<Pools>("policy.static-pools")
            .unwrap()
            .enabled);
        let paths: Vec<&str> = events.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"policy.static-pools"));
        assert!(paths.contains(&"policy"));
        assert!(paths.contains(&""));
    }

    #[test]
    fn invalid_value_is_rejected_without_mutation() {
        let mut tree = sample_tree();
        let doc: Value = serde_yaml::from_str("logger:\n  level: deafening\n").unwrap();
        let err = tree.apply_document(&doc, Source::CommandLine).unwrap_err();
        assert!(matches!(err, Error::ConfigRejected { .. }));
        assert_eq!(tree.fragment::<Logger>("logger").unwrap().level, "");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut tree = sample_tree();
        let doc: Value = serde_yaml::from_str("nonexistent: true\n").unwrap();
        assert!(tree.apply_document(&doc, Source::File).is_err());
    }

    #[test]
    fn rejecting_notifier_rolls_back_and_reports_source_backup() {
        let mut tree = sample_tree();
        let rollback_seen = Arc::new(AtomicUsize::new(0));
        let rollback_seen_clone = rollback_seen.clone();
        tree.add_notify(move |event| {
            if event.kind == EventKind::Rollback {
                rollback_seen_clone.fetch_add(1, Ordering::SeqCst);
                assert_eq!(event.source, Source::Backup);
                return Ok(());
            }
            Err("downstream refused the update".to_string())
        });

        let doc: Value = serde_yaml::from_str("logger:\n  level: debug\n").unwrap();
        let err = tree.apply_document(&doc, Source::Agent).unwrap_err();
        assert!(matches!(err, Error::RollbackDegraded(_)));
        assert_eq!(tree.fragment::<Logger>("logger").unwrap().level, "");
        assert!(rollback_seen.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut tree = sample_tree();
        let doc: Value = serde_yaml::from_str("logger:\n  level: warn\n").unwrap();
        tree.apply_document(&doc, Source::File).unwrap();
        tree.reset();
        assert_eq!(tree.fragment::<Logger>("logger").unwrap().level, "");
    }

    #[test]
    fn backup_and_restore_round_trip() {
        let mut tree = sample_tree();
        let snapshot = tree.backup();
        let doc: Value = serde_yaml::from_str("logger:\n  level: warn\n").unwrap();
        tree.apply_document(&doc, Source::File).unwrap();
        tree.restore(snapshot);
        assert_eq!(tree.fragment::<Logger>("logger").unwrap().level, "");
    }

    #[test]
    fn root_event_fires_after_every_touched_subtree_not_just_the_first() {
        let mut tree = sample_tree();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        tree.add_notify(move |event| {
            seen_clone.lock().unwrap().push(event.path.clone());
            Ok(())
        });

        let doc: Value = serde_yaml::from_str(
            "logger:\n  level: warn\npolicy:\n  static-pools:\n    enabled: true\n",
        )
        .unwrap();
        tree.apply_document(&doc, Source::File).unwrap();

        let order = seen.lock().unwrap().clone();
        let root_pos = order.iter().position(|p| p.is_empty()).unwrap();
        let logger_pos = order.iter().position(|p| p == "logger").unwrap();
        let pools_pos = order
            .iter()
            .position(|p| p == "policy.static-pools")
            .unwrap();
        assert!(root_pos > logger_pos);
        assert!(root_pos > pools_pos);
    }

    #[test]
    fn scoped_subscriber_only_hears_its_own_subtree() {
        let mut tree = sample_tree();
        let rdt_events = Arc::new(AtomicUsize::new(0));
        let rdt_events_clone = rdt_events.clone();
        tree.add_notify_at("policy", move |_event| {
            rdt_events_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let doc: Value = serde_yaml::from_str("logger:\n  level: warn\n").unwrap();
        tree.apply_document(&doc, Source::File).unwrap();
        assert_eq!(rdt_events.load(Ordering::SeqCst), 0);

        let doc: Value =
            serde_yaml::from_str("policy:\n  static-pools:\n    enabled: true\n").unwrap();
        tree.apply_document(&doc, Source::File).unwrap();
        assert!(rdt_events.load(Ordering::SeqCst) > 0);
    }
}
