/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Tree nodes. A node may own a fragment, own children, or both: a node
//! with both routes YAML keys matching a child name to that child and
//! hands whatever remains to its own fragment.

use std::collections::BTreeMap;

use crate::fragment::Fragment;

pub struct Node {
    pub fragment: Option<Box<dyn Fragment>>,
    pub children: BTreeMap<String, Node>,
}

impl Node {
    pub fn empty() -> Self {
        Self {
            fragment: None,
            children: BTreeMap::new(),
        }
    }

    pub fn with_fragment(fragment: Box<dyn Fragment>) -> Self {
        Self {
            fragment: Some(fragment),
            children: BTreeMap::new(),
        }
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.get_mut(name)
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    pub fn insert_child(&mut self, name: impl Into<String>, node: Node) {
        self.children.insert(name.into(), node);
    }

    /// Deep clone. `dyn Fragment` is not `Clone` itself so nodes route
    /// through `clone_box`.
    pub fn deep_clone(&self) -> Node {
        Node {
            fragment: self.fragment.as_ref().map(|f| f.clone_box()),
            children: self
                .children
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_clone()))
                .collect(),
        }
    }

    pub fn reset_recursive(&mut self) {
        if let Some(f) = self.fragment.as_mut() {
            f.reset();
        }
        for child in self.children.values_mut() {
            child.reset_recursive();
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("has_fragment", &self.fragment.is_some())
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}
