/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Hierarchical configuration tree.
//!
//! Owners register a typed [`fragment::FragmentSpec`] at a dotted path.
//! Incoming YAML documents (from the fallback file, an agent push, or the
//! CLI) are validated against every touched fragment before anything is
//! mutated, and applied as one atomic swap. Subscribers registered with
//! [`Tree::add_notify`] (tree-wide) or [`Tree::add_notify_at`] (a node and
//! its descendants) see an [`event::Event`] per touched path, in
//! depth-first post order across the whole document, and can veto the
//! update by returning an error -- which rolls the whole document back.

pub mod builtin;
pub mod event;
pub mod fragment;
pub mod node;
pub mod tree;

pub use builtin::{InstrumentationFragment, LoggerFragment};
pub use event::{Event, EventKind, Source};
pub use fragment::{Fragment, FragmentSpec, TypedFragment};
pub use node::Node;
pub use tree::Tree;
