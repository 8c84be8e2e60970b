/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Command-line surface. Kept deliberately thin -- flag parsing only, no
//! business logic -- per the "glue, not core" note on this interface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Node resource manager daemon", long_about = None)]
pub struct Args {
    /// Address the configuration-facing gRPC surface listens on.
    #[arg(long, default_value = "127.0.0.1:8701")]
    pub config_socket: String,

    /// Address the runtime-facing gRPC surface listens on.
    #[arg(long, default_value = "127.0.0.1:8702")]
    pub relay_socket: String,

    /// Address of the real downstream container runtime this daemon relays
    /// unintercepted requests to. Out of scope: stored and logged, no
    /// client is built against it yet.
    #[arg(long, default_value = "/run/containerd/containerd.sock")]
    pub runtime_socket: String,

    /// Address of the downstream image service. Same scope note as
    /// `runtime_socket`.
    #[arg(long, default_value = "/run/containerd/containerd.sock")]
    pub image_socket: String,

    /// Address of the node agent's own callback endpoint.
    #[arg(long, default_value = "127.0.0.1:8703")]
    pub agent_socket: String,

    /// Persistent directory: cache snapshot, advisory lock, per-container
    /// mount directories.
    #[arg(long, default_value = "/var/lib/resourced")]
    pub relay_dir: PathBuf,

    /// Configuration document loaded if `force_config` is absent or fails
    /// to load.
    #[arg(long)]
    pub fallback_config: Option<PathBuf>,

    /// Configuration document loaded at startup and re-applied whenever
    /// `force_config_signal` is received.
    #[arg(long)]
    pub force_config: Option<PathBuf>,

    /// Signal number that triggers a `force_config` reload (SIGHUP by
    /// default; see `libc` signal numbering).
    #[arg(long, default_value_t = 1)]
    pub force_config_signal: i32,

    /// Reset the active policy's state on startup instead of adopting
    /// whatever the cache remembers.
    #[arg(long, default_value_t = false)]
    pub reset_policy: bool,

    /// Reset the configuration tree to its registered defaults on startup,
    /// ignoring any document otherwise loaded.
    #[arg(long, default_value_t = false)]
    pub reset_config: bool,

    /// Refuse any request to switch the active policy implementation.
    #[arg(long, default_value_t = false)]
    pub disable_policy_switch: bool,

    /// Metrics collection interval in seconds. No scrape endpoint is
    /// implemented; accepted for CLI compatibility and logged at startup.
    #[arg(long, default_value_t = 30)]
    pub metrics_interval: u64,

    /// Rebalance loop interval in seconds.
    #[arg(long, default_value_t = 60)]
    pub rebalance_interval: u64,
}
