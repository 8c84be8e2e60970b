/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Composition root. Wires the configuration tree, cache, policy engine,
//! enforcement controllers and request pipeline together and exposes both
//! gRPC surfaces. Every dependency is constructed explicitly here and
//! passed down; nothing is looked up through a global registry.

mod bootstrap;
mod cli;
mod controllers;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Mutex as AsyncMutex;
use tonic::transport::Server;
use tracing::{error, info, warn};

use api::proto::agentconfig::agent_config_server::AgentConfigServer;
use api::proto::runtime::runtime_relay_server::RuntimeRelayServer;
use cfgtree::{InstrumentationFragment, LoggerFragment, Source, Tree};
use pipeline::{AgentConfigService, Hooks, Pipeline, RuntimeRelayService, StubBackend, Supervisor};
use policy::{Multiplexer, PoolsFragment, PoolsPolicy};
use rdt::RdtFragment;
use statecache::Cache;

const CONFIG_PATH_POOLS: &str = "policy.static-pools";
const CONFIG_PATH_RDT: &str = "rdt";
const CONFIG_PATH_LOGGER: &str = "logger";
const CONFIG_PATH_INSTRUMENTATION: &str = "instrumentation";

fn register_fragments(tree: &mut Tree) -> anyhow::Result<()> {
    tree.register(CONFIG_PATH_LOGGER, LoggerFragment::default())?;
    tree.register(CONFIG_PATH_INSTRUMENTATION, InstrumentationFragment::default())?;
    tree.register(CONFIG_PATH_POOLS, PoolsFragment::default())?;
    tree.register(CONFIG_PATH_RDT, RdtFragment::default())?;
    Ok(())
}

/// Listens for `signal_num` and re-applies `force_config` to the shared tree
/// each time it fires. A missing `--force-config` leaves nothing to install
/// a handler for.
#[cfg(unix)]
fn spawn_force_config_reloader(
    tree: Arc<AsyncMutex<Tree>>,
    force_config: Option<std::path::PathBuf>,
    signal_num: i32,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let Some(path) = force_config else { return };
    let mut stream = match signal(SignalKind::from_raw(signal_num)) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, signal = signal_num, "failed to install force-config reload signal handler");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            if stream.recv().await.is_none() {
                break;
            }
            info!(path = %path.display(), "reloading force-config on signal");
            match bootstrap::load_document(&path) {
                Some(doc) => {
                    let mut tree = tree.lock().await;
                    if let Err(e) = tree.apply_document(&doc, Source::File) {
                        warn!(error = %e, "signal-triggered force-config reload was rejected");
                    }
                }
                None => warn!(path = %path.display(), "force-config unreadable on signal-triggered reload"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_force_config_reloader(
    _tree: Arc<AsyncMutex<Tree>>,
    _force_config: Option<std::path::PathBuf>,
    _signal_num: i32,
) {
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    let log_handle = common::logging::init("info", false);

    info!(
        metrics_interval = args.metrics_interval,
        rebalance_interval = args.rebalance_interval,
        "starting resourced"
    );
    if args.metrics_interval > 0 {
        warn!("metrics scrape endpoint is not implemented; --metrics-interval is accepted for CLI compatibility only");
    }

    let mut tree = Tree::new();
    register_fragments(&mut tree)?;

    if args.reset_config {
        info!("--reset-config given, starting from registered defaults");
    } else if let Some(doc) = bootstrap::startup_document(
        args.force_config.as_deref(),
        args.fallback_config.as_deref(),
    ) {
        if let Err(e) = tree.apply_document(&doc, Source::File) {
            error!(error = %e, "startup configuration document was rejected");
            anyhow::bail!("startup configuration rejected: {e}");
        }
    }

    if let Some(logger) = tree.fragment::<LoggerFragment>(CONFIG_PATH_LOGGER) {
        if let Err(e) = log_handle.set_level(&logger.level) {
            warn!(error = e, "failed to apply configured log level");
        }
    }

    let cache = Cache::open(&args.relay_dir)?;

    let rdt_fragment = tree
        .fragment::<RdtFragment>(CONFIG_PATH_RDT)
        .cloned()
        .unwrap_or_default();
    let controller_table = controllers::build(&rdt_fragment);
    let hooks = Hooks::new(controller_table);

    let pools_fragment = tree
        .fragment::<PoolsFragment>(CONFIG_PATH_POOLS)
        .cloned()
        .unwrap_or_default();
    let policy = Multiplexer::new(Box::new(PoolsPolicy::from_fragment(&pools_fragment)));

    let backend = Arc::new(StubBackend);
    let pipeline = Arc::new(Pipeline::new(cache, policy, hooks, backend));

    if args.reset_policy {
        info!("--reset-policy given, policy starts with no adopted containers");
    } else {
        let runtime_ids = match pipeline.runtime_container_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "failed to list runtime containers for startup resync, assuming none");
                Vec::new()
            }
        };
        if let Err(e) = pipeline.resync(&runtime_ids).await {
            warn!(error = %e, "startup resync reported errors");
        }
    }

    if args.disable_policy_switch {
        info!("policy switching disabled by --disable-policy-switch");
    }

    let tree = Arc::new(AsyncMutex::new(tree));
    spawn_force_config_reloader(tree.clone(), args.force_config.clone(), args.force_config_signal);

    let runtime_service = RuntimeRelayServer::new(RuntimeRelayService::new(pipeline.clone()));
    let config_service =
        AgentConfigServer::new(AgentConfigService::new(tree.clone(), Some(log_handle)));

    let relay_addr = args.relay_socket.parse()?;
    let config_addr = args.config_socket.parse()?;
    info!(%relay_addr, "runtime-facing surface listening");
    info!(%config_addr, "configuration-facing surface listening");
    info!(runtime_socket = %args.runtime_socket, image_socket = %args.image_socket, agent_socket = %args.agent_socket, "downstream collaborator addresses recorded (not dialed: out of scope)");

    let supervisor = Supervisor::spawn(pipeline.clone(), Duration::from_secs(args.rebalance_interval));

    let relay_server = Server::builder().add_service(runtime_service).serve(relay_addr);
    let config_server = Server::builder().add_service(config_service).serve(config_addr);

    tokio::select! {
        result = relay_server => {
            if let Err(e) = result {
                error!(error = %e, "runtime relay server exited");
            }
        }
        result = config_server => {
            if let Err(e) = result {
                error!(error = %e, "agent config server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    supervisor.stop().await;
    info!("resourced stopped cleanly");
    Ok(())
}
