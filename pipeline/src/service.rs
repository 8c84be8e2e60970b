/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The two gRPC surfaces the daemon exposes: the runtime relay (wraps
//! [`crate::pipeline::Pipeline`]) and the agent configuration surface
//! (applies documents to a shared [`cfgtree::Tree`]).

use std::sync::Arc;

use tokio::sync::Mutex;
use tonic::{Request, Response, Status};

use api::proto::agentconfig::agent_config_server::AgentConfig;
use api::proto::agentconfig::{
    SetAdjustmentRequest, SetAdjustmentResponse, SetConfigRequest, SetConfigResponse,
};
use api::proto::runtime::runtime_relay_server::RuntimeRelay;
use api::proto::runtime::{
    CreateContainerRequest, CreateContainerResponse, ListContainersRequest,
    ListContainersResponse, RemoveContainerRequest, RemoveContainerResponse,
    RemovePodSandboxRequest, RemovePodSandboxResponse, RunPodSandboxRequest,
    RunPodSandboxResponse, StartContainerRequest, StartContainerResponse, StopContainerRequest,
    StopContainerResponse, StopPodSandboxRequest, StopPodSandboxResponse,
    UpdateContainerResourcesRequest, UpdateContainerResourcesResponse,
};

use cfgtree::{LoggerFragment, Source, Tree};
use common::logging::LogHandle;
use common::Error;

use crate::pipeline::Pipeline;

fn error_to_status(error: Error) -> Status {
    match error {
        Error::NotFound(_) => Status::not_found(error.to_string()),
        Error::ConfigRejected { .. } | Error::PolicyRejected(_) | Error::InvariantViolation(_) => {
            Status::invalid_argument(error.to_string())
        }
        Error::RollbackDegraded(_) => Status::aborted(error.to_string()),
        _ => Status::internal(error.to_string()),
    }
}

pub struct RuntimeRelayService {
    pipeline: Arc<Pipeline>,
}

impl RuntimeRelayService {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

macro_rules! relay_rpc {
    ($name:ident, $req:ty, $resp:ty, $method:ident) => {
        async fn $name(
            &self,
            request: Request<$req>,
        ) -> std::result::Result<Response<$resp>, Status> {
            let reply = self
                .pipeline
                .$method(request.into_inner())
                .await
                .map_err(error_to_status)?;
            Ok(Response::new(reply))
        }
    };
}

#[tonic::async_trait]
impl RuntimeRelay for RuntimeRelayService {
    relay_rpc!(run_pod_sandbox, RunPodSandboxRequest, RunPodSandboxResponse, run_pod_sandbox);
    relay_rpc!(stop_pod_sandbox, StopPodSandboxRequest, StopPodSandboxResponse, stop_pod_sandbox);
    relay_rpc!(
        remove_pod_sandbox,
        RemovePodSandboxRequest,
        RemovePodSandboxResponse,
        remove_pod_sandbox
    );
    relay_rpc!(create_container, CreateContainerRequest, CreateContainerResponse, create_container);
    relay_rpc!(start_container, StartContainerRequest, StartContainerResponse, start_container);
    relay_rpc!(stop_container, StopContainerRequest, StopContainerResponse, stop_container);
    relay_rpc!(remove_container, RemoveContainerRequest, RemoveContainerResponse, remove_container);
    relay_rpc!(list_containers, ListContainersRequest, ListContainersResponse, list_containers);
    relay_rpc!(
        update_container_resources,
        UpdateContainerResourcesRequest,
        UpdateContainerResourcesResponse,
        update_container_resources
    );
}

/// Turns a dotted-key flat map into the nested mapping `Tree::apply_document`
/// expects. Each value is itself parsed as YAML so `"true"`/`"5"` become
/// typed scalars rather than always landing as strings.
fn nest(values: &std::collections::HashMap<String, String>) -> std::result::Result<serde_yaml::Value, String> {
    let mut root = serde_yaml::Mapping::new();
    for (key, raw) in values {
        let scalar: serde_yaml::Value = serde_yaml::from_str(raw)
            .map_err(|e| format!("value for '{key}' is not valid YAML: {e}"))?;
        let segments: Vec<&str> = key.split('.').collect();
        insert_nested(&mut root, &segments, scalar);
    }
    Ok(serde_yaml::Value::Mapping(root))
}

fn insert_nested(map: &mut serde_yaml::Mapping, segments: &[&str], value: serde_yaml::Value) {
    let Some((head, rest)) = segments.split_first() else { return };
    let key = serde_yaml::Value::String(head.to_string());
    if rest.is_empty() {
        map.insert(key, value);
        return;
    }
    let entry = map
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    if let serde_yaml::Value::Mapping(child) = entry {
        insert_nested(child, rest, value);
    }
}

pub struct AgentConfigService {
    tree: Arc<Mutex<Tree>>,
    log_handle: Option<LogHandle>,
}

impl AgentConfigService {
    pub fn new(tree: Arc<Mutex<Tree>>, log_handle: Option<LogHandle>) -> Self {
        Self { tree, log_handle }
    }
}

/// If the just-applied document touched `logger`, push its new level to
/// the live tracing filter. Reading the fragment back rather than
/// threading the new value through the event keeps `Tree`'s notifier
/// contract (path/kind/source only) unchanged for every other subscriber.
fn retune_logging(tree: &Tree, events: &[cfgtree::Event], log_handle: Option<&LogHandle>) {
    let Some(handle) = log_handle else { return };
    if !events.iter().any(|e| e.path == "logger") {
        return;
    }
    if let Some(logger) = tree.fragment::<LoggerFragment>("logger") {
        if let Err(e) = handle.set_level(&logger.level) {
            tracing::warn!(error = e, "failed to apply updated log level");
        }
    }
}

#[tonic::async_trait]
impl AgentConfig for AgentConfigService {
    async fn set_config(
        &self,
        request: Request<SetConfigRequest>,
    ) -> std::result::Result<Response<SetConfigResponse>, Status> {
        let req = request.into_inner();
        let doc = match nest(&req.values) {
            Ok(doc) => doc,
            Err(reason) => return Ok(Response::new(SetConfigResponse { error: reason })),
        };
        let mut tree = self.tree.lock().await;
        match tree.apply_document(&doc, Source::Agent) {
            Ok(events) => {
                retune_logging(&tree, &events, self.log_handle.as_ref());
                Ok(Response::new(SetConfigResponse { error: String::new() }))
            }
            Err(e) => Ok(Response::new(SetConfigResponse { error: e.to_string() })),
        }
    }

    async fn set_adjustment(
        &self,
        request: Request<SetAdjustmentRequest>,
    ) -> std::result::Result<Response<SetAdjustmentResponse>, Status> {
        let req = request.into_inner();
        let mut tree = self.tree.lock().await;
        match tree.apply_yaml_str(&req.yaml, Source::Agent) {
            Ok(events) => {
                retune_logging(&tree, &events, self.log_handle.as_ref());
                Ok(Response::new(SetAdjustmentResponse { error: String::new() }))
            }
            Err(e) => Ok(Response::new(SetAdjustmentResponse { error: e.to_string() })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nest_builds_dotted_path_into_mapping() {
        let mut values = std::collections::HashMap::new();
        values.insert("policy.static-pools.enabled".to_string(), "true".to_string());
        let doc = nest(&values).unwrap();
        let policy = doc.get("policy").unwrap();
        let pools = policy.get("static-pools").unwrap();
        assert_eq!(pools.get("enabled").unwrap(), &serde_yaml::Value::Bool(true));
    }
}
