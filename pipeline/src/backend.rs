/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The downstream container runtime, modeled as a narrow trait. The actual
//! wire-level relay to a real runtime is out of scope (see the
//! non-goals); this trait is the seam a real client would plug into, and
//! [`StubBackend`] is a deterministic stand-in used by the pipeline's own
//! tests.

use async_trait::async_trait;
use tonic::Status;

use api::proto::runtime::{
    CreateContainerRequest, CreateContainerResponse, ListContainersRequest,
    ListContainersResponse, RemoveContainerRequest, RemoveContainerResponse,
    RemovePodSandboxRequest, RemovePodSandboxResponse, RunPodSandboxRequest,
    RunPodSandboxResponse, StartContainerRequest, StartContainerResponse, StopContainerRequest,
    StopContainerResponse, StopPodSandboxRequest, StopPodSandboxResponse,
    UpdateContainerResourcesRequest, UpdateContainerResourcesResponse,
};

#[async_trait]
pub trait RuntimeBackend: Send + Sync {
    async fn run_pod_sandbox(
        &self,
        req: RunPodSandboxRequest,
    ) -> Result<RunPodSandboxResponse, Status>;
    async fn stop_pod_sandbox(
        &self,
        req: StopPodSandboxRequest,
    ) -> Result<StopPodSandboxResponse, Status>;
    async fn remove_pod_sandbox(
        &self,
        req: RemovePodSandboxRequest,
    ) -> Result<RemovePodSandboxResponse, Status>;
    async fn create_container(
        &self,
        req: CreateContainerRequest,
    ) -> Result<CreateContainerResponse, Status>;
    async fn start_container(
        &self,
        req: StartContainerRequest,
    ) -> Result<StartContainerResponse, Status>;
    async fn stop_container(
        &self,
        req: StopContainerRequest,
    ) -> Result<StopContainerResponse, Status>;
    async fn remove_container(
        &self,
        req: RemoveContainerRequest,
    ) -> Result<RemoveContainerResponse, Status>;
    async fn list_containers(
        &self,
        req: ListContainersRequest,
    ) -> Result<ListContainersResponse, Status>;
    async fn update_container_resources(
        &self,
        req: UpdateContainerResourcesRequest,
    ) -> Result<UpdateContainerResourcesResponse, Status>;
}

/// Deterministic in-memory backend: issues a fresh id for every create,
/// never actually exits a container, and lists back whatever it was asked
/// to create. Good enough to drive the pipeline's critical sequences in
/// tests without a real runtime socket.
#[derive(Default)]
pub struct StubBackend;

#[async_trait]
impl RuntimeBackend for StubBackend {
    async fn run_pod_sandbox(
        &self,
        _req: RunPodSandboxRequest,
    ) -> Result<RunPodSandboxResponse, Status> {
        Ok(RunPodSandboxResponse {
            pod_id: common::ids::new_cache_id(),
        })
    }

    async fn stop_pod_sandbox(
        &self,
        _req: StopPodSandboxRequest,
    ) -> Result<StopPodSandboxResponse, Status> {
        Ok(StopPodSandboxResponse {})
    }

    async fn remove_pod_sandbox(
        &self,
        _req: RemovePodSandboxRequest,
    ) -> Result<RemovePodSandboxResponse, Status> {
        Ok(RemovePodSandboxResponse {})
    }

    async fn create_container(
        &self,
        _req: CreateContainerRequest,
    ) -> Result<CreateContainerResponse, Status> {
        Ok(CreateContainerResponse {
            container_id: common::ids::new_cache_id(),
        })
    }

    async fn start_container(
        &self,
        _req: StartContainerRequest,
    ) -> Result<StartContainerResponse, Status> {
        Ok(StartContainerResponse {})
    }

    async fn stop_container(
        &self,
        _req: StopContainerRequest,
    ) -> Result<StopContainerResponse, Status> {
        Ok(StopContainerResponse {})
    }

    async fn remove_container(
        &self,
        _req: RemoveContainerRequest,
    ) -> Result<RemoveContainerResponse, Status> {
        Ok(RemoveContainerResponse {})
    }

    async fn list_containers(
        &self,
        _req: ListContainersRequest,
    ) -> Result<ListContainersResponse, Status> {
        Ok(ListContainersResponse { containers: vec![] })
    }

    async fn update_container_resources(
        &self,
        _req: UpdateContainerResourcesRequest,
    ) -> Result<UpdateContainerResourcesResponse, Status> {
        Err(Status::unimplemented("UpdateContainerResources is not supported by this backend"))
    }
}
