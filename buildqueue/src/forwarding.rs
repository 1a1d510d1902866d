// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use digest::InstanceName;
use grpc_util::status::is_retriable;
use protos::build::bazel::remote::execution::v2::capabilities_client::CapabilitiesClient;
use protos::build::bazel::remote::execution::v2::execution_client::ExecutionClient;
use protos::build::bazel::remote::execution::v2::{
    ExecuteRequest, GetCapabilitiesRequest, ServerCapabilities, WaitExecutionRequest,
};
use tonic::transport::Channel;
use tonic::{Code, Status};

use crate::{BuildQueue, OperationStream};

/// A `BuildQueue` that forwards every call to a remote scheduler over a
/// shared channel. Each streaming call opens its own stream; dropping the
/// returned stream cancels the call on the scheduler side.
pub struct ForwardingBuildQueue {
    execution_client: ExecutionClient<Channel>,
    capabilities_client: CapabilitiesClient<Channel>,
}

impl ForwardingBuildQueue {
    pub fn new(channel: Channel) -> Self {
        ForwardingBuildQueue {
            execution_client: ExecutionClient::new(channel.clone()),
            capabilities_client: CapabilitiesClient::new(channel),
        }
    }
}

fn log_unexpected_error(service_method: &str, status: &Status) {
    if let Code::Internal
    | Code::Cancelled
    | Code::Unavailable
    | Code::Unknown
    | Code::ResourceExhausted
    | Code::Aborted
    | Code::Unimplemented = status.code()
    {
        log::error!("unexpected scheduler error for {service_method}: {status:?}");
    }
}

#[async_trait]
impl BuildQueue for ForwardingBuildQueue {
    #[tracing::instrument(skip_all)]
    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        metrics::increment_counter!("buildqueue_scheduler_requests_total", "method" => "GetCapabilities");
        let request = GetCapabilitiesRequest {
            instance_name: instance_name.as_str().to_owned(),
        };

        let mut client = self.capabilities_client.clone();
        let mut result = client.get_capabilities(request.clone()).await;
        if let Err(ref status) = result {
            // Capability probes are idempotent, so one retry on a transient
            // failure is safe.
            if is_retriable(status) {
                metrics::increment_counter!("buildqueue_scheduler_retries_total", "method" => "GetCapabilities");
                let mut client = self.capabilities_client.clone();
                result = client.get_capabilities(request).await;
            }
        }
        match result {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                log_unexpected_error("Capabilities.GetCapabilities", &status);
                Err(status)
            }
        }
    }

    #[tracing::instrument(skip_all)]
    async fn execute(&self, request: ExecuteRequest) -> Result<OperationStream, Status> {
        metrics::increment_counter!("buildqueue_scheduler_requests_total", "method" => "Execute");
        let mut client = self.execution_client.clone();
        match client.execute(request).await {
            Ok(response) => Ok(Box::pin(response.into_inner())),
            Err(status) => {
                log_unexpected_error("Execution.Execute", &status);
                Err(status)
            }
        }
    }

    #[tracing::instrument(skip_all)]
    async fn wait_execution(
        &self,
        request: WaitExecutionRequest,
    ) -> Result<OperationStream, Status> {
        metrics::increment_counter!("buildqueue_scheduler_requests_total", "method" => "WaitExecution");
        let mut client = self.execution_client.clone();
        match client.wait_execution(request).await {
            Ok(response) => Ok(Box::pin(response.into_inner())),
            Err(status) => {
                log_unexpected_error("Execution.WaitExecution", &status);
                Err(status)
            }
        }
    }
}
