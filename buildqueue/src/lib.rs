// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Routing of REv2 Execution-service calls to scheduler backends.

#![deny(warnings)]

use std::pin::Pin;

use async_trait::async_trait;
use digest::InstanceName;
use futures::Stream;
use protos::build::bazel::remote::execution::v2::{ExecuteRequest, ServerCapabilities, WaitExecutionRequest};
use protos::google::longrunning::Operation;
use tonic::Status;

mod authorizing;
mod demultiplexing;
mod forwarding;

pub use authorizing::AuthorizingBuildQueue;
pub use demultiplexing::{BackendRegistration, DemultiplexingBuildQueue};
pub use forwarding::ForwardingBuildQueue;

/// Alias for the type of a stream of long-running operation updates, as
/// produced by the `Execute` and `WaitExecution` calls.
pub type OperationStream = Pin<Box<dyn Stream<Item = Result<Operation, Status>> + Send + 'static>>;

/// The subset of the REv2 Execution and Capabilities services a frontend
/// needs to hand build requests to a scheduler.
#[async_trait]
pub trait BuildQueue: Send + Sync {
    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status>;

    async fn execute(&self, request: ExecuteRequest) -> Result<OperationStream, Status>;

    async fn wait_execution(&self, request: WaitExecutionRequest)
        -> Result<OperationStream, Status>;
}
