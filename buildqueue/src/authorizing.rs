// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use async_trait::async_trait;
use digest::InstanceName;
use grpc_util::auth::Authorizer;
use protos::build::bazel::remote::execution::v2::{
    ExecuteRequest, ServerCapabilities, WaitExecutionRequest,
};
use tonic::Status;

use crate::demultiplexing::split_operation_name;
use crate::{BuildQueue, OperationStream};

/// Gates every call on an `Authorizer` decision for the instance name the
/// caller is acting on. For `WaitExecution` the instance-name prefix embedded
/// in the operation name is what gets authorized, as the original instance
/// name is not carried in the request.
pub struct AuthorizingBuildQueue<BQ> {
    authorizer: Arc<dyn Authorizer>,
    backend: BQ,
}

impl<BQ> AuthorizingBuildQueue<BQ>
where
    BQ: BuildQueue,
{
    pub fn new(authorizer: Arc<dyn Authorizer>, backend: BQ) -> Self {
        AuthorizingBuildQueue {
            authorizer,
            backend,
        }
    }
}

#[async_trait]
impl<BQ> BuildQueue for AuthorizingBuildQueue<BQ>
where
    BQ: BuildQueue,
{
    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        self.authorizer.authorize(instance_name).await?;
        self.backend.get_capabilities(instance_name).await
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<OperationStream, Status> {
        let instance_name =
            InstanceName::new(request.instance_name.clone()).map_err(Status::invalid_argument)?;
        self.authorizer.authorize(&instance_name).await?;
        self.backend.execute(request).await
    }

    async fn wait_execution(
        &self,
        request: WaitExecutionRequest,
    ) -> Result<OperationStream, Status> {
        let (prefix, _) = split_operation_name(&request.name).ok_or_else(|| {
            Status::invalid_argument(format!(
                "Operation name {:?} does not contain an `operations` component",
                request.name
            ))
        })?;
        let instance_name = InstanceName::new(prefix).map_err(Status::invalid_argument)?;
        self.authorizer.authorize(&instance_name).await?;
        self.backend.wait_execution(request).await
    }
}
