// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use async_trait::async_trait;
use digest::{InstanceName, InstanceNameTrie};
use futures::StreamExt;
use grpc_util::status::error_wrap;
use protos::build::bazel::remote::execution::v2::{
    ExecuteRequest, ServerCapabilities, WaitExecutionRequest,
};
use tonic::Status;

use crate::{BuildQueue, OperationStream};

/// How a scheduler backend hangs off the demultiplexer.
pub struct BackendRegistration {
    /// Instance-name prefix routed to this backend. Requests strip this
    /// prefix before forwarding. Longest prefix wins.
    pub instance_name_prefix: InstanceName,
    /// Prefix prepended to the instance name that remains after stripping
    /// `instance_name_prefix`, yielding the backend-side instance name.
    pub replacement_prefix: InstanceName,
    /// Prefix under which this backend's operations are exposed to callers:
    /// operation names become `{operations_prefix}/operations/{name}`, and
    /// incoming `WaitExecution` names are routed back by this prefix. The
    /// `operations` separator cannot collide with instance names, which may
    /// not contain it.
    pub operations_prefix: InstanceName,
    pub backend: Arc<dyn BuildQueue>,
}

struct Entry {
    replacement_prefix: InstanceName,
    operations_prefix: InstanceName,
    backend: Arc<dyn BuildQueue>,
}

/// Routes Execution-service calls to one of several scheduler backends by a
/// longest-prefix match on the REv2 instance name, rewriting operation names
/// so that streaming responses can be correlated back to the right backend.
/// The routing tables are immutable after construction.
pub struct DemultiplexingBuildQueue {
    entries: Vec<Entry>,
    instance_prefixes: InstanceNameTrie<usize>,
    operations_prefixes: InstanceNameTrie<usize>,
}

/// Split an operation name of the form `{prefix}/operations/{name}` at the
/// first occurrence of the `operations` component.
pub(crate) fn split_operation_name(name: &str) -> Option<(&str, &str)> {
    if let Some(rest) = name.strip_prefix("operations/") {
        return Some(("", rest));
    }
    let index = name.find("/operations/")?;
    Some((&name[..index], &name[index + "/operations/".len()..]))
}

impl DemultiplexingBuildQueue {
    pub fn new(registrations: Vec<BackendRegistration>) -> Self {
        let mut entries = Vec::with_capacity(registrations.len());
        let mut instance_prefixes = InstanceNameTrie::new();
        let mut operations_prefixes = InstanceNameTrie::new();
        for registration in registrations {
            let index = entries.len();
            instance_prefixes.set(&registration.instance_name_prefix, index);
            operations_prefixes.set(&registration.operations_prefix, index);
            entries.push(Entry {
                replacement_prefix: registration.replacement_prefix,
                operations_prefix: registration.operations_prefix,
                backend: registration.backend,
            });
        }
        DemultiplexingBuildQueue {
            entries,
            instance_prefixes,
            operations_prefixes,
        }
    }

    fn resolve_instance(
        &self,
        instance_name: &str,
    ) -> Result<(&Entry, String, InstanceName), Status> {
        let (index, matched, remainder) = self
            .instance_prefixes
            .get_longest_prefix(instance_name)
            .ok_or_else(|| {
                Status::not_found(format!("Unknown instance name prefix: {instance_name:?}"))
            })?;
        let entry = &self.entries[*index];
        let backend_instance_name = InstanceName::new(
            entry.replacement_prefix.join_path(remainder),
        )
        .map_err(Status::invalid_argument)?;
        Ok((entry, matched.to_owned(), backend_instance_name))
    }

    /// Resolve the backend that produced an operation name handed out by
    /// `prefix_operation_names`.
    fn resolve_operation_name<'a>(&self, name: &'a str) -> Result<(&Entry, &'a str), Status> {
        let (prefix, backend_name) = split_operation_name(name).ok_or_else(|| {
            Status::invalid_argument(format!(
                "Operation name {name:?} does not contain an `operations` component"
            ))
        })?;
        let (index, _, remainder) = self
            .operations_prefixes
            .get_longest_prefix(prefix)
            .filter(|(_, _, remainder)| remainder.is_empty())
            .ok_or_else(|| {
                Status::not_found(format!("Unknown operation name prefix: {prefix:?}"))
            })?;
        debug_assert!(remainder.is_empty());
        Ok((&self.entries[*index], backend_name))
    }
}

/// Prefix every operation name in a scheduler's response stream with
/// `{operations_prefix}/operations/`, so a later `WaitExecution` can be
/// routed back.
fn prefix_operation_names(
    operations_prefix: InstanceName,
    stream: OperationStream,
) -> OperationStream {
    Box::pin(stream.map(move |result| {
        result.map(|mut operation| {
            operation.name = operations_prefix.join_path(&format!("operations/{}", operation.name));
            operation
        })
    }))
}

#[async_trait]
impl BuildQueue for DemultiplexingBuildQueue {
    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        let (entry, matched, backend_instance_name) =
            self.resolve_instance(instance_name.as_str())?;
        entry
            .backend
            .get_capabilities(&backend_instance_name)
            .await
            .map_err(|err| {
                error_wrap(&format!("Backend for instance name prefix {matched:?}"), err)
            })
    }

    async fn execute(&self, mut request: ExecuteRequest) -> Result<OperationStream, Status> {
        let (entry, matched, backend_instance_name) =
            self.resolve_instance(&request.instance_name)?;
        request.instance_name = backend_instance_name.as_str().to_owned();
        let stream = entry.backend.execute(request).await.map_err(|err| {
            error_wrap(&format!("Backend for instance name prefix {matched:?}"), err)
        })?;
        Ok(prefix_operation_names(
            entry.operations_prefix.clone(),
            stream,
        ))
    }

    async fn wait_execution(
        &self,
        mut request: WaitExecutionRequest,
    ) -> Result<OperationStream, Status> {
        let (entry, backend_name) = self.resolve_operation_name(&request.name)?;
        request.name = backend_name.to_owned();
        let operations_prefix = entry.operations_prefix.clone();
        let stream = entry.backend.wait_execution(request).await.map_err(|err| {
            error_wrap(
                &format!(
                    "Backend for operation name prefix {:?}",
                    operations_prefix.as_str()
                ),
                err,
            )
        })?;
        Ok(prefix_operation_names(operations_prefix, stream))
    }
}
