// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use digest::{InstanceName, InstanceNameTrie};
use tonic::Status;

/// Decides whether the caller may act on a given instance name. How the
/// caller was authenticated is a concern of the surrounding server wiring;
/// implementations of this trait only evaluate the resulting policy.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, instance_name: &InstanceName) -> Result<(), Status>;
}

/// Unconditionally allows or denies every request. The denying form is also
/// what configurations use to turn a service surface off entirely.
pub struct StaticAuthorizer {
    allow: bool,
}

impl StaticAuthorizer {
    pub fn allow_all() -> Self {
        StaticAuthorizer { allow: true }
    }

    pub fn deny_all() -> Self {
        StaticAuthorizer { allow: false }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, instance_name: &InstanceName) -> Result<(), Status> {
        if self.allow {
            Ok(())
        } else {
            log::warn!(
                "auth_failure: static policy denied instance {:?}",
                instance_name.as_str()
            );
            Err(Status::permission_denied(format!(
                "Permission denied for instance name {:?}",
                instance_name.as_str()
            )))
        }
    }
}

/// Allows requests whose instance name falls under one of a fixed set of
/// prefixes.
pub struct InstanceNamePrefixAuthorizer {
    allowed: InstanceNameTrie<()>,
}

impl InstanceNamePrefixAuthorizer {
    pub fn new(prefixes: impl IntoIterator<Item = InstanceName>) -> Self {
        let mut allowed = InstanceNameTrie::new();
        for prefix in prefixes {
            allowed.set(&prefix, ());
        }
        InstanceNamePrefixAuthorizer { allowed }
    }
}

#[async_trait]
impl Authorizer for InstanceNamePrefixAuthorizer {
    async fn authorize(&self, instance_name: &InstanceName) -> Result<(), Status> {
        match self.allowed.get_longest_prefix(instance_name.as_str()) {
            Some(_) => Ok(()),
            None => {
                log::warn!(
                    "auth_failure: no allowed prefix matches instance {:?}",
                    instance_name.as_str()
                );
                Err(Status::permission_denied(format!(
                    "Permission denied for instance name {:?}",
                    instance_name.as_str()
                )))
            }
        }
    }
}
