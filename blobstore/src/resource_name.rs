// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Parsing of ByteStream resource names.
//!
//! Downloads address a blob as `{instance_name}/blobs/{hash}/{size}` and
//! uploads as `{instance_name}/uploads/{uuid}/blobs/{hash}/{size}{/optional
//! metadata...}`. The `{instance_name}` may be blank (with no leading slash),
//! which is why parsing searches for the `blobs`/`uploads` marker components
//! rather than splitting at fixed positions; instance names can never contain
//! the markers themselves.

use digest::{Digest, DigestFunction, InstanceName};

#[derive(Debug, Eq, PartialEq)]
pub struct ParsedWriteResourceName {
    pub digest: Digest,
    pub uuid: String,
}

fn parse_digest(
    instance_parts: &[&str],
    resource: &str,
    hash: &str,
    size: &str,
) -> Result<Digest, String> {
    let instance_name = if instance_parts.is_empty() {
        InstanceName::EMPTY
    } else {
        let last_instance_name_index =
            instance_parts.iter().map(|x| (*x).len()).sum::<usize>() + instance_parts.len() - 1;
        InstanceName::new(&resource[0..last_instance_name_index])?
    };

    let size_bytes = size
        .parse::<i64>()
        .map_err(|_| "Malformed resource name: cannot parse size".to_owned())?;

    let digest_function = DigestFunction::from_hash_length(hash.len())?;
    Digest::new(instance_name, digest_function, hash, size_bytes)
}

/// Parses a resource name of the form `"{instance_name}/blobs/{hash}/{size}"`
/// into the digest it addresses.
pub fn parse_read_resource_name(resource: &str) -> Result<Digest, String> {
    if resource.is_empty() {
        return Err("Missing resource name".to_owned());
    }

    // Parse the resource name into parts separated by slashes (/).
    let parts: Vec<_> = resource.split('/').collect();

    // Search for the `blobs` path component.
    let blobs_index = match parts.iter().position(|p| *p == "blobs") {
        Some(index) => index,
        None => return Err("Malformed resource name: missing `blobs` component".to_owned()),
    };

    if parts.len() != blobs_index + 3 {
        return Err(
            "Malformed resource name: expected `blobs` to be followed by exactly a hash and a size"
                .to_owned(),
        );
    }

    parse_digest(
        &parts[0..blobs_index],
        resource,
        parts[blobs_index + 1],
        parts[blobs_index + 2],
    )
}

/// Parses a resource name of the form
/// `{instance_name}/uploads/{uuid}/blobs/{hash}/{size}` into the digest it
/// addresses and the client-chosen upload UUID. Clients may append further
/// path components after the size; they are ignored.
pub fn parse_write_resource_name(resource: &str) -> Result<ParsedWriteResourceName, String> {
    if resource.is_empty() {
        return Err("Missing resource name".to_owned());
    }

    let parts: Vec<_> = resource.split('/').collect();

    // Search for the `uploads` path component.
    let uploads_index = match parts.iter().position(|p| *p == "uploads") {
        Some(index) => index,
        None => return Err("Malformed resource name: missing `uploads` component".to_owned()),
    };

    if (parts.len() - uploads_index) < 5 {
        return Err(
            "Malformed resource name: not enough path components after `uploads`".to_owned(),
        );
    }

    if parts[uploads_index + 2] != "blobs" {
        return Err("Malformed resource name: expected `blobs` component".to_owned());
    }

    let digest = parse_digest(
        &parts[0..uploads_index],
        resource,
        parts[uploads_index + 3],
        parts[uploads_index + 4],
    )?;

    Ok(ParsedWriteResourceName {
        digest,
        uuid: parts[uploads_index + 1].to_owned(),
    })
}
