// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use md5::Md5;
use protos::build::bazel::remote::execution::v2 as remoting_protos;
use protos::build::bazel::remote::execution::v2::digest_function;
use sha1::Sha1;
use sha2::{Digest as Sha2Digest, Sha256, Sha384, Sha512};

mod instance_name;

pub use instance_name::{InstanceName, InstanceNameTrie};

/// The hash algorithm half of a blob's key. Determines the expected length of
/// the hex hash and how content is hashed.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum DigestFunction {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sha256Tree,
    Vso,
}

impl DigestFunction {
    /// The length of the hex-encoded hash string produced by this function.
    pub fn hash_length(&self) -> usize {
        match self {
            DigestFunction::Md5 => 32,
            DigestFunction::Sha1 => 40,
            DigestFunction::Sha256 => 64,
            DigestFunction::Sha384 => 96,
            DigestFunction::Sha512 => 128,
            DigestFunction::Sha256Tree => 64,
            DigestFunction::Vso => 66,
        }
    }

    /// Create a hasher for this function.
    ///
    /// SHA256TREE and VSO are recognized as key spaces, but their large-object
    /// hashing rules are not implemented here, so content keyed by those
    /// functions cannot be (re)hashed.
    pub fn hasher(&self) -> Result<Hasher, String> {
        match self {
            DigestFunction::Md5 => Ok(Hasher::Md5(Md5::default())),
            DigestFunction::Sha1 => Ok(Hasher::Sha1(Sha1::default())),
            DigestFunction::Sha256 => Ok(Hasher::Sha256(Sha256::default())),
            DigestFunction::Sha384 => Ok(Hasher::Sha384(Sha384::default())),
            DigestFunction::Sha512 => Ok(Hasher::Sha512(Sha512::default())),
            DigestFunction::Sha256Tree | DigestFunction::Vso => Err(format!(
                "Hashing with digest function {self:?} is not supported"
            )),
        }
    }

    pub fn from_proto(value: digest_function::Value) -> Result<Self, String> {
        match value {
            digest_function::Value::Md5 => Ok(DigestFunction::Md5),
            digest_function::Value::Sha1 => Ok(DigestFunction::Sha1),
            digest_function::Value::Sha256 => Ok(DigestFunction::Sha256),
            digest_function::Value::Sha384 => Ok(DigestFunction::Sha384),
            digest_function::Value::Sha512 => Ok(DigestFunction::Sha512),
            digest_function::Value::Sha256tree => Ok(DigestFunction::Sha256Tree),
            digest_function::Value::Vso => Ok(DigestFunction::Vso),
            other => Err(format!(
                "Unsupported digest function: {}",
                other.as_str_name()
            )),
        }
    }

    pub fn to_proto(self) -> digest_function::Value {
        match self {
            DigestFunction::Md5 => digest_function::Value::Md5,
            DigestFunction::Sha1 => digest_function::Value::Sha1,
            DigestFunction::Sha256 => digest_function::Value::Sha256,
            DigestFunction::Sha384 => digest_function::Value::Sha384,
            DigestFunction::Sha512 => digest_function::Value::Sha512,
            DigestFunction::Sha256Tree => digest_function::Value::Sha256tree,
            DigestFunction::Vso => digest_function::Value::Vso,
        }
    }

    /// Infer the digest function from the length of a hex hash string. Used
    /// when parsing ByteStream resource names, where the function is not
    /// spelled out. SHA256TREE shares its length with SHA-256, so plain
    /// SHA-256 wins there.
    pub fn from_hash_length(len: usize) -> Result<Self, String> {
        match len {
            32 => Ok(DigestFunction::Md5),
            40 => Ok(DigestFunction::Sha1),
            64 => Ok(DigestFunction::Sha256),
            96 => Ok(DigestFunction::Sha384),
            128 => Ok(DigestFunction::Sha512),
            66 => Ok(DigestFunction::Vso),
            _ => Err(format!("Unknown digest hash length: {len} characters")),
        }
    }
}

/// Rolling hash state for a single digest function.
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the lowercase hex encoding of the
    /// resulting hash.
    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha384(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// How to render a digest as a flat storage key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyFormat {
    /// Include the instance name in the key. Required for stores where
    /// content visibility is scoped per instance (e.g., the Action Cache).
    WithInstance,
    /// Omit the instance name. Content-addressed blobs are identical across
    /// instances, so CAS backends may deduplicate by using this format.
    WithoutInstance,
}

/// Identifier for a blob: digest function, hex hash, size and instance name.
///
/// Immutable. Two digests compare equal iff all four fields are equal.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Digest {
    instance_name: InstanceName,
    digest_function: DigestFunction,
    hash: String,
    size_bytes: i64,
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest<{:?}, {}, {}, {}>",
            self.digest_function, self.hash, self.size_bytes, self.instance_name
        )
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key(KeyFormat::WithInstance))
    }
}

impl Digest {
    pub fn new(
        instance_name: InstanceName,
        digest_function: DigestFunction,
        hash: &str,
        size_bytes: i64,
    ) -> Result<Self, String> {
        if hash.len() != digest_function.hash_length() {
            return Err(format!(
                "Hash has length {}, while {} characters were expected",
                hash.len(),
                digest_function.hash_length()
            ));
        }
        if let Some(c) = hash.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(format!("Hash contains invalid character {c:?}"));
        }
        if size_bytes < 0 {
            return Err(format!("Invalid blob size: {size_bytes}"));
        }
        Ok(Digest {
            instance_name,
            digest_function,
            hash: hash.to_owned(),
            size_bytes,
        })
    }

    /// Construct a digest from an REv2 `Digest` message, which only carries
    /// the hash and size. The instance name and digest function travel out of
    /// band (request fields) and are supplied by the caller.
    pub fn from_proto(
        instance_name: InstanceName,
        digest_function: DigestFunction,
        proto: &remoting_protos::Digest,
    ) -> Result<Self, String> {
        Digest::new(
            instance_name,
            digest_function,
            &proto.hash,
            proto.size_bytes,
        )
    }

    pub fn to_proto(&self) -> remoting_protos::Digest {
        remoting_protos::Digest {
            hash: self.hash.clone(),
            size_bytes: self.size_bytes,
        }
    }

    /// Compute the digest of `content` under the given function.
    pub fn of_bytes(
        instance_name: InstanceName,
        digest_function: DigestFunction,
        content: &[u8],
    ) -> Result<Self, String> {
        let mut hasher = digest_function.hasher()?;
        hasher.update(content);
        Ok(Digest {
            instance_name,
            digest_function,
            hash: hasher.finalize_hex(),
            size_bytes: content.len() as i64,
        })
    }

    /// Create a digest for another blob in the same namespace: the digest
    /// function and instance name are retained, hash and size substituted.
    pub fn new_derived(&self, hash: &str, size_bytes: i64) -> Result<Self, String> {
        Digest::new(
            self.instance_name.clone(),
            self.digest_function,
            hash,
            size_bytes,
        )
    }

    pub fn instance_name(&self) -> &InstanceName {
        &self.instance_name
    }

    pub fn digest_function(&self) -> DigestFunction {
        self.digest_function
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }

    /// Render the digest as a flat key, suitable for use in hash maps or as
    /// part of an on-disk filename.
    pub fn key(&self, format: KeyFormat) -> String {
        match format {
            KeyFormat::WithInstance => format!(
                "{}-{}-{:?}-{}",
                self.hash, self.size_bytes, self.digest_function, self.instance_name
            ),
            KeyFormat::WithoutInstance => {
                format!(
                    "{}-{}-{:?}",
                    self.hash, self.size_bytes, self.digest_function
                )
            }
        }
    }
}
