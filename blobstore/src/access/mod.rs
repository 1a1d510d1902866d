// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use bytes::Bytes;
use digest::Digest;
use protos::build::bazel::remote::execution::v2::ActionResult;
use tonic::Status;

use crate::buffer::{Buffer, DataIntegrityCallback, Source};

mod memory;

pub use memory::MemoryBlobAccess;

/// Represents how to read and write blobs by digest into a storage backend.
/// Blobs travel as `Buffer`s in both directions: `get` returns a buffer that
/// validates on consumption (errors, including "not found", travel inside
/// the buffer), and `put` consumes one.
#[async_trait]
pub trait BlobAccess: Send + Sync {
    async fn get(&self, digest: &Digest) -> Buffer;

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status>;

    /// Given a list of digests, return the digests that are **not** stored by
    /// this backend. This is used to implement the FindMissingBlobs RPC from
    /// the CAS API.
    async fn find_missing(&self, digests: Vec<Digest>) -> Result<Vec<Digest>, Status>;
}

#[async_trait]
impl<BA> BlobAccess for Box<BA>
where
    BA: BlobAccess + Send + Sync + ?Sized,
{
    async fn get(&self, digest: &Digest) -> Buffer {
        (**self).get(digest).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        (**self).put(digest, buffer).await
    }

    async fn find_missing(&self, digests: Vec<Digest>) -> Result<Vec<Digest>, Status> {
        (**self).find_missing(digests).await
    }
}

/// Selects how a backend turns stored bytes back into a `Buffer`. The CAS and
/// the Action Cache share their backends; what differs is the validation
/// applied on the way out.
pub trait ReadBufferFactory: Send + Sync {
    fn new_buffer_from_bytes(
        &self,
        digest: &Digest,
        data: Bytes,
        callback: DataIntegrityCallback,
    ) -> Buffer;
}

/// Stored bytes are opaque content whose hash and size must match the digest.
pub struct CasReadBufferFactory;

impl ReadBufferFactory for CasReadBufferFactory {
    fn new_buffer_from_bytes(
        &self,
        digest: &Digest,
        data: Bytes,
        callback: DataIntegrityCallback,
    ) -> Buffer {
        Buffer::new_cas_buffer_from_bytes(digest, data, Source::backend_provided(callback))
    }
}

/// Stored bytes are a marshaled `ActionResult`, keyed by the digest of the
/// action that produced it. The payload is validated by unmarshaling; its
/// size and hash are unrelated to the key.
pub struct AcReadBufferFactory;

impl ReadBufferFactory for AcReadBufferFactory {
    fn new_buffer_from_bytes(
        &self,
        _digest: &Digest,
        data: Bytes,
        callback: DataIntegrityCallback,
    ) -> Buffer {
        Buffer::new_proto_buffer_from_bytes::<ActionResult>(data, Source::backend_provided(callback))
    }
}
