// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use digest::{Digest, KeyFormat};
use parking_lot::Mutex;
use tonic::Status;

use super::{AcReadBufferFactory, BlobAccess, CasReadBufferFactory, ReadBufferFactory};
use crate::buffer::Buffer;

/// A `BlobAccess` that stores blob content in process memory.
///
/// Entries that turn out to be corrupted or unparsable are evicted when the
/// integrity callback reports them invalid, so a later `find_missing` lets
/// clients re-upload them.
pub struct MemoryBlobAccess {
    contents: Arc<Mutex<HashMap<String, Bytes>>>,
    read_buffer_factory: Box<dyn ReadBufferFactory>,
    key_format: KeyFormat,
    maximum_size_bytes: usize,
}

impl MemoryBlobAccess {
    /// A CAS store: contents validated against the digest, deduplicated
    /// across instances.
    pub fn new_cas(maximum_size_bytes: usize) -> Self {
        Self::new(
            Box::new(CasReadBufferFactory),
            KeyFormat::WithoutInstance,
            maximum_size_bytes,
        )
    }

    /// An Action Cache store: contents are `ActionResult` messages, visible
    /// only within the instance that wrote them.
    pub fn new_ac(maximum_size_bytes: usize) -> Self {
        Self::new(
            Box::new(AcReadBufferFactory),
            KeyFormat::WithInstance,
            maximum_size_bytes,
        )
    }

    pub fn new(
        read_buffer_factory: Box<dyn ReadBufferFactory>,
        key_format: KeyFormat,
        maximum_size_bytes: usize,
    ) -> Self {
        MemoryBlobAccess {
            contents: Arc::new(Mutex::new(HashMap::new())),
            read_buffer_factory,
            key_format,
            maximum_size_bytes,
        }
    }
}

#[async_trait]
impl BlobAccess for MemoryBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        metrics::counter!("storage_blobs_read_total", 1, "backend" => "memory");
        let key = digest.key(self.key_format);
        let data = self.contents.lock().get(&key).cloned();
        match data {
            Some(data) => {
                let contents = self.contents.clone();
                let evicted_digest = digest.clone();
                self.read_buffer_factory.new_buffer_from_bytes(
                    digest,
                    data,
                    Box::new(move |valid| {
                        if !valid {
                            log::warn!("Evicting corrupted blob {evicted_digest}");
                            contents.lock().remove(&key);
                        }
                    }),
                )
            }
            None => Buffer::new_buffer_with_error(Status::not_found(format!(
                "Blob not found: {digest}"
            ))),
        }
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        let data = buffer.to_bytes(self.maximum_size_bytes).await?;
        metrics::counter!("storage_bytes_written_total", data.len() as u64, "backend" => "memory");
        self.contents
            .lock()
            .insert(digest.key(self.key_format), data);
        Ok(())
    }

    async fn find_missing(&self, digests: Vec<Digest>) -> Result<Vec<Digest>, Status> {
        metrics::counter!("storage_find_missing_blobs_total", digests.len() as u64, "backend" => "memory");
        let contents = self.contents.lock();
        Ok(digests
            .into_iter()
            .filter(|digest| !contents.contains_key(&digest.key(self.key_format)))
            .collect())
    }
}
