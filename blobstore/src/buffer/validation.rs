// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use bytes::Bytes;
use digest::{Digest, Hasher};
use tonic::{Code, Status};

use super::chunk_reader::ChunkReader;

/// One-shot notification reporting whether a fully consumed blob's contents
/// were valid.
pub type DataIntegrityCallback = Box<dyn FnOnce(bool) + Send>;

/// Classifies where a buffer's contents came from. The classification selects
/// the status code used for integrity failures and carries the callback that
/// is told the verdict.
///
/// The callback fires at most once per consumption: with `true` when the
/// contents were proven to match the digest, with `false` when they were
/// proven not to. It does not fire when an I/O error prevents a verdict.
pub struct Source {
    error_code: Code,
    callback: Option<DataIntegrityCallback>,
}

impl Source {
    /// Data supplied by a client, e.g. the payload of an upload. Mismatches
    /// are the caller's fault.
    pub fn user_provided() -> Self {
        Source {
            error_code: Code::InvalidArgument,
            callback: None,
        }
    }

    /// Data returned by a storage backend. Mismatches mean the store is
    /// corrupted, and the callback gives the backend a chance to repair
    /// (e.g., evict the offending entry).
    pub fn backend_provided(callback: DataIntegrityCallback) -> Self {
        Source {
            error_code: Code::Internal,
            callback: Some(callback),
        }
    }

    /// A backend-provided source for stores that have no way to repair
    /// corrupted contents. Corruption is logged and otherwise ignored.
    pub fn irreparable(digest: &Digest) -> Self {
        let digest = digest.clone();
        Self::backend_provided(Box::new(move |valid| {
            if !valid {
                log::error!("Blob {digest} was found to be corrupted and cannot be repaired");
            }
        }))
    }

    pub(crate) fn error_code(&self) -> Code {
        self.error_code
    }

    pub(crate) fn notify(&mut self, valid: bool) {
        if let Some(callback) = self.callback.take() {
            callback(valid);
        }
    }
}

enum ValidationState {
    /// Still hashing. `bytes_seen` counts chunk bytes handed to the caller.
    Hashing { hasher: Hasher, bytes_seen: u64 },
    /// Verdict reached: the blob was valid and end-of-stream was returned.
    Valid,
    /// Verdict reached or an I/O error observed; the status is replayed on
    /// every further read.
    Failed(Status),
}

/// Wraps a reader of unvalidated chunks and checks the contents against a
/// digest on the fly: every chunk feeds a rolling hasher, size accounting is
/// monotonic, and the hash comparison happens at end-of-stream. Once an
/// integrity error has been emitted it is latched and no further chunks are
/// produced.
pub(crate) struct ValidatingChunkReader {
    inner: Box<dyn ChunkReader>,
    digest: Digest,
    source: Source,
    state: ValidationState,
}

impl ValidatingChunkReader {
    pub fn new(digest: Digest, source: Source, inner: Box<dyn ChunkReader>) -> Self {
        let state = match digest.digest_function().hasher() {
            Ok(hasher) => ValidationState::Hashing {
                hasher,
                bytes_seen: 0,
            },
            Err(err) => ValidationState::Failed(Status::unimplemented(err)),
        };
        ValidatingChunkReader {
            inner,
            digest,
            source,
            state,
        }
    }

    fn fail(&mut self, status: Status) -> Status {
        self.state = ValidationState::Failed(status.clone());
        status
    }

    fn integrity_failure(&mut self, message: String) -> Status {
        self.source.notify(false);
        let status = Status::new(self.source.error_code(), message);
        self.fail(status)
    }
}

#[async_trait]
impl ChunkReader for ValidatingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        match &self.state {
            ValidationState::Hashing { .. } => {}
            ValidationState::Valid => return Ok(None),
            ValidationState::Failed(status) => return Err(status.clone()),
        }

        let expected_size = self.digest.size_bytes() as u64;
        match self.inner.read().await {
            Ok(Some(chunk)) => {
                let (hasher, bytes_seen) = match &mut self.state {
                    ValidationState::Hashing { hasher, bytes_seen } => (hasher, bytes_seen),
                    _ => unreachable!(),
                };
                let new_bytes_seen = *bytes_seen + chunk.len() as u64;
                if new_bytes_seen > expected_size {
                    return Err(self.integrity_failure(format!(
                        "Buffer is at least {new_bytes_seen} bytes in size, \
                         while {expected_size} bytes were expected"
                    )));
                }
                hasher.update(&chunk);
                *bytes_seen = new_bytes_seen;
                Ok(Some(chunk))
            }
            Ok(None) => {
                // Hash comparison needs the hasher by value.
                let state = std::mem::replace(&mut self.state, ValidationState::Valid);
                let (hasher, bytes_seen) = match state {
                    ValidationState::Hashing { hasher, bytes_seen } => (hasher, bytes_seen),
                    _ => unreachable!(),
                };
                if bytes_seen != expected_size {
                    return Err(self.integrity_failure(format!(
                        "Buffer is {bytes_seen} bytes in size, \
                         while {expected_size} bytes were expected"
                    )));
                }
                let actual_hash = hasher.finalize_hex();
                if actual_hash != self.digest.hash() {
                    let expected_hash = self.digest.hash().to_owned();
                    return Err(self.integrity_failure(format!(
                        "Buffer has checksum {actual_hash}, \
                         while {expected_hash} was expected"
                    )));
                }
                self.source.notify(true);
                Ok(None)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}
