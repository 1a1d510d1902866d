// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tonic::Status;

use super::BoxReadStream;

/// Pull-based stream of byte chunks.
///
/// `read` yields owned chunks until `Ok(None)` signals end-of-stream; reading
/// past end-of-stream yields `Ok(None)` again. `close` releases the resources
/// behind the reader, must always be called by the owner, and is a no-op when
/// called again or after end-of-stream has been observed.
#[async_trait]
pub trait ChunkReader: Send {
    async fn read(&mut self) -> Result<Option<Bytes>, Status>;

    async fn close(&mut self);
}

/// Yields the contents of a byte slice as a single chunk.
pub(crate) struct BytesChunkReader {
    data: Option<Bytes>,
}

impl BytesChunkReader {
    pub fn new(data: Bytes) -> Self {
        BytesChunkReader { data: Some(data) }
    }
}

#[async_trait]
impl ChunkReader for BytesChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        match self.data.take() {
            Some(data) if !data.is_empty() => Ok(Some(data)),
            _ => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.data = None;
    }
}

/// Yields a fixed error on every read.
pub(crate) struct ErrorChunkReader {
    status: Status,
}

impl ErrorChunkReader {
    pub fn new(status: Status) -> Self {
        ErrorChunkReader { status }
    }
}

#[async_trait]
impl ChunkReader for ErrorChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        Err(self.status.clone())
    }

    async fn close(&mut self) {}
}

/// Adapts a stream of byte chunks into a `ChunkReader`. The end-of-stream
/// signal is latched, so reads past it keep reporting end-of-stream.
pub(crate) struct StreamChunkReader {
    stream: Option<BoxReadStream>,
}

impl StreamChunkReader {
    pub fn new(stream: BoxReadStream) -> Self {
        StreamChunkReader {
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl ChunkReader for StreamChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(None),
        };
        match stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err),
            None => {
                self.stream = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
    }
}

/// Discards a fixed number of leading bytes from another reader. Any trailing
/// part of the chunk in which the skip ends is yielded as a synthetic first
/// chunk; the slice is zero-copy.
pub(crate) struct OffsetChunkReader {
    inner: Box<dyn ChunkReader>,
    remaining_skip: u64,
}

impl OffsetChunkReader {
    pub fn new(inner: Box<dyn ChunkReader>, skip: u64) -> Self {
        OffsetChunkReader {
            inner,
            remaining_skip: skip,
        }
    }
}

#[async_trait]
impl ChunkReader for OffsetChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        while self.remaining_skip > 0 {
            match self.inner.read().await? {
                Some(chunk) => {
                    let chunk_len = chunk.len() as u64;
                    if chunk_len <= self.remaining_skip {
                        self.remaining_skip -= chunk_len;
                    } else {
                        let skip = self.remaining_skip as usize;
                        self.remaining_skip = 0;
                        return Ok(Some(chunk.slice(skip..)));
                    }
                }
                None => {
                    self.remaining_skip = 0;
                    return Ok(None);
                }
            }
        }
        self.inner.read().await
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

/// Bounds the size of chunks emitted by another reader and strips empty
/// chunks. Oversized chunks are cut into at-most-maximum pieces; the cuts are
/// zero-copy.
pub(crate) struct NormalizingChunkReader {
    inner: Box<dyn ChunkReader>,
    maximum_chunk_size_bytes: usize,
    pending: Bytes,
}

impl NormalizingChunkReader {
    pub fn new(inner: Box<dyn ChunkReader>, maximum_chunk_size_bytes: usize) -> Self {
        NormalizingChunkReader {
            inner,
            maximum_chunk_size_bytes,
            pending: Bytes::new(),
        }
    }
}

#[async_trait]
impl ChunkReader for NormalizingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if !self.pending.is_empty() {
            let take = self.pending.len().min(self.maximum_chunk_size_bytes);
            return Ok(Some(self.pending.split_to(take)));
        }
        loop {
            match self.inner.read().await? {
                Some(chunk) if chunk.is_empty() => continue,
                Some(mut chunk) => {
                    if chunk.len() > self.maximum_chunk_size_bytes {
                        self.pending = chunk.split_off(self.maximum_chunk_size_bytes);
                    }
                    return Ok(Some(chunk));
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        self.pending = Bytes::new();
        self.inner.close().await;
    }
}
