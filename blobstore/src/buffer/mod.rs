// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Polymorphic handles to blob contents.
//!
//! A [`Buffer`] unifies the physical representations a blob may take (a byte
//! slice, a random-access reader, a single-pass stream, a decoded Protobuf
//! message, a deferred error) behind one consumption contract. Content-
//! addressed buffers validate their contents against the digest on the way
//! out, whichever consumption shape the caller picks.
//!
//! A buffer is consumed exactly once: every terminal operation takes the
//! buffer by value, so use-after-consumption is unrepresentable. Buffers
//! that go unused must be released through [`Buffer::discard`].

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use digest::Digest;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use prost::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tonic::{Code, Status};

mod background;
mod chunk_reader;
mod clone_stream;
mod error_handler;
mod validation;

pub use chunk_reader::ChunkReader;
pub use error_handler::ErrorHandler;
pub use validation::{DataIntegrityCallback, Source};

use chunk_reader::{
    BytesChunkReader, ErrorChunkReader, NormalizingChunkReader, OffsetChunkReader,
    StreamChunkReader,
};
use error_handler::ErrorHandlingChunkReader;
use validation::ValidatingChunkReader;

/// Alias for the type of a read stream.
pub type BoxReadStream = Pin<Box<dyn Stream<Item = Result<Bytes, Status>> + Send + 'static>>;

/// Chunk granularity used when draining a random-access reader sequentially.
const READER_AT_CHUNK_SIZE_BYTES: usize = 64 * 1024;

/// Random access into a blob of known size. Implementations must support
/// concurrent `read_at` calls, as clones of a reader-backed buffer may read
/// in parallel.
pub trait ReaderAt: Send + Sync + 'static {
    /// Read up to `buf.len()` bytes at `offset`, returning how many bytes
    /// were read. A short count is only permitted at the end of the medium.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status>;
}

enum BufferKind {
    /// A byte slice whose contents are known to be valid.
    Validated { data: Bytes },
    /// A decoded Protobuf message alongside its marshaled form. Kept so
    /// `to_proto` does not have to re-parse what was just decoded.
    Proto {
        message: Box<dyn Any + Send>,
        data: Bytes,
    },
    /// Every terminal operation reports this error.
    Error { status: Status },
    /// A reference-counted random-access reader of known size. The medium is
    /// trusted, so no digest validation happens on reads; callers that need
    /// end-to-end validation must layer it themselves.
    ReaderAt {
        digest: Digest,
        reader: Arc<dyn ReaderAt>,
    },
    /// A single-pass source of unvalidated chunks; contents are checked
    /// against the digest while being consumed.
    Cas {
        digest: Digest,
        source: Source,
        reader: Box<dyn ChunkReader>,
    },
    /// A single-pass source whose chunks were already validated upstream,
    /// e.g. one side of a stream clone.
    ValidatedStream {
        size_bytes: i64,
        reader: Box<dyn ChunkReader>,
    },
    /// Consumption errors are offered to a handler, which may substitute a
    /// replacement buffer to continue from.
    ErrorHandling {
        base: Box<Buffer>,
        handler: Box<dyn ErrorHandler>,
    },
    /// The buffer's lifetime is joined with a background task; the task's
    /// error surfaces after a successful foreground read.
    WithTask {
        base: Box<Buffer>,
        task: JoinHandle<Result<(), Status>>,
    },
}

pub struct Buffer {
    kind: BufferKind,
}

fn check_size_cap(size_bytes: i64, maximum_size_bytes: usize) -> Result<(), Status> {
    if size_bytes as u64 > maximum_size_bytes as u64 {
        return Err(Status::invalid_argument(format!(
            "Buffer is {size_bytes} bytes in size, \
             while a maximum of {maximum_size_bytes} bytes is permitted"
        )));
    }
    Ok(())
}

fn decode_message<M: Message + Default>(data: Bytes, error_code: Code) -> Result<M, Status> {
    M::decode(data)
        .map_err(|err| Status::new(error_code, format!("Failed to unmarshal message: {err}")))
}

/// Consolidate the chunks of a reader into a single `Bytes`. The single-chunk
/// case is returned without copying.
async fn collect_chunks(mut reader: Box<dyn ChunkReader>) -> Result<Bytes, Status> {
    let mut chunks: Vec<Bytes> = Vec::new();
    loop {
        match reader.read().await {
            Ok(Some(chunk)) => chunks.push(chunk),
            Ok(None) => break,
            Err(err) => {
                reader.close().await;
                return Err(err);
            }
        }
    }
    reader.close().await;

    match chunks.len() {
        0 => return Ok(Bytes::new()),
        1 => return Ok(chunks.pop().unwrap()),
        _ => {}
    }
    let result_len = chunks.iter().map(|c| c.len()).sum();
    let mut result = BytesMut::with_capacity(result_len);
    for chunk in chunks {
        result.extend_from_slice(&chunk);
    }
    Ok(result.freeze())
}

/// Copy the window `[offset, offset + buf.len())` of a chunk stream into
/// `buf`, draining the stream to the end so validation completes. Returns the
/// number of bytes copied.
async fn read_window(
    mut reader: Box<dyn ChunkReader>,
    buf: &mut [u8],
    offset: u64,
) -> Result<usize, Status> {
    let mut position = 0u64;
    let mut written = 0usize;
    loop {
        match reader.read().await {
            Ok(Some(chunk)) => {
                let chunk_start = position;
                position += chunk.len() as u64;
                if written < buf.len() && position > offset {
                    let begin = offset.saturating_sub(chunk_start) as usize;
                    let count = (buf.len() - written).min(chunk.len() - begin);
                    buf[written..written + count].copy_from_slice(&chunk[begin..begin + count]);
                    written += count;
                }
            }
            Ok(None) => break,
            Err(err) => {
                reader.close().await;
                return Err(err);
            }
        }
    }
    reader.close().await;
    Ok(written)
}

/// Sequentially drains a `ReaderAt` as chunks.
struct ReaderAtChunkReader {
    reader: Arc<dyn ReaderAt>,
    offset: u64,
    remaining: u64,
}

impl ReaderAtChunkReader {
    fn new(reader: Arc<dyn ReaderAt>, offset: u64, remaining: u64) -> Self {
        ReaderAtChunkReader {
            reader,
            offset,
            remaining,
        }
    }
}

#[async_trait::async_trait]
impl ChunkReader for ReaderAtChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let count = (self.remaining as usize).min(READER_AT_CHUNK_SIZE_BYTES);
        let mut buf = BytesMut::zeroed(count);
        let read = self.reader.read_at(&mut buf, self.offset)?;
        if read == 0 {
            return Err(Status::internal(format!(
                "Reader returned end-of-data at offset {}, \
                 while {} more bytes were expected",
                self.offset, self.remaining
            )));
        }
        buf.truncate(read);
        self.offset += read as u64;
        self.remaining -= read as u64;
        Ok(Some(buf.freeze()))
    }

    async fn close(&mut self) {
        self.remaining = 0;
    }
}

/// Error reader that still owns a buffer, so the buffer's resources are
/// released when the reader is consumed or closed.
struct DiscardingErrorChunkReader {
    status: Status,
    buffer: Option<Buffer>,
}

#[async_trait::async_trait]
impl ChunkReader for DiscardingErrorChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if let Some(buffer) = self.buffer.take() {
            buffer.discard().await;
        }
        Err(self.status.clone())
    }

    async fn close(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.discard().await;
        }
    }
}

impl Buffer {
    fn new(kind: BufferKind) -> Buffer {
        Buffer { kind }
    }

    /// Create a buffer around a byte slice that is known to be valid, e.g.
    /// because it was validated on a previous consumption.
    pub fn new_validated_buffer_from_bytes(data: Bytes) -> Buffer {
        Buffer::new(BufferKind::Validated { data })
    }

    /// Create a content-addressed buffer around a byte slice. The size and
    /// hash are checked up front; on a mismatch the integrity callback fires
    /// with `false` and the returned buffer yields the integrity error.
    pub fn new_cas_buffer_from_bytes(digest: &Digest, data: Bytes, mut source: Source) -> Buffer {
        let size_bytes = data.len() as i64;
        let expected_size = digest.size_bytes();
        if size_bytes != expected_size {
            source.notify(false);
            return Buffer::new_buffer_with_error(Status::new(
                source.error_code(),
                format!(
                    "Buffer is {size_bytes} bytes in size, \
                     while {expected_size} bytes were expected"
                ),
            ));
        }
        let mut hasher = match digest.digest_function().hasher() {
            Ok(hasher) => hasher,
            Err(err) => return Buffer::new_buffer_with_error(Status::unimplemented(err)),
        };
        hasher.update(&data);
        let actual_hash = hasher.finalize_hex();
        if actual_hash != digest.hash() {
            source.notify(false);
            let expected_hash = digest.hash();
            return Buffer::new_buffer_with_error(Status::new(
                source.error_code(),
                format!(
                    "Buffer has checksum {actual_hash}, \
                     while {expected_hash} was expected"
                ),
            ));
        }
        source.notify(true);
        Buffer::new(BufferKind::Validated { data })
    }

    /// Create a content-addressed buffer around a stream of chunks. Contents
    /// are validated against the digest while being consumed.
    pub fn new_cas_buffer_from_stream(
        digest: &Digest,
        stream: BoxReadStream,
        source: Source,
    ) -> Buffer {
        Buffer::new_cas_buffer_from_chunk_reader(
            digest,
            Box::new(StreamChunkReader::new(stream)),
            source,
        )
    }

    /// Create a content-addressed buffer around a chunk reader. Contents are
    /// validated against the digest while being consumed.
    pub fn new_cas_buffer_from_chunk_reader(
        digest: &Digest,
        reader: Box<dyn ChunkReader>,
        source: Source,
    ) -> Buffer {
        Buffer::new(BufferKind::Cas {
            digest: digest.clone(),
            source,
            reader,
        })
    }

    /// Create a content-addressed buffer around a random-access reader.
    ///
    /// The medium is assumed to hold validated content (e.g., a local block
    /// device whose writes were validated on the way in), so reads are not
    /// checksummed. Clones of this buffer may read concurrently; the reader
    /// is released when the last clone is consumed or discarded.
    pub fn new_cas_buffer_from_reader_at(digest: &Digest, reader: Arc<dyn ReaderAt>) -> Buffer {
        Buffer::new(BufferKind::ReaderAt {
            digest: digest.clone(),
            reader,
        })
    }

    /// Create a buffer around a Protobuf message. The marshaled form is
    /// materialized eagerly, so `to_bytes` and `size_bytes` are cheap.
    pub fn new_proto_buffer_from_message<M>(message: M, mut source: Source) -> Buffer
    where
        M: Message + Any + Send,
    {
        let data = Bytes::from(message.encode_to_vec());
        source.notify(true);
        Buffer::new(BufferKind::Proto {
            message: Box::new(message),
            data,
        })
    }

    /// Create a buffer around the marshaled form of a Protobuf message,
    /// validating it by unmarshaling. On failure the integrity callback
    /// fires with `false` and the returned buffer yields the error; backends
    /// use that callback to evict malformed entries.
    pub fn new_proto_buffer_from_bytes<M>(data: Bytes, mut source: Source) -> Buffer
    where
        M: Message + Default + Any + Send,
    {
        match M::decode(data.clone()) {
            Ok(message) => {
                source.notify(true);
                Buffer::new(BufferKind::Proto {
                    message: Box::new(message),
                    data,
                })
            }
            Err(err) => {
                source.notify(false);
                Buffer::new_buffer_with_error(Status::new(
                    source.error_code(),
                    format!("Failed to unmarshal message: {err}"),
                ))
            }
        }
    }

    /// Create a buffer that yields a fixed error on every consumption.
    pub fn new_buffer_with_error(status: Status) -> Buffer {
        Buffer::new(BufferKind::Error { status })
    }

    /// Interpose `handler` on errors observed while consuming this buffer.
    ///
    /// On an error buffer the handler runs immediately and may substitute a
    /// replacement, in which case the wrapper restarts on the replacement.
    /// Stream-backed content-addressed buffers are wrapped so that I/O
    /// failures during consumption can be resumed from a replacement buffer
    /// at the current offset. Other representations cannot fail with
    /// recoverable errors; the handler is completed immediately and the
    /// buffer returned unchanged.
    pub fn with_error_handler(self, mut handler: Box<dyn ErrorHandler>) -> Buffer {
        let mut buffer = self;
        loop {
            buffer = match buffer.kind {
                BufferKind::Error { status } => match handler.on_error(status) {
                    Ok(replacement) => replacement,
                    Err(status) => {
                        handler.done();
                        return Buffer::new_buffer_with_error(status);
                    }
                },
                kind @ (BufferKind::Cas { .. } | BufferKind::ErrorHandling { .. }) => {
                    return Buffer::new(BufferKind::ErrorHandling {
                        base: Box::new(Buffer::new(kind)),
                        handler,
                    });
                }
                BufferKind::WithTask { base, task } => {
                    return Buffer::new(BufferKind::WithTask {
                        base: Box::new(base.with_error_handler(handler)),
                        task,
                    });
                }
                kind => {
                    handler.done();
                    return Buffer::new(kind);
                }
            };
        }
    }

    /// Join this buffer's lifetime with a background task, e.g. a replication
    /// write that must finish before the blob may be considered stored. Every
    /// terminal operation (including `discard`) waits for the task; the
    /// task's error is surfaced when the foreground succeeded.
    pub fn with_task<F>(self, task: F) -> Buffer
    where
        F: Future<Output = Result<(), Status>> + Send + 'static,
    {
        Buffer::new(BufferKind::WithTask {
            base: Box::new(self),
            task: tokio::spawn(task),
        })
    }

    /// The blob's size. Known in O(1) for every representation; an error
    /// buffer surfaces its error instead.
    pub fn size_bytes(&self) -> Result<i64, Status> {
        match &self.kind {
            BufferKind::Validated { data } => Ok(data.len() as i64),
            BufferKind::Proto { data, .. } => Ok(data.len() as i64),
            BufferKind::Error { status } => Err(status.clone()),
            BufferKind::ReaderAt { digest, .. } => Ok(digest.size_bytes()),
            BufferKind::Cas { digest, .. } => Ok(digest.size_bytes()),
            BufferKind::ValidatedStream { size_bytes, .. } => Ok(*size_bytes),
            BufferKind::ErrorHandling { base, .. } => base.size_bytes(),
            BufferKind::WithTask { base, .. } => base.size_bytes(),
        }
    }

    /// Stream the full contents into `writer`. Contents are validated on the
    /// fly; a failure after bytes have been emitted cannot be retried.
    pub async fn into_writer<W>(self, writer: &mut W) -> Result<(), Status>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut reader = self.into_validated_chunk_reader();
        loop {
            match reader.read().await {
                Ok(Some(chunk)) => {
                    if let Err(err) = writer.write_all(&chunk).await {
                        reader.close().await;
                        return Err(Status::internal(format!(
                            "Failed to write to output: {err}"
                        )));
                    }
                }
                Ok(None) => {
                    reader.close().await;
                    return Ok(());
                }
                Err(err) => {
                    reader.close().await;
                    return Err(err);
                }
            }
        }
    }

    /// Read up to `buf.len()` bytes at `offset`. Stream-backed buffers
    /// validate the entire blob even when only a window is requested. A read
    /// starting exactly at the end of the blob returns zero bytes; an offset
    /// beyond the end is an error.
    pub async fn read_at(self, buf: &mut [u8], offset: i64) -> Result<usize, Status> {
        self.read_at_inner(buf, offset).await
    }

    fn read_at_inner<'a>(
        self,
        buf: &'a mut [u8],
        offset: i64,
    ) -> BoxFuture<'a, Result<usize, Status>> {
        async move {
            // An error buffer reports its held error whatever the offset, so
            // the bounds checks only apply where a size is known. Wrappers
            // around an error-only base fall through to their match arms, so
            // their terminal-path bookkeeping (e.g. joining a background
            // task) still runs.
            if let Ok(size_bytes) = self.size_bytes() {
                if offset < 0 {
                    self.discard().await;
                    return Err(Status::invalid_argument(format!(
                        "Negative read offset: {offset}"
                    )));
                }
                if offset > size_bytes {
                    self.discard().await;
                    return Err(Status::invalid_argument(format!(
                        "Buffer is {size_bytes} bytes in size, \
                         while a read at offset {offset} was requested"
                    )));
                }
            }
            match self.kind {
                BufferKind::Validated { data } | BufferKind::Proto { data, .. } => {
                    let begin = offset as usize;
                    let count = buf.len().min(data.len() - begin);
                    buf[..count].copy_from_slice(&data[begin..begin + count]);
                    Ok(count)
                }
                BufferKind::Error { status } => Err(status),
                BufferKind::ReaderAt { digest, reader } => {
                    let size_bytes = digest.size_bytes();
                    let count = buf.len().min((size_bytes - offset) as usize);
                    if count == 0 {
                        return Ok(0);
                    }
                    reader.read_at(&mut buf[..count], offset as u64)
                }
                kind @ (BufferKind::Cas { .. } | BufferKind::ValidatedStream { .. }) => {
                    let reader = Buffer::new(kind).into_validated_chunk_reader();
                    read_window(reader, buf, offset as u64).await
                }
                BufferKind::ErrorHandling { base, mut handler } => {
                    let mut buffer = *base;
                    let result = loop {
                        match buffer.read_at_inner(&mut *buf, offset).await {
                            Ok(count) => break Ok(count),
                            Err(err) => match handler.on_error(err) {
                                Ok(replacement) => buffer = replacement,
                                Err(err) => break Err(err),
                            },
                        }
                    };
                    handler.done();
                    result
                }
                BufferKind::WithTask { base, task } => {
                    let result = base.read_at_inner(buf, offset).await;
                    background::finish(task, result).await
                }
            }
        }
        .boxed()
    }

    /// Unmarshal the contents as a message of type `M`, enforcing the size
    /// cap first. A buffer constructed from a message of the same type
    /// returns the stored message without re-parsing.
    pub async fn to_proto<M>(self, maximum_size_bytes: usize) -> Result<M, Status>
    where
        M: Message + Default + Any + Send,
    {
        self.to_proto_inner(maximum_size_bytes).await
    }

    fn to_proto_inner<M>(self, maximum_size_bytes: usize) -> BoxFuture<'static, Result<M, Status>>
    where
        M: Message + Default + Any + Send,
    {
        async move {
            match self.kind {
                BufferKind::Proto { message, data } => {
                    check_size_cap(data.len() as i64, maximum_size_bytes)?;
                    match message.downcast::<M>() {
                        Ok(message) => Ok(*message),
                        Err(_) => decode_message(data, Code::InvalidArgument),
                    }
                }
                BufferKind::Validated { data } => {
                    check_size_cap(data.len() as i64, maximum_size_bytes)?;
                    decode_message(data, Code::InvalidArgument)
                }
                BufferKind::Error { status } => Err(status),
                BufferKind::Cas {
                    digest,
                    source,
                    reader,
                } => {
                    let error_code = source.error_code();
                    if let Err(err) = check_size_cap(digest.size_bytes(), maximum_size_bytes) {
                        let mut reader = reader;
                        reader.close().await;
                        return Err(err);
                    }
                    let reader = Box::new(ValidatingChunkReader::new(digest, source, reader));
                    let data = collect_chunks(reader).await?;
                    decode_message(data, error_code)
                }
                kind @ (BufferKind::ReaderAt { .. } | BufferKind::ValidatedStream { .. }) => {
                    let buffer = Buffer::new(kind);
                    let data = buffer.to_bytes_inner(maximum_size_bytes).await?;
                    decode_message(data, Code::Internal)
                }
                BufferKind::ErrorHandling { base, mut handler } => {
                    let mut buffer = *base;
                    let result = loop {
                        match buffer.to_proto_inner::<M>(maximum_size_bytes).await {
                            Ok(message) => break Ok(message),
                            Err(err) => match handler.on_error(err) {
                                Ok(replacement) => buffer = replacement,
                                Err(err) => break Err(err),
                            },
                        }
                    };
                    handler.done();
                    result
                }
                BufferKind::WithTask { base, task } => {
                    let result = base.to_proto_inner::<M>(maximum_size_bytes).await;
                    background::finish(task, result).await
                }
            }
        }
        .boxed()
    }

    /// Materialize the full contents, enforcing the size cap first.
    pub async fn to_bytes(self, maximum_size_bytes: usize) -> Result<Bytes, Status> {
        self.to_bytes_inner(maximum_size_bytes).await
    }

    fn to_bytes_inner(
        self,
        maximum_size_bytes: usize,
    ) -> BoxFuture<'static, Result<Bytes, Status>> {
        async move {
            match self.kind {
                BufferKind::Validated { data } | BufferKind::Proto { data, .. } => {
                    check_size_cap(data.len() as i64, maximum_size_bytes)?;
                    Ok(data)
                }
                BufferKind::Error { status } => Err(status),
                // The declared size bounds the read on these representations,
                // so the cap can be checked before any I/O happens.
                BufferKind::ReaderAt { digest, reader } => {
                    check_size_cap(digest.size_bytes(), maximum_size_bytes)?;
                    let reader =
                        ReaderAtChunkReader::new(reader, 0, digest.size_bytes() as u64);
                    collect_chunks(Box::new(reader)).await
                }
                BufferKind::Cas {
                    digest,
                    source,
                    reader,
                } => {
                    if let Err(err) = check_size_cap(digest.size_bytes(), maximum_size_bytes) {
                        let mut reader = reader;
                        reader.close().await;
                        return Err(err);
                    }
                    let reader = ValidatingChunkReader::new(digest, source, reader);
                    collect_chunks(Box::new(reader)).await
                }
                BufferKind::ValidatedStream { size_bytes, reader } => {
                    if let Err(err) = check_size_cap(size_bytes, maximum_size_bytes) {
                        let mut reader = reader;
                        reader.close().await;
                        return Err(err);
                    }
                    collect_chunks(reader).await
                }
                BufferKind::ErrorHandling { base, mut handler } => {
                    let mut buffer = *base;
                    let result = loop {
                        match buffer.to_bytes_inner(maximum_size_bytes).await {
                            Ok(data) => break Ok(data),
                            Err(err) => match handler.on_error(err) {
                                Ok(replacement) => buffer = replacement,
                                Err(err) => break Err(err),
                            },
                        }
                    };
                    handler.done();
                    result
                }
                BufferKind::WithTask { base, task } => {
                    let result = base.to_bytes_inner(maximum_size_bytes).await;
                    background::finish(task, result).await
                }
            }
        }
        .boxed()
    }

    /// Convert into a chunk reader that yields the blob from `offset`
    /// onwards in chunks of at most `maximum_chunk_size_bytes`, never empty.
    /// Integrity errors surface at the first chunk after the discrepancy is
    /// observed. The reader owns the buffer's resources; `close` releases
    /// them.
    pub fn to_chunk_reader(
        self,
        offset: i64,
        maximum_chunk_size_bytes: usize,
    ) -> Box<dyn ChunkReader> {
        if let BufferKind::Error { status } = &self.kind {
            return Box::new(ErrorChunkReader::new(status.clone()));
        }
        let size_bytes = match self.size_bytes() {
            Ok(size_bytes) => size_bytes,
            Err(status) => {
                return Box::new(DiscardingErrorChunkReader {
                    status,
                    buffer: Some(self),
                })
            }
        };
        if offset < 0 {
            return Box::new(DiscardingErrorChunkReader {
                status: Status::invalid_argument(format!("Negative read offset: {offset}")),
                buffer: Some(self),
            });
        }
        if offset > size_bytes {
            return Box::new(DiscardingErrorChunkReader {
                status: Status::invalid_argument(format!(
                    "Buffer is {size_bytes} bytes in size, \
                     while a read at offset {offset} was requested"
                )),
                buffer: Some(self),
            });
        }
        let mut reader = self.into_validated_chunk_reader();
        if offset > 0 {
            reader = Box::new(OffsetChunkReader::new(reader, offset as u64));
        }
        Box::new(NormalizingChunkReader::new(reader, maximum_chunk_size_bytes))
    }

    /// Convert into a plain stream of validated chunks. Chunk boundaries are
    /// whatever the underlying representation produces.
    pub fn to_stream(self) -> BoxReadStream {
        let mut reader = self.into_validated_chunk_reader();
        Box::pin(async_stream::stream! {
            loop {
                match reader.read().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(err) => {
                        reader.close().await;
                        yield Err(err);
                        return;
                    }
                }
            }
            reader.close().await;
        })
    }

    /// Split into two buffers that can be consumed independently.
    ///
    /// Byte-backed representations share their storage. Single-pass streams
    /// are materialized once (bounded by `maximum_size_bytes`); on failure
    /// both returned buffers surface the error independently.
    pub async fn clone_copy(self, maximum_size_bytes: usize) -> (Buffer, Buffer) {
        match self.kind {
            BufferKind::Validated { data } => (
                Buffer::new_validated_buffer_from_bytes(data.clone()),
                Buffer::new_validated_buffer_from_bytes(data),
            ),
            BufferKind::Proto { data, .. } => (
                Buffer::new_validated_buffer_from_bytes(data.clone()),
                Buffer::new_validated_buffer_from_bytes(data),
            ),
            BufferKind::Error { status } => (
                Buffer::new_buffer_with_error(status.clone()),
                Buffer::new_buffer_with_error(status),
            ),
            BufferKind::ReaderAt { digest, reader } => (
                Buffer::new(BufferKind::ReaderAt {
                    digest: digest.clone(),
                    reader: reader.clone(),
                }),
                Buffer::new(BufferKind::ReaderAt { digest, reader }),
            ),
            kind => {
                let buffer = Buffer::new(kind);
                match buffer.to_bytes(maximum_size_bytes).await {
                    Ok(data) => (
                        Buffer::new_validated_buffer_from_bytes(data.clone()),
                        Buffer::new_validated_buffer_from_bytes(data),
                    ),
                    Err(status) => (
                        Buffer::new_buffer_with_error(status.clone()),
                        Buffer::new_buffer_with_error(status),
                    ),
                }
            }
        }
    }

    /// Split into two buffers that read the underlying stream in lock-step,
    /// without materializing it. Intended for one-to-many replication.
    ///
    /// The two clones must be consumed (or discarded) by distinct tasks:
    /// they advance at most one chunk apart, so driving both from a single
    /// task deadlocks once the blob exceeds that slack. Byte-backed
    /// representations share storage instead and carry no such restriction.
    pub fn clone_stream(self) -> (Buffer, Buffer) {
        match self.kind {
            BufferKind::Validated { data } => (
                Buffer::new_validated_buffer_from_bytes(data.clone()),
                Buffer::new_validated_buffer_from_bytes(data),
            ),
            BufferKind::Proto { data, .. } => (
                Buffer::new_validated_buffer_from_bytes(data.clone()),
                Buffer::new_validated_buffer_from_bytes(data),
            ),
            BufferKind::Error { status } => (
                Buffer::new_buffer_with_error(status.clone()),
                Buffer::new_buffer_with_error(status),
            ),
            BufferKind::ReaderAt { digest, reader } => (
                Buffer::new(BufferKind::ReaderAt {
                    digest: digest.clone(),
                    reader: reader.clone(),
                }),
                Buffer::new(BufferKind::ReaderAt { digest, reader }),
            ),
            kind => {
                let buffer = Buffer::new(kind);
                let size_bytes = match buffer.size_bytes() {
                    Ok(size_bytes) => size_bytes,
                    // A wrapper around an error-only base has no declared
                    // size; both clones surface the error independently.
                    Err(status) => {
                        return (
                            Buffer::new_buffer_with_error(status.clone()),
                            Buffer::new_buffer_with_error(status),
                        );
                    }
                };
                let reader = buffer.into_validated_chunk_reader();
                let mut readers = clone_stream::multiplex(reader, 2);
                let second = readers.pop().unwrap();
                let first = readers.pop().unwrap();
                (
                    Buffer::new(BufferKind::ValidatedStream {
                        size_bytes,
                        reader: first,
                    }),
                    Buffer::new(BufferKind::ValidatedStream {
                        size_bytes,
                        reader: second,
                    }),
                )
            }
        }
    }

    /// Release the buffer without consuming it. Stream-backed buffers close
    /// their upstream source, so this may suspend.
    pub async fn discard(self) {
        self.discard_inner().await
    }

    fn discard_inner(self) -> BoxFuture<'static, ()> {
        async move {
            match self.kind {
                BufferKind::Validated { .. }
                | BufferKind::Proto { .. }
                | BufferKind::Error { .. }
                | BufferKind::ReaderAt { .. } => {}
                BufferKind::Cas { mut reader, .. } => reader.close().await,
                BufferKind::ValidatedStream { mut reader, .. } => reader.close().await,
                BufferKind::ErrorHandling { base, mut handler } => {
                    base.discard_inner().await;
                    handler.done();
                }
                BufferKind::WithTask { base, task } => {
                    base.discard_inner().await;
                    // The task is still joined so its resources are released;
                    // nobody is left to care about its outcome.
                    let _ = background::join_task(task).await;
                }
            }
        }
        .boxed()
    }

    /// Convert into a reader of validated chunks covering the whole blob.
    fn into_validated_chunk_reader(self) -> Box<dyn ChunkReader> {
        match self.kind {
            BufferKind::Validated { data } | BufferKind::Proto { data, .. } => {
                Box::new(BytesChunkReader::new(data))
            }
            BufferKind::Error { status } => Box::new(ErrorChunkReader::new(status)),
            BufferKind::ReaderAt { digest, reader } => Box::new(ReaderAtChunkReader::new(
                reader,
                0,
                digest.size_bytes() as u64,
            )),
            BufferKind::Cas {
                digest,
                source,
                reader,
            } => Box::new(ValidatingChunkReader::new(digest, source, reader)),
            BufferKind::ValidatedStream { reader, .. } => reader,
            BufferKind::ErrorHandling { base, handler } => {
                let (digest, source, reader) = base.into_cas_stream_parts();
                let reader = Box::new(ErrorHandlingChunkReader::new(reader, handler, 0));
                Box::new(ValidatingChunkReader::new(digest, source, reader))
            }
            BufferKind::WithTask { base, task } => Box::new(
                background::TaskJoiningChunkReader::new(base.into_validated_chunk_reader(), task),
            ),
        }
    }

    /// Deconstruct a stream-backed content-addressed buffer into its digest,
    /// source and raw reader, layering the error handlers of any wrappers
    /// onto the reader.
    fn into_cas_stream_parts(self) -> (Digest, Source, Box<dyn ChunkReader>) {
        match self.kind {
            BufferKind::Cas {
                digest,
                source,
                reader,
            } => (digest, source, reader),
            BufferKind::ErrorHandling { base, handler } => {
                let (digest, source, reader) = base.into_cas_stream_parts();
                (
                    digest,
                    source,
                    Box::new(ErrorHandlingChunkReader::new(reader, handler, 0)),
                )
            }
            _ => panic!("Error handlers can only wrap stream-backed CAS buffers"),
        }
    }

    /// Convert into a reader of raw chunks starting at `offset`, with no
    /// integrity validation. Used to resume a streaming consumption from a
    /// replacement buffer; the consumer layers validation over the
    /// concatenation of the original prefix and this remainder.
    pub(crate) fn into_unvalidated_chunk_reader(self, offset: u64) -> Box<dyn ChunkReader> {
        match self.kind {
            BufferKind::Validated { data } | BufferKind::Proto { data, .. } => {
                let begin = (offset as usize).min(data.len());
                Box::new(BytesChunkReader::new(data.slice(begin..)))
            }
            BufferKind::Error { status } => Box::new(ErrorChunkReader::new(status)),
            BufferKind::ReaderAt { digest, reader } => Box::new(ReaderAtChunkReader::new(
                reader,
                offset,
                (digest.size_bytes() as u64).saturating_sub(offset),
            )),
            BufferKind::Cas { reader, .. } => Box::new(OffsetChunkReader::new(reader, offset)),
            BufferKind::ValidatedStream { reader, .. } => {
                Box::new(OffsetChunkReader::new(reader, offset))
            }
            BufferKind::ErrorHandling { base, handler } => Box::new(ErrorHandlingChunkReader::new(
                base.into_unvalidated_chunk_reader(offset),
                handler,
                offset,
            )),
            BufferKind::WithTask { base, task } => Box::new(background::TaskJoiningChunkReader::new(
                base.into_unvalidated_chunk_reader(offset),
                task,
            )),
        }
    }
}

#[cfg(test)]
mod tests;
