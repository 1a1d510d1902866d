// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use bytes::Bytes;
use tonic::Status;

use super::chunk_reader::ChunkReader;
use super::Buffer;

/// Interposes on I/O errors observed while consuming a buffer.
///
/// `on_error` may translate the error, or return a replacement buffer from
/// which consumption continues: operations that have not yet produced any
/// bytes are retried whole, while streaming operations resume at the current
/// byte offset. `done` is called exactly once per attached handler, after the
/// last possible call to `on_error`.
pub trait ErrorHandler: Send + 'static {
    fn on_error(&mut self, status: Status) -> Result<Buffer, Status>;

    fn done(&mut self);
}

/// Streams chunks from a reader and, on failure, asks the handler for a
/// replacement buffer to resume from. The reader tracks how many bytes it
/// has delivered, and asks each replacement for an unvalidated reader at
/// that offset, so already-delivered bytes are never re-emitted. Integrity
/// validation is expected to be layered on top of this reader; validation
/// failures never reach the handler.
pub(crate) struct ErrorHandlingChunkReader {
    reader: Box<dyn ChunkReader>,
    handler: Option<Box<dyn ErrorHandler>>,
    offset: u64,
}

impl ErrorHandlingChunkReader {
    pub fn new(
        reader: Box<dyn ChunkReader>,
        handler: Box<dyn ErrorHandler>,
        offset: u64,
    ) -> Self {
        ErrorHandlingChunkReader {
            reader,
            handler: Some(handler),
            offset,
        }
    }

    fn finish(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler.done();
        }
    }
}

#[async_trait]
impl ChunkReader for ErrorHandlingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        loop {
            match self.reader.read().await {
                Ok(Some(chunk)) => {
                    self.offset += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Ok(None) => return Ok(None),
                Err(err) => {
                    let handler = match self.handler.as_mut() {
                        Some(handler) => handler,
                        None => return Err(err),
                    };
                    match handler.on_error(err) {
                        Ok(replacement) => {
                            self.reader.close().await;
                            self.reader = replacement.into_unvalidated_chunk_reader(self.offset);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        self.reader.close().await;
        self.finish();
    }
}

impl Drop for ErrorHandlingChunkReader {
    fn drop(&mut self) {
        self.finish();
    }
}
