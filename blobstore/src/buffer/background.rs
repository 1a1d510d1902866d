// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tonic::Status;

use super::chunk_reader::ChunkReader;

/// Waits for a background task to complete and returns its outcome. A panic
/// in the task is reported as an internal error.
pub(crate) async fn join_task(task: JoinHandle<Result<(), Status>>) -> Result<(), Status> {
    match task.await {
        Ok(result) => result,
        Err(err) => Err(Status::internal(format!("Background task failed: {err}"))),
    }
}

/// Combines the outcome of a foreground operation with that of a background
/// task. The foreground error wins when both fail.
pub(crate) async fn finish<T>(
    task: JoinHandle<Result<(), Status>>,
    foreground: Result<T, Status>,
) -> Result<T, Status> {
    let background = join_task(task).await;
    match foreground {
        Ok(value) => background.map(|()| value),
        Err(err) => Err(err),
    }
}

/// Forwards chunks from an inner reader; at end-of-stream (and on close) the
/// background task is joined and its error, if any, replaces the
/// end-of-stream signal.
pub(crate) struct TaskJoiningChunkReader {
    inner: Box<dyn ChunkReader>,
    task: Option<JoinHandle<Result<(), Status>>>,
    task_error: Option<Status>,
}

impl TaskJoiningChunkReader {
    pub fn new(inner: Box<dyn ChunkReader>, task: JoinHandle<Result<(), Status>>) -> Self {
        TaskJoiningChunkReader {
            inner,
            task: Some(task),
            task_error: None,
        }
    }

    async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = join_task(task).await {
                self.task_error = Some(err);
            }
        }
    }
}

#[async_trait]
impl ChunkReader for TaskJoiningChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        match self.inner.read().await {
            Ok(None) => {
                self.join().await;
                match &self.task_error {
                    Some(err) => Err(err.clone()),
                    None => Ok(None),
                }
            }
            other => other,
        }
    }

    async fn close(&mut self) {
        self.inner.close().await;
        // The foreground has given up on the data; the task is still joined
        // so its resources are released, but its error goes unreported.
        self.join().await;
    }
}
