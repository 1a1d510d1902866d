// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tonic::Status;

use super::chunk_reader::ChunkReader;

/// Fans a single chunk reader out to `consumers` readers observing the same
/// ordered chunk sequence.
///
/// A pump task performs the one real read of the source and publishes each
/// chunk into a bounded channel of depth one per consumer; chunk payloads are
/// shared, not copied. The bounded channels keep all consumers in lock-step
/// with at most one chunk of slack, so the source is never read further ahead
/// than the slowest live consumer. A consumer that closes (or is dropped)
/// stops participating; once every consumer is gone the pump stops reading
/// and closes the source, which is how discarded clones avoid pinning
/// upstream resources.
pub(crate) fn multiplex(
    reader: Box<dyn ChunkReader>,
    consumers: usize,
) -> Vec<Box<dyn ChunkReader>> {
    let mut senders = Vec::with_capacity(consumers);
    let mut readers: Vec<Box<dyn ChunkReader>> = Vec::with_capacity(consumers);
    for _ in 0..consumers {
        let (tx, rx) = mpsc::channel(1);
        senders.push(Some(tx));
        readers.push(Box::new(MultiplexedChunkReader {
            rx,
            latched: None,
            finished: false,
        }));
    }
    tokio::spawn(pump(reader, senders));
    readers
}

async fn pump(
    mut reader: Box<dyn ChunkReader>,
    mut senders: Vec<Option<mpsc::Sender<Result<Bytes, Status>>>>,
) {
    loop {
        match reader.read().await {
            Ok(Some(chunk)) => {
                let mut any_alive = false;
                for sender in senders.iter_mut() {
                    if let Some(tx) = sender {
                        if tx.send(Ok(chunk.clone())).await.is_err() {
                            *sender = None;
                        } else {
                            any_alive = true;
                        }
                    }
                }
                if !any_alive {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                for sender in senders.iter_mut() {
                    if let Some(tx) = sender.take() {
                        let _ = tx.send(Err(err.clone())).await;
                    }
                }
                break;
            }
        }
    }
    reader.close().await;
}

struct MultiplexedChunkReader {
    rx: mpsc::Receiver<Result<Bytes, Status>>,
    latched: Option<Status>,
    finished: bool,
}

#[async_trait]
impl ChunkReader for MultiplexedChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if let Some(status) = &self.latched {
            return Err(status.clone());
        }
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => {
                self.latched = Some(err.clone());
                Err(err)
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.rx.close();
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tonic::{Code, Status};

    use super::multiplex;
    use crate::buffer::chunk_reader::{ChunkReader, StreamChunkReader};
    use crate::buffer::BoxReadStream;

    fn chunk_stream(chunks: Vec<Result<Bytes, Status>>) -> BoxReadStream {
        Box::pin(tokio_stream::iter(chunks))
    }

    async fn collect(mut reader: Box<dyn ChunkReader>) -> Result<Vec<Bytes>, Status> {
        let mut chunks = Vec::new();
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
        Ok(chunks)
    }

    #[tokio::test]
    async fn both_consumers_observe_the_same_chunks() {
        let source = Box::new(StreamChunkReader::new(chunk_stream(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::from_static(b"world")),
        ])));
        let mut readers = multiplex(source, 2);
        let r2 = readers.pop().unwrap();
        let r1 = readers.pop().unwrap();

        // Consumers must run on distinct tasks; driving both sequentially
        // from one task deadlocks once the blob exceeds the channel slack.
        let task1 = tokio::spawn(collect(r1));
        let task2 = tokio::spawn(collect(r2));
        let chunks1 = task1.await.unwrap().unwrap();
        let chunks2 = task2.await.unwrap().unwrap();

        let expected = vec![Bytes::from_static(b"Hello "), Bytes::from_static(b"world")];
        assert_eq!(chunks1, expected);
        assert_eq!(chunks2, expected);
    }

    #[tokio::test]
    async fn errors_reach_every_consumer() {
        let source = Box::new(StreamChunkReader::new(chunk_stream(vec![
            Ok(Bytes::from_static(b"Hel")),
            Err(Status::unavailable("backend went away")),
        ])));
        let mut readers = multiplex(source, 2);
        let r2 = readers.pop().unwrap();
        let r1 = readers.pop().unwrap();

        let task1 = tokio::spawn(collect(r1));
        let task2 = tokio::spawn(collect(r2));
        assert_eq!(task1.await.unwrap().unwrap_err().code(), Code::Unavailable);
        assert_eq!(task2.await.unwrap().unwrap_err().code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn closed_consumer_does_not_starve_the_other() {
        let chunks: Vec<_> = (0..16)
            .map(|_| Ok(Bytes::from_static(b"0123456789abcdef")))
            .collect();
        let source = Box::new(StreamChunkReader::new(chunk_stream(chunks)));
        let mut readers = multiplex(source, 2);
        let mut r2 = readers.pop().unwrap();
        let r1 = readers.pop().unwrap();

        r2.close().await;
        let chunks1 = collect(r1).await.unwrap();
        assert_eq!(chunks1.len(), 16);
    }
}
