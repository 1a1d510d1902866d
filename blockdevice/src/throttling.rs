// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use async_trait::async_trait;
use blobstore::buffer::ReaderAt;
use bytes::Bytes;
use tokio::sync::Semaphore;
use tonic::Status;

use crate::BlockDevice;

/// Bounds the number of concurrently executing writes against an underlying
/// device.
///
/// Device writes run on blocking threads; without a bound, a burst of writes
/// can starve the host of operating-system threads. Reads stay unthrottled,
/// as they are served from the memory map. Waiting for a write slot is
/// cancel-safe: dropping the future releases the caller's interest in the
/// semaphore.
pub struct WriteThrottlingBlockDevice<D> {
    inner: D,
    semaphore: Semaphore,
}

impl<D> WriteThrottlingBlockDevice<D>
where
    D: BlockDevice,
{
    pub fn new(inner: D, maximum_concurrent_writes: usize) -> Self {
        WriteThrottlingBlockDevice {
            inner,
            semaphore: Semaphore::new(maximum_concurrent_writes),
        }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

#[async_trait]
impl<D> BlockDevice for WriteThrottlingBlockDevice<D>
where
    D: BlockDevice,
{
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        self.inner.read_at(buf, offset)
    }

    async fn write_at(&self, data: Bytes, offset: u64) -> Result<(), Status> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|err| Status::internal(format!("Write semaphore closed: {err}")))?;
        self.inner.write_at(data, offset).await
    }

    async fn sync(&self) -> Result<(), Status> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|err| Status::internal(format!("Write semaphore closed: {err}")))?;
        self.inner.sync().await
    }

    fn sector_size_bytes(&self) -> usize {
        self.inner.sector_size_bytes()
    }

    fn sector_count(&self) -> i64 {
        self.inner.sector_count()
    }
}

impl<D> ReaderAt for WriteThrottlingBlockDevice<D>
where
    D: BlockDevice + 'static,
{
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        self.inner.read_at(buf, offset)
    }
}
