// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Sector-oriented random-access storage.
//!
//! A [`BlockDevice`] is the raw substrate that buffers are read from and
//! written to: a byte medium of fixed size with a known sector size. Any
//! index structure on top of it is a separate concern. Higher layers align
//! their writes to sector boundaries to avoid read-modify-write cycles in
//! the storage stack.

#![deny(warnings)]

use async_trait::async_trait;
use bytes::Bytes;
use tonic::Status;

#[cfg(unix)]
mod memory_mapped;
mod throttling;

#[cfg(unix)]
pub use memory_mapped::{new_block_device_from_file, MemoryMappedBlockDevice};
#[cfg(target_os = "linux")]
pub use memory_mapped::new_block_device_from_device;
pub use throttling::WriteThrottlingBlockDevice;

/// Random access to a fixed-size byte medium.
///
/// Reads are synchronous and wait-free where the implementation permits
/// (e.g., served from a shared memory map); writes and syncs may suspend.
#[async_trait]
pub trait BlockDevice: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`, returning how many bytes
    /// were read. A short count is only returned at the end of the device.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status>;

    /// Write `data` at `offset`. Writes that extend past the end of the
    /// device fail.
    async fn write_at(&self, data: Bytes, offset: u64) -> Result<(), Status>;

    /// Flush written data to the underlying medium.
    async fn sync(&self) -> Result<(), Status>;

    fn sector_size_bytes(&self) -> usize;

    fn sector_count(&self) -> i64;
}

#[async_trait]
impl<D> BlockDevice for Box<D>
where
    D: BlockDevice + Send + Sync + ?Sized,
{
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        (**self).read_at(buf, offset)
    }

    async fn write_at(&self, data: Bytes, offset: u64) -> Result<(), Status> {
        (**self).write_at(data, offset).await
    }

    async fn sync(&self) -> Result<(), Status> {
        (**self).sync().await
    }

    fn sector_size_bytes(&self) -> usize {
        (**self).sector_size_bytes()
    }

    fn sector_count(&self) -> i64 {
        (**self).sector_count()
    }
}
