// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use blobstore::buffer::ReaderAt;
use bytes::Bytes;
use memmap2::{Mmap, MmapOptions};
use tonic::Status;

use crate::BlockDevice;

/// A `BlockDevice` over a regular file or a UNIX device node.
///
/// Reads go through a shared read-only memory map, making them wait-free;
/// writes go through the file descriptor directly, which avoids faulting
/// pages in just to overwrite them. An I/O failure of the underlying medium
/// during a mapped read surfaces as SIGBUS and is not recoverable here.
pub struct MemoryMappedBlockDevice {
    file: Arc<File>,
    map: Mmap,
    sector_size_bytes: usize,
    sector_count: i64,
    size_bytes: u64,
}

impl MemoryMappedBlockDevice {
    fn new(
        file: File,
        sector_size_bytes: usize,
        sector_count: i64,
    ) -> Result<Self, Status> {
        let size_bytes = sector_size_bytes as u64 * sector_count as u64;
        // Safety: the map is read-only, and the file stays open for the
        // lifetime of the map. Concurrent writes through the descriptor are
        // observed by readers, which is intended.
        let map = unsafe { MmapOptions::new().len(size_bytes as usize).map(&file) }
            .map_err(|err| Status::internal(format!("Failed to map block device: {err}")))?;
        Ok(MemoryMappedBlockDevice {
            file: Arc::new(file),
            map,
            sector_size_bytes,
            sector_count,
            size_bytes,
        })
    }
}

#[async_trait]
impl BlockDevice for MemoryMappedBlockDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        if offset >= self.size_bytes {
            return Ok(0);
        }
        let begin = offset as usize;
        let count = buf.len().min((self.size_bytes - offset) as usize);
        buf[..count].copy_from_slice(&self.map[begin..begin + count]);
        Ok(count)
    }

    async fn write_at(&self, data: Bytes, offset: u64) -> Result<(), Status> {
        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > self.size_bytes) {
            return Err(Status::invalid_argument(format!(
                "Write of {} bytes at offset {offset} extends past the device, \
                 which is {} bytes in size",
                data.len(),
                self.size_bytes
            )));
        }
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.write_all_at(&data, offset))
            .await
            .map_err(|err| Status::internal(format!("Write task failed: {err}")))?
            .map_err(|err| Status::internal(format!("Failed to write to block device: {err}")))
    }

    async fn sync(&self) -> Result<(), Status> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(|err| Status::internal(format!("Sync task failed: {err}")))?
            .map_err(|err| Status::internal(format!("Failed to sync block device: {err}")))
    }

    fn sector_size_bytes(&self) -> usize {
        self.sector_size_bytes
    }

    fn sector_count(&self) -> i64 {
        self.sector_count
    }
}

impl ReaderAt for MemoryMappedBlockDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        BlockDevice::read_at(self, buf, offset)
    }
}

/// Open a regular file as a block device of at least `minimum_size_bytes`,
/// returning the device together with its sector size and sector count.
///
/// The file is grown to the next multiple of the filesystem's preferred
/// block size. With `zero_initialize` the file is truncated first, so all
/// sectors read as zeroes; otherwise existing contents are preserved, which
/// is how persistent stores reopen their state.
pub fn new_block_device_from_file(
    path: impl AsRef<Path>,
    minimum_size_bytes: u64,
    zero_initialize: bool,
) -> Result<(MemoryMappedBlockDevice, usize, i64), Status> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(|err| {
            Status::internal(format!("Failed to open block device {path:?}: {err}"))
        })?;

    let metadata = file.metadata().map_err(|err| {
        Status::internal(format!("Failed to stat block device {path:?}: {err}"))
    })?;
    let sector_size_bytes = metadata.blksize() as usize;
    if sector_size_bytes == 0 {
        return Err(Status::internal(format!(
            "Block device {path:?} reports a zero sector size"
        )));
    }

    let sector_count = minimum_size_bytes.div_ceil(sector_size_bytes as u64).max(1) as i64;
    let size_bytes = sector_count as u64 * sector_size_bytes as u64;

    if zero_initialize {
        // Truncating to zero releases the old extents, so the grown file
        // reads back as true zeroes.
        file.set_len(0).map_err(|err| {
            Status::internal(format!("Failed to truncate block device {path:?}: {err}"))
        })?;
    }
    if metadata.size() != size_bytes || zero_initialize {
        file.set_len(size_bytes).map_err(|err| {
            Status::internal(format!("Failed to resize block device {path:?}: {err}"))
        })?;
    }

    let device = MemoryMappedBlockDevice::new(file, sector_size_bytes, sector_count)?;
    Ok((device, sector_size_bytes, sector_count))
}

/// Open a raw device node as a block device, discovering its sector size and
/// byte count through the block-layer ioctls.
#[cfg(target_os = "linux")]
pub fn new_block_device_from_device(
    path: impl AsRef<Path>,
) -> Result<(MemoryMappedBlockDevice, usize, i64), Status> {
    use std::os::unix::io::AsRawFd;

    // <linux/fs.h>: _IO(0x12, 104) and _IOR(0x12, 114, size_t).
    const BLKSSZGET: libc::c_ulong = 0x1268;
    const BLKGETSIZE64: libc::c_ulong = 0x80081272;

    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| {
            Status::internal(format!("Failed to open block device {path:?}: {err}"))
        })?;

    let fd = file.as_raw_fd();
    let mut sector_size_bytes: libc::c_int = 0;
    // Safety: both ioctls write a single integer of the declared width into
    // the pointed-to location, which outlives the call.
    if unsafe { libc::ioctl(fd, BLKSSZGET, &mut sector_size_bytes) } != 0 {
        return Err(Status::internal(format!(
            "Failed to obtain sector size of block device {path:?}: {}",
            std::io::Error::last_os_error()
        )));
    }
    let mut size_bytes: u64 = 0;
    if unsafe { libc::ioctl(fd, BLKGETSIZE64, &mut size_bytes) } != 0 {
        return Err(Status::internal(format!(
            "Failed to obtain size of block device {path:?}: {}",
            std::io::Error::last_os_error()
        )));
    }

    let sector_size_bytes = sector_size_bytes as usize;
    let sector_count = (size_bytes / sector_size_bytes as u64) as i64;
    let device = MemoryMappedBlockDevice::new(file, sector_size_bytes, sector_count)?;
    Ok((device, sector_size_bytes, sector_count))
}
