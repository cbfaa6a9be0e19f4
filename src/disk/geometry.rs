// src/disk/geometry.rs

//! Sector-accurate copy geometry
//!
//! Partition ranges are expressed in 512-byte sectors. Copying a
//! multi-gigabyte range one sector at a time is far too slow, so the copy
//! parameters are rescaled: as long as both the start offset and the sector
//! count stay even, the block size doubles while both halve, up to a 32 MiB
//! ceiling. The byte range covered is unchanged, which is checked before any
//! I/O happens.

use crate::error::{Error, Result};

/// Bytes per sector in every partition table this tool reads
pub const SECTOR_SIZE: u64 = 512;

/// Ceiling for the rescaled copy block size (32 MiB)
pub const MAX_BLOCK_SIZE: u64 = 32 * 1024 * 1024;

/// Rescaled copy parameters: `count` blocks of `block_size` bytes starting
/// at block offset `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyGeometry {
    pub start: u64,
    pub count: u64,
    pub block_size: u64,
}

impl CopyGeometry {
    /// Byte offset where the copy begins
    pub fn byte_offset(&self) -> u64 {
        self.start * self.block_size
    }

    /// Total bytes the copy covers
    pub fn byte_len(&self) -> u64 {
        self.count * self.block_size
    }
}

/// Rescale a `(start_sector, sector_count)` range for large-block copying
///
/// Fails if the rescaled parameters would not cover the exact original byte
/// range; that can only happen through an implementation bug, and copying a
/// wrong range onto a disk is never acceptable.
pub fn optimize(start_sector: u64, sector_count: u64) -> Result<CopyGeometry> {
    let mut start = start_sector;
    let mut count = sector_count;
    let mut block_size = SECTOR_SIZE;

    while start % 2 == 0 && count % 2 == 0 && count > 1 && block_size < MAX_BLOCK_SIZE {
        start /= 2;
        count /= 2;
        block_size *= 2;
    }

    let geometry = CopyGeometry {
        start,
        count,
        block_size,
    };

    if geometry.byte_offset() != start_sector * SECTOR_SIZE
        || geometry.byte_len() != sector_count * SECTOR_SIZE
    {
        return Err(Error::GeometryMismatch(format!(
            "rescaled ({}, {}, bs={}) does not cover sectors ({}, {})",
            geometry.start, geometry.count, geometry.block_size, start_sector, sector_count
        )));
    }

    Ok(geometry)
}
