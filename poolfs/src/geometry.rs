use crate::error::{FsError, Result};
use serde::{Deserialize, Serialize};

/// 1 KiB of pool memory.
pub const DEFAULT_TOTAL_SIZE: usize = 1024;
/// 64 byte blocks, giving 16 blocks in a default pool.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// The shape of a block pool: how many bytes it holds and how those bytes are
/// carved into blocks.
///
/// A file is always stored in exactly one block, so the block size is also the
/// largest file the pool can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Capacity of the pool in bytes.
    total_size: usize,
    /// Fixed allocation granularity. Always a power of two.
    block_size: usize,
}

impl Geometry {
    pub fn new(total_size: usize, block_size: usize) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(FsError::InvalidGeometry(format!(
                "block size {} is not a power of two",
                block_size
            )));
        }
        if total_size == 0 || total_size % block_size != 0 {
            return Err(FsError::InvalidGeometry(format!(
                "total size {} is not a non-zero multiple of the block size {}",
                total_size, block_size
            )));
        }
        Ok(Self {
            total_size,
            block_size,
        })
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.total_size / self.block_size
    }

    pub fn max_file_size(&self) -> usize {
        self.block_size
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            total_size: DEFAULT_TOTAL_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}
