use crate::addr::{Address, AddressCodec};
use crate::error::{FsError, Result};
use crate::geometry::{Geometry, DEFAULT_BLOCK_SIZE, DEFAULT_TOTAL_SIZE};

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// The block index to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is the number of blocks in the pool.
pub type BlockNumber = usize;

/// A fixed-size memory pool carved into equally sized blocks.
///
/// Every allocation is granted a whole block, so a file can never be larger
/// than one block. Free blocks are handed out first-in first-out; there is no
/// need for best-fit search or coalescing since all blocks are interchangeable.
///
/// Bytes of a released block are not wiped. They stay physically present until
/// the block is handed out and overwritten again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPool {
    geometry: Geometry,
    codec: AddressCodec,
    /// One buffer per block, each exactly `block_size` long.
    storage: Vec<Vec<u8>>,
    /// Bytes reserved for each granted address.
    allocations: BTreeMap<Address, usize>,
    /// Bytes actually written for each granted address, never above its reservation.
    used_per_allocation: BTreeMap<Address, usize>,
    /// Blocks not bound to any address, in hand-out order.
    free_blocks: VecDeque<BlockNumber>,
    /// Sum of all reservations.
    space_used: usize,
}

/// Occupancy of a single block, as reported by [`BlockPool::block_map`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUsage {
    pub block: BlockNumber,
    /// The address bound to this block, `None` if the block is free.
    pub address: Option<Address>,
    pub reserved: usize,
    pub used: usize,
}

impl BlockPool {
    pub fn new(geometry: Geometry) -> Self {
        let block_count = geometry.block_count();
        Self {
            codec: AddressCodec::new(&geometry),
            storage: vec![vec![0; geometry.block_size()]; block_count],
            allocations: BTreeMap::new(),
            used_per_allocation: BTreeMap::new(),
            free_blocks: (0..block_count).collect(),
            space_used: 0,
            geometry,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    pub fn space_used(&self) -> usize {
        self.space_used
    }

    pub fn free_space(&self) -> usize {
        self.geometry.total_size().saturating_sub(self.space_used)
    }

    /// Blocks not currently bound, in the order they will be handed out.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.free_blocks.iter().copied()
    }

    /// Granted addresses with their reserved size, in address order.
    pub fn allocations(&self) -> impl Iterator<Item = (Address, usize)> + '_ {
        self.allocations.iter().map(|(&addr, &size)| (addr, size))
    }

    pub fn allocation_size(&self, addr: Address) -> Option<usize> {
        self.allocations.get(&addr).copied()
    }

    pub fn used_len(&self, addr: Address) -> Option<usize> {
        self.used_per_allocation.get(&addr).copied()
    }

    /// Reserves a fresh block for `size` bytes and returns its address.
    ///
    /// # Errors
    ///
    /// `FileTooLarge` if `size` exceeds the block size, `OutOfSpace` if the byte
    /// budget would be exceeded, and `NoFreeBlocks` if every block is bound even
    /// though bytes remain.
    pub fn allocate(&mut self, size: usize) -> Result<Address> {
        let max = self.geometry.max_file_size();
        if size > max {
            return Err(FsError::FileTooLarge { size, max });
        }
        if self.space_used + size > self.geometry.total_size() {
            return Err(FsError::OutOfSpace {
                requested: size,
                free: self.free_space(),
            });
        }
        let block = self.free_blocks.pop_front().ok_or(FsError::NoFreeBlocks)?;
        let addr = self.codec.encode(block, 0);

        self.allocations.insert(addr, size);
        self.used_per_allocation.insert(addr, 0);
        self.space_used += size;
        debug!("allocated block {} at {:#x} for {} bytes", block, addr, size);
        Ok(addr)
    }

    /// Releases the block bound to `addr`. Unknown addresses are ignored.
    pub fn deallocate(&mut self, addr: Address) {
        if let Some(size) = self.allocations.remove(&addr) {
            self.used_per_allocation.remove(&addr);
            self.space_used -= size;
            let (block, _) = self.codec.decode(addr);
            self.free_blocks.push_back(block);
            debug!("released block {} at {:#x} ({} bytes)", block, addr, size);
        }
    }

    /// Returns `len` bytes starting `start` bytes into the allocation.
    ///
    /// The span only has to fit the reservation. Bounding it by what was
    /// actually written is the caller's job; nothing is zero-filled.
    pub fn read(&self, addr: Address, start: usize, len: usize) -> Result<&[u8]> {
        let (block, offset, reserved) = self.locate(addr)?;
        let end = check_span(start, len, reserved)?;
        Ok(&self.storage[block][offset + start..offset + end])
    }

    /// Replaces the contents of the allocation with `data`.
    ///
    /// Data larger than the reservation moves the file to a fresh block first.
    /// Callers must keep the returned address, not the one they passed in.
    pub fn write(&mut self, addr: Address, data: &[u8]) -> Result<Address> {
        let (_, _, reserved) = self.locate(addr)?;
        let addr = if data.len() > reserved {
            self.reallocate(addr, data.len())?
        } else {
            addr
        };

        let (block, offset, reserved) = self.locate(addr)?;
        let region = &mut self.storage[block][offset..offset + reserved];
        region[..data.len()].copy_from_slice(data);
        for byte in region[data.len()..].iter_mut() {
            *byte = 0;
        }
        self.used_per_allocation.insert(addr, data.len());
        Ok(addr)
    }

    /// Adds `data` after the bytes already written, moving to a fresh block
    /// when the reservation is too small. Returns the possibly new address.
    pub fn append(&mut self, addr: Address, data: &[u8]) -> Result<Address> {
        let (_, _, reserved) = self.locate(addr)?;
        let used = self.used(addr);
        let new_len = used + data.len();
        // reallocate carries the written prefix over to the new block.
        let addr = if new_len > reserved {
            self.reallocate(addr, new_len)?
        } else {
            addr
        };

        let (block, offset, _) = self.locate(addr)?;
        self.storage[block][offset + used..offset + new_len].copy_from_slice(data);
        self.used_per_allocation.insert(addr, new_len);
        Ok(addr)
    }

    /// Shrinks the reservation to `new_size`. Bytes past the new boundary stay
    /// in the block but can no longer be reached.
    pub fn truncate(&mut self, addr: Address, new_size: usize) -> Result<()> {
        let (_, _, reserved) = self.locate(addr)?;
        if new_size > reserved {
            return Err(FsError::InvalidSize {
                requested: new_size,
                limit: reserved,
            });
        }

        self.allocations.insert(addr, new_size);
        self.space_used -= reserved - new_size;
        let used = self.used(addr).min(new_size);
        self.used_per_allocation.insert(addr, used);
        debug!("truncated {:#x} from {} to {} bytes", addr, reserved, new_size);
        Ok(())
    }

    /// Copies `length` bytes from `src_offset` to `dst_offset` inside the same
    /// block. The spans may overlap. Address and sizes are unchanged.
    pub fn relocate_within(
        &mut self,
        addr: Address,
        src_offset: usize,
        length: usize,
        dst_offset: usize,
    ) -> Result<()> {
        let (block, offset, reserved) = self.locate(addr)?;
        let src_end = check_span(src_offset, length, reserved)?;
        check_span(dst_offset, length, reserved)?;

        self.storage[block].copy_within(offset + src_offset..offset + src_end, offset + dst_offset);
        debug!(
            "moved {} bytes within {:#x} from {} to {}",
            length, addr, src_offset, dst_offset
        );
        Ok(())
    }

    /// Moves the allocation to a fresh block of `new_size` bytes and returns the
    /// new address.
    ///
    /// The written prefix, up to `new_size` bytes, is copied into the new block
    /// before returning; callers never have to read the released address. On
    /// failure the old allocation is left untouched.
    pub fn reallocate(&mut self, addr: Address, new_size: usize) -> Result<Address> {
        let (_, _, reserved) = self.locate(addr)?;
        let max = self.geometry.max_file_size();
        if new_size > max {
            return Err(FsError::FileTooLarge {
                size: new_size,
                max,
            });
        }
        if self.space_used - reserved + new_size > self.geometry.total_size() {
            return Err(FsError::OutOfSpace {
                requested: new_size,
                free: self.free_space() + reserved,
            });
        }

        let kept = self.used(addr).min(new_size);
        let prefix = self.read(addr, 0, kept)?.to_vec();
        self.deallocate(addr);
        // Cannot fail: a block was just released and the byte budget was checked.
        let new_addr = self.allocate(new_size)?;
        let (block, offset, _) = self.locate(new_addr)?;
        self.storage[block][offset..offset + kept].copy_from_slice(&prefix);
        self.used_per_allocation.insert(new_addr, kept);
        debug!("reallocated {:#x} to {:#x} ({} bytes)", addr, new_addr, new_size);
        Ok(new_addr)
    }

    /// Occupancy of every block in index order.
    pub fn block_map(&self) -> Vec<BlockUsage> {
        let mut usage: Vec<BlockUsage> = (0..self.geometry.block_count())
            .map(|block| BlockUsage {
                block,
                address: None,
                reserved: 0,
                used: 0,
            })
            .collect();
        for (&addr, &size) in self.allocations.iter() {
            let (block, _) = self.codec.decode(addr);
            usage[block] = BlockUsage {
                block,
                address: Some(addr),
                reserved: size,
                used: self.used(addr),
            };
        }
        usage
    }

    /// Captures the full pool state, raw block bytes included.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            total_size: self.geometry.total_size(),
            block_size: self.geometry.block_size(),
            allocations: self
                .allocations
                .iter()
                .map(|(&address, &size)| AllocationRecord {
                    address,
                    size,
                    used: self.used(address),
                })
                .collect(),
            free_blocks: self.free_blocks.iter().copied().collect(),
            blocks: self.storage.clone(),
        }
    }

    /// Rebuilds a pool from a snapshot.
    ///
    /// Every block has to be either free or bound to exactly one whole-block
    /// address, and the reservations have to fit the pool. Block contents are
    /// trusted.
    pub fn restore(snapshot: PoolSnapshot) -> Result<Self> {
        let geometry = Geometry::new(snapshot.total_size, snapshot.block_size)?;
        let block_count = geometry.block_count();
        if snapshot.blocks.len() != block_count {
            return Err(FsError::InvalidSnapshot(format!(
                "expected {} blocks, found {}",
                block_count,
                snapshot.blocks.len()
            )));
        }
        if let Some(block) = snapshot
            .blocks
            .iter()
            .position(|bytes| bytes.len() != geometry.block_size())
        {
            return Err(FsError::InvalidSnapshot(format!(
                "block {} is not {} bytes long",
                block,
                geometry.block_size()
            )));
        }

        let codec = AddressCodec::new(&geometry);
        let mut claimed = vec![false; block_count];
        let mut allocations = BTreeMap::new();
        let mut used_per_allocation = BTreeMap::new();
        let mut space_used = 0;
        for record in snapshot.allocations {
            let (block, offset) = codec.decode(record.address);
            if block >= block_count || offset != 0 || record.size > geometry.block_size() {
                return Err(FsError::InvalidSnapshot(format!(
                    "allocation at {:#x} does not fit the pool",
                    record.address
                )));
            }
            claim(&mut claimed, block)?;
            allocations.insert(record.address, record.size);
            used_per_allocation.insert(record.address, record.used.min(record.size));
            space_used += record.size;
        }
        if space_used > geometry.total_size() {
            return Err(FsError::InvalidSnapshot(format!(
                "{} bytes reserved in a pool of {}",
                space_used,
                geometry.total_size()
            )));
        }
        for &block in &snapshot.free_blocks {
            if block >= block_count {
                return Err(FsError::InvalidSnapshot(format!(
                    "free block {} is outside the pool",
                    block
                )));
            }
            claim(&mut claimed, block)?;
        }
        if let Some(block) = claimed.iter().position(|&c| !c) {
            return Err(FsError::InvalidSnapshot(format!(
                "block {} is neither free nor allocated",
                block
            )));
        }

        Ok(Self {
            geometry,
            codec,
            storage: snapshot.blocks,
            allocations,
            used_per_allocation,
            free_blocks: snapshot.free_blocks.into_iter().collect(),
            space_used,
        })
    }

    /// Resolves a granted address to its block, intra-block offset and reservation.
    fn locate(&self, addr: Address) -> Result<(BlockNumber, usize, usize)> {
        let reserved = self
            .allocations
            .get(&addr)
            .copied()
            .ok_or(FsError::UnknownAddress(addr))?;
        let (block, offset) = self.codec.decode(addr);
        Ok((block, offset, reserved))
    }

    fn used(&self, addr: Address) -> usize {
        self.used_per_allocation.get(&addr).copied().unwrap_or(0)
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::new(Geometry::default())
    }
}

/// Marks `block` as accounted for, failing if something already claimed it.
fn claim(claimed: &mut [bool], block: BlockNumber) -> Result<()> {
    if claimed[block] {
        return Err(FsError::InvalidSnapshot(format!(
            "block {} is tracked twice",
            block
        )));
    }
    claimed[block] = true;
    Ok(())
}

/// Returns the exclusive end of `[start, start + len)` if it fits in `limit` bytes.
fn check_span(start: usize, len: usize, limit: usize) -> Result<usize> {
    match start.checked_add(len) {
        Some(end) if end <= limit => Ok(end),
        _ => Err(FsError::OutOfRange {
            start,
            end: start.saturating_add(len),
            limit,
        }),
    }
}

pub struct BlockPoolBuilder {
    total_size: usize,
    block_size: usize,
}

impl Default for BlockPoolBuilder {
    fn default() -> Self {
        Self {
            total_size: DEFAULT_TOTAL_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl BlockPoolBuilder {
    /// Sets the capacity of the pool in bytes.
    pub fn with_total_size(mut self, bytes: usize) -> Self {
        self.total_size = bytes;
        self
    }

    /// Sets the size of each block, which is also the largest possible file.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn build(self) -> Result<BlockPool> {
        Ok(BlockPool::new(Geometry::new(self.total_size, self.block_size)?))
    }
}

/// A serializable capture of a [`BlockPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub total_size: usize,
    pub block_size: usize,
    pub allocations: Vec<AllocationRecord>,
    /// Free blocks in hand-out order.
    pub free_blocks: Vec<BlockNumber>,
    pub blocks: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub address: Address,
    pub size: usize,
    pub used: usize,
}
