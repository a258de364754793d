//! File-level operations on top of the block pool.
//!
//! Every function takes the pool explicitly and keeps the file's address and
//! size in step with what the pool reports. `FileNode::size` is the only length
//! callers should look at; the pool's own written-length bookkeeping stays
//! internal. A failed call leaves both the file and the pool unchanged.

use crate::addr::Address;
use crate::alloc::BlockPool;
use crate::error::{FsError, Result};
use crate::node::{now, FileNode};

use log::{debug, warn};

/// Makes sure `file` owns a block, reserving `byte_count` bytes if it has none.
pub fn bind_for_write(file: &mut FileNode, pool: &mut BlockPool, byte_count: usize) -> Result<Address> {
    if let Some(addr) = file.starting_addr {
        return Ok(addr);
    }
    let addr = pool.allocate(byte_count).map_err(|err| {
        warn!("could not bind {} bytes: {}", byte_count, err);
        err
    })?;
    file.starting_addr = Some(addr);
    file.size = 0;
    debug!("bound file to {:#x}", addr);
    Ok(addr)
}

/// Replaces the contents of `file` from `offset` onward with `bytes`.
///
/// An offset of zero rewrites the whole file. Offsets past the current end are
/// rejected.
pub fn write(file: &mut FileNode, pool: &mut BlockPool, bytes: &[u8], offset: usize) -> Result<()> {
    if offset > file.size {
        return Err(FsError::OffsetOutOfRange {
            offset,
            size: file.size,
        });
    }

    let mut content = read(file, pool, 0, offset)?.to_vec();
    content.extend_from_slice(bytes);

    let addr = bind_for_write(file, pool, content.len())?;
    let addr = pool.write(addr, &content)?;
    file.starting_addr = Some(addr);
    file.size = content.len();
    file.date_modified = now();
    Ok(())
}

/// Adds `bytes` at the end of `file`.
pub fn append(file: &mut FileNode, pool: &mut BlockPool, bytes: &[u8]) -> Result<()> {
    let addr = bind_for_write(file, pool, bytes.len())?;
    let addr = pool.append(addr, bytes)?;
    file.starting_addr = Some(addr);
    file.size += bytes.len();
    file.date_modified = now();
    Ok(())
}

/// Cuts `file` down to `new_size` bytes. Files never grow through truncation.
pub fn truncate(file: &mut FileNode, pool: &mut BlockPool, new_size: usize) -> Result<()> {
    if new_size > file.size {
        return Err(FsError::InvalidSize {
            requested: new_size,
            limit: file.size,
        });
    }
    if let Some(addr) = file.starting_addr {
        pool.truncate(addr, new_size)?;
    }
    file.size = new_size;
    file.date_modified = now();
    Ok(())
}

/// Returns `len` bytes of `file` starting at `start`.
pub fn read<'a>(file: &FileNode, pool: &'a BlockPool, start: usize, len: usize) -> Result<&'a [u8]> {
    check_within(start, len, file.size)?;
    match file.starting_addr {
        Some(addr) => pool.read(addr, start, len),
        // An unbound file is empty, so only the empty span passes the check above.
        None => Ok(&[]),
    }
}

pub fn read_to_end<'a>(file: &FileNode, pool: &'a BlockPool) -> Result<&'a [u8]> {
    read(file, pool, 0, file.size)
}

/// Copies `length` bytes from `src_offset` to `dst_offset` within `file`.
/// Both spans have to lie inside the file.
pub fn relocate(
    file: &mut FileNode,
    pool: &mut BlockPool,
    src_offset: usize,
    length: usize,
    dst_offset: usize,
) -> Result<()> {
    check_within(src_offset, length, file.size)?;
    check_within(dst_offset, length, file.size)?;
    if let Some(addr) = file.starting_addr {
        pool.relocate_within(addr, src_offset, length, dst_offset)?;
    }
    file.date_modified = now();
    Ok(())
}

/// Hands the file's block back to the pool. Unbound files are left alone.
pub fn release(file: &mut FileNode, pool: &mut BlockPool) {
    if let Some(addr) = file.starting_addr.take() {
        pool.deallocate(addr);
    }
    file.size = 0;
}

fn check_within(start: usize, len: usize, size: usize) -> Result<()> {
    match start.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(FsError::OutOfRange {
            start,
            end: start.saturating_add(len),
            limit: size,
        }),
    }
}
