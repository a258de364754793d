//! A user-space block storage emulator.
//!
//! A fixed-size [`BlockPool`] is split into equally sized blocks and handed
//! out one block per file. A [`NamespaceTree`] of directories and files sits on
//! top of it; the functions in [`storage`] keep each file's address and size in
//! step with the pool, and [`FileSystem`] bundles both halves behind one call
//! per shell command.
//!
//! # Layout
//! ==================================================
//! | block 0 | block 1 | ...           | block n - 1 |
//! ==================================================
//!
//! An [`Address`] is `block << log2(block_size) | offset`, and a freshly granted
//! address always has a zero offset.
//!
//! Persistence is a pull: [`FileSystem::snapshot`] produces an [`Image`] and
//! [`FileSystem::restore`] turns one back into a filesystem. Encoding the image
//! is left to the caller.

pub mod addr;
pub mod alloc;
pub mod error;
pub mod fs;
pub mod geometry;
pub mod node;
pub mod storage;

pub use crate::addr::{Address, AddressCodec};
pub use crate::alloc::{AllocationRecord, BlockNumber, BlockPool, BlockPoolBuilder, BlockUsage, PoolSnapshot};
pub use crate::error::{FsError, Result};
pub use crate::fs::{EntryKind, FileSystem, Image, ListingEntry};
pub use crate::geometry::Geometry;
pub use crate::node::{FileNode, NamespaceTree, Node, NodeId, NodeKind, Timestamp, TreeRecord};
