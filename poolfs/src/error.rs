use crate::addr::Address;
use thiserror::Error;

/// Every failure the pool, the namespace tree or the command layer can report.
///
/// None of these are fatal. A command that fails leaves the pool and the tree
/// exactly as they were before the failing primitive ran.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("not enough space in memory: requested {requested} bytes, {free} free")]
    OutOfSpace { requested: usize, free: usize },
    #[error("no free blocks left in the pool")]
    NoFreeBlocks,
    #[error("file of {size} bytes exceeds the maximum file size of {max} bytes")]
    FileTooLarge { size: usize, max: usize },
    #[error("address {0:#x} was never allocated")]
    UnknownAddress(Address),
    #[error("invalid size {requested}, limit is {limit}")]
    InvalidSize { requested: usize, limit: usize },
    #[error("span [{start}, {end}) is outside of the {limit} accessible bytes")]
    OutOfRange {
        start: usize,
        end: usize,
        limit: usize,
    },
    #[error("no such path: {0}")]
    NoSuchPath(String),
    #[error("no such file or directory: {0}")]
    NoSuchChild(String),
    #[error("offset {offset} is past the end of a {size} byte file")]
    OffsetOutOfRange { offset: usize, size: usize },
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} is not a file")]
    NotAFile(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid pool geometry: {0}")]
    InvalidGeometry(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl FsError {
    /// True for the failures that mean a file could not get the memory it
    /// asked for.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            FsError::OutOfSpace { .. } | FsError::NoFreeBlocks | FsError::FileTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
