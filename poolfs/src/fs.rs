use crate::alloc::{BlockPool, BlockUsage, PoolSnapshot};
use crate::error::{FsError, Result};
use crate::geometry::Geometry;
use crate::node::{FileNode, NamespaceTree, Node, NodeId, NodeKind, TreeRecord};
use crate::storage;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// How deep a listing descends below the listed node.
pub const LIST_DEPTH: usize = 1;

/// Everything needed to bring a filesystem back: the namespace and the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub tree: TreeRecord,
    pub pool: PoolSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One line of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Levels below the listed node; the node itself is at depth 0.
    pub depth: usize,
    pub name: String,
    pub kind: EntryKind,
}

/// A namespace tree paired with the pool its files live in.
///
/// This is the surface a command layer drives: every method is one command,
/// named relative to the caller's current directory. The filesystem performs
/// no locking of its own; callers serialize commands.
#[derive(Debug, Clone)]
pub struct FileSystem {
    tree: NamespaceTree,
    pool: BlockPool,
}

impl FileSystem {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            tree: NamespaceTree::new(),
            pool: BlockPool::new(geometry),
        }
    }

    pub fn tree(&self) -> &NamespaceTree {
        &self.tree
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn create_file(&mut self, dir: NodeId, name: &str) -> Result<NodeId> {
        self.create(dir, Node::file(name))
    }

    pub fn create_dir(&mut self, dir: NodeId, name: &str) -> Result<NodeId> {
        self.create(dir, Node::directory(name))
    }

    fn create(&mut self, dir: NodeId, node: Node) -> Result<NodeId> {
        check_name(node.name())?;
        if self.tree.get_child(dir, node.name()).is_some() {
            return Err(FsError::AlreadyExists(node.name().to_string()));
        }
        let id = self.tree.add_child(dir, node)?;
        info!("created {}", self.tree.path(id));
        Ok(id)
    }

    /// Removes a file or a whole directory subtree, releasing its blocks.
    pub fn remove(&mut self, dir: NodeId, name: &str) -> Result<()> {
        let child = self.child(dir, name)?;
        let path = self.tree.path(child);
        self.tree.remove_child(dir, child, &mut self.pool)?;
        info!("removed {}", path);
        Ok(())
    }

    /// Moves or renames `name`.
    ///
    /// `sub/new_name` moves into the child directory `sub` under a new name, a
    /// destination naming a child directory moves into it, and anything else
    /// renames in place. A file already sitting at the target name is replaced.
    /// Moving never touches the pool.
    pub fn move_entry(&mut self, dir: NodeId, name: &str, destination: &str) -> Result<()> {
        let source = self.child(dir, name)?;

        let (target_dir, target_name) = match destination.split_once('/') {
            Some((sub, new_name)) => {
                let sub_id = self.tree.resolve(dir, sub)?;
                self.expect_dir(sub_id)?;
                (sub_id, new_name.to_string())
            }
            None => match self.tree.get_child(dir, destination) {
                Some(existing) if existing != source && self.is_dir(existing) => {
                    (existing, name.to_string())
                }
                _ => (dir, destination.to_string()),
            },
        };
        check_name(&target_name)?;
        if self.is_dir(source) && self.tree.is_ancestor(source, target_dir) {
            return Err(FsError::InvalidArgument(format!(
                "cannot move {} into itself",
                name
            )));
        }

        match self.tree.get_child(target_dir, &target_name) {
            Some(existing) if existing == source => {}
            Some(existing) if self.is_dir(existing) => {
                return Err(FsError::AlreadyExists(target_name));
            }
            Some(existing) => {
                self.tree.remove_child(target_dir, existing, &mut self.pool)?;
            }
            None => {}
        }

        if target_dir != dir {
            self.tree.detach(dir, source)?;
            self.tree.attach(target_dir, source)?;
        }
        self.tree.rename(source, &target_name)?;
        info!("moved {} to {}", name, self.tree.path(source));
        Ok(())
    }

    /// Resolves one component from `dir` and checks it is a directory.
    pub fn change_dir(&self, dir: NodeId, component: &str) -> Result<NodeId> {
        let target = self.tree.resolve(dir, component)?;
        self.expect_dir(target)?;
        Ok(target)
    }

    /// Lists `dir`, or the node `component` resolves to, one level deep.
    pub fn list(&self, dir: NodeId, component: Option<&str>) -> Result<Vec<ListingEntry>> {
        let target = match component {
            Some(component) => self.tree.resolve(dir, component)?,
            None => dir,
        };
        Ok(self
            .tree
            .walk(target, LIST_DEPTH)
            .into_iter()
            .filter_map(|(depth, id)| {
                self.tree.node(id).map(|node| ListingEntry {
                    depth,
                    name: node.name().to_string(),
                    kind: match node.kind() {
                        NodeKind::Directory(_) => EntryKind::Directory,
                        NodeKind::File(_) => EntryKind::File,
                    },
                })
            })
            .collect())
    }

    pub fn path_of(&self, id: NodeId) -> String {
        self.tree.path(id)
    }

    pub fn file(&self, dir: NodeId, name: &str) -> Result<&FileNode> {
        let id = self.child(dir, name)?;
        self.tree
            .node(id)
            .and_then(Node::as_file)
            .ok_or_else(|| FsError::NotAFile(name.to_string()))
    }

    pub fn write_file(&mut self, dir: NodeId, name: &str, bytes: &[u8], offset: usize) -> Result<()> {
        let (file, pool) = self.file_mut(dir, name)?;
        storage::write(file, pool, bytes, offset).map_err(|err| reject(name, err))
    }

    pub fn append_file(&mut self, dir: NodeId, name: &str, bytes: &[u8]) -> Result<()> {
        let (file, pool) = self.file_mut(dir, name)?;
        storage::append(file, pool, bytes).map_err(|err| reject(name, err))
    }

    pub fn truncate_file(&mut self, dir: NodeId, name: &str, new_size: usize) -> Result<()> {
        let (file, pool) = self.file_mut(dir, name)?;
        storage::truncate(file, pool, new_size).map_err(|err| reject(name, err))
    }

    pub fn relocate_in_file(
        &mut self,
        dir: NodeId,
        name: &str,
        src_offset: usize,
        length: usize,
        dst_offset: usize,
    ) -> Result<()> {
        let (file, pool) = self.file_mut(dir, name)?;
        storage::relocate(file, pool, src_offset, length, dst_offset).map_err(|err| reject(name, err))
    }

    pub fn read_file(&self, dir: NodeId, name: &str, start: usize, len: usize) -> Result<&[u8]> {
        storage::read(self.file(dir, name)?, &self.pool, start, len)
    }

    pub fn read_to_end(&self, dir: NodeId, name: &str) -> Result<&[u8]> {
        storage::read_to_end(self.file(dir, name)?, &self.pool)
    }

    pub fn free_space(&self) -> usize {
        self.pool.free_space()
    }

    pub fn block_map(&self) -> Vec<BlockUsage> {
        self.pool.block_map()
    }

    /// Captures tree and pool together. Nothing may mutate the filesystem
    /// while this runs.
    pub fn snapshot(&self) -> Image {
        Image {
            tree: self.tree.snapshot(),
            pool: self.pool.snapshot(),
        }
    }

    /// Rebuilds a filesystem from an image.
    pub fn restore(image: &Image) -> Result<Self> {
        let pool = BlockPool::restore(image.pool.clone())?;
        let tree = NamespaceTree::restore(&image.tree)?;
        info!(
            "restored filesystem: {} nodes, {} of {} bytes free",
            tree.len(),
            pool.free_space(),
            pool.geometry().total_size()
        );
        Ok(Self { tree, pool })
    }

    fn child(&self, dir: NodeId, name: &str) -> Result<NodeId> {
        self.tree
            .get_child(dir, name)
            .ok_or_else(|| FsError::NoSuchChild(name.to_string()))
    }

    fn file_mut(&mut self, dir: NodeId, name: &str) -> Result<(&mut FileNode, &mut BlockPool)> {
        let id = self.child(dir, name)?;
        let file = self
            .tree
            .node_mut(id)
            .and_then(Node::as_file_mut)
            .ok_or_else(|| FsError::NotAFile(name.to_string()))?;
        Ok((file, &mut self.pool))
    }

    fn is_dir(&self, id: NodeId) -> bool {
        self.tree.node(id).map_or(false, Node::is_dir)
    }

    fn expect_dir(&self, id: NodeId) -> Result<()> {
        match self.tree.node(id) {
            Some(node) if node.is_dir() => Ok(()),
            Some(node) => Err(FsError::NotADirectory(node.name().to_string())),
            None => Err(FsError::NoSuchPath(format!("#{}", id))),
        }
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new(Geometry::default())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidArgument(format!("invalid name {:?}", name)));
    }
    Ok(())
}

fn reject(name: &str, err: FsError) -> FsError {
    warn!("{}: {}", name, err);
    err
}
