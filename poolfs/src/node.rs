use crate::addr::Address;
use crate::alloc::BlockPool;
use crate::error::{FsError, Result};
use crate::storage;

use log::info;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle to a node slot in a [`NamespaceTree`].
pub type NodeId = usize;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

pub const ROOT_NAME: &str = "/";

pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    name: String,
    date_created: Timestamp,
    /// Back-reference used for `..` and path display. It never owns the parent.
    parent: Option<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory(DirectoryNode),
    File(FileNode),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    /// Owned children in insertion order.
    children: Vec<NodeId>,
}

/// A leaf of the tree owning at most one block of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// `None` until the first write or append binds a block.
    pub(crate) starting_addr: Option<Address>,
    /// Bytes visible to readers; mirrors what the pool has written for the address.
    pub(crate) size: usize,
    pub(crate) date_modified: Timestamp,
}

impl FileNode {
    pub fn new(date_modified: Timestamp) -> Self {
        Self {
            starting_addr: None,
            size: 0,
            date_modified,
        }
    }

    pub fn starting_addr(&self) -> Option<Address> {
        self.starting_addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn date_modified(&self) -> Timestamp {
        self.date_modified
    }

    pub fn is_bound(&self) -> bool {
        self.starting_addr.is_some()
    }
}

impl Node {
    pub fn directory<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            date_created: now(),
            parent: None,
            kind: NodeKind::Directory(DirectoryNode::default()),
        }
    }

    pub fn file<S: Into<String>>(name: S) -> Self {
        let created = now();
        Self {
            name: name.into(),
            date_created: created,
            parent: None,
            kind: NodeKind::File(FileNode::new(created)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match &self.kind {
            NodeKind::File(file) => Some(file),
            NodeKind::Directory(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileNode> {
        match &mut self.kind {
            NodeKind::File(file) => Some(file),
            NodeKind::Directory(_) => None,
        }
    }
}

/// The directory/file hierarchy.
///
/// Nodes live in an arena and refer to each other by [`NodeId`]. Directories own
/// their children through the child list; the parent link is a plain handle so
/// there is no ownership cycle. Removing a node frees its whole subtree and
/// hands every bound block back to the pool.
#[derive(Debug, Clone)]
pub struct NamespaceTree {
    nodes: Vec<Option<Node>>,
    /// Vacated slots, reused before the arena grows.
    free_slots: Vec<NodeId>,
    root: NodeId,
}

impl NamespaceTree {
    pub fn new() -> Self {
        Self::with_root(Node::directory(ROOT_NAME))
    }

    fn with_root(root: Node) -> Self {
        Self {
            nodes: vec![Some(root)],
            free_slots: Vec::new(),
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Children of `dir` in insertion order. Files have none.
    pub fn children(&self, dir: NodeId) -> &[NodeId] {
        match self.node(dir).map(Node::kind) {
            Some(NodeKind::Directory(d)) => &d.children,
            _ => &[],
        }
    }

    /// Appends `node` to `dir` and points its parent link at `dir`.
    ///
    /// Sibling names are not checked here; callers look the name up with
    /// [`NamespaceTree::get_child`] first.
    pub fn add_child(&mut self, dir: NodeId, mut node: Node) -> Result<NodeId> {
        self.directory(dir)?;
        node.parent = Some(dir);
        let id = match self.free_slots.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.directory_mut(dir)?.children.push(id);
        Ok(id)
    }

    /// First child of `dir` called `name`.
    pub fn get_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.children(dir)
            .iter()
            .copied()
            .find(|&child| self.node(child).map_or(false, |n| n.name == name))
    }

    /// Detaches `child` from `dir` and destroys its subtree, releasing every
    /// block its files hold.
    pub fn remove_child(&mut self, dir: NodeId, child: NodeId, pool: &mut BlockPool) -> Result<()> {
        self.detach(dir, child)?;

        let mut pending = vec![child];
        while let Some(id) = pending.pop() {
            let node = match self.nodes.get_mut(id).and_then(Option::take) {
                Some(node) => node,
                None => continue,
            };
            match node.kind {
                NodeKind::Directory(d) => pending.extend(d.children),
                NodeKind::File(mut file) => storage::release(&mut file, pool),
            }
            self.free_slots.push(id);
        }
        Ok(())
    }

    /// Unlinks `child` from `dir` without destroying it. The node keeps its
    /// slot and its blocks until it is attached elsewhere or removed.
    pub fn detach(&mut self, dir: NodeId, child: NodeId) -> Result<()> {
        let name = self.display_name(child);
        let children = &mut self.directory_mut(dir)?.children;
        let position = children
            .iter()
            .position(|&c| c == child)
            .ok_or(FsError::NoSuchChild(name))?;
        children.remove(position);
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
        Ok(())
    }

    /// Links an already existing node under `dir`.
    pub fn attach(&mut self, dir: NodeId, child: NodeId) -> Result<()> {
        self.directory(dir)?;
        let node = self
            .node_mut(child)
            .ok_or_else(|| FsError::NoSuchChild(format!("#{}", child)))?;
        node.parent = Some(dir);
        self.directory_mut(dir)?.children.push(child);
        Ok(())
    }

    pub fn rename(&mut self, id: NodeId, name: &str) -> Result<()> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| FsError::NoSuchChild(name.to_string()))?;
        node.name = name.to_string();
        Ok(())
    }

    /// Resolves one path component relative to `dir`. Walking `..` above the
    /// root stays at the root.
    pub fn resolve(&self, dir: NodeId, component: &str) -> Result<NodeId> {
        match component {
            ".." => Ok(self.node(dir).and_then(Node::parent).unwrap_or(dir)),
            "." => Ok(dir),
            name => self
                .get_child(dir, name)
                .ok_or_else(|| FsError::NoSuchPath(name.to_string())),
        }
    }

    /// True if `ancestor` is `id` itself or lies on its parent chain.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.node(node).and_then(Node::parent);
        }
        false
    }

    /// Absolute display path of a node, e.g. `/docs/notes`.
    pub fn path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == self.root {
                break;
            }
            match self.node(node_id) {
                Some(node) => {
                    parts.push(node.name.as_str());
                    current = node.parent;
                }
                None => break,
            }
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Pre-order walk of `id` and its descendants down to `max_depth` levels,
    /// paired with each node's depth below `id`.
    pub fn walk(&self, id: NodeId, max_depth: usize) -> Vec<(usize, NodeId)> {
        let mut visited = Vec::new();
        let mut pending = vec![(0, id)];
        while let Some((depth, node)) = pending.pop() {
            visited.push((depth, node));
            if depth < max_depth {
                pending.extend(self.children(node).iter().rev().map(|&c| (depth + 1, c)));
            }
        }
        visited
    }

    /// Captures the whole tree, starting at the root.
    pub fn snapshot(&self) -> TreeRecord {
        self.record(self.root).unwrap_or_else(|| TreeRecord::Directory {
            name: ROOT_NAME.to_string(),
            date_created: 0,
            parent: None,
            children: Vec::new(),
        })
    }

    fn record(&self, id: NodeId) -> Option<TreeRecord> {
        let node = self.node(id)?;
        let parent = node
            .parent
            .and_then(|p| self.node(p))
            .map(|p| p.name.clone());
        let record = match &node.kind {
            NodeKind::Directory(dir) => TreeRecord::Directory {
                name: node.name.clone(),
                date_created: node.date_created,
                parent,
                children: dir.children.iter().filter_map(|&c| self.record(c)).collect(),
            },
            NodeKind::File(file) => TreeRecord::File {
                name: node.name.clone(),
                date_created: node.date_created,
                date_modified: file.date_modified,
                parent,
                starting_addr: file.starting_addr,
                size: file.size,
            },
        };
        Some(record)
    }

    /// Rebuilds a tree from a record whose top level must be a directory.
    ///
    /// File addresses are taken as-is; they are expected to exist in the pool
    /// restored alongside.
    pub fn restore(record: &TreeRecord) -> Result<Self> {
        let (name, date_created, children) = match record {
            TreeRecord::Directory {
                name,
                date_created,
                children,
                ..
            } => (name, *date_created, children),
            TreeRecord::File { name, .. } => {
                return Err(FsError::InvalidSnapshot(format!(
                    "root {} is a file, expected a directory",
                    name
                )))
            }
        };

        let mut tree = Self::with_root(Node {
            name: name.clone(),
            date_created,
            parent: None,
            kind: NodeKind::Directory(DirectoryNode::default()),
        });
        let root = tree.root;
        for child in children {
            tree.restore_into(root, child)?;
        }
        info!("restored namespace with {} nodes", tree.len());
        Ok(tree)
    }

    fn restore_into(&mut self, dir: NodeId, record: &TreeRecord) -> Result<()> {
        match record {
            TreeRecord::Directory {
                name,
                date_created,
                children,
                ..
            } => {
                let id = self.add_child(
                    dir,
                    Node {
                        name: name.clone(),
                        date_created: *date_created,
                        parent: None,
                        kind: NodeKind::Directory(DirectoryNode::default()),
                    },
                )?;
                for child in children {
                    self.restore_into(id, child)?;
                }
            }
            TreeRecord::File {
                name,
                date_created,
                date_modified,
                starting_addr,
                size,
                ..
            } => {
                self.add_child(
                    dir,
                    Node {
                        name: name.clone(),
                        date_created: *date_created,
                        parent: None,
                        kind: NodeKind::File(FileNode {
                            starting_addr: *starting_addr,
                            size: *size,
                            date_modified: *date_modified,
                        }),
                    },
                )?;
            }
        }
        Ok(())
    }

    fn directory(&self, id: NodeId) -> Result<&DirectoryNode> {
        match self.node(id).map(Node::kind) {
            Some(NodeKind::Directory(dir)) => Ok(dir),
            Some(NodeKind::File(_)) => Err(FsError::NotADirectory(self.display_name(id))),
            None => Err(FsError::NoSuchPath(format!("#{}", id))),
        }
    }

    fn directory_mut(&mut self, id: NodeId) -> Result<&mut DirectoryNode> {
        let name = self.display_name(id);
        match self.nodes.get_mut(id).and_then(Option::as_mut).map(|n| &mut n.kind) {
            Some(NodeKind::Directory(dir)) => Ok(dir),
            Some(NodeKind::File(_)) => Err(FsError::NotADirectory(name)),
            None => Err(FsError::NoSuchPath(name)),
        }
    }

    fn display_name(&self, id: NodeId) -> String {
        self.node(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("#{}", id))
    }
}

impl Default for NamespaceTree {
    fn default() -> Self {
        Self::new()
    }
}

/// A serializable capture of a subtree, tagged by node kind.
///
/// `parent` only carries the parent's name for display; it is ignored on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeRecord {
    Directory {
        name: String,
        date_created: Timestamp,
        parent: Option<String>,
        children: Vec<TreeRecord>,
    },
    File {
        name: String,
        date_created: Timestamp,
        date_modified: Timestamp,
        parent: Option<String>,
        starting_addr: Option<Address>,
        size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tree: &NamespaceTree, dir: NodeId) -> Vec<String> {
        tree.children(dir)
            .iter()
            .map(|&c| tree.node(c).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn new_tree_has_only_root() {
        let tree = NamespaceTree::new();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node(tree.root()).unwrap().name(), "/");
        assert!(tree.children(tree.root()).is_empty());
    }

    #[test]
    fn children_keep_insertion_order_and_parent_link() {
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let b = tree.add_child(root, Node::file("b")).unwrap();
        tree.add_child(root, Node::directory("a")).unwrap();

        assert_eq!(names(&tree, root), vec!["b", "a"]);
        assert_eq!(tree.node(b).unwrap().parent(), Some(root));
    }

    #[test]
    fn files_cannot_have_children() {
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let file = tree.add_child(root, Node::file("f")).unwrap();
        assert_eq!(
            tree.add_child(file, Node::file("g")),
            Err(FsError::NotADirectory("f".to_string()))
        );
    }

    #[test]
    fn first_matching_name_wins() {
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let first = tree.add_child(root, Node::file("dup")).unwrap();
        tree.add_child(root, Node::directory("dup")).unwrap();
        assert_eq!(tree.get_child(root, "dup"), Some(first));
        assert_eq!(tree.get_child(root, "missing"), None);
    }

    #[test]
    fn resolve_walks_up_and_down() {
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let docs = tree.add_child(root, Node::directory("docs")).unwrap();

        assert_eq!(tree.resolve(root, "docs"), Ok(docs));
        assert_eq!(tree.resolve(docs, ".."), Ok(root));
        assert_eq!(tree.resolve(root, ".."), Ok(root));
        assert_eq!(
            tree.resolve(root, "nope"),
            Err(FsError::NoSuchPath("nope".to_string()))
        );
    }

    #[test]
    fn removing_directory_releases_nested_blocks() {
        let mut pool = BlockPool::default();
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let dir = tree.add_child(root, Node::directory("dir")).unwrap();
        let inner = tree.add_child(dir, Node::directory("inner")).unwrap();
        let a = tree.add_child(dir, Node::file("a")).unwrap();
        let b = tree.add_child(inner, Node::file("b")).unwrap();
        for &file in &[a, b] {
            let node = tree.node_mut(file).unwrap().as_file_mut().unwrap();
            storage::write(node, &mut pool, b"payload", 0).unwrap();
        }
        assert_eq!(pool.space_used(), 14);

        tree.remove_child(root, dir, &mut pool).unwrap();
        assert_eq!(pool.space_used(), 0);
        assert_eq!(pool.free_blocks().count(), 16);
        assert_eq!(tree.len(), 1);
        assert!(tree.node(b).is_none());
    }

    #[test]
    fn vacated_slots_are_reused() {
        let mut pool = BlockPool::default();
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let gone = tree.add_child(root, Node::file("gone")).unwrap();
        tree.remove_child(root, gone, &mut pool).unwrap();
        assert_eq!(tree.add_child(root, Node::file("next")).unwrap(), gone);
    }

    #[test]
    fn remove_requires_membership() {
        let mut pool = BlockPool::default();
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let dir = tree.add_child(root, Node::directory("dir")).unwrap();
        let file = tree.add_child(root, Node::file("file")).unwrap();
        assert_eq!(
            tree.remove_child(dir, file, &mut pool),
            Err(FsError::NoSuchChild("file".to_string()))
        );
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn detach_and_attach_move_a_node() {
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let dir = tree.add_child(root, Node::directory("dir")).unwrap();
        let file = tree.add_child(root, Node::file("file")).unwrap();

        tree.detach(root, file).unwrap();
        tree.attach(dir, file).unwrap();

        assert_eq!(names(&tree, root), vec!["dir"]);
        assert_eq!(tree.node(file).unwrap().parent(), Some(dir));
        assert_eq!(tree.path(file), "/dir/file");
        assert!(tree.is_ancestor(root, file));
        assert!(!tree.is_ancestor(file, dir));
    }

    #[test]
    fn walk_stops_at_depth() {
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let dir = tree.add_child(root, Node::directory("dir")).unwrap();
        tree.add_child(dir, Node::file("deep")).unwrap();
        let top = tree.add_child(root, Node::file("top")).unwrap();

        assert_eq!(tree.walk(root, 1), vec![(0, root), (1, dir), (1, top)]);
        assert_eq!(tree.walk(root, 2).len(), 4);
    }

    #[test]
    fn snapshot_round_trip_preserves_structure() {
        let mut pool = BlockPool::default();
        let mut tree = NamespaceTree::new();
        let root = tree.root();
        let dir = tree.add_child(root, Node::directory("dir")).unwrap();
        let file = tree.add_child(dir, Node::file("file")).unwrap();
        tree.add_child(root, Node::file("empty")).unwrap();
        let node = tree.node_mut(file).unwrap().as_file_mut().unwrap();
        storage::write(node, &mut pool, b"bytes", 0).unwrap();

        let record = tree.snapshot();
        let restored = NamespaceTree::restore(&record).unwrap();
        assert_eq!(restored.snapshot(), record);
        assert_eq!(restored.len(), 4);

        match &record {
            TreeRecord::Directory { children, .. } => match &children[0] {
                TreeRecord::Directory { children, parent, .. } => {
                    assert_eq!(parent.as_deref(), Some("/"));
                    assert!(matches!(
                        &children[0],
                        TreeRecord::File { starting_addr: Some(0), size: 5, .. }
                    ));
                }
                other => panic!("unexpected record {:?}", other),
            },
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn restore_rejects_file_root() {
        let record = TreeRecord::File {
            name: "lonely".to_string(),
            date_created: 0,
            date_modified: 0,
            parent: None,
            starting_addr: None,
            size: 0,
        };
        assert!(matches!(
            NamespaceTree::restore(&record),
            Err(FsError::InvalidSnapshot(_))
        ));
    }
}
