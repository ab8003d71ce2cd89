use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use async_trait::async_trait;
use bytes::Bytes;
use crate::cache::ContentCache;
use crate::error::{FsError, Result};
use crate::tree::{Node, NodeKind, RemoteTree};

pub const DIR_PERMISSIONS: u32 = 0o555;
pub const FILE_PERMISSIONS: u32 = 0o444;

#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub size: u64,
    pub is_dir: bool,
    pub permissions: u32,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Read-only, path-addressed view of the portal.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn access<'a>(&'a self, path: &'a Path) -> Result<()>;
    async fn get_metadata<'a>(&'a self, path: &'a Path) -> Result<FileMetadata>;
    /// Listing including `.` and `..`.
    async fn list_directory<'a>(&'a self, path: &'a Path) -> Result<Vec<DirEntry>>;
    async fn read_file<'a>(&'a self, path: &'a Path, offset: u64, size: u32) -> Result<Bytes>;
}

pub struct PortalFileSystem {
    tree: Arc<RemoteTree>,
    cache: ContentCache,
}

impl PortalFileSystem {
    pub fn new(tree: Arc<RemoteTree>, cache: ContentCache) -> Self {
        Self { tree, cache }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    async fn node(&self, path: &Path) -> Result<Arc<Node>> {
        self.tree
            .resolve(path)
            .await?
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }
}

fn metadata_of(node: &Node) -> FileMetadata {
    match node.as_file() {
        Some(file) => FileMetadata {
            size: file.size(),
            is_dir: false,
            permissions: FILE_PERMISSIONS,
            modified: file.modified(),
        },
        None => FileMetadata {
            size: 0,
            is_dir: true,
            permissions: DIR_PERMISSIONS,
            modified: UNIX_EPOCH,
        },
    }
}

#[async_trait]
impl FileSystem for PortalFileSystem {
    async fn access<'a>(&'a self, path: &'a Path) -> Result<()> {
        self.node(path).await.map(|_| ())
    }

    async fn get_metadata<'a>(&'a self, path: &'a Path) -> Result<FileMetadata> {
        let node = self.node(path).await?;
        Ok(metadata_of(&node))
    }

    async fn list_directory<'a>(&'a self, path: &'a Path) -> Result<Vec<DirEntry>> {
        let node = self.node(path).await?;
        let mut entries = vec![
            DirEntry { name: ".".into(), is_dir: true },
            DirEntry { name: "..".into(), is_dir: true },
        ];
        // inert nodes stat as directories, so they list as empty ones
        if node.kind() == NodeKind::Unknown {
            return Ok(entries);
        }
        let snapshot = self.tree.children(&node).await?;

        let mut children: Vec<DirEntry> = snapshot
            .iter()
            .filter(|child| child.is_listable())
            .map(|child| DirEntry {
                name: child.name().to_string(),
                is_dir: child.as_file().is_none(),
            })
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        entries.extend(children);
        Ok(entries)
    }

    async fn read_file<'a>(&'a self, path: &'a Path, offset: u64, size: u32) -> Result<Bytes> {
        let node = self.node(path).await?;
        if node.as_file().is_none() {
            return Err(FsError::IsDirectory(path.display().to_string()));
        }
        self.tree.download(&node, &self.cache, offset, size).await
    }
}
