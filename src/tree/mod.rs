//! Lazily expanded tree of remote nodes rooted at the dashboard.
//!
//! Directory nodes own one children snapshot. A refresh builds a new
//! snapshot and swaps it in whole, so readers see either the old or the new
//! listing and never a partial one.

pub mod classify;

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use crate::cache::ContentCache;
use crate::error::{FsError, Result};
use crate::parser::units::{modified_time, parse_size};
use crate::parser::{ChildDescriptor, ContentParser};
use crate::session::Session;

pub use classify::Classifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dashboard,
    Course,
    Folder,
    File,
    /// Matched no rule; hidden from listings and not readable.
    Unknown,
}

impl NodeKind {
    pub fn is_directory(self) -> bool {
        matches!(self, NodeKind::Dashboard | NodeKind::Course | NodeKind::Folder)
    }
}

/// Children of a directory as of one fetch.
#[derive(Debug)]
pub struct Snapshot {
    children: HashMap<String, Arc<Node>>,
    refreshed_at: Instant,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&Arc<Node>> {
        self.children.get(name)
    }

    /// Unordered; sibling order carries no meaning.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.children.values()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn refreshed_at(&self) -> Instant {
        self.refreshed_at
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Held for the duration of a refresh.
    refresh: tokio::sync::Mutex<()>,
}

impl Directory {
    /// Current snapshot, stale or not.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().clone()
    }

    fn fresh(&self, ttl: Duration) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .as_ref()
            .filter(|snapshot| snapshot.refreshed_at.elapsed() <= ttl)
            .cloned()
    }
}

#[derive(Debug)]
pub struct RemoteFile {
    /// Approximate until the content has been downloaded once.
    size: AtomicU64,
    modified: SystemTime,
}

impl RemoteFile {
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }
}

#[derive(Debug)]
pub enum NodeContent {
    Directory(Directory),
    File(RemoteFile),
    Inert,
}

#[derive(Debug)]
pub struct Node {
    name: String,
    locator: String,
    kind: NodeKind,
    content: NodeContent,
}

/// Path separators would split the name into several segments.
pub fn sanitize_name(name: &str) -> String {
    name.trim().replace('/', "-")
}

impl Node {
    pub fn directory(name: &str, locator: String, kind: NodeKind) -> Self {
        Self {
            name: sanitize_name(name),
            locator,
            kind,
            content: NodeContent::Directory(Directory::default()),
        }
    }

    pub fn file(name: &str, locator: String, size: u64, modified: SystemTime) -> Self {
        Self {
            name: sanitize_name(name),
            locator,
            kind: NodeKind::File,
            content: NodeContent::File(RemoteFile {
                size: AtomicU64::new(size),
                modified,
            }),
        }
    }

    pub fn inert(name: &str, locator: String) -> Self {
        Self {
            name: sanitize_name(name),
            locator,
            kind: NodeKind::Unknown,
            content: NodeContent::Inert,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.content {
            NodeContent::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&RemoteFile> {
        match &self.content {
            NodeContent::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn is_listable(&self) -> bool {
        self.kind != NodeKind::Unknown
    }
}

/// Returns `payload[offset..offset + size]`, cut short at the end.
pub fn slice(payload: &Bytes, offset: u64, size: u32) -> Bytes {
    let len = payload.len();
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
    let end = start.saturating_add(size as usize).min(len);
    payload.slice(start..end)
}

pub struct RemoteTree {
    session: Arc<Session>,
    parser: Arc<dyn ContentParser>,
    classifier: Classifier,
    base: Url,
    root: Arc<Node>,
    ttl: Duration,
}

impl RemoteTree {
    pub fn new(session: Arc<Session>, parser: Arc<dyn ContentParser>) -> Result<Self> {
        let portal = session.portal();
        let base = Url::parse(&portal.base_url)
            .map_err(|e| FsError::Config(format!("base_url {}: {}", portal.base_url, e)))?;
        let classifier = Classifier::new(&portal.rules)?;
        let root = Arc::new(Node::directory(
            "Dashboard",
            portal.dashboard_url.clone(),
            NodeKind::Dashboard,
        ));
        let ttl = session.cache_ttl();

        Ok(Self {
            session,
            parser,
            classifier,
            base,
            root,
            ttl,
        })
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Children of a directory node, refetched when stale.
    ///
    /// A failed refresh leaves the previous snapshot in place.
    pub async fn children(&self, node: &Node) -> Result<Arc<Snapshot>> {
        let dir = node
            .as_directory()
            .ok_or_else(|| FsError::NotADirectory(node.name.clone()))?;
        if let Some(snapshot) = dir.fresh(self.ttl) {
            return Ok(snapshot);
        }

        let _refreshing = dir.refresh.lock().await;
        if let Some(snapshot) = dir.fresh(self.ttl) {
            return Ok(snapshot);
        }

        debug!("Refreshing children of {}", node.name);
        let response = self.session.fetch_ensuring_login(&node.locator).await?;
        let descriptors = self.parser.parse_children(&response.body)?;

        let mut children = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let href = descriptor.href.clone();
            match self.build_child(descriptor) {
                Ok(child) => {
                    debug!("{:?} {} -> {}", child.kind, child.name, child.locator);
                    if let Some(previous) = children.insert(child.name.clone(), Arc::new(child)) {
                        debug!("{} replaced an earlier sibling", previous.name);
                    }
                }
                Err(e) => warn!("Dropping child {} of {}: {}", href, node.name, e),
            }
        }

        let snapshot = Arc::new(Snapshot {
            children,
            refreshed_at: Instant::now(),
        });
        *dir.snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn build_child(&self, descriptor: ChildDescriptor) -> Result<Node> {
        let kind = self.classifier.classify(&descriptor.href);
        let locator = self
            .base
            .join(&descriptor.href)
            .map_err(|e| FsError::Parse(format!("bad href {:?}: {}", descriptor.href, e)))?
            .to_string();

        match kind {
            NodeKind::File => {
                let properties = self.parser.parse_file_properties(&descriptor.properties)?;
                let size = parse_size(&properties.size_text)?;
                let modified = modified_time(
                    &properties.primary_date,
                    properties.fallback_date.as_deref(),
                );
                if modified == UNIX_EPOCH {
                    debug!("No date for {}", descriptor.name);
                }
                let name = format!("{}.{}", descriptor.name.trim(), properties.extension.trim());
                Ok(Node::file(&name, locator, size, modified))
            }
            NodeKind::Unknown => Ok(Node::inert(&descriptor.name, locator)),
            kind => Ok(Node::directory(&descriptor.name, locator, kind)),
        }
    }

    /// Looks `name` up among the children of `node`. Files have no children.
    pub async fn child(&self, node: &Node, name: &str) -> Result<Option<Arc<Node>>> {
        if !node.kind.is_directory() {
            return Ok(None);
        }
        Ok(self.children(node).await?.get(name).cloned())
    }

    /// Walks from the root, stopping at the first missing segment.
    pub async fn resolve_segments<S: AsRef<str>>(&self, segments: &[S]) -> Result<Option<Arc<Node>>> {
        let mut node = self.root.clone();
        for segment in segments {
            match self.child(&node, segment.as_ref()).await? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    pub async fn resolve(&self, path: &Path) -> Result<Option<Arc<Node>>> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => match part.to_str() {
                    Some(part) => segments.push(part),
                    None => return Ok(None),
                },
                Component::ParentDir | Component::Prefix(_) => return Ok(None),
            }
        }
        self.resolve_segments(&segments).await
    }

    /// Reads `size` bytes at `offset`, fetching the whole file on a cache miss.
    pub async fn download(
        &self,
        node: &Node,
        cache: &ContentCache,
        offset: u64,
        size: u32,
    ) -> Result<Bytes> {
        let file = node
            .as_file()
            .ok_or_else(|| FsError::IsDirectory(node.name.clone()))?;

        if let Some(payload) = cache.get(&node.locator) {
            debug!("Using cached {}", node.name);
            return Ok(slice(&payload, offset, size));
        }

        info!("Downloading {}", node.name);
        let payload = self.session.fetch_ensuring_login(&node.locator).await?.body;
        cache.put(&node.locator, payload.clone());
        file.size.store(payload.len() as u64, Ordering::Relaxed);
        Ok(slice(&payload, offset, size))
    }
}
