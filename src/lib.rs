pub mod error;
pub mod config;
pub mod credentials;
pub mod parser;
pub mod session;
pub mod tree;
pub mod cache;
pub mod fs;
pub mod fuse;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{FsError, Result};
pub use cache::ContentCache;
pub use fs::{FileSystem, PortalFileSystem, FileMetadata};
pub use session::{Session, Transport, HttpTransport};
pub use tree::{Node, NodeKind, RemoteTree};
pub use fuse::FuseAdapter;
