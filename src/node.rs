//! Filesystem node abstraction.
//!
//! A [`Node`] is a uniform view of one filesystem entry: its kind, inode
//! number, size, modification time and (for files) a streaming content
//! digest. Only regular files and directories are supported; anything
//! else is rejected at `open` so callers can drop it early.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

/// Kind of a supported filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

/// Errors produced when inspecting filesystem nodes.
#[derive(Debug, Clone)]
pub enum NodeError {
    /// The path does not exist.
    NotFound(PathBuf),
    /// The path exists but cannot be read.
    PermissionDenied(PathBuf),
    /// The node is neither a regular file nor a directory.
    Unsupported(PathBuf),
    /// Any other I/O failure.
    Io(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::NotFound(path) => write!(f, "node not found: {}", path.display()),
            NodeError::PermissionDenied(path) => {
                write!(f, "permission denied: {}", path.display())
            }
            NodeError::Unsupported(path) => {
                write!(f, "unsupported node type: {}", path.display())
            }
            NodeError::Io(msg) => write!(f, "node i/o error: {}", msg),
        }
    }
}

impl std::error::Error for NodeError {}

/// Snapshot of a node's content-bearing attributes at observation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub size: u64,
    pub mod_time: u64,
    /// Hex-encoded 128-bit content digest; `None` for directories and
    /// for files that became unreadable between stat and hash.
    pub hash: Option<String>,
}

/// One filesystem entry, resolved by `open`.
#[derive(Debug, Clone)]
pub struct Node {
    pub path: PathBuf,
    pub kind: NodeKind,
    pub ino: u64,
    pub size: u64,
    pub mod_time: u64,
}

impl Node {
    /// Stat `path` (without following symlinks) and wrap it as a `Node`.
    pub fn open(path: &Path) -> Result<Node, NodeError> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| classify_io(path, e))?;
        let file_type = meta.file_type();
        let kind = if file_type.is_file() {
            NodeKind::File
        } else if file_type.is_dir() {
            NodeKind::Dir
        } else {
            return Err(NodeError::Unsupported(path.to_path_buf()));
        };
        Ok(Node {
            path: path.to_path_buf(),
            kind,
            ino: meta.ino(),
            size: meta.len(),
            mod_time: meta
                .modified()
                .map(epoch_millis)
                .map_err(|e| NodeError::Io(e.to_string()))?,
        })
    }

    /// Stream the file content through a 128-bit digest, hex-encoded.
    ///
    /// Only valid on files; directories yield `Unsupported` without any
    /// reads.
    pub fn hash(&self) -> Result<String, NodeError> {
        if self.kind != NodeKind::File {
            return Err(NodeError::Unsupported(self.path.clone()));
        }
        let mut file = File::open(&self.path).map_err(|e| classify_io(&self.path, e))?;
        let mut hasher = Md5::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| classify_io(&self.path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Capture the node's current state; hash failures degrade to `None`.
    pub fn state(&self) -> NodeState {
        NodeState {
            size: self.size,
            mod_time: self.mod_time,
            hash: self.hash().ok(),
        }
    }
}

/// Digest an in-memory buffer the same way `Node::hash` digests files.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Path of `path` relative to `base`, as a `/`-separated string. Falls
/// back to the full path when `base` is not a prefix.
pub fn relative_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Milliseconds since the Unix epoch for a `SystemTime`.
pub fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The current instant as milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    epoch_millis(SystemTime::now())
}

fn classify_io(path: &Path, e: std::io::Error) -> NodeError {
    match e.kind() {
        std::io::ErrorKind::NotFound => NodeError::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => NodeError::PermissionDenied(path.to_path_buf()),
        _ => NodeError::Io(format!("{}: {}", path.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_regular_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();

        let node = Node::open(&path).unwrap();
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.size, 5);
        assert!(node.ino > 0);
        assert!(node.mod_time > 0);
    }

    #[test]
    fn open_directory() {
        let tmp = TempDir::new().unwrap();
        let node = Node::open(tmp.path()).unwrap();
        assert_eq!(node.kind, NodeKind::Dir);
    }

    #[test]
    fn open_missing_path() {
        let tmp = TempDir::new().unwrap();
        match Node::open(&tmp.path().join("nope")) {
            Err(NodeError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn open_symlink_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("target");
        let link = tmp.path().join("link");
        std::fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        match Node::open(&link) {
            Err(NodeError::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {:?}", other),
        }
    }

    #[test]
    fn hash_known_vector() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let node = Node::open(&path).unwrap();
        // md5 of the empty string
        assert_eq!(node.hash().unwrap(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn hash_matches_content_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f");
        std::fs::write(&path, b"I am Weasel!").unwrap();

        let node = Node::open(&path).unwrap();
        assert_eq!(node.hash().unwrap(), content_hash(b"I am Weasel!"));
    }

    #[test]
    fn hash_on_directory_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let node = Node::open(tmp.path()).unwrap();
        match node.hash() {
            Err(NodeError::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {:?}", other),
        }
    }

    #[test]
    fn state_for_directory_has_no_hash() {
        let tmp = TempDir::new().unwrap();
        let node = Node::open(tmp.path()).unwrap();
        assert_eq!(node.state().hash, None);
    }
}
