//! Translation of OS notifications into stored node events.
//!
//! The OS reports a rename as two notifications: the source side on the
//! old name, then a create on the new name. Both halves land on the same
//! chain (reunited by the inode surviving the move), and the create half
//! carries the path the node departed from.

use std::path::{Path, PathBuf};

use notify::event::{EventKind as OsEventKind, ModifyKind, RenameMode};

use super::ScryError;
use crate::node::{now_millis, Node, NodeError, NodeKind};
use crate::store::{Directory, EventKind, EventStore, NewEvent};

/// A validated, stored filesystem transition, as published on the
/// Scryer's output channel.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub kind: EventKind,
    pub dir_id: u64,
    pub chain_id: u64,
    /// Absolute path the OS reported.
    pub full_path: PathBuf,
    /// Path relative to the scryed directory.
    pub path: String,
    /// Set on the create completing a rename pair.
    pub prior_path: Option<String>,
    pub timestamp: u64,
    pub size: u64,
    pub hash: Option<String>,
    /// `None` for rename/remove events, where the node is already gone.
    pub node_kind: Option<NodeKind>,
}

/// Map a raw notification onto internal event kinds.
///
/// Attribute-only changes and access events are not observed and yield
/// nothing. A paired rename notification is split into its source and
/// arrival halves.
pub(crate) fn translate(event: &notify::Event) -> Vec<(EventKind, PathBuf)> {
    let mut out = Vec::new();
    match event.kind {
        OsEventKind::Create(_) => {
            if let Some(path) = event.paths.first() {
                out.push((EventKind::Create, path.clone()));
            }
        }
        OsEventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = event.paths.first() {
                out.push((EventKind::Rename, path.clone()));
            }
        }
        OsEventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if let Some(path) = event.paths.first() {
                out.push((EventKind::Create, path.clone()));
            }
        }
        OsEventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                out.push((EventKind::Rename, from.clone()));
                out.push((EventKind::Create, to.clone()));
            }
        }
        OsEventKind::Modify(ModifyKind::Data(_)) | OsEventKind::Modify(ModifyKind::Any) => {
            if let Some(path) = event.paths.first() {
                out.push((EventKind::Write, path.clone()));
            }
        }
        OsEventKind::Remove(_) => {
            if let Some(path) = event.paths.first() {
                out.push((EventKind::Remove, path.clone()));
            }
        }
        _ => {}
    }
    out
}

/// Validate one translated event against stored state and append it.
///
/// Create and write events stat the node and find its chain by inode;
/// rename and remove events have only the path left to key on, so they
/// resolve through the path-component index.
pub(crate) async fn process_node_event(
    store: &EventStore,
    dir: &Directory,
    kind: EventKind,
    full_path: &Path,
    rel_path: &str,
) -> Result<NodeEvent, ScryError> {
    let timestamp = now_millis();

    let (node, chain) = match kind {
        EventKind::Create | EventKind::Write => {
            let node = Node::open(full_path).map_err(|e| match e {
                NodeError::Unsupported(path) => {
                    ScryError::Unsupported(format!("{} event for {}", kind, path.display()))
                }
                other => ScryError::ValidationFailed(format!(
                    "{} event for unreadable node: {}",
                    kind, other
                )),
            })?;
            let chain = store.get_chain_by_ino(node.ino).await?;
            (Some(node), chain)
        }
        EventKind::Rename | EventKind::Remove => {
            (None, store.get_chain_by_path(dir.id, rel_path).await?)
        }
    };

    let chain = match (chain, node.as_ref()) {
        (Some(chain), _) => {
            if kind == EventKind::Create {
                let tail = store.get_tail_event(chain.id).await?;
                let completes_rename = matches!(tail, Some(ref t) if t.kind == EventKind::Rename);
                if !completes_rename {
                    return Err(ScryError::AlreadyTracked(format!(
                        "create for {:?} but inode {} is already chained",
                        rel_path, chain.ino
                    )));
                }
            }
            chain
        }
        // first observation of an inode starts a new chain
        (None, Some(node)) if kind == EventKind::Create => {
            store.add_chain(dir.id, node.ino).await?
        }
        (None, _) => {
            return Err(ScryError::ValidationFailed(format!(
                "{} event for untracked path {:?} in dir {}",
                kind, rel_path, dir.path
            )));
        }
    };

    let state = node.as_ref().map(Node::state);
    let stored = store
        .add_event(
            chain.id,
            NewEvent {
                kind,
                timestamp,
                path: rel_path.to_string(),
                size: state.as_ref().map(|s| s.size).unwrap_or(0),
                hash: state.as_ref().and_then(|s| s.hash.clone()),
                mod_time: state.as_ref().map(|s| s.mod_time).unwrap_or(0),
            },
        )
        .await?;

    Ok(NodeEvent {
        kind,
        dir_id: dir.id,
        chain_id: chain.id,
        full_path: full_path.to_path_buf(),
        path: stored.path,
        prior_path: stored.prior_path,
        timestamp: stored.timestamp,
        size: stored.size,
        hash: stored.hash,
        node_kind: node.map(|n| n.kind),
    })
}
