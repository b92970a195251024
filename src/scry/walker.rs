//! Bootstrap walker.
//!
//! Reconciles the store with on-disk state: every regular file or
//! directory selected by a scryed directory's globs that has no chain
//! yet gets one, seeded with a synthetic create event reflecting its
//! current state. Invoked at startup for each configured directory and
//! from the Scryer when a populated subtree arrives in a single move
//! (e.g. `mv src dst` into a watched area, which produces one OS event
//! for `dst` and none for its descendants).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::ScryError;
use crate::node::{now_millis, relative_path, Node, NodeError, NodeKind};
use crate::store::{Directory, EventKind, EventStore, NewEvent, StoreError};

/// One configured directory to scry, with its selection globs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScryedDirectory {
    /// Path relative to the top directory.
    pub path: String,
    /// Include patterns; empty means include everything.
    #[serde(rename = "incl", default)]
    pub include: Vec<String>,
    /// Exclude patterns, applied before includes.
    #[serde(rename = "excl", default)]
    pub exclude: Vec<String>,
}

impl ScryedDirectory {
    pub fn new(path: impl Into<String>) -> ScryedDirectory {
        ScryedDirectory {
            path: path.into(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Collect the selected nodes under a scryed directory, parents before
/// children. The directory root itself is not included.
pub fn scried_nodes(top_dir: &Path, scry_dir: &ScryedDirectory) -> Result<Vec<Node>, ScryError> {
    let root = top_dir.join(&scry_dir.path);
    let include = compile_globs(&scry_dir.include)?;
    let exclude = compile_globs(&scry_dir.exclude)?;
    walk_filtered(&root, &root, &include, &exclude)
}

/// Seed chains for every selected node under a scryed directory that
/// does not have one yet. Returns the number of nodes seeded.
pub async fn seed_directory(
    store: &EventStore,
    top_dir: &Path,
    scry_dir: &ScryedDirectory,
    dir: &Directory,
) -> Result<usize, ScryError> {
    let root = top_dir.join(&dir.path);
    let nodes = scried_nodes(top_dir, scry_dir)?;
    seed_nodes(store, dir, &root, nodes).await
}

/// Seed chains for the descendants of a subtree that arrived whole. The
/// subtree root is skipped; the create event that revealed it is already
/// stored.
pub(crate) async fn seed_subtree(
    store: &EventStore,
    top_dir: &Path,
    scry_dir: &ScryedDirectory,
    dir: &Directory,
    subtree_rel: &str,
) -> Result<usize, ScryError> {
    let dir_root = top_dir.join(&dir.path);
    let walk_root = dir_root.join(subtree_rel);
    let include = compile_globs(&scry_dir.include)?;
    let exclude = compile_globs(&scry_dir.exclude)?;
    let nodes = walk_filtered(&dir_root, &walk_root, &include, &exclude)?;
    seed_nodes(store, dir, &dir_root, nodes).await
}

async fn seed_nodes(
    store: &EventStore,
    dir: &Directory,
    dir_root: &Path,
    nodes: Vec<Node>,
) -> Result<usize, ScryError> {
    let mut seeded = 0;
    for node in nodes {
        let rel = relative_path(&node.path, dir_root);
        // an existing chain is authoritative
        if store.get_chain_by_path(dir.id, &rel).await?.is_some() {
            continue;
        }
        let chain = store.add_chain(dir.id, node.ino).await?;
        let state = node.state();
        match store
            .add_event(
                chain.id,
                NewEvent {
                    kind: EventKind::Create,
                    timestamp: now_millis(),
                    path: rel.clone(),
                    size: state.size,
                    hash: state.hash,
                    mod_time: state.mod_time,
                },
            )
            .await
        {
            Ok(_) => seeded += 1,
            // a glob that admits a child but excludes its parent leaves
            // the child without a resolvable ancestor; skip it
            Err(StoreError::InvariantViolation(msg)) => {
                warn!("not seeding {:?}: {}", rel, msg);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(seeded)
}

/// Depth-first walk below `walk_root`, filtering each node's path
/// (relative to `dir_root`) through the exclude-then-include globs.
/// Directory paths are matched with a trailing `/` so patterns like
/// `*/` can select directories specifically. Exclusion filters nodes
/// individually; it does not prune the walk.
fn walk_filtered(
    dir_root: &Path,
    walk_root: &Path,
    include: &[glob::Pattern],
    exclude: &[glob::Pattern],
) -> Result<Vec<Node>, ScryError> {
    let mut nodes = Vec::new();
    let mut stack = vec![walk_root.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if current == walk_root => {
                return Err(ScryError::Walk(format!("{}: {}", current.display(), e)));
            }
            Err(e) => {
                warn!("unable to walk dir {:?}: {}", current, e);
                continue;
            }
        };
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("unable to read dir entry in {:?}: {}", current, e);
                    continue;
                }
            };
            let node = match Node::open(&path) {
                Ok(node) => node,
                Err(NodeError::Unsupported(_)) => {
                    trace!("skipping unsupported node {:?}", path);
                    continue;
                }
                Err(NodeError::NotFound(_)) => continue,
                Err(e) => {
                    warn!("unable to stat {:?}: {}", path, e);
                    continue;
                }
            };
            if node.kind == NodeKind::Dir {
                stack.push(path.clone());
            }
            let rel = relative_path(&path, dir_root);
            let glob_input = match node.kind {
                NodeKind::Dir => format!("{}/", rel),
                NodeKind::File => rel.clone(),
            };
            if check_globs(exclude, &glob_input, false) {
                trace!("excluded {:?}", rel);
                continue;
            }
            if !check_globs(include, &glob_input, true) {
                trace!("not included {:?}", rel);
                continue;
            }
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn compile_globs(patterns: &[String]) -> Result<Vec<glob::Pattern>, ScryError> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| ScryError::Walk(format!("bad glob {:?}: {}", p, e)))
        })
        .collect()
}

fn check_globs(globs: &[glob::Pattern], input: &str, on_empty: bool) -> bool {
    if globs.is_empty() {
        return on_empty;
    }
    globs.iter().any(|g| g.matches(input))
}
