//! Recursive path-component index.
//!
//! Maps `(dir_id, parent_chain_id, component_name)` to the chain
//! currently at that name. Resolving a relative path walks one entry per
//! component, starting from the root sentinel. Because children key off
//! their parent's *chain id* rather than its name, renaming a directory
//! relocates exactly one entry; every descendant remains resolvable
//! without a rewrite.

use redb::ReadableTable;

use super::StoreError;

/// Parent id used for entries directly under a scryed directory root.
pub(super) const ROOT_CHAIN: u64 = 0;

type IndexKey = (u64, u64, &'static str);

/// Resolve a relative path to its chain id; `None` if any component is
/// missing. The empty path resolves to the root sentinel.
pub(super) fn resolve(
    table: &impl ReadableTable<IndexKey, u64>,
    dir_id: u64,
    path: &str,
) -> Result<Option<u64>, StoreError> {
    let mut current = ROOT_CHAIN;
    if path.is_empty() {
        return Ok(Some(current));
    }
    for name in path.split('/') {
        match table.get((dir_id, current, name))?.map(|g| g.value()) {
            Some(chain_id) => current = chain_id,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Add an entry for a path that just gained a chain.
pub(super) fn insert(
    table: &mut redb::Table<IndexKey, u64>,
    dir_id: u64,
    path: &str,
    chain_id: u64,
) -> Result<(), StoreError> {
    let (parent_path, name) = split_parent(path);
    let parent = resolve(table, dir_id, parent_path)?.ok_or_else(|| {
        StoreError::InvariantViolation(format!(
            "no chain for parent of {:?} in dir {}",
            path, dir_id
        ))
    })?;
    table.insert((dir_id, parent, name), chain_id)?;
    Ok(())
}

/// Move an entry when a rename pair completes: write the chain under the
/// destination parent and name, then drop the source entry. The chain id
/// itself does not change.
pub(super) fn relocate(
    table: &mut redb::Table<IndexKey, u64>,
    dir_id: u64,
    dst_path: &str,
    src_path: &str,
) -> Result<(), StoreError> {
    let (src_parent_path, src_name) = split_parent(src_path);
    let (dst_parent_path, dst_name) = split_parent(dst_path);
    let src_parent = resolve(table, dir_id, src_parent_path)?.ok_or_else(|| {
        StoreError::InvariantViolation(format!(
            "no chain for parent of rename source {:?} in dir {}",
            src_path, dir_id
        ))
    })?;
    let dst_parent = resolve(table, dir_id, dst_parent_path)?.ok_or_else(|| {
        StoreError::InvariantViolation(format!(
            "no chain for parent of rename destination {:?} in dir {}",
            dst_path, dir_id
        ))
    })?;
    let chain_id = table
        .get((dir_id, src_parent, src_name))?
        .map(|g| g.value())
        .ok_or_else(|| {
            StoreError::InvariantViolation(format!(
                "no index entry for rename source {:?} in dir {}",
                src_path, dir_id
            ))
        })?;
    table.insert((dir_id, dst_parent, dst_name), chain_id)?;
    table.remove((dir_id, src_parent, src_name))?;
    Ok(())
}

/// Drop the entry for a removed path. Tolerates entries that are already
/// gone (descendants orphaned by an earlier directory removal).
pub(super) fn remove(
    table: &mut redb::Table<IndexKey, u64>,
    dir_id: u64,
    path: &str,
) -> Result<(), StoreError> {
    let (parent_path, name) = split_parent(path);
    if let Some(parent) = resolve(table, dir_id, parent_path)? {
        table.remove((dir_id, parent, name))?;
    }
    Ok(())
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}
