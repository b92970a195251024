//! Event persistence layer and object model.
//!
//! Every observed filesystem transition happens inside a configured
//! top-level directory ([`Directory`]). Transitions are chained together
//! per underlying inode ([`Chain`]) in observation order ([`Event`]);
//! directories own chains, chains own events.
//!
//! The store is backed by a single redb database. Primary records are
//! JSON-encoded values keyed by sequence-allocated u64 ids; secondary
//! lookups (directory path, live inode, per-directory chain listing,
//! head/tail/next event links and the recursive path-component index)
//! are maintained in the same write transaction as the record they
//! index, so a successful write is durable and self-consistent across
//! process crash.

mod path_index;
mod seq;

use std::fmt;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

const DIRS: TableDefinition<u64, &str> = TableDefinition::new("dirs");
const DIR_BY_PATH: TableDefinition<&str, u64> = TableDefinition::new("dir_by_path");
const CHAINS: TableDefinition<u64, &str> = TableDefinition::new("chains");
const CHAIN_BY_INO: TableDefinition<u64, u64> = TableDefinition::new("chain_by_ino");
const CHAINS_BY_DIR: TableDefinition<(u64, u64), ()> = TableDefinition::new("chains_by_dir");
const EVENTS: TableDefinition<u64, &str> = TableDefinition::new("events");
const EVENT_HEAD: TableDefinition<u64, u64> = TableDefinition::new("event_head");
const EVENT_TAIL: TableDefinition<u64, u64> = TableDefinition::new("event_tail");
const EVENT_NEXT: TableDefinition<u64, u64> = TableDefinition::new("event_next");
const PATH_INDEX: TableDefinition<(u64, u64, &'static str), u64> =
    TableDefinition::new("path_index");
const SEQS: TableDefinition<&str, u64> = TableDefinition::new("seqs");

const DB_FILENAME: &str = "scryd.redb";

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// New node appeared at a path (also the arrival half of a rename).
    Create,
    /// Bytes written to a file (or truncation).
    Write,
    /// Node departed its path (the source half of a rename).
    Rename,
    /// Node deleted.
    Remove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Create => "create",
            EventKind::Write => "write",
            EventKind::Rename => "rename",
            EventKind::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// One scryed top-level directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: u64,
    /// Path relative to the configured top directory; unique.
    pub path: String,
}

/// The event history of one inode within one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: u64,
    pub dir_id: u64,
    /// Inode observed when the chain was created.
    pub ino: u64,
}

/// One observed transition, appended to a chain. Never updated, never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub chain_id: u64,
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch at observation.
    pub timestamp: u64,
    /// Path within the directory at the moment of observation.
    pub path: String,
    /// Set only on the create that completes a rename pair: the path the
    /// node departed from.
    pub prior_path: Option<String>,
    pub size: u64,
    /// Hex-encoded content digest; `None` for directories and pathless
    /// events.
    pub hash: Option<String>,
    pub mod_time: u64,
}

/// Caller-supplied fields for an event about to be appended; the store
/// assigns the id and derives `prior_path`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub timestamp: u64,
    pub path: String,
    pub size: u64,
    pub hash: Option<String>,
    pub mod_time: u64,
}

#[derive(Debug, Clone)]
pub enum StoreError {
    /// The underlying database failed.
    Database(String),
    /// A stored value failed to encode or decode.
    Encoding(String),
    /// A directory with the same path already exists.
    AlreadyExists(String),
    /// Chain creation referenced a directory that does not exist.
    NoSuchDirectory(u64),
    /// Event creation referenced a chain that does not exist.
    NoSuchChain(u64),
    /// Stored state is internally inconsistent.
    InvariantViolation(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(msg) => write!(f, "database error: {}", msg),
            StoreError::Encoding(msg) => write!(f, "encoding error: {}", msg),
            StoreError::AlreadyExists(path) => {
                write!(f, "directory already exists for path {:?}", path)
            }
            StoreError::NoSuchDirectory(id) => write!(f, "no such directory: {}", id),
            StoreError::NoSuchChain(id) => write!(f, "no such chain: {}", id),
            StoreError::InvariantViolation(msg) => write!(f, "invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

struct Sequences {
    dirs: seq::Sequence,
    chains: seq::Sequence,
    events: seq::Sequence,
}

/// Durable, transactional store of directories, chains and events.
pub struct EventStore {
    db: RwLock<Database>,
    seqs: Mutex<Sequences>,
}

impl EventStore {
    /// Open (or create) the store under `db_dir`.
    pub fn open(db_dir: &Path) -> Result<EventStore, StoreError> {
        std::fs::create_dir_all(db_dir)
            .map_err(|e| StoreError::Database(format!("{}: {}", db_dir.display(), e)))?;
        let db = Database::create(db_dir.join(DB_FILENAME))?;

        // create every table up front so reads never race table creation
        let txn = db.begin_write()?;
        {
            txn.open_table(DIRS)?;
            txn.open_table(DIR_BY_PATH)?;
            txn.open_table(CHAINS)?;
            txn.open_table(CHAIN_BY_INO)?;
            txn.open_table(CHAINS_BY_DIR)?;
            txn.open_table(EVENTS)?;
            txn.open_table(EVENT_HEAD)?;
            txn.open_table(EVENT_TAIL)?;
            txn.open_table(EVENT_NEXT)?;
            txn.open_table(PATH_INDEX)?;
            txn.open_table(SEQS)?;
        }
        txn.commit()?;

        Ok(EventStore {
            db: RwLock::new(db),
            seqs: Mutex::new(Sequences {
                dirs: seq::Sequence::new("dir"),
                chains: seq::Sequence::new("chain"),
                events: seq::Sequence::new("event"),
            }),
        })
    }

    /// Register a new scryed directory.
    pub async fn add_directory(&self, path: &str) -> Result<Directory, StoreError> {
        let id = {
            let mut seqs = self.seqs.lock().await;
            let db = self.db.write().await;
            seqs.dirs.next(&db)?
        };
        let db = self.db.write().await;
        let txn = db.begin_write()?;
        let dir = {
            let mut dirs = txn.open_table(DIRS)?;
            let mut by_path = txn.open_table(DIR_BY_PATH)?;
            if by_path.get(path)?.is_some() {
                return Err(StoreError::AlreadyExists(path.to_string()));
            }
            let dir = Directory {
                id,
                path: path.to_string(),
            };
            dirs.insert(id, serde_json::to_string(&dir)?.as_str())?;
            by_path.insert(path, id)?;
            dir
        };
        txn.commit()?;
        Ok(dir)
    }

    /// Start a new chain for an inode within a directory. The chain has
    /// no events until the first `add_event`.
    ///
    /// Inode numbers may be reused by the OS; a fresh chain for a
    /// previously seen inode takes over the live-inode lookup.
    pub async fn add_chain(&self, dir_id: u64, ino: u64) -> Result<Chain, StoreError> {
        let id = {
            let mut seqs = self.seqs.lock().await;
            let db = self.db.write().await;
            seqs.chains.next(&db)?
        };
        let db = self.db.write().await;
        let txn = db.begin_write()?;
        let chain = {
            let dirs = txn.open_table(DIRS)?;
            if dirs.get(dir_id)?.is_none() {
                return Err(StoreError::NoSuchDirectory(dir_id));
            }
            let mut chains = txn.open_table(CHAINS)?;
            let mut by_ino = txn.open_table(CHAIN_BY_INO)?;
            let mut by_dir = txn.open_table(CHAINS_BY_DIR)?;
            let chain = Chain { id, dir_id, ino };
            chains.insert(id, serde_json::to_string(&chain)?.as_str())?;
            by_ino.insert(ino, id)?;
            by_dir.insert((dir_id, id), ())?;
            chain
        };
        txn.commit()?;
        Ok(chain)
    }

    /// Append an event to a chain and maintain every index in the same
    /// transaction.
    ///
    /// On the create completing a rename pair the stored event carries
    /// the renamed-from path and the path index entry relocates; on a
    /// remove the chain loses its path and live-inode entries and stays
    /// reachable by chain id only.
    pub async fn add_event(&self, chain_id: u64, new: NewEvent) -> Result<Event, StoreError> {
        let id = {
            let mut seqs = self.seqs.lock().await;
            let db = self.db.write().await;
            seqs.events.next(&db)?
        };
        let db = self.db.write().await;
        let txn = db.begin_write()?;
        let event = {
            let mut events = txn.open_table(EVENTS)?;
            let mut head_tbl = txn.open_table(EVENT_HEAD)?;
            let mut tail_tbl = txn.open_table(EVENT_TAIL)?;
            let mut next_tbl = txn.open_table(EVENT_NEXT)?;
            let mut path_tbl = txn.open_table(PATH_INDEX)?;
            let mut ino_tbl = txn.open_table(CHAIN_BY_INO)?;
            let chains = txn.open_table(CHAINS)?;

            let chain = match read_record::<Chain>(&chains, chain_id)? {
                Some(chain) => chain,
                None => return Err(StoreError::NoSuchChain(chain_id)),
            };

            let tail_id = tail_tbl.get(chain_id)?.map(|g| g.value());
            let tail = match tail_id {
                Some(tid) => Some(read_record::<Event>(&events, tid)?.ok_or_else(|| {
                    StoreError::InvariantViolation(format!(
                        "chain {} tail points at missing event {}",
                        chain_id, tid
                    ))
                })?),
                None => None,
            };
            if tail.is_none() && new.kind != EventKind::Create {
                return Err(StoreError::InvariantViolation(format!(
                    "first event on chain {} must be a create, got {}",
                    chain_id, new.kind
                )));
            }

            let mut prior_path = None;
            match new.kind {
                EventKind::Create => {
                    let pending_rename = tail.as_ref().filter(|t| t.kind == EventKind::Rename);
                    if let Some(renamed) = pending_rename {
                        // arrival half of a rename pair: carry the old
                        // path and relocate the index entry
                        prior_path = Some(renamed.path.clone());
                        path_index::relocate(&mut path_tbl, chain.dir_id, &new.path, &renamed.path)?;
                    } else if path_index::resolve(&path_tbl, chain.dir_id, &new.path)?.is_none() {
                        path_index::insert(&mut path_tbl, chain.dir_id, &new.path, chain_id)?;
                    }
                }
                EventKind::Remove => {
                    path_index::remove(&mut path_tbl, chain.dir_id, &new.path)?;
                    // only drop the inode entry if this chain still owns it
                    if ino_tbl.get(chain.ino)?.map(|g| g.value()) == Some(chain_id) {
                        ino_tbl.remove(chain.ino)?;
                    }
                }
                EventKind::Write | EventKind::Rename => {}
            }

            match tail_id {
                None => {
                    head_tbl.insert(chain_id, id)?;
                }
                Some(tid) => {
                    next_tbl.insert(tid, id)?;
                }
            }
            tail_tbl.insert(chain_id, id)?;

            let event = Event {
                id,
                chain_id,
                kind: new.kind,
                timestamp: new.timestamp,
                path: new.path,
                prior_path,
                size: new.size,
                hash: new.hash,
                mod_time: new.mod_time,
            };
            events.insert(id, serde_json::to_string(&event)?.as_str())?;
            event
        };
        txn.commit()?;
        Ok(event)
    }

    pub async fn get_directory(&self, id: u64) -> Result<Option<Directory>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let dirs = txn.open_table(DIRS)?;
        read_record(&dirs, id)
    }

    pub async fn get_directory_by_path(&self, path: &str) -> Result<Option<Directory>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let by_path = txn.open_table(DIR_BY_PATH)?;
        let id = match by_path.get(path)?.map(|g| g.value()) {
            Some(id) => id,
            None => return Ok(None),
        };
        let dirs = txn.open_table(DIRS)?;
        read_record(&dirs, id)
    }

    pub async fn get_chain(&self, id: u64) -> Result<Option<Chain>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let chains = txn.open_table(CHAINS)?;
        read_record(&chains, id)
    }

    /// Look up the live chain for an inode; `None` once the chain has
    /// been removed or if the inode was never seen.
    pub async fn get_chain_by_ino(&self, ino: u64) -> Result<Option<Chain>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let by_ino = txn.open_table(CHAIN_BY_INO)?;
        let id = match by_ino.get(ino)?.map(|g| g.value()) {
            Some(id) => id,
            None => return Ok(None),
        };
        let chains = txn.open_table(CHAINS)?;
        read_record(&chains, id)
    }

    /// Look up the chain whose most recent event localises it at `path`,
    /// following the rename history of every ancestor directory.
    pub async fn get_chain_by_path(
        &self,
        dir_id: u64,
        path: &str,
    ) -> Result<Option<Chain>, StoreError> {
        if path.is_empty() {
            return Ok(None);
        }
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let path_tbl = txn.open_table(PATH_INDEX)?;
        let id = match path_index::resolve(&path_tbl, dir_id, path)? {
            Some(id) => id,
            None => return Ok(None),
        };
        let chains = txn.open_table(CHAINS)?;
        read_record(&chains, id)
    }

    pub async fn get_event(&self, id: u64) -> Result<Option<Event>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let events = txn.open_table(EVENTS)?;
        read_record(&events, id)
    }

    /// The most recent event on a chain, if any.
    pub async fn get_tail_event(&self, chain_id: u64) -> Result<Option<Event>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let tail_tbl = txn.open_table(EVENT_TAIL)?;
        let id = match tail_tbl.get(chain_id)?.map(|g| g.value()) {
            Some(id) => id,
            None => return Ok(None),
        };
        let events = txn.open_table(EVENTS)?;
        read_record(&events, id)
    }

    pub async fn list_directories(&self) -> Result<Vec<Directory>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let dirs = txn.open_table(DIRS)?;
        let mut out = Vec::new();
        for entry in dirs.iter()? {
            let (_, value) = entry?;
            out.push(serde_json::from_str(value.value())?);
        }
        Ok(out)
    }

    /// Every chain ever created in a directory, sealed chains included,
    /// in creation order.
    pub async fn list_chains(&self, dir_id: u64) -> Result<Vec<Chain>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let by_dir = txn.open_table(CHAINS_BY_DIR)?;
        let chains = txn.open_table(CHAINS)?;
        let mut out = Vec::new();
        for entry in by_dir.range((dir_id, u64::MIN)..=(dir_id, u64::MAX))? {
            let (key, _) = entry?;
            let (_, chain_id) = key.value();
            let chain = read_record::<Chain>(&chains, chain_id)?.ok_or_else(|| {
                StoreError::InvariantViolation(format!(
                    "directory {} lists missing chain {}",
                    dir_id, chain_id
                ))
            })?;
            out.push(chain);
        }
        Ok(out)
    }

    /// Events of a chain in observation order, head to tail.
    pub async fn list_events(&self, chain_id: u64) -> Result<Vec<Event>, StoreError> {
        let db = self.db.read().await;
        let txn = db.begin_read()?;
        let head_tbl = txn.open_table(EVENT_HEAD)?;
        let next_tbl = txn.open_table(EVENT_NEXT)?;
        let events = txn.open_table(EVENTS)?;
        let mut out = Vec::new();
        let mut current = head_tbl.get(chain_id)?.map(|g| g.value());
        while let Some(id) = current {
            let event = read_record::<Event>(&events, id)?.ok_or_else(|| {
                StoreError::InvariantViolation(format!(
                    "chain {} links missing event {}",
                    chain_id, id
                ))
            })?;
            out.push(event);
            current = next_tbl.get(id)?.map(|g| g.value());
        }
        Ok(out)
    }

    /// Release unused id allocations and flush. The store remains usable
    /// but callers are expected to drop it after closing.
    pub async fn close(&self) -> Result<(), StoreError> {
        let mut seqs = self.seqs.lock().await;
        let db = self.db.write().await;
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(SEQS)?;
            seqs.dirs.release(&mut table)?;
            seqs.chains.release(&mut table)?;
            seqs.events.release(&mut table)?;
        }
        txn.commit()?;
        Ok(())
    }
}

fn read_record<T: serde::de::DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static str>,
    id: u64,
) -> Result<Option<T>, StoreError> {
    match table.get(id)? {
        Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
        None => Ok(None),
    }
}
