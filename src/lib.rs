//! scryd watches configured directory trees and records, per filesystem
//! inode, a durable, queryable history of lifecycle events: creation,
//! content modification, rename and removal. Events for one inode form a
//! chain; chains resolve by directory, by current path (through rename
//! history) and by inode number, and survive process restart.

pub mod channel;
pub mod cli;
pub mod config;
pub mod node;
pub mod scry;
pub mod store;

pub use config::{Config, ConfigError};
pub use node::{Node, NodeKind, NodeState};
pub use scry::{NodeEvent, ScryError, ScryedDirectory, Scryer};
pub use store::{Chain, Directory, Event, EventKind, EventStore, NewEvent, StoreError};
