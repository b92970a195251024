//! Batched identifier allocation.
//!
//! Each entity kind draws monotonically increasing u64 ids from its own
//! sequence. Sequences lease blocks from the `seqs` table so that id
//! allocation does not cost a committed write per object; the unused
//! remainder of a lease is written back on store close.

use redb::{Database, ReadableTable, Table};

use super::{StoreError, SEQS};

/// Ids below this value are reserved; id 0 is the path-index root
/// sentinel.
const FIRST_ID: u64 = 1;

/// How many ids a sequence leases from the table at a time.
const LEASE: u64 = 1000;

pub(super) struct Sequence {
    key: &'static str,
    next: u64,
    limit: u64,
}

impl Sequence {
    pub(super) fn new(key: &'static str) -> Sequence {
        Sequence {
            key,
            next: 0,
            limit: 0,
        }
    }

    /// Allocate the next id, leasing a fresh block when exhausted.
    ///
    /// Leasing runs its own committed transaction; callers must not hold
    /// an open write transaction on `db` when calling this.
    pub(super) fn next(&mut self, db: &Database) -> Result<u64, StoreError> {
        if self.next == self.limit {
            self.lease(db)?;
        }
        let id = self.next;
        self.next += 1;
        Ok(id)
    }

    fn lease(&mut self, db: &Database) -> Result<(), StoreError> {
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(SEQS)?;
            let current = table.get(self.key)?.map(|g| g.value()).unwrap_or(FIRST_ID);
            table.insert(self.key, current + LEASE)?;
            self.next = current;
            self.limit = current + LEASE;
        }
        txn.commit()?;
        Ok(())
    }

    /// Write the unleased remainder back so ids resume contiguously on
    /// the next open.
    pub(super) fn release(&mut self, table: &mut Table<&str, u64>) -> Result<(), StoreError> {
        if self.next < self.limit {
            table.insert(self.key, self.next)?;
            self.limit = self.next;
        }
        Ok(())
    }
}
