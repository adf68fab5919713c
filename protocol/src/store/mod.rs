//! # Persistence Layer
//!
//! Storage for the gateway, built on sled's embedded key-value store.
//! All on-disk data flows through [`GatewayDb`].
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees", each an independent B+ tree
//! with its own keyspace:
//!
//! | Tree              | Key                  | Value                        |
//! |-------------------|----------------------|------------------------------|
//! | `transactions`    | row id (UTF-8)       | `bincode(TransactionRecord)` |
//! | `transaction_ids` | public id (UTF-8)    | row id (UTF-8)               |
//! | `key_records`     | row id (UTF-8)       | `bincode(KeyRecord)`         |
//! | `key_ids`         | public id (UTF-8)    | row id (UTF-8)               |
//!
//! Each transaction carries two public identifiers (`phonePageId` and
//! `otpPageId`). Both land in the `*_ids` index trees pointing at the same
//! row, which is how "lookup by either identifier" stays a single `get`
//! instead of a scan.
//!
//! Transactions and key records are deliberately separate trees with
//! separate code paths (`transactions.rs` vs `keys.rs`): key material is
//! the higher-sensitivity asset and only `keys.rs` ever touches it.

use sled::{Db, Tree};
use std::path::Path;

pub mod keys;
pub mod transactions;

pub use keys::{CustodyError, KeyRecord, KeyStore, SessionKeys};
pub use transactions::{
    LifecycleStage, NewTransaction, PublicIds, TransactionRecord, TransactionStore,
};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// GatewayDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for the gateway.
///
/// Wraps a sled `Db` and hands out the named trees the two stores are
/// built from. All serialization uses bincode.
///
/// # Thread Safety
///
/// sled trees support lock-free concurrent reads and serialized writes, so
/// `GatewayDb` (and the stores built on it) can be shared across request
/// handlers without external locking.
#[derive(Debug, Clone)]
pub struct GatewayDb {
    /// The underlying sled database handle.
    db: Db,
    /// Transaction records keyed by internal row id.
    transactions: Tree,
    /// Index: either public id -> transaction row id.
    transaction_ids: Tree,
    /// Key records keyed by internal row id.
    key_records: Tree,
    /// Index: either public id -> key record row id.
    key_ids: Tree,
}

impl GatewayDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that lives in memory and is cleaned up
    /// when dropped. Ideal for unit tests.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let transactions = db.open_tree("transactions")?;
        let transaction_ids = db.open_tree("transaction_ids")?;
        let key_records = db.open_tree("key_records")?;
        let key_ids = db.open_tree("key_ids")?;

        Ok(Self {
            db,
            transactions,
            transaction_ids,
            key_records,
            key_ids,
        })
    }

    /// Flush all dirty buffers to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn transactions_tree(&self) -> &Tree {
        &self.transactions
    }

    pub(crate) fn transaction_ids_tree(&self) -> &Tree {
        &self.transaction_ids
    }

    pub(crate) fn key_records_tree(&self) -> &Tree {
        &self.key_records
    }

    pub(crate) fn key_ids_tree(&self) -> &Tree {
        &self.key_ids
    }
}

/// bincode-encode a value, mapping the error into [`DbError`].
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

/// bincode-decode a value, mapping the error into [`DbError`].
pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}
