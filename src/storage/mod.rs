//! Durable state: a small transactional key/value facade over three named
//! object stores, plus the typed progress layer on top of it.

pub mod sqlite;
pub mod state;

use async_trait::async_trait;

use crate::errors::IndexResult;

pub use sqlite::SqliteDb;
pub use state::{IndexMeta, StateStore};

/// The named object stores the indexer persists into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectStore {
    /// Global flags: the enabled bit and the excluded-list set.
    MetaData,
    /// Per-group indexing progress.
    GroupData,
    /// Per-instance indexed markers, keyed by encrypted instance id.
    ElementData,
}

impl ObjectStore {
    pub const ALL: [ObjectStore; 3] = [
        ObjectStore::MetaData,
        ObjectStore::GroupData,
        ObjectStore::ElementData,
    ];

    pub fn table(self) -> &'static str {
        match self {
            ObjectStore::MetaData => "meta_data",
            ObjectStore::GroupData => "group_data",
            ObjectStore::ElementData => "element_data",
        }
    }
}

/// ACID key/value access spanning the named stores. Every progress-store
/// operation runs inside exactly one transaction.
#[async_trait]
pub trait DbFacade: Send + Sync {
    async fn begin(&self) -> IndexResult<Box<dyn DbTransaction>>;

    /// Drop all persisted indexer state. Used when indexing is disabled;
    /// the next enable rebuilds from scratch.
    async fn delete_database(&self) -> IndexResult<()>;
}

#[async_trait]
pub trait DbTransaction: Send {
    async fn get(&mut self, store: ObjectStore, key: &str) -> IndexResult<Option<Vec<u8>>>;

    async fn put(&mut self, store: ObjectStore, key: &str, value: &[u8]) -> IndexResult<()>;

    async fn delete(&mut self, store: ObjectStore, key: &str) -> IndexResult<()>;

    async fn commit(self: Box<Self>) -> IndexResult<()>;
}
