use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{DbFacade, DbTransaction, ObjectStore};
use crate::errors::{IndexError, IndexResult};
use crate::ids::GeneratedId;
use crate::types::{ElementData, GroupData};

const KEY_INDEXING_ENABLED: &str = "mail_indexing_enabled";
const KEY_EXCLUDED_LISTS: &str = "excluded_list_ids";

/// The global flags persisted in the meta store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexMeta {
    pub enabled: bool,
    pub excluded_list_ids: Vec<GeneratedId>,
}

#[derive(Serialize, Deserialize)]
struct StoredFlag(bool);

#[derive(Serialize, Deserialize)]
struct StoredLists(Vec<GeneratedId>);

/// Typed progress reads and writes, each one scoped to a single transaction
/// of the underlying facade.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<dyn DbFacade>,
}

impl StateStore {
    pub fn new(db: Arc<dyn DbFacade>) -> Self {
        Self { db }
    }

    pub async fn read_enabled(&self) -> IndexResult<IndexMeta> {
        let mut tx = self.db.begin().await?;
        let enabled = match tx.get(ObjectStore::MetaData, KEY_INDEXING_ENABLED).await? {
            Some(raw) => decode::<StoredFlag>(&raw)?.0,
            None => false,
        };
        let excluded_list_ids = match tx.get(ObjectStore::MetaData, KEY_EXCLUDED_LISTS).await? {
            Some(raw) => decode::<StoredLists>(&raw)?.0,
            None => Vec::new(),
        };
        tx.commit().await?;
        Ok(IndexMeta {
            enabled,
            excluded_list_ids,
        })
    }

    /// Writes the enabled flag and the excluded-list set atomically.
    pub async fn write_enabled(
        &self,
        enabled: bool,
        excluded_list_ids: &[GeneratedId],
    ) -> IndexResult<()> {
        let mut tx = self.db.begin().await?;
        tx.put(
            ObjectStore::MetaData,
            KEY_INDEXING_ENABLED,
            &encode(&StoredFlag(enabled))?,
        )
        .await?;
        tx.put(
            ObjectStore::MetaData,
            KEY_EXCLUDED_LISTS,
            &encode(&StoredLists(excluded_list_ids.to_vec()))?,
        )
        .await?;
        tx.commit().await
    }

    pub async fn read_group(&self, group_id: GeneratedId) -> IndexResult<Option<GroupData>> {
        let mut tx = self.db.begin().await?;
        let data = match tx.get(ObjectStore::GroupData, &group_id.to_string()).await? {
            Some(raw) => Some(decode::<GroupData>(&raw)?),
            None => None,
        };
        tx.commit().await?;
        Ok(data)
    }

    pub async fn write_group(&self, group_id: GeneratedId, data: &GroupData) -> IndexResult<()> {
        let mut tx = self.db.begin().await?;
        tx.put(
            ObjectStore::GroupData,
            &group_id.to_string(),
            &encode(data)?,
        )
        .await?;
        tx.commit().await
    }

    /// Read-only presence check used by move handling; the value itself is
    /// written by the index engine.
    pub async fn read_element(&self, enc_instance_id: &str) -> IndexResult<Option<ElementData>> {
        let mut tx = self.db.begin().await?;
        let data = match tx.get(ObjectStore::ElementData, enc_instance_id).await? {
            Some(raw) => Some(decode::<ElementData>(&raw)?),
            None => None,
        };
        tx.commit().await?;
        Ok(data)
    }
}

fn encode<T: Serialize>(value: &T) -> IndexResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| IndexError::Store(format!("encoding value: {e}")))
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> IndexResult<T> {
    serde_json::from_slice(raw).map_err(|e| IndexError::Store(format!("decoding value: {e}")))
}
