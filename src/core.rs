//! Contract for the low-level index engine: tokenization of attribute text,
//! posting encryption, and the batched write path. Everything that touches
//! the database key lives behind this trait; the indexer only ever handles
//! already-encrypted material.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::IndexResult;
use crate::ids::GeneratedId;
use crate::types::{ElementData, EntityUpdate, IdTuple};

/// The attribute a token was found in. Tags are bound statically; the
/// discriminant is the attribute id stored inside postings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MailAttribute {
    Subject = 0,
    ToRecipients = 1,
    CcRecipients = 2,
    BccRecipients = 3,
    Sender = 4,
    Body = 5,
    Attachments = 6,
}

/// One attribute's text, produced lazily so untokenized attributes cost
/// nothing to assemble.
pub struct AttributeSource {
    pub attribute: MailAttribute,
    pub text: Box<dyn Fn() -> String + Send>,
}

impl AttributeSource {
    pub fn new(attribute: MailAttribute, text: impl Fn() -> String + Send + 'static) -> Self {
        Self {
            attribute,
            text: Box::new(text),
        }
    }
}

/// One plaintext posting: where a token occurred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchIndexEntry {
    pub id: GeneratedId,
    pub attribute: MailAttribute,
    pub positions: Vec<u32>,
}

/// Token to postings, as returned by the core tokenizer.
pub type TokenMap = HashMap<String, Vec<SearchIndexEntry>>;

/// An already-encrypted posting row ready for persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedSearchIndexEntry {
    pub enc_token: Vec<u8>,
    pub enc_entry: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexMove {
    pub enc_instance_id: String,
    pub new_list_id: GeneratedId,
}

/// In-memory staging buffer for one commit: encrypted postings and element
/// data to add, list moves, and instance removals. Scoped to a single group
/// and a single processing unit (one backfill page or one event batch).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexUpdate {
    pub group_id: GeneratedId,
    pub new_entries: Vec<EncryptedSearchIndexEntry>,
    pub new_element_data: Vec<(String, ElementData)>,
    pub moves: Vec<IndexMove>,
    pub deleted: Vec<String>,
}

impl IndexUpdate {
    pub fn new(group_id: GeneratedId) -> Self {
        Self {
            group_id,
            new_entries: Vec::new(),
            new_element_data: Vec::new(),
            moves: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_entries.is_empty()
            && self.new_element_data.is_empty()
            && self.moves.is_empty()
            && self.deleted.is_empty()
    }
}

#[async_trait]
pub trait IndexerCore: Send + Sync {
    /// Whether this installation can index at all (e.g. the storage layer
    /// is available). Reported to the host in every progress event.
    fn indexing_supported(&self) -> bool;

    /// Tokenize the given attribute sources into postings for `element_id`.
    fn create_index_entries(
        &self,
        element_id: GeneratedId,
        attributes: Vec<AttributeSource>,
    ) -> TokenMap;

    /// Encrypt `entries` for `id` and append them, together with the
    /// instance's element data, to `update`.
    fn encrypt_search_index_entries(
        &self,
        id: &IdTuple,
        owner_group: GeneratedId,
        entries: TokenMap,
        update: &mut IndexUpdate,
    );

    /// The base64 key under which the instance's element data is stored.
    fn encrypt_instance_id(&self, element_id: GeneratedId) -> String;

    /// Stage removal of the event's instance (postings and element data).
    async fn process_deleted(
        &self,
        event: &EntityUpdate,
        update: &mut IndexUpdate,
    ) -> IndexResult<()>;

    /// Atomically persist one staged update.
    async fn write_index_update(&self, update: IndexUpdate) -> IndexResult<()>;

    /// Close the single-slot write gate: event draining pauses until
    /// [`IndexerCore::resume_writes`]. Awaits a previous holder.
    async fn queue_writes(&self);

    /// Reopen the gate and drain whatever queued up behind it.
    fn resume_writes(&self);

    fn note_indexing_time(&self, elapsed: Duration);

    fn note_downloading_time(&self, elapsed: Duration);

    fn note_indexed_mails(&self, count: usize);

    /// Log the accumulated counters.
    fn print_status(&self);
}
