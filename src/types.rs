use serde::{Deserialize, Serialize};

use crate::ids::GeneratedId;

/// Identity of a list-scoped entity: the list it lives in plus its element id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdTuple {
    pub list_id: GeneratedId,
    pub element_id: GeneratedId,
}

impl IdTuple {
    pub fn new(list_id: GeneratedId, element_id: GeneratedId) -> Self {
        Self {
            list_id,
            element_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailAddress {
    pub name: String,
    pub address: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailState {
    Draft,
    Received,
    Sent,
}

#[derive(Clone, Debug)]
pub struct Mail {
    pub id: IdTuple,
    pub subject: String,
    pub sender: Option<MailAddress>,
    pub to_recipients: Vec<MailAddress>,
    pub cc_recipients: Vec<MailAddress>,
    pub bcc_recipients: Vec<MailAddress>,
    pub state: MailState,
    /// Element id of the [`MailBody`] blob.
    pub body: GeneratedId,
    /// Ids of the attached files; only their names are consumed here.
    pub attachments: Vec<IdTuple>,
    pub owner_group: GeneratedId,
}

/// Opaque HTML or plain-text blob, stripped to plaintext before tokenization.
#[derive(Clone, Debug)]
pub struct MailBody {
    pub id: GeneratedId,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct MailFile {
    pub id: IdTuple,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FolderType {
    Inbox,
    Sent,
    Trash,
    Archive,
    Spam,
    Draft,
    Custom,
}

#[derive(Clone, Debug)]
pub struct MailFolder {
    pub id: IdTuple,
    pub folder_type: FolderType,
    /// The mail list holding this folder's mail.
    pub mails: GeneratedId,
    /// List id of this folder's subfolders.
    pub subfolders: GeneratedId,
    pub name: String,
}

/// Per-group aggregation root pointing at the group's mailbox.
#[derive(Clone, Debug)]
pub struct MailboxGroupRoot {
    pub group_id: GeneratedId,
    pub mailbox: GeneratedId,
}

#[derive(Clone, Debug)]
pub struct Mailbox {
    pub id: GeneratedId,
    /// List id of the mailbox's system folders.
    pub system_folders: GeneratedId,
}

/// The indexing user: identity plus the mail groups they are a member of.
#[derive(Clone, Debug)]
pub struct User {
    pub id: GeneratedId,
    pub mail_memberships: Vec<GeneratedId>,
}

/// `index_timestamp` sentinel: nothing has been indexed for the group yet.
pub const NOTHING_INDEXED: i64 = 0;
/// `index_timestamp` sentinel: the group is indexed back to its origin.
pub const FULL_INDEXED: i64 = 1;

/// Persisted per-group indexing progress, keyed by mail group id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupData {
    /// `NOTHING_INDEXED`, `FULL_INDEXED`, or an epoch-ms horizon: all mail
    /// newer than this is indexed.
    pub index_timestamp: i64,
}

impl GroupData {
    pub fn new() -> Self {
        Self {
            index_timestamp: NOTHING_INDEXED,
        }
    }
}

impl Default for GroupData {
    fn default() -> Self {
        Self::new()
    }
}

/// Ranks an `index_timestamp` so that the greatest value is the newest
/// still-unindexed horizon: an untouched group outranks every real
/// timestamp, a fully indexed group ranks below all of them.
pub fn timestamp_rank(index_timestamp: i64) -> i64 {
    match index_timestamp {
        NOTHING_INDEXED => i64::MAX,
        FULL_INDEXED => i64::MIN,
        real => real,
    }
}

/// Persisted per-instance record proving the instance has been indexed and
/// naming the list it currently lives in. Keyed by the encrypted instance id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementData {
    pub list_id: GeneratedId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityOperation {
    Create,
    Update,
    Delete,
}

/// One mutation observed on the mail store.
#[derive(Clone, Debug)]
pub struct EntityUpdate {
    pub instance_list_id: GeneratedId,
    pub instance_id: GeneratedId,
    pub operation: EntityOperation,
}

/// An ordered batch of mutations, serialized per group by the caller.
#[derive(Clone, Debug)]
pub struct EntityEventBatch {
    pub group_id: GeneratedId,
    pub batch_id: GeneratedId,
    pub events: Vec<EntityUpdate>,
}

/// Snapshot pushed to the host whenever indexing state or progress changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchIndexState {
    pub indexing_supported: bool,
    pub mail_index_enabled: bool,
    /// 0 when idle, 1..=99 while a backfill is running.
    pub progress: u32,
    pub current_mail_index_timestamp: i64,
}
