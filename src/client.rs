//! Contract for loading mail entities from the remote store.

use async_trait::async_trait;

use crate::errors::IndexResult;
use crate::ids::GeneratedId;
use crate::types::{IdTuple, Mail, MailBody, MailFile, MailFolder, Mailbox, MailboxGroupRoot};

/// Async access to the mail store. Implementations own connection handling
/// and timeouts; failures surface as `NotFound`, `NotAuthorized` or
/// `Network` and are dispositioned by the caller.
#[async_trait]
pub trait EntityClient: Send + Sync {
    async fn load_mail(&self, id: &IdTuple) -> IndexResult<Mail>;

    async fn load_mail_body(&self, id: GeneratedId) -> IndexResult<MailBody>;

    async fn load_attachment(&self, id: &IdTuple) -> IndexResult<MailFile>;

    async fn load_group_root(&self, group_id: GeneratedId) -> IndexResult<MailboxGroupRoot>;

    async fn load_mailbox(&self, id: GeneratedId) -> IndexResult<Mailbox>;

    /// All folders in a folder list. Folder lists are small; no paging.
    async fn load_folders(&self, list_id: GeneratedId) -> IndexResult<Vec<MailFolder>>;

    /// Up to `count` mails from `list_id` with element ids strictly older
    /// than `start_id`, newest first, when `reverse` is set.
    async fn load_mail_range(
        &self,
        list_id: GeneratedId,
        start_id: GeneratedId,
        count: usize,
        reverse: bool,
    ) -> IndexResult<Vec<Mail>>;
}
