use std::collections::HashSet;

use tracing::debug;

use crate::client::EntityClient;
use crate::errors::{IndexError, IndexResult};
use crate::ids::GeneratedId;
use crate::types::{FolderType, MailFolder, Mailbox};

/// Mail-list ids of a mailbox's folders and their subfolders, in traversal
/// order. A folder whose list is excluded is dropped together with its
/// subtree.
pub async fn load_mail_list_ids(
    client: &dyn EntityClient,
    mailbox: &Mailbox,
    excluded_list_ids: &HashSet<GeneratedId>,
) -> IndexResult<Vec<GeneratedId>> {
    let mut list_ids = Vec::new();
    let mut pending = std::collections::VecDeque::from([mailbox.system_folders]);

    while let Some(folder_list) = pending.pop_front() {
        let folders = client.load_folders(folder_list).await?;
        for folder in folders {
            if excluded_list_ids.contains(&folder.mails) {
                debug!(folder = %folder.name, list = %folder.mails, "Skipping excluded folder");
                continue;
            }
            list_ids.push(folder.mails);
            pending.push_back(folder.subfolders);
        }
    }

    Ok(list_ids)
}

/// The group's spam folder. Indexing cannot be enabled for a group without
/// one, so absence is an error.
pub async fn spam_folder(
    client: &dyn EntityClient,
    group_id: GeneratedId,
) -> IndexResult<MailFolder> {
    let root = client.load_group_root(group_id).await?;
    let mailbox = client.load_mailbox(root.mailbox).await?;
    let folders = client.load_folders(mailbox.system_folders).await?;
    folders
        .into_iter()
        .find(|f| f.folder_type == FolderType::Spam)
        .ok_or(IndexError::MissingSpamFolder(group_id))
}
