use std::collections::HashSet;

use tracing::{debug, warn};

use super::MailIndexer;
use crate::client::EntityClient;
use crate::core::{IndexMove, IndexUpdate, IndexerCore};
use crate::errors::IndexResult;
use crate::ids::GeneratedId;
use crate::tokenize;
use crate::types::{EntityOperation, EntityUpdate, IdTuple, Mail, MailState};

/// Apply one ordered batch of mail mutations to `update`. A create and a
/// delete on the same instance inside one batch denote a folder move.
pub(crate) async fn apply_events(
    indexer: &MailIndexer,
    events: &[EntityUpdate],
    group_id: GeneratedId,
    batch_id: GeneratedId,
    update: &mut IndexUpdate,
) -> IndexResult<()> {
    if !indexer.is_enabled() {
        return Ok(());
    }

    let created: HashSet<GeneratedId> = events
        .iter()
        .filter(|e| e.operation == EntityOperation::Create)
        .map(|e| e.instance_id)
        .collect();
    let deleted: HashSet<GeneratedId> = events
        .iter()
        .filter(|e| e.operation == EntityOperation::Delete)
        .map(|e| e.instance_id)
        .collect();

    for event in events {
        match event.operation {
            EntityOperation::Create => {
                if deleted.contains(&event.instance_id) {
                    handle_move(indexer, event, update).await?;
                } else {
                    index_new_mail(indexer, event, update).await?;
                }
            }
            EntityOperation::Update => {
                handle_update(indexer, event, update).await?;
            }
            EntityOperation::Delete => {
                // The create half of a move handles the move instead.
                if !created.contains(&event.instance_id) {
                    indexer.inner().core.process_deleted(event, update).await?;
                }
            }
        }
    }

    debug!(
        group = %group_id,
        batch = %batch_id,
        events = events.len(),
        "Applied entity event batch"
    );
    Ok(())
}

/// New-mail path: load the instance and stage its postings, unless its list
/// is excluded. A mail that vanished or became unreadable is logged and
/// dropped.
async fn index_new_mail(
    indexer: &MailIndexer,
    event: &EntityUpdate,
    update: &mut IndexUpdate,
) -> IndexResult<()> {
    let id = IdTuple::new(event.instance_list_id, event.instance_id);
    match indexer.inner().client.load_mail(&id).await {
        Ok(mail) => index_loaded_mail(indexer, &mail, update).await,
        Err(e) if e.is_skippable() => {
            warn!(mail = %event.instance_id, error = %e, "Skipping created mail");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn index_loaded_mail(
    indexer: &MailIndexer,
    mail: &Mail,
    update: &mut IndexUpdate,
) -> IndexResult<()> {
    if indexer.excluded_snapshot().contains(&mail.id.list_id) {
        debug!(mail = %mail.id.element_id, list = %mail.id.list_id, "Mail in excluded list, not indexed");
        return Ok(());
    }

    let inner = indexer.inner();
    let body = match inner.client.load_mail_body(mail.body).await {
        Ok(body) => body,
        Err(e) if e.is_skippable() => {
            warn!(mail = %mail.id.element_id, error = %e, "Skipping mail, body unavailable");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut files = Vec::with_capacity(mail.attachments.len());
    for file_id in &mail.attachments {
        match inner.client.load_attachment(file_id).await {
            Ok(file) => files.push(file),
            Err(e) if e.is_skippable() => {
                warn!(mail = %mail.id.element_id, error = %e, "Skipping mail, attachment unavailable");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    let entries = tokenize::create_mail_index_entries(inner.core.as_ref(), mail, &body, &files);
    inner
        .core
        .encrypt_search_index_entries(&mail.id, mail.owner_group, entries, update);
    Ok(())
}

/// Only drafts are mutable; an updated draft is staged as a delete plus a
/// full re-index. Both sub-steps write into the same single-writer update,
/// so their order does not matter.
async fn handle_update(
    indexer: &MailIndexer,
    event: &EntityUpdate,
    update: &mut IndexUpdate,
) -> IndexResult<()> {
    let id = IdTuple::new(event.instance_list_id, event.instance_id);
    match indexer.inner().client.load_mail(&id).await {
        Ok(mail) if mail.state == MailState::Draft => {
            indexer.inner().core.process_deleted(event, update).await?;
            index_loaded_mail(indexer, &mail, update).await
        }
        Ok(_) => Ok(()),
        Err(e) if e.is_skippable() => {
            warn!(mail = %event.instance_id, error = %e, "Skipping updated mail");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// A create whose instance is also deleted in the same batch: the mail
/// changed lists. If it was indexed before, only the list pointer needs to
/// follow (or the postings go away entirely when it moved into an excluded
/// list); otherwise index it like a new mail.
async fn handle_move(
    indexer: &MailIndexer,
    event: &EntityUpdate,
    update: &mut IndexUpdate,
) -> IndexResult<()> {
    let inner = indexer.inner();
    let enc_instance_id = inner.core.encrypt_instance_id(event.instance_id);

    match inner.state.read_element(&enc_instance_id).await? {
        Some(_) => {
            if indexer.excluded_snapshot().contains(&event.instance_list_id) {
                debug!(mail = %event.instance_id, "Moved into excluded list, removing from index");
                inner.core.process_deleted(event, update).await
            } else {
                update.moves.push(IndexMove {
                    enc_instance_id,
                    new_list_id: event.instance_list_id,
                });
                Ok(())
            }
        }
        None => index_new_mail(indexer, event, update).await,
    }
}
