use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use super::MailIndexer;
use crate::client::EntityClient;
use crate::core::{IndexUpdate, IndexerCore};
use crate::errors::IndexResult;
use crate::ids::{id_to_timestamp, now_ms, timestamp_to_id, GeneratedId};
use crate::tokenize;
use crate::types::{Mail, MailBody, MailFile, User, FULL_INDEXED, NOTHING_INDEXED};

type MailParts = (Mail, MailBody, Vec<MailFile>);

/// Walk every mail group sequentially until each one's horizon is at least
/// as old as `end_ts`.
pub(crate) async fn index_all_groups(
    indexer: &MailIndexer,
    user: &User,
    end_ts: i64,
) -> IndexResult<()> {
    for group_id in &user.mail_memberships {
        index_group(indexer, *group_id, end_ts).await?;
    }
    Ok(())
}

async fn index_group(indexer: &MailIndexer, group_id: GeneratedId, end_ts: i64) -> IndexResult<()> {
    let inner = indexer.inner();

    let index_timestamp = inner
        .state
        .read_group(group_id)
        .await?
        .map(|d| d.index_timestamp)
        .unwrap_or(NOTHING_INDEXED);

    // Already at origin, or already covering the requested cutoff: the
    // horizon never moves newer.
    if index_timestamp == FULL_INDEXED {
        debug!(group = %group_id, "Group fully indexed, skipping");
        return Ok(());
    }
    if index_timestamp != NOTHING_INDEXED && end_ts >= index_timestamp {
        debug!(group = %group_id, index_timestamp, "Group already covers cutoff, skipping");
        return Ok(());
    }

    let root = inner.client.load_group_root(group_id).await?;
    let mailbox = inner.client.load_mailbox(root.mailbox).await?;
    let excluded = indexer.excluded_snapshot();
    let list_ids =
        crate::folders::load_mail_list_ids(inner.client.as_ref(), &mailbox, &excluded).await?;

    let (start_id, range_start_ts) = if index_timestamp == NOTHING_INDEXED {
        (GeneratedId::MAX, now_ms())
    } else {
        (timestamp_to_id(index_timestamp), index_timestamp)
    };
    let end_id = timestamp_to_id(end_ts);

    info!(
        group = %group_id,
        lists = list_ids.len(),
        index_timestamp,
        end_ts,
        "Starting mail group backfill"
    );

    let mut fully_drained = true;
    for list_id in list_ids {
        let drained =
            index_mail_list(indexer, group_id, list_id, start_id, end_id, range_start_ts, end_ts)
                .await?;
        fully_drained = fully_drained && drained;
    }

    let new_ts = if fully_drained { FULL_INDEXED } else { end_ts };
    indexer.write_group_timestamp(group_id, new_ts).await?;
    info!(group = %group_id, index_timestamp = new_ts, "Mail group backfill complete");
    Ok(())
}

/// Page through one mail list newest-first until the list is exhausted or
/// the cutoff is reached. Returns whether the list ran dry before `end_id`.
async fn index_mail_list(
    indexer: &MailIndexer,
    group_id: GeneratedId,
    list_id: GeneratedId,
    start_id: GeneratedId,
    end_id: GeneratedId,
    range_start_ts: i64,
    end_ts: i64,
) -> IndexResult<bool> {
    let inner = indexer.inner();
    let page_size = inner.config.page_size;
    let mut next_start = start_id;

    loop {
        indexer.check_cancelled()?;

        let download = Instant::now();
        let raw = inner
            .client
            .load_mail_range(list_id, next_start, page_size, true)
            .await?;
        indexer.check_cancelled()?;

        let filtered: Vec<Mail> = raw
            .iter()
            .filter(|m| m.id.element_id > end_id)
            .cloned()
            .collect();
        let parts = fetch_mail_parts(indexer, filtered.clone()).await?;
        inner.core.note_downloading_time(download.elapsed());
        inner.core.note_indexed_mails(parts.len());

        let mut update = IndexUpdate::new(group_id);
        for (mail, body, files) in &parts {
            let entries =
                tokenize::create_mail_index_entries(inner.core.as_ref(), mail, body, files);
            inner
                .core
                .encrypt_search_index_entries(&mail.id, mail.owner_group, entries, &mut update);
        }

        if !raw.is_empty() {
            inner.core.write_index_update(update).await?;
            if let Some(oldest) = filtered.last() {
                indexer.emit_state(backfill_progress(
                    range_start_ts,
                    end_ts,
                    id_to_timestamp(oldest.id.element_id),
                ));
            }
        }

        debug!(
            list = %list_id,
            raw = raw.len(),
            indexed = parts.len(),
            "Indexed mail page"
        );

        if raw.len() == page_size {
            // A full page may have been truncated before the cutoff; keep
            // walking from the last raw id so an all-filtered page still
            // makes progress.
            next_start = raw[raw.len() - 1].id.element_id;
            continue;
        }

        return Ok(filtered.len() == raw.len());
    }
}

/// Load body and attachment names for each mail with a bounded number of
/// fetches in flight. A mail whose parts vanished underneath us is logged
/// and dropped.
async fn fetch_mail_parts(
    indexer: &MailIndexer,
    mails: Vec<Mail>,
) -> IndexResult<Vec<MailParts>> {
    let concurrency = indexer.inner().config.mail_fetch_concurrency;
    let parts: Vec<Option<MailParts>> = stream::iter(mails)
        .map(|mail| async move {
            indexer.check_cancelled()?;
            load_mail_parts(indexer, mail).await
        })
        .buffered(concurrency)
        .try_collect()
        .await?;
    Ok(parts.into_iter().flatten().collect())
}

async fn load_mail_parts(indexer: &MailIndexer, mail: Mail) -> IndexResult<Option<MailParts>> {
    let client = indexer.inner().client.as_ref();

    let body = match client.load_mail_body(mail.body).await {
        Ok(body) => body,
        Err(e) if e.is_skippable() => {
            warn!(mail = %mail.id.element_id, error = %e, "Skipping mail, body unavailable");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let mut files = Vec::with_capacity(mail.attachments.len());
    for file_id in &mail.attachments {
        match client.load_attachment(file_id).await {
            Ok(file) => files.push(file),
            Err(e) if e.is_skippable() => {
                warn!(mail = %mail.id.element_id, error = %e, "Skipping mail, attachment unavailable");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Some((mail, body, files)))
}

/// Rough completion estimate from how much of the requested time range has
/// been walked. Pinned inside 1..=99: the terminal states are signalled
/// separately.
fn backfill_progress(range_start_ts: i64, end_ts: i64, reached_ts: i64) -> u32 {
    let total = range_start_ts.saturating_sub(end_ts);
    if total <= 0 {
        return 99;
    }
    let covered = range_start_ts.saturating_sub(reached_ts).clamp(0, total);
    ((covered * 100 / total) as u32).clamp(1, 99)
}
