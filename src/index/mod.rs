//! The mail indexer: lifecycle control, historical backfill, and live event
//! application, all funneling index updates into the core write path.

mod backfill;
mod events;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::EntityClient;
use crate::config::IndexConfig;
use crate::core::{IndexUpdate, IndexerCore};
use crate::errors::{IndexError, IndexResult};
use crate::folders;
use crate::ids::{now_ms, start_of_day_shifted, GeneratedId};
use crate::storage::{DbFacade, StateStore};
use crate::types::{
    timestamp_rank, EntityEventBatch, EntityUpdate, SearchIndexState, User, FULL_INDEXED,
    GroupData, NOTHING_INDEXED,
};

/// Receives state snapshots for the host UI.
pub trait ProgressSink: Send + Sync {
    fn send_index_state(&self, state: SearchIndexState);
}

/// Handle owning all in-memory indexing state. Cheap to clone; all clones
/// share one underlying indexer.
#[derive(Clone)]
pub struct MailIndexer {
    inner: Arc<IndexerInner>,
}

pub(crate) struct IndexerInner {
    pub(crate) core: Arc<dyn IndexerCore>,
    pub(crate) client: Arc<dyn EntityClient>,
    pub(crate) db: Arc<dyn DbFacade>,
    pub(crate) state: StateStore,
    pub(crate) sink: Arc<dyn ProgressSink>,
    pub(crate) config: IndexConfig,
    pub(crate) enabled: AtomicBool,
    pub(crate) cancelled: AtomicBool,
    pub(crate) excluded_list_ids: RwLock<HashSet<GeneratedId>>,
    pub(crate) current_index_timestamp: AtomicI64,
    backfill_task: Mutex<Option<JoinHandle<()>>>,
}

impl MailIndexer {
    pub fn new(
        core: Arc<dyn IndexerCore>,
        client: Arc<dyn EntityClient>,
        db: Arc<dyn DbFacade>,
        sink: Arc<dyn ProgressSink>,
        config: IndexConfig,
    ) -> Self {
        let state = StateStore::new(db.clone());
        Self {
            inner: Arc::new(IndexerInner {
                core,
                client,
                db,
                state,
                sink,
                config,
                enabled: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                excluded_list_ids: RwLock::new(HashSet::new()),
                current_index_timestamp: AtomicI64::new(NOTHING_INDEXED),
                backfill_task: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &IndexerInner {
        &self.inner
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn current_index_timestamp(&self) -> i64 {
        self.inner.current_index_timestamp.load(Ordering::SeqCst)
    }

    /// Restore persisted state into memory on startup and tell the host
    /// where indexing stands.
    pub async fn init(&self, user: &User) -> IndexResult<()> {
        let meta = self.inner.state.read_enabled().await?;
        self.inner.enabled.store(meta.enabled, Ordering::SeqCst);
        *self.inner.excluded_list_ids.write().expect("excluded lock") =
            meta.excluded_list_ids.into_iter().collect();
        if meta.enabled {
            self.update_current_index_timestamp(user).await?;
        }
        self.emit_state(0);
        Ok(())
    }

    /// Turn indexing on. First activation resolves every group's spam
    /// folder into the excluded-list set, persists both flags in one
    /// transaction and kicks off the initial backfill without awaiting it.
    /// Re-enabling only reloads the excluded set.
    pub async fn enable(&self, user: &User) -> IndexResult<()> {
        if self.is_enabled() {
            let meta = self.inner.state.read_enabled().await?;
            *self.inner.excluded_list_ids.write().expect("excluded lock") =
                meta.excluded_list_ids.into_iter().collect();
            return Ok(());
        }

        let mut excluded = Vec::new();
        for group_id in &user.mail_memberships {
            let spam = folders::spam_folder(self.inner.client.as_ref(), *group_id).await?;
            excluded.push(spam.mails);
        }
        self.inner.state.write_enabled(true, &excluded).await?;
        self.inner.enabled.store(true, Ordering::SeqCst);
        *self.inner.excluded_list_ids.write().expect("excluded lock") =
            excluded.iter().copied().collect();
        info!(groups = user.mail_memberships.len(), "Mail indexing enabled");

        let end_ts = start_of_day_shifted(now_ms(), -self.inner.config.initial_index_interval_days);
        let this = self.clone();
        let user = user.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = this.index_mailboxes(&user, end_ts).await {
                warn!(error = %e, "Initial mail indexing failed");
            }
        });
        *self.inner.backfill_task.lock().expect("backfill lock") = Some(handle);
        Ok(())
    }

    /// Turn indexing off and delete all persisted index state. The next
    /// enable rebuilds from scratch.
    pub async fn disable(&self) -> IndexResult<()> {
        self.cancel_mail_indexing();
        self.inner.enabled.store(false, Ordering::SeqCst);
        self.inner
            .excluded_list_ids
            .write()
            .expect("excluded lock")
            .clear();
        self.inner
            .current_index_timestamp
            .store(NOTHING_INDEXED, Ordering::SeqCst);
        self.inner.db.delete_database().await?;
        info!("Mail indexing disabled, index database deleted");
        self.emit_state(0);
        Ok(())
    }

    /// Ask a running backfill to stop. Observed at its checkpoints; state
    /// written before the next checkpoint stays durable.
    pub fn cancel_mail_indexing(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Bring every group's horizon at least as far back as `end_ts`.
    pub async fn index_mailboxes(&self, user: &User, end_ts: i64) -> IndexResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.emit_state(1);
        self.inner.core.queue_writes().await;

        let result = backfill::index_all_groups(self, user, end_ts).await;
        let outcome = match result {
            Ok(()) => {
                self.inner.core.print_status();
                Ok(())
            }
            Err(IndexError::Cancelled) => {
                info!("Mail indexing cancelled");
                Ok(())
            }
            Err(e) => {
                // Forget the spawned task handle so nobody is left holding
                // a failed run; the error itself still propagates and a
                // later trigger may retry.
                self.inner
                    .backfill_task
                    .lock()
                    .expect("backfill lock")
                    .take();
                Err(e)
            }
        };

        self.inner.core.resume_writes();
        if let Err(e) = self.update_current_index_timestamp(user).await {
            warn!(error = %e, "Recomputing index timestamp failed");
        }
        self.emit_state(0);
        outcome
    }

    /// Backfill further into the past, but only when `end_ts` is actually
    /// older than what is already covered.
    pub async fn extend_index(&self, user: &User, end_ts: i64) -> IndexResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let current = self.current_index_timestamp();
        if current == FULL_INDEXED {
            return Ok(());
        }
        if current == NOTHING_INDEXED || end_ts < current {
            self.index_mailboxes(user, end_ts).await
        } else {
            Ok(())
        }
    }

    /// Translate one ordered event batch into mutations on `update`. The
    /// caller owns committing the update.
    pub async fn process_entity_events(
        &self,
        events: &[EntityUpdate],
        group_id: GeneratedId,
        batch_id: GeneratedId,
        update: &mut IndexUpdate,
    ) -> IndexResult<()> {
        events::apply_events(self, events, group_id, batch_id, update).await
    }

    /// Convenience wrapper: stage a fresh update for the batch and commit
    /// it when anything accumulated.
    pub async fn process_event_batch(&self, batch: &EntityEventBatch) -> IndexResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut update = IndexUpdate::new(batch.group_id);
        self.process_entity_events(&batch.events, batch.group_id, batch.batch_id, &mut update)
            .await?;
        if !update.is_empty() {
            self.inner.core.write_index_update(update).await?;
        }
        Ok(())
    }

    /// Recompute the visible horizon: the group timestamp ranking newest,
    /// i.e. the most-lagging group bounds visible progress.
    pub async fn update_current_index_timestamp(&self, user: &User) -> IndexResult<()> {
        let mut best: Option<i64> = None;
        for group_id in &user.mail_memberships {
            let ts = self
                .inner
                .state
                .read_group(*group_id)
                .await?
                .map(|d| d.index_timestamp)
                .unwrap_or(NOTHING_INDEXED);
            best = Some(match best {
                Some(b) if timestamp_rank(b) >= timestamp_rank(ts) => b,
                _ => ts,
            });
        }
        self.inner
            .current_index_timestamp
            .store(best.unwrap_or(NOTHING_INDEXED), Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn check_cancelled(&self) -> IndexResult<()> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn excluded_snapshot(&self) -> HashSet<GeneratedId> {
        self.inner
            .excluded_list_ids
            .read()
            .expect("excluded lock")
            .clone()
    }

    pub(crate) fn emit_state(&self, progress: u32) {
        self.inner.sink.send_index_state(SearchIndexState {
            indexing_supported: self.inner.core.indexing_supported(),
            mail_index_enabled: self.is_enabled(),
            progress,
            current_mail_index_timestamp: self.current_index_timestamp(),
        });
    }

    pub(crate) async fn write_group_timestamp(
        &self,
        group_id: GeneratedId,
        index_timestamp: i64,
    ) -> IndexResult<()> {
        self.inner
            .state
            .write_group(group_id, &GroupData { index_timestamp })
            .await
    }
}
