//! Shared test harness: an in-memory mail store, a deterministic index
//! core, and a recording progress sink, wired to the SQLite store in
//! memory mode.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use maildex::client::EntityClient;
use maildex::config::IndexConfig;
use maildex::core::{
    AttributeSource, EncryptedSearchIndexEntry, IndexUpdate, IndexerCore, SearchIndexEntry,
    TokenMap,
};
use maildex::errors::{IndexError, IndexResult};
use maildex::ids::GeneratedId;
use maildex::index::{MailIndexer, ProgressSink};
use maildex::storage::{DbFacade, DbTransaction, ObjectStore, SqliteDb, StateStore};
use maildex::types::{
    ElementData, EntityUpdate, FolderType, IdTuple, Mail, MailAddress, MailBody, MailFile,
    MailFolder, MailState, Mailbox, MailboxGroupRoot, SearchIndexState, User,
};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn gid(n: u64) -> GeneratedId {
    GeneratedId(n)
}

/// An element id embedding `ts` (epoch ms) with `salt` for uniqueness.
pub fn id_at(ts: i64, salt: u64) -> GeneratedId {
    GeneratedId(((ts as u64) << 22) | (salt & 0x3f_ffff))
}

pub fn address(name: &str, addr: &str) -> MailAddress {
    MailAddress {
        name: name.into(),
        address: addr.into(),
    }
}

// ---------------------------------------------------------------------------
// In-memory mail store

#[derive(Default)]
struct WorldState {
    mails: HashMap<GeneratedId, BTreeMap<GeneratedId, Mail>>,
    bodies: HashMap<GeneratedId, MailBody>,
    files: HashMap<IdTuple, MailFile>,
    group_roots: HashMap<GeneratedId, MailboxGroupRoot>,
    mailboxes: HashMap<GeneratedId, Mailbox>,
    folder_lists: HashMap<GeneratedId, Vec<MailFolder>>,
    range_loads: Vec<(GeneratedId, GeneratedId, usize)>,
    next_id: u64,
}

/// Ids of one registered mail group.
#[derive(Clone, Copy, Debug)]
pub struct GroupIds {
    pub group_id: GeneratedId,
    pub mailbox_id: GeneratedId,
    pub system_folders: GeneratedId,
    pub inbox_list: GeneratedId,
    pub spam_list: GeneratedId,
}

pub struct MailWorld {
    state: Mutex<WorldState>,
}

impl MailWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WorldState {
                next_id: 0x1000,
                ..WorldState::default()
            }),
        })
    }

    fn fresh_id(state: &mut WorldState) -> GeneratedId {
        state.next_id += 1;
        GeneratedId(state.next_id)
    }

    /// Registers a group with a mailbox holding an inbox and a spam folder.
    pub fn add_group(&self, group_id: GeneratedId) -> GroupIds {
        let mut state = self.state.lock().unwrap();
        let mailbox_id = Self::fresh_id(&mut state);
        let system_folders = Self::fresh_id(&mut state);
        let inbox_list = Self::fresh_id(&mut state);
        let spam_list = Self::fresh_id(&mut state);

        state.group_roots.insert(
            group_id,
            MailboxGroupRoot {
                group_id,
                mailbox: mailbox_id,
            },
        );
        state.mailboxes.insert(
            mailbox_id,
            Mailbox {
                id: mailbox_id,
                system_folders,
            },
        );

        let inbox_subfolders = Self::fresh_id(&mut state);
        let spam_subfolders = Self::fresh_id(&mut state);
        let inbox_element = Self::fresh_id(&mut state);
        let spam_element = Self::fresh_id(&mut state);
        let folders = vec![
            MailFolder {
                id: IdTuple::new(system_folders, inbox_element),
                folder_type: FolderType::Inbox,
                mails: inbox_list,
                subfolders: inbox_subfolders,
                name: "Inbox".into(),
            },
            MailFolder {
                id: IdTuple::new(system_folders, spam_element),
                folder_type: FolderType::Spam,
                mails: spam_list,
                subfolders: spam_subfolders,
                name: "Spam".into(),
            },
        ];
        state.folder_lists.insert(system_folders, folders);
        state.folder_lists.insert(inbox_subfolders, Vec::new());
        state.folder_lists.insert(spam_subfolders, Vec::new());

        GroupIds {
            group_id,
            mailbox_id,
            system_folders,
            inbox_list,
            spam_list,
        }
    }

    /// Registers a group whose mailbox has no spam folder.
    pub fn add_group_without_spam(&self, group_id: GeneratedId) -> GroupIds {
        let ids = self.add_group(group_id);
        let mut state = self.state.lock().unwrap();
        let folders = state.folder_lists.get_mut(&ids.system_folders).unwrap();
        folders.retain(|f| f.folder_type != FolderType::Spam);
        ids
    }

    /// Attaches a custom subfolder under `parent` and returns its mail list.
    pub fn add_subfolder(&self, parent_subfolders: GeneratedId, name: &str) -> GeneratedId {
        let mut state = self.state.lock().unwrap();
        let mails = Self::fresh_id(&mut state);
        let subfolders = Self::fresh_id(&mut state);
        let element = Self::fresh_id(&mut state);
        state
            .folder_lists
            .entry(parent_subfolders)
            .or_default()
            .push(MailFolder {
                id: IdTuple::new(parent_subfolders, element),
                folder_type: FolderType::Custom,
                mails,
                subfolders,
                name: name.into(),
            });
        state.folder_lists.insert(subfolders, Vec::new());
        mails
    }

    pub fn subfolder_list_of(&self, system_folders: GeneratedId, folder: FolderType) -> GeneratedId {
        let state = self.state.lock().unwrap();
        state.folder_lists[&system_folders]
            .iter()
            .find(|f| f.folder_type == folder)
            .map(|f| f.subfolders)
            .unwrap()
    }

    pub fn add_mail(
        &self,
        group_id: GeneratedId,
        list_id: GeneratedId,
        element_id: GeneratedId,
        subject: &str,
        body_text: &str,
        attachment_names: &[&str],
        mail_state: MailState,
    ) -> Mail {
        let mut state = self.state.lock().unwrap();
        let body_id = GeneratedId(element_id.0 ^ 0x5a5a_5a5a);
        state.bodies.insert(
            body_id,
            MailBody {
                id: body_id,
                text: body_text.into(),
            },
        );

        let mut attachments = Vec::new();
        for name in attachment_names {
            let file_id = IdTuple::new(gid(0xf11e), Self::fresh_id(&mut state));
            state.files.insert(
                file_id,
                MailFile {
                    id: file_id,
                    name: (*name).into(),
                },
            );
            attachments.push(file_id);
        }

        let mail = Mail {
            id: IdTuple::new(list_id, element_id),
            subject: subject.into(),
            sender: Some(address("Sender", "sender@example.com")),
            to_recipients: vec![address("Recipient", "rcpt@example.com")],
            cc_recipients: Vec::new(),
            bcc_recipients: Vec::new(),
            state: mail_state,
            body: body_id,
            attachments,
            owner_group: group_id,
        };
        state
            .mails
            .entry(list_id)
            .or_default()
            .insert(element_id, mail.clone());
        mail
    }

    pub fn remove_mail(&self, list_id: GeneratedId, element_id: GeneratedId) {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.mails.get_mut(&list_id) {
            list.remove(&element_id);
        }
    }

    pub fn range_loads(&self) -> Vec<(GeneratedId, GeneratedId, usize)> {
        self.state.lock().unwrap().range_loads.clone()
    }

    pub fn clear_range_loads(&self) {
        self.state.lock().unwrap().range_loads.clear();
    }
}

#[async_trait]
impl EntityClient for MailWorld {
    async fn load_mail(&self, id: &IdTuple) -> IndexResult<Mail> {
        let state = self.state.lock().unwrap();
        state
            .mails
            .get(&id.list_id)
            .and_then(|list| list.get(&id.element_id))
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("mail {}", id.element_id)))
    }

    async fn load_mail_body(&self, id: GeneratedId) -> IndexResult<MailBody> {
        let state = self.state.lock().unwrap();
        state
            .bodies
            .get(&id)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("body {id}")))
    }

    async fn load_attachment(&self, id: &IdTuple) -> IndexResult<MailFile> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("file {}", id.element_id)))
    }

    async fn load_group_root(&self, group_id: GeneratedId) -> IndexResult<MailboxGroupRoot> {
        let state = self.state.lock().unwrap();
        state
            .group_roots
            .get(&group_id)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("group root {group_id}")))
    }

    async fn load_mailbox(&self, id: GeneratedId) -> IndexResult<Mailbox> {
        let state = self.state.lock().unwrap();
        state
            .mailboxes
            .get(&id)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("mailbox {id}")))
    }

    async fn load_folders(&self, list_id: GeneratedId) -> IndexResult<Vec<MailFolder>> {
        let state = self.state.lock().unwrap();
        Ok(state.folder_lists.get(&list_id).cloned().unwrap_or_default())
    }

    async fn load_mail_range(
        &self,
        list_id: GeneratedId,
        start_id: GeneratedId,
        count: usize,
        reverse: bool,
    ) -> IndexResult<Vec<Mail>> {
        assert!(reverse, "the indexer only walks newest-first");
        let mut state = self.state.lock().unwrap();
        state.range_loads.push((list_id, start_id, count));
        let mails = state
            .mails
            .get(&list_id)
            .map(|list| {
                list.iter()
                    .rev()
                    .filter(|(element_id, _)| **element_id < start_id)
                    .take(count)
                    .map(|(_, mail)| mail.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(mails)
    }
}

// ---------------------------------------------------------------------------
// Deterministic index core

type WriteHook = Box<dyn Fn() + Send + Sync>;

pub struct FakeCore {
    db: Arc<dyn DbFacade>,
    writes: Mutex<Vec<IndexUpdate>>,
    gate_log: Mutex<Vec<&'static str>>,
    gate: tokio::sync::Semaphore,
    supported: AtomicBool,
    indexing_ms: AtomicU64,
    downloading_ms: AtomicU64,
    mail_count: AtomicU64,
    after_write: Mutex<Option<WriteHook>>,
}

impl FakeCore {
    pub fn new(db: Arc<dyn DbFacade>) -> Arc<Self> {
        Arc::new(Self {
            db,
            writes: Mutex::new(Vec::new()),
            gate_log: Mutex::new(Vec::new()),
            gate: tokio::sync::Semaphore::new(1),
            supported: AtomicBool::new(true),
            indexing_ms: AtomicU64::new(0),
            downloading_ms: AtomicU64::new(0),
            mail_count: AtomicU64::new(0),
            after_write: Mutex::new(None),
        })
    }

    pub fn committed(&self) -> Vec<IndexUpdate> {
        self.writes.lock().unwrap().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn gate_log(&self) -> Vec<&'static str> {
        self.gate_log.lock().unwrap().clone()
    }

    pub fn mail_count(&self) -> u64 {
        self.mail_count.load(Ordering::SeqCst)
    }

    pub fn set_after_write(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.after_write.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn clear_after_write(&self) {
        *self.after_write.lock().unwrap() = None;
    }

    pub fn enc_id(element_id: GeneratedId) -> String {
        BASE64.encode(format!("k:{element_id}"))
    }

    /// Tokens staged in an update, decoded from the fake encryption.
    pub fn tokens_of(update: &IndexUpdate) -> Vec<String> {
        update
            .new_entries
            .iter()
            .map(|e| {
                String::from_utf8_lossy(&e.enc_token)
                    .trim_start_matches("tok|")
                    .to_string()
            })
            .collect()
    }
}

#[async_trait]
impl IndexerCore for FakeCore {
    fn indexing_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    fn create_index_entries(
        &self,
        element_id: GeneratedId,
        attributes: Vec<AttributeSource>,
    ) -> TokenMap {
        let mut map: TokenMap = HashMap::new();
        for attr in attributes {
            let text = (attr.text)();
            let mut per_attr: BTreeMap<String, Vec<u32>> = BTreeMap::new();
            for (pos, token) in text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .enumerate()
            {
                per_attr
                    .entry(token.to_lowercase())
                    .or_default()
                    .push(pos as u32);
            }
            for (token, positions) in per_attr {
                map.entry(token).or_default().push(SearchIndexEntry {
                    id: element_id,
                    attribute: attr.attribute,
                    positions,
                });
            }
        }
        map
    }

    fn encrypt_search_index_entries(
        &self,
        id: &IdTuple,
        owner_group: GeneratedId,
        entries: TokenMap,
        update: &mut IndexUpdate,
    ) {
        let mut tokens: Vec<(String, Vec<SearchIndexEntry>)> = entries.into_iter().collect();
        tokens.sort_by(|a, b| a.0.cmp(&b.0));
        for (token, postings) in tokens {
            for posting in postings {
                update.new_entries.push(EncryptedSearchIndexEntry {
                    enc_token: format!("tok|{token}").into_bytes(),
                    enc_entry: format!(
                        "{}|{owner_group}|{:?}|{:?}",
                        posting.id, posting.attribute, posting.positions
                    )
                    .into_bytes(),
                });
            }
        }
        update.new_element_data.push((
            Self::enc_id(id.element_id),
            ElementData {
                list_id: id.list_id,
            },
        ));
    }

    fn encrypt_instance_id(&self, element_id: GeneratedId) -> String {
        Self::enc_id(element_id)
    }

    async fn process_deleted(
        &self,
        event: &EntityUpdate,
        update: &mut IndexUpdate,
    ) -> IndexResult<()> {
        update.deleted.push(Self::enc_id(event.instance_id));
        Ok(())
    }

    async fn write_index_update(&self, update: IndexUpdate) -> IndexResult<()> {
        let mut tx = self.db.begin().await?;
        for key in &update.deleted {
            tx.delete(ObjectStore::ElementData, key).await?;
        }
        for (key, data) in &update.new_element_data {
            let raw = serde_json::to_vec(data)
                .map_err(|e| IndexError::Store(format!("encoding element data: {e}")))?;
            tx.put(ObjectStore::ElementData, key, &raw).await?;
        }
        for mv in &update.moves {
            let raw = serde_json::to_vec(&ElementData {
                list_id: mv.new_list_id,
            })
            .map_err(|e| IndexError::Store(format!("encoding element data: {e}")))?;
            tx.put(ObjectStore::ElementData, &mv.enc_instance_id, &raw)
                .await?;
        }
        tx.commit().await?;

        self.writes.lock().unwrap().push(update);
        if let Some(hook) = self.after_write.lock().unwrap().as_ref() {
            hook();
        }
        Ok(())
    }

    async fn queue_writes(&self) {
        self.gate
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
        self.gate_log.lock().unwrap().push("queue");
    }

    fn resume_writes(&self) {
        self.gate.add_permits(1);
        self.gate_log.lock().unwrap().push("resume");
    }

    fn note_indexing_time(&self, elapsed: Duration) {
        self.indexing_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    fn note_downloading_time(&self, elapsed: Duration) {
        self.downloading_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    fn note_indexed_mails(&self, count: usize) {
        self.mail_count.fetch_add(count as u64, Ordering::SeqCst);
    }

    fn print_status(&self) {
        tracing::info!(
            indexing_ms = self.indexing_ms.load(Ordering::SeqCst),
            downloading_ms = self.downloading_ms.load(Ordering::SeqCst),
            mails = self.mail_count.load(Ordering::SeqCst),
            "index status"
        );
    }
}

// ---------------------------------------------------------------------------
// Progress recording

#[derive(Default)]
pub struct RecordingSink {
    states: Mutex<Vec<SearchIndexState>>,
}

impl RecordingSink {
    pub fn states(&self) -> Vec<SearchIndexState> {
        self.states.lock().unwrap().clone()
    }

    pub fn progresses(&self) -> Vec<u32> {
        self.states().iter().map(|s| s.progress).collect()
    }

    pub fn clear(&self) {
        self.states.lock().unwrap().clear();
    }
}

impl ProgressSink for RecordingSink {
    fn send_index_state(&self, state: SearchIndexState) {
        self.states.lock().unwrap().push(state);
    }
}

// ---------------------------------------------------------------------------
// Wiring

pub struct Harness {
    pub indexer: MailIndexer,
    pub core: Arc<FakeCore>,
    pub world: Arc<MailWorld>,
    pub db: Arc<SqliteDb>,
    pub state: StateStore,
    pub sink: Arc<RecordingSink>,
}

pub async fn harness(world: Arc<MailWorld>) -> Harness {
    init_tracing();
    let db = Arc::new(SqliteDb::in_memory().await.expect("in-memory db"));
    let facade: Arc<dyn DbFacade> = db.clone();
    let core = FakeCore::new(facade.clone());
    let sink = Arc::new(RecordingSink::default());
    let indexer = MailIndexer::new(
        core.clone(),
        world.clone(),
        facade.clone(),
        sink.clone(),
        IndexConfig::default(),
    );
    Harness {
        indexer,
        core,
        world,
        db,
        state: StateStore::new(facade),
        sink,
    }
}

/// Marks indexing enabled with the given excluded lists, bypassing the
/// spawned initial backfill that `enable` kicks off.
pub async fn enable_quietly(h: &Harness, user: &User, excluded: &[GeneratedId]) {
    h.state
        .write_enabled(true, excluded)
        .await
        .expect("write enabled");
    h.indexer.init(user).await.expect("init");
    h.sink.clear();
}

pub fn user_of(groups: &[GeneratedId]) -> User {
    User {
        id: gid(0xace),
        mail_memberships: groups.to_vec(),
    }
}

/// Waits until the sink has seen a terminal progress event.
pub async fn wait_for_idle(sink: &RecordingSink) {
    for _ in 0..500 {
        let progresses = sink.progresses();
        if !progresses.is_empty() && progresses.last() == Some(&0) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("indexing never reached idle: {:?}", sink.progresses());
}
