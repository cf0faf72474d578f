use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use atelier_core::types::{compact_timestamp, now_stored};
use atelier_core::{ConversationId, MessageId};

use crate::error::{Result, StoreError};
use crate::types::{
    Conversation, ConversationMeta, ImageDetail, Message, MessageContent, MessageStatus,
    PendingImage, Role, ToolCallRecord,
};

/// Input for [`ConversationStore::append_message`]. Role and content are
/// required; everything else is role-conditional.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub role: Option<Role>,
    pub content: MessageContent,
    pub status: MessageStatus,
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub original_parts: Option<serde_json::Value>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub client_msg_id: Option<String>,
    pub generated_files: Vec<String>,
}

impl NewMessage {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role: Some(role),
            content,
            ..Default::default()
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::text(text))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::text(text))
    }

    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, MessageContent::text(text));
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }

    pub fn with_client_msg_id(mut self, id: impl Into<String>) -> Self {
        self.client_msg_id = Some(id.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    pub fn with_generated_files(mut self, files: Vec<String>) -> Self {
        self.generated_files = files;
        self
    }

    fn role(&self) -> Role {
        self.role.unwrap_or(Role::User)
    }
}

/// How [`ConversationStore::update_message`] finds its target.
#[derive(Debug, Clone)]
pub enum MessageSelector {
    Id(MessageId),
    ClientMsgId { role: Role, client_msg_id: String },
    /// Last message of the given role whose status is still `in_progress`.
    LastInProgress(Role),
}

/// Partial update applied by [`ConversationStore::update_message`].
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    /// Overwrite content entirely.
    pub content: Option<MessageContent>,
    /// Append to the existing text content.
    pub append_content: Option<String>,
    /// Union-merged into `generated_files`.
    pub generated_files_delta: Vec<String>,
    pub status: Option<MessageStatus>,
}

/// Sharded JSON conversation store with an in-memory metadata index.
///
/// Concurrency: the index map lives behind one mutex; each conversation file
/// additionally has its own lock so load-modify-save cycles never interleave
/// for the same conversation. Readers of different conversations proceed in
/// parallel.
pub struct ConversationStore {
    storage_dir: PathBuf,
    index_path: PathBuf,
    outputs_dir: PathBuf,
    index: Mutex<BTreeMap<String, ConversationMeta>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationStore {
    /// Open (or initialise) a store rooted at `storage_dir`, with workspaces
    /// under `outputs_dir`. A missing `index.json` starts the store empty.
    pub fn open(storage_dir: impl Into<PathBuf>, outputs_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        let outputs_dir = outputs_dir.into();
        std::fs::create_dir_all(&storage_dir)?;
        std::fs::create_dir_all(&outputs_dir)?;

        let index_path = storage_dir
            .parent()
            .unwrap_or(Path::new("."))
            .join("index.json");

        let index = match std::fs::read_to_string(&index_path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, ConversationMeta>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, "index.json unreadable, starting with empty index");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        info!(
            conversations = index.len(),
            path = %storage_dir.display(),
            "conversation store opened"
        );

        Ok(Self {
            storage_dir,
            index_path,
            outputs_dir,
            index: Mutex::new(index),
            locks: DashMap::new(),
        })
    }

    /// Create a new conversation bound to `model`, owned by `username`
    /// (`None` = anonymous). The workspace directory is created eagerly and
    /// its name never changes afterwards.
    pub fn create(&self, model: &str, username: Option<&str>) -> Result<ConversationMeta> {
        let id = ConversationId::new();
        let now = now_stored();
        let output_dir = format!("{}_{}", compact_timestamp(&now), id);

        let conv = Conversation {
            id: id.clone(),
            title: "New conversation".to_string(),
            model: model.to_string(),
            created_at: now.clone(),
            updated_at: now.clone(),
            user: username.map(String::from),
            messages: Vec::new(),
            pending_images: Vec::new(),
            extra: serde_json::Map::new(),
        };

        let meta = ConversationMeta {
            id: id.clone(),
            title: conv.title.clone(),
            model: conv.model.clone(),
            created_at: now.clone(),
            updated_at: now,
            user: conv.user.clone(),
            output_dir: output_dir.clone(),
        };

        let lock = self.lock_for(id.as_str());
        let _guard = lock.lock().unwrap();
        self.save_conversation(&meta, &conv)?;
        std::fs::create_dir_all(self.outputs_dir.join(&output_dir))?;

        {
            let mut index = self.index.lock().unwrap();
            index.insert(id.as_str().to_string(), meta.clone());
            self.write_index(&index)?;
        }

        info!(conv_id = %id, model, "conversation created");
        Ok(meta)
    }

    /// Lazily load a conversation. Anonymous conversations are readable by
    /// any caller; owned conversations only by their owner. A caller without
    /// a username (internal path) sees everything.
    pub fn get(&self, conv_id: &str, username: Option<&str>) -> Result<Conversation> {
        let meta = self.meta(conv_id)?;
        self.check_access(&meta, username)?;
        self.load_conversation(&meta)
    }

    /// Metadata for one conversation, from the index only.
    pub fn meta(&self, conv_id: &str) -> Result<ConversationMeta> {
        let index = self.index.lock().unwrap();
        index.get(conv_id).cloned().ok_or_else(|| StoreError::NotFound {
            id: conv_id.to_string(),
        })
    }

    /// The fixed workspace directory name for a conversation.
    pub fn output_dir_name(&self, conv_id: &str) -> Result<String> {
        Ok(self.meta(conv_id)?.output_dir)
    }

    /// List conversation metadata, newest-updated first. Never reads a
    /// conversation body.
    pub fn list(&self, username: Option<&str>, model: Option<&str>) -> Vec<ConversationMeta> {
        let index = self.index.lock().unwrap();
        let mut metas: Vec<ConversationMeta> = index
            .values()
            .filter(|m| match username {
                None => true,
                Some(u) => m.user.is_none() || m.user.as_deref() == Some(u),
            })
            .filter(|m| model.map(|wanted| m.model == wanted).unwrap_or(true))
            .cloned()
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        metas
    }

    /// Delete a conversation: file plus index entry. The workspace directory
    /// is retained.
    pub fn delete(&self, conv_id: &str, username: Option<&str>) -> Result<()> {
        let meta = self.meta(conv_id)?;
        self.check_access(&meta, username)?;

        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let path = self.conversation_path(&meta);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let mut index = self.index.lock().unwrap();
        index.remove(conv_id);
        self.write_index(&index)?;
        info!(conv_id, "conversation deleted");
        Ok(())
    }

    /// Rebind the conversation's model and bump `updated_at`.
    pub fn set_model(&self, conv_id: &str, model: &str, username: Option<&str>) -> Result<()> {
        let meta = self.meta(conv_id)?;
        self.check_access(&meta, username)?;

        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;
        let now = now_stored();
        conv.model = model.to_string();
        conv.updated_at = now.clone();
        self.save_conversation(&meta, &conv)?;

        let mut index = self.index.lock().unwrap();
        if let Some(entry) = index.get_mut(conv_id) {
            entry.model = model.to_string();
            entry.updated_at = now;
        }
        self.write_index(&index)?;
        Ok(())
    }

    /// Append a message with idempotency and near-duplicate collapsing.
    ///
    /// 1. A matching `{role, client_msg_id}` short-circuits to a
    ///    generated-files union-merge on the existing message.
    /// 2. A tail message with the same role and the same normalised text also
    ///    merges instead of appending.
    /// 3. Otherwise a fresh message is appended; the first user message also
    ///    derives the conversation title.
    pub fn append_message(
        &self,
        conv_id: &str,
        msg: NewMessage,
        username: Option<&str>,
    ) -> Result<MessageId> {
        let meta = self.meta(conv_id)?;
        self.check_access(&meta, username)?;

        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;
        let now = now_stored();
        let role = msg.role();

        // Rule 1: idempotency by client_msg_id.
        if let Some(ref cmid) = msg.client_msg_id {
            if let Some(existing) = conv
                .messages
                .iter_mut()
                .rev()
                .find(|m| m.role == role && m.client_msg_id.as_deref() == Some(cmid.as_str()))
            {
                union_files(&mut existing.generated_files, &msg.generated_files);
                existing.updated_at = now.clone();
                let id = existing.id.clone();
                self.save_conversation(&meta, &conv)?;
                debug!(conv_id, client_msg_id = %cmid, "append collapsed by client_msg_id");
                return Ok(id);
            }
        }

        // Rule 2: near-duplicate merge onto the tail.
        let new_text = normalize_content(&msg.content.as_text());
        if let Some(last) = conv.messages.last_mut() {
            if last.role == role
                && !new_text.is_empty()
                && normalize_content(&last.content.as_text()) == new_text
            {
                union_files(&mut last.generated_files, &msg.generated_files);
                last.updated_at = now.clone();
                let id = last.id.clone();
                self.save_conversation(&meta, &conv)?;
                self.touch_index(conv_id, &now, None)?;
                debug!(conv_id, "append collapsed onto near-duplicate tail");
                return Ok(id);
            }
        }

        // Rule 3: genuinely new message.
        let id = MessageId::new();
        let message = Message {
            id: id.clone(),
            role,
            content: msg.content,
            created_at: now.clone(),
            updated_at: now.clone(),
            status: msg.status,
            tool_calls: msg.tool_calls.filter(|c| !c.is_empty()),
            original_parts: msg.original_parts,
            tool_call_id: msg.tool_call_id,
            name: msg.name,
            client_msg_id: msg.client_msg_id,
            generated_files: msg.generated_files,
            extra: serde_json::Map::new(),
        };

        let first_user = conv.messages.is_empty() && role == Role::User;
        let title = if first_user {
            Some(derive_title(&message.content.as_text()))
        } else {
            None
        };

        conv.messages.push(message);
        conv.updated_at = now.clone();
        if let Some(ref t) = title {
            conv.title = t.clone();
        }

        self.save_conversation(&meta, &conv)?;
        self.touch_index(conv_id, &now, title.as_deref())?;
        Ok(id)
    }

    /// Patch an existing message found by `selector`. Returns the id of the
    /// patched message, or `NotFound` when no message matches.
    pub fn update_message(
        &self,
        conv_id: &str,
        selector: MessageSelector,
        patch: MessagePatch,
        username: Option<&str>,
    ) -> Result<MessageId> {
        let meta = self.meta(conv_id)?;
        self.check_access(&meta, username)?;

        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;

        let target = match &selector {
            MessageSelector::Id(id) => conv.messages.iter_mut().find(|m| &m.id == id),
            MessageSelector::ClientMsgId { role, client_msg_id } => conv
                .messages
                .iter_mut()
                .rev()
                .find(|m| {
                    m.role == *role && m.client_msg_id.as_deref() == Some(client_msg_id.as_str())
                }),
            MessageSelector::LastInProgress(role) => conv
                .messages
                .iter_mut()
                .rev()
                .find(|m| m.role == *role && m.status == MessageStatus::InProgress),
        };

        let Some(target) = target else {
            return Err(StoreError::NotFound {
                id: conv_id.to_string(),
            });
        };

        if let Some(content) = patch.content {
            target.content = content;
        }
        if let Some(append) = patch.append_content {
            let mut text = target.content.as_text();
            text.push_str(&append);
            target.content = MessageContent::Text(text);
        }
        union_files(&mut target.generated_files, &patch.generated_files_delta);
        if let Some(status) = patch.status {
            target.status = status;
        }

        let now = now_stored();
        target.updated_at = now.clone();
        let id = target.id.clone();
        conv.updated_at = now.clone();

        self.save_conversation(&meta, &conv)?;
        self.touch_index(conv_id, &now, None)?;
        Ok(id)
    }

    /// Overwrite the message list wholesale. Used when compression replaces
    /// an old prefix with a synthetic summary.
    pub fn replace_messages(
        &self,
        conv_id: &str,
        messages: Vec<Message>,
        username: Option<&str>,
    ) -> Result<()> {
        let meta = self.meta(conv_id)?;
        self.check_access(&meta, username)?;

        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;
        let now = now_stored();
        conv.messages = messages;
        conv.updated_at = now.clone();
        self.save_conversation(&meta, &conv)?;
        self.touch_index(conv_id, &now, None)?;
        Ok(())
    }

    // ── Pending-image queue ──────────────────────────────────────────────────

    /// Enqueue images for multimodal injection. Paths already present are
    /// left untouched (deduplicated by path).
    pub fn add_pending_images(
        &self,
        conv_id: &str,
        paths: &[String],
        detail: ImageDetail,
        view_count: u32,
    ) -> Result<()> {
        let meta = self.meta(conv_id)?;
        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;

        for path in paths {
            if conv.pending_images.iter().any(|img| &img.path == path) {
                continue;
            }
            conv.pending_images.push(PendingImage {
                path: path.clone(),
                detail,
                remaining_views: view_count.max(1),
            });
        }

        self.save_conversation(&meta, &conv)
    }

    pub fn pending_images(&self, conv_id: &str) -> Result<Vec<PendingImage>> {
        Ok(self.get(conv_id, None)?.pending_images)
    }

    /// Decrement every entry's view counter and evict the exhausted ones.
    /// Returns how many entries were removed.
    pub fn decrement_views_and_cleanup(&self, conv_id: &str) -> Result<usize> {
        let meta = self.meta(conv_id)?;
        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;

        let before = conv.pending_images.len();
        for img in conv.pending_images.iter_mut() {
            img.remaining_views = img.remaining_views.saturating_sub(1);
        }
        conv.pending_images.retain(|img| img.remaining_views > 0);
        let removed = before - conv.pending_images.len();

        self.save_conversation(&meta, &conv)?;
        Ok(removed)
    }

    pub fn remove_pending_images(&self, conv_id: &str, paths: &[String]) -> Result<usize> {
        let meta = self.meta(conv_id)?;
        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;

        let before = conv.pending_images.len();
        conv.pending_images.retain(|img| !paths.contains(&img.path));
        let removed = before - conv.pending_images.len();

        self.save_conversation(&meta, &conv)?;
        Ok(removed)
    }

    pub fn clear_pending_images(&self, conv_id: &str) -> Result<usize> {
        let meta = self.meta(conv_id)?;
        let lock = self.lock_for(conv_id);
        let _guard = lock.lock().unwrap();
        let mut conv = self.load_conversation(&meta)?;
        let removed = conv.pending_images.len();
        conv.pending_images.clear();
        self.save_conversation(&meta, &conv)?;
        Ok(removed)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn lock_for(&self, conv_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(conv_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn check_access(&self, meta: &ConversationMeta, username: Option<&str>) -> Result<()> {
        match (meta.user.as_deref(), username) {
            (None, _) => Ok(()),
            (_, None) => Ok(()),
            (Some(owner), Some(caller)) if owner == caller => Ok(()),
            _ => Err(StoreError::Forbidden {
                id: meta.id.as_str().to_string(),
            }),
        }
    }

    fn conversation_path(&self, meta: &ConversationMeta) -> PathBuf {
        let user_dir = meta.user.as_deref().unwrap_or("anonymous");
        let year_month = meta.created_at.chars().take(7).collect::<String>();
        self.storage_dir
            .join(user_dir)
            .join(year_month)
            .join(format!(
                "{}_{}.json",
                compact_timestamp(&meta.created_at),
                meta.id
            ))
    }

    fn load_conversation(&self, meta: &ConversationMeta) -> Result<Conversation> {
        let path = self.conversation_path(meta);
        let raw = std::fs::read_to_string(&path).map_err(|_| StoreError::MissingFile {
            id: meta.id.as_str().to_string(),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_conversation(&self, meta: &ConversationMeta, conv: &Conversation) -> Result<()> {
        let path = self.conversation_path(meta);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(conv)?;
        std::fs::write(&path, raw)?;
        Ok(())
    }

    /// Atomically rewrite index.json (tmp + rename).
    fn write_index(&self, index: &BTreeMap<String, ConversationMeta>) -> Result<()> {
        let raw = serde_json::to_string_pretty(index)?;
        let tmp = self.index_path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }

    fn touch_index(&self, conv_id: &str, now: &str, title: Option<&str>) -> Result<()> {
        let mut index = self.index.lock().unwrap();
        if let Some(entry) = index.get_mut(conv_id) {
            entry.updated_at = now.to_string();
            if let Some(t) = title {
                entry.title = t.to_string();
            }
        }
        self.write_index(&index)
    }
}

/// Normalise text for near-duplicate comparison: CRLF→LF, NBSP→space,
/// horizontal whitespace runs collapsed, trimmed.
pub fn normalize_content(text: &str) -> String {
    let replaced = text.replace("\r\n", "\n").replace('\u{00a0}', " ");
    let mut out = String::with_capacity(replaced.len());
    let mut in_run = false;
    for c in replaced.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            in_run = false;
            out.push(c);
        }
    }
    out.trim().to_string()
}

/// First user message → title: first 20 chars, ellipsis when truncated.
fn derive_title(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..20].iter().collect();
        format!("{head}…")
    } else {
        content.to_string()
    }
}

fn union_files(target: &mut Vec<String>, additions: &[String]) {
    for f in additions {
        if !target.contains(f) {
            target.push(f.clone());
        }
    }
}
