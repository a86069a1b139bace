//! Synchronization Coordinator — the session-scoped glue between the remote
//! store, the local mirror and the in-memory working copy.
//!
//! Every append re-reads the freshest copy of the conversation (remote
//! preferred, mirror fallback) and merges the working copy into it by message
//! id before writing, so a stale working copy can never clobber messages that
//! arrived elsewhere. The remote store is authoritative on existence: sign-in
//! and live snapshots drop mirror entries the remote no longer has.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config;
use crate::error::SyncError;
use crate::local_store::{self, LocalStore};
use crate::models::enums::PlanTier;
use crate::models::{ChatMessage, Conversation};
use crate::remote_store::RemoteStore;

/// Lifecycle of the coordinator's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No user signed in.
    Uninitialized,
    /// Initial snapshot merge in progress.
    Syncing,
    /// Live: mirror reconciled, subscription draining.
    Ready,
}

struct Session {
    user_id: String,
    plan: PlanTier,
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
    /// Working copy of the open conversation; `None` id side means a draft
    /// that has not been created remotely yet.
    active: Option<Conversation>,
    draft_mode: Option<String>,
    busy: bool,
    drain_task: Option<JoinHandle<()>>,
    maintenance_task: Option<JoinHandle<()>>,
}

pub struct SyncCoordinator {
    remote: Arc<RemoteStore>,
    local: Arc<LocalStore>,
    inner: Mutex<Inner>,
}

impl SyncCoordinator {
    pub fn new(remote: Arc<RemoteStore>, local: Arc<LocalStore>) -> Self {
        Self {
            remote,
            local,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                session: None,
                active: None,
                draft_mode: None,
                busy: false,
                drain_task: None,
                maintenance_task: None,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, SyncError> {
        self.inner
            .lock()
            .map_err(|_| SyncError::Transient("coordinator lock poisoned".into()))
    }

    pub fn state(&self) -> SessionState {
        self.lock().map(|g| g.state).unwrap_or(SessionState::Uninitialized)
    }

    /// Whether a send is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.lock().map(|g| g.busy).unwrap_or(false)
    }

    fn session(&self, guard: &MutexGuard<'_, Inner>) -> Result<(String, PlanTier), SyncError> {
        guard
            .session
            .as_ref()
            .map(|s| (s.user_id.clone(), s.plan))
            .ok_or_else(|| SyncError::Validation("no user is signed in".into()))
    }

    // ═══════════════════════════════════════════════════════════
    // Session lifecycle
    // ═══════════════════════════════════════════════════════════

    /// Sign a user in: reconcile the mirror against the remote snapshot, then
    /// keep it live by draining the push subscription in a background task.
    pub async fn sign_in(&self, user_id: &str, plan: PlanTier) -> Result<(), SyncError> {
        self.sign_out();

        {
            let mut guard = self.lock()?;
            guard.state = SessionState::Syncing;
            guard.session = Some(Session {
                user_id: user_id.to_string(),
                plan,
            });
        }

        let snapshot = self.remote.list_conversations(user_id, true)?;
        merge_snapshot(&self.local, &snapshot);

        let mut subscription = self.remote.subscribe(user_id);
        let local = Arc::clone(&self.local);
        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                merge_snapshot(&local, &snapshot);
            }
        });

        let mut guard = self.lock()?;
        guard.drain_task = Some(task);
        guard.state = SessionState::Ready;
        Ok(())
    }

    /// End the session. The mirror is kept for the next sign-in of the same
    /// account; it is reconciled (and foreign entries dropped) at that point.
    pub fn sign_out(&self) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        if let Some(task) = guard.drain_task.take() {
            task.abort();
        }
        if let Some(task) = guard.maintenance_task.take() {
            task.abort();
        }
        guard.session = None;
        guard.active = None;
        guard.draft_mode = None;
        guard.busy = false;
        guard.state = SessionState::Uninitialized;
    }

    // ═══════════════════════════════════════════════════════════
    // Conversation lifecycle
    // ═══════════════════════════════════════════════════════════

    /// Open a draft: nothing is created remotely until the first message.
    pub fn start_new_conversation(&self, mode: Option<&str>) -> Result<(), SyncError> {
        let mut guard = self.lock()?;
        self.session(&guard)?;
        guard.active = None;
        guard.draft_mode = mode.map(str::to_string);
        Ok(())
    }

    /// Open an existing conversation as the working copy.
    pub fn load_conversation(&self, id: &str) -> Result<Conversation, SyncError> {
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };
        let conv = self
            .freshest(&user_id, id)?
            .ok_or_else(|| SyncError::NotFound("conversation".into()))?;

        let mut guard = self.lock()?;
        guard.active = Some(conv.clone());
        guard.draft_mode = None;
        Ok(conv)
    }

    /// Send a user message. A draft is promoted first: the conversation is
    /// created remotely with a title derived from this message.
    pub fn send_user_message(&self, text: &str) -> Result<Conversation, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::Validation("message must not be empty".into()));
        }

        let (user_id, plan, active_id, draft_mode) = {
            let mut guard = self.lock()?;
            let (user_id, plan) = self.session(&guard)?;
            if guard.busy {
                return Err(SyncError::Validation("a message is already being sent".into()));
            }
            guard.busy = true;
            (
                user_id,
                plan,
                guard.active.as_ref().map(|c| c.id.clone()),
                guard.draft_mode.clone(),
            )
        };

        let result = (|| {
            let conversation_id = match active_id {
                Some(id) => id,
                None => {
                    let title = local_store::generate_title(text);
                    let conv = self.remote.create_conversation(
                        &user_id,
                        &title,
                        plan,
                        draft_mode.as_deref(),
                    )?;
                    conv.id
                }
            };
            self.append(&user_id, plan, ChatMessage::user(&conversation_id, text))
        })();

        if let Ok(mut guard) = self.inner.lock() {
            guard.busy = false;
            if result.is_ok() {
                guard.draft_mode = None;
            }
        }
        result
    }

    /// Record the assistant's reply in the active conversation.
    pub fn record_assistant_reply(
        &self,
        text: &str,
        tokens_used: Option<u32>,
    ) -> Result<Conversation, SyncError> {
        let (user_id, plan, active_id) = {
            let guard = self.lock()?;
            let (user_id, plan) = self.session(&guard)?;
            let id = guard
                .active
                .as_ref()
                .map(|c| c.id.clone())
                .ok_or_else(|| SyncError::Validation("no conversation is open".into()))?;
            (user_id, plan, id)
        };
        let mut msg = ChatMessage::ai(&active_id, text);
        msg.tokens_used = tokens_used;
        self.append(&user_id, plan, msg)
    }

    /// Append with the freshest-copy merge rule: re-read the conversation,
    /// fold the working copy's messages into it by id, then write.
    pub fn add_message(&self, msg: ChatMessage) -> Result<Conversation, SyncError> {
        let (user_id, plan) = {
            let guard = self.lock()?;
            self.session(&guard)?
        };
        self.append(&user_id, plan, msg)
    }

    fn append(
        &self,
        user_id: &str,
        plan: PlanTier,
        msg: ChatMessage,
    ) -> Result<Conversation, SyncError> {
        let mut base = self
            .freshest(user_id, &msg.conversation_id)?
            .ok_or_else(|| SyncError::NotFound("conversation".into()))?;

        // Fold working-copy messages the freshest copy doesn't have yet
        let stale_extras: Vec<ChatMessage> = {
            let guard = self.lock()?;
            match &guard.active {
                Some(active) if active.id == base.id => active.messages.clone(),
                _ => Vec::new(),
            }
        };
        for extra in stale_extras {
            if base.push_message(extra.clone()) {
                self.remote.add_message(user_id, &extra, plan)?;
            }
        }

        let updated = self.remote.add_message(user_id, &msg, plan)?;
        self.mirror(&updated);

        let mut guard = self.lock()?;
        guard.active = Some(updated.clone());
        Ok(updated)
    }

    pub fn update_conversation_title(&self, id: &str, title: &str) -> Result<(), SyncError> {
        if title.trim().is_empty() {
            return Err(SyncError::Validation("title must not be empty".into()));
        }
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };
        self.remote.update_title(&user_id, id, title)?;
        if let Some(updated) = self.remote.get_conversation(&user_id, id)? {
            self.mirror(&updated);
            let mut guard = self.lock()?;
            if guard.active.as_ref().is_some_and(|c| c.id == id) {
                guard.active = Some(updated);
            }
        }
        Ok(())
    }

    /// Delete everywhere. Deleting an id that is already gone succeeds, so a
    /// retried delete (or one raced by another device) is a no-op.
    pub fn delete_conversation(&self, id: &str) -> Result<(), SyncError> {
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };
        match self.remote.delete_conversation(&user_id, id) {
            Ok(()) | Err(SyncError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.local.delete(id)?;

        let mut guard = self.lock()?;
        if guard.active.as_ref().is_some_and(|c| c.id == id) {
            guard.active = None;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════

    /// Case-insensitive search over the mirror, so it works offline.
    ///
    /// Scoped like every other read: a session is required, and mirror
    /// entries owned by anyone else (residue from a prior account) are
    /// never served.
    pub fn search_conversations(&self, query: &str) -> Result<Vec<Conversation>, SyncError> {
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };
        Ok(self
            .local
            .search(query)
            .into_iter()
            .filter(|c| c.user_id == user_id)
            .collect())
    }

    /// Up to `limit` conversations, newest-updated first. Falls back to the
    /// mirror when the remote store is unreachable.
    pub fn get_recent_conversations(&self, limit: usize) -> Result<Vec<Conversation>, SyncError> {
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };
        let mut list = match self.remote.list_conversations(&user_id, false) {
            Ok(list) => list,
            Err(SyncError::Transient(err)) => {
                tracing::warn!(%err, "Remote list unavailable, serving mirror");
                self.local
                    .get_all()
                    .into_iter()
                    .filter(|c| c.user_id == user_id)
                    .collect()
            }
            Err(e) => return Err(e),
        };
        list.truncate(limit);
        Ok(list)
    }

    /// Freshest copy of one conversation: remote preferred, mirror fallback.
    fn freshest(&self, user_id: &str, id: &str) -> Result<Option<Conversation>, SyncError> {
        match self.remote.get_conversation(user_id, id) {
            Ok(found) => Ok(found),
            Err(SyncError::Transient(err)) => {
                tracing::warn!(%err, "Remote read unavailable, serving mirror");
                Ok(self.local.get(id).filter(|c| c.user_id == user_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Mirror writes are best-effort: a full disk must not fail the send.
    fn mirror(&self, conv: &Conversation) {
        if let Err(err) = self.local.save(conv) {
            tracing::warn!(%err, "Failed to mirror conversation locally");
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Import / export
    // ═══════════════════════════════════════════════════════════

    /// The user's entire collection as a pretty-printed JSON array.
    pub fn export_conversations(&self) -> Result<String, SyncError> {
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };
        let all = self.remote.export_conversations(&user_id)?;
        serde_json::to_string_pretty(&all)
            .map_err(|e| SyncError::Transient(format!("export serialization: {e}")))
    }

    /// Import a previously exported JSON array. Entries that are malformed,
    /// belong to another user, or already exist are skipped. Returns the
    /// number actually imported.
    pub fn import_conversations(&self, json: &str) -> Result<usize, SyncError> {
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };

        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| SyncError::Validation(format!("import is not valid JSON: {e}")))?;
        let entries = value
            .as_array()
            .ok_or_else(|| SyncError::Validation("import must be a JSON array".into()))?;

        let mut imported = 0;
        for entry in entries {
            let conv = match Conversation::from_untrusted(entry) {
                Ok(conv) => conv,
                Err(err) => {
                    tracing::warn!(%err, "Skipping malformed import entry");
                    continue;
                }
            };
            if conv.user_id != user_id {
                tracing::warn!(id = %conv.id, "Skipping import entry owned by another user");
                continue;
            }
            if self.remote.import_conversation(&conv)? {
                self.mirror(&conv);
                imported += 1;
            }
        }
        Ok(imported)
    }

    // ═══════════════════════════════════════════════════════════
    // Maintenance
    // ═══════════════════════════════════════════════════════════

    /// Start the daily retention sweep for the signed-in user. Failures are
    /// logged and retried on the next tick; they never surface to the UI.
    pub fn spawn_maintenance(&self) -> Result<(), SyncError> {
        let user_id = {
            let guard = self.lock()?;
            self.session(&guard)?.0
        };
        let remote = Arc::clone(&self.remote);
        let local = Arc::clone(&self.local);

        let task = tokio::spawn(async move {
            // The interval's first tick is immediate, so one sweep runs right
            // away and short-lived sessions still get pruned.
            let mut tick = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            loop {
                tick.tick().await;
                match remote.clean_old_conversations(&user_id, config::PRUNE_AFTER_DAYS) {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "Retention sweep removed conversations"),
                    Err(err) => tracing::warn!(%err, "Remote retention sweep failed"),
                }
                if let Err(err) = local.prune_older_than(config::PRUNE_AFTER_DAYS) {
                    tracing::warn!(%err, "Mirror retention sweep failed");
                }
            }
        });

        let mut guard = self.lock()?;
        if let Some(previous) = guard.maintenance_task.replace(task) {
            previous.abort();
        }
        Ok(())
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.sign_out();
    }
}

/// Fold a remote snapshot into the mirror: per conversation the newer
/// `updated_at` wins, and mirror entries absent from the snapshot are
/// dropped (the remote is authoritative on existence).
fn merge_snapshot(local: &LocalStore, snapshot: &[Conversation]) {
    for conv in snapshot {
        let keep_local = local
            .get(&conv.id)
            .is_some_and(|mine| mine.updated_at > conv.updated_at);
        if keep_local {
            continue;
        }
        if let Err(err) = local.save(conv) {
            tracing::warn!(id = %conv.id, %err, "Failed to mirror snapshot entry");
        }
    }
    let ids: Vec<String> = snapshot.iter().map(|c| c.id.clone()).collect();
    if let Err(err) = local.retain_ids(&ids) {
        tracing::warn!(%err, "Failed to drop stale mirror entries");
    }
}
