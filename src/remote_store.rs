//! Remote Conversation Store — the authoritative collection per user.
//!
//! Backed by SQLite behind a mutex; every mutation enforces ownership and
//! plan limits before touching rows, then fans the owner's fresh conversation
//! list out to live subscribers. In production this sits behind the service's
//! RPC edge; in tests it runs in-memory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use rusqlite::Connection;
use tokio::sync::mpsc;

use crate::db::repository::{self, UserStats};
use crate::db::sqlite;
use crate::error::SyncError;
use crate::limits;
use crate::models::enums::PlanTier;
use crate::models::{ChatMessage, Conversation};

type Snapshot = Vec<Conversation>;
type Subscribers = Mutex<HashMap<u64, (String, mpsc::UnboundedSender<Snapshot>)>>;

/// Handle to one user's live-update stream.
///
/// Each delivery is the user's full conversation list as of some mutation.
/// Dropping the handle unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Snapshot>,
    subscribers: Arc<Subscribers>,
}

impl Subscription {
    /// Wait for the next snapshot. `None` after `unsubscribe` or store drop.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        // Drop handles it
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.remove(&self.id);
        }
    }
}

/// Authoritative conversation store with push notification.
pub struct RemoteStore {
    conn: Mutex<Connection>,
    subscribers: Arc<Subscribers>,
    next_subscriber_id: AtomicU64,
}

impl RemoteStore {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        Ok(Self::from_connection(sqlite::open_database(path)?))
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        Ok(Self::from_connection(sqlite::open_memory_database()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Transient("conversation store lock poisoned".into()))
    }

    // ═══════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════

    /// Create a conversation for `user_id`, gated by the plan's total ceiling.
    ///
    /// `mode` (e.g. a specialist persona) is recorded as a tag so the history
    /// list can badge it.
    pub fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        plan: PlanTier,
        mode: Option<&str>,
    ) -> Result<Conversation, SyncError> {
        if user_id.is_empty() {
            return Err(SyncError::Validation("userId must not be empty".into()));
        }

        {
            let conn = self.lock_conn()?;
            let current = repository::count_for_user(&conn, user_id)?;
            limits::can_create_conversation(plan, current as u32)?;

            let mut conv = Conversation::new(user_id, title);
            if let Some(mode) = mode {
                conv.tags.push(mode.to_string());
            }
            repository::insert_conversation(&conn, &conv)?;
            drop(conn);

            self.notify(user_id)?;
            Ok(conv)
        }
    }

    /// Append a message to a conversation the user owns, gated by the plan's
    /// per-conversation ceiling.
    pub fn add_message(
        &self,
        user_id: &str,
        msg: &ChatMessage,
        plan: PlanTier,
    ) -> Result<Conversation, SyncError> {
        if msg.message.is_empty() {
            return Err(SyncError::Validation("message body must not be empty".into()));
        }

        let updated = {
            let mut conn = self.lock_conn()?;
            let conv = self.owned(&conn, &msg.conversation_id, user_id)?;
            limits::can_add_message(plan, conv.message_count)?;

            repository::append_message(&mut conn, msg, Utc::now())?;
            repository::get_conversation(&conn, &msg.conversation_id)?
                .ok_or_else(|| SyncError::NotFound("conversation".into()))?
        };

        self.notify(user_id)?;
        Ok(updated)
    }

    pub fn update_title(&self, user_id: &str, id: &str, title: &str) -> Result<(), SyncError> {
        {
            let conn = self.lock_conn()?;
            self.owned(&conn, id, user_id)?;
            repository::update_title(&conn, id, title, Utc::now())?;
        }
        self.notify(user_id)
    }

    pub fn archive_conversation(
        &self,
        user_id: &str,
        id: &str,
        archived: bool,
    ) -> Result<(), SyncError> {
        {
            let conn = self.lock_conn()?;
            self.owned(&conn, id, user_id)?;
            repository::set_archived(&conn, id, archived, Utc::now())?;
        }
        self.notify(user_id)
    }

    /// Delete a conversation the user owns. Deleting an id that does not
    /// exist (or belongs to someone else) reports `NotFound`.
    pub fn delete_conversation(&self, user_id: &str, id: &str) -> Result<(), SyncError> {
        {
            let conn = self.lock_conn()?;
            self.owned(&conn, id, user_id)?;
            repository::delete_conversation(&conn, id)?;
        }
        self.notify(user_id)
    }

    /// Insert an already-validated conversation verbatim, messages and dates
    /// included. Returns false (without writing) if the id already exists, so
    /// re-importing the same export is harmless.
    pub fn import_conversation(&self, conv: &Conversation) -> Result<bool, SyncError> {
        let imported = {
            let mut conn = self.lock_conn()?;
            if repository::get_conversation(&conn, &conv.id)?.is_some() {
                false
            } else {
                repository::insert_conversation_with_messages(&mut conn, conv)?;
                true
            }
        };
        if imported {
            self.notify(&conv.user_id)?;
        }
        Ok(imported)
    }

    /// Remove the user's conversations idle for more than `days`.
    pub fn clean_old_conversations(&self, user_id: &str, days: i64) -> Result<usize, SyncError> {
        let removed = {
            let conn = self.lock_conn()?;
            let cutoff = Utc::now() - Duration::days(days);
            repository::delete_older_than(&conn, user_id, cutoff)?
        };
        if removed > 0 {
            self.notify(user_id)?;
        }
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════

    /// Fetch one conversation if it exists and the user owns it.
    pub fn get_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<Conversation>, SyncError> {
        let conn = self.lock_conn()?;
        Ok(repository::get_conversation(&conn, id)?.filter(|c| c.user_id == user_id))
    }

    /// The user's full collection, newest-updated first.
    pub fn list_conversations(
        &self,
        user_id: &str,
        include_archived: bool,
    ) -> Result<Snapshot, SyncError> {
        let conn = self.lock_conn()?;
        Ok(repository::list_for_user(&conn, user_id, include_archived)?)
    }

    /// Everything the user owns, archived included — the export source.
    pub fn export_conversations(&self, user_id: &str) -> Result<Snapshot, SyncError> {
        self.list_conversations(user_id, true)
    }

    pub fn get_user_stats(&self, user_id: &str) -> Result<UserStats, SyncError> {
        let conn = self.lock_conn()?;
        Ok(repository::user_stats(&conn, user_id)?)
    }

    fn owned(
        &self,
        conn: &Connection,
        id: &str,
        user_id: &str,
    ) -> Result<Conversation, SyncError> {
        repository::get_conversation(conn, id)?
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| SyncError::NotFound("conversation".into()))
    }

    // ═══════════════════════════════════════════════════════════
    // Subscriptions
    // ═══════════════════════════════════════════════════════════

    /// Start a live-update stream for `user_id`.
    pub fn subscribe(&self, user_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, (user_id.to_string(), tx));
        }
        Subscription {
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Push the owner's fresh list to every live subscriber of that user.
    /// Subscribers whose receiver is gone are dropped from the registry.
    fn notify(&self, user_id: &str) -> Result<(), SyncError> {
        let snapshot = self.list_conversations(user_id, true)?;
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| SyncError::Transient("subscriber registry lock poisoned".into()))?;
        subs.retain(|_, (subscriber_user, tx)| {
            if subscriber_user != user_id {
                return true;
            }
            tx.send(snapshot.clone()).is_ok()
        });
        Ok(())
    }
}
