//! Local Durable Store — the offline conversation mirror.
//!
//! One JSON file holds the last-known-good snapshot of the user's
//! conversations so the UI can render without the remote store. It is a
//! mirror, not a source of truth: corrupt or missing data reads as empty,
//! capacity is bounded with oldest-by-`updated_at` eviction, and no
//! cross-process consistency is promised — only the remote subscription
//! reconciles writes made elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};

use crate::config;
use crate::error::SyncError;
use crate::models::Conversation;

/// Placeholder title for conversations without a usable first message.
pub const DEFAULT_TITLE: &str = "Nueva conversación";

/// Character budget for auto-generated titles (ellipsis included).
const TITLE_MAX_CHARS: usize = 50;

/// Derive a conversation title from the first user message.
///
/// Empty input yields the placeholder. Long input is truncated at the last
/// word boundary inside the budget (falling back to a plain character cut
/// when there is none) and marked with an ellipsis.
pub fn generate_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }

    // Reserve one char for the ellipsis marker
    let head: String = trimmed.chars().take(TITLE_MAX_CHARS - 1).collect();
    let cut = match head.rfind(' ') {
        Some(pos) if pos > 0 => head[..pos].trim_end(),
        _ => head.as_str(),
    };
    format!("{cut}…")
}

/// File-backed conversation mirror with bounded capacity.
pub struct LocalStore {
    path: PathBuf,
    capacity: usize,
}

impl LocalStore {
    /// Open the store at the default location (`~/Nora/conversations.json`).
    pub fn open_default() -> Self {
        Self::new(config::local_store_path(), config::LOCAL_STORE_CAPACITY)
    }

    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert a conversation by id, evicting oldest-by-`updated_at` entries
    /// if the capacity bound is exceeded afterward.
    pub fn save(&self, conversation: &Conversation) -> Result<(), SyncError> {
        let mut all = self.get_all();
        match all.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation.clone(),
            None => all.push(conversation.clone()),
        }

        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(self.capacity);
        self.write(&all)
    }

    /// All stored conversations, newest-updated first.
    ///
    /// Missing or corrupt data reads as empty — the mirror is disposable and
    /// a broken blob must never take the UI down with it.
    pub fn get_all(&self) -> Vec<Conversation> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        let mut all: Vec<Conversation> = match serde_json::from_str(&raw) {
            Ok(all) => all,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "Discarding corrupt local store");
                return Vec::new();
            }
        };
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.get_all().into_iter().find(|c| c.id == id)
    }

    /// Case-insensitive substring search over titles and message bodies,
    /// newest-updated first.
    pub fn search(&self, query: &str) -> Vec<Conversation> {
        let needle = query.to_lowercase();
        self.get_all()
            .into_iter()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.messages
                        .iter()
                        .any(|m| m.message.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Remove a conversation. Deleting a missing id is not an error.
    pub fn delete(&self, id: &str) -> Result<(), SyncError> {
        let mut all = self.get_all();
        let before = all.len();
        all.retain(|c| c.id != id);
        if all.len() == before {
            return Ok(());
        }
        self.write(&all)
    }

    /// Drop every conversation not present in `keep` — used when a remote
    /// snapshot is authoritative on existence.
    pub fn retain_ids(&self, keep: &[String]) -> Result<(), SyncError> {
        let mut all = self.get_all();
        let before = all.len();
        all.retain(|c| keep.contains(&c.id));
        if all.len() == before {
            return Ok(());
        }
        self.write(&all)
    }

    /// Remove conversations whose `updated_at` is older than the cutoff.
    /// Returns the count removed.
    pub fn prune_older_than(&self, days: i64) -> Result<usize, SyncError> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut all = self.get_all();
        let before = all.len();
        all.retain(|c| c.updated_at >= cutoff);
        let removed = before - all.len();
        if removed > 0 {
            self.write(&all)?;
        }
        Ok(removed)
    }

    fn write(&self, all: &[Conversation]) -> Result<(), SyncError> {
        let json = serde_json::to_string(all)
            .map_err(|e| SyncError::Transient(format!("local store serialization: {e}")))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash mid-write leaves the old snapshot intact
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store(dir: &TempDir, capacity: usize) -> LocalStore {
        LocalStore::new(dir.path().join("conversations.json"), capacity)
    }

    fn conv_updated_at(user: &str, title: &str, days_ago: i64) -> Conversation {
        let mut conv = Conversation::new(user, title);
        conv.updated_at = Utc::now() - Duration::days(days_ago);
        conv
    }

    // ── Title generation ──

    #[test]
    fn generate_title_empty_yields_placeholder() {
        assert_eq!(generate_title(""), "Nueva conversación");
        assert_eq!(generate_title("   "), "Nueva conversación");
    }

    #[test]
    fn generate_title_short_unchanged() {
        assert_eq!(generate_title("short"), "short");
        let exactly_50 = "a".repeat(50);
        assert_eq!(generate_title(&exactly_50), exactly_50);
    }

    #[test]
    fn generate_title_unbroken_input_truncates_to_budget() {
        let title = generate_title(&"x".repeat(60));
        let chars = title.chars().count();
        assert!(title.ends_with('…'));
        assert!((47..=50).contains(&chars), "got {chars} chars: {title}");
    }

    #[test]
    fn generate_title_cuts_at_word_boundary() {
        let msg = "cuéntame sobre la historia de la medicina moderna y sus efectos";
        let title = generate_title(msg);
        assert!(title.ends_with('…'));
        assert!(title.chars().count() <= 50);
        // No mid-word cut: everything before the marker is a prefix of words
        let body = title.trim_end_matches('…');
        assert!(msg.starts_with(body));
        assert!(msg[body.len()..].starts_with(' '));
    }

    #[test]
    fn generate_title_multibyte_safe() {
        let msg = "ñ".repeat(80);
        let title = generate_title(&msg);
        assert!(title.ends_with('…'));
        assert!(title.chars().count() <= 50);
    }

    // ── Save / load ──

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);

        let mut conv = Conversation::new("user-1", "Hola");
        let id = conv.id.clone();
        conv.push_message(ChatMessage::user(&id, "primera"));
        store.save(&conv).unwrap();

        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.title, "Hola");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.updated_at, conv.updated_at);
    }

    #[test]
    fn save_upserts_by_id() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);

        let mut conv = Conversation::new("user-1", "Antes");
        store.save(&conv).unwrap();
        conv.title = "Después".into();
        store.save(&conv).unwrap();

        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Después");
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir, 10).get_all().is_empty());
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        fs::write(store.path(), "{not json]").unwrap();
        assert!(store.get_all().is_empty());
        // And the store recovers on the next write
        store.save(&Conversation::new("user-1", "Nueva")).unwrap();
        assert_eq!(store.get_all().len(), 1);
    }

    // ── Capacity eviction ──

    #[test]
    fn capacity_evicts_oldest_by_updated_at() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100);

        let oldest = conv_updated_at("user-1", "la más vieja", 99);
        store.save(&oldest).unwrap();
        for i in 0..99 {
            store.save(&conv_updated_at("user-1", &format!("c{i}"), i)).unwrap();
        }
        assert_eq!(store.get_all().len(), 100);

        let newcomer = Conversation::new("user-1", "la nueva");
        store.save(&newcomer).unwrap();

        let all = store.get_all();
        assert_eq!(all.len(), 100);
        assert!(all.iter().any(|c| c.id == newcomer.id));
        assert!(all.iter().all(|c| c.id != oldest.id), "oldest must be evicted");
    }

    // ── Search ──

    #[test]
    fn search_matches_title_and_messages_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);

        let by_title = Conversation::new("user-1", "Recetas de Cocina");
        store.save(&by_title).unwrap();

        let mut by_body = Conversation::new("user-1", "Otra cosa");
        let id = by_body.id.clone();
        by_body.push_message(ChatMessage::user(&id, "háblame de COCINA italiana"));
        store.save(&by_body).unwrap();

        store.save(&Conversation::new("user-1", "Sin relación")).unwrap();

        let hits = store.search("cocina");
        assert_eq!(hits.len(), 2);
        // Newest-updated first
        assert!(hits[0].updated_at >= hits[1].updated_at);
    }

    // ── Delete / prune ──

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let conv = Conversation::new("user-1", "Efímera");
        store.save(&conv).unwrap();

        store.delete(&conv.id).unwrap();
        store.delete(&conv.id).unwrap(); // second delete is a no-op
        store.delete("never-existed").unwrap();
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn prune_removes_only_stale_entries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        store.save(&conv_updated_at("user-1", "vieja", 120)).unwrap();
        store.save(&conv_updated_at("user-1", "fresca", 5)).unwrap();

        let removed = store.prune_older_than(90).unwrap();
        assert_eq!(removed, 1);
        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "fresca");
    }

    #[test]
    fn retain_ids_drops_everything_else() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let keep = Conversation::new("user-1", "queda");
        let drop = Conversation::new("user-1", "se va");
        store.save(&keep).unwrap();
        store.save(&drop).unwrap();

        store.retain_ids(&[keep.id.clone()]).unwrap();
        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, keep.id);
    }
}
