//! Low-level SQL for the conversation collection.
//!
//! Ownership checks and limit enforcement live in `remote_store`; this layer
//! only maps rows. Point reads return `Option` rather than erroring on
//! absence, matching the not-found-is-not-an-error contract.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::DatabaseError;
use crate::models::enums::MessageType;
use crate::models::{ChatMessage, Conversation};

/// Aggregate numbers for a user's collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub conversation_count: u32,
    pub archived_count: u32,
    pub message_count: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Optional message fields packed into the `extra` column as JSON.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MessageExtras {
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    specialty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    advanced_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_results: Option<Value>,
}

impl MessageExtras {
    fn from_message(msg: &ChatMessage) -> Option<String> {
        let extras = MessageExtras {
            tokens_used: msg.tokens_used,
            image_url: msg.image_url.clone(),
            image_id: msg.image_id.clone(),
            mode: msg.mode.clone(),
            specialty: msg.specialty.clone(),
            advanced_mode: msg.advanced_mode,
            search_used: msg.search_used,
            search_results: msg.search_results.clone(),
        };
        let json = serde_json::to_string(&extras).ok()?;
        if json == "{}" {
            None
        } else {
            Some(json)
        }
    }

    fn apply(raw: Option<&str>, msg: &mut ChatMessage) {
        let Some(extras) = raw.and_then(|s| serde_json::from_str::<MessageExtras>(s).ok()) else {
            return;
        };
        msg.tokens_used = extras.tokens_used;
        msg.image_url = extras.image_url;
        msg.image_id = extras.image_id;
        msg.mode = extras.mode;
        msg.specialty = extras.specialty;
        msg.advanced_mode = extras.advanced_mode;
        msg.search_used = extras.search_used;
        msg.search_results = extras.search_results;
    }
}

pub fn insert_conversation(conn: &Connection, conv: &Conversation) -> Result<(), DatabaseError> {
    let tags = serde_json::to_string(&conv.tags)
        .map_err(|e| DatabaseError::CorruptPayload(e.to_string()))?;
    conn.execute(
        "INSERT INTO conversations
            (id, user_id, title, message_count, created_at, updated_at, last_activity, is_archived, tags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            conv.id,
            conv.user_id,
            conv.title,
            conv.message_count,
            conv.created_at,
            conv.updated_at,
            conv.last_activity,
            conv.is_archived,
            tags,
        ],
    )?;
    Ok(())
}

pub fn get_conversation(
    conn: &Connection,
    id: &str,
) -> Result<Option<Conversation>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, user_id, title, message_count, created_at, updated_at, last_activity, is_archived, tags
         FROM conversations WHERE id = ?1",
        params![id],
        conversation_from_row,
    );

    let mut conv = match result {
        Ok(conv) => conv,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    conv.messages = get_messages(conn, id)?;
    Ok(Some(conv))
}

/// List a user's conversations (messages included), newest-updated first.
/// Archived conversations are excluded unless `include_archived` is set.
pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
    include_archived: bool,
) -> Result<Vec<Conversation>, DatabaseError> {
    let sql = if include_archived {
        "SELECT id, user_id, title, message_count, created_at, updated_at, last_activity, is_archived, tags
         FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC"
    } else {
        "SELECT id, user_id, title, message_count, created_at, updated_at, last_activity, is_archived, tags
         FROM conversations WHERE user_id = ?1 AND is_archived = 0 ORDER BY updated_at DESC"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![user_id], conversation_from_row)?;

    let mut conversations = Vec::new();
    for row in rows {
        let mut conv = row?;
        conv.messages = get_messages(conn, &conv.id)?;
        conversations.push(conv);
    }
    Ok(conversations)
}

fn get_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<ChatMessage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, type, message, timestamp, extra
         FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
    )?;

    let rows = stmt.query_map(params![conversation_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, DateTime<Utc>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (id, kind, body, timestamp, extra) = row?;
        let mut msg = ChatMessage {
            id,
            kind: MessageType::from_str(&kind)?,
            message: body,
            timestamp,
            conversation_id: conversation_id.to_string(),
            tokens_used: None,
            image_url: None,
            image_id: None,
            mode: None,
            specialty: None,
            advanced_mode: None,
            search_used: None,
            search_results: None,
        };
        MessageExtras::apply(extra.as_deref(), &mut msg);
        messages.push(msg);
    }
    Ok(messages)
}

/// Append a message and bump the conversation's derived fields in one
/// transaction, so a concurrent reader never observes a half-applied append.
pub fn append_message(
    conn: &mut Connection,
    msg: &ChatMessage,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO messages (id, conversation_id, seq, type, message, timestamp, extra)
         SELECT ?1, ?2, COALESCE(MAX(seq), 0) + 1, ?3, ?4, ?5, ?6
         FROM messages WHERE conversation_id = ?2",
        params![
            msg.id,
            msg.conversation_id,
            msg.kind.as_str(),
            msg.message,
            msg.timestamp,
            MessageExtras::from_message(msg),
        ],
    )?;

    tx.execute(
        "UPDATE conversations
         SET message_count = message_count + 1,
             updated_at = MAX(updated_at, ?2),
             last_activity = MAX(last_activity, ?2)
         WHERE id = ?1",
        params![msg.conversation_id, now],
    )?;

    tx.commit()?;
    Ok(())
}

/// Insert a conversation together with its messages, preserving the given
/// counts and dates. Used by import, where the payload is already complete.
pub fn insert_conversation_with_messages(
    conn: &mut Connection,
    conv: &Conversation,
) -> Result<(), DatabaseError> {
    let tags = serde_json::to_string(&conv.tags)
        .map_err(|e| DatabaseError::CorruptPayload(e.to_string()))?;
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO conversations
            (id, user_id, title, message_count, created_at, updated_at, last_activity, is_archived, tags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            conv.id,
            conv.user_id,
            conv.title,
            conv.messages.len() as u32,
            conv.created_at,
            conv.updated_at,
            conv.last_activity,
            conv.is_archived,
            tags,
        ],
    )?;

    for (i, msg) in conv.messages.iter().enumerate() {
        tx.execute(
            "INSERT INTO messages (id, conversation_id, seq, type, message, timestamp, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                msg.id,
                conv.id,
                (i + 1) as i64,
                msg.kind.as_str(),
                msg.message,
                msg.timestamp,
                MessageExtras::from_message(msg),
            ],
        )?;
    }

    tx.commit()?;
    Ok(())
}

/// Update a conversation's title. Returns false if the row does not exist.
pub fn update_title(
    conn: &Connection,
    id: &str,
    title: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE conversations SET title = ?2, updated_at = MAX(updated_at, ?3) WHERE id = ?1",
        params![id, title, now],
    )?;
    Ok(rows > 0)
}

/// Flip the archived flag. Returns false if the row does not exist.
pub fn set_archived(
    conn: &Connection,
    id: &str,
    archived: bool,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE conversations SET is_archived = ?2, updated_at = MAX(updated_at, ?3) WHERE id = ?1",
        params![id, archived, now],
    )?;
    Ok(rows > 0)
}

/// Delete a conversation and its messages (CASCADE). Returns false if absent.
pub fn delete_conversation(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let rows = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

/// Total (non-archived) conversations a user owns.
pub fn count_for_user(conn: &Connection, user_id: &str) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND is_archived = 0",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Delete a user's conversations not updated since the cutoff.
/// Returns the number removed.
pub fn delete_older_than(
    conn: &Connection,
    user_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let rows = conn.execute(
        "DELETE FROM conversations WHERE user_id = ?1 AND updated_at < ?2",
        params![user_id, cutoff],
    )?;
    Ok(rows)
}

pub fn user_stats(conn: &Connection, user_id: &str) -> Result<UserStats, DatabaseError> {
    conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(is_archived), 0),
            COALESCE(SUM(message_count), 0),
            MAX(last_activity)
         FROM conversations WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(UserStats {
                conversation_count: row.get::<_, i64>(0)? as u32,
                archived_count: row.get::<_, i64>(1)? as u32,
                message_count: row.get::<_, i64>(2)? as u32,
                last_activity: row.get(3)?,
            })
        },
    )
    .map_err(DatabaseError::from)
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let tags_json: String = row.get(8)?;
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        messages: Vec::new(),
        message_count: row.get::<_, i64>(3)? as u32,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        last_activity: row.get(6)?,
        is_archived: row.get(7)?,
        // Corrupt tags are treated as no tags, never as a fatal error
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn seeded(user_id: &str, title: &str, conn: &Connection) -> Conversation {
        let conv = Conversation::new(user_id, title);
        insert_conversation(conn, &conv).unwrap();
        conv
    }

    #[test]
    fn insert_and_get_round_trip() {
        let conn = open_memory_database().unwrap();
        let mut conv = Conversation::new("user-1", "Hola");
        conv.tags = vec!["salud".into()];
        insert_conversation(&conn, &conv).unwrap();

        let loaded = get_conversation(&conn, &conv.id).unwrap().unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.title, "Hola");
        assert_eq!(loaded.tags, vec!["salud".to_string()]);
        assert_eq!(loaded.created_at, conv.created_at);
    }

    #[test]
    fn get_missing_returns_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_conversation(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn append_message_bumps_count_atomically() {
        let mut conn = open_memory_database().unwrap();
        let conv = seeded("user-1", "Test", &conn);

        let mut msg = ChatMessage::user(&conv.id, "primera pregunta");
        msg.tokens_used = Some(12);
        append_message(&mut conn, &msg, Utc::now()).unwrap();

        let loaded = get_conversation(&conn, &conv.id).unwrap().unwrap();
        assert_eq!(loaded.message_count, 1);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].message, "primera pregunta");
        assert_eq!(loaded.messages[0].tokens_used, Some(12));
        assert!(loaded.updated_at >= conv.updated_at);
    }

    #[test]
    fn messages_keep_insertion_order() {
        let mut conn = open_memory_database().unwrap();
        let conv = seeded("user-1", "Orden", &conn);

        for text in ["a", "b", "c"] {
            append_message(&mut conn, &ChatMessage::user(&conv.id, text), Utc::now()).unwrap();
        }

        let loaded = get_conversation(&conn, &conv.id).unwrap().unwrap();
        let bodies: Vec<_> = loaded.messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[test]
    fn insert_with_messages_preserves_dates_and_count() {
        let mut conn = open_memory_database().unwrap();
        let mut conv = Conversation::new("user-1", "Importada");
        let id = conv.id.clone();
        conv.push_message(ChatMessage::user(&id, "hola"));
        conv.push_message(ChatMessage::ai(&id, "buenas"));
        let stamps = (conv.created_at, conv.updated_at);

        insert_conversation_with_messages(&mut conn, &conv).unwrap();

        let loaded = get_conversation(&conn, &conv.id).unwrap().unwrap();
        assert_eq!(loaded.message_count, 2);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!((loaded.created_at, loaded.updated_at), stamps);
        assert_eq!(loaded.messages[0].message, "hola");
    }

    #[test]
    fn list_excludes_archived_by_default() {
        let conn = open_memory_database().unwrap();
        let keep = seeded("user-1", "Activa", &conn);
        let archived = seeded("user-1", "Archivada", &conn);
        set_archived(&conn, &archived.id, true, Utc::now()).unwrap();

        let listed = list_for_user(&conn, "user-1", false).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, keep.id);

        let all = list_for_user(&conn, "user-1", true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn list_isolates_users() {
        let conn = open_memory_database().unwrap();
        seeded("user-1", "Mía", &conn);
        seeded("user-2", "Ajena", &conn);

        let listed = list_for_user(&conn, "user-1", true).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Mía");
    }

    #[test]
    fn delete_cascades_messages() {
        let mut conn = open_memory_database().unwrap();
        let conv = seeded("user-1", "Borrar", &conn);
        append_message(&mut conn, &ChatMessage::user(&conv.id, "hola"), Utc::now()).unwrap();

        assert!(delete_conversation(&conn, &conv.id).unwrap());
        assert!(!delete_conversation(&conn, &conv.id).unwrap());

        let orphans: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conv.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn delete_older_than_prunes_by_updated_at() {
        let conn = open_memory_database().unwrap();
        let mut old = Conversation::new("user-1", "Vieja");
        old.updated_at = Utc::now() - chrono::Duration::days(120);
        insert_conversation(&conn, &old).unwrap();
        seeded("user-1", "Reciente", &conn);

        let cutoff = Utc::now() - chrono::Duration::days(90);
        let removed = delete_older_than(&conn, "user-1", cutoff).unwrap();
        assert_eq!(removed, 1);
        assert!(get_conversation(&conn, &old.id).unwrap().is_none());
    }

    #[test]
    fn user_stats_aggregates() {
        let mut conn = open_memory_database().unwrap();
        let a = seeded("user-1", "A", &conn);
        let b = seeded("user-1", "B", &conn);
        append_message(&mut conn, &ChatMessage::user(&a.id, "hola"), Utc::now()).unwrap();
        append_message(&mut conn, &ChatMessage::ai(&a.id, "buenas"), Utc::now()).unwrap();
        set_archived(&conn, &b.id, true, Utc::now()).unwrap();

        let stats = user_stats(&conn, "user-1").unwrap();
        assert_eq!(stats.conversation_count, 2);
        assert_eq!(stats.archived_count, 1);
        assert_eq!(stats.message_count, 2);
        assert!(stats.last_activity.is_some());
    }
}
