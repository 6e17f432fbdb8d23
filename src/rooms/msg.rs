//! Append-only message persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};
use uuid::Uuid;

use crate::auth::User;
use crate::db;
use crate::rooms::membership::DenyReason;
use crate::rooms::registry::RoomStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

/// A persisted chat message, shaped the way it goes over the wire.
/// `sender_username` is denormalized in so clients can label lines without
/// a second lookup.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender: Uuid,
    pub room: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sender_username: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl FromRow<'_, SqliteRow> for Message {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: db::decode_uuid("id", &row.try_get::<String, _>("id")?)?,
            content: row.try_get("content")?,
            sender: db::decode_uuid("sender_id", &row.try_get::<String, _>("sender_id")?)?,
            room: db::decode_uuid("room_id", &row.try_get::<String, _>("room_id")?)?,
            timestamp: row.try_get("created_at")?,
            sender_username: row.try_get("sender_username")?,
            kind: row.try_get("kind")?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SaveMessageError {
    #[error("{}", .0.as_str())]
    Denied(DenyReason),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Persists a message and moves the room's last-message pointer in the same
/// transaction. The sender must be the room's owner or a current participant;
/// that is an authorization boundary, not input validation.
pub async fn save_message(
    db_pool: &SqlitePool,
    sender: &User,
    room_id: Uuid,
    content: &str,
    kind: MessageKind,
) -> Result<Message, SaveMessageError> {
    let mut tx = db_pool.begin().await?;

    let room: Option<(RoomStatus, bool)> = sqlx::query_as(
        "SELECT r.status, \
                r.owner_id = ? OR EXISTS (SELECT 1 FROM room_participants p \
                                          WHERE p.room_id = r.id AND p.user_id = ?) \
         FROM rooms r WHERE r.id = ?",
    )
    .bind(sender.id.to_string())
    .bind(sender.id.to_string())
    .bind(room_id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let member = match room {
        None => return Err(SaveMessageError::Denied(DenyReason::RoomNotAvailable)),
        Some((status, _)) if status != RoomStatus::Active => {
            return Err(SaveMessageError::Denied(DenyReason::RoomNotAvailable));
        }
        Some((_, member)) => member,
    };
    if !member {
        return Err(SaveMessageError::Denied(DenyReason::NotAMember));
    }

    let message = Message {
        id: Uuid::now_v7(),
        content: content.to_owned(),
        sender: sender.id,
        room: room_id,
        timestamp: Utc::now(),
        sender_username: sender.username.clone(),
        kind,
    };

    sqlx::query(
        "INSERT INTO messages (id, room_id, sender_id, kind, content, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(message.id.to_string())
    .bind(message.room.to_string())
    .bind(message.sender.to_string())
    .bind(message.kind)
    .bind(&message.content)
    .bind(message.timestamp)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE rooms SET last_message_id = ?, updated_at = ? WHERE id = ?")
        .bind(message.id.to_string())
        .bind(message.timestamp)
        .bind(message.room.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(message)
}

/// Newest first, id as the tiebreak for same-instant messages.
pub async fn recent_messages(
    db_pool: &SqlitePool,
    room_id: Uuid,
    limit: u32,
) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as(
        "SELECT m.id, m.content, m.sender_id, m.room_id, m.kind, m.created_at, \
                u.username AS sender_username \
         FROM messages m JOIN users u ON u.id = m.sender_id \
         WHERE m.room_id = ? \
         ORDER BY m.created_at DESC, m.id DESC \
         LIMIT ?",
    )
    .bind(room_id.to_string())
    .bind(limit)
    .fetch_all(db_pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::membership::request_join;
    use crate::rooms::registry::{Room, RoomAccess, create_room, get_room};
    use crate::{auth, db};

    async fn setup() -> (SqlitePool, tempfile::TempDir, auth::User, Room) {
        let (pool, dir) = db::test_pool().await;
        let owner = auth::create_user(&pool, "owner").await.expect("owner");
        let room = create_room(&pool, owner.id, "general", RoomAccess::Public, 10)
            .await
            .expect("room");
        (pool, dir, owner, room)
    }

    #[tokio::test]
    async fn saved_message_moves_the_last_message_pointer() {
        let (pool, _dir, owner, room) = setup().await;

        let message = save_message(&pool, &owner, room.id, "hello", MessageKind::Text)
            .await
            .expect("saved");

        let fetched = get_room(&pool, room.id).await.unwrap().expect("room");
        assert_eq!(fetched.last_message_id, Some(message.id));
        assert!(fetched.updated_at >= room.updated_at);
    }

    #[tokio::test]
    async fn nonmembers_are_rejected_and_nothing_persists() {
        let (pool, _dir, _owner, room) = setup().await;
        let outsider = auth::create_user(&pool, "outsider").await.unwrap();

        let err = save_message(&pool, &outsider, room.id, "hi", MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SaveMessageError::Denied(DenyReason::NotAMember)
        ));

        assert!(recent_messages(&pool, room.id, 10).await.unwrap().is_empty());
        let fetched = get_room(&pool, room.id).await.unwrap().unwrap();
        assert!(fetched.last_message_id.is_none());
    }

    #[tokio::test]
    async fn missing_or_inactive_room_is_not_available() {
        let (pool, _dir, owner, room) = setup().await;

        let err = save_message(&pool, &owner, Uuid::now_v7(), "hi", MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SaveMessageError::Denied(DenyReason::RoomNotAvailable)
        ));

        sqlx::query("UPDATE rooms SET status = 'inactive' WHERE id = ?")
            .bind(room.id.to_string())
            .execute(&pool)
            .await
            .unwrap();
        let err = save_message(&pool, &owner, room.id, "hi", MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SaveMessageError::Denied(DenyReason::RoomNotAvailable)
        ));
    }

    #[tokio::test]
    async fn recent_messages_come_back_newest_first() {
        let (pool, _dir, owner, room) = setup().await;
        let alice = auth::create_user(&pool, "alice").await.unwrap();
        request_join(&pool, alice.id, room.id).await.unwrap();

        for (sender, text) in [(&owner, "one"), (&alice, "two"), (&owner, "three")] {
            save_message(&pool, sender, room.id, text, MessageKind::Text)
                .await
                .expect("saved");
        }

        let recent = recent_messages(&pool, room.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "three");
        assert_eq!(recent[0].sender_username, "owner");
        assert_eq!(recent[1].content, "two");
        assert_eq!(recent[1].sender_username, "alice");
    }

    #[test]
    fn message_serializes_with_wire_field_names() {
        let message = Message {
            id: Uuid::now_v7(),
            content: "hi".to_owned(),
            sender: Uuid::now_v7(),
            room: Uuid::now_v7(),
            timestamp: Utc::now(),
            sender_username: "owner".to_owned(),
            kind: MessageKind::Image,
        };

        let value = serde_json::to_value(&message).unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "id",
            "content",
            "sender",
            "room",
            "timestamp",
            "sender_username",
            "type",
        ] {
            assert!(object.contains_key(key), "{key}");
        }
        assert_eq!(value["type"], "image");
    }
}
