//! Authoritative room metadata. Participant rows are written only by the
//! membership service; nothing transport-facing touches them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};
use uuid::Uuid;

use crate::db;

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 255;
pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 50;
pub const DEFAULT_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RoomAccess {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub access: RoomAccess,
    pub status: RoomStatus,
    pub participant_limit: u32,
    pub last_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Room {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: db::decode_uuid("id", &row.try_get::<String, _>("id")?)?,
            owner_id: db::decode_uuid("owner_id", &row.try_get::<String, _>("owner_id")?)?,
            name: row.try_get("name")?,
            access: row.try_get("access")?,
            status: row.try_get("status")?,
            participant_limit: row.try_get("participant_limit")?,
            last_message_id: row
                .try_get::<Option<String>, _>("last_message_id")?
                .as_deref()
                .map(|id| db::decode_uuid("last_message_id", id))
                .transpose()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateRoomError {
    #[error("{0}")]
    InvalidName(String),
    #[error("room limit must be between {MIN_LIMIT} and {MAX_LIMIT}, got {0}")]
    InvalidLimit(u32),
    #[error("a room with this name already exists")]
    NameTaken,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Creates a room with its owner seeded as the first participant, in one
/// transaction. The owner's seat is permanent; leave/kick never free it.
pub async fn create_room(
    db_pool: &SqlitePool,
    owner_id: Uuid,
    name: &str,
    access: RoomAccess,
    participant_limit: u32,
) -> Result<Room, CreateRoomError> {
    validate_name(name)?;
    if !(MIN_LIMIT..=MAX_LIMIT).contains(&participant_limit) {
        return Err(CreateRoomError::InvalidLimit(participant_limit));
    }

    let now = Utc::now();
    let room = Room {
        id: Uuid::now_v7(),
        owner_id,
        name: name.to_owned(),
        access,
        status: RoomStatus::Active,
        participant_limit,
        last_message_id: None,
        created_at: now,
        updated_at: now,
    };

    let mut tx = db_pool.begin().await?;
    sqlx::query(
        "INSERT INTO rooms (id, owner_id, name, access, status, participant_limit, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(room.id.to_string())
    .bind(room.owner_id.to_string())
    .bind(&room.name)
    .bind(room.access)
    .bind(room.status)
    .bind(room.participant_limit)
    .bind(room.created_at)
    .bind(room.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if err
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation())
        {
            CreateRoomError::NameTaken
        } else {
            CreateRoomError::Db(err)
        }
    })?;

    sqlx::query("INSERT INTO room_participants (room_id, user_id, joined_at) VALUES (?, ?, ?)")
        .bind(room.id.to_string())
        .bind(room.owner_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(room)
}

pub async fn get_room(db_pool: &SqlitePool, room_id: Uuid) -> Result<Option<Room>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, owner_id, name, access, status, participant_limit, last_message_id, created_at, updated_at \
         FROM rooms WHERE id = ?",
    )
    .bind(room_id.to_string())
    .fetch_optional(db_pool)
    .await
}

pub async fn participant_count(db_pool: &SqlitePool, room_id: Uuid) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM room_participants WHERE room_id = ?")
            .bind(room_id.to_string())
            .fetch_one(db_pool)
            .await?;
    Ok(count)
}

fn validate_name(name: &str) -> Result<(), CreateRoomError> {
    let len = name.chars().count();
    if len < MIN_NAME_LEN {
        return Err(CreateRoomError::InvalidName(format!(
            "room name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    if len > MAX_NAME_LEN {
        return Err(CreateRoomError::InvalidName(format!(
            "room name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == ' ')
        || !name.chars().any(char::is_alphanumeric)
    {
        return Err(CreateRoomError::InvalidName(
            "room name may only contain letters, numbers and spaces".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth, db};

    async fn setup() -> (SqlitePool, tempfile::TempDir, auth::User) {
        let (pool, dir) = db::test_pool().await;
        let owner = auth::create_user(&pool, "owner").await.expect("owner");
        (pool, dir, owner)
    }

    #[tokio::test]
    async fn create_room_seeds_owner_as_participant() {
        let (pool, _dir, owner) = setup().await;
        let room = create_room(&pool, owner.id, "general", RoomAccess::Public, 10)
            .await
            .expect("room");

        assert_eq!(participant_count(&pool, room.id).await.unwrap(), 1);

        let fetched = get_room(&pool, room.id).await.unwrap().expect("present");
        assert_eq!(fetched.owner_id, owner.id);
        assert_eq!(fetched.access, RoomAccess::Public);
        assert_eq!(fetched.status, RoomStatus::Active);
        assert_eq!(fetched.participant_limit, 10);
        assert!(fetched.last_message_id.is_none());
    }

    #[tokio::test]
    async fn get_room_missing_is_none() {
        let (pool, _dir) = db::test_pool().await;
        assert!(get_room(&pool, Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn room_names_must_be_unique() {
        let (pool, _dir, owner) = setup().await;
        create_room(&pool, owner.id, "general", RoomAccess::Public, 10)
            .await
            .expect("first");
        let err = create_room(&pool, owner.id, "general", RoomAccess::Public, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CreateRoomError::NameTaken));
    }

    #[tokio::test]
    async fn room_name_format_is_enforced() {
        let (pool, _dir, owner) = setup().await;
        for bad in ["ab", &"x".repeat(256), "name!", "   "] {
            let err = create_room(&pool, owner.id, bad, RoomAccess::Public, 10)
                .await
                .unwrap_err();
            assert!(matches!(err, CreateRoomError::InvalidName(_)), "{bad:?}");
        }
        create_room(&pool, owner.id, "room 42", RoomAccess::Public, 10)
            .await
            .expect("valid name");
    }

    #[tokio::test]
    async fn room_limit_range_is_enforced() {
        let (pool, _dir, owner) = setup().await;
        for bad in [0, 51] {
            let err = create_room(&pool, owner.id, "sized", RoomAccess::Public, bad)
                .await
                .unwrap_err();
            assert!(matches!(err, CreateRoomError::InvalidLimit(_)));
        }
        create_room(&pool, owner.id, "sized", RoomAccess::Public, MIN_LIMIT)
            .await
            .expect("minimum limit");
    }
}
