//! Join/leave/kick decisions. Every mutation is a single guarded statement,
//! so two racing joins near capacity can never both observe a free seat.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::rooms::registry::{self, RoomAccess, RoomStatus};

/// Outcome of a join request. Denials are data, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted { newly_added: bool },
    Denied(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RoomNotAvailable,
    RoomFull,
    PrivateRoom,
    NotAMember,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::RoomNotAvailable => "room not available",
            DenyReason::RoomFull => "room is full",
            DenyReason::PrivateRoom => "room is private",
            DenyReason::NotAMember => "not a member of this room",
        }
    }
}

/// Admits `user_id` into the room, or says why not. The capacity check and
/// the insert run as one statement; a zero-row outcome is classified after
/// the fact in policy order (available, member, full, private).
pub async fn request_join(
    db_pool: &SqlitePool,
    user_id: Uuid,
    room_id: Uuid,
) -> Result<Admission, sqlx::Error> {
    let inserted = sqlx::query(
        "INSERT INTO room_participants (room_id, user_id, joined_at) \
         SELECT r.id, ?, ? FROM rooms r \
         WHERE r.id = ? AND r.status = 'active' AND r.access = 'public' \
           AND (SELECT COUNT(*) FROM room_participants p WHERE p.room_id = r.id) < r.participant_limit \
         ON CONFLICT (room_id, user_id) DO NOTHING",
    )
    .bind(user_id.to_string())
    .bind(Utc::now())
    .bind(room_id.to_string())
    .execute(db_pool)
    .await?
    .rows_affected();

    if inserted == 1 {
        return Ok(Admission::Granted { newly_added: true });
    }

    let Some(room) = registry::get_room(db_pool, room_id).await? else {
        return Ok(Admission::Denied(DenyReason::RoomNotAvailable));
    };
    if room.status != RoomStatus::Active {
        return Ok(Admission::Denied(DenyReason::RoomNotAvailable));
    }
    if is_participant(db_pool, room_id, user_id).await? {
        return Ok(Admission::Granted { newly_added: false });
    }
    if registry::participant_count(db_pool, room_id).await? >= i64::from(room.participant_limit) {
        return Ok(Admission::Denied(DenyReason::RoomFull));
    }
    if room.access == RoomAccess::Private {
        return Ok(Admission::Denied(DenyReason::PrivateRoom));
    }
    // The insert saw no free seat; this re-read ran after someone left.
    Ok(Admission::Denied(DenyReason::RoomFull))
}

/// Removes the user's seat. Fails for the owner, for non-participants and
/// for missing or inactive rooms.
pub async fn request_leave(
    db_pool: &SqlitePool,
    user_id: Uuid,
    room_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let removed = sqlx::query(
        "DELETE FROM room_participants \
         WHERE room_id = ? AND user_id = ? \
           AND EXISTS (SELECT 1 FROM rooms r \
                       WHERE r.id = room_participants.room_id \
                         AND r.status = 'active' \
                         AND r.owner_id <> room_participants.user_id)",
    )
    .bind(room_id.to_string())
    .bind(user_id.to_string())
    .execute(db_pool)
    .await?
    .rows_affected();
    Ok(removed == 1)
}

/// Owner-only forced removal. Fails for non-owners, for the owner as target,
/// for absent targets and for missing or inactive rooms.
pub async fn remove_participant(
    db_pool: &SqlitePool,
    owner_id: Uuid,
    room_id: Uuid,
    target_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let removed = sqlx::query(
        "DELETE FROM room_participants \
         WHERE room_id = ? AND user_id = ? \
           AND EXISTS (SELECT 1 FROM rooms r \
                       WHERE r.id = room_participants.room_id \
                         AND r.status = 'active' \
                         AND r.owner_id = ? \
                         AND r.owner_id <> room_participants.user_id)",
    )
    .bind(room_id.to_string())
    .bind(target_id.to_string())
    .bind(owner_id.to_string())
    .execute(db_pool)
    .await?
    .rows_affected();
    Ok(removed == 1)
}

async fn is_participant(
    db_pool: &SqlitePool,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_as::<_, ()>(
        "SELECT 1 FROM room_participants WHERE room_id = ? AND user_id = ?",
    )
    .bind(room_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(db_pool)
    .await?;
    Ok(row.is_some())
}
