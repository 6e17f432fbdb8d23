use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    username   TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS access_tokens (
    token   TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users (id)
);

CREATE TABLE IF NOT EXISTS rooms (
    id                TEXT PRIMARY KEY,
    owner_id          TEXT NOT NULL REFERENCES users (id),
    name              TEXT NOT NULL UNIQUE,
    access            TEXT NOT NULL DEFAULT 'public',
    status            TEXT NOT NULL DEFAULT 'active',
    participant_limit INTEGER NOT NULL DEFAULT 10,
    last_message_id   TEXT REFERENCES messages (id) ON DELETE SET NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS room_participants (
    room_id   TEXT NOT NULL REFERENCES rooms (id),
    user_id   TEXT NOT NULL REFERENCES users (id),
    joined_at TEXT NOT NULL,
    PRIMARY KEY (room_id, user_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    room_id    TEXT NOT NULL REFERENCES rooms (id),
    sender_id  TEXT NOT NULL REFERENCES users (id),
    kind       TEXT NOT NULL DEFAULT 'text',
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_room_created
    ON messages (room_id, created_at DESC);
"#;

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await
}

/// Idempotent; safe to run on every startup.
pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

/// TEXT uuid column -> Uuid, surfacing parse failures as column decode errors.
pub(crate) fn decode_uuid(index: &str, value: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(value).map_err(|err| sqlx::Error::ColumnDecode {
        index: index.to_owned(),
        source: Box::new(err),
    })
}

#[cfg(test)]
pub(crate) async fn test_pool() -> (SqlitePool, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = connect(&url).await.expect("connect");
    init_schema(&pool).await.expect("schema");
    (pool, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_schema_is_idempotent() {
        let (pool, _dir) = test_pool().await;
        init_schema(&pool).await.expect("second run");
    }

    #[test]
    fn decode_uuid_rejects_garbage() {
        assert!(decode_uuid("id", "not-a-uuid").is_err());
        let id = Uuid::now_v7();
        assert_eq!(decode_uuid("id", &id.to_string()).unwrap(), id);
    }
}
