//! Identity seam. Login/refresh/logout flows live outside this service;
//! all it needs is a way to turn an opaque credential into a user.

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::db;

const TOKEN_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

/// What a connection credential resolves to.
#[derive(Debug, Clone)]
pub enum Identity {
    User(User),
    Anonymous,
}

pub async fn create_user(db_pool: &SqlitePool, username: &str) -> Result<User, sqlx::Error> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(username)
        .bind(Utc::now())
        .execute(db_pool)
        .await?;

    Ok(User {
        id,
        username: username.to_owned(),
    })
}

/// Mints an opaque token for a user. Deployments normally get tokens from the
/// auth service in front of this one; this writes to the same store
/// `resolve_token` reads.
pub async fn issue_token(db_pool: &SqlitePool, user_id: Uuid) -> Result<String, sqlx::Error> {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();

    sqlx::query("INSERT INTO access_tokens (token, user_id) VALUES (?, ?)")
        .bind(&token)
        .bind(user_id.to_string())
        .execute(db_pool)
        .await?;

    Ok(token)
}

/// Missing or unknown credentials resolve to `Anonymous`; only storage
/// failures are errors.
pub async fn resolve_token(
    db_pool: &SqlitePool,
    token: Option<&str>,
) -> Result<Identity, sqlx::Error> {
    let Some(token) = token else {
        warn!("connection attempt without a token");
        return Ok(Identity::Anonymous);
    };

    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT u.id, u.username FROM access_tokens t JOIN users u ON u.id = t.user_id WHERE t.token = ?",
    )
    .bind(token)
    .fetch_optional(db_pool)
    .await?;

    match row {
        Some((id, username)) => Ok(Identity::User(User {
            id: db::decode_uuid("id", &id)?,
            username,
        })),
        None => {
            warn!("unknown access token");
            Ok(Identity::Anonymous)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn issued_token_resolves_to_its_user() {
        let (pool, _dir) = db::test_pool().await;
        let user = create_user(&pool, "alice").await.expect("user");
        let token = issue_token(&pool, user.id).await.expect("token");

        match resolve_token(&pool, Some(&token)).await.expect("resolve") {
            Identity::User(resolved) => assert_eq!(resolved, user),
            Identity::Anonymous => panic!("expected a user"),
        }
    }

    #[tokio::test]
    async fn unknown_token_is_anonymous() {
        let (pool, _dir) = db::test_pool().await;
        assert!(matches!(
            resolve_token(&pool, Some("deadbeef")).await.expect("resolve"),
            Identity::Anonymous
        ));
    }

    #[tokio::test]
    async fn missing_token_is_anonymous() {
        let (pool, _dir) = db::test_pool().await;
        assert!(matches!(
            resolve_token(&pool, None).await.expect("resolve"),
            Identity::Anonymous
        ));
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let (pool, _dir) = db::test_pool().await;
        create_user(&pool, "alice").await.expect("first");
        assert!(create_user(&pool, "alice").await.is_err());
    }
}
