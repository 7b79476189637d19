use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, RepoError, Session, User, UserChanges};

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    /// All users, newest first.
    async fn list(&self) -> RepoResult<Vec<User>>;
    /// Fails with [`RepoError::UniqueViolation`] when the email is taken.
    async fn insert(&self, user: NewUser) -> RepoResult<User>;
    async fn update(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>>;
    async fn set_password_hash(&self, id: Uuid, hash: &str) -> RepoResult<bool>;
    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> RepoResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> RepoResult<()>;
    /// Returns the session only if it expires after `now`.
    async fn find_active(&self, sid: &str, now: OffsetDateTime) -> RepoResult<Option<Session>>;
    async fn delete(&self, sid: &str) -> RepoResult<()>;
    async fn delete_expired(&self, now: OffsetDateTime) -> RepoResult<u64>;
}

const USER_COLUMNS: &str = "id, email, first_name, last_name, password_hash, is_admin, is_active, \
                            last_login_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn list(&self) -> RepoResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn insert(&self, user: NewUser) -> RepoResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, first_name, last_name, password_hash, is_admin, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(user.is_active)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET email      = COALESCE($2, email),
                   first_name = COALESCE($3, first_name),
                   last_name  = COALESCE($4, last_name),
                   is_admin   = COALESCE($5, is_admin),
                   is_active  = COALESCE($6, is_active),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.email)
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(changes.is_admin)
        .bind(changes.is_active)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> RepoResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> RepoResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: Session) -> RepoResult<()> {
        sqlx::query("INSERT INTO sessions (sid, user_id, sess, expire) VALUES ($1, $2, $3, $4)")
            .bind(&session.sid)
            .bind(session.user_id)
            .bind(&session.sess)
            .bind(session.expire)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn find_active(&self, sid: &str, now: OffsetDateTime) -> RepoResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT sid, user_id, sess, expire
              FROM sessions
             WHERE sid = $1 AND expire > $2
            "#,
        )
        .bind(sid)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn delete(&self, sid: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM sessions WHERE sid = $1")
            .bind(sid)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> RepoResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE expire <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }
}
