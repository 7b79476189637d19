use std::sync::Arc;

use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        memory::{MemorySessionStore, MemoryUserStore},
        password::{
            hash_password_blocking, verify_against_dummy, verify_password_blocking,
            PasswordPolicy,
        },
        repo::{PgSessionStore, PgUserStore, SessionStore, UserStore},
        repo_types::{NewUser, Session, User, UserChanges},
    },
    config::AppConfig,
    error::AuthError,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validated_email(email: &str) -> Result<String, AuthError> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AuthError::validation("Invalid email format"));
    }
    Ok(email)
}

fn required(field: &str, value: &str) -> Result<String, AuthError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthError::validation(format!("{field} is required")));
    }
    Ok(value.to_owned())
}

fn optional_name(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Resolved identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

impl From<&User> for Principal {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            is_admin: u.is_admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        match role {
            Role::User => true,
            Role::Admin => self.is_admin,
        }
    }
}

/// Gate for protected operations: no principal means the caller must log in,
/// a principal without the role is refused outright.
pub fn require_role(principal: Option<&Principal>, role: Role) -> Result<&Principal, AuthError> {
    let principal = principal.ok_or(AuthError::AuthenticationRequired)?;
    if !principal.has_role(role) {
        warn!(user_id = %principal.id, ?role, "role check failed");
        return Err(AuthError::Forbidden);
    }
    Ok(principal)
}

/// Input for creating an account, either self-registered or admin-provisioned.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
}

impl NewAccount {
    pub fn member(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            first_name: None,
            last_name: None,
            is_admin: false,
            is_active: true,
        }
    }
}

/// Freshly opened session together with its owner.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub session_ttl: Duration,
    pub password_policy: PasswordPolicy,
}

impl AuthSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            session_ttl: Duration::minutes(config.session.ttl_minutes),
            password_policy: PasswordPolicy {
                min_length: config.password_min_length,
            },
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::weeks(1),
            password_policy: PasswordPolicy::default(),
        }
    }
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            users,
            sessions,
            settings,
        }
    }

    pub fn postgres(db: PgPool, settings: AuthSettings) -> Self {
        Self::new(
            Arc::new(PgUserStore::new(db.clone())),
            Arc::new(PgSessionStore::new(db)),
            settings,
        )
    }

    pub fn in_memory(settings: AuthSettings) -> Self {
        Self::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemorySessionStore::new()),
            settings,
        )
    }

    pub fn session_ttl(&self) -> Duration {
        self.settings.session_ttl
    }

    async fn create_account(&self, account: NewAccount) -> Result<User, AuthError> {
        let email = validated_email(&account.email)?;
        self.settings.password_policy.check(&account.password)?;

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = hash_password_blocking(account.password).await?;
        // A concurrent insert can still win the race; the store reports it as a
        // unique violation which converts to DuplicateEmail.
        let user = self
            .users
            .insert(NewUser {
                email,
                first_name: optional_name(account.first_name),
                last_name: optional_name(account.last_name),
                password_hash,
                is_admin: account.is_admin,
                is_active: account.is_active,
            })
            .await?;
        Ok(user)
    }

    async fn open_session(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let sid = generate_session_token();
        self.sessions
            .create(Session {
                sid: sid.clone(),
                user_id,
                sess: serde_json::json!({
                    "userId": user_id,
                    "createdAt": now.unix_timestamp(),
                }),
                expire: now + self.settings.session_ttl,
            })
            .await?;
        debug!(%user_id, "session opened");
        Ok(sid)
    }

    /// Creates a regular account and logs it in.
    #[instrument(skip(self, account), fields(email = %account.email))]
    pub async fn register(&self, account: NewAccount) -> Result<SessionGrant, AuthError> {
        let account = NewAccount {
            is_admin: false,
            is_active: true,
            ..account
        };
        let user = self.create_account(account).await?;
        let token = self.open_session(user.id).await?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(SessionGrant { token, user })
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionGrant, AuthError> {
        let email = normalize_email(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!(%email, "login unknown email");
            verify_against_dummy(password.to_owned()).await;
            return Err(AuthError::AuthenticationFailed);
        };

        let Some(hash) = user.password_hash.clone() else {
            warn!(%email, user_id = %user.id, "login on account without password");
            verify_against_dummy(password.to_owned()).await;
            return Err(AuthError::AuthenticationFailed);
        };

        let matches = verify_password_blocking(password.to_owned(), hash)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, user_id = %user.id, "stored password hash unusable");
                false
            });

        if !matches {
            warn!(%email, user_id = %user.id, "login invalid password");
            return Err(AuthError::AuthenticationFailed);
        }

        if !user.is_active {
            warn!(%email, user_id = %user.id, "login on inactive account");
            return Err(AuthError::AuthenticationFailed);
        }

        let now = OffsetDateTime::now_utc();
        self.users.record_login(user.id, now).await?;
        let token = self.open_session(user.id).await?;

        info!(user_id = %user.id, %email, "user logged in");
        Ok(SessionGrant {
            token,
            user: User {
                last_login_at: Some(now),
                ..user
            },
        })
    }

    /// Looks up the live session behind `token`. Sessions of users that have
    /// been deactivated or removed are deleted on sight.
    pub async fn resolve_session(&self, token: &str) -> Result<Option<User>, AuthError> {
        let now = OffsetDateTime::now_utc();
        let Some(session) = self.sessions.find_active(token, now).await? else {
            return Ok(None);
        };

        match self.users.find_by_id(session.user_id).await? {
            Some(user) if user.is_active => Ok(Some(user)),
            Some(user) => {
                info!(user_id = %user.id, "dropping session of inactive user");
                self.sessions.delete(token).await?;
                Ok(None)
            }
            None => {
                warn!(user_id = %session.user_id, "dropping session of missing user");
                self.sessions.delete(token).await?;
                Ok(None)
            }
        }
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.delete(token).await?;
        Ok(())
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)
    }

    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self.profile(user_id).await?;
        let Some(hash) = user.password_hash else {
            warn!(%user_id, "password change on account without password");
            return Err(AuthError::NotFound);
        };

        if !verify_password_blocking(current_password.to_owned(), hash).await? {
            warn!(%user_id, "password change with wrong current password");
            return Err(AuthError::IncorrectCurrentPassword);
        }

        self.settings.password_policy.check(new_password)?;

        let new_hash = hash_password_blocking(new_password.to_owned()).await?;
        if !self.users.set_password_hash(user_id, &new_hash).await? {
            return Err(AuthError::NotFound);
        }
        info!(%user_id, "password changed");
        Ok(())
    }

    /// Self-service update of name and email; role and status are untouched.
    #[instrument(skip(self))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<User, AuthError> {
        let changes = UserChanges {
            first_name: Some(required("First name", first_name)?),
            last_name: Some(required("Last name", last_name)?),
            email: Some(validated_email(&required("Email", email)?)?),
            ..Default::default()
        };
        let user = self
            .users
            .update(user_id, changes)
            .await?
            .ok_or(AuthError::NotFound)?;
        info!(%user_id, "profile updated");
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        Ok(self.users.list().await?)
    }

    /// Admin provisioning; unlike [`AuthService::register`] no session is opened.
    #[instrument(skip(self, account), fields(email = %account.email))]
    pub async fn create_user(&self, account: NewAccount) -> Result<User, AuthError> {
        let account = NewAccount {
            first_name: Some(required("First name", account.first_name.as_deref().unwrap_or(""))?),
            last_name: Some(required("Last name", account.last_name.as_deref().unwrap_or(""))?),
            ..account
        };
        let user = self.create_account(account).await?;
        info!(user_id = %user.id, is_admin = user.is_admin, "user created by admin");
        Ok(user)
    }

    #[instrument(skip(self, actor, changes), fields(actor_id = %actor.id))]
    pub async fn update_user(
        &self,
        actor: &Principal,
        target: Uuid,
        changes: UserChanges,
    ) -> Result<User, AuthError> {
        if actor.id == target && changes.is_active == Some(false) {
            return Err(AuthError::SelfTarget(
                "You cannot deactivate your own account".into(),
            ));
        }

        let changes = UserChanges {
            email: changes.email.as_deref().map(validated_email).transpose()?,
            first_name: changes
                .first_name
                .as_deref()
                .map(|v| required("First name", v))
                .transpose()?,
            last_name: changes
                .last_name
                .as_deref()
                .map(|v| required("Last name", v))
                .transpose()?,
            ..changes
        };

        let user = self
            .users
            .update(target, changes)
            .await?
            .ok_or(AuthError::NotFound)?;
        info!(
            user_id = %user.id,
            is_admin = user.is_admin,
            is_active = user.is_active,
            "user updated by admin"
        );
        Ok(user)
    }

    /// Logical deletion: the account is deactivated, never removed.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn deactivate_user(
        &self,
        actor: &Principal,
        target: Uuid,
    ) -> Result<User, AuthError> {
        if actor.id == target {
            return Err(AuthError::SelfTarget(
                "You cannot delete your own account".into(),
            ));
        }
        let changes = UserChanges {
            is_active: Some(false),
            ..Default::default()
        };
        let user = self
            .users
            .update(target, changes)
            .await?
            .ok_or(AuthError::NotFound)?;
        info!(user_id = %user.id, "user deactivated");
        Ok(user)
    }

    /// Grants admin rights to the user matching `email_or_id`, if any.
    pub async fn promote_to_admin(&self, email_or_id: &str) -> Result<Option<User>, AuthError> {
        let found = match Uuid::parse_str(email_or_id.trim()) {
            Ok(id) => self.users.find_by_id(id).await?,
            Err(_) => self.users.find_by_email(&normalize_email(email_or_id)).await?,
        };
        let Some(user) = found else {
            return Ok(None);
        };
        if user.is_admin {
            return Ok(Some(user));
        }
        let changes = UserChanges {
            is_admin: Some(true),
            ..Default::default()
        };
        let user = self.users.update(user.id, changes).await?;
        if let Some(user) = &user {
            info!(user_id = %user.id, email = %user.email, "user promoted to admin");
        }
        Ok(user)
    }

    /// Makes sure the configured administrator exists, is active and is an
    /// admin. An existing account keeps its password.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = validated_email(email)?;
        if let Some(existing) = self.users.find_by_email(&email).await? {
            if existing.is_admin && existing.is_active {
                return Ok(existing);
            }
            let changes = UserChanges {
                is_admin: Some(true),
                is_active: Some(true),
                ..Default::default()
            };
            let user = self
                .users
                .update(existing.id, changes)
                .await?
                .ok_or(AuthError::NotFound)?;
            info!(user_id = %user.id, "bootstrap admin promoted");
            return Ok(user);
        }

        let user = self
            .create_account(NewAccount {
                is_admin: true,
                ..NewAccount::member(email, password)
            })
            .await?;
        info!(user_id = %user.id, "bootstrap admin created");
        Ok(user)
    }

    pub async fn prune_expired_sessions(&self) -> Result<u64, AuthError> {
        let removed = self
            .sessions
            .delete_expired(OffsetDateTime::now_utc())
            .await?;
        if removed > 0 {
            debug!(removed, "expired sessions pruned");
        }
        Ok(removed)
    }
}
