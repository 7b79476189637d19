use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, LoginRequest, MessageResponse, PublicUser, RegisterRequest,
            UpdateProfileRequest,
        },
        extractors::{CurrentUser, SessionToken},
        services::NewAccount,
    },
    error::AuthError,
    extract::AppJson,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/user", get(get_me))
        .route("/user/profile", patch(update_profile))
        .route("/user/password", patch(change_password))
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let cfg = &state.config.session;
    Cookie::build((cfg.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(cfg.cookie_secure)
        .max_age(state.auth.session_ttl())
        .build()
}

fn cleared_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build(state.config.session.cookie_name.clone())
        .path("/")
        .build()
}

#[instrument(skip(state, jar, payload))]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<PublicUser>), AuthError> {
    let account = NewAccount {
        first_name: payload.first_name,
        last_name: payload.last_name,
        ..NewAccount::member(payload.email, payload.password)
    };
    let grant = state.auth.register(account).await?;
    let user = PublicUser::from(&grant.user);
    let jar = jar.add(session_cookie(&state, grant.token));
    Ok((StatusCode::CREATED, jar, Json(user)))
}

#[instrument(skip(state, token, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    jar: CookieJar,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<(CookieJar, Json<PublicUser>), AuthError> {
    let grant = state
        .auth
        .authenticate(&payload.email, &payload.password)
        .await?;

    // a fresh login replaces whatever session the client carried before
    if let Some(previous) = token {
        if let Err(e) = state.auth.logout(&previous).await {
            warn!(error = ?e, "could not revoke previous session");
        }
    }

    let user = PublicUser::from(&grant.user);
    Ok((jar.add(session_cookie(&state, grant.token)), Json(user)))
}

#[instrument(skip(state, token, jar))]
pub async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AuthError> {
    if let Some(token) = token {
        state.auth.logout(&token).await?;
    }
    Ok((
        jar.remove(cleared_cookie(&state)),
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state.auth.profile(principal.id).await?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state
        .auth
        .update_profile(
            principal.id,
            &payload.first_name,
            &payload.last_name,
            &payload.email,
        )
        .await?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .auth
        .change_password(
            principal.id,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;
    Ok(Json(MessageResponse::new("Password changed successfully")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::{header::SET_COOKIE, Method, StatusCode};
    use serde_json::json;
    use time::OffsetDateTime;

    use crate::{
        auth::{
            memory::{MemorySessionStore, MemoryUserStore},
            repo::{RepoResult, SessionStore},
            repo_types::{RepoError, Session},
            services::{AuthService, AuthSettings},
        },
        config::AppConfig,
        state::AppState,
        test_support::{send, session_cookie_from, TestApp},
    };

    /// Session store whose deletes always fail.
    struct UndeletableSessions(MemorySessionStore);

    #[async_trait]
    impl SessionStore for UndeletableSessions {
        async fn create(&self, session: Session) -> RepoResult<()> {
            self.0.create(session).await
        }

        async fn find_active(&self, sid: &str, now: OffsetDateTime) -> RepoResult<Option<Session>> {
            self.0.find_active(sid, now).await
        }

        async fn delete(&self, _sid: &str) -> RepoResult<()> {
            Err(RepoError::Other(anyhow::anyhow!("session store unavailable")))
        }

        async fn delete_expired(&self, now: OffsetDateTime) -> RepoResult<u64> {
            self.0.delete_expired(now).await
        }
    }

    #[tokio::test]
    async fn register_sets_cookie_and_hides_digest() {
        let app = TestApp::new();
        let (status, headers, body) = send(
            &app.router,
            Method::POST,
            "/api/register",
            Some(json!({
                "email": "alice@example.com",
                "password": "Secret123!",
                "firstName": "Alice",
                "lastName": "Liddell"
            })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        let set_cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("sid="));
        assert!(set_cookie.contains("HttpOnly"));
        assert_eq!(body["email"], "alice@example.com");
        assert_eq!(body["firstName"], "Alice");
        assert_eq!(body["isAdmin"], false);
        assert!(body.get("passwordHash").is_none());

        let cookie = session_cookie_from(&headers);
        let (status, _, me) =
            send(&app.router, Method::GET, "/api/user", None, Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn duplicate_registration_is_bad_request() {
        let app = TestApp::new();
        app.register("alice@example.com", "Secret123!").await;
        let (status, _, body) = send(
            &app.router,
            Method::POST,
            "/api/register",
            Some(json!({ "email": "alice@example.com", "password": "Secret123!" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "DUPLICATE_EMAIL");
    }

    #[tokio::test]
    async fn login_failure_message_is_generic() {
        let app = TestApp::new();
        app.register("alice@example.com", "Secret123!").await;

        let (s1, _, unknown) = send(
            &app.router,
            Method::POST,
            "/api/login",
            Some(json!({ "email": "ghost@example.com", "password": "Secret123!" })),
            None,
        )
        .await;
        let (s2, _, wrong) = send(
            &app.router,
            Method::POST,
            "/api/login",
            Some(json!({ "email": "alice@example.com", "password": "Nope1234!" })),
            None,
        )
        .await;

        assert_eq!(s1, StatusCode::UNAUTHORIZED);
        assert_eq!(s2, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown, wrong);
    }

    #[tokio::test]
    async fn me_requires_session() {
        let app = TestApp::new();
        let (status, _, body) = send(&app.router, Method::GET, "/api/user", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "AUTHENTICATION_REQUIRED");

        let (status, _, _) = send(
            &app.router,
            Method::GET,
            "/api/user",
            None,
            Some("sid=not-a-real-session"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bearer_token_is_accepted() {
        let app = TestApp::new();
        let cookie = app.register("alice@example.com", "Secret123!").await;
        let token = cookie.trim_start_matches("sid=").to_owned();

        let req = axum::http::Request::builder()
            .method(Method::GET)
            .uri("/api/user")
            .header("authorization", format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let res = tower::ServiceExt::oneshot(app.router.clone(), req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_clears_cookie() {
        let app = TestApp::new();
        let cookie = app.register("alice@example.com", "Secret123!").await;

        let (status, headers, _) =
            send(&app.router, Method::POST, "/api/logout", None, Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        let cleared = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.starts_with("sid="));
        assert!(cleared.contains("Max-Age=0"));

        let (status, _, _) = send(&app.router, Method::GET, "/api/user", None, Some(&cookie)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) =
            send(&app.router, Method::POST, "/api/logout", None, Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = send(&app.router, Method::POST, "/api/logout", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn profile_update_and_password_change() {
        let app = TestApp::new();
        let cookie = app.register("alice@example.com", "Secret123!").await;

        let (status, _, body) = send(
            &app.router,
            Method::PATCH,
            "/api/user/profile",
            Some(json!({ "firstName": "Alice", "lastName": "L", "email": "bad" })),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, _, body) = send(
            &app.router,
            Method::PATCH,
            "/api/user/profile",
            Some(json!({ "firstName": "Alice", "lastName": "L", "email": "alice@example.org" })),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "alice@example.org");

        let (status, _, body) = send(
            &app.router,
            Method::PATCH,
            "/api/user/password",
            Some(json!({ "currentPassword": "Wrong123!", "newPassword": "Fresh456!" })),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INCORRECT_CURRENT_PASSWORD");

        let (status, _, _) = send(
            &app.router,
            Method::PATCH,
            "/api/user/password",
            Some(json!({ "currentPassword": "Secret123!", "newPassword": "Fresh456!" })),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = send(
            &app.router,
            Method::POST,
            "/api/login",
            Some(json!({ "email": "alice@example.org", "password": "Fresh456!" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn login_replaces_previous_session() {
        let app = TestApp::new();
        let first = app.register("alice@example.com", "Secret123!").await;

        let (status, headers, _) = send(
            &app.router,
            Method::POST,
            "/api/login",
            Some(json!({ "email": "alice@example.com", "password": "Secret123!" })),
            Some(&first),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let second = session_cookie_from(&headers);
        assert_ne!(first, second);

        let (status, _, _) = send(&app.router, Method::GET, "/api/user", None, Some(&first)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _, _) = send(&app.router, Method::GET, "/api/user", None, Some(&second)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_bodies_are_validation_errors() {
        let app = TestApp::new();

        let (status, _, body) = send(
            &app.router,
            Method::POST,
            "/api/register",
            Some(json!({ "email": "alice@example.com" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert!(!body["message"].as_str().unwrap().contains("line 1"));

        let (status, _, body) =
            send(&app.router, Method::POST, "/api/register", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let cookie = app.register("alice@example.com", "Secret123!").await;
        let (status, _, body) = send(
            &app.router,
            Method::PATCH,
            "/api/user/profile",
            Some(json!({ "email": "a@b.co" })),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, _, body) = send(
            &app.router,
            Method::PATCH,
            "/api/user/password",
            Some(json!({ "currentPassword": 12345678, "newPassword": "Fresh456!" })),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn login_succeeds_when_previous_session_cannot_be_revoked() {
        let auth = AuthService::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(UndeletableSessions(MemorySessionStore::new())),
            AuthSettings::default(),
        );
        let app = TestApp::with_state(AppState::from_parts(
            Arc::new(auth),
            Arc::new(AppConfig::local()),
        ));
        let first = app.register("alice@example.com", "Secret123!").await;

        let (status, headers, body) = send(
            &app.router,
            Method::POST,
            "/api/login",
            Some(json!({ "email": "alice@example.com", "password": "Secret123!" })),
            Some(&first),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let second = session_cookie_from(&headers);
        assert_ne!(first, second);

        let (status, _, me) =
            send(&app.router, Method::GET, "/api/user", None, Some(&second)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "alice@example.com");
    }
}
