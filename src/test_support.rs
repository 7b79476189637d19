use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{app::build_app, config::AppConfig, state::AppState};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_state(AppState::in_memory(AppConfig::local()))
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            router: build_app(state.clone()),
            state,
        }
    }

    /// Registers an account and returns its `sid=<token>` cookie pair.
    pub async fn register(&self, email: &str, password: &str) -> String {
        let (status, headers, body) = send(
            &self.router,
            Method::POST,
            "/api/register",
            Some(json!({ "email": email, "password": password })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        session_cookie_from(&headers)
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, headers, body) = send(
            &self.router,
            Method::POST,
            "/api/login",
            Some(json!({ "email": email, "password": password })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        session_cookie_from(&headers)
    }

    /// Provisions an administrator directly through the service and logs in.
    pub async fn admin(&self, email: &str, password: &str) -> String {
        self.state
            .auth
            .ensure_admin(email, password)
            .await
            .expect("ensure admin");
        self.login(email, password).await
    }
}

pub fn session_cookie_from(headers: &HeaderMap) -> String {
    headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("Set-Cookie header")
        .to_owned()
}

pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    cookie: Option<&str>,
) -> (StatusCode, HeaderMap, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        req = req.header(header::COOKIE, cookie);
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();

    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, value)
}
