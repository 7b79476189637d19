use std::time::Duration;

use blog_auth::{app, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "blog_auth=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    if let Some(admin) = &app_state.config.bootstrap_admin {
        if let Err(e) = app_state.auth.ensure_admin(&admin.email, &admin.password).await {
            tracing::warn!(
                error = ?e,
                email = %admin.email,
                "bootstrap admin not provisioned; continuing"
            );
        }
    }

    // Expired sessions are invisible to lookups already; this only reclaims rows.
    let auth = app_state.auth.clone();
    let every = Duration::from_secs(app_state.config.session.prune_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = auth.prune_expired_sessions().await {
                tracing::warn!(error = ?e, "session pruning failed");
            }
        }
    });

    app::serve(app::build_app(app_state)).await
}
