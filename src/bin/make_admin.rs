//! Grants administrator rights to an existing account.
//!
//! Usage: `make-admin <user-email-or-id>`

use blog_auth::{
    auth::services::{AuthService, AuthSettings},
    config::AppConfig,
    db,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "blog_auth=info".into()))
        .init();

    let Some(target) = std::env::args().nth(1) else {
        anyhow::bail!("usage: make-admin <user-email-or-id>");
    };

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config).await?;
    let auth = AuthService::postgres(pool, AuthSettings::from_config(&config));

    match auth.promote_to_admin(&target).await? {
        Some(user) => {
            println!("{} (ID: {}) is now an admin", user.email, user.id);
        }
        None => {
            eprintln!("User not found: {target}");
            eprintln!("Available users:");
            for user in auth.list_users().await? {
                let marker = if user.is_admin { " (ADMIN)" } else { "" };
                eprintln!("- {} (ID: {}){}", user.email, user.id, marker);
            }
            std::process::exit(1);
        }
    }
    Ok(())
}
