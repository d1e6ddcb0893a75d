//! Purges refresh sessions that no longer gate anything: expired rows and
//! rows revoked more than 30 days ago. Run from cron.

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tempo_backend::{config::Config, db::connection::create_pool, repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_cleanup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let pool = create_pool(&config.database_url).await?;

    let removed = repositories::session::delete_defunct(&pool, Utc::now()).await?;
    tracing::info!(removed, "defunct refresh sessions purged");

    Ok(())
}
