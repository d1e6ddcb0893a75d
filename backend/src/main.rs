use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tempo_backend::{
    app::build_router,
    config::Config,
    db::connection::create_pool,
    db::redis::create_redis_pool,
    services::kv::{KvStore, MemoryKv, RedisKv},
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tempo_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        database_url = %config.database_url,
        signing_key = %mask_secret(&config.signing_key),
        access_ttl_seconds = config.access_ttl_seconds,
        refresh_ttl_seconds = config.refresh_ttl_seconds,
        ws_outbound_queue_cap = config.ws_outbound_queue_cap,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // KV: Redis when configured, in-process fallback otherwise
    let kv: Arc<dyn KvStore> = match create_redis_pool(&config).await? {
        Some(redis_pool) => Arc::new(RedisKv::new(redis_pool)),
        None => Arc::new(MemoryKv::new()),
    };

    let state = AppState::assemble(pool, kv, config);

    // Presence is a derived cache: rebuild it from the store before serving.
    state.presence.reload(&state.pool).await?;

    spawn_heartbeat(&state);
    spawn_presence_reload(&state);

    let app = build_router(state.clone());

    let addr: SocketAddr = state.config.bind_addr.parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Pings every realtime connection, drops idle ones, and enforces token
/// revocation within one heartbeat interval.
fn spawn_heartbeat(state: &AppState) {
    let broadcaster = state.broadcaster.clone();
    let revocation = state.revocation.clone();
    let interval = Duration::from_secs(state.config.ws_heartbeat_seconds.max(1));
    let idle_timeout = Duration::from_secs(state.config.ws_idle_timeout_seconds.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            broadcaster.heartbeat_sweep(&revocation, idle_timeout).await;
        }
    });
}

/// Periodic reconciliation against the store, bounding presence divergence.
fn spawn_presence_reload(state: &AppState) {
    let seconds = state.config.presence_reload_seconds;
    if seconds == 0 {
        return;
    }
    let presence = state.presence.clone();
    let pool = state.pool.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately and startup already reloaded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = presence.reload(&pool).await {
                tracing::warn!("periodic presence reload failed: {err:#}");
            }
        }
    });
}
