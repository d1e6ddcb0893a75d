use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    db::connection::DbPool,
    services::broadcast::Broadcaster,
    services::kv::KvStore,
    services::login_security::LoginSecurity,
    services::presence::PresenceHub,
    services::revocation::RevocationService,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub kv: Arc<dyn KvStore>,
    pub revocation: Arc<RevocationService>,
    pub login_security: Arc<LoginSecurity>,
    pub presence: Arc<PresenceHub>,
    pub broadcaster: Arc<Broadcaster>,
    pub config: Config,
}

impl AppState {
    /// Wires the in-process services together: the broadcaster is the
    /// presence hub's event sink, and both security services share the KV.
    pub fn assemble(pool: DbPool, kv: Arc<dyn KvStore>, config: Config) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(config.ws_outbound_queue_cap));
        let presence = Arc::new(PresenceHub::new(broadcaster.clone()));
        let revocation = Arc::new(RevocationService::new(kv.clone()));
        let login_security = Arc::new(LoginSecurity::new(
            kv.clone(),
            config.login_lock_threshold,
            Duration::from_secs(config.login_lock_window_seconds),
        ));

        Self {
            pool,
            kv,
            revocation,
            login_security,
            presence,
            broadcaster,
            config,
        }
    }
}
