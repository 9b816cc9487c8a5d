use std::sync::Arc;

use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::email::EmailService;
use crate::gateway::state::GatewayState;
use crate::presence::Presence;
use crate::storage::ObjectStorage;
use crate::unfurl::Unfurler;

/// Shared application state passed to all handlers via Axum's State
/// extractor.
///
/// `PgPool` and the Redis pool are internally Arc-wrapped; everything else is
/// wrapped explicitly so cloning `AppState` is cheap. The gateway registries
/// are fields here rather than globals; only gateway-mode tasks touch them.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<ServerConfig>,
    pub redis: fred::clients::Pool,
    pub bus: EventBus,
    pub presence: Presence,
    pub storage: Arc<ObjectStorage>,
    pub email: Arc<dyn EmailService>,
    pub unfurler: Arc<Unfurler>,
    pub gateway: Arc<GatewayState>,
}

impl AppState {
    /// Wire up state from configuration plus the already-initialized pools.
    pub fn new(
        config: ServerConfig,
        db: sqlx::PgPool,
        redis: fred::clients::Pool,
        storage: ObjectStorage,
        email: Arc<dyn EmailService>,
        unfurler: Unfurler,
    ) -> Self {
        let presence = Presence::new(
            redis.clone(),
            config.env.clone(),
            config.limits.gateway_conn_stale_sec,
        );
        let bus = EventBus::new(redis.clone());
        Self {
            db,
            config: Arc::new(config),
            redis,
            bus,
            presence,
            storage: Arc::new(storage),
            email,
            unfurler: Arc::new(unfurler),
            gateway: Arc::new(GatewayState::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_implements_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
