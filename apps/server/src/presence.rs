//! Distributed presence registry.
//!
//! One sorted set per user: member = connection id, score = last-seen ms.
//! Every operation is safe under concurrent writers from multiple gateway
//! nodes; stale eviction is an idempotent `ZREMRANGEBYSCORE`.

use fred::prelude::*;
use tidepool_shared::ids::{ConnectionId, UserId};
use tidepool_shared::models::Status;
use tidepool_shared::time::now_ms;

use crate::store::users::UserRow;

#[derive(Clone)]
pub struct Presence {
    redis: fred::clients::Pool,
    env: String,
    stale_secs: i64,
}

impl Presence {
    pub fn new(redis: fred::clients::Pool, env: String, stale_secs: i64) -> Self {
        Self {
            redis,
            env,
            stale_secs,
        }
    }

    fn key(&self, user_id: &UserId) -> String {
        format!("{}-gateway-connections-v2:{}", self.env, user_id)
    }

    /// Record a new connection with the current timestamp.
    pub async fn register(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> Result<(), fred::error::Error> {
        self.redis
            .zadd(
                self.key(user_id),
                None,
                None,
                false,
                false,
                (now_ms() as f64, connection_id.as_str()),
            )
            .await
    }

    /// Refresh the last-seen score after a successful heartbeat.
    pub async fn touch(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> Result<(), fred::error::Error> {
        self.register(user_id, connection_id).await
    }

    pub async fn unregister(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> Result<(), fred::error::Error> {
        self.redis
            .zrem(self.key(user_id), connection_id.as_str())
            .await
    }

    /// Evict connections whose last heartbeat is past the staleness window,
    /// then count what is left. Eviction keeps users from being stuck online
    /// after a gateway node dies without unregistering.
    pub async fn count_active(&self, user_id: &UserId) -> Result<u64, fred::error::Error> {
        let key = self.key(user_id);
        let cutoff = now_ms() - self.stale_secs * 1000;
        let _: u64 = self
            .redis
            .zremrangebyscore(&key, 0.0, cutoff as f64)
            .await?;
        self.redis.zcard(&key).await
    }

    /// Derived status: any active connection yields the user's default
    /// status, otherwise offline.
    pub async fn status_for(&self, user: &UserRow) -> Result<Status, fred::error::Error> {
        let active = self.count_active(&user.id).await?;
        Ok(if active > 0 {
            user.default_status
        } else {
            Status::Offline
        })
    }

    /// Like `status_for`, but degrades to offline when the registry is
    /// unreachable. Used on paths that must not fail the request.
    pub async fn status_or_offline(&self, user: &UserRow) -> Status {
        match self.status_for(user).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "presence lookup failed");
                Status::Offline
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence() -> Presence {
        let config = fred::types::config::Config::from_url("redis://localhost:6379").unwrap();
        let pool = fred::clients::Pool::new(config, None, None, None, 1).unwrap();
        Presence::new(pool, "staging".to_string(), 600)
    }

    #[test]
    fn key_uses_env_prefix_and_v2_suffix() {
        let p = presence();
        let key = p.key(&UserId::from("u123456789"));
        assert_eq!(key, "staging-gateway-connections-v2:u123456789");
    }

    #[test]
    fn staleness_window_is_configurable() {
        let config = fred::types::config::Config::from_url("redis://localhost:6379").unwrap();
        let pool = fred::clients::Pool::new(config, None, None, None, 1).unwrap();
        let p = Presence::new(pool, "prod".to_string(), 120);
        assert_eq!(p.stale_secs, 120);
        assert!(p.key(&UserId::from("u1")).starts_with("prod-"));
    }
}
