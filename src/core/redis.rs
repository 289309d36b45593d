use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Takes `key` for `owner` unless someone else holds it.
    ///
    /// Without a connection the lease is granted: polling degrades to the
    /// single-process guarantee instead of stopping.
    pub(crate) async fn try_acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(true);
        };

        let acquired: Option<String> = cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut manager)
            .await?;

        Ok(acquired.is_some())
    }

    /// Deletes `key` only while `owner` still holds it.
    pub(crate) async fn release_lease(&self, key: &str, owner: &str) -> Result<bool, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(false);
        };

        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            end
            return 0
        "#,
        );

        let deleted: i64 = script.key(key).arg(owner).invoke_async(&mut manager).await?;
        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RedisHandle, RedisHealth};

    #[tokio::test]
    async fn disconnected_handle_grants_leases() {
        let redis = RedisHandle::new("redis://127.0.0.1:6379/1".to_string());

        let first = redis.try_acquire_lease("lease:a", "worker-1", Duration::from_secs(5)).await;
        let second = redis.try_acquire_lease("lease:a", "worker-2", Duration::from_secs(5)).await;

        assert!(first.expect("lease"));
        assert!(second.expect("lease"));
        assert!(!redis.release_lease("lease:a", "worker-1").await.expect("release"));
        assert!(matches!(redis.health().await, RedisHealth::Disconnected));
    }
}
