//! Redis-backed coordinator (`SET key value NX PX ttl`).

use super::{Coordinator, CoordinatorError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct RedisCoordinator {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCoordinator {
    /// Parses the URL only; the connection is opened on first use.
    pub fn new(redis_url: &str) -> Result<Self, CoordinatorError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CoordinatorError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))?;
        debug!("Connected to lock coordinator");
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection after an I/O failure so the next call reconnects.
    async fn map_error(&self, e: redis::RedisError) -> CoordinatorError {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            warn!("Lock coordinator connection lost: {}", e);
            self.connection.lock().await.take();
            CoordinatorError::Unavailable(e.to_string())
        } else {
            CoordinatorError::Command(e.to_string())
        }
    }
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let reply = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, Option<String>>(&mut conn)
            .await;
        match reply {
            Ok(created) => Ok(created.is_some()),
            Err(e) => Err(self.map_error(e).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinatorError> {
        let mut conn = self.connection().await?;
        match redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(self.map_error(e).await),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, CoordinatorError> {
        let mut conn = self.connection().await?;
        match redis::cmd("EXISTS")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
        {
            Ok(count) => Ok(count > 0),
            Err(e) => Err(self.map_error(e).await),
        }
    }

    async fn available(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        match redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                self.map_error(e).await;
                false
            }
        }
    }
}
