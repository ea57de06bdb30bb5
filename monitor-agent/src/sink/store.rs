use std::time::Duration;

use log::{debug, info};
use redis::IntoConnectionInfo;

use super::{Deliver, DispatchError, EncodedSnapshot};
use crate::identity::AgentIdentity;

/// Executes a transaction pipeline against the store.
pub trait StoreConnector {
    async fn execute(&self, pipe: &redis::Pipeline) -> Result<(), DispatchError>;
}

/// Opens one connection per transaction and drops it afterwards.
pub struct RedisConnector {
    client: redis::Client,
    timeout: Duration,
}

impl RedisConnector {
    pub fn new(
        host: &str,
        port: u16,
        tls: bool,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let scheme = if tls { "rediss" } else { "redis" };
        let mut conn_info = format!("{scheme}://{host}:{port}/").into_connection_info()?;
        conn_info.redis.password = password.map(str::to_owned);

        Ok(Self {
            client: redis::Client::open(conn_info)?,
            timeout,
        })
    }
}

impl StoreConnector for RedisConnector {
    async fn execute(&self, pipe: &redis::Pipeline) -> Result<(), DispatchError> {
        let mut conn = tokio::time::timeout(
            self.timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| DispatchError::Timeout(self.timeout))??;

        let res: redis::RedisResult<()> =
            tokio::time::timeout(self.timeout, pipe.query_async(&mut conn))
                .await
                .map_err(|_| DispatchError::Timeout(self.timeout))?;
        res?;

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub hashes: String,
    pub info: String,
    pub collection: String,
    pub alive: String,
}

impl StoreKeys {
    pub fn new(prefix: &str, id: &AgentIdentity) -> Self {
        Self {
            hashes: format!("{prefix}:hashes"),
            info: format!("{prefix}:info:{id}"),
            collection: format!("{prefix}:collection:{id}"),
            alive: format!("{prefix}:alive:{id}"),
        }
    }
}

/// Writes each snapshot as one MULTI/EXEC transaction.
pub struct StoreSink<C> {
    connector: C,
    id: AgentIdentity,
    keys: StoreKeys,
    retention: u64,
    alive_check: u64,
}

impl<C: StoreConnector> StoreSink<C> {
    pub fn new(
        connector: C,
        id: AgentIdentity,
        key_prefix: &str,
        retention: u64,
        alive_check: u64,
    ) -> Self {
        let keys = StoreKeys::new(key_prefix, &id);
        Self {
            connector,
            id,
            keys,
            retention,
            alive_check,
        }
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    #[cfg(test)]
    pub(crate) fn connector(&self) -> &C {
        &self.connector
    }

    pub fn transaction(&self, snapshot: &EncodedSnapshot) -> redis::Pipeline {
        let retention = i64::try_from(self.retention).unwrap_or(i64::MAX);
        let cutoff = snapshot.timestamp.saturating_sub(retention);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&self.keys.hashes)
            .arg(self.id.as_str())
            .arg(&snapshot.public_ipv4)
            .ignore()
            .cmd("HSET")
            .arg(&self.keys.info)
            .arg(&snapshot.info_fields)
            .ignore()
            .cmd("ZADD")
            .arg(&self.keys.collection)
            .arg(snapshot.timestamp)
            .arg(&snapshot.collection)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&self.keys.collection)
            .arg("-inf")
            .arg(format!("({cutoff}"))
            .ignore();
        for key in [&self.keys.hashes, &self.keys.info, &self.keys.collection] {
            pipe.cmd("EXPIRE").arg(key).arg(retention).ignore();
        }
        pipe.cmd("SET")
            .arg(&self.keys.alive)
            .arg(1)
            .arg("EX")
            .arg(self.alive_check)
            .ignore();
        pipe
    }
}

impl<C: StoreConnector> Deliver for StoreSink<C> {
    async fn deliver(&self, snapshot: &EncodedSnapshot) -> Result<(), DispatchError> {
        let pipe = self.transaction(snapshot);
        debug!("committing snapshot {} to {}", snapshot.timestamp, self.keys.collection);
        self.connector.execute(&pipe).await?;
        info!("snapshot committed to store");
        Ok(())
    }
}
