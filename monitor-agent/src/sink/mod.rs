//! Delivery of encoded snapshots to exactly one remote sink.

use std::time::Duration;

use serde_json::Value;

use crate::snapshot::Snapshot;

pub mod push;
pub mod store;

pub use push::PushSink;
pub use store::{RedisConnector, StoreSink};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("{failed} of {attempted} report requests failed")]
    Push { failed: usize, attempted: usize },
}

/// A snapshot serialized the way both sinks transmit it.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSnapshot {
    pub info: String,
    pub collection: String,
    /// Info document as string-valued hash fields.
    pub info_fields: Vec<(String, String)>,
    pub public_ipv4: String,
    pub timestamp: i64,
}

impl EncodedSnapshot {
    pub fn encode(snapshot: &Snapshot) -> Result<Self, DispatchError> {
        let info_value = serde_json::to_value(&snapshot.info)?;
        let info_fields = match &info_value {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            info: serde_json::to_string(&snapshot.info)?,
            collection: serde_json::to_string(&snapshot.collection)?,
            info_fields,
            public_ipv4: snapshot.public_ipv4.clone(),
            timestamp: snapshot.info.update_time,
        })
    }
}

/// A destination for encoded snapshots.
pub trait Deliver {
    async fn deliver(&self, snapshot: &EncodedSnapshot) -> Result<(), DispatchError>;
}

/// The sink selected at startup.
pub enum Sink {
    Store(StoreSink<RedisConnector>),
    Push(PushSink),
}

impl Deliver for Sink {
    async fn deliver(&self, snapshot: &EncodedSnapshot) -> Result<(), DispatchError> {
        match self {
            Sink::Store(sink) => sink.deliver(snapshot).await,
            Sink::Push(sink) => sink.deliver(snapshot).await,
        }
    }
}

/// Serializes `snapshot` and hands it to `sink`.
pub async fn dispatch<S: Deliver>(snapshot: &Snapshot, sink: &S) -> Result<(), DispatchError> {
    let encoded = EncodedSnapshot::encode(snapshot)?;
    log::debug!("info: {}", encoded.info);
    log::debug!("collection: {}", encoded.collection);
    sink.deliver(&encoded).await
}
