use serde::{Deserialize, Serialize};

/// Body of the push-mode liveness ping, mapping the agent to its public address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPing {
    pub ip: String,
}

/// The subset of a geolocation lookup response the agent consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country_name: String,
    pub country_code: String,
}
