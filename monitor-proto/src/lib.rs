use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod msg;

/// Descriptive host state, overwritten on the collector every cycle.
///
/// Field order is the byte order of the JSON keys, which is what the
/// collector has always received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoDocument {
    #[serde(rename = "Agent Version")]
    pub agent_version: String,
    #[serde(rename = "CPU")]
    pub cpu: String,
    #[serde(rename = "Connection")]
    pub connection: String,
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Country Code")]
    pub country_code: String,
    #[serde(rename = "IPV4")]
    pub ipv4: String,
    #[serde(rename = "IPV6")]
    pub ipv6: String,
    #[serde(rename = "Load Average")]
    pub load_average: String,
    #[serde(rename = "Process")]
    pub process: String,
    #[serde(rename = "System Version")]
    pub system_version: String,
    #[serde(rename = "Throughput")]
    pub throughput: String,
    #[serde(rename = "Update Time")]
    pub update_time: i64,
    #[serde(rename = "Uptime")]
    pub uptime: String,
}

/// One numeric time-series sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDocument {
    #[serde(rename = "Battery")]
    pub battery: Empty,
    #[serde(rename = "Disk")]
    pub disk: BTreeMap<String, UsageRecord>,
    #[serde(rename = "Fan")]
    pub fan: Empty,
    #[serde(rename = "IO")]
    pub io: Reading<DiskIoDelta>,
    #[serde(rename = "Load")]
    pub load: Reading<CpuPercentages>,
    #[serde(rename = "Memory")]
    pub memory: MemoryRecord,
    #[serde(rename = "Network")]
    pub network: Reading<NetworkDelta>,
    #[serde(rename = "Ping")]
    pub ping: Empty,
    #[serde(rename = "Thermal")]
    pub thermal: Empty,
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// A metric family that is either measured or reported as `{}`.
///
/// `Unavailable` covers both a platform that does not expose the family
/// and the first cycle, where no baseline exists yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading<T> {
    Available(T),
    Unavailable(Empty),
}

impl<T> Default for Reading<T> {
    fn default() -> Self {
        Reading::Unavailable(Empty {})
    }
}

impl<T> Reading<T> {
    pub fn unavailable() -> Self {
        Reading::Unavailable(Empty {})
    }

    pub fn available(&self) -> Option<&T> {
        match self {
            Reading::Available(v) => Some(v),
            Reading::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Available(_))
    }
}

impl<T> From<Option<T>> for Reading<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Reading::Available(v),
            None => Reading::unavailable(),
        }
    }
}

/// Capacity of a mount point or memory pool, in MiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(with = "fixed2")]
    pub free: f64,
    #[serde(with = "fixed2")]
    pub percent: f64,
    #[serde(with = "fixed2")]
    pub total: f64,
    #[serde(with = "fixed2")]
    pub used: f64,
}

impl UsageRecord {
    const MIB: f64 = 1024.0 * 1024.0;

    pub fn from_bytes(total: u64, used: u64, free: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            free: free as f64 / Self::MIB,
            percent,
            total: total as f64 / Self::MIB,
            used: used as f64 / Self::MIB,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(rename = "Mem")]
    pub mem: UsageRecord,
    #[serde(rename = "Swap")]
    pub swap: UsageRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIoDelta {
    pub read: IoDirection,
    pub write: IoDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoDirection {
    pub bytes: u64,
    pub count: u64,
    /// Milliseconds spent on I/O in this direction.
    pub time: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDelta {
    #[serde(rename = "RX")]
    pub rx: PacketFlow,
    #[serde(rename = "TX")]
    pub tx: PacketFlow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFlow {
    pub bytes: u64,
    pub packets: u64,
}

/// Share of elapsed CPU ticks spent in each state over one interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuPercentages {
    #[serde(with = "fixed2")]
    pub guest: f64,
    #[serde(with = "fixed2")]
    pub guest_nice: f64,
    #[serde(with = "fixed2")]
    pub idle: f64,
    #[serde(with = "fixed2")]
    pub iowait: f64,
    #[serde(with = "fixed2")]
    pub irq: f64,
    #[serde(with = "fixed2")]
    pub nice: f64,
    #[serde(with = "fixed2")]
    pub softirq: f64,
    #[serde(with = "fixed2")]
    pub steal: f64,
    #[serde(with = "fixed2")]
    pub system: f64,
    #[serde(with = "fixed2")]
    pub user: f64,
}

impl CpuPercentages {
    pub fn total(&self) -> f64 {
        self.guest
            + self.guest_nice
            + self.idle
            + self.iowait
            + self.irq
            + self.nice
            + self.softirq
            + self.steal
            + self.system
            + self.user
    }
}

/// Floats travel as strings with two decimals.
mod fixed2 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:.2}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unavailable_families_serialize_as_empty_objects() {
        let doc = CollectionDocument::default();
        let json = serde_json::to_string(&doc).unwrap();

        assert_eq!(
            json,
            concat!(
                r#"{"Battery":{},"Disk":{},"Fan":{},"IO":{},"Load":{},"#,
                r#""Memory":{"Mem":{"free":"0.00","percent":"0.00","total":"0.00","used":"0.00"},"#,
                r#""Swap":{"free":"0.00","percent":"0.00","total":"0.00","used":"0.00"}},"#,
                r#""Network":{},"Ping":{},"Thermal":{}}"#
            )
        );
    }

    #[test]
    fn test_collection_document_nesting() {
        let doc = CollectionDocument {
            io: Reading::Available(DiskIoDelta {
                read: IoDirection {
                    bytes: 500,
                    count: 3,
                    time: 7,
                },
                write: IoDirection::default(),
            }),
            network: Reading::Available(NetworkDelta {
                rx: PacketFlow {
                    bytes: 10,
                    packets: 1,
                },
                tx: PacketFlow {
                    bytes: 20,
                    packets: 2,
                },
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["IO"]["read"]["bytes"], 500);
        assert_eq!(value["IO"]["write"]["time"], 0);
        assert_eq!(value["Network"]["RX"]["packets"], 1);
        assert_eq!(value["Network"]["TX"]["bytes"], 20);

        let back: CollectionDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_info_document_keys_are_byte_ordered() {
        let json = serde_json::to_string(&InfoDocument::default()).unwrap();
        let keys: Vec<&str> = json
            .split('"')
            .skip(1)
            .step_by(2)
            .filter(|k| !k.is_empty())
            .collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(json.contains(r#""Update Time":0"#));
    }

    #[test]
    fn test_usage_record_from_bytes() {
        let record = UsageRecord::from_bytes(4 * 1024 * 1024, 1024 * 1024, 3 * 1024 * 1024);
        assert_eq!(record.total, 4.0);
        assert_eq!(record.used, 1.0);
        assert_eq!(record.free, 3.0);
        assert_eq!(record.percent, 25.0);

        let empty = UsageRecord::from_bytes(0, 0, 0);
        assert_eq!(empty.percent, 0.0);
    }
}
