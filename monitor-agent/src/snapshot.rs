//! Composes the per-cycle info and collection documents. No I/O happens here.

use std::sync::LazyLock;

use monitor_proto::{CollectionDocument, Empty, InfoDocument};
use regex::Regex;

use crate::{
    counters::{CycleDeltas, NetworkCounters},
    locate::Location,
    probe::{HostSample, StaticFacts},
};

pub const AGENT_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-rust");

static IPV4_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d*\.\d*\.\d*").expect("valid regex"));
static IPV6_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-fA-F0-9]*:").expect("valid regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub info: InfoDocument,
    pub collection: CollectionDocument,
    /// Unmasked, for the identity-to-address mapping kept by the collector.
    pub public_ipv4: String,
}

/// Merges this cycle's deltas and live values with the startup facts.
pub fn assemble(
    sample: &HostSample,
    deltas: CycleDeltas,
    facts: &StaticFacts,
    location: &Location,
    now: i64,
) -> Snapshot {
    let info = InfoDocument {
        agent_version: AGENT_VERSION.to_owned(),
        cpu: facts.cpu_model.clone(),
        connection: format!(
            "TCP: {}, UDP: {}",
            sample.connections.tcp, sample.connections.udp
        ),
        country: location.country.name.clone(),
        country_code: location.country.code.clone(),
        ipv4: mask_ipv4(&location.ipv4),
        ipv6: mask_ipv6(&location.ipv6),
        load_average: format!(
            "{:.2}, {:.2}, {:.2}",
            sample.load_average.one, sample.load_average.five, sample.load_average.fifteen
        ),
        process: sample.process_count.to_string(),
        system_version: facts.system_version.clone(),
        throughput: format_throughput(sample.network.unwrap_or_default()),
        update_time: now,
        uptime: format_uptime(u64::try_from(now).unwrap_or(0).saturating_sub(facts.boot_time)),
    };

    let collection = CollectionDocument {
        battery: Empty {},
        disk: sample.disks.clone(),
        fan: Empty {},
        io: deltas.io,
        load: deltas.load,
        memory: sample.memory,
        network: deltas.network,
        ping: Empty {},
        thermal: Empty {},
    };

    Snapshot {
        info,
        collection,
        public_ipv4: location.ipv4.clone(),
    }
}

/// Replaces the first three octets of an IPv4 address with `*.*.*`.
pub fn mask_ipv4(ip: &str) -> String {
    IPV4_HEAD.replace_all(ip, "*.*.*").into_owned()
}

/// Replaces every colon-terminated group of an IPv6 address with `*:`.
pub fn mask_ipv6(ip: &str) -> String {
    IPV6_GROUP.replace_all(ip, "*:").into_owned()
}

/// Cumulative traffic as `↓x GB / ↑y GB`, each direction promoted to TB past 1024 GB.
pub fn format_throughput(totals: NetworkCounters) -> String {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let scale = |bytes: u64| {
        let gb = bytes as f64 / GIB;
        if gb > 1024.0 {
            format!("{:.2} TB", gb / 1024.0)
        } else {
            format!("{gb:.2} GB")
        }
    };

    format!("↓{} / ↑{}", scale(totals.rx_bytes), scale(totals.tx_bytes))
}

pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = secs / 3600 % 24;
    let minutes = secs / 60 % 60;
    let seconds = secs % 60;

    format!("{days} Days {hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod test {
    use monitor_proto::{DiskIoDelta, IoDirection, Reading};

    use super::*;
    use crate::{
        locate::Country,
        probe::{ConnectionCount, LoadAverage},
    };

    #[test]
    fn test_mask_ipv4() {
        assert_eq!(mask_ipv4("203.0.113.45"), "*.*.*.45");
        assert_eq!(mask_ipv4("None"), "None");
    }

    #[test]
    fn test_mask_ipv6() {
        assert_eq!(mask_ipv6("2001:db8::1"), "*:*:*:1");
        assert_eq!(mask_ipv6("fe80:0:0:0:1ff:fe23:4567:890a"), "*:*:*:*:*:*:*:890a");
        assert_eq!(mask_ipv6("None"), "None");
    }

    #[test]
    fn test_format_throughput() {
        const GIB: u64 = 1024 * 1024 * 1024;
        let totals = NetworkCounters {
            rx_bytes: 3 * GIB / 2,
            tx_bytes: 2048 * GIB,
            ..Default::default()
        };

        assert_eq!(format_throughput(totals), "↓1.50 GB / ↑2.00 TB");
        assert_eq!(
            format_throughput(NetworkCounters::default()),
            "↓0.00 GB / ↑0.00 GB"
        );
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0 Days 00:00:00");
        assert_eq!(format_uptime(3 * 86400 + 4 * 3600 + 5 * 60 + 6), "3 Days 04:05:06");
    }

    #[test]
    fn test_assemble() {
        let sample = HostSample {
            load_average: LoadAverage {
                one: 0.5,
                five: 0.25,
                fifteen: 1.0,
            },
            process_count: 123,
            connections: ConnectionCount { tcp: 7, udp: 2 },
            ..Default::default()
        };
        let deltas = CycleDeltas {
            io: Reading::Available(DiskIoDelta {
                read: IoDirection {
                    bytes: 500,
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        let facts = StaticFacts {
            cpu_model: "4x Test CPU".to_owned(),
            system_version: "linux debian 12".to_owned(),
            boot_time: 1_700_000_000,
        };
        let location = Location {
            ipv4: "203.0.113.45".to_owned(),
            ipv6: "2001:db8::1".to_owned(),
            country: Country::normalized("Hong Kong", "HK"),
        };

        let snapshot = assemble(&sample, deltas.clone(), &facts, &location, 1_700_000_061);

        assert_eq!(snapshot.public_ipv4, "203.0.113.45");
        assert_eq!(snapshot.info.ipv4, "*.*.*.45");
        assert_eq!(snapshot.info.ipv6, "*:*:*:1");
        assert_eq!(snapshot.info.country, "Hong Kong, SAR");
        assert_eq!(snapshot.info.connection, "TCP: 7, UDP: 2");
        assert_eq!(snapshot.info.load_average, "0.50, 0.25, 1.00");
        assert_eq!(snapshot.info.process, "123");
        assert_eq!(snapshot.info.uptime, "0 Days 00:01:01");
        assert_eq!(snapshot.info.update_time, 1_700_000_061);
        assert_eq!(snapshot.info.cpu, "4x Test CPU");
        assert_eq!(snapshot.collection.io, deltas.io);
        assert!(!snapshot.collection.load.is_available());
    }
}
