//! Parsers for the `/proc` files the probe reads counters from.
//!
//! Pure functions over file content so they can be tested with literal inputs.

use std::collections::HashSet;

use crate::counters::{CpuTimes, DiskIoCounters};

const SECTOR_SIZE: u64 = 512;

/// Parses the aggregate `cpu` line of `/proc/stat`.
///
/// Kernels older than 2.6.33 omit trailing columns; those read as zero.
pub fn parse_stat_cpu(content: &str) -> Option<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|s| s.parse().unwrap_or(0))
        .collect();

    if values.len() < 4 {
        return None;
    }
    let get_val = |idx: usize| values.get(idx).copied().unwrap_or(0);

    Some(CpuTimes {
        user: get_val(0),
        nice: get_val(1),
        system: get_val(2),
        idle: get_val(3),
        iowait: get_val(4),
        irq: get_val(5),
        softirq: get_val(6),
        steal: get_val(7),
        guest: get_val(8),
        guest_nice: get_val(9),
    })
}

/// Sums `/proc/diskstats` over the devices accepted by `include`.
///
/// Returns `None` when no device line was usable.
pub fn parse_diskstats(content: &str, include: impl Fn(&str) -> bool) -> Option<DiskIoCounters> {
    let mut sum: Option<DiskIoCounters> = None;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }
        if !include(parts[2]) {
            continue;
        }

        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        let acc = sum.get_or_insert_with(DiskIoCounters::default);
        acc.read_count += get_val(3);
        acc.read_bytes += get_val(5) * SECTOR_SIZE;
        acc.read_time += get_val(6);
        acc.write_count += get_val(7);
        acc.write_bytes += get_val(9) * SECTOR_SIZE;
        acc.write_time += get_val(10);
    }

    sum
}

/// Counts socket table entries in one of `/proc/net/{tcp,tcp6,udp,udp6}`.
pub fn count_socket_entries(content: &str) -> usize {
    content
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count()
}

/// Collects whole block device names from a `/sys/block` listing,
/// dropping loop and ram devices.
pub fn block_devices<I: IntoIterator<Item = String>>(names: I) -> HashSet<String> {
    names
        .into_iter()
        .filter(|name| !name.starts_with("loop") && !name.starts_with("ram"))
        .collect()
}
