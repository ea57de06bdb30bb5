use std::{collections::BTreeMap, fs, path::Path};

use log::trace;
use monitor_proto::{MemoryRecord, UsageRecord};
use sysinfo::{Disks, Networks, ProcessesToUpdate};

use crate::{
    counters::{CpuTimes, DiskIoCounters, NetworkCounters},
    procfs,
};

/// Host facts captured once at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticFacts {
    pub cpu_model: String,
    pub system_version: String,
    /// Unix timestamp of the last boot.
    pub boot_time: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCount {
    pub tcp: usize,
    pub udp: usize,
}

/// Everything read from the OS in one report cycle.
///
/// Counter families the platform does not expose are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSample {
    pub disk_io: Option<DiskIoCounters>,
    pub network: Option<NetworkCounters>,
    pub cpu_times: Option<CpuTimes>,
    pub disks: BTreeMap<String, UsageRecord>,
    pub memory: MemoryRecord,
    pub load_average: LoadAverage,
    pub process_count: usize,
    pub connections: ConnectionCount,
}

/// Source of per-cycle host samples.
pub trait Probe {
    fn query_dynamic(&mut self) -> HostSample;
}

#[derive(Debug)]
pub struct HostQuerent {
    system: sysinfo::System,
    exclude_fs: Vec<String>,
}

impl HostQuerent {
    pub fn new(exclude_fs: &[String]) -> Self {
        let system = sysinfo::System::new_all();
        Self {
            system,
            exclude_fs: exclude_fs.iter().map(|fs| fs.to_lowercase()).collect(),
        }
    }

    pub fn query_static(&self) -> StaticFacts {
        let cpu_model = {
            let cpus = self.system.cpus();
            let brand = cpus.first().map(|cpu| cpu.brand().trim()).unwrap_or_default();
            format!("{}x {}", cpus.len(), brand)
        };
        let system_version = format!(
            "{} {} {}",
            std::env::consts::OS,
            sysinfo::System::distribution_id(),
            sysinfo::System::os_version().unwrap_or_default()
        );

        StaticFacts {
            cpu_model,
            system_version,
            boot_time: sysinfo::System::boot_time(),
        }
    }

    fn query_disks(&self) -> BTreeMap<String, UsageRecord> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| {
                let fs = disk.file_system().to_string_lossy().to_lowercase();
                !self.exclude_fs.contains(&fs)
            })
            .map(|disk| {
                let total = disk.total_space();
                let free = disk.available_space();
                (
                    disk.mount_point().to_string_lossy().into_owned(),
                    UsageRecord::from_bytes(total, total.saturating_sub(free), free),
                )
            })
            .collect()
    }

    fn query_memory(&mut self) -> MemoryRecord {
        self.system.refresh_memory();
        MemoryRecord {
            mem: UsageRecord::from_bytes(
                self.system.total_memory(),
                self.system.used_memory(),
                self.system.free_memory(),
            ),
            swap: UsageRecord::from_bytes(
                self.system.total_swap(),
                self.system.used_swap(),
                self.system.free_swap(),
            ),
        }
    }

    fn query_network(&self) -> Option<NetworkCounters> {
        let networks = Networks::new_with_refreshed_list();
        let mut sum: Option<NetworkCounters> = None;
        for (_, data) in networks.iter() {
            let acc = sum.get_or_insert_with(NetworkCounters::default);
            acc.rx_bytes += data.total_received();
            acc.rx_packets += data.total_packets_received();
            acc.tx_bytes += data.total_transmitted();
            acc.tx_packets += data.total_packets_transmitted();
        }
        sum
    }

    fn query_process_count(&mut self) -> usize {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system.processes().len()
    }

    fn query_load_average() -> LoadAverage {
        let load = sysinfo::System::load_average();
        LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        }
    }
}

impl Probe for HostQuerent {
    fn query_dynamic(&mut self) -> HostSample {
        let sample = HostSample {
            disk_io: query_disk_io(),
            network: self.query_network(),
            cpu_times: query_cpu_times(),
            disks: self.query_disks(),
            memory: self.query_memory(),
            load_average: Self::query_load_average(),
            process_count: self.query_process_count(),
            connections: query_connections(),
        };
        trace!("host sample: {sample:?}");
        sample
    }
}

fn query_cpu_times() -> Option<CpuTimes> {
    let content = fs::read_to_string("/proc/stat").ok()?;
    procfs::parse_stat_cpu(&content)
}

fn query_disk_io() -> Option<DiskIoCounters> {
    let content = fs::read_to_string("/proc/diskstats").ok()?;
    let devices = fs::read_dir("/sys/block").ok().map(|dir| {
        procfs::block_devices(
            dir.filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned()),
        )
    });

    match devices {
        Some(devices) => procfs::parse_diskstats(&content, |name| devices.contains(name)),
        None => procfs::parse_diskstats(&content, |_| true),
    }
}

fn query_connections() -> ConnectionCount {
    let count = |files: &[&str]| -> usize {
        files
            .iter()
            .filter_map(|file| fs::read_to_string(Path::new("/proc/net").join(file)).ok())
            .map(|content| procfs::count_socket_entries(&content))
            .sum()
    };

    ConnectionCount {
        tcp: count(&["tcp", "tcp6"]),
        udp: count(&["udp", "udp6"]),
    }
}
