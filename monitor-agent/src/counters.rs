//! Turns monotonically increasing OS counters into per-interval deltas.
//!
//! A [`CounterStore`] keeps the previous raw sample of each counter family.
//! The first sample of a family only seeds the baseline; every later one is
//! compared against the baseline and then replaces it, even when a counter
//! went backwards and its delta had to be clamped to zero.

use monitor_proto::{CpuPercentages, DiskIoDelta, IoDirection, NetworkDelta, PacketFlow, Reading};

/// Summed disk I/O counters of all block devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskIoCounters {
    pub read_bytes: u64,
    pub read_count: u64,
    pub read_time: u64,
    pub write_bytes: u64,
    pub write_count: u64,
    pub write_time: u64,
}

/// Summed network counters of all interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

/// Aggregate CPU time-in-state, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

/// A raw counter sample that can be diffed against an earlier one of the same family.
pub trait Counters: Copy {
    type Delta;

    /// Field-wise `max(0, self - earlier)`.
    fn saturating_delta(&self, earlier: &Self) -> Self::Delta;
}

impl Counters for DiskIoCounters {
    type Delta = DiskIoDelta;

    fn saturating_delta(&self, earlier: &Self) -> DiskIoDelta {
        DiskIoDelta {
            read: IoDirection {
                bytes: self.read_bytes.saturating_sub(earlier.read_bytes),
                count: self.read_count.saturating_sub(earlier.read_count),
                time: self.read_time.saturating_sub(earlier.read_time),
            },
            write: IoDirection {
                bytes: self.write_bytes.saturating_sub(earlier.write_bytes),
                count: self.write_count.saturating_sub(earlier.write_count),
                time: self.write_time.saturating_sub(earlier.write_time),
            },
        }
    }
}

impl Counters for NetworkCounters {
    type Delta = NetworkDelta;

    fn saturating_delta(&self, earlier: &Self) -> NetworkDelta {
        NetworkDelta {
            rx: PacketFlow {
                bytes: self.rx_bytes.saturating_sub(earlier.rx_bytes),
                packets: self.rx_packets.saturating_sub(earlier.rx_packets),
            },
            tx: PacketFlow {
                bytes: self.tx_bytes.saturating_sub(earlier.tx_bytes),
                packets: self.tx_packets.saturating_sub(earlier.tx_packets),
            },
        }
    }
}

impl Counters for CpuTimes {
    type Delta = CpuTimes;

    fn saturating_delta(&self, earlier: &Self) -> CpuTimes {
        CpuTimes {
            user: self.user.saturating_sub(earlier.user),
            nice: self.nice.saturating_sub(earlier.nice),
            system: self.system.saturating_sub(earlier.system),
            idle: self.idle.saturating_sub(earlier.idle),
            iowait: self.iowait.saturating_sub(earlier.iowait),
            irq: self.irq.saturating_sub(earlier.irq),
            softirq: self.softirq.saturating_sub(earlier.softirq),
            steal: self.steal.saturating_sub(earlier.steal),
            guest: self.guest.saturating_sub(earlier.guest),
            guest_nice: self.guest_nice.saturating_sub(earlier.guest_nice),
        }
    }
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
            + self.guest
            + self.guest_nice
    }

    /// Share of `self.total()` per state; `None` when no tick elapsed.
    pub fn percentages(&self) -> Option<CpuPercentages> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let pct = |ticks: u64| ticks as f64 / total as f64 * 100.0;

        Some(CpuPercentages {
            guest: pct(self.guest),
            guest_nice: pct(self.guest_nice),
            idle: pct(self.idle),
            iowait: pct(self.iowait),
            irq: pct(self.irq),
            nice: pct(self.nice),
            softirq: pct(self.softirq),
            steal: pct(self.steal),
            system: pct(self.system),
            user: pct(self.user),
        })
    }
}

/// The previous sample of one counter family.
#[derive(Debug, Default)]
struct Baseline<C> {
    previous: Option<C>,
}

impl<C: Counters> Baseline<C> {
    /// Stores `sample` and returns its delta against the old baseline, if any.
    fn advance(&mut self, sample: C) -> Option<C::Delta> {
        let delta = self.previous.map(|prev| sample.saturating_delta(&prev));
        self.previous = Some(sample);
        delta
    }
}

/// Deltas of one report cycle, ready for the collection document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleDeltas {
    pub io: Reading<DiskIoDelta>,
    pub load: Reading<CpuPercentages>,
    pub network: Reading<NetworkDelta>,
}

/// Baselines of every tracked counter family.
///
/// Owned by the report loop and only touched from it, one cycle at a time.
#[derive(Debug, Default)]
pub struct CounterStore {
    disk_io: Baseline<DiskIoCounters>,
    network: Baseline<NetworkCounters>,
    cpu: Baseline<CpuTimes>,
    last_load: Reading<CpuPercentages>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disk I/O delta; all zero on the first sample, `{}` when the platform has no counters.
    pub fn disk_io(&mut self, sample: Option<DiskIoCounters>) -> Reading<DiskIoDelta> {
        match sample {
            Some(sample) => Reading::Available(self.disk_io.advance(sample).unwrap_or_default()),
            None => Reading::unavailable(),
        }
    }

    /// Network delta; all zero on the first sample, `{}` when the platform has no counters.
    pub fn network(&mut self, sample: Option<NetworkCounters>) -> Reading<NetworkDelta> {
        match sample {
            Some(sample) => Reading::Available(self.network.advance(sample).unwrap_or_default()),
            None => Reading::unavailable(),
        }
    }

    /// CPU state percentages.
    ///
    /// Unavailable on the first sample, since a zero percentage would be
    /// misleading. When no tick elapsed since the baseline, the previous
    /// cycle's result is repeated.
    pub fn cpu_load(&mut self, sample: Option<CpuTimes>) -> Reading<CpuPercentages> {
        let Some(sample) = sample else {
            return Reading::unavailable();
        };

        if let Some(elapsed) = self.cpu.advance(sample) {
            if let Some(percentages) = elapsed.percentages() {
                self.last_load = Reading::Available(percentages);
            }
        }
        self.last_load.clone()
    }

    pub fn advance(
        &mut self,
        disk_io: Option<DiskIoCounters>,
        network: Option<NetworkCounters>,
        cpu: Option<CpuTimes>,
    ) -> CycleDeltas {
        CycleDeltas {
            io: self.disk_io(disk_io),
            load: self.cpu_load(cpu),
            network: self.network(network),
        }
    }
}
