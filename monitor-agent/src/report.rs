use std::time::Duration;

use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::{
    counters::CounterStore,
    locate::Location,
    probe::{Probe, StaticFacts},
    sink::{self, Deliver, DispatchError},
    snapshot,
};

/// Drives capture, delta, assemble and dispatch one cycle at a time.
pub struct Reporter<P, S> {
    probe: P,
    sink: S,
    counters: CounterStore,
    facts: StaticFacts,
    location: Location,
    last_update: i64,
}

impl<P: Probe, S: Deliver> Reporter<P, S> {
    pub fn new(probe: P, sink: S, facts: StaticFacts, location: Location) -> Self {
        Self {
            probe,
            sink,
            counters: CounterStore::new(),
            facts,
            location,
            last_update: i64::MIN,
        }
    }

    /// Runs cycles until `shutdown` fires, or exactly one when `once` is set.
    ///
    /// Cycle errors are logged and never end the loop. The interval is slept
    /// after each cycle finishes, so a slow dispatch delays every later cycle.
    pub async fn run(&mut self, interval: Duration, once: bool, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.run_cycle().await {
                error!("report cycle failed: {e}");
            }

            if once {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping report loop");
                    break;
                }
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<(), DispatchError> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        self.cycle_at(now).await
    }

    async fn cycle_at(&mut self, now: i64) -> Result<(), DispatchError> {
        let update_time = self.next_update_time(now);
        info!("report cycle {update_time} started");

        let sample = self.probe.query_dynamic();
        let deltas = self
            .counters
            .advance(sample.disk_io, sample.network, sample.cpu_times);
        let snapshot =
            snapshot::assemble(&sample, deltas, &self.facts, &self.location, update_time);

        sink::dispatch(&snapshot, &self.sink).await?;
        info!("report cycle {update_time} finished");
        Ok(())
    }

    // Two cycles inside the same second still get distinct timestamps.
    fn next_update_time(&mut self, now: i64) -> i64 {
        let update_time = if now > self.last_update {
            now
        } else {
            self.last_update.saturating_add(1)
        };
        self.last_update = update_time;
        update_time
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, collections::VecDeque};

    use crate::{
        counters::{CpuTimes, DiskIoCounters},
        probe::HostSample,
        sink::{EncodedSnapshot, StoreSink, store::test::FakeConnector},
    };

    use super::*;

    struct ScriptedProbe {
        samples: VecDeque<HostSample>,
    }

    impl ScriptedProbe {
        fn new(samples: impl IntoIterator<Item = HostSample>) -> Self {
            Self {
                samples: samples.into_iter().collect(),
            }
        }
    }

    impl Probe for ScriptedProbe {
        fn query_dynamic(&mut self) -> HostSample {
            self.samples.pop_front().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: RefCell<Vec<EncodedSnapshot>>,
    }

    impl Deliver for RecordingSink {
        async fn deliver(&self, snapshot: &EncodedSnapshot) -> Result<(), DispatchError> {
            self.delivered.borrow_mut().push(snapshot.clone());
            Ok(())
        }
    }

    fn sample(read_bytes: u64, idle: u64) -> HostSample {
        HostSample {
            disk_io: Some(DiskIoCounters {
                read_bytes,
                ..Default::default()
            }),
            cpu_times: Some(CpuTimes {
                user: 100,
                idle,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn store_sink(fail: bool) -> StoreSink<FakeConnector> {
        StoreSink::new(
            FakeConnector {
                fail,
                ..Default::default()
            },
            "abc123".parse().unwrap(),
            "system_monitor",
            86400,
            600,
        )
    }

    #[tokio::test]
    async fn test_second_cycle_reports_counter_delta() {
        let mut reporter = Reporter::new(
            ScriptedProbe::new([sample(1000, 100), sample(1500, 200)]),
            store_sink(false),
            StaticFacts::default(),
            Location::default(),
        );

        reporter.cycle_at(1_700_000_000).await.unwrap();
        reporter.cycle_at(1_700_000_060).await.unwrap();

        let committed = reporter.sink.connector().committed.borrow();
        assert_eq!(committed.len(), 2);
        let first = String::from_utf8_lossy(&committed[0]);
        let second = String::from_utf8_lossy(&committed[1]);
        assert!(first.contains(r#""IO":{"read":{"bytes":0,"#));
        assert!(first.contains(r#""Load":{}"#));
        assert!(second.contains(r#""IO":{"read":{"bytes":500,"#));
        assert!(second.contains(r#""idle":"100.00""#));
    }

    #[tokio::test]
    async fn test_failed_transaction_does_not_stop_the_loop() {
        let mut reporter = Reporter::new(
            ScriptedProbe::new([sample(1000, 100), sample(1500, 200)]),
            store_sink(true),
            StaticFacts::default(),
            Location::default(),
        );

        assert!(reporter.cycle_at(1_700_000_000).await.is_err());
        assert!(reporter.cycle_at(1_700_000_060).await.is_err());

        let connector = reporter.sink.connector();
        assert_eq!(*connector.attempts.borrow(), 2);
        assert!(connector.committed.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_update_time_always_advances() {
        let mut reporter = Reporter::new(
            ScriptedProbe::new([]),
            RecordingSink::default(),
            StaticFacts::default(),
            Location::default(),
        );

        reporter.cycle_at(1_700_000_000).await.unwrap();
        reporter.cycle_at(1_700_000_000).await.unwrap();
        reporter.cycle_at(1_699_999_990).await.unwrap();
        reporter.cycle_at(1_700_000_100).await.unwrap();

        let timestamps: Vec<i64> = reporter
            .sink
            .delivered
            .borrow()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(
            timestamps,
            [1_700_000_000, 1_700_000_001, 1_700_000_002, 1_700_000_100]
        );
    }

    #[tokio::test]
    async fn test_once_runs_a_single_cycle() {
        let mut reporter = Reporter::new(
            ScriptedProbe::new([]),
            RecordingSink::default(),
            StaticFacts::default(),
            Location::default(),
        );

        reporter
            .run(Duration::from_secs(3600), true, CancellationToken::new())
            .await;

        assert_eq!(reporter.sink.delivered.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let mut reporter = Reporter::new(
            ScriptedProbe::new([]),
            RecordingSink::default(),
            StaticFacts::default(),
            Location::default(),
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        reporter.run(Duration::from_secs(3600), false, shutdown).await;

        assert_eq!(reporter.sink.delivered.borrow().len(), 1);
    }
}
