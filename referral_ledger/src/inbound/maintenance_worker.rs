//! The maintenance worker expires due referrals and retries unpaid rewards in the background

use std::time::Duration;

use crate::domain::{models::MaintenanceStats, ports::ReferralMaintenanceService};

/// Stats about the current state of the background worker
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct WorkerStats {
    /// the count of maintenance passes that completed since the worker was constructed
    pub pass_count: usize,
    /// the count of maintenance passes that returned an error
    pub failed_passes: usize,
    /// the totals of every completed pass
    pub maintenance: MaintenanceStats,
}

impl WorkerStats {
    fn increment(&mut self, stats: MaintenanceStats) {
        self.pass_count += 1;
        self.maintenance += stats;
    }
}

/// a foreground handle to a background worker task.
/// This allows stopping the background task and also subscribing to stats about the passes it ran
/// Dropping this struct will abort the worker task
pub struct MaintenanceWorkerHandle {
    stats: tokio::sync::watch::Receiver<WorkerStats>,
    handle: tokio::task::JoinHandle<()>,
}

impl MaintenanceWorkerHandle {
    /// returns a reference to the receiver end of the watch channel
    /// this allows a caller to subscribe to or read the current stats
    pub fn stats(&self) -> &tokio::sync::watch::Receiver<WorkerStats> {
        &self.stats
    }

    /// create a new background worker and return a reference to it as a [MaintenanceWorkerHandle]
    pub fn new_worker<S>(service: S, interval: Duration) -> Self
    where
        S: ReferralMaintenanceService,
    {
        let (tx, rx) = tokio::sync::watch::channel(WorkerStats::default());
        let handle = tokio::task::spawn(
            MaintenanceWorker {
                service,
                sender: tx,
                interval,
            }
            .run(),
        );
        MaintenanceWorkerHandle { stats: rx, handle }
    }
}

impl Drop for MaintenanceWorkerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct MaintenanceWorker<S> {
    service: S,
    sender: tokio::sync::watch::Sender<WorkerStats>,
    interval: Duration,
}

impl<S> MaintenanceWorker<S>
where
    S: ReferralMaintenanceService,
{
    async fn run(self) {
        let MaintenanceWorker {
            service,
            sender,
            interval,
        } = self;
        loop {
            tokio::time::sleep(interval).await;
            match service.run_maintenance().await {
                Ok(stats) => sender.send_modify(move |cur| cur.increment(stats)),
                // the error is already recorded by the service span
                Err(_) => sender.send_modify(|cur| cur.failed_passes += 1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LedgerErr;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    /// expires one referral per pass and fails every third pass
    #[derive(Clone, Default)]
    struct CountingMaintenance {
        calls: Arc<AtomicUsize>,
    }

    impl ReferralMaintenanceService for CountingMaintenance {
        async fn sweep_expired(&self) -> Result<u64, LedgerErr> {
            Ok(1)
        }

        async fn run_maintenance(&self) -> Result<MaintenanceStats, LedgerErr> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call % 3 == 0 {
                return Err(LedgerErr::Storage(anyhow::anyhow!("database unavailable")));
            }
            Ok(MaintenanceStats {
                expired: self.sweep_expired().await?,
                ..Default::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn it_publishes_stats_for_each_pass() {
        let service = CountingMaintenance::default();
        let worker = MaintenanceWorkerHandle::new_worker(service.clone(), Duration::from_secs(60));
        let mut stats = worker.stats().clone();

        loop {
            let seen = {
                let current = stats.borrow_and_update();
                current.pass_count + current.failed_passes
            };
            if seen >= 3 {
                break;
            }
            stats.changed().await.unwrap();
        }

        let current = *stats.borrow();
        assert_eq!(current.pass_count, 2);
        assert_eq!(current.failed_passes, 1);
        assert_eq!(current.maintenance.expired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_stops_when_the_handle_is_dropped() {
        let service = CountingMaintenance::default();
        let worker = MaintenanceWorkerHandle::new_worker(service.clone(), Duration::from_secs(60));
        let mut stats = worker.stats().clone();
        stats.changed().await.unwrap();
        drop(worker);

        let calls = service.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), calls);
        assert!(stats.changed().await.is_err());
    }
}
