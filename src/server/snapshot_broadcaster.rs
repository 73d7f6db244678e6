use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use crate::simulator::{SensorSimulator, Snapshot};

/// Pushes the simulator's latest snapshot to every WebSocket subscriber on a fixed period.
#[derive(Debug)]
pub struct SnapshotBroadcaster {
    simulator: Arc<SensorSimulator>,
    ws_broadcaster: broadcast::Sender<Arc<Snapshot>>,
    period: Duration,
}

impl SnapshotBroadcaster {
    pub fn new(
        simulator: Arc<SensorSimulator>,
        ws_broadcaster: broadcast::Sender<Arc<Snapshot>>,
        period: Duration,
    ) -> Self {
        Self {
            simulator,
            ws_broadcaster,
            period,
        }
    }

    /// Publishes one snapshot if anyone is listening. Returns the number of receivers reached.
    pub async fn publish_once(&self) -> usize {
        if self.ws_broadcaster.receiver_count() == 0 {
            return 0;
        }
        let snapshot = Arc::new(self.simulator.latest_data().await);
        match self.ws_broadcaster.send(snapshot) {
            Ok(reached) => reached,
            Err(e) => {
                // Last subscriber left between the count check and the send.
                debug!("Failed to broadcast sensor snapshot (no subscribers?): {}", e);
                0
            }
        }
    }

    pub fn run(self) -> JoinHandle<()> {
        info!(period_ms = self.period.as_millis() as u64, "SnapshotBroadcaster started.");
        tokio::spawn(async move {
            let mut interval = time::interval(self.period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let reached = self.publish_once().await;
                if reached > 0 {
                    debug!(subscribers = reached, "Broadcast sensor snapshot.");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatorSettings;

    fn simulator() -> Arc<SensorSimulator> {
        Arc::new(SensorSimulator::new(SimulatorSettings {
            machine_count: 3,
            seed: Some(7),
            ..SimulatorSettings::default()
        }))
    }

    #[tokio::test]
    async fn test_skips_without_subscribers() {
        let (tx, _) = broadcast::channel(4);
        let broadcaster = SnapshotBroadcaster::new(simulator(), tx, Duration::from_secs(1));
        assert_eq!(broadcaster.publish_once().await, 0);
    }

    #[tokio::test]
    async fn test_publishes_full_snapshot() {
        let (tx, mut rx) = broadcast::channel(4);
        let broadcaster = SnapshotBroadcaster::new(simulator(), tx, Duration::from_secs(1));
        assert_eq!(broadcaster.publish_once().await, 1);

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.get("Machine_3").is_some());
    }

    #[tokio::test]
    async fn test_run_pushes_periodically() {
        let (tx, mut rx) = broadcast::channel(16);
        let handle = SnapshotBroadcaster::new(simulator(), tx, Duration::from_millis(10)).run();
        for _ in 0..3 {
            let snapshot = time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert_eq!(snapshot.len(), 3);
        }
        handle.abort();
    }
}
