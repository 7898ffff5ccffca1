use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::ReservationStatus;

/// Background task that moves confirmed reservations whose interval has
/// passed into the terminal `completed` status. Cancelled reservations are
/// left alone; pending ones stay pending until the surrounding workflow
/// decides (an unconfirmed request is not the engine's to complete).
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let finished = engine.collect_finished_reservations(chrono::Utc::now());
        for id in finished {
            match engine
                .set_reservation_status(id, ReservationStatus::Completed)
                .await
            {
                Ok(_) => info!("completed finished reservation {id}"),
                Err(e) => {
                    // Raced with an external status change — fine
                    tracing::debug!("sweeper skip {id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AdmissionPolicy;
    use crate::model::{Requester, ReservationRequest};
    use crate::notify::NotifyHub;
    use chrono::{TimeDelta, Utc};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("atrium_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_collects_only_past_confirmed() {
        let path = test_wal_path("sweep_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(
            Engine::new(path, notify, AdmissionPolicy::default()).unwrap(),
        );

        let fid = Ulid::new();
        engine
            .create_facility(fid, "Hall".into(), None, true)
            .await
            .unwrap();

        let now = Utc::now();
        let request = |start, end| ReservationRequest {
            facility_id: fid,
            requester: Requester {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                phone: None,
            },
            title: "Session".into(),
            description: None,
            start,
            end,
            notes: None,
        };

        // Past, later confirmed → should be collected.
        let past = Ulid::new();
        engine
            .create_reservation(
                past,
                request(now - TimeDelta::hours(3), now - TimeDelta::hours(2)),
            )
            .await
            .unwrap();
        engine
            .set_reservation_status(past, ReservationStatus::Confirmed)
            .await
            .unwrap();

        // Future confirmed → untouched.
        let future = Ulid::new();
        engine
            .create_reservation(
                future,
                request(now + TimeDelta::hours(5), now + TimeDelta::hours(6)),
            )
            .await
            .unwrap();
        engine
            .set_reservation_status(future, ReservationStatus::Confirmed)
            .await
            .unwrap();

        // Past but still pending → not the sweeper's call.
        engine
            .create_reservation(
                Ulid::new(),
                request(now - TimeDelta::hours(6), now - TimeDelta::hours(5)),
            )
            .await
            .unwrap();

        let finished = engine.collect_finished_reservations(now);
        assert_eq!(finished, vec![past]);

        engine
            .set_reservation_status(past, ReservationStatus::Completed)
            .await
            .unwrap();
        assert!(engine.collect_finished_reservations(now).is_empty());
    }
}
