//! Integration tests for the sync engine against the in-memory cloud.

use repsync_engine::SyncConfig;
use repsync_protocol::models::WorkoutLog;
use repsync_protocol::{SyncState, Timestamp};
use repsync_testkit::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn second_sync_is_a_no_op() {
    let cloud = shared_cloud();
    let phone = TestDevice::new(&cloud, &owner("alice"), 1_000);
    phone.log_workout("legs");

    let first = phone.sync().await;
    assert_eq!(first.uploaded, 1);
    assert!(first.is_success());
    let upserts = cloud.upsert_calls();

    let second = phone.sync().await;
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.applied, 0);
    assert!(second.conflicts.is_empty());
    assert!(second.is_success());
    assert_eq!(cloud.upsert_calls(), upserts);
}

#[tokio::test]
async fn repeated_syncs_never_duplicate() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 1_000);
    let record = phone.log_workout("push day");

    for _ in 0..5 {
        let result = phone.sync().await;
        assert!(result.is_success());
    }

    assert_eq!(phone.store.len(), 1);
    assert!(phone.store.get(&record.id).is_some());
    assert_eq!(cloud.len(), 1);
    assert_eq!(cloud.records_for(&alice)[0].id, record.id);
}

#[tokio::test]
async fn remote_update_reaches_device() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 100);

    let w1 = phone.log_workout("Original");
    assert_eq!(w1.updated_at, 100);
    phone.sync().await;
    assert!(cloud.get(&w1.id).is_some());

    cloud
        .put_remote(remote_workout_log(&alice, w1.id, 200, "Updated"))
        .unwrap();
    let result = phone.sync().await;

    assert_eq!(result.applied, 1);
    assert_eq!(phone.notes(&w1.id).as_deref(), Some("Updated"));
    assert_eq!(phone.store.get(&w1.id).unwrap().updated_at, 200);
}

#[tokio::test]
async fn concurrent_creates_upload_exactly_once() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 1_000);

    let tracker = phone.tracker().clone();
    let ids: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let tracker = tracker.clone();
                let alice = alice.clone();
                scope.spawn(move || {
                    tracker
                        .create_entity(&alice, &workout_log(&format!("session {i}")))
                        .unwrap()
                        .id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(phone.sync_status().pending_local_count, 5);

    let result = phone.sync().await;

    assert_eq!(result.uploaded, 5);
    assert_eq!(cloud.live_count(&alice), 5);
    for id in &ids {
        assert!(cloud.get(id).is_some());
    }
    assert_eq!(phone.sync_status().pending_local_count, 0);
}

#[tokio::test]
async fn local_edit_is_not_clobbered_by_older_remote() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 1_000);

    let record = phone.log_workout("synced");
    phone.sync().await;

    // A stale write from another device lands in the cloud.
    cloud
        .put_remote(remote_workout_log(&alice, record.id, 1_200, "stale"))
        .unwrap();

    phone.clock.set(1_500);
    phone.edit_notes(&record.id, "fresh");
    let result = phone.sync().await;

    assert!(result.is_success());
    assert_eq!(phone.notes(&record.id).as_deref(), Some("fresh"));
    assert_eq!(cloud.get(&record.id).unwrap().updated_at, 1_500);
    assert_eq!(phone.pending(), 0);
}

async fn settle_conflict(local_at: Timestamp, remote_at: Timestamp) -> (String, Timestamp, String) {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 100);

    let record = phone.log_workout("base");
    phone.sync().await;

    phone.clock.set(local_at);
    phone.edit_notes(&record.id, "local");
    cloud
        .put_remote(remote_workout_log(&alice, record.id, remote_at, "remote"))
        .unwrap();

    phone.sync().await;

    let local = phone.store.get(&record.id).unwrap();
    assert_eq!(local.sync_state, SyncState::Clean);
    let remote = cloud.get(&record.id).unwrap();
    assert_eq!(remote.updated_at, local.updated_at);
    let cloud_notes = remote.payload.decode::<WorkoutLog>().unwrap().notes;
    (phone.notes(&record.id).unwrap(), local.updated_at, cloud_notes)
}

#[tokio::test]
async fn newer_side_wins_reproducibly() {
    let cases = [(500, 300, "local"), (300, 500, "remote"), (400, 400, "remote")];

    for (local_at, remote_at, winner) in cases {
        let first = settle_conflict(local_at, remote_at).await;
        let second = settle_conflict(local_at, remote_at).await;

        assert_eq!(first, second, "outcome differs between runs");
        assert_eq!(first.0, winner, "local={local_at} remote={remote_at}");
        assert_eq!(first.1, local_at.max(remote_at));
        assert_eq!(first.2, winner);
    }
}

#[tokio::test]
async fn offline_sync_keeps_changes_dirty() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 1_000);
    let records: Vec<_> = ["a", "b", "c"].iter().map(|n| phone.log_workout(n)).collect();
    cloud.set_online(false);

    let result = phone.sync().await;

    assert_eq!(result.uploaded, 0);
    assert_eq!(result.applied, 0);
    assert_eq!(result.error.as_deref(), Some("unreachable"));
    for record in &records {
        assert_eq!(
            phone.store.get(&record.id).unwrap().sync_state,
            SyncState::Dirty
        );
    }
    let status = phone.sync_status();
    assert_eq!(status.pending_local_count, 3);
    assert_eq!(status.last_error.as_deref(), Some("unreachable"));

    cloud.set_online(true);
    let recovered = phone.sync().await;
    assert_eq!(recovered.uploaded, 3);
    assert_eq!(phone.sync_status().last_error, None);
}

#[tokio::test]
async fn partial_batch_failure_retries_next_cycle() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::with_config(
        &cloud,
        &alice,
        1_000,
        SyncConfig::new().with_push_batch_size(2),
    );
    for i in 0..4 {
        phone.clock.advance(1);
        phone.log_workout(&format!("set {i}"));
    }
    cloud.fail_next_calls(1);

    let first = phone.sync().await;
    assert_eq!(first.uploaded, 2);
    assert_eq!(first.failed.len(), 2);
    assert!(first.error.is_some());
    assert_eq!(phone.pending(), 2);

    let second = phone.sync().await;
    assert_eq!(second.uploaded, 2);
    assert!(second.is_success());
    assert_eq!(cloud.live_count(&alice), 4);
}

#[tokio::test]
async fn rejected_record_stays_flagged() {
    let cloud = shared_cloud();
    let phone = TestDevice::new(&cloud, &owner("alice"), 1_000);
    let record = phone.log_workout("bad data");
    cloud.reject_record(record.id, "duration out of range");

    for _ in 0..2 {
        let result = phone.sync().await;
        assert_eq!(result.failed, vec![record.id]);
    }

    let stored = phone.store.get(&record.id).unwrap();
    assert_eq!(stored.sync_state, SyncState::Dirty);
    assert_eq!(stored.sync_error.as_deref(), Some("duration out of range"));
    assert_eq!(phone.pending(), 1);
}

#[tokio::test]
async fn two_devices_converge() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 1_000);
    let tablet = TestDevice::new(&cloud, &alice, 1_000);

    let record = phone.log_workout("from phone");
    phone.sync().await;

    let pulled = tablet.sync().await;
    assert_eq!(pulled.applied, 1);
    assert_eq!(tablet.notes(&record.id).as_deref(), Some("from phone"));

    tablet.clock.set(2_000);
    tablet.edit_notes(&record.id, "from tablet");
    tablet.sync().await;

    phone.sync().await;
    assert_eq!(phone.notes(&record.id).as_deref(), Some("from tablet"));
    assert_eq!(phone.pending(), 0);
    assert_eq!(tablet.pending(), 0);
}

#[tokio::test]
async fn deletion_propagates_and_is_purged() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let config = SyncConfig::new().with_tombstone_retention(Duration::from_secs(60));
    let phone = TestDevice::with_config(&cloud, &alice, 1_000, config.clone());
    let tablet = TestDevice::with_config(&cloud, &alice, 1_000, config);

    let record = phone.log_workout("to delete");
    phone.sync().await;
    tablet.sync().await;

    phone.clock.set(5_000);
    phone.tracker().delete(&record.id).unwrap();
    phone.sync().await;
    assert!(cloud.get(&record.id).unwrap().is_tombstone());

    tablet.sync().await;
    assert!(tablet.store.get(&record.id).is_none());
    assert!(tablet.store.get_any(&record.id).unwrap().is_tombstone());

    tablet.clock.set(5_000 + 61_000);
    let result = tablet.sync().await;
    assert_eq!(result.purged, 1);
    assert!(tablet.store.get_any(&record.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn overlapping_calls_join_one_cycle() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::new(&cloud, &alice, 1_000);
    phone.log_workout("once");
    cloud.set_latency(Duration::from_millis(20));

    let (a, b) = tokio::join!(phone.sync(), phone.sync());

    assert_ne!(a.joined, b.joined);
    assert_eq!(a.uploaded, 1);
    assert_eq!(b.uploaded, 1);
    assert_eq!(cloud.upsert_calls(), 1);
    assert_eq!(phone.stats().cycles_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn background_sync_picks_up_remote_changes() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::with_config(
        &cloud,
        &alice,
        1_000,
        SyncConfig::new().with_sync_interval(Duration::from_secs(10)),
    );
    let record = phone.log_workout("v1");

    phone.start_background_sync(&alice).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(phone.pending(), 0);

    cloud
        .put_remote(remote_workout_log(&alice, record.id, 9_000, "v2"))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(phone.notes(&record.id).as_deref(), Some("v2"));

    phone.stop_background_sync();
    assert_eq!(phone.background_owner(), None);
}

#[tokio::test]
async fn file_backed_device_syncs() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let phone = TestDevice::file(&cloud, &alice, 1_000);
    let record = phone.log_workout("persisted");

    let result = phone.sync().await;

    assert!(result.is_success());
    assert_eq!(cloud.get(&record.id).unwrap().updated_at, 1_000);
    assert_eq!(
        phone.store.watermark(&alice).unwrap().last_pushed_at,
        Some(1_000)
    );
}

#[tokio::test]
async fn devices_with_skewed_clocks_converge() {
    let cloud = shared_cloud();
    let alice = owner("alice");
    let fast = TestDevice::new(&cloud, &alice, 10_000);
    let slow = TestDevice::new(&cloud, &alice, 1_000);

    let from_fast = fast.log_workout("from fast");
    fast.sync().await;

    let from_slow = slow.log_workout("from slow");
    let result = slow.sync().await;
    assert!(result.is_success());
    let stored = cloud.get(&from_slow.id).unwrap();
    assert!(stored.updated_at > 10_000);
    assert_eq!(
        slow.store.get(&from_slow.id).unwrap().updated_at,
        stored.updated_at
    );
    assert_eq!(slow.notes(&from_fast.id).as_deref(), Some("from fast"));

    for _ in 0..3 {
        fast.sync().await;
    }
    assert_eq!(fast.notes(&from_slow.id).as_deref(), Some("from slow"));

    // Edits on the slow device still supersede what it last pulled.
    slow.edit_notes(&from_fast.id, "edited on slow");
    slow.sync().await;
    fast.sync().await;
    assert_eq!(fast.notes(&from_fast.id).as_deref(), Some("edited on slow"));
    assert_eq!(fast.pending(), 0);
    assert_eq!(slow.pending(), 0);
}
