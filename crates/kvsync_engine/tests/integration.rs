//! Integration tests for the sync engine against simulated devices.

use kvsync_engine::{DataSource, PullTimestamp, RemoteBundle, SyncConfig};
use kvsync_store::{ChangeReason, ExternalChange, FileLocalStore, LocalStore, Value};
use kvsync_testkit::prelude::*;
use proptest::prelude::*;

#[tokio::test]
async fn local_value_is_pushed_when_key_is_added() {
    init_tracing();
    let device = TestDevice::memory();
    device.write_local("theme", Some(Value::from("1")));
    let before = device.clock.peek();

    device.track(&["theme"]);
    device.engine.sync().await;

    let bundle = device.remote_bundle("theme").unwrap();
    assert_eq!(bundle.value, Value::from("1"));
    assert!(bundle.timestamp >= before);
}

#[tokio::test]
async fn remote_value_replaces_default() {
    let device = TestDevice::memory();
    device.seed_remote("theme", 10, Value::from("2"));
    let key = device.key("theme").with_default(Value::from("0"));

    device.engine.add([key.clone()]);
    device.engine.sync().await;

    assert_eq!(key.value().unwrap(), Some(Value::from("2")));
    assert_eq!(device.read_local("theme"), Some(Value::from("2")));
}

#[tokio::test]
async fn default_is_never_written() {
    let device = TestDevice::memory();
    let key = device.key("theme").with_default(Value::from("0"));

    device.engine.add([key.clone()]);
    device.engine.sync().await;

    assert_eq!(device.read_local("theme"), None);
    assert_eq!(device.remote_bundle("theme"), None);
    assert_eq!(key.value().unwrap(), Some(Value::from("0")));
}

#[tokio::test]
async fn stale_notification_performs_no_write() {
    for remote_micros in [50, 100] {
        let device = TestDevice::memory();
        device.write_local("theme", Some(Value::from("mine")));
        let key = device.track(&["theme"]).remove(0);
        device.engine.sync().await;

        device.engine.record_timestamp(&key, ts(100), DataSource::Local);
        device.seed_remote("theme", remote_micros, Value::from("old"));
        let local_writes = device.local.writes_for("theme");
        let remote_writes = device.remote.writes_for("theme");
        let skipped = device.engine.stats().skipped_pulls;

        device.remote.broadcast(&ExternalChange::server_change(["theme"]));
        device.engine.sync().await;

        assert_eq!(device.read_local("theme"), Some(Value::from("mine")));
        assert_eq!(device.local.writes_for("theme"), local_writes);
        assert_eq!(device.remote.writes_for("theme"), remote_writes);
        assert_eq!(device.engine.stats().skipped_pulls, skipped + 1);
    }
}

#[tokio::test]
async fn newer_notification_is_pulled() {
    let device = TestDevice::memory();
    device.write_local("theme", Some(Value::from("mine")));
    let key = device.track(&["theme"]).remove(0);
    device.engine.sync().await;
    device.engine.record_timestamp(&key, ts(100), DataSource::Local);

    device.seed_remote("theme", 101, Value::from("theirs"));
    device.remote.broadcast(&ExternalChange::server_change(["theme"]));
    device.engine.sync().await;

    assert_eq!(device.read_local("theme"), Some(Value::from("theirs")));
}

#[tokio::test]
async fn quota_violation_keys_are_still_processed() {
    let device = TestDevice::memory();
    device.track(&["theme"]);
    device.engine.sync().await;

    device.seed_remote("theme", i64::MAX / 2, Value::from("theirs"));
    device.remote.broadcast(&ExternalChange {
        reason: ChangeReason::QuotaViolation,
        keys: vec!["theme".to_string()],
    });
    device.engine.sync().await;

    assert_eq!(device.read_local("theme"), Some(Value::from("theirs")));
}

#[tokio::test]
async fn notifications_for_untracked_keys_are_ignored() {
    let device = TestDevice::memory();
    device.track(&["theme"]);
    device.engine.sync().await;

    device.seed_remote("volume", 5, Value::from(11));
    device.remote.broadcast(&ExternalChange::server_change(["volume"]));
    device.engine.sync().await;

    assert_eq!(device.read_local("volume"), None);
}

#[tokio::test]
async fn concurrent_add_registers_key_once() {
    let device = TestDevice::memory();
    let key = device.key("theme");

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| device.engine.add([key.clone()]));
        }
    });
    device.engine.sync().await;

    assert_eq!(device.engine.keys(), vec![key]);
    assert_eq!(device.local.watcher_count(), 1);
}

#[tokio::test]
async fn one_local_write_makes_one_remote_write() {
    let device = TestDevice::echoing();
    device.track(&["theme"]);
    device.engine.sync().await;
    let remote_writes = device.remote.writes_for("theme");

    device.write_local("theme", Some(Value::from("dark")));
    device.engine.sync().await;

    assert_eq!(device.remote.writes_for("theme"), remote_writes + 1);
    // The only local write is ours; the echo did not pull anything back.
    assert_eq!(device.local.writes_for("theme"), 1);
    let stats = device.engine.stats();
    assert!(stats.suppressed_echoes >= 1);
    assert_eq!(stats.pulls, 0);
}

#[tokio::test]
async fn writes_apply_in_fifo_order() {
    let device = TestDevice::memory();
    let keys = device.track(&["a", "b"]);
    device.engine.sync().await;

    for i in 0..20 {
        device.write_local("a", Some(Value::from(i)));
        device.engine.sync_without_waiting(Some(&keys[..1]), None);
        device.write_local("b", Some(Value::from(100 + i)));
    }
    device.engine.sync().await;

    assert_eq!(device.remote_bundle("a").unwrap().value, Value::from(19));
    assert_eq!(device.remote_bundle("b").unwrap().value, Value::from(119));
}

#[tokio::test]
async fn local_deletion_propagates() {
    let device = TestDevice::memory();
    device.seed_remote("theme", 5, Value::from("dark"));
    let key = device.key("theme");

    device
        .engine
        .sync_without_waiting(Some(std::slice::from_ref(&key)), Some(DataSource::Local));
    device.engine.sync().await;

    assert_eq!(device.remote_bundle("theme"), None);
}

#[tokio::test]
async fn edits_reach_the_other_device() {
    let (phone, laptop) = two_devices();
    phone.track(&["theme"]);
    laptop.track(&["theme"]);
    settle(&[&phone, &laptop]).await;

    phone.write_local("theme", Some(Value::from("dark")));
    let laptop_writes = laptop.remote.writes_for("theme");
    settle(&[&phone, &laptop]).await;

    assert_eq!(laptop.read_local("theme"), Some(Value::from("dark")));
    assert_eq!(laptop.remote.writes_for("theme"), laptop_writes);

    laptop.write_local("theme", Some(Value::from("light")));
    settle(&[&phone, &laptop]).await;

    assert_eq!(phone.read_local("theme"), Some(Value::from("light")));
    assert_eq!(
        phone.remote_bundle("theme").map(|bundle| bundle.value),
        Some(Value::from("light"))
    );
}

#[tokio::test]
async fn disconnected_device_catches_up() {
    let (phone, laptop) = two_devices();
    phone.track(&["theme"]);
    laptop.track(&["theme"]);
    settle(&[&phone, &laptop]).await;

    laptop.remote.set_connected(false);
    phone.write_local("theme", Some(Value::from("dark")));
    settle(&[&phone, &laptop]).await;

    assert_eq!(laptop.read_local("theme"), None);
    assert!(laptop.engine.stats().failures >= 1);
    assert!(!laptop.engine.on_foreground());

    laptop.remote.set_connected(true);
    assert!(laptop.engine.on_foreground());
    laptop.engine.sync_without_waiting(None, None);
    settle(&[&phone, &laptop]).await;

    assert_eq!(laptop.read_local("theme"), Some(Value::from("dark")));
}

#[tokio::test]
async fn repeated_sync_is_idempotent_with_remote_timestamps() {
    let config = SyncConfig::default().with_pull_timestamp(PullTimestamp::Remote);
    let device = TestDevice::memory_with(config);
    device.write_local("theme", Some(Value::from("dark")));
    device.track(&["theme"]);
    device.engine.sync().await;
    device.engine.sync_without_waiting(None, None);
    device.engine.sync().await;

    let local = device.local.snapshot();
    let remote = device.remote.snapshot();
    for _ in 0..3 {
        device.engine.sync_without_waiting(None, None);
        device.engine.sync().await;
        assert_eq!(device.local.snapshot(), local);
        assert_eq!(device.remote.snapshot(), remote);
    }
}

#[tokio::test]
async fn repeated_sync_keeps_values_with_applied_timestamps() {
    let device = TestDevice::memory();
    device.write_local("theme", Some(Value::from("dark")));
    device.track(&["theme"]);
    device.engine.sync().await;

    for _ in 0..4 {
        device.engine.sync_without_waiting(None, None);
        device.engine.sync().await;
        assert_eq!(device.read_local("theme"), Some(Value::from("dark")));
        assert_eq!(
            device.remote_bundle("theme").map(|bundle| bundle.value),
            Some(Value::from("dark"))
        );
    }
}

#[tokio::test]
async fn remote_timestamp_can_be_aligned() {
    let device = TestDevice::memory();
    device.seed_remote("theme", 7, Value::from("dark"));
    let key = device.key("theme");

    device.engine.record_timestamp(&key, ts(70), DataSource::Remote);

    assert_eq!(
        device.remote_bundle("theme"),
        Some(RemoteBundle::new(ts(70), Value::from("dark")))
    );
}

#[tokio::test]
async fn file_store_keeps_timestamp_records() {
    let device = TestDevice::file();
    device.track(&["theme"]);
    device.engine.sync().await;

    device.write_local("theme", Some(Value::from("dark")));
    device.engine.sync().await;

    let reopened = FileLocalStore::open(device.local.path()).unwrap();
    let record = device.engine.config().timestamp_key("theme");
    assert_eq!(reopened.get("theme").unwrap(), Some(Value::from("dark")));
    assert_eq!(
        reopened.get(&record).unwrap().as_ref().and_then(|v| v.as_integer()),
        device.local_timestamp("theme").map(|ts| ts.as_micros())
    );
    assert_eq!(
        device.remote_bundle("theme").map(|bundle| bundle.value),
        Some(Value::from("dark"))
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn inferred_sync_converges_on_newer_side(
        local_micros in 0i64..100,
        remote_micros in 0i64..100,
        local_value in value_strategy(),
        remote_value in value_strategy(),
    ) {
        let (local, remote) = block_on(async {
            let device = TestDevice::memory();
            let key = device.key("theme");
            device.write_local("theme", Some(local_value.clone()));
            device.engine.record_timestamp(&key, ts(local_micros), DataSource::Local);
            device.seed_remote("theme", remote_micros, remote_value.clone());

            device.engine.sync_without_waiting(Some(std::slice::from_ref(&key)), None);
            device.engine.sync().await;
            (
                device.read_local("theme"),
                device.remote_bundle("theme").map(|bundle| bundle.value),
            )
        });

        let winner = if local_micros > remote_micros { local_value } else { remote_value };
        prop_assert_eq!(local, Some(winner.clone()));
        prop_assert_eq!(remote, Some(winner));
    }

    #[test]
    fn devices_converge_on_last_write(script in write_script_strategy(3, 24)) {
        const NAMES: [&str; 3] = ["alpha", "beta", "gamma"];
        let config = SyncConfig::default().with_pull_timestamp(PullTimestamp::Remote);

        let (phone_state, laptop_state, remote_state) = block_on(async {
            let phone = TestDevice::memory_with(config.clone());
            let laptop = phone.connect(config);
            phone.track(&NAMES);
            laptop.track(&NAMES);
            settle(&[&phone, &laptop]).await;

            for write in &script {
                phone.write_local(NAMES[write.key], write.value.clone());
            }
            settle(&[&phone, &laptop]).await;

            let read = |device: &TestDevice| -> Vec<Option<Value>> {
                NAMES.iter().map(|name| device.read_local(name)).collect()
            };
            let remote: Vec<_> = NAMES
                .iter()
                .map(|name| phone.remote_bundle(name).map(|bundle| bundle.value))
                .collect();
            (read(&phone), read(&laptop), remote)
        });

        for (i, name) in NAMES.iter().enumerate() {
            let last = script.iter().rev().find(|write| write.key == i);
            if let Some(last) = last {
                prop_assert_eq!(&phone_state[i], &last.value, "phone {}", name);
            }
            prop_assert_eq!(&remote_state[i], &phone_state[i], "remote {}", name);
            // Remote deletions are not pulled, so only present values must match.
            if phone_state[i].is_some() {
                prop_assert_eq!(&laptop_state[i], &phone_state[i], "laptop {}", name);
            }
        }
    }
}
