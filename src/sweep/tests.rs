//! Unit tests for the sweep orchestration.

use std::time::Duration;

use super::*;
use crate::test_support::{FakeProvider, ProviderCall, instance_with_keys};
use rstest::{fixture, rstest};

fn limit(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).expect("non-zero limit")
}

fn sweeper(provider: &FakeProvider) -> KeySweeper<FakeProvider> {
    KeySweeper::new(provider.clone(), limit(8))
}

fn unavailable() -> ProviderError {
    ProviderError::Api {
        status: 503,
        message: String::from("backend unavailable"),
    }
}

#[fixture]
fn removal() -> RemovalSet {
    RemovalSet::new(["user1", "user3"])
}

#[rstest]
fn rebuild_replaces_only_ssh_keys(removal: RemovalSet) {
    let instance = instance_with_keys("vm-1", "fp-1", "user1:keyA\nuser2:keyB\nuser3:keyC");

    let rebuilt = rebuild_metadata(&instance.metadata, &removal);

    assert_eq!(rebuilt.fingerprint.as_deref(), Some("fp-1"));
    assert_eq!(rebuilt.items.len(), instance.metadata.items.len());
    for (before, after) in instance.metadata.items.iter().zip(&rebuilt.items) {
        assert_eq!(before.key, after.key);
        if before.key != SSH_KEYS_METADATA_KEY {
            assert_eq!(before, after);
        }
    }
    let keys = rebuilt
        .items
        .iter()
        .find(|item| item.key == SSH_KEYS_METADATA_KEY)
        .and_then(|item| item.value.as_deref());
    assert_eq!(keys, Some("user2:keyB"));
}

#[rstest]
fn rebuild_passes_through_metadata_without_keys(removal: RemovalSet) {
    let metadata = Metadata {
        fingerprint: None,
        items: vec![
            MetadataItem::new("user1", "not-a-key-entry"),
            MetadataItem {
                key: String::from(SSH_KEYS_METADATA_KEY),
                value: None,
            },
        ],
    };

    assert_eq!(rebuild_metadata(&metadata, &removal), metadata);
}

#[rstest]
#[tokio::test]
async fn sweep_updates_every_instance(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1", "zone-2"]);
    provider.add_instance("zone-1", instance_with_keys("vm-1", "fp-1", "user1:k1\nuser2:k2"));
    provider.add_instance("zone-2", instance_with_keys("vm-2", "fp-2", "user3:k3\nuser4:k4"));

    let summary = sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect("sweep should run");

    assert!(summary.is_clean());
    assert_eq!(summary.zones, 2);
    assert_eq!(summary.instances_updated, 2);
    assert_eq!(summary.instances_failed, 0);

    let mut updates = provider.updates();
    updates.sort_by(|left, right| left.1.cmp(&right.1));
    let values: Vec<(String, Option<String>, Option<String>)> = updates
        .into_iter()
        .map(|(zone, _, metadata)| {
            let keys = metadata
                .items
                .iter()
                .find(|item| item.key == SSH_KEYS_METADATA_KEY)
                .and_then(|item| item.value.clone());
            (zone, metadata.fingerprint, keys)
        })
        .collect();
    assert_eq!(
        values,
        vec![
            (
                String::from("zone-1"),
                Some(String::from("fp-1")),
                Some(String::from("user2:k2"))
            ),
            (
                String::from("zone-2"),
                Some(String::from("fp-2")),
                Some(String::from("user4:k4"))
            ),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn zone_listing_failure_aborts_before_dispatch(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1"]);
    provider.fail_zones(unavailable());

    let err = sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect_err("sweep should abort");

    assert_eq!(
        err,
        SweepError::ListZones {
            project_id: String::from("proj"),
            source: unavailable(),
        }
    );
    assert_eq!(
        provider.calls(),
        vec![ProviderCall::ListZones {
            project_id: String::from("proj")
        }]
    );
    assert_eq!(provider.instance_listings(), 0);
}

#[rstest]
#[tokio::test]
async fn empty_zone_succeeds_without_updates(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1"]);

    let summary = sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect("sweep");

    assert!(summary.is_clean());
    assert_eq!(summary.zones_unlisted, 0);
    assert!(provider.updates().is_empty());
}

#[rstest]
#[tokio::test]
async fn instance_listing_failure_is_not_a_zone_failure(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1", "zone-2"]);
    provider.fail_instances("zone-1", unavailable());
    provider.add_instance("zone-1", instance_with_keys("vm-hidden", "fp", "user1:k"));
    provider.add_instance("zone-2", instance_with_keys("vm-2", "fp", "user1:k"));

    let summary = sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect("sweep");

    assert!(summary.is_clean());
    assert_eq!(provider.instance_listings(), 2);
    assert_eq!(summary.zones_unlisted, 1);
    assert_eq!(summary.instances_updated, 1);
    let updated: Vec<String> = provider
        .updates()
        .into_iter()
        .map(|(_, instance, _)| instance)
        .collect();
    assert_eq!(updated, vec![String::from("vm-2")]);
}

#[rstest]
#[tokio::test]
async fn one_failed_update_fails_the_zone_without_short_circuit(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1"]);
    for name in ["vm-1", "vm-2", "vm-3", "vm-4"] {
        provider.add_instance("zone-1", instance_with_keys(name, "fp", "user1:k"));
    }
    provider.reject_update("vm-2");

    let summary = sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect("sweep");

    assert_eq!(provider.updates().len(), 4, "every update must be attempted");
    assert_eq!(summary.instances_updated, 3);
    assert_eq!(summary.instances_failed, 1);
    let [failure] = summary.failed_zones.as_slice() else {
        panic!("expected one failed zone, got {:?}", summary.failed_zones);
    };
    assert_eq!(failure.zone, "zone-1");
    assert_eq!(failure.attempted, 4);
    assert_eq!(
        failure.failures.iter().map(|f| f.instance.as_str()).collect::<Vec<_>>(),
        ["vm-2"]
    );
    assert!(
        failure.to_string().starts_with("failed to remove ssh key"),
        "unexpected message: {failure}"
    );
}

#[rstest]
#[tokio::test]
async fn one_failing_zone_of_two_is_reported_once(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1", "zone-2"]);
    provider.add_instance("zone-1", instance_with_keys("vm-1", "fp", "user1:k"));
    provider.add_instance("zone-2", instance_with_keys("vm-2", "fp", "user1:k"));
    provider.reject_update("vm-2");

    let summary = sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect("sweep");

    let zones: Vec<&str> = summary
        .failed_zones
        .iter()
        .map(|failure| failure.zone.as_str())
        .collect();
    assert_eq!(zones, ["zone-2"]);
    assert_eq!(summary.instances_updated, 1);
}

#[rstest]
#[tokio::test]
async fn instance_without_ssh_keys_is_still_updated(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1"]);
    let bare = Instance {
        name: String::from("vm-bare"),
        metadata: Metadata {
            fingerprint: Some(String::from("fp")),
            items: vec![MetadataItem::new("startup-script", "true")],
        },
    };
    provider.add_instance("zone-1", bare.clone());

    sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect("sweep");

    let updates = provider.updates();
    let [(_, instance, metadata)] = updates.as_slice() else {
        panic!("expected a single update, got {updates:?}");
    };
    assert_eq!(instance, "vm-bare");
    assert_eq!(metadata, &bare.metadata);
}

#[rstest]
#[tokio::test]
async fn panicked_tasks_fail_their_own_unit_by_name(removal: RemovalSet) {
    let provider = FakeProvider::new();
    provider.set_zones(&["zone-1", "zone-2", "zone-3"]);
    provider.add_instance("zone-1", instance_with_keys("vm-1", "fp", "user1:k"));
    provider.add_instance("zone-1", instance_with_keys("vm-crash", "fp", "user1:k"));
    provider.add_instance("zone-2", instance_with_keys("vm-hidden", "fp", "user1:k"));
    provider.add_instance("zone-3", instance_with_keys("vm-3", "fp", "user1:k"));
    provider.panic_on_update("vm-crash");
    provider.panic_on_listing("zone-2");

    let summary = sweeper(&provider)
        .sweep("proj", &removal)
        .await
        .expect("panicking tasks must not abort the sweep");

    let mut failed = summary.failed_zones.clone();
    failed.sort_by(|left, right| left.zone.cmp(&right.zone));
    let zones: Vec<&str> = failed.iter().map(|failure| failure.zone.as_str()).collect();
    assert_eq!(zones, ["zone-1", "zone-2"]);
    let instances: Vec<&str> = failed
        .iter()
        .flat_map(|failure| &failure.failures)
        .map(|failure| failure.instance.as_str())
        .collect();
    assert_eq!(instances, ["vm-crash"]);
    assert_eq!(summary.instances_updated, 2);
    assert_eq!(summary.instances_failed, 1);

    let mut updated: Vec<String> = provider
        .updates()
        .into_iter()
        .map(|(_, instance, _)| instance)
        .collect();
    updated.sort();
    assert_eq!(updated, ["vm-1", "vm-3", "vm-crash"]);
}

#[tokio::test]
async fn provider_calls_respect_the_concurrency_limit() {
    let provider = FakeProvider::new();
    provider.set_call_delay(Duration::from_millis(10));
    provider.set_zones(&["zone-1", "zone-2", "zone-3"]);
    for zone in ["zone-1", "zone-2", "zone-3"] {
        for index in 0..4 {
            provider.add_instance(
                zone,
                instance_with_keys(&format!("{zone}-vm-{index}"), "fp", "user1:k"),
            );
        }
    }

    let summary = KeySweeper::new(provider.clone(), limit(2))
        .sweep("proj", &RemovalSet::new(["user1"]))
        .await
        .expect("sweep");

    assert_eq!(summary.instances_updated, 12);
    assert_eq!(provider.peak_in_flight(), 2);
}

#[tokio::test]
async fn instance_updates_run_concurrently() {
    let provider = FakeProvider::new();
    provider.set_call_delay(Duration::from_millis(10));
    provider.set_zones(&["zone-1"]);
    for index in 0..5 {
        provider.add_instance(
            "zone-1",
            instance_with_keys(&format!("vm-{index}"), "fp", "user1:k"),
        );
    }

    let summary = KeySweeper::new(provider.clone(), limit(64))
        .sweep("proj", &RemovalSet::new(["user1"]))
        .await
        .expect("sweep");

    assert_eq!(summary.instances_updated, 5);
    assert_eq!(provider.peak_in_flight(), 5);
}
