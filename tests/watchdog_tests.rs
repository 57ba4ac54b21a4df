//! Funding watchdog integration tests: bounded scans, rotating windows,
//! and top-up execution against the simulated registry.

mod test_harness;

use std::sync::Arc;

use keeper_lite::config::WatchdogConfig;
use keeper_lite::events::{EventBus, KeeperEvent};
use keeper_lite::registry::{JobRegistryClient, SimulatedRegistry};
use keeper_lite::roster::Address;
use keeper_lite::watchdog::FundingWatchdog;
use tokio::time::Duration;
use uuid::Uuid;

use test_harness::count_events;

const MIN_BALANCE: u128 = 1_000;

struct WatchdogFixture {
    dog: FundingWatchdog,
    registry: Arc<SimulatedRegistry>,
    events: EventBus,
    owner: Address,
    forwarder: Address,
}

async fn fixture(config: WatchdogConfig, jobs: usize) -> (WatchdogFixture, Vec<Uuid>) {
    let owner = Address::random();
    let forwarder = Address::random();
    let registry =
        Arc::new(SimulatedRegistry::new(Duration::from_secs(60)).with_min_balance(MIN_BALANCE));
    let events = EventBus::default();

    let mut dog = FundingWatchdog::new(registry.clone(), events.clone(), config, owner);
    dog.set_forwarder(owner, forwarder, true).unwrap();
    dog.deposit(1_000_000);

    let mut ids = Vec::new();
    for _ in 0..jobs {
        // Funded at exactly twice the minimum, i.e. at the default target.
        let id = registry.register("gauge-distribution", 1, MIN_BALANCE * 2).await.unwrap();
        dog.add_to_watch_list(owner, id).unwrap();
        ids.push(id);
    }

    (
        WatchdogFixture {
            dog,
            registry,
            events,
            owner,
            forwarder,
        },
        ids,
    )
}

#[tokio::test]
async fn test_healthy_jobs_produce_no_top_ups() {
    let (fx, _ids) = fixture(WatchdogConfig::default(), 5).await;
    assert!(fx.dog.check_underfunded(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_flags_only_underfunded_jobs() {
    let (fx, ids) = fixture(WatchdogConfig::default(), 5).await;
    // Default floor is 120% of min_balance.
    fx.registry.set_balance(ids[2], MIN_BALANCE).await.unwrap();

    let top_ups = fx.dog.check_underfunded(0).await.unwrap();
    assert_eq!(top_ups.len(), 1);
    assert_eq!(top_ups[0].job_id, ids[2]);
    // Refill aims for the 200% target: 2000 - 1000.
    assert_eq!(top_ups[0].amount, MIN_BALANCE);
}

#[tokio::test]
async fn test_top_up_amount_is_capped() {
    let config = WatchdogConfig::default().with_max_top_up(300);
    let (fx, ids) = fixture(config, 1).await;
    fx.registry.set_balance(ids[0], 0).await.unwrap();

    let top_ups = fx.dog.check_underfunded(0).await.unwrap();
    assert_eq!(top_ups[0].amount, 300);
}

#[tokio::test]
async fn test_scan_window_is_bounded_and_rotates() {
    let config = WatchdogConfig::default()
        .with_scan_batch_size(2)
        .with_max_iterations(2);
    let (fx, _ids) = fixture(config, 6).await;
    fx.registry.drain_all(u128::MAX).await;

    // Every job is underfunded but one scan inspects only two entries.
    let first = fx.dog.check_underfunded(0).await.unwrap();
    assert_eq!(first.len(), 2);

    // Advancing the signal rotates the window across the whole list.
    let mut seen: Vec<Uuid> = Vec::new();
    for signal in 0..6u64 {
        for top_up in fx.dog.check_underfunded(signal).await.unwrap() {
            if !seen.contains(&top_up.job_id) {
                seen.push(top_up.job_id);
            }
        }
    }
    assert_eq!(seen.len(), 6, "some watch-list entry was starved");
}

#[tokio::test]
async fn test_perform_top_up_refunds_through_the_registry() {
    let (mut fx, ids) = fixture(WatchdogConfig::default(), 2).await;
    fx.registry.set_balance(ids[0], 100).await.unwrap();

    let top_ups = fx.dog.check_underfunded(0).await.unwrap();
    let succeeded = fx.dog.perform_top_up(fx.forwarder, &top_ups).await.unwrap();
    assert_eq!(succeeded, 1);
    assert_eq!(fx.registry.balance(ids[0]).await.unwrap(), MIN_BALANCE * 2);
    assert_eq!(fx.dog.balance(), 1_000_000 - (MIN_BALANCE * 2 - 100));
    assert_eq!(
        count_events(&fx.events, |e| matches!(e, KeeperEvent::TopUpSucceeded { .. })),
        1
    );
}

#[tokio::test]
async fn test_entries_no_longer_underfunded_are_skipped_at_act_time() {
    let (mut fx, ids) = fixture(WatchdogConfig::default(), 1).await;
    fx.registry.set_balance(ids[0], 100).await.unwrap();
    let top_ups = fx.dog.check_underfunded(0).await.unwrap();

    // Someone else refunds the job between scan and act.
    fx.registry.set_balance(ids[0], MIN_BALANCE * 2).await.unwrap();

    let succeeded = fx.dog.perform_top_up(fx.forwarder, &top_ups).await.unwrap();
    assert_eq!(succeeded, 0);
    assert_eq!(
        count_events(&fx.events, |e| matches!(e, KeeperEvent::TopUpFailed { .. })),
        1
    );
    // The balance is untouched by the skipped entry.
    assert_eq!(fx.registry.balance(ids[0]).await.unwrap(), MIN_BALANCE * 2);
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_entry_does_not_abort_the_round() {
    let (mut fx, ids) = fixture(WatchdogConfig::default(), 3).await;
    for &id in &ids {
        fx.registry.set_balance(id, 100).await.unwrap();
    }
    let top_ups = fx.dog.check_underfunded(0).await.unwrap();
    assert_eq!(top_ups.len(), 3);

    // Withdraw one job out from under the round.
    fx.registry.cancel(ids[1]).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    fx.registry.withdraw(ids[1]).await.unwrap();

    let succeeded = fx.dog.perform_top_up(fx.forwarder, &top_ups).await.unwrap();
    assert_eq!(succeeded, 2);
    assert_eq!(
        count_events(&fx.events, |e| matches!(e, KeeperEvent::TopUpFailed { .. })),
        1
    );
}

#[tokio::test]
async fn test_top_ups_stop_when_the_watchdog_runs_dry() {
    let (mut fx, ids) = fixture(WatchdogConfig::default(), 2).await;
    for &id in &ids {
        fx.registry.set_balance(id, 0).await.unwrap();
    }
    // Leave enough for exactly one full top-up of 2000.
    fx.dog.withdraw(fx.owner, 1_000_000 - 2_500, fx.owner).unwrap();

    let top_ups = fx.dog.check_underfunded(0).await.unwrap();
    assert_eq!(top_ups.len(), 2);
    let succeeded = fx.dog.perform_top_up(fx.forwarder, &top_ups).await.unwrap();

    assert_eq!(succeeded, 1);
    assert_eq!(fx.dog.balance(), 500);
    assert_eq!(
        count_events(&fx.events, |e| matches!(e, KeeperEvent::TopUpFailed { .. })),
        1
    );
}

#[tokio::test]
async fn test_registry_outage_fails_the_scan() {
    let (fx, _ids) = fixture(WatchdogConfig::default(), 2).await;
    fx.registry.set_unavailable(true);
    assert!(fx.dog.check_underfunded(0).await.is_err());
}

#[tokio::test]
async fn test_policy_updates_are_owner_only_and_validated() {
    let (mut fx, _ids) = fixture(WatchdogConfig::default(), 1).await;
    let stranger = Address::random();
    assert!(fx.dog.set_policy(stranger, WatchdogConfig::default()).is_err());
    assert!(fx
        .dog
        .set_policy(fx.owner, WatchdogConfig::default().with_percentages(150, 100))
        .is_err());
    assert!(fx
        .dog
        .set_policy(fx.owner, WatchdogConfig::default().with_max_top_up(1))
        .is_ok());
}
