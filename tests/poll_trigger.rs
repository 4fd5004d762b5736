//! Single-slot trigger semantics and the background poll loop.

mod common;

use common::*;
use lorabridge::cloud::CloudApi;
use lorabridge::link::LineSink;
use lorabridge::poller::{PollTrigger, Poller};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio_test::{assert_pending, assert_ready, task};

#[test]
fn wait_is_pending_until_fired() {
    let trigger = PollTrigger::new();
    let mut waiter = task::spawn(trigger.wait());
    assert_pending!(waiter.poll());

    trigger.fire();
    assert!(waiter.is_woken());
    assert_ready!(waiter.poll());
    assert!(!trigger.is_pending());
}

#[test]
fn burst_of_fires_yields_a_single_wake() {
    let trigger = PollTrigger::new();
    trigger.fire();
    trigger.fire();
    trigger.fire();

    let mut first = task::spawn(trigger.wait());
    assert_ready!(first.poll());

    let mut second = task::spawn(trigger.wait());
    assert_pending!(second.poll());
}

#[test]
fn fire_while_waiting_then_again_queues_one_more() {
    let trigger = PollTrigger::new();
    let mut waiter = task::spawn(trigger.wait());
    assert_pending!(waiter.poll());
    trigger.fire();
    trigger.fire();
    assert_ready!(waiter.poll());

    // The second fire landed after the flag was set; it is not a second cycle.
    let mut next = task::spawn(trigger.wait());
    assert_pending!(next.poll());
}

async fn wait_for_time_lines(sink: &CaptureSink, seen: &mut Vec<String>, want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while seen.iter().filter(|l| l.starts_with("time:")).count() < want
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
        seen.extend(take_lines(sink));
    }
}

#[tokio::test]
async fn poll_loop_runs_one_cycle_per_collapsed_burst() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let registry = registry_with(&config, &[("AA:BB", "tok")]);
    let cloud = FakeCloud::new();
    let sink = capture_sink();
    let cloud_dyn: Arc<dyn CloudApi> = cloud.clone();
    let sink_dyn: Arc<dyn LineSink> = Arc::new(sink.clone());
    let poller = Poller::new(&config, registry, cloud_dyn, sink_dyn);

    let trigger = Arc::new(PollTrigger::new());
    let handle = tokio::spawn(poller.run(Arc::clone(&trigger)));

    // Fired back to back without yielding: the loop cannot wake in between.
    trigger.fire();
    trigger.fire();
    trigger.fire();

    let mut seen = Vec::new();
    wait_for_time_lines(&sink, &mut seen, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    seen.extend(take_lines(&sink));
    assert_eq!(seen.iter().filter(|l| l.starts_with("time:")).count(), 1);

    trigger.fire();
    wait_for_time_lines(&sink, &mut seen, 2).await;
    assert_eq!(seen.iter().filter(|l| l.starts_with("time:")).count(), 2);

    handle.abort();
}
