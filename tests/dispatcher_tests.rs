//! Batch dispatcher integration tests, run against fake host runners so no
//! SSH endpoint is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rossh::connection::TargetHost;
use rossh::executor::{fan_out, HostResult, HostStatus};

fn host(alias: &str) -> TargetHost {
    TargetHost {
        alias: alias.to_string(),
        address: alias.to_string(),
        port: 22,
        user: "tester".to_string(),
        password: None,
        auth_methods: Vec::new(),
    }
}

fn fleet(n: usize) -> Vec<TargetHost> {
    (0..n).map(|i| host(&format!("h{:02}", i))).collect()
}

#[tokio::test]
async fn emits_exactly_one_result_per_host() {
    for &(hosts, concurrency) in &[(1usize, 1usize), (10, 2), (25, 8), (5, 32)] {
        let mut rx = fan_out(fleet(hosts), concurrency, |h| async move {
            HostResult::success(h.alias, "done")
        });

        let mut seen = Vec::new();
        while let Some(result) = rx.recv().await {
            seen.push(result.alias);
        }

        seen.sort();
        seen.dedup();
        assert_eq!(
            seen.len(),
            hosts,
            "hosts={} concurrency={}",
            hosts,
            concurrency
        );
    }
}

#[tokio::test]
async fn success_and_failure_counts_partition_the_results() {
    let mut rx = fan_out(fleet(12), 4, |h| async move {
        let index: usize = h.alias[1..].parse().unwrap();
        if index % 3 == 0 {
            HostResult::failed(h.alias, "auth failed: simulated")
        } else {
            HostResult::success(h.alias, "ok")
        }
    });

    let mut success = 0;
    let mut failure = 0;
    let mut total = 0;
    while let Some(result) = rx.recv().await {
        total += 1;
        match result.status {
            HostStatus::Success => success += 1,
            HostStatus::Failed => failure += 1,
        }
    }

    assert_eq!(total, 12);
    assert_eq!(success + failure, total);
    assert_eq!(failure, 4);
}

#[tokio::test]
async fn never_exceeds_the_worker_pool() {
    for &concurrency in &[1usize, 2, 5] {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let in_flight2 = in_flight.clone();
        let peak2 = peak.clone();
        let mut rx = fan_out(fleet(20), concurrency, move |h| {
            let in_flight = in_flight2.clone();
            let peak = peak2.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                HostResult::success(h.alias, "ok")
            }
        });

        while rx.recv().await.is_some() {}

        assert!(
            peak.load(Ordering::SeqCst) <= concurrency,
            "peak {} exceeded pool {}",
            peak.load(Ordering::SeqCst),
            concurrency
        );
    }
}

#[tokio::test]
async fn results_arrive_in_completion_order_not_input_order() {
    let hosts = vec![host("slow"), host("quick")];
    let mut rx = fan_out(hosts, 2, |h| async move {
        if h.alias == "slow" {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        HostResult::success(h.alias, "ok")
    });

    let first = rx.recv().await.unwrap();
    assert_eq!(first.alias, "quick");
    let second = rx.recv().await.unwrap();
    assert_eq!(second.alias, "slow");
}

#[tokio::test]
async fn dropping_the_receiver_abandons_late_results_quietly() {
    // the task-deadline path: the facade stops consuming and drops the
    // receiver; stragglers finish in the background without panicking
    let started = Arc::new(AtomicUsize::new(0));
    let started2 = started.clone();

    let mut rx = fan_out(fleet(6), 2, move |h| {
        let started = started2.clone();
        async move {
            started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            HostResult::success(h.alias, "late")
        }
    });

    // take one result, then walk away
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, HostStatus::Success);
    drop(rx);

    // give stragglers time to hit the closed channel
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(started.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn a_panicking_worker_still_yields_a_result() {
    let mut rx = fan_out(fleet(3), 3, |h| async move {
        if h.alias == "h01" {
            panic!("simulated module bug");
        }
        HostResult::success(h.alias, "ok")
    });

    let mut total = 0;
    let mut failed = 0;
    while let Some(result) = rx.recv().await {
        total += 1;
        if result.status == HostStatus::Failed {
            failed += 1;
            assert_eq!(result.alias, "h01");
        }
    }

    assert_eq!(total, 3);
    assert_eq!(failed, 1);
}
