#![cfg(not(loom))]
//! 定时调度器：到期次序、取消与析构。

use netstream_runtime::{Scheduler, TaskError};
use proptest::prelude::*;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn entries_fire_in_deadline_order() {
    let scheduler = Scheduler::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut futures = Vec::new();
    for (label, delay) in [("c", 90), ("a", 10), ("b", 50)] {
        let log = Arc::clone(&log);
        futures.push(scheduler.add_after(Duration::from_millis(delay), move || {
            log.lock().unwrap().push(label);
        }));
    }
    for future in futures {
        assert_eq!(future.wait(), Ok(()));
    }
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    assert!(scheduler.is_empty());
}

#[test]
fn add_after_never_fires_early() {
    let scheduler = Scheduler::new().unwrap();
    let delay = Duration::from_millis(80);
    let started = Instant::now();
    let fired = scheduler.add_after(delay, Instant::now);
    let at = fired.wait().unwrap();
    assert!(at.duration_since(started) >= delay);
}

#[test]
fn past_deadlines_fire_immediately() {
    let scheduler = Scheduler::new().unwrap();
    let past = Instant::now() - Duration::from_millis(5);
    let future = scheduler.add_at(past, || 11);
    assert!(future.wait_timeout(Duration::from_secs(2)));
    assert_eq!(future.try_take(), Some(Ok(11)));
}

#[test]
fn clear_cancels_without_running() {
    let scheduler = Scheduler::new().unwrap();
    let (ran_tx, ran_rx) = mpsc::channel::<()>();
    let futures: Vec<_> = (0..3)
        .map(|_| {
            let ran = ran_tx.clone();
            scheduler.add_after(Duration::from_secs(30), move || ran.send(()).unwrap())
        })
        .collect();
    assert_eq!(scheduler.len(), 3);
    assert_eq!(scheduler.clear(), 3);
    assert_eq!(scheduler.len(), 0);
    for future in futures {
        assert_eq!(future.wait(), Err(TaskError::Abandoned));
    }
    drop(ran_tx);
    assert!(ran_rx.recv().is_err());

    // 清空之后仍可继续登记。
    assert_eq!(scheduler.add_after(Duration::ZERO, || 1).wait(), Ok(1));
}

#[test]
fn a_panicking_entry_does_not_stop_the_scheduler() {
    let scheduler = Scheduler::new().unwrap();
    let failed = scheduler.add_after(Duration::ZERO, || -> u8 { panic!("scheduled panic") });
    assert_eq!(
        failed.wait(),
        Err(TaskError::Panicked("scheduled panic".to_string()))
    );
    assert_eq!(scheduler.add_after(Duration::ZERO, || "alive").wait(), Ok("alive"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// 后台线程被占住期间登记的条目，放行后严格按（到期时间，登记顺序）运行。
    #[test]
    fn queued_entries_follow_deadline_then_insertion(offsets in prop::collection::vec(0u64..20, 1..12)) {
        let scheduler = Scheduler::new().unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let gate = scheduler.add_after(Duration::ZERO, move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        started_rx.recv().unwrap();

        let base = Instant::now();
        let log = Arc::new(Mutex::new(Vec::new()));
        let futures: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(index, offset)| {
                let log = Arc::clone(&log);
                scheduler.add_at(base + Duration::from_millis(*offset), move || {
                    log.lock().unwrap().push(index);
                })
            })
            .collect();
        release_tx.send(()).unwrap();
        prop_assert_eq!(gate.wait(), Ok(()));
        for future in futures {
            prop_assert_eq!(future.wait(), Ok(()));
        }

        let mut expected: Vec<usize> = (0..offsets.len()).collect();
        expected.sort_by_key(|index| (offsets[*index], *index));
        prop_assert_eq!(log.lock().unwrap().clone(), expected);
    }
}
