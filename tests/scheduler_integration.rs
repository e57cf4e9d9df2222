//! Scheduler loop behaviour under paused time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use acquirer_core::{Scheduler, TaskOutcome};
use tokio_util::sync::CancellationToken;

fn counting_task(
    scheduler: &Scheduler,
    name: &str,
    interval: Duration,
    work: Duration,
) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    scheduler
        .register(name, interval, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                anyhow::Ok(())
            }
        })
        .unwrap();
    runs
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_drives_independent_tasks_until_cancelled() {
    let scheduler = Arc::new(Scheduler::new(
        Duration::from_secs(1),
        Duration::from_secs(600),
    ));
    let fast = counting_task(&scheduler, "fast", Duration::from_secs(10), Duration::ZERO);
    let slow = counting_task(
        &scheduler,
        "slow",
        Duration::from_secs(30),
        Duration::from_secs(45),
    );

    let cancel = CancellationToken::new();
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(100)).await;
    cancel.cancel();
    runner.await.unwrap();

    // fast: t=0, then every ~10s after completion.
    let fast_runs = fast.load(Ordering::SeqCst);
    assert!((9..=11).contains(&fast_runs), "fast ran {fast_runs} times");
    // slow: t=0 finishes at 45, next due at 75; a slow task never overlaps itself.
    assert_eq!(slow.load(Ordering::SeqCst), 2);

    let statuses = scheduler.tasks();
    let names: Vec<&str> = statuses.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["fast", "slow"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_loop_launches_nothing_more() {
    let scheduler = Arc::new(Scheduler::new(
        Duration::from_secs(1),
        Duration::from_secs(600),
    ));
    let runs = counting_task(&scheduler, "sync", Duration::from_secs(5), Duration::ZERO);

    let cancel = CancellationToken::new();
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;
    cancel.cancel();
    runner.await.unwrap();
    let after_cancel = runs.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    assert_eq!(after_cancel, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_task_keeps_its_schedule() {
    let scheduler = Scheduler::new(Duration::from_secs(1), Duration::from_secs(600));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    scheduler
        .register("search", Duration::from_secs(20), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("indexer unreachable"))
            }
        })
        .unwrap();

    let outcome = scheduler.run_now("search").await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Failed(ref message) if message.contains("unreachable")));

    assert_eq!(scheduler.tick(), ["search"]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(scheduler.tick().is_empty(), "next run is 20s after the failure");

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(scheduler.tick(), ["search"]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let status = &scheduler.tasks()[0];
    assert!(matches!(status.last_outcome, Some(TaskOutcome::Failed(_))));
    assert!(status.last_run.is_some());
}
