//! End-to-end runs of several participants over one shared in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};

use super::{TaskScheduler, REAP_ENTITY_TYPE};
use crate::config::SchedulerConfig;
use crate::domain::{LockId, OwnerRef, PageIterator, TaskBuilder, TaskId, TaskInfo, TaskState};
use crate::error::{HandlerError, SchedulerError};
use crate::handler::{handler_fn, TaskHandler};
use crate::impls::InMemoryStore;
use crate::ports::{Store, Table};

const PATIENCE: Duration = Duration::from_secs(10);

fn config(node: &str) -> SchedulerConfig {
    let mut config = SchedulerConfig::new()
        .node_identity(node)
        .heartbeat(Duration::from_millis(50))
        .poll_interval(Duration::from_millis(30))
        .max_dispatch_jitter(Duration::from_millis(5));
    config.reap_interval_ms = 100;
    config
}

fn participant(
    store: &Arc<InMemoryStore>,
    node: &str,
    handlers: &[(&str, Arc<dyn TaskHandler>)],
) -> TaskScheduler {
    let mut builder = TaskScheduler::builder()
        .config(config(node))
        .store(Arc::clone(store) as Arc<dyn Store>);
    for (entity_type, handler) in handlers {
        builder = builder.register(*entity_type, Arc::clone(handler)).unwrap();
    }
    builder.build().unwrap()
}

async fn wait_for(
    scheduler: &TaskScheduler,
    task_id: TaskId,
    done: impl Fn(&TaskInfo) -> bool,
) -> TaskInfo {
    let deadline = Instant::now() + PATIENCE;
    loop {
        if let Some(task) = scheduler.get_task(task_id).await.unwrap()
            && done(&task)
        {
            return task;
        }
        assert!(Instant::now() < deadline, "{task_id} never reached the expected state");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_terminal(scheduler: &TaskScheduler, task_id: TaskId) -> TaskInfo {
    wait_for(scheduler, task_id, TaskInfo::is_terminal).await
}

async fn wait_free(scheduler: &TaskScheduler, lock: &LockId) {
    let deadline = Instant::now() + PATIENCE;
    while !scheduler.shared().coordinator.is_free(lock).await.unwrap() {
        assert!(Instant::now() < deadline, "{lock} was never released");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn stop_all(participants: &[TaskScheduler]) {
    for participant in participants {
        participant.stop_task_queue_monitor(false).await;
    }
}

fn noop() -> Arc<dyn TaskHandler> {
    handler_fn(|_ctx| async { Ok(None) })
}

/// Handler that blocks until `gate` is notified, then succeeds.
fn gated(gate: &Arc<Notify>) -> Arc<dyn TaskHandler> {
    let gate = Arc::clone(gate);
    handler_fn(move |_ctx| {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            Ok(None)
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_task_runs_exactly_once_across_participants() {
    let store = Arc::new(InMemoryStore::new());
    let runs: Arc<Mutex<HashMap<TaskId, u32>>> = Arc::default();
    let handler = {
        let runs = Arc::clone(&runs);
        handler_fn(move |ctx| {
            let runs = Arc::clone(&runs);
            async move {
                *runs.lock().unwrap().entry(ctx.task().task_id).or_default() += 1;
                sleep(Duration::from_millis(5)).await;
                Ok(None)
            }
        })
    };
    let participants: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|node| participant(&store, node, &[("demo.work", Arc::clone(&handler))]))
        .collect();
    for p in &participants {
        p.monitor_task_queue();
    }

    let mut ids = Vec::new();
    for i in 0..20 {
        let submitter = &participants[i % participants.len()];
        let task = submitter
            .add_task(submitter.create_task("demo.work", format!("e{i}")).build())
            .await
            .unwrap();
        ids.push(task.task_id);
    }
    for id in &ids {
        let done = wait_terminal(&participants[0], *id).await;
        assert_eq!(done.state, TaskState::Success);
        assert_eq!(done.run_count, 1);
        assert_eq!(done.owner, None);
    }

    let runs = runs.lock().unwrap().clone();
    assert_eq!(runs.len(), ids.len());
    assert!(runs.values().all(|n| *n == 1), "some task ran twice: {runs:?}");
    stop_all(&participants).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tasks_sharing_a_lock_never_overlap() {
    let store = Arc::new(InMemoryStore::new());
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let handler = {
        let (active, overlaps) = (Arc::clone(&active), Arc::clone(&overlaps));
        handler_fn(move |_ctx| {
            let (active, overlaps) = (Arc::clone(&active), Arc::clone(&overlaps));
            async move {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            }
        })
    };
    let participants: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|node| participant(&store, node, &[("demo.locked", Arc::clone(&handler))]))
        .collect();
    for p in &participants {
        p.monitor_task_queue();
    }

    let mut ids = Vec::new();
    for i in 0..10 {
        let submitter = &participants[i % participants.len()];
        let task = submitter
            .add_task(submitter.create_task("demo.locked", format!("e{i}")).lock_id("shared").build())
            .await
            .unwrap();
        ids.push(task.task_id);
    }
    for id in &ids {
        assert_eq!(wait_terminal(&participants[0], *id).await.state, TaskState::Success);
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let shared = participants[0].shared();
    assert!(shared.coordinator.is_free(&LockId::named("shared")).await.unwrap());
    stop_all(&participants).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prerequisite_chain_runs_in_order() {
    let store = Arc::new(InMemoryStore::new());
    let order: Arc<Mutex<Vec<TaskId>>> = Arc::default();
    let handler = {
        let order = Arc::clone(&order);
        handler_fn(move |ctx| {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(ctx.task().task_id);
                sleep(Duration::from_millis(10)).await;
                Ok(None)
            }
        })
    };
    let participants: Vec<_> = ["a", "b"]
        .iter()
        .map(|node| participant(&store, node, &[("demo.step", Arc::clone(&handler))]))
        .collect();
    for p in &participants {
        p.monitor_task_queue();
    }

    let mut ids: Vec<TaskId> = Vec::new();
    for i in 0..5 {
        let mut builder = participants[0].create_task("demo.step", format!("t{}", i + 1));
        if let Some(previous) = ids.last() {
            builder = builder.prerequisite(*previous);
        }
        ids.push(participants[0].add_task(builder.build()).await.unwrap().task_id);
    }

    let mut finished = Vec::new();
    for id in &ids {
        let done = wait_terminal(&participants[1], *id).await;
        assert_eq!(done.state, TaskState::Success);
        finished.push(done);
    }
    assert_eq!(*order.lock().unwrap(), ids);
    for pair in finished.windows(2) {
        assert!(pair[1].start_time >= pair[0].end_time);
    }
    stop_all(&participants).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_lock_sets_do_not_deadlock() {
    let store = Arc::new(InMemoryStore::new());
    let handler = handler_fn(|_ctx| async {
        sleep(Duration::from_millis(3)).await;
        Ok(None)
    });
    let participants: Vec<_> = ["a", "b"]
        .iter()
        .map(|node| participant(&store, node, &[("demo.pair", Arc::clone(&handler))]))
        .collect();
    for p in &participants {
        p.monitor_task_queue();
    }

    let sets = [["a", "b"], ["b", "c"], ["c", "a"]];
    let mut ids = Vec::new();
    for i in 0..12 {
        let submitter = &participants[i % 2];
        let task = submitter
            .add_task(
                submitter
                    .create_task("demo.pair", format!("e{i}"))
                    .lock_ids(sets[i % sets.len()])
                    .build(),
            )
            .await
            .unwrap();
        ids.push(task.task_id);
    }
    for id in &ids {
        assert_eq!(wait_terminal(&participants[0], *id).await.state, TaskState::Success);
    }
    stop_all(&participants).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crashed_participant_work_is_reaped_and_rerun() {
    let store = Arc::new(InMemoryStore::new());
    let first = Arc::new(AtomicBool::new(true));
    let checkpoints: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
    let handler = {
        let (first, checkpoints) = (Arc::clone(&first), Arc::clone(&checkpoints));
        handler_fn(move |ctx| {
            let (first, checkpoints) = (Arc::clone(&first), Arc::clone(&checkpoints));
            async move {
                if ctx.task().entity_id == "e" {
                    checkpoints.lock().unwrap().push(ctx.checkpoint_str().map(str::to_string));
                }
                if first.swap(false, Ordering::SeqCst) {
                    ctx.cancelled().await;
                    return Err(HandlerError::new("interrupted"));
                }
                Ok(None)
            }
        })
    };
    let a = participant(&store, "a", &[("demo.fragile", Arc::clone(&handler))]);
    let b = participant(&store, "b", &[("demo.fragile", Arc::clone(&handler))]);
    a.monitor_task_queue();

    let task = a
        .add_task(a.create_task("demo.fragile", "e").lock_id("L").checkpoint_data("step-3").build())
        .await
        .unwrap();
    let running = wait_for(&a, task.task_id, |t| t.state == TaskState::Running && t.run_count == 1).await;
    let dead_lease = running.owner.and_then(|o| o.lease()).unwrap();
    let waiter = a
        .add_task(a.create_task("demo.fragile", "w").lock_id("L").build())
        .await
        .unwrap();
    wait_for(&a, waiter.task_id, |t| t.state == TaskState::WaitingForLock).await;

    b.monitor_task_queue();
    a.crash().await;

    let done = wait_terminal(&b, task.task_id).await;
    assert_eq!(done.state, TaskState::Success);
    assert_eq!(done.run_count, 2);
    assert_eq!(done.checkpoint_str(), Some("step-3"));
    assert_eq!(
        *checkpoints.lock().unwrap(),
        vec![Some("step-3".to_string()), Some("step-3".to_string())]
    );
    let waited = wait_terminal(&b, waiter.task_id).await;
    assert_eq!(waited.state, TaskState::Success);
    assert_eq!(waited.run_count, 1);

    let mut page = PageIterator::new(10);
    let reaps = b.get_tasks_by_entity_type(REAP_ENTITY_TYPE, &mut page).await.unwrap();
    assert_eq!(reaps.len(), 1);
    assert_eq!(reaps[0].entity_id, dead_lease.key());
    wait_terminal(&b, reaps[0].task_id).await;

    wait_free(&b, &LockId::named("L")).await;
    let leases = b.shared().leases.repo().all().await.unwrap();
    assert!(leases.iter().all(|l| l.lease_id != dead_lease));
    b.stop_task_queue_monitor(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn countdown_requeues_with_delay_until_done() {
    let store = Arc::new(InMemoryStore::new());
    let handler = handler_fn(|ctx| async move {
        let n: u32 = ctx
            .checkpoint_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| HandlerError::new("checkpoint is not a number"))?;
        if n <= 1 {
            return Ok(None);
        }
        let next = ctx
            .into_task()
            .with_checkpoint_data((n - 1).to_string())
            .with_delay_ms(200);
        Ok(Some(next))
    });
    let p = participant(&store, "a", &[("demo.countdown", handler)]);
    p.monitor_task_queue();

    let started = Instant::now();
    let task = p
        .add_task(p.create_task("demo.countdown", "c").checkpoint_data("5").build())
        .await
        .unwrap();
    let done = wait_terminal(&p, task.task_id).await;

    assert!(started.elapsed() >= Duration::from_millis(800));
    assert_eq!(done.state, TaskState::Success);
    assert_eq!(done.run_count, 5);
    assert_eq!(done.checkpoint_str(), Some("1"));
    assert_eq!(done.milliseconds_remaining, None);
    p.stop_task_queue_monitor(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interval_survives_a_participant_restart() {
    let store = Arc::new(InMemoryStore::new());
    let a = participant(&store, "a", &[("demo.later", noop())]);
    let b = participant(&store, "b", &[("demo.later", noop())]);
    a.monitor_task_queue();

    let started = Instant::now();
    let task = a
        .add_task(a.create_task("demo.later", "e").milliseconds_remaining(400).build())
        .await
        .unwrap();
    let waiting = wait_for(&a, task.task_id, |t| t.state == TaskState::WaitingForInterval).await;
    assert_eq!(waiting.owner, Some(OwnerRef::Unowned));
    assert!(waiting.interval_started_at.is_some());

    a.stop_task_queue_monitor(false).await;
    assert_eq!(store.len(Table::Leases), 0, "graceful stop deletes the lease row");

    b.monitor_task_queue();
    let done = wait_terminal(&b, task.task_id).await;
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(done.state, TaskState::Success);
    assert_eq!(done.run_count, 1);
    assert_eq!(done.interval_started_at, None);
    b.stop_task_queue_monitor(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interval_keeps_checkpoint_and_delay_across_a_crash() {
    let store = Arc::new(InMemoryStore::new());
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
    let handler = {
        let seen = Arc::clone(&seen);
        handler_fn(move |ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(ctx.checkpoint_str().map(str::to_string));
                Ok(None)
            }
        })
    };
    let a = participant(&store, "a", &[("demo.later", Arc::clone(&handler))]);
    let b = participant(&store, "b", &[("demo.later", Arc::clone(&handler))]);
    a.monitor_task_queue();

    let started = Instant::now();
    let task = a
        .add_task(
            a.create_task("demo.later", "e")
                .checkpoint_data("page=7")
                .milliseconds_remaining(600)
                .build(),
        )
        .await
        .unwrap();
    wait_for(&a, task.task_id, |t| t.state == TaskState::WaitingForInterval).await;

    a.crash().await;
    b.monitor_task_queue();

    let done = wait_terminal(&b, task.task_id).await;
    assert!(started.elapsed() >= Duration::from_millis(600), "delay was cut short");
    assert_eq!(done.state, TaskState::Success);
    assert_eq!(done.run_count, 1);
    assert_eq!(done.checkpoint_str(), Some("page=7"));
    assert_eq!(*seen.lock().unwrap(), vec![Some("page=7".to_string())]);
    b.stop_task_queue_monitor(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_from_another_participant_frees_locks_taken_while_waiting() {
    let store = Arc::new(InMemoryStore::new());
    let gate = Arc::new(Notify::new());
    let handlers: [(&str, Arc<dyn TaskHandler>); 2] = [("demo.gated", gated(&gate)), ("demo.quick", noop())];
    let a = participant(&store, "a", &handlers);
    let b = participant(&store, "b", &handlers);
    a.monitor_task_queue();

    let blocker = a
        .add_task(a.create_task("demo.gated", "g").lock_id("L2").build())
        .await
        .unwrap();
    wait_for(&a, blocker.task_id, |t| t.state == TaskState::Running).await;
    // L1 sorts before L2, so the waiter takes it before blocking
    let stuck = a
        .add_task(a.create_task("demo.quick", "t").lock_ids(["L1", "L2"]).build())
        .await
        .unwrap();
    wait_for(&a, stuck.task_id, |t| t.state == TaskState::WaitingForLock).await;
    let held = a.shared().locks.holder(&LockId::named("L1")).await.unwrap().unwrap();
    assert_eq!(held.running_task_id, Some(stuck.task_id));

    b.monitor_task_queue();
    b.cancel_task("ops", stuck.task_id).await.unwrap();
    assert_eq!(wait_terminal(&b, stuck.task_id).await.state, TaskState::Canceled);
    wait_free(&b, &LockId::named("L1")).await;
    wait_free(&b, &LockId::SelfLock(stuck.task_id)).await;

    let follower = b
        .add_task(b.create_task("demo.quick", "f").lock_id("L1").build())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&b, follower.task_id).await.state, TaskState::Success);

    gate.notify_one();
    assert_eq!(wait_terminal(&a, blocker.task_id).await.state, TaskState::Success);
    stop_all(&[a, b]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_reaches_waiting_and_delayed_tasks() {
    let store = Arc::new(InMemoryStore::new());
    let gate = Arc::new(Notify::new());
    let p = participant(&store, "a", &[("demo.gated", gated(&gate)), ("demo.quick", noop())]);
    p.monitor_task_queue();

    let blocker = p
        .add_task(p.create_task("demo.gated", "b").lock_id("L").build())
        .await
        .unwrap();
    wait_for(&p, blocker.task_id, |t| t.state == TaskState::Running).await;
    let waiter = p
        .add_task(p.create_task("demo.quick", "w").lock_id("L").build())
        .await
        .unwrap();
    wait_for(&p, waiter.task_id, |t| t.state == TaskState::WaitingForLock).await;

    p.cancel_task("ops", waiter.task_id).await.unwrap();
    let canceled = wait_terminal(&p, waiter.task_id).await;
    assert_eq!(canceled.state, TaskState::Canceled);
    assert_eq!(canceled.canceled_by.as_deref(), Some("ops"));
    assert_eq!(canceled.run_count, 0);

    let delayed = p
        .add_task(p.create_task("demo.quick", "d").milliseconds_remaining(60_000).build())
        .await
        .unwrap();
    wait_for(&p, delayed.task_id, |t| t.state == TaskState::WaitingForInterval).await;
    let requested = p.cancel_task("ops", delayed.task_id).await.unwrap();
    assert_eq!(requested.state, TaskState::Queued);
    assert_eq!(wait_terminal(&p, delayed.task_id).await.state, TaskState::Canceled);

    gate.notify_one();
    assert_eq!(wait_terminal(&p, blocker.task_id).await.state, TaskState::Success);
    assert!(p.shared().coordinator.is_free(&LockId::named("L")).await.unwrap());

    // 終端タスクの取消はそのまま返る
    let again = p.cancel_task("ops", blocker.task_id).await.unwrap();
    assert_eq!(again.state, TaskState::Success);
    p.stop_task_queue_monitor(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_task_finishes_its_invocation_before_cancel_applies() {
    let store = Arc::new(InMemoryStore::new());
    let gate = Arc::new(Notify::new());
    let handler = {
        let gate = Arc::clone(&gate);
        handler_fn(move |ctx| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(Some(ctx.into_task()))
            }
        })
    };
    let p = participant(&store, "a", &[("demo.loop", handler)]);
    p.monitor_task_queue();

    let task = p.add_task(p.create_task("demo.loop", "e").build()).await.unwrap();
    wait_for(&p, task.task_id, |t| t.state == TaskState::Running && t.run_count == 1).await;

    let requested = p.cancel_task("ops", task.task_id).await.unwrap();
    assert_eq!(requested.state, TaskState::Running);
    gate.notify_one();

    let done = wait_terminal(&p, task.task_id).await;
    assert_eq!(done.state, TaskState::Canceled);
    assert_eq!(done.run_count, 1);
    p.stop_task_queue_monitor(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_errors_and_panics_fail_the_task() {
    let store = Arc::new(InMemoryStore::new());
    let failing = handler_fn(|_ctx| async {
        Err(HandlerError::new("disk full").with_stack_trace("at write()"))
    });
    let panicking = handler_fn(|ctx| async move {
        if ctx.task().run_count > 0 {
            panic!("handler bug");
        }
        Ok(None)
    });
    let p = participant(&store, "a", &[("demo.fail", failing), ("demo.panic", panicking)]);
    p.monitor_task_queue();

    let task = p.add_task(p.create_task("demo.fail", "e").lock_id("L").build()).await.unwrap();
    let failed = wait_terminal(&p, task.task_id).await;
    assert_eq!(failed.state, TaskState::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("disk full"));
    assert_eq!(failed.stack_trace.as_deref(), Some("at write()"));
    assert!(failed.error_id.is_some());
    assert!(failed.end_time.is_some());
    assert!(p.shared().coordinator.is_free(&LockId::named("L")).await.unwrap());

    let task = p.add_task(p.create_task("demo.panic", "e").build()).await.unwrap();
    let failed = wait_terminal(&p, task.task_id).await;
    assert_eq!(failed.state, TaskState::Failed);
    assert!(failed.error_message.unwrap().contains("panicked"));
    p.stop_task_queue_monitor(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unhandled_entity_type_stays_queued() {
    let store = Arc::new(InMemoryStore::new());
    let p = participant(&store, "a", &[]);
    p.monitor_task_queue();

    let task = p.add_task(p.create_task("demo.nobody", "e").build()).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    p.stop_task_queue_monitor(false).await;

    let still = p.get_task(task.task_id).await.unwrap().unwrap();
    assert_eq!(still.state, TaskState::Queued);
    assert_eq!(still.owner, Some(OwnerRef::Unowned));
    assert_eq!(still.run_count, 0);
}

#[tokio::test]
async fn add_task_rejects_bad_input() {
    let p = participant(&Arc::new(InMemoryStore::new()), "a", &[]);

    let err = p
        .add_task(p.create_task("demo", "e").lock_id("@task/00000000000000000001").build())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTask(_)));

    let err = p
        .add_task(p.create_task("demo", "e").prerequisite(TaskId::new(42)).build())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTask(_)));

    let err = p.add_task(TaskBuilder::new(REAP_ENTITY_TYPE, "x").build()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTask(_)));

    let err = p.cancel_task("ops", TaskId::new(42)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound(_)));
}

#[tokio::test]
async fn tasks_are_queued_without_a_monitor_and_listed_by_entity() {
    let p = participant(&Arc::new(InMemoryStore::new()), "a", &[]);
    let mut ids = Vec::new();
    for entity in ["b", "a", "c", "a", "b"] {
        ids.push(p.add_task(p.create_task("demo.list", entity).build()).await.unwrap().task_id);
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids grow in submission order");

    let mut page = PageIterator::new(2);
    let mut listed = Vec::new();
    while page.has_next() {
        listed.extend(p.get_tasks_by_entity_type("demo.list", &mut page).await.unwrap());
    }
    let entities: Vec<_> = listed.iter().map(|t| t.entity_id.as_str()).collect();
    assert_eq!(entities, vec!["a", "a", "b", "b", "c"]);
    assert!(listed.iter().all(|t| t.state == TaskState::Queued));
}
