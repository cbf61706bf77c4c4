use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use appsearch_core_types::UserHandle;
use appsearch_scheduler::{ExecutorPool, SchedulerError};

const USER: UserHandle = UserHandle(10);

fn wait_until_cancelled(ctx: &appsearch_scheduler::TaskContext) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ctx.is_cancelled() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn tasks_for_one_user_run_in_submission_order() {
    let pool = ExecutorPool::new(128);
    pool.open(USER).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    for step in ["set_schema", "put_document", "get_document"] {
        let log = Arc::clone(&log);
        pool.submit(USER, step, move |ctx| log.lock().unwrap().push(ctx.label()))
            .unwrap();
    }
    let (tx, rx) = mpsc::channel();
    pool.submit(USER, "sync", move |_| tx.send(()).unwrap()).unwrap();
    rx.recv().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["set_schema", "put_document", "get_document"]
    );
}

#[test]
fn saturated_queue_rejects_instead_of_blocking() {
    let pool = ExecutorPool::new(1);
    pool.open(USER).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    pool.submit(USER, "blocker", move |_| {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    })
    .unwrap();
    started_rx.recv().unwrap();

    pool.submit(USER, "queued", |_| {}).unwrap();
    let err = pool.submit(USER, "overflow", |_| {}).unwrap_err();
    assert_eq!(
        err,
        SchedulerError::Saturated {
            user: USER,
            capacity: 1
        }
    );
    assert_eq!(pool.queued(USER), Some(1));
    release_tx.send(()).unwrap();
}

#[test]
fn shutdown_drains_queued_tasks_with_cancelled_context() {
    let pool = ExecutorPool::new(8);
    pool.open(USER).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    pool.submit(USER, "long", move |ctx| {
        started_tx.send(()).unwrap();
        wait_until_cancelled(&ctx);
    })
    .unwrap();
    started_rx.recv().unwrap();

    let (seen_tx, seen_rx) = mpsc::channel();
    pool.submit(USER, "pending", move |ctx| {
        seen_tx.send(ctx.ensure_active()).unwrap();
    })
    .unwrap();

    assert!(pool.shutdown(USER));
    assert_eq!(seen_rx.recv().unwrap(), Err(SchedulerError::Stopped(USER)));
    assert!(pool.is_stopped(USER));
    assert_eq!(
        pool.submit(USER, "late", |_| {}).unwrap_err(),
        SchedulerError::Stopped(USER)
    );
}

#[test]
fn shutdown_is_idempotent_and_open_restarts() {
    let pool = ExecutorPool::new(4);
    pool.open(USER).unwrap();
    assert!(pool.is_running(USER));
    assert!(pool.shutdown(USER));
    assert!(!pool.shutdown(USER));

    pool.open(USER).unwrap();
    let (tx, rx) = mpsc::channel();
    pool.submit(USER, "after_reopen", move |ctx| tx.send(ctx.user()).unwrap())
        .unwrap();
    assert_eq!(rx.recv().unwrap(), USER);
}

#[test]
fn users_get_independent_executors() {
    let pool = ExecutorPool::new(4);
    let other = UserHandle::of(11);
    pool.open(USER).unwrap();
    pool.open(other).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    pool.submit(USER, "blocker", move |_| {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    })
    .unwrap();
    started_rx.recv().unwrap();

    let (tx, rx) = mpsc::channel();
    pool.submit(other, "independent", move |ctx| tx.send(ctx.user()).unwrap())
        .unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), other);
    assert_eq!(pool.running_users(), vec![USER, other]);
    release_tx.send(()).unwrap();

    pool.forget(USER);
    assert!(!pool.is_running(USER));
    assert!(!pool.is_stopped(USER));
}

#[test]
fn users_that_were_never_opened_are_rejected() {
    let pool = ExecutorPool::new(4);
    assert_eq!(
        pool.submit(USER, "unopened", |_| {}).unwrap_err(),
        SchedulerError::Stopped(USER)
    );
    assert!(pool.running_users().is_empty());
}

#[test]
fn forgotten_user_stays_closed_until_reopened() {
    let pool = ExecutorPool::new(4);
    pool.open(USER).unwrap();
    pool.forget(USER);

    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);
    let err = pool
        .submit(USER, "after_forget", move |_| *flag.lock().unwrap() = true)
        .unwrap_err();
    assert_eq!(err, SchedulerError::Stopped(USER));
    assert!(!pool.is_running(USER));
    assert!(!*ran.lock().unwrap());

    pool.open(USER).unwrap();
    let (tx, rx) = mpsc::channel();
    pool.submit(USER, "reopened", move |ctx| tx.send(ctx.user()).unwrap())
        .unwrap();
    assert_eq!(rx.recv().unwrap(), USER);
}

#[test]
fn open_with_capacity_sizes_the_queue() {
    let pool = ExecutorPool::new(64);
    pool.open_with_capacity(USER, 1).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    pool.submit(USER, "blocker", move |_| {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    })
    .unwrap();
    started_rx.recv().unwrap();

    pool.submit(USER, "queued", |_| {}).unwrap();
    assert_eq!(
        pool.submit(USER, "overflow", |_| {}).unwrap_err(),
        SchedulerError::Saturated {
            user: USER,
            capacity: 1
        }
    );
    release_tx.send(()).unwrap();
}
