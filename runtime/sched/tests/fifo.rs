//! Ordering and teardown tests for the task scheduler

use std::sync::Arc;
use std::thread;

use copro_sched::*;
use parking_lot::Mutex;

fn recorder(log: &Arc<Mutex<Vec<usize>>>) -> TaskFn {
    let log = log.clone();
    Arc::new(move |tag| log.lock().push(tag))
}

/// 100 tagged items on the first class are observed in submission order
#[test]
fn test_fifo_order_within_class() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut config = SchedulerConfig::default();
    config.ring_capacity = 128;
    config.affinity = false;
    let sched = TaskScheduler::new(config).unwrap();
    sched.start().unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    for tag in 0..100 {
        sched.submit(Priority::FIRST, recorder(&observed), tag).unwrap();
    }
    sched.flush(Priority::FIRST).unwrap();

    assert_eq!(*observed.lock(), (0..100).collect::<Vec<_>>());
}

/// A 16-slot ring still preserves order when the producer flushes between batches
#[test]
fn test_fifo_order_across_wraparound() {
    let mut config = SchedulerConfig::single("wrap", Priority::FIRST);
    config.ring_capacity = 16;
    let sched = TaskScheduler::new(config).unwrap();
    sched.start().unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    for batch in 0..10 {
        for i in 0..10 {
            sched.submit(Priority::FIRST, recorder(&observed), batch * 10 + i).unwrap();
        }
        sched.flush(Priority::FIRST).unwrap();
    }

    assert_eq!(*observed.lock(), (0..100).collect::<Vec<_>>());
    let stats = sched.stats(Priority::FIRST).unwrap();
    assert_eq!(stats.submitted, 100);
    assert_eq!(stats.completed, 100);
    assert_eq!(stats.pending, 0);
}

/// Concurrent producers on different classes each keep their own order
#[test]
fn test_per_class_order_with_concurrent_producers() {
    let mut config = SchedulerConfig::default();
    config.ring_capacity = 64;
    config.affinity = false;
    let sched = Arc::new(TaskScheduler::new(config).unwrap());
    sched.start().unwrap();

    let first = Arc::new(Mutex::new(Vec::new()));
    let third = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = [(Priority::FIRST, first.clone()), (Priority::THIRD, third.clone())]
        .into_iter()
        .map(|(priority, log)| {
            let sched = sched.clone();
            thread::spawn(move || {
                for tag in 0..50 {
                    sched.submit(priority, recorder(&log), tag).unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    sched.flush_all().unwrap();

    assert_eq!(*first.lock(), (0..50).collect::<Vec<_>>());
    assert_eq!(*third.lock(), (0..50).collect::<Vec<_>>());
}

/// Shutdown executes queued work instead of discarding it
#[test]
fn test_shutdown_drains_queued_work() {
    let mut config = SchedulerConfig::default();
    config.ring_capacity = 32;
    config.affinity = false;
    let sched = TaskScheduler::new(config).unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    for tag in 0..20 {
        sched.submit(Priority::SIXTH, recorder(&observed), tag).unwrap();
    }

    sched.start().unwrap();
    sched.shutdown();

    assert_eq!(observed.lock().len(), 20);
}

/// Flushing a class from its own worker is refused instead of deadlocking
#[test]
fn test_flush_from_own_worker_refused() {
    let sched = Arc::new(TaskScheduler::new(SchedulerConfig::single("self", Priority::FIRST)).unwrap());
    sched.start().unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let task: TaskFn = {
        let sched = Arc::downgrade(&sched);
        let outcome = outcome.clone();
        Arc::new(move |_| {
            if let Some(sched) = sched.upgrade() {
                let refused = matches!(sched.flush(Priority::FIRST), Err(SchedError::FlushFromWorker { .. }));
                *outcome.lock() = Some(refused);
            }
        })
    };

    sched.submit(Priority::FIRST, task, 0).unwrap();
    sched.flush(Priority::FIRST).unwrap();

    assert_eq!(*outcome.lock(), Some(true));
}
