//! Task Scheduler - Priority-classed deferred work for co-processor firmware
//!
//! # Purpose
//! Firmware hands the host small units of deferred work (function + opaque
//! argument) tagged with a numeric priority. Each priority class owns a
//! fixed ring and a dedicated worker thread that executes the ring in
//! strict submission order.
//!
//! # Integration Points
//! - Depends on: nothing (libc only for placement)
//! - Provides to: the host service table (`add_task`, `flush_task_handler`),
//!   the face-detection pipeline's firmware-event pump
//!
//! # Architecture
//! ```text
//!   submit(priority) ──► ring[class] ──► worker[class] (pinned, optional SCHED_FIFO)
//! ```
//! Priorities are numbered from a base of 10; class index is
//! `priority - 10 - 1`. Each producer (primary or auxiliary firmware) is
//! restricted to its own priority range and violations go through a
//! [`MisusePolicy`].
//!
//! # Testing Strategy
//! - Unit tests: ring wrap-around, config validation, submission rules
//! - Integration tests: FIFO law over 100 items, flush and shutdown drain

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;

mod config;
mod placement;
mod ring;
mod worker;

pub use config::{ClassConfig, MisusePolicy, SchedulerConfig, DEFAULT_RING_CAPACITY};
pub use placement::{pin_current_thread, set_realtime};

use worker::{ClassQueue, Placement};

/// Opaque argument passed back to the work function
pub type TaskArg = usize;

/// Deferred work function
pub type TaskFn = Arc<dyn Fn(TaskArg) + Send + Sync>;

/// Number of priority classes
pub const CLASS_COUNT: usize = 6;

/// Priority numbering base; class `n` has priority `base + n + 1`
pub const PRIORITY_BASE: i32 = 10;

/// Firmware-facing task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const FIRST: Priority = Priority(PRIORITY_BASE + 1);
    pub const SECOND: Priority = Priority(PRIORITY_BASE + 2);
    pub const THIRD: Priority = Priority(PRIORITY_BASE + 3);
    pub const FOURTH: Priority = Priority(PRIORITY_BASE + 4);
    pub const FIFTH: Priority = Priority(PRIORITY_BASE + 5);
    pub const SIXTH: Priority = Priority(PRIORITY_BASE + 6);

    /// Ring index for this priority, if it names a class
    pub fn class_index(self) -> Option<usize> {
        let index = self.0 - PRIORITY_BASE - 1;
        if (0..CLASS_COUNT as i32).contains(&index) {
            Some(index as usize)
        } else {
            None
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which firmware image is submitting work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    Primary,
    Auxiliary,
}

impl Producer {
    /// Priorities this producer may submit at
    pub fn allows(self, priority: Priority) -> bool {
        match self {
            Producer::Primary => (Priority::FIRST..=Priority::FIFTH).contains(&priority),
            Producer::Auxiliary => priority == Priority::SIXTH,
        }
    }
}

/// One queued unit of work
#[derive(Clone)]
pub struct WorkItem {
    pub priority: Priority,
    pub func: TaskFn,
    pub arg: TaskArg,
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("priority", &self.priority)
            .field("arg", &format_args!("{:#x}", self.arg))
            .finish()
    }
}

/// Error types for scheduler operations
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("Invalid priority {priority} (producer: {producer:?})")]
    InvalidPriority {
        priority: i32,
        producer: Option<Producer>,
    },

    #[error("Queue {class} full (priority {priority}, capacity {capacity})")]
    QueueFull {
        class: String,
        priority: i32,
        capacity: usize,
    },

    #[error("Queue {class} has pending work but no running worker")]
    NotRunning { class: String },

    #[error("Flush of {class} requested from its own worker")]
    FlushFromWorker { class: String },

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker {class}: {source}")]
    Spawn {
        class: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = core::result::Result<T, SchedError>;

/// Per-class counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassStats {
    pub name: String,
    pub priority: Priority,
    pub submitted: u64,
    pub completed: u64,
    pub pending: usize,
}

/// Priority-classed worker pool
pub struct TaskScheduler {
    config: SchedulerConfig,

    /// Indexed by class index; `None` for unconfigured priorities
    classes: Vec<Option<Arc<ClassQueue>>>,

    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Build the rings; no threads are started yet
    ///
    /// # Errors
    /// `InvalidConfig` if the class table does not validate
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let mut classes: Vec<Option<Arc<ClassQueue>>> = (0..CLASS_COUNT).map(|_| None).collect();
        for class in &config.classes {
            if let Some(index) = class.priority.class_index() {
                classes[index] = Some(Arc::new(ClassQueue::new(class.clone(), config.ring_capacity)));
            }
        }

        Ok(Self {
            config,
            classes,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn misuse_policy(&self) -> MisusePolicy {
        self.config.misuse
    }

    pub fn is_running(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    /// Spawn one worker per configured class
    ///
    /// Calling `start` on a running scheduler is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }

        let placement = Placement {
            affinity: self.config.affinity,
            realtime: self.config.realtime,
        };

        for queue in self.classes.iter().flatten() {
            match worker::spawn(queue.clone(), placement) {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    let class = queue.config.name.clone();
                    drop(workers);
                    self.shutdown();
                    return Err(SchedError::Spawn { class, source });
                }
            }
        }

        log::info!("Task scheduler started ({} workers)", workers.len());
        Ok(())
    }

    fn queue(&self, priority: Priority) -> Option<&Arc<ClassQueue>> {
        priority
            .class_index()
            .and_then(|index| self.classes.get(index))
            .and_then(|slot| slot.as_ref())
    }

    /// Queue `func(arg)` on the class for `priority`
    ///
    /// # Returns
    /// The ring slot the item landed in
    ///
    /// # Errors
    /// - `InvalidPriority` if no class serves `priority` (no state touched)
    /// - `QueueFull` if the class ring has no free slot (no state touched)
    pub fn submit(&self, priority: Priority, func: TaskFn, arg: TaskArg) -> Result<usize> {
        let queue = self.queue(priority).ok_or_else(|| {
            log::error!("Task rejected: no class for priority {}", priority);
            SchedError::InvalidPriority {
                priority: priority.0,
                producer: None,
            }
        })?;

        let mut state = queue.state.lock();
        let capacity = state.ring.capacity();
        let slot = state
            .ring
            .push(WorkItem { priority, func, arg })
            .map_err(|_| {
                log::error!(
                    "[{}] task rejected: ring full (priority {}, capacity {})",
                    queue.config.name,
                    priority,
                    capacity
                );
                SchedError::QueueFull {
                    class: queue.config.name.clone(),
                    priority: priority.0,
                    capacity,
                }
            })?;
        state.submitted += 1;
        drop(state);

        queue.ready.notify_one();
        log::debug!("[{}] queued arg {:#x} in slot {}", queue.config.name, arg, slot);

        Ok(slot)
    }

    /// Submit on behalf of a firmware producer, enforcing its range
    ///
    /// # Errors
    /// As [`TaskScheduler::submit`]. A range violation under
    /// [`MisusePolicy::Abort`] does not return: the process is aborted.
    pub fn submit_from(&self, producer: Producer, priority: Priority, func: TaskFn, arg: TaskArg) -> Result<usize> {
        if !producer.allows(priority) {
            log::error!("{:?} firmware submitted task with invalid priority {}", producer, priority);

            match self.config.misuse {
                MisusePolicy::Reject => {
                    return Err(SchedError::InvalidPriority {
                        priority: priority.0,
                        producer: Some(producer),
                    })
                }
                MisusePolicy::Abort => std::process::abort(),
            }
        }

        self.submit(priority, func, arg)
    }

    /// Boolean form of `submit` for firmware-facing callers
    pub fn try_submit(&self, priority: Priority, func: TaskFn, arg: TaskArg) -> bool {
        self.submit(priority, func, arg).is_ok()
    }

    /// Block until every item queued at `priority` has executed
    ///
    /// # Errors
    /// - `InvalidPriority` if no class serves `priority`
    /// - `FlushFromWorker` if called from that class's own worker
    /// - `NotRunning` if work is pending but no worker is attached
    pub fn flush(&self, priority: Priority) -> Result<()> {
        let queue = self.queue(priority).ok_or(SchedError::InvalidPriority {
            priority: priority.0,
            producer: None,
        })?;

        if queue.state.lock().worker == Some(thread::current().id()) {
            return Err(SchedError::FlushFromWorker {
                class: queue.config.name.clone(),
            });
        }

        if queue.wait_idle() {
            Ok(())
        } else {
            Err(SchedError::NotRunning {
                class: queue.config.name.clone(),
            })
        }
    }

    /// Flush every configured class in priority order
    pub fn flush_all(&self) -> Result<()> {
        for queue in self.classes.iter().flatten() {
            self.flush(queue.config.priority)?;
        }
        Ok(())
    }

    /// Drain every ring, then stop and join the workers
    ///
    /// Queued items are executed, never discarded. The scheduler may be
    /// started again afterwards.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        for queue in self.classes.iter().flatten() {
            queue.state.lock().stopping = true;
            queue.ready.notify_all();
        }

        for handle in handles {
            let name = handle.thread().name().unwrap_or("copro-worker").to_string();
            // A worker dropping the last owner of its own scheduler is left detached
            if handle.thread().id() == thread::current().id() {
                log::warn!("Worker {} shut down its own scheduler; detaching", name);
                continue;
            }
            if handle.join().is_err() {
                log::error!("Worker {} exited abnormally", name);
            }
        }

        log::info!("Task scheduler stopped");
    }

    pub fn stats(&self, priority: Priority) -> Option<ClassStats> {
        self.queue(priority).map(|queue| {
            let state = queue.state.lock();
            ClassStats {
                name: queue.config.name.clone(),
                priority,
                submitted: state.submitted,
                completed: state.completed,
                pending: state.ring.len(),
            }
        })
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_task(counter: &Arc<AtomicUsize>) -> TaskFn {
        let counter = counter.clone();
        Arc::new(move |n| {
            counter.fetch_add(n, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_class_index() {
        assert_eq!(Priority::FIRST.class_index(), Some(0));
        assert_eq!(Priority::SIXTH.class_index(), Some(5));
        assert_eq!(Priority(10).class_index(), None);
        assert_eq!(Priority(17).class_index(), None);
    }

    #[test]
    fn test_producer_ranges() {
        assert!(Producer::Primary.allows(Priority::FIRST));
        assert!(Producer::Primary.allows(Priority::FIFTH));
        assert!(!Producer::Primary.allows(Priority::SIXTH));
        assert!(Producer::Auxiliary.allows(Priority::SIXTH));
        assert!(!Producer::Auxiliary.allows(Priority::FIRST));
    }

    #[test]
    fn test_invalid_priority_leaves_rings_untouched() {
        let sched = TaskScheduler::new(SchedulerConfig::default()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = sched.submit(Priority(99), counter_task(&counter), 1);
        assert!(matches!(result, Err(SchedError::InvalidPriority { priority: 99, .. })));

        for class in &sched.config().classes {
            let stats = sched.stats(class.priority).unwrap();
            assert_eq!(stats.submitted, 0);
            assert_eq!(stats.pending, 0);
        }
    }

    #[test]
    fn test_producer_misuse_rejected() {
        let sched = TaskScheduler::new(SchedulerConfig::default()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = sched.submit_from(Producer::Auxiliary, Priority::FIRST, counter_task(&counter), 1);
        assert!(matches!(
            result,
            Err(SchedError::InvalidPriority {
                producer: Some(Producer::Auxiliary),
                ..
            })
        ));
        assert_eq!(sched.stats(Priority::FIRST).unwrap().submitted, 0);
    }

    #[test]
    fn test_full_ring_rejects() {
        let mut config = SchedulerConfig::single("tiny", Priority::FIRST);
        config.ring_capacity = 2;
        let sched = TaskScheduler::new(config).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        // Not started, so nothing drains
        assert_eq!(sched.submit(Priority::FIRST, counter_task(&counter), 1).unwrap(), 0);
        assert_eq!(sched.submit(Priority::FIRST, counter_task(&counter), 1).unwrap(), 1);
        assert!(matches!(
            sched.submit(Priority::FIRST, counter_task(&counter), 1),
            Err(SchedError::QueueFull { capacity: 2, .. })
        ));

        // Queued items run once a worker attaches
        sched.start().unwrap();
        sched.flush(Priority::FIRST).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_without_worker_reports_not_running() {
        let sched = TaskScheduler::new(SchedulerConfig::single("idle", Priority::SECOND)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(sched.flush(Priority::SECOND).is_ok());
        sched.submit(Priority::SECOND, counter_task(&counter), 1).unwrap();
        assert!(matches!(sched.flush(Priority::SECOND), Err(SchedError::NotRunning { .. })));
    }

    #[test]
    fn test_panicking_item_does_not_kill_worker() {
        let sched = TaskScheduler::new(SchedulerConfig::single("panicky", Priority::FIRST)).unwrap();
        sched.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        sched
            .submit(Priority::FIRST, Arc::new(|_| panic!("work item failure")), 0)
            .unwrap();
        sched.submit(Priority::FIRST, counter_task(&counter), 5).unwrap();
        sched.flush(Priority::FIRST).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(sched.stats(Priority::FIRST).unwrap().completed, 2);
    }

    #[test]
    fn test_shutdown_drains_then_restart() {
        let sched = TaskScheduler::new(SchedulerConfig::default()).unwrap();
        sched.start().unwrap();
        assert!(sched.is_running());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            sched.submit(Priority::THIRD, counter_task(&counter), 1).unwrap();
        }
        sched.shutdown();
        assert!(!sched.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        sched.start().unwrap();
        sched.submit(Priority::THIRD, counter_task(&counter), 1).unwrap();
        sched.flush_all().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }
}
