//! Per-class queue and worker thread
//!
//! The queue state lives under one mutex with two condvars: `ready` wakes
//! the worker when an item lands, `idle` wakes flushers when the ring is
//! empty and no item is executing.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::config::ClassConfig;
use crate::placement;
use crate::ring::WorkRing;
use crate::WorkItem;

pub(crate) struct QueueState {
    pub(crate) ring: WorkRing,

    /// An item has been popped and is executing
    pub(crate) busy: bool,

    /// Worker asked to exit once the ring drains
    pub(crate) stopping: bool,

    /// A worker thread is attached to this queue
    pub(crate) attached: bool,

    /// Worker thread id, for flush-from-worker detection
    pub(crate) worker: Option<ThreadId>,

    pub(crate) submitted: u64,
    pub(crate) completed: u64,
}

pub(crate) struct ClassQueue {
    pub(crate) config: ClassConfig,
    pub(crate) state: Mutex<QueueState>,
    pub(crate) ready: Condvar,
    pub(crate) idle: Condvar,
}

impl ClassQueue {
    pub(crate) fn new(config: ClassConfig, capacity: usize) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState {
                ring: WorkRing::new(capacity),
                busy: false,
                stopping: false,
                attached: false,
                worker: None,
                submitted: 0,
                completed: 0,
            }),
            ready: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Block until the ring is empty and nothing is executing
    ///
    /// Returns false if the queue still holds work but no worker is
    /// attached to drain it.
    pub(crate) fn wait_idle(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.ring.is_empty() && !state.busy {
                return true;
            }
            if !state.attached {
                return false;
            }
            self.idle.wait(&mut state);
        }
    }
}

/// Placement applied by a worker to itself
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub(crate) affinity: bool,
    pub(crate) realtime: bool,
}

pub(crate) fn spawn(queue: Arc<ClassQueue>, placement: Placement) -> std::io::Result<JoinHandle<()>> {
    {
        let mut state = queue.state.lock();
        state.stopping = false;
        state.attached = true;
    }

    let name = format!("copro-{}", queue.config.name);
    let spawned = thread::Builder::new().name(name).spawn({
        let queue = queue.clone();
        move || run(queue, placement)
    });

    if spawned.is_err() {
        queue.state.lock().attached = false;
    }

    spawned
}

fn apply_placement(config: &ClassConfig, placement: Placement) {
    if placement.affinity {
        if let Some(cpu) = config.cpu {
            if let Err(e) = placement::pin_current_thread(cpu) {
                log::warn!("[{}] cannot pin to cpu {}: {}", config.name, cpu, e);
            }
        }
    }

    if placement.realtime {
        if let Err(e) = placement::set_realtime(config.rt_priority) {
            log::warn!("[{}] cannot set rt priority {}: {}", config.name, config.rt_priority, e);
        }
    }
}

fn run(queue: Arc<ClassQueue>, placement: Placement) {
    apply_placement(&queue.config, placement);
    queue.state.lock().worker = Some(thread::current().id());

    log::debug!("[{}] worker started (priority {})", queue.config.name, queue.config.priority.0);

    loop {
        let item = {
            let mut state = queue.state.lock();
            loop {
                if let Some(item) = state.ring.pop() {
                    state.busy = true;
                    break Some(item);
                }
                if state.stopping {
                    break None;
                }
                queue.ready.wait(&mut state);
            }
        };

        let Some(item) = item else {
            break;
        };

        execute(&queue.config, item);

        let mut state = queue.state.lock();
        state.busy = false;
        state.completed += 1;
        if state.ring.is_empty() {
            queue.idle.notify_all();
        }
    }

    let mut state = queue.state.lock();
    state.attached = false;
    state.worker = None;
    queue.idle.notify_all();
    drop(state);

    log::debug!("[{}] worker stopped", queue.config.name);
}

fn execute(config: &ClassConfig, item: WorkItem) {
    let WorkItem { func, arg, .. } = item;

    if panic::catch_unwind(AssertUnwindSafe(|| func(arg))).is_err() {
        log::error!("[{}] work item panicked (arg {:#x})", config.name, arg);
    }
}
