//! One-shot firmware timers
//!
//! A single service thread owns every deadline. Callers mutate timer state
//! under the timer's own lock and post a command over a crossbeam channel;
//! the service thread sleeps until the nearest deadline or the next
//! command, whichever comes first. Each arm bumps a generation so a stale
//! deadline left in the heap after a reset or disable is skipped.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::handle::{Handle, HandleTable};
use crate::Result;

/// Timer callback, invoked with the timer's data word
pub type TimerFn = Arc<dyn Fn(usize) + Send + Sync>;

struct TimerState {
    expires: Duration,
    deadline: Option<Instant>,
    generation: u64,
}

pub struct Timer {
    func: TimerFn,
    data: usize,
    state: Mutex<TimerState>,
}

enum Command {
    Arm {
        deadline: Instant,
        timer: Arc<Timer>,
        generation: u64,
    },
    Shutdown,
}

struct Pending {
    deadline: Instant,
    generation: u64,
    timer: Arc<Timer>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.generation).cmp(&(other.deadline, other.generation))
    }
}

pub struct TimerService {
    timers: HandleTable<Timer>,
    commands: Sender<Command>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Start the service thread
    pub fn new() -> std::io::Result<Self> {
        let (commands, rx) = channel::unbounded();
        let thread = thread::Builder::new()
            .name("copro-timer".into())
            .spawn(move || run(rx))?;

        Ok(Self {
            timers: HandleTable::new("timer"),
            commands,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Create a disarmed timer that fires `expires` after it is enabled
    pub fn create(&self, expires: Duration, func: TimerFn, data: usize) -> Option<Handle> {
        self.timers.insert(Timer {
            func,
            data,
            state: Mutex::new(TimerState {
                expires,
                deadline: None,
                generation: 0,
            }),
        })
    }

    fn arm(&self, timer: Arc<Timer>, expires: Option<Duration>) {
        let (deadline, generation) = {
            let mut state = timer.state.lock();
            if let Some(expires) = expires {
                state.expires = expires;
            }
            state.generation += 1;
            let deadline = Instant::now() + state.expires;
            state.deadline = Some(deadline);
            (deadline, state.generation)
        };

        if self
            .commands
            .send(Command::Arm {
                deadline,
                timer,
                generation,
            })
            .is_err()
        {
            log::error!("Timer service is gone; timer will not fire");
        }
    }

    /// Arm a timer with its stored expiry
    pub fn enable(&self, handle: Handle) -> Result<()> {
        let timer = self.timers.get(handle)?;
        self.arm(timer, None);
        Ok(())
    }

    /// Re-arm a timer with a new expiry, replacing any pending deadline
    pub fn reset(&self, handle: Handle, expires: Duration) -> Result<()> {
        let timer = self.timers.get(handle)?;
        self.arm(timer, Some(expires));
        Ok(())
    }

    /// Cancel a pending deadline; the timer stays allocated
    pub fn disable(&self, handle: Handle) -> Result<()> {
        let timer = self.timers.get(handle)?;
        let mut state = timer.state.lock();
        state.deadline = None;
        state.generation += 1;
        Ok(())
    }

    /// Time left before the timer fires; zero if disarmed
    pub fn query(&self, handle: Handle) -> Result<Duration> {
        let timer = self.timers.get(handle)?;
        let state = timer.state.lock();
        Ok(state
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_default())
    }

    /// Cancel and release a timer
    pub fn delete(&self, handle: Handle) -> Result<()> {
        self.disable(handle)?;
        self.timers.remove(handle)?;
        Ok(())
    }

    pub fn live(&self) -> usize {
        self.timers.len()
    }

    /// Stop the service thread; pending deadlines are dropped
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                log::error!("Timer service exited abnormally");
            }
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn fire(pending: Pending) {
    let due = {
        let mut state = pending.timer.state.lock();
        if state.generation != pending.generation || state.deadline.is_none() {
            false
        } else {
            state.deadline = None;
            true
        }
    };

    if due {
        (pending.timer.func)(pending.timer.data);
    }
}

fn run(rx: Receiver<Command>) {
    let mut heap: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse(p)| p.deadline <= now) {
            if let Some(Reverse(pending)) = heap.pop() {
                fire(pending);
            }
        }

        let command = match heap.peek() {
            Some(Reverse(next)) => match rx.recv_timeout(next.deadline.saturating_duration_since(Instant::now())) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Arm {
                deadline,
                timer,
                generation,
            } => heap.push(Reverse(Pending {
                deadline,
                generation,
                timer,
            })),
            Command::Shutdown => break,
        }
    }

    log::debug!("Timer service stopped ({} deadlines dropped)", heap.len());
}
