//! Synchronization primitives handed to firmware
//!
//! Firmware drives these through acquire/release calls rather than scoped
//! guards, so each primitive tracks its own held state and a release never
//! depends on the acquiring stack frame.
//!
//! Interrupt state is modelled per thread: `in_irq` is set while an
//! interrupt dispatcher runs a handler, and the mask depth is raised by the
//! `_irq`/`_irqsave` lock variants. A dispatcher refuses to run a handler on
//! a thread that has interrupts masked.

use std::cell::Cell;

use parking_lot::{Condvar, Mutex};

use crate::{AbiError, Result};

/// Execution context of a caller, passed explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecContext {
    #[default]
    Thread,
    Interrupt,
}

/// Saved interrupt mask state, returned by `_irqsave` and consumed by `_irqrestore`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqFlags(pub u64);

#[derive(Clone, Copy, Default)]
struct CpuState {
    in_irq: bool,
    masked: bool,
}

thread_local! {
    static CPU: Cell<CpuState> = Cell::new(CpuState::default());
}

/// True while an interrupt handler is running on this thread
pub fn in_irq() -> bool {
    CPU.with(|cpu| cpu.get().in_irq)
}

/// True while this thread holds an interrupt-masking lock
pub fn irqs_masked() -> bool {
    CPU.with(|cpu| cpu.get().masked)
}

/// Mask interrupts and return the previous state
pub fn local_irq_save() -> IrqFlags {
    CPU.with(|cpu| {
        let mut state = cpu.get();
        let flags = IrqFlags(state.masked as u64);
        state.masked = true;
        cpu.set(state);
        flags
    })
}

/// Restore the state returned by [`local_irq_save`]
pub fn local_irq_restore(flags: IrqFlags) {
    CPU.with(|cpu| {
        let mut state = cpu.get();
        state.masked = flags.0 != 0;
        cpu.set(state);
    });
}

pub fn local_irq_disable() {
    local_irq_save();
}

pub fn local_irq_enable() {
    local_irq_restore(IrqFlags(0));
}

/// Marks the current thread as servicing an interrupt until dropped
pub struct IrqContextGuard {
    previous: CpuState,
}

/// Enter interrupt context on this thread
///
/// # Errors
/// `IrqMasked` if this thread holds an interrupt-masking lock
pub fn enter_irq() -> Result<IrqContextGuard> {
    CPU.with(|cpu| {
        let previous = cpu.get();
        if previous.masked {
            return Err(AbiError::IrqMasked);
        }
        cpu.set(CpuState {
            in_irq: true,
            masked: true,
        });
        Ok(IrqContextGuard { previous })
    })
}

impl IrqContextGuard {
    pub fn context(&self) -> ExecContext {
        ExecContext::Interrupt
    }
}

impl Drop for IrqContextGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        CPU.with(|cpu| cpu.set(previous));
    }
}

/// Counting semaphore
pub struct Semaphore {
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(count: u32) -> Self {
        Self {
            count: Mutex::new(count),
            available: Condvar::new(),
        }
    }

    pub fn up(&self) {
        *self.count.lock() += 1;
        self.available.notify_one();
    }

    /// Block until the count is positive, then take one
    pub fn down(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }
}

/// Sleeping lock without a guard
///
/// The holder is not recorded, so a different thread may release it.
pub struct BlockingLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl BlockingLock {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    pub fn lock(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    pub fn try_lock(&self) -> bool {
        let mut held = self.held.lock();
        if *held {
            return false;
        }
        *held = true;
        true
    }

    pub fn unlock(&self) -> Result<()> {
        let mut held = self.held.lock();
        if !*held {
            return Err(AbiError::NotLocked);
        }
        *held = false;
        self.released.notify_one();
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        *self.held.lock()
    }
}

impl Default for BlockingLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Busy-wait lock without a guard
pub struct SpinLock {
    inner: spin::Mutex<()>,
}

impl SpinLock {
    pub fn new() -> Self {
        Self {
            inner: spin::Mutex::new(()),
        }
    }

    pub fn lock(&self) {
        core::mem::forget(self.inner.lock());
    }

    pub fn unlock(&self) -> Result<()> {
        if !self.inner.is_locked() {
            return Err(AbiError::NotLocked);
        }
        // SAFETY: the guard from `lock` was forgotten; this releases it.
        unsafe { self.inner.force_unlock() };
        Ok(())
    }

    /// Lock and mask interrupts on this thread
    pub fn lock_irq(&self) {
        local_irq_disable();
        self.lock();
    }

    pub fn unlock_irq(&self) -> Result<()> {
        self.unlock()?;
        local_irq_enable();
        Ok(())
    }

    pub fn lock_irqsave(&self) -> IrqFlags {
        let flags = local_irq_save();
        self.lock();
        flags
    }

    pub fn unlock_irqrestore(&self, flags: IrqFlags) -> Result<()> {
        self.unlock()?;
        local_irq_restore(flags);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Data lock shared between thread and interrupt context
///
/// Thread-context callers mask interrupts for the guard's lifetime so an
/// interrupt handler on the same thread cannot deadlock against them.
pub struct IrqLock<T> {
    inner: spin::Mutex<T>,
}

pub struct IrqLockGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    restore: Option<IrqFlags>,
}

impl<T> IrqLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Acquire, using the variant that matches `ctx`
    pub fn lock(&self, ctx: ExecContext) -> IrqLockGuard<'_, T> {
        let restore = match ctx {
            ExecContext::Thread => Some(local_irq_save()),
            ExecContext::Interrupt => None,
        };
        IrqLockGuard {
            guard: self.inner.lock(),
            restore,
        }
    }
}

impl<T> core::ops::Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqLockGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(flags) = self.restore {
            local_irq_restore(flags);
        }
    }
}
