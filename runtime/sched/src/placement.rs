//! Worker thread placement (CPU affinity and SCHED_FIFO)
//!
//! Both calls act on the calling thread, so workers apply them to
//! themselves right after spawn. Failures are reported, never fatal: a
//! worker that cannot be pinned still runs its queue.

use std::io;

/// Pin the calling thread to one logical CPU
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> io::Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cpu {} exceeds CPU_SETSIZE", cpu),
        ));
    }

    // SAFETY: cpu_set_t is plain data; CPU_SET is bounds-checked above.
    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> io::Result<()> {
    Ok(())
}

/// Switch the calling thread to SCHED_FIFO at `priority`
#[cfg(target_os = "linux")]
pub fn set_realtime(priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };

    // tid 0 is the calling thread
    let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };

    if result == -1 {
        let err = io::Error::last_os_error();
        return Err(io::Error::other(format!(
            "sched_setscheduler failed: {} (requires CAP_SYS_NICE or root)",
            err
        )));
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime(_priority: i32) -> io::Result<()> {
    Ok(())
}
