//! CPU discovery and thread pinning.

use crate::error::{ExecError, Result};
use std::collections::BTreeSet;

/// Number of CPUs this process may use.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// CPU ids `0..available_cpus()` minus the ones in `mask`, ascending.
///
/// The mask keeps cores free for the host process (network, I/O threads).
pub fn eligible_cpus(mask: &[usize]) -> Vec<usize> {
    let masked: BTreeSet<usize> = mask.iter().copied().collect();
    (0..available_cpus())
        .filter(|cpu| !masked.contains(cpu))
        .collect()
}

/// Pin the calling thread to `cpu`.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(ExecError::Affinity {
            cpu,
            message: format!("cpu id exceeds CPU_SETSIZE ({})", libc::CPU_SETSIZE),
        });
    }

    // SAFETY: cpu_set_t is plain data; zeroed is its empty value and `cpu` is
    // bounds-checked above.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(ExecError::Affinity {
            cpu,
            message: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(cpu: usize) -> Result<()> {
    Err(ExecError::Affinity {
        cpu,
        message: "thread pinning is not supported on this platform".to_string(),
    })
}

/// CPU the calling thread is running on, when the platform reports it.
#[cfg(target_os = "linux")]
pub fn current_cpu() -> Option<usize> {
    // SAFETY: sched_getcpu takes no arguments and only reads kernel state.
    let cpu = unsafe { libc::sched_getcpu() };
    usize::try_from(cpu).ok()
}

#[cfg(not(target_os = "linux"))]
pub fn current_cpu() -> Option<usize> {
    None
}
