//! Real-time process setup for the service binary.
//!
//! Every call is a no-op unless the `rt` feature is enabled, so development
//! and simulation builds run unprivileged.

use crate::error::SorterError;

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), SorterError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| SorterError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), SorterError> {
    Ok(())
}

/// Set SCHED_FIFO with the given priority for the calling thread.
///
/// Threads spawned afterwards inherit the policy.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), SorterError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(SorterError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), SorterError> {
    Ok(())
}

/// Apply the requested RT settings.
///
/// Must run before the async runtime starts its worker threads.
pub fn rt_setup(lock_memory: bool, rt_priority: Option<i32>) -> Result<(), SorterError> {
    if !cfg!(feature = "rt") && (lock_memory || rt_priority.is_some()) {
        tracing::warn!("Built without the `rt` feature; RT settings ignored");
    }
    if lock_memory {
        rt_mlockall()?;
    }
    if let Some(priority) = rt_priority {
        rt_set_scheduler(priority)?;
    }
    Ok(())
}
