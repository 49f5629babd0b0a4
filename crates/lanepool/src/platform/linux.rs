//! Linux backend: per-thread nice values, SCHED_FIFO and sched_setaffinity

use std::io;
use std::mem;

use super::{ThreadConfigurator, ThreadPriority};
use crate::error::PlatformError;

/// Nice values used for the non-realtime classes
const NICE_LOW: libc::c_int = 10;
const NICE_NORMAL: libc::c_int = 0;
const NICE_HIGH: libc::c_int = -10;

/// Linux thread configurator
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxThreads;

fn last_os_error(op: &'static str) -> PlatformError {
    PlatformError::Os {
        op,
        code: io::Error::last_os_error().raw_os_error().unwrap_or(0),
    }
}

fn set_nice(nice: libc::c_int) -> Result<(), PlatformError> {
    // On Linux a thread id passed as PRIO_PROCESS addresses that single thread.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) } != 0 {
        return Err(last_os_error("setpriority"));
    }
    Ok(())
}

fn set_fifo() -> Result<(), PlatformError> {
    let priority = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
    if priority < 0 {
        return Err(last_os_error("sched_get_priority_min"));
    }
    // Zeroed first: some libcs carry extra sporadic-server fields.
    let mut param: libc::sched_param = unsafe { mem::zeroed() };
    param.sched_priority = priority;
    // pthread_setschedparam reports failure through its return value, not errno.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(PlatformError::Os { op: "pthread_setschedparam", code: rc });
    }
    Ok(())
}

impl ThreadConfigurator for LinuxThreads {
    fn set_priority(&self, priority: ThreadPriority) -> Result<(), PlatformError> {
        match priority {
            ThreadPriority::Low => set_nice(NICE_LOW),
            ThreadPriority::Normal => set_nice(NICE_NORMAL),
            ThreadPriority::High => set_nice(NICE_HIGH),
            ThreadPriority::RealTime => set_fifo(),
        }
    }

    fn set_affinity(&self, core: usize) -> Result<(), PlatformError> {
        // Core ids can exceed the usable count under a restricted cpuset;
        // the kernel rejects cores outside the mask.
        let limit = libc::CPU_SETSIZE as usize;
        if core >= limit {
            return Err(PlatformError::CoreOutOfRange { core, limit });
        }

        unsafe {
            let mut set: libc::cpu_set_t = mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(core, &mut set);
            if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                return Err(last_os_error("sched_setaffinity"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_core_is_rejected() {
        let err = LinuxThreads.set_affinity(usize::MAX).unwrap_err();
        assert!(matches!(err, PlatformError::CoreOutOfRange { core: usize::MAX, .. }));
    }

    #[test]
    fn test_pin_to_core_zero() {
        // Runs on a throwaway thread so the test runner's thread keeps its mask.
        let result = std::thread::spawn(|| LinuxThreads.set_affinity(0)).join().unwrap();
        // Restricted cpusets (containers) may exclude core 0; only the error kind is checked.
        if let Err(e) = result {
            assert!(matches!(e, PlatformError::Os { op: "sched_setaffinity", .. }));
        }
    }

    #[test]
    fn test_core_past_usable_count_reaches_kernel() {
        let usable = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
        let result = std::thread::spawn(move || LinuxThreads.set_affinity(usable)).join().unwrap();
        // Only the kernel decides whether the core is in this thread's mask
        if let Err(e) = result {
            assert!(matches!(e, PlatformError::Os { op: "sched_setaffinity", .. }));
        }
    }
}
