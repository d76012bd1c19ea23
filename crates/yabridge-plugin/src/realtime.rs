//! Real-time scheduling priority of the calling thread.

use std::io;
use std::time::{Duration, Instant};

/// How often the host's audio thread priority is compared against the one
/// last applied on the Wine side.
pub const PRIORITY_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// The calling thread's priority if it runs under `SCHED_FIFO` or `SCHED_RR`.
pub fn get_realtime_priority() -> Option<i32> {
    let mut policy = 0;
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param) };

    if result != 0 || (policy != libc::SCHED_FIFO && policy != libc::SCHED_RR) {
        return None;
    }
    Some(param.sched_priority)
}

/// Switches the calling thread to `SCHED_FIFO` at `priority`, or back to
/// `SCHED_OTHER`. Fails without `CAP_SYS_NICE` or a matching rtprio limit.
pub fn set_realtime_priority(sched_fifo: bool, priority: i32) -> io::Result<()> {
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    let policy = if sched_fifo {
        param.sched_priority = priority;
        libc::SCHED_FIFO
    } else {
        libc::SCHED_OTHER
    };

    let result = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) };
    if result != 0 {
        return Err(io::Error::from_raw_os_error(result));
    }
    Ok(())
}

/// Decides when a new priority has to be sent along with a request.
#[derive(Debug, Clone)]
pub struct PrioritySync {
    interval: Duration,
    last_check: Option<Instant>,
    last_applied: Option<i32>,
}

impl PrioritySync {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_check: None,
            last_applied: None,
        }
    }

    /// Reads the current priority through `current` once per interval and
    /// returns it only when it differs from what was last handed out.
    pub fn poll(&mut self, now: Instant, current: impl FnOnce() -> Option<i32>) -> Option<i32> {
        if let Some(last_check) = self.last_check {
            if now.saturating_duration_since(last_check) < self.interval {
                return None;
            }
        }
        self.last_check = Some(now);

        let priority = current()?;
        if self.last_applied == Some(priority) {
            return None;
        }

        self.last_applied = Some(priority);
        Some(priority)
    }

    pub fn last_applied(&self) -> Option<i32> {
        self.last_applied
    }
}

impl Default for PrioritySync {
    fn default() -> Self {
        Self::new(PRIORITY_SYNC_INTERVAL)
    }
}
