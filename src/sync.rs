use crate::device::DrmDevice;
use crate::error::{XeError, XeResult};
use std::time::Duration;

/// A reusable binary completion fence (DRM syncobj).
///
/// The signaled state is sticky: once a submission signals the fence it
/// stays signaled, across any number of waits, until [`Fence::reset`].
/// Exactly one outstanding submit/wait cycle may use a fence at a time;
/// resetting it while a submission still names it would race the signal.
#[derive(Debug)]
pub struct Fence {
    device: DrmDevice,
    handle: u32,
}

impl Fence {
    /// Creates a fence in the unsignaled state.
    pub fn create(device: &DrmDevice) -> XeResult<Self> {
        let handle = device.syncobj_create(0)?;
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Forces the fence back to unsignaled. A no-op on an already
    /// unsignaled fence; required before each reuse.
    pub fn reset(&self) -> XeResult<()> {
        self.device.syncobj_reset(self.handle)?;
        Ok(())
    }

    /// Blocks until the fence signals or `timeout` elapses.
    ///
    /// # Errors
    /// `WaitTimeout` if the timeout passed without a signal; `Io` for any
    /// other wait failure.
    pub fn wait(&self, timeout: Duration) -> XeResult<()> {
        let deadline = deadline_ns(monotonic_now_ns(), timeout);
        self.wait_deadline(deadline)
    }

    /// Blocks until the fence signals, with no deadline. A hung engine
    /// leaves the caller here forever; there is no in-band recovery.
    pub fn wait_forever(&self) -> XeResult<()> {
        self.wait_deadline(i64::MAX)
    }

    fn wait_deadline(&self, deadline_ns: i64) -> XeResult<()> {
        match self.device.syncobj_wait(self.handle, deadline_ns) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ETIME) => Err(XeError::WaitTimeout),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if let Err(e) = self.device.syncobj_destroy(self.handle) {
            log::warn!("failed to destroy fence {}: {e}", self.handle);
        }
    }
}

/// Current CLOCK_MONOTONIC time in nanoseconds, the clock syncobj waits are
/// measured against.
fn monotonic_now_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_MONOTONIC cannot fail with a valid timespec pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec * 1_000_000_000 + ts.tv_nsec
}

/// Converts a relative timeout into the absolute deadline the kernel
/// expects, saturating so that huge timeouts mean "wait forever".
fn deadline_ns(now_ns: i64, timeout: Duration) -> i64 {
    let timeout_ns = i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX);
    now_ns.saturating_add(timeout_ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_relative_to_now() {
        assert_eq!(deadline_ns(1_000, Duration::from_nanos(500)), 1_500);
    }

    #[test]
    fn oversized_timeouts_saturate_to_forever() {
        assert_eq!(deadline_ns(1_000, Duration::MAX), i64::MAX);
        assert_eq!(deadline_ns(i64::MAX - 1, Duration::from_secs(1)), i64::MAX);
    }

    #[test]
    fn zero_timeout_is_a_poll() {
        let now = monotonic_now_ns();
        assert_eq!(deadline_ns(now, Duration::ZERO), now);
    }
}
