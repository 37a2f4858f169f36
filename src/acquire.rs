//! Input slot acquisition
//!
//! The hardware offers no completion interrupt for its slot pool, so a
//! free slot is found by polling. Each failed poll hands control to a
//! [`WaitStrategy`]; production sessions sleep a fixed interval, tests and
//! emulation spin with [`NoWait`].
//!
//! Acquisition is unbounded unless the caller supplies a poll budget, in
//! which case exhausting it yields [`VencError::AcquireTimeout`].

use std::time::Duration;

use tracing::{trace, warn};

use crate::device::{InputBuffer, VencDevice};
use crate::error::{VencError, VencResult};

/// Default back-off between polls of an exhausted pool
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls between repeated exhaustion warnings
const WARN_EVERY: u32 = 100;

/// What to do after a poll found the pool exhausted
pub trait WaitStrategy: Send {
    /// Called after failed poll number `attempt` (1-based)
    fn wait(&mut self, attempt: u32);
}

/// Sleep the calling thread for a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct SleepWait {
    interval: Duration,
}

impl SleepWait {
    /// Sleep `interval` between polls
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Interval slept per failed poll
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for SleepWait {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl WaitStrategy for SleepWait {
    fn wait(&mut self, _attempt: u32) {
        std::thread::sleep(self.interval);
    }
}

/// Retry immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWait;

impl WaitStrategy for NoWait {
    fn wait(&mut self, _attempt: u32) {}
}

/// Poll budget equivalent to `timeout` at the given poll interval
///
/// Always at least one poll, so a zero timeout still tries once.
pub fn poll_budget(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return u32::MAX;
    }
    let polls = timeout.as_micros().div_ceil(interval.as_micros()).max(1);
    u32::try_from(polls).unwrap_or(u32::MAX)
}

/// Take exclusive ownership of one free input slot
///
/// Returns the slot and the number of polls that found the pool empty.
/// With `max_polls` of `None` this only returns once a slot frees up.
pub fn acquire_slot<D: VencDevice + ?Sized>(
    device: &mut D,
    wait: &mut dyn WaitStrategy,
    max_polls: Option<u32>,
) -> VencResult<(D::Slot, u32)> {
    let mut empty_polls: u32 = 0;

    loop {
        if let Some(slot) = device.acquire_input_buffer() {
            trace!("Acquired input slot {} after {} empty polls", slot.id(), empty_polls);
            return Ok((slot, empty_polls));
        }

        empty_polls = empty_polls.saturating_add(1);
        trace!("Input pool exhausted (poll {})", empty_polls);

        if max_polls.is_some_and(|max| empty_polls >= max) {
            warn!("Giving up on input slot after {} polls", empty_polls);
            return Err(VencError::AcquireTimeout { polls: empty_polls });
        }

        if empty_polls % WARN_EVERY == 0 {
            warn!("Still waiting for a free input slot ({} polls)", empty_polls);
        }

        wait.wait(empty_polls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HostSlot, MockVencDevice};

    /// Records every wait call instead of sleeping
    #[derive(Default)]
    struct CountingWait {
        attempts: Vec<u32>,
    }

    impl WaitStrategy for CountingWait {
        fn wait(&mut self, attempt: u32) {
            self.attempts.push(attempt);
        }
    }

    fn pool_free_after(polls: u32) -> MockVencDevice {
        let mut device = MockVencDevice::new();
        let mut calls = 0;
        device
            .expect_acquire_input_buffer()
            .times(polls as usize + 1)
            .returning(move || {
                calls += 1;
                if calls > polls {
                    Some(HostSlot::new(7, 16, 8))
                } else {
                    None
                }
            });
        device
    }

    #[test]
    fn test_immediate_acquire() {
        let mut device = pool_free_after(0);
        let mut wait = CountingWait::default();

        let (slot, polls) = acquire_slot(&mut device, &mut wait, None).unwrap();
        assert_eq!(slot.id(), 7);
        assert_eq!(polls, 0);
        assert!(wait.attempts.is_empty());
    }

    #[test]
    fn test_retries_until_slot_frees() {
        let mut device = pool_free_after(5);
        let mut wait = CountingWait::default();

        let (slot, polls) = acquire_slot(&mut device, &mut wait, None).unwrap();
        assert_eq!(slot.id(), 7);
        assert_eq!(polls, 5);
        assert_eq!(wait.attempts, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_bounded_acquire_times_out() {
        let mut device = MockVencDevice::new();
        device
            .expect_acquire_input_buffer()
            .times(3)
            .returning(|| None);

        let err = acquire_slot(&mut device, &mut NoWait, Some(3)).unwrap_err();
        assert!(matches!(err, VencError::AcquireTimeout { polls: 3 }));
    }

    #[test]
    fn test_bounded_acquire_within_budget() {
        let mut device = pool_free_after(2);
        let (_, polls) = acquire_slot(&mut device, &mut NoWait, Some(3)).unwrap();
        assert_eq!(polls, 2);
    }

    #[test]
    fn test_poll_budget() {
        let interval = Duration::from_millis(10);
        assert_eq!(poll_budget(Duration::from_millis(100), interval), 10);
        assert_eq!(poll_budget(Duration::from_millis(15), interval), 2);
        assert_eq!(poll_budget(Duration::ZERO, interval), 1);
        assert_eq!(poll_budget(Duration::from_secs(1), Duration::ZERO), u32::MAX);
    }
}
