//! The single multiplexed protocol timer.
//!
//! The protocol never needs more than one pending deadline: retries while
//! electing, the poll cycle while master, the liveness watchdog while slave.
//! The node emits [`TimerArm`] commands; the event loop keeps exactly one
//! `(purpose, deadline)` slot, so arming supersedes whatever was pending and
//! a stale expiry can never be delivered.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// What the pending deadline means when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPurpose {
    /// Retry the multicast `slave_needed_req` while waiting for a slave.
    SlaveNeededRetry,
    /// Retry the multicast `master_needed_req` while waiting for a master.
    MasterNeededRetry,
    /// Next master poll cycle (`get_data_req`, every 5 s).
    PollCycle,
    /// Slave-side watchdog on the master's polls.
    MasterLiveness,
}

/// Command from the state machine: replace the pending deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerArm {
    pub purpose: TimerPurpose,
    pub after: Duration,
}

/// Loop-owned resettable deadline.
pub struct MuxTimer {
    slot: Option<(TimerPurpose, Instant)>,
}

impl MuxTimer {
    pub fn new() -> Self {
        MuxTimer { slot: None }
    }

    /// Replace the pending deadline; the superseded one is never delivered.
    pub fn arm(&mut self, cmd: TimerArm) {
        self.slot = Some((cmd.purpose, Instant::now() + cmd.after));
    }

    /// Drop the pending deadline after it has been delivered.
    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }

    /// Resolve when the armed deadline elapses; pend forever while idle.
    ///
    /// Cancellation-safe: the deadline lives in the slot, so the future can
    /// be dropped and recreated by `select!` on every loop iteration.
    pub async fn expired(&self) -> TimerPurpose {
        match self.slot {
            Some((purpose, at)) => {
                sleep_until(at).await;
                purpose
            }
            None => std::future::pending().await,
        }
    }
}

impl Default for MuxTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_the_pending_deadline() {
        let mut timer = MuxTimer::new();
        timer.arm(TimerArm {
            purpose: TimerPurpose::SlaveNeededRetry,
            after: Duration::from_secs(3),
        });
        timer.arm(TimerArm {
            purpose: TimerPurpose::PollCycle,
            after: Duration::from_secs(5),
        });

        let fired = timer.expired().await;
        assert_eq!(fired, TimerPurpose::PollCycle);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_never_fires() {
        let timer = MuxTimer::new();
        assert!(!timer.is_armed());

        let expiry = timer.expired();
        tokio::select! {
            _ = expiry => panic!("idle timer fired"),
            _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        }
    }
}
