use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::metrics::TIMER_TICKS_TOTAL;
use crate::models::timer::Urgency;

/// What one tick of the countdown produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Tick { remaining_seconds: u32 },
    Expired,
}

/// Cooperative one-second countdown.
///
/// The armed interval lives inside the timer, so `stop()` or dropping the
/// timer releases it. Expiry is reported once per `start()`.
pub struct Timer {
    tick_interval: Duration,
    total_seconds: u32,
    remaining_seconds: u32,
    interval: Option<Interval>,
    expiry_reported: bool,
}

impl Timer {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            total_seconds: 0,
            remaining_seconds: 0,
            interval: None,
            expiry_reported: false,
        }
    }

    /// Arms the countdown. Returns `false` and stays idle when there is no time to count.
    pub fn start(&mut self, initial_seconds: u32) -> bool {
        self.total_seconds = initial_seconds;
        self.remaining_seconds = initial_seconds;
        self.expiry_reported = false;

        if initial_seconds == 0 {
            self.interval = None;
            tracing::warn!("Timer not started: zero seconds allotted");
            return false;
        }

        self.arm();
        true
    }

    /// Re-arms with whatever time is left, e.g. after a failed submission.
    pub fn resume(&mut self) -> bool {
        if self.remaining_seconds == 0 || self.expiry_reported {
            return false;
        }
        self.arm();
        true
    }

    fn arm(&mut self) {
        let mut interval = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        // Late ticks are delivered back-to-back rather than dropped
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            tracing::debug!(remaining = self.remaining_seconds, "Timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn total_seconds(&self) -> u32 {
        self.total_seconds
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.total_seconds - self.remaining_seconds
    }

    pub fn urgency(&self) -> Urgency {
        Urgency::from_remaining(self.remaining_seconds)
    }

    /// Waits for the next tick. Pends forever while the timer is stopped,
    /// which makes it safe to poll from `select!` unconditionally.
    pub async fn tick(&mut self) -> TimerSignal {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
        self.advance()
    }

    /// Applies one elapsed second.
    pub fn advance(&mut self) -> TimerSignal {
        TIMER_TICKS_TOTAL.inc();
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);

        if self.remaining_seconds == 0 {
            self.interval = None;
            if !self.expiry_reported {
                self.expiry_reported = true;
                return TimerSignal::Expired;
            }
        }

        TimerSignal::Tick {
            remaining_seconds: self.remaining_seconds,
        }
    }
}
