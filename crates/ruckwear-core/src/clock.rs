//! Session clock.
//!
//! Like the rest of the session machinery the clock owns no thread. It keeps
//! banked active time plus the instant it last started running; the caller
//! polls [`SessionClock::tick`] and gets back how many whole seconds of
//! active time have elapsed since the previous poll. Each such second is one
//! tick.
//!
//! ```text
//! Stopped -> Running <-> Paused -> Finished
//! ```
//!
//! Time comes from `tokio::time::Instant`, so a paused runtime clock in tests
//! drives it exactly like wall time does in production.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Running,
    Paused,
    Finished,
}

/// Result of polling the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    /// Whole seconds that elapsed since the last report. Zero means no tick.
    pub fired: u64,
    /// Total whole seconds of active time so far.
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SessionClock {
    state: ClockState,
    /// Active time accumulated before the current running stretch.
    banked: Duration,
    /// When the current running stretch began.
    running_since: Option<Instant>,
    /// Whole seconds already handed out as ticks.
    reported_secs: u64,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            state: ClockState::Stopped,
            banked: Duration::ZERO,
            running_since: None,
            reported_secs: 0,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Active time so far, paused stretches excluded.
    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.banked + Instant::now().saturating_duration_since(since),
            None => self.banked,
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// Begin counting from zero. Returns false if the clock was already used.
    pub fn start(&mut self) -> bool {
        if self.state != ClockState::Stopped {
            return false;
        }
        self.state = ClockState::Running;
        self.banked = Duration::ZERO;
        self.reported_secs = 0;
        self.running_since = Some(Instant::now());
        true
    }

    /// Stop accruing time. A second call is a no-op.
    pub fn pause(&mut self) -> bool {
        if self.state != ClockState::Running {
            return false;
        }
        self.bank();
        self.state = ClockState::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state != ClockState::Paused {
            return false;
        }
        self.state = ClockState::Running;
        self.running_since = Some(Instant::now());
        true
    }

    /// Freeze the clock for good and return the final active time.
    ///
    /// Idempotent: later calls return the same duration.
    pub fn stop(&mut self) -> Duration {
        if self.state == ClockState::Running {
            self.bank();
        }
        if self.state != ClockState::Stopped {
            self.state = ClockState::Finished;
        }
        self.banked
    }

    /// Report newly elapsed whole seconds of active time.
    pub fn tick(&mut self) -> ClockTick {
        let elapsed_secs = self.elapsed_secs();
        let fired = elapsed_secs.saturating_sub(self.reported_secs);
        self.reported_secs = self.reported_secs.max(elapsed_secs);
        ClockTick {
            fired,
            elapsed_secs,
        }
    }

    fn bank(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.banked += Instant::now().saturating_duration_since(since);
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_active_second() {
        let mut clock = SessionClock::new();
        assert!(clock.start());

        advance(Duration::from_millis(999)).await;
        assert_eq!(clock.tick().fired, 0);

        advance(Duration::from_millis(1)).await;
        let tick = clock.tick();
        assert_eq!(tick.fired, 1);
        assert_eq!(tick.elapsed_secs, 1);

        advance(Duration::from_secs(3)).await;
        assert_eq!(clock.tick().fired, 3);
        assert_eq!(clock.tick().fired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_excluded() {
        let mut clock = SessionClock::new();
        clock.start();
        advance(Duration::from_secs(5)).await;
        assert!(clock.pause());
        advance(Duration::from_secs(60)).await;
        assert_eq!(clock.tick().fired, 5);
        assert!(clock.resume());
        advance(Duration::from_secs(60)).await;

        let total = clock.stop();
        assert_eq!(total.as_secs(), 65);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_are_idempotent() {
        let mut clock = SessionClock::new();
        clock.start();
        advance(Duration::from_secs(2)).await;
        assert!(clock.pause());
        assert!(!clock.pause());
        advance(Duration::from_secs(10)).await;
        assert!(clock.resume());
        assert!(!clock.resume());
        advance(Duration::from_secs(2)).await;
        assert_eq!(clock.elapsed_secs(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_freezes_time() {
        let mut clock = SessionClock::new();
        clock.start();
        advance(Duration::from_secs(7)).await;
        let first = clock.stop();
        advance(Duration::from_secs(30)).await;
        let second = clock.stop();
        assert_eq!(first, second);
        assert_eq!(clock.state(), ClockState::Finished);
        assert!(!clock.resume());
        assert!(!clock.start());
    }

    #[tokio::test(start_paused = true)]
    async fn sum_of_ticks_matches_active_time() {
        let mut clock = SessionClock::new();
        clock.start();
        let mut total = 0;
        for step in 0..40u64 {
            advance(Duration::from_millis(370)).await;
            total += clock.tick().fired;
            if step == 10 {
                clock.pause();
                advance(Duration::from_secs(9)).await;
                clock.resume();
            }
        }
        let active = clock.stop().as_secs();
        assert!(active.abs_diff(total) <= 1);
    }
}
