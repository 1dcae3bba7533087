use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::TimerUpdate;

/// Period of the status broadcast while a session is active
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Lifecycle of the single session a controller runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Active,
    Expired,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The time boundary was reached
    Expired,
    /// The host is shutting down
    Terminated,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Expired => write!(f, "time expired"),
            EndReason::Terminated => write!(f, "terminated by host"),
        }
    }
}

/// An armed session
///
/// Wall-clock times are reported to the surface; every countdown decision is
/// made against the monotonic `started_at` so clock changes cannot stretch a
/// session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    started_at: Instant,
}

impl Session {
    pub fn end_time(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.start_time.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Monotonic deadline of the session
    pub fn ends_at(&self) -> Instant {
        self.started_at + self.duration
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.ends_at().saturating_duration_since(now)
    }

    pub fn status(&self, now: Instant) -> TimerUpdate {
        let start_time = self.start_time.timestamp_millis();
        let duration = duration_millis(self.duration);
        TimerUpdate {
            duration,
            start_time,
            end_time: self.end_time().timestamp_millis(),
            remaining: duration_millis(self.remaining(now)),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Session state machine: `Idle -> Active -> Expired`
///
/// The timer itself never sleeps. The controller owns scheduling and feeds in
/// "now"; this type only decides what each transition means.
#[derive(Debug)]
pub struct SessionTimer {
    duration: Duration,
    state: SessionState,
    session: Option<Session>,
}

impl SessionTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: SessionState::Idle,
            session: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Arm the session. Only valid once, from `Idle`.
    pub fn start(&mut self, now: Instant, wall_clock: DateTime<Utc>) -> Option<TimerUpdate> {
        if self.state != SessionState::Idle {
            warn!("Ignoring session start in state {:?}; sessions are never re-armed", self.state);
            return None;
        }

        let session = Session {
            id: Uuid::new_v4(),
            start_time: wall_clock,
            duration: self.duration,
            started_at: now,
        };

        info!(
            "Session {} started at {}, ends at {}",
            session.id,
            session.start_time.format("%H:%M:%S"),
            session.end_time().format("%H:%M:%S")
        );

        let status = session.status(now);
        self.session = Some(session);
        self.state = SessionState::Active;
        Some(status)
    }

    /// Current status broadcast, only while active
    pub fn status(&self, now: Instant) -> Option<TimerUpdate> {
        if !self.is_active() {
            return None;
        }
        self.session.as_ref().map(|s| s.status(now))
    }

    /// End the session
    ///
    /// Returns the final status when this call performed the transition and
    /// `None` when there was no active session to end.
    pub fn end(&mut self, now: Instant, reason: EndReason) -> Option<TimerUpdate> {
        if !self.is_active() {
            debug!("End session ({}) ignored in state {:?}", reason, self.state);
            return None;
        }

        self.state = SessionState::Expired;
        let session = self.session.as_ref()?;
        info!("Session {} ended: {}", session.id, reason);
        Some(session.status(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall_clock() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn starts_idle() {
        let timer = SessionTimer::new(Duration::from_secs(600));
        assert_eq!(timer.state(), SessionState::Idle);
        assert!(timer.session().is_none());
        assert!(timer.status(Instant::now()).is_none());
    }

    #[test]
    fn start_reports_full_duration() {
        let mut timer = SessionTimer::new(Duration::from_millis(600_000));
        let status = timer.start(Instant::now(), wall_clock()).unwrap();

        assert_eq!(timer.state(), SessionState::Active);
        assert_eq!(status.duration, 600_000);
        assert_eq!(status.remaining, 600_000);
        assert_eq!(status.start_time, 1_700_000_000_000);
        assert_eq!(status.end_time, 1_700_000_600_000);
    }

    #[test]
    fn reported_end_time_matches_session_end() {
        let mut timer = SessionTimer::new(Duration::from_millis(86_400_000));
        let start = Instant::now();
        let status = timer.start(start, wall_clock()).unwrap();

        let session = timer.session().unwrap();
        assert_eq!(status.end_time, session.end_time().timestamp_millis());
        assert!(status.end_time > status.start_time);
    }

    #[test]
    fn remaining_counts_down_and_clamps_at_zero() {
        let mut timer = SessionTimer::new(Duration::from_millis(600_000));
        let start = Instant::now();
        timer.start(start, wall_clock());

        for t in [1_000u64, 59_500, 599_999, 600_000, 700_000] {
            let status = timer.status(start + Duration::from_millis(t)).unwrap();
            assert_eq!(status.remaining, 600_000u64.saturating_sub(t));
        }
    }

    #[test]
    fn is_never_rearmed() {
        let mut timer = SessionTimer::new(Duration::from_secs(2));
        let start = Instant::now();
        assert!(timer.start(start, wall_clock()).is_some());
        assert!(timer.start(start, wall_clock()).is_none());

        timer.end(start + Duration::from_secs(2), EndReason::Expired);
        assert!(timer.start(start, wall_clock()).is_none());
        assert_eq!(timer.state(), SessionState::Expired);
    }

    #[test]
    fn end_is_idempotent() {
        let mut timer = SessionTimer::new(Duration::from_secs(2));
        let start = Instant::now();
        timer.start(start, wall_clock());

        let first = timer.end(start + Duration::from_secs(2), EndReason::Expired);
        assert_eq!(first.map(|s| s.remaining), Some(0));
        assert!(timer.end(start + Duration::from_secs(3), EndReason::Terminated).is_none());
        assert_eq!(timer.state(), SessionState::Expired);
        assert!(timer.status(start).is_none());
    }

    #[test]
    fn ending_an_idle_timer_does_nothing() {
        let mut timer = SessionTimer::new(Duration::from_secs(2));
        assert!(timer.end(Instant::now(), EndReason::Terminated).is_none());
        assert_eq!(timer.state(), SessionState::Idle);
    }

    #[test]
    fn early_termination_reports_time_left() {
        let mut timer = SessionTimer::new(Duration::from_secs(10));
        let start = Instant::now();
        timer.start(start, wall_clock());
        let status = timer.end(start + Duration::from_secs(4), EndReason::Terminated).unwrap();
        assert_eq!(status.remaining, 6_000);
    }
}
