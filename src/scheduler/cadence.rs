//! Per-playlist polling cadence.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Interval used while a playlist has changed recently.
pub const ACTIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default interval for quiet playlists.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// How long a change keeps a playlist on the active interval.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadencePolicy {
    pub active: Duration,
    pub idle: Duration,
    pub window: Duration,
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self {
            active: ACTIVE_INTERVAL,
            idle: IDLE_INTERVAL,
            window: ACTIVITY_WINDOW,
        }
    }
}

impl CadencePolicy {
    /// Default policy with a different idle interval.
    pub fn with_idle(idle: Duration) -> Self {
        Self {
            idle,
            ..Self::default()
        }
    }
}

/// Mutable cadence of one playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CadenceState {
    pub last_checked: Option<DateTime<Utc>>,
    /// Completion time of the last pass that downloaded something.
    pub last_change: Option<DateTime<Utc>>,
    /// A pass is running; no second one is dispatched until it completes.
    pub in_flight: bool,
}

impl CadenceState {
    pub fn current_interval(&self, policy: &CadencePolicy, now: DateTime<Utc>) -> Duration {
        match self.last_change {
            Some(changed) if elapsed(changed, now) < policy.window => policy.active,
            _ => policy.idle,
        }
    }

    pub fn is_due(&self, policy: &CadencePolicy, now: DateTime<Utc>) -> bool {
        if self.in_flight {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(checked) => elapsed(checked, now) >= self.current_interval(policy, now),
        }
    }

    pub fn start_pass(&mut self) {
        self.in_flight = true;
    }

    pub fn complete_pass(&mut self, now: DateTime<Utc>, changed: bool) {
        self.last_checked = Some(now);
        if changed {
            self.last_change = Some(now);
        }
        self.in_flight = false;
    }
}

/// Time from `since` to `now`; zero if the clock went backwards.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ago(now: DateTime<Utc>, delta: TimeDelta) -> Option<DateTime<Utc>> {
        Some(now - delta)
    }

    #[test]
    fn test_recent_change_uses_active_interval() {
        let now = Utc::now();
        let policy = CadencePolicy::default();
        let state = CadenceState {
            last_change: ago(now, TimeDelta::hours(23) + TimeDelta::minutes(59)),
            ..Default::default()
        };
        assert_eq!(state.current_interval(&policy, now), ACTIVE_INTERVAL);
    }

    #[test]
    fn test_old_change_uses_idle_interval() {
        let now = Utc::now();
        let policy = CadencePolicy::default();
        let state = CadenceState {
            last_change: ago(now, TimeDelta::hours(24) + TimeDelta::seconds(1)),
            ..Default::default()
        };
        assert_eq!(state.current_interval(&policy, now), IDLE_INTERVAL);
    }

    #[test]
    fn test_never_changed_uses_configured_idle() {
        let policy = CadencePolicy::with_idle(Duration::from_secs(3600));
        let state = CadenceState::default();
        assert_eq!(
            state.current_interval(&policy, Utc::now()),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_never_checked_is_due() {
        assert!(CadenceState::default().is_due(&CadencePolicy::default(), Utc::now()));
    }

    #[test]
    fn test_due_after_interval() {
        let now = Utc::now();
        let policy = CadencePolicy::default();
        let mut state = CadenceState {
            last_checked: ago(now, TimeDelta::minutes(4)),
            last_change: ago(now, TimeDelta::hours(1)),
            in_flight: false,
        };
        assert!(!state.is_due(&policy, now));

        state.last_checked = ago(now, TimeDelta::minutes(5));
        assert!(state.is_due(&policy, now));

        // Same age but quiet for a day: waits for the idle interval
        state.last_change = ago(now, TimeDelta::days(2));
        assert!(!state.is_due(&policy, now));
    }

    #[test]
    fn test_in_flight_is_never_due() {
        let mut state = CadenceState::default();
        state.start_pass();
        assert!(!state.is_due(&CadencePolicy::default(), Utc::now()));
    }

    #[test]
    fn test_complete_pass_records_change_only_when_changed() {
        let now = Utc::now();
        let mut state = CadenceState::default();

        state.start_pass();
        state.complete_pass(now, false);
        assert_eq!(state.last_checked, Some(now));
        assert_eq!(state.last_change, None);
        assert!(!state.in_flight);

        let later = now + TimeDelta::minutes(15);
        state.start_pass();
        state.complete_pass(later, true);
        assert_eq!(state.last_checked, Some(later));
        assert_eq!(state.last_change, Some(later));
    }

    #[test]
    fn test_clock_skew_counts_as_zero_elapsed() {
        let now = Utc::now();
        let state = CadenceState {
            last_checked: Some(now + TimeDelta::minutes(10)),
            ..Default::default()
        };
        assert!(!state.is_due(&CadencePolicy::default(), now));
    }
}
