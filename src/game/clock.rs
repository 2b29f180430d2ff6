use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::game::utils::Side;

/// Millisecond time source the clock reads exactly once per commit.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic wall time measured from the moment the source was created.
#[derive(Debug, Clone)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven time source; clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now: Arc<AtomicU64>,
}

impl ManualTime {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Authoritative per-session state. Only the mutating clock operations touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    pub base_ms: u64,
    pub increment_ms: u64,
    pub first_ms: u64,
    pub second_ms: u64,
    pub running: bool,
    pub active_side: Side,
    pub run_started_at: Option<u64>,
    pub flagged_side: Option<Side>,
}

impl ClockState {
    fn fresh(base_ms: u64, increment_ms: u64, active_side: Side) -> Self {
        Self {
            base_ms,
            increment_ms,
            first_ms: base_ms,
            second_ms: base_ms,
            running: false,
            active_side,
            run_started_at: None,
            flagged_side: None,
        }
    }

    pub fn remaining(&self, side: Side) -> u64 {
        match side {
            Side::First => self.first_ms,
            Side::Second => self.second_ms,
        }
    }

    fn remaining_mut(&mut self, side: Side) -> &mut u64 {
        match side {
            Side::First => &mut self.first_ms,
            Side::Second => &mut self.second_ms,
        }
    }
}

/// Read-only clock view with live elapsed applied to the side to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockView {
    pub base_ms: u64,
    pub increment_ms: u64,
    pub first_ms: u64,
    pub second_ms: u64,
    pub running: bool,
    pub active_side: Side,
    pub flagged: Option<Side>,
}

/// Move-increment chess clock. Stopped, Running(side) and Flagged(side) are
/// the observable states; Flagged only clears through `reset` or `configure`.
pub struct Clock {
    state: ClockState,
    time: Arc<dyn TimeSource>,
}

impl Clock {
    pub fn new(base_ms: u64, increment_ms: u64, initial_side: Side) -> Self {
        Self::with_time_source(base_ms, increment_ms, initial_side, Arc::new(MonotonicTime::new()))
    }

    pub fn with_time_source(
        base_ms: u64,
        increment_ms: u64,
        initial_side: Side,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            state: ClockState::fresh(base_ms, increment_ms, initial_side),
            time,
        }
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    /// Replace the time control. Accumulated time is discarded; a running
    /// clock keeps running under the new settings.
    pub fn configure(&mut self, base_ms: u64, increment_ms: u64, initial_side: Side) {
        let was_running = self.state.running;
        self.pause();
        self.state = ClockState::fresh(base_ms, increment_ms, initial_side);
        debug!(
            "Clock configured: base={}ms increment={}ms side={:?}",
            base_ms, increment_ms, initial_side
        );
        if was_running {
            self.start(Some(initial_side));
        }
    }

    pub fn start(&mut self, side: Option<Side>) {
        if let Some(side) = side {
            self.state.active_side = side;
        }
        if self.state.flagged_side.is_some() {
            return;
        }
        if !self.state.running {
            self.state.running = true;
            self.state.run_started_at = Some(self.time.now_ms());
            debug!("Clock started for {:?}", self.state.active_side);
        }
    }

    pub fn pause(&mut self) {
        if !self.state.running {
            return;
        }
        let now = self.time.now_ms();
        self.commit_elapsed(now);
        self.state.running = false;
        self.state.run_started_at = None;
        debug!(
            "Clock paused: first={}ms second={}ms",
            self.state.first_ms, self.state.second_ms
        );
    }

    pub fn reset(&mut self, initial_side: Side) {
        self.pause();
        self.state.first_ms = self.state.base_ms;
        self.state.second_ms = self.state.base_ms;
        self.state.flagged_side = None;
        self.state.active_side = initial_side;
    }

    /// Charge the running interval, credit the increment to the mover and
    /// hand the move to the opponent.
    pub fn on_move(&mut self, mover: Side) {
        if self.state.flagged_side.is_some() {
            return;
        }
        let now = self.time.now_ms();
        if self.state.running {
            self.commit_elapsed(now);
        }
        if self.state.remaining(mover) > 0 {
            let increment = self.state.increment_ms;
            let remaining = self.state.remaining_mut(mover);
            *remaining = remaining.saturating_add(increment);
        }
        self.state.active_side = mover.opponent();
        if self.state.flagged_side.is_none() {
            self.state.run_started_at = Some(now);
            self.state.running = true;
        }
    }

    pub fn snapshot(&self) -> ClockView {
        let s = &self.state;
        let mut first_ms = s.first_ms;
        let mut second_ms = s.second_ms;

        if s.flagged_side.is_none() {
            if let (true, Some(started)) = (s.running, s.run_started_at) {
                let elapsed = self.time.now_ms().saturating_sub(started);
                match s.active_side {
                    Side::First => first_ms = first_ms.saturating_sub(elapsed),
                    Side::Second => second_ms = second_ms.saturating_sub(elapsed),
                }
            }
        }

        // only the side on turn can cross zero
        let active_ms = match s.active_side {
            Side::First => first_ms,
            Side::Second => second_ms,
        };
        let flagged = s
            .flagged_side
            .or_else(|| (active_ms == 0).then_some(s.active_side));

        ClockView {
            base_ms: s.base_ms,
            increment_ms: s.increment_ms,
            first_ms,
            second_ms,
            running: s.running,
            active_side: s.active_side,
            flagged,
        }
    }

    fn commit_elapsed(&mut self, now: u64) {
        let s = &mut self.state;
        let started = match (s.running, s.run_started_at, s.flagged_side) {
            (true, Some(started), None) => started,
            _ => return,
        };
        let elapsed = now.saturating_sub(started);
        let side = s.active_side;
        let remaining = s.remaining_mut(side);
        *remaining = remaining.saturating_sub(elapsed);
        if *remaining == 0 {
            s.flagged_side = Some(side);
            debug!("{:?} flagged", side);
        }
        s.run_started_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(base_ms: u64, increment_ms: u64) -> (Clock, ManualTime) {
        let time = ManualTime::new(1_000);
        let clock = Clock::with_time_source(base_ms, increment_ms, Side::First, Arc::new(time.clone()));
        (clock, time)
    }

    #[test]
    fn five_minute_game_after_twelve_seconds() {
        let (mut clock, time) = clock_at(300_000, 0);
        clock.start(Some(Side::First));
        time.advance(12_000);
        clock.on_move(Side::First);

        let state = clock.state();
        assert_eq!(state.first_ms, 288_000);
        assert_eq!(state.second_ms, 300_000);
        assert_eq!(state.active_side, Side::Second);
        assert!(state.running);
        assert_eq!(state.run_started_at, Some(13_000));
    }

    #[test]
    fn pause_start_intervals_sum_without_drift() {
        let (mut clock, time) = clock_at(60_000, 0);
        for interval in [1_500, 250, 3_000, 1] {
            clock.start(None);
            time.advance(interval);
            clock.pause();
            time.advance(10_000);
        }
        assert_eq!(clock.state().first_ms, 60_000 - 4_751);
        assert_eq!(clock.state().second_ms, 60_000);
        assert!(!clock.state().running);
        assert_eq!(clock.state().run_started_at, None);
    }

    #[test]
    fn increment_credited_once_and_side_toggles() {
        let (mut clock, time) = clock_at(10_000, 2_000);
        clock.start(None);
        time.advance(3_000);
        clock.on_move(Side::First);
        assert_eq!(clock.state().first_ms, 9_000);
        assert_eq!(clock.state().active_side, Side::Second);

        time.advance(1_000);
        clock.on_move(Side::Second);
        assert_eq!(clock.state().second_ms, 11_000);
        assert_eq!(clock.state().active_side, Side::First);
    }

    #[test]
    fn overrun_flags_and_floors_at_zero() {
        let (mut clock, time) = clock_at(5_000, 1_000);
        clock.start(None);
        time.advance(9_000);
        clock.on_move(Side::First);

        let state = clock.state().clone();
        assert_eq!(state.first_ms, 0);
        assert_eq!(state.flagged_side, Some(Side::First));
        // no increment for a side whose time ran out
        assert_eq!(state.active_side, Side::Second);

        time.advance(4_000);
        clock.on_move(Side::Second);
        clock.start(Some(Side::Second));
        assert_eq!(clock.state().first_ms, 0);
        assert_eq!(clock.state().second_ms, 5_000);
        assert_eq!(clock.state().flagged_side, Some(Side::First));
    }

    #[test]
    fn pause_latches_flag() {
        let (mut clock, time) = clock_at(2_000, 0);
        clock.start(None);
        time.advance(2_500);
        clock.pause();
        assert_eq!(clock.state().first_ms, 0);
        assert_eq!(clock.state().flagged_side, Some(Side::First));

        clock.start(None);
        assert!(!clock.state().running);
    }

    #[test]
    fn snapshot_is_pure_and_reports_live_flag() {
        let (mut clock, time) = clock_at(1_000, 0);
        clock.start(None);
        time.advance(400);

        let a = clock.snapshot();
        let b = clock.snapshot();
        assert_eq!(a, b);
        assert_eq!(a.first_ms, 600);
        assert_eq!(clock.state().first_ms, 1_000);

        time.advance(700);
        let view = clock.snapshot();
        assert_eq!(view.first_ms, 0);
        assert_eq!(view.flagged, Some(Side::First));
        assert_eq!(clock.state().flagged_side, None);

        clock.pause();
        assert_eq!(clock.state().flagged_side, Some(Side::First));
        assert_eq!(clock.snapshot().flagged, Some(Side::First));
    }

    #[test]
    fn snapshot_does_not_disturb_pause_accounting() {
        let (mut clock, time) = clock_at(10_000, 0);
        clock.start(None);
        time.advance(1_000);
        clock.snapshot();
        time.advance(1_000);
        clock.snapshot();
        clock.pause();
        assert_eq!(clock.state().first_ms, 8_000);
    }

    #[test]
    fn configure_while_running_restarts_fresh() {
        let (mut clock, time) = clock_at(10_000, 0);
        clock.start(None);
        time.advance(10_000);
        clock.pause();
        assert!(clock.state().flagged_side.is_some());

        clock.start(None);
        clock.configure(60_000, 1_000, Side::Second);
        assert!(!clock.state().running);

        clock.start(None);
        time.advance(500);
        clock.configure(30_000, 0, Side::First);
        let state = clock.state();
        assert_eq!(state.first_ms, 30_000);
        assert_eq!(state.second_ms, 30_000);
        assert_eq!(state.flagged_side, None);
        assert!(state.running);
        assert_eq!(state.active_side, Side::First);
    }

    #[test]
    fn reset_restores_base_and_clears_flag() {
        let (mut clock, time) = clock_at(1_000, 0);
        clock.start(None);
        time.advance(5_000);
        clock.pause();
        clock.reset(Side::Second);

        let state = clock.state();
        assert_eq!(state.first_ms, 1_000);
        assert_eq!(state.second_ms, 1_000);
        assert_eq!(state.flagged_side, None);
        assert_eq!(state.active_side, Side::Second);
        assert!(!state.running);
    }

    #[test]
    fn increment_saturates_instead_of_overflowing() {
        let (mut clock, _) = clock_at(u64::MAX - 10, u64::MAX / 2);
        for _ in 0..5 {
            let mover = clock.state().active_side;
            clock.on_move(mover);
        }
        let state = clock.state();
        assert_eq!(state.first_ms, u64::MAX);
        assert_eq!(state.second_ms, u64::MAX);
        assert_eq!(state.flagged_side, None);
    }

    #[test]
    fn derived_flag_follows_side_on_turn() {
        let (mut clock, time) = clock_at(10_000, 0);
        clock.configure(0, 0, Side::Second);
        assert_eq!(clock.snapshot().flagged, Some(Side::Second));

        clock.start(None);
        time.advance(100);
        clock.pause();
        assert_eq!(clock.state().flagged_side, Some(Side::Second));
        assert_eq!(clock.snapshot().flagged, Some(Side::Second));
    }

    #[test]
    fn on_move_from_stopped_starts_opponent() {
        let (mut clock, time) = clock_at(10_000, 500);
        clock.on_move(Side::First);
        assert_eq!(clock.state().first_ms, 10_500);
        assert!(clock.state().running);
        time.advance(2_000);
        assert_eq!(clock.snapshot().second_ms, 8_000);
    }
}
