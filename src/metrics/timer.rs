//! Step timing
//!
//! Measures wall-clock time between a step's start and finish events.
//! A finish consumes its start, so two finishes in a row without a start in
//! between never re-measure the first step: sequential timing measures the
//! gap between them, per-step timing measures zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    #[cfg(test)]
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// How start times are tracked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerMode {
    /// One start time per reporter; overlapping steps overwrite each other
    Sequential,
    /// One start time per build step
    #[default]
    PerStep,
}

/// Identifies a step across its start and finish events
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepKey {
    pub build_id: String,
    pub step_order: u32,
}

impl StepKey {
    pub fn new(build_id: &str, step_order: u32) -> Self {
        Self {
            build_id: build_id.to_string(),
            step_order,
        }
    }
}

enum StartTimes {
    Sequential(DateTime<Utc>),
    PerStep(HashMap<StepKey, DateTime<Utc>>),
}

/// Per-reporter timing state
pub struct StepTimer {
    clock: Arc<dyn Clock>,
    started: StartTimes,
}

impl StepTimer {
    pub fn new(mode: TimerMode, clock: Arc<dyn Clock>) -> Self {
        let started = match mode {
            TimerMode::Sequential => StartTimes::Sequential(clock.now()),
            TimerMode::PerStep => StartTimes::PerStep(HashMap::new()),
        };
        Self { clock, started }
    }

    pub fn mode(&self) -> TimerMode {
        match self.started {
            StartTimes::Sequential(_) => TimerMode::Sequential,
            StartTimes::PerStep(_) => TimerMode::PerStep,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record the start of a step, replacing any unread start time
    pub fn on_start(&mut self, key: &StepKey) {
        let now = self.clock.now();
        match &mut self.started {
            StartTimes::Sequential(started_at) => *started_at = now,
            StartTimes::PerStep(starts) => {
                if starts.insert(key.clone(), now).is_some() {
                    log::debug!("Step {:?} restarted before finishing", key);
                }
            }
        }
    }

    /// Seconds since the matching start, never negative.
    ///
    /// Sequential timing resets the start to now. Per-step timing forgets the
    /// step, and a finish with no recorded start measures zero.
    pub fn on_finish(&mut self, key: &StepKey) -> f64 {
        let now = self.clock.now();
        let started_at = match &mut self.started {
            StartTimes::Sequential(started_at) => std::mem::replace(started_at, now),
            StartTimes::PerStep(starts) => match starts.remove(key) {
                Some(started_at) => started_at,
                None => {
                    log::warn!("Step {:?} finished without a recorded start", key);
                    now
                }
            },
        };
        seconds_between(started_at, now)
    }

    #[cfg(test)]
    fn tracked_steps(&self) -> usize {
        match &self.started {
            StartTimes::Sequential(_) => 0,
            StartTimes::PerStep(starts) => starts.len(),
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let elapsed = to - from;
    let seconds = match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => elapsed.num_milliseconds() as f64 / 1_000.0,
    };
    seconds.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap())
    }

    fn key(order: u32) -> StepKey {
        StepKey::new("build-1", order)
    }

    #[test]
    fn test_elapsed_between_start_and_finish() {
        for mode in [TimerMode::Sequential, TimerMode::PerStep] {
            let clock = clock();
            let mut timer = StepTimer::new(mode, Arc::new(clock.clone()));

            timer.on_start(&key(0));
            clock.advance(Duration::milliseconds(2_500));

            let elapsed = timer.on_finish(&key(0));
            assert!((elapsed - 2.5).abs() < 1e-9, "{:?}: {}", mode, elapsed);
        }
    }

    #[test]
    fn test_consecutive_finishes_reset() {
        for (mode, expected) in [(TimerMode::Sequential, 0.02), (TimerMode::PerStep, 0.0)] {
            let clock = clock();
            let mut timer = StepTimer::new(mode, Arc::new(clock.clone()));

            timer.on_start(&key(0));
            clock.advance(Duration::seconds(10));
            assert_eq!(timer.on_finish(&key(0)), 10.0);

            clock.advance(Duration::milliseconds(20));
            let second = timer.on_finish(&key(0));
            assert!((second - expected).abs() < 1e-9, "{:?}: {}", mode, second);
        }
    }

    #[test]
    fn test_per_step_finish_forgets_start() {
        let clock = clock();
        let mut timer = StepTimer::new(TimerMode::PerStep, Arc::new(clock.clone()));

        for build in 0..1000 {
            let step = StepKey::new(&format!("build-{}", build), 0);
            timer.on_start(&step);
            clock.advance(Duration::milliseconds(5));
            timer.on_finish(&step);
        }
        assert_eq!(timer.tracked_steps(), 0);

        // an unmatched start stays until its finish arrives
        timer.on_start(&key(3));
        assert_eq!(timer.tracked_steps(), 1);
        timer.on_finish(&key(3));
        assert_eq!(timer.tracked_steps(), 0);
    }

    #[test]
    fn test_sequential_finish_without_start_measures_from_creation() {
        let clock = clock();
        let mut timer = StepTimer::new(TimerMode::Sequential, Arc::new(clock.clone()));
        clock.advance(Duration::seconds(3));
        assert_eq!(timer.on_finish(&key(0)), 3.0);
    }

    #[test]
    fn test_per_step_finish_without_start_is_zero() {
        let clock = clock();
        let mut timer = StepTimer::new(TimerMode::PerStep, Arc::new(clock.clone()));
        clock.advance(Duration::seconds(3));
        assert_eq!(timer.on_finish(&key(7)), 0.0);
    }

    #[test]
    fn test_per_step_overlapping_steps() {
        let clock = clock();
        let mut timer = StepTimer::new(TimerMode::PerStep, Arc::new(clock.clone()));

        timer.on_start(&key(0));
        clock.advance(Duration::seconds(1));
        timer.on_start(&key(1));
        clock.advance(Duration::seconds(2));

        assert_eq!(timer.on_finish(&key(1)), 2.0);
        assert_eq!(timer.on_finish(&key(0)), 3.0);
    }

    #[test]
    fn test_sequential_overlap_overwrites() {
        let clock = clock();
        let mut timer = StepTimer::new(TimerMode::Sequential, Arc::new(clock.clone()));

        timer.on_start(&key(0));
        clock.advance(Duration::seconds(1));
        timer.on_start(&key(1));
        clock.advance(Duration::seconds(2));

        // step 0's start was lost
        assert_eq!(timer.on_finish(&key(0)), 2.0);
    }

    #[test]
    fn test_clock_going_backwards_clamps() {
        let clock = clock();
        let mut timer = StepTimer::new(TimerMode::PerStep, Arc::new(clock.clone()));

        timer.on_start(&key(0));
        clock.advance(Duration::seconds(-5));
        assert_eq!(timer.on_finish(&key(0)), 0.0);
    }

    #[test]
    fn test_same_order_different_builds() {
        let clock = clock();
        let mut timer = StepTimer::new(TimerMode::PerStep, Arc::new(clock.clone()));

        timer.on_start(&StepKey::new("a", 0));
        clock.advance(Duration::seconds(1));
        timer.on_start(&StepKey::new("b", 0));
        clock.advance(Duration::seconds(1));

        assert_eq!(timer.on_finish(&StepKey::new("a", 0)), 2.0);
        assert_eq!(timer.on_finish(&StepKey::new("b", 0)), 1.0);
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
