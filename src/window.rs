//! Per-`(pair_id, direction)` opportunity-window state machine.
//! `WindowTracker` exclusively owns the active-window map; nothing else
//! mutates an `OpportunityWindow` while it is open.

use std::collections::HashMap;

use uuid::Uuid;

use crate::types::{Cents, Direction, OpportunityWindow, PairId};

/// Consecutive ERROR/missing ticks while Open before a window force-closes.
const FORCE_CLOSE_AFTER_ERRORS: u32 = 3;

#[derive(Debug, Clone)]
enum Slot {
    Idle,
    Open(OpportunityWindow),
}

pub struct WindowTracker {
    slots: HashMap<(PairId, Direction), Slot>,
}

impl Default for WindowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowTracker {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Feed one direction's spread for one pair through the state machine.
    /// `spread = None` means the observation was missing or in ERROR status
    /// for this tick. Returns a closed window if this observation caused one
    /// to close (spread turned non-positive, or the 3-strike force close).
    pub fn on_observation(
        &mut self,
        pair_id: &PairId,
        direction: Direction,
        spread: Option<Cents>,
        now_mono_ns: u64,
        now_wall_ms: i64,
    ) -> Option<OpportunityWindow> {
        let key = (pair_id.clone(), direction);
        let slot = self.slots.entry(key).or_insert(Slot::Idle);

        match (&mut *slot, spread) {
            (Slot::Idle, None) => None,
            (Slot::Idle, Some(s)) if s.0 <= 0 => None,
            (Slot::Idle, Some(s)) => {
                *slot = Slot::Open(OpportunityWindow {
                    window_id: Uuid::new_v4(),
                    pair_id: pair_id.clone(),
                    direction,
                    start_time_mono_ns: now_mono_ns,
                    last_seen_mono_ns: now_mono_ns,
                    end_time_mono_ns: None,
                    start_time_wall_ms: now_wall_ms,
                    end_time_wall_ms: None,
                    peak_spread: s,
                    sum_spread: s,
                    observation_count: 1,
                    interrupted: false,
                    consecutive_errors: 0,
                });
                None
            }
            (Slot::Open(w), None) => {
                w.consecutive_errors += 1;
                if w.consecutive_errors >= FORCE_CLOSE_AFTER_ERRORS {
                    let mut closed = w.clone();
                    closed.end_time_mono_ns = Some(now_mono_ns);
                    closed.end_time_wall_ms = Some(now_wall_ms);
                    closed.interrupted = true;
                    *slot = Slot::Idle;
                    Some(closed)
                } else {
                    None
                }
            }
            (Slot::Open(w), Some(s)) if s.0 <= 0 => {
                let mut closed = w.clone();
                closed.end_time_mono_ns = Some(now_mono_ns);
                closed.end_time_wall_ms = Some(now_wall_ms);
                *slot = Slot::Idle;
                Some(closed)
            }
            (Slot::Open(w), Some(s)) => {
                w.last_seen_mono_ns = now_mono_ns;
                w.peak_spread = w.peak_spread.max(s);
                w.sum_spread = w.sum_spread + s;
                w.observation_count += 1;
                w.consecutive_errors = 0;
                None
            }
        }
    }

    /// Currently open windows, for checkpointing.
    pub fn snapshot(&self) -> Vec<OpportunityWindow> {
        self.slots
            .values()
            .filter_map(|s| match s {
                Slot::Open(w) => Some(w.clone()),
                Slot::Idle => None,
            })
            .collect()
    }

    /// Replace the active-window map with previously-checkpointed windows
    /// (restart-within-grace path).
    pub fn restore(&mut self, windows: Vec<OpportunityWindow>) {
        self.slots.clear();
        for w in windows {
            self.slots
                .insert((w.pair_id.clone(), w.direction), Slot::Open(w));
        }
    }

    /// Force-close every open window (shutdown, or stale-checkpoint restart).
    pub fn force_close_all(&mut self, now_mono_ns: u64, now_wall_ms: i64) -> Vec<OpportunityWindow> {
        let mut closed = Vec::new();
        for slot in self.slots.values_mut() {
            if let Slot::Open(w) = slot {
                let mut c = w.clone();
                c.end_time_mono_ns = Some(now_mono_ns);
                c.end_time_wall_ms = Some(now_wall_ms);
                c.interrupted = true;
                closed.push(c);
            }
            *slot = Slot::Idle;
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR: &str = "T1";

    #[test]
    fn idle_stays_idle_on_nonpositive_spread() {
        let mut t = WindowTracker::new();
        let closed = t.on_observation(&PAIR.to_string(), Direction::AToB, Some(Cents(-1)), 0, 0);
        assert!(closed.is_none());
        assert!(t.snapshot().is_empty());
    }

    #[test]
    fn zero_spread_does_not_open_a_window() {
        let mut t = WindowTracker::new();
        let closed = t.on_observation(&PAIR.to_string(), Direction::AToB, Some(Cents(0)), 0, 0);
        assert!(closed.is_none());
        assert!(t.snapshot().is_empty());
    }

    /// S2 — simple window: ticks at t=0..4s, spreads [-1, 2, 4, 3, -0.5]c
    /// (scaled to cents). Expected: start=1s end=4s duration=3 peak=4 avg=3 count=3.
    #[test]
    fn s2_simple_window() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();

        assert!(t
            .on_observation(&pid, Direction::AToB, Some(Cents(-1)), 0, 0)
            .is_none());
        assert!(t
            .on_observation(&pid, Direction::AToB, Some(Cents(2)), 1_000_000_000, 1_000)
            .is_none());
        assert!(t
            .on_observation(&pid, Direction::AToB, Some(Cents(4)), 2_000_000_000, 2_000)
            .is_none());
        assert!(t
            .on_observation(&pid, Direction::AToB, Some(Cents(3)), 3_000_000_000, 3_000)
            .is_none());
        let closed = t
            .on_observation(&pid, Direction::AToB, Some(Cents(0)), 4_000_000_000, 4_000)
            .expect("window should close on non-positive spread");

        assert_eq!(closed.start_time_wall_ms, 1_000);
        assert_eq!(closed.end_time_wall_ms, Some(4_000));
        assert_eq!(closed.duration_seconds(), Some(3));
        assert_eq!(closed.peak_spread, Cents(4));
        assert_eq!(closed.avg_spread(), Cents(3)); // (2+4+3)/3 = 3
        assert_eq!(closed.observation_count, 3);
        assert!(!closed.interrupted);
    }

    #[test]
    fn single_tick_spike_has_zero_duration() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();
        assert!(t
            .on_observation(&pid, Direction::AToB, Some(Cents(5)), 0, 1_000)
            .is_none());
        let closed = t
            .on_observation(&pid, Direction::AToB, Some(Cents(0)), 0, 1_000)
            .unwrap();
        assert_eq!(closed.observation_count, 1);
        assert_eq!(closed.duration_seconds(), Some(0));
    }

    #[test]
    fn missing_observation_does_not_close_window() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();
        t.on_observation(&pid, Direction::AToB, Some(Cents(5)), 0, 0);
        let closed = t.on_observation(&pid, Direction::AToB, None, 1, 1);
        assert!(closed.is_none());
        assert_eq!(t.snapshot().len(), 1);
        assert_eq!(t.snapshot()[0].observation_count, 1);
    }

    #[test]
    fn three_consecutive_errors_force_close() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();
        t.on_observation(&pid, Direction::AToB, Some(Cents(5)), 0, 0);
        assert!(t.on_observation(&pid, Direction::AToB, None, 1, 1).is_none());
        assert!(t.on_observation(&pid, Direction::AToB, None, 2, 2).is_none());
        let closed = t.on_observation(&pid, Direction::AToB, None, 3, 3);
        let closed = closed.expect("third consecutive error must force-close");
        assert!(closed.interrupted);
        assert!(t.snapshot().is_empty());
    }

    #[test]
    fn error_streak_resets_on_good_observation() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();
        t.on_observation(&pid, Direction::AToB, Some(Cents(5)), 0, 0);
        t.on_observation(&pid, Direction::AToB, None, 1, 1);
        t.on_observation(&pid, Direction::AToB, None, 2, 2);
        // Good tick resets the counter before the third strike.
        assert!(t
            .on_observation(&pid, Direction::AToB, Some(Cents(3)), 3, 3)
            .is_none());
        assert!(t.on_observation(&pid, Direction::AToB, None, 4, 4).is_none());
        assert!(t.on_observation(&pid, Direction::AToB, None, 5, 5).is_none());
        // Still only 2 consecutive errors since the reset.
        assert_eq!(t.snapshot().len(), 1);
    }

    #[test]
    fn directions_are_independent_per_pair() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();
        t.on_observation(&pid, Direction::AToB, Some(Cents(5)), 0, 0);
        t.on_observation(&pid, Direction::BToA, Some(Cents(7)), 0, 0);
        let snap = t.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().any(|w| w.direction == Direction::AToB));
        assert!(snap.iter().any(|w| w.direction == Direction::BToA));
    }

    #[test]
    fn at_most_one_open_window_per_pair_direction() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();
        t.on_observation(&pid, Direction::AToB, Some(Cents(5)), 0, 0);
        t.on_observation(&pid, Direction::AToB, Some(Cents(6)), 1, 1);
        // Still exactly one window for (pid, AToB), not two.
        let snap = t.snapshot();
        assert_eq!(snap.iter().filter(|w| w.direction == Direction::AToB).count(), 1);
    }

    #[test]
    fn restore_reopens_checkpointed_windows() {
        let mut t = WindowTracker::new();
        let w = OpportunityWindow {
            window_id: Uuid::new_v4(),
            pair_id: PAIR.to_string(),
            direction: Direction::AToB,
            start_time_mono_ns: 0,
            last_seen_mono_ns: 0,
            end_time_mono_ns: None,
            start_time_wall_ms: 0,
            end_time_wall_ms: None,
            peak_spread: Cents(4),
            sum_spread: Cents(9),
            observation_count: 3,
            interrupted: false,
            consecutive_errors: 0,
        };
        t.restore(vec![w]);
        assert_eq!(t.snapshot().len(), 1);
        // Subsequent ticks continue accumulating into the restored window.
        let closed = t
            .on_observation(&PAIR.to_string(), Direction::AToB, Some(Cents(2)), 10, 10)
            .is_none();
        assert!(closed);
        assert_eq!(t.snapshot()[0].observation_count, 4);
    }

    #[test]
    fn force_close_all_marks_interrupted_and_clears_slots() {
        let mut t = WindowTracker::new();
        let pid = PAIR.to_string();
        t.on_observation(&pid, Direction::AToB, Some(Cents(5)), 0, 0);
        t.on_observation(&pid, Direction::BToA, Some(Cents(5)), 0, 0);
        let closed = t.force_close_all(100, 100);
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|w| w.interrupted));
        assert!(t.snapshot().is_empty());
    }
}
