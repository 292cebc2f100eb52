use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whole-cent fixed-point amount. All fee and spread arithmetic happens in
/// `Cents` so rounding ambiguity never leaks in from `f64`; conversion to
/// dollars only happens at the Recorder/display boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub fn from_dollars_ceil(dollars: f64) -> Self {
        Cents((dollars * 100.0).ceil() as i64)
    }

    pub fn as_dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl std::ops::Add for Cents {
    type Output = Cents;
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Cents {
    type Output = Cents;
    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Cents {
    fn sum<I: Iterator<Item = Cents>>(iter: I) -> Cents {
        iter.fold(Cents::ZERO, |a, b| a + b)
    }
}

/// Which external venue a `Quote` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    A,
    B,
}

/// Direction of a round trip between the two venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Buy Venue-A @ask, sell Venue-B @bid.
    AToB,
    /// Buy Venue-B @ask, sell Venue-A @bid.
    BToA,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::AToB, Direction::BToA];

    /// External display form used in `opportunity_windows.csv` (
    /// `K→P` / `P→K`, Venue-A = Kalshi, Venue-B = Polymarket). Kept out of
    /// `window.rs` and `spread.rs` so the state machine stays venue-agnostic.
    pub fn display(self) -> &'static str {
        match self {
            Direction::AToB => "K\u{2192}P",
            Direction::BToA => "P\u{2192}K",
        }
    }
}

pub type PairId = String;

/// A monitored pair of instruments, one per venue. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketPair {
    pub pair_id: PairId,
    pub venue_a_instrument: String,
    pub venue_b_instrument: String,
    pub display_name: String,
    #[serde(default)]
    pub manually_verified: bool,
    #[serde(default)]
    pub notes: String,
    /// Contract size in dollars of notional per contract. Venue-A's fee
    /// schedule is quoted per this size.
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
}

fn default_contract_size() -> f64 {
    1.0
}

/// A single price observation for one instrument on one venue. Ephemeral —
/// discarded after it has driven the pipeline for one tick.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub venue: Venue,
    pub bid: f64,
    pub ask: f64,
    /// Venue-reported timestamp, milliseconds since epoch.
    pub remote_timestamp_ms: i64,
    /// Wall-clock time the quote was received locally, milliseconds since epoch.
    pub local_timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationStatus {
    Ok,
    Stale,
    Error,
}

/// Result of processing one pair through Validator -> SpreadEngine for a
/// single tick. Flows through the pipeline and is discarded after logging.
#[derive(Debug, Clone)]
pub struct PairObservation {
    pub pair_id: PairId,
    /// Wall-clock time of the tick, milliseconds since epoch.
    pub t_wall_ms: i64,
    pub status: ObservationStatus,
    /// `None` whenever `status != Ok`.
    pub cost_total: Option<Cents>,
    pub spread_ab: Option<Cents>,
    pub spread_ba: Option<Cents>,
    pub quote_a: Option<Quote>,
    pub quote_b: Option<Quote>,
    pub crossed_book: bool,
}

/// One opportunity window, open or closed. Owned exclusively by
/// `WindowTracker` while open; frozen and hand off to the Recorder on close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityWindow {
    pub window_id: Uuid,
    pub pair_id: PairId,
    pub direction: Direction,
    /// Monotonic start time, nanoseconds since an arbitrary process-local origin.
    pub start_time_mono_ns: u64,
    pub last_seen_mono_ns: u64,
    pub end_time_mono_ns: Option<u64>,
    /// Wall-clock start time, used only for the log line.
    pub start_time_wall_ms: i64,
    pub end_time_wall_ms: Option<i64>,
    pub peak_spread: Cents,
    pub sum_spread: Cents,
    pub observation_count: u64,
    pub interrupted: bool,
    /// Consecutive ERROR/missing observations seen while open.
    #[serde(default)]
    pub consecutive_errors: u32,
}

impl OpportunityWindow {
    pub fn avg_spread(&self) -> Cents {
        if self.observation_count == 0 {
            Cents::ZERO
        } else {
            Cents(self.sum_spread.0 / self.observation_count as i64)
        }
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.end_time_wall_ms
            .map(|end| (end - self.start_time_wall_ms).max(0) / 1000)
    }
}

/// Rate limiting state owned exclusively by the Scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitState {
    pub base_interval_ms: u64,
    pub current_interval_ms: u64,
    /// Wall-clock ms of the most recent 429, if any has ever occurred.
    pub last_429_time_ms: Option<i64>,
    /// Count of 429s within the trailing 30 minutes.
    pub recent_429_count: u32,
    /// Wall-clock ms marking the start of the current clean (no-429) streak
    /// used to decide when cooldown decay may apply.
    pub cooldown_anchor_ms: i64,
}

impl RateLimitState {
    pub fn new(base_interval_ms: u64, now_wall_ms: i64) -> Self {
        Self {
            base_interval_ms,
            current_interval_ms: base_interval_ms,
            last_429_time_ms: None,
            recent_429_count: 0,
            cooldown_anchor_ms: now_wall_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_cents_rounds_up() {
        assert_eq!(Cents::from_dollars_ceil(0.02), Cents(2));
        assert_eq!(Cents::from_dollars_ceil(0.021), Cents(3));
        assert_eq!(Cents::from_dollars_ceil(0.0), Cents(0));
    }

    #[test]
    fn direction_display_matches_csv_columns() {
        assert_eq!(Direction::AToB.display(), "K\u{2192}P");
        assert_eq!(Direction::BToA.display(), "P\u{2192}K");
    }

    #[test]
    fn avg_spread_divides_integer_cents() {
        let w = OpportunityWindow {
            window_id: Uuid::nil(),
            pair_id: "t1".into(),
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
        assert_eq!(w.avg_spread(), Cents(3));
    }
}
