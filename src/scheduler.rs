//! Adaptive polling scheduler. Drives ticks on an absolute
//! schedule — drift is absorbed by skipping via `MissedTickBehavior::Skip`,
//! mirroring the teacher's own `interval.tick()` loop — and owns
//! `RateLimitState` exclusively.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cost;
use crate::fetcher::{MarketFetcher, TransportErrorKind};
use crate::recorder::{ErrorEvent, Recorder, SnapshotRow};
use crate::spread;
use crate::types::{
    Direction, MarketPair, ObservationStatus, PairId, Quote, RateLimitState, Venue,
};
use crate::validator;
use crate::window::WindowTracker;

const THIRTY_MIN_MS: i64 = 30 * 60_000;
const TEN_MIN_MS: i64 = 10 * 60_000;

/// Consecutive non-429 transport failures before a pair is flagged ERROR for
/// operator visibility. Every individual fetch failure already
/// produces an ERROR observation for that tick — this counter gates the
/// escalated "pair is persistently broken" log line, not per-tick status.
const PAIR_ERROR_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate429Rank {
    First,
    Second,
    ThirdPlus,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffOutcome {
    pub sleep: Duration,
    pub new_interval_ms: u64,
    pub rank: Rate429Rank,
    pub should_alert: bool,
}

/// Drive the backoff state machine for one observed 429.
pub fn apply_429(state: &mut RateLimitState, now_wall_ms: i64) -> BackoffOutcome {
    let clean_streak = state
        .last_429_time_ms
        .map_or(true, |t| now_wall_ms - t > THIRTY_MIN_MS);
    if clean_streak {
        state.recent_429_count = 0;
    }
    state.recent_429_count += 1;
    state.last_429_time_ms = Some(now_wall_ms);
    state.cooldown_anchor_ms = now_wall_ms;

    let (sleep_secs, multiplier, rank, should_alert) = match state.recent_429_count {
        1 => (30u64, 1.5f64, Rate429Rank::First, false),
        2 => (60u64, 2.0f64, Rate429Rank::Second, false),
        _ => (120u64, 2.0f64, Rate429Rank::ThirdPlus, true),
    };

    state.current_interval_ms = ((state.current_interval_ms as f64) * multiplier).round() as u64;

    BackoffOutcome {
        sleep: Duration::from_secs(sleep_secs),
        new_interval_ms: state.current_interval_ms,
        rank,
        should_alert,
    }
}

/// Apply cooldown decay if due: after a 30-minute clean streak,
/// decay 10% every 10 minutes until back at `base_interval_ms`. Returns the
/// new interval when a decay step was applied.
pub fn apply_cooldown(state: &mut RateLimitState, now_wall_ms: i64) -> Option<u64> {
    if state.current_interval_ms <= state.base_interval_ms {
        return None;
    }
    let last_429 = state.last_429_time_ms?;
    if now_wall_ms - last_429 < THIRTY_MIN_MS {
        return None;
    }
    if now_wall_ms - state.cooldown_anchor_ms < TEN_MIN_MS {
        return None;
    }
    let decayed = ((state.current_interval_ms as f64) * 0.9).round() as u64;
    state.current_interval_ms = decayed.max(state.base_interval_ms);
    state.cooldown_anchor_ms = now_wall_ms;
    Some(state.current_interval_ms)
}

pub struct SchedulerConfig {
    pub pairs: Vec<MarketPair>,
    pub base_interval_ms: u64,
    pub gas_fee_per_trade_usd: f64,
}

pub struct Scheduler {
    fetcher_a: Arc<dyn MarketFetcher>,
    fetcher_b: Arc<dyn MarketFetcher>,
    recorder: Recorder,
    pub rate_limit: RateLimitState,
    pub window_tracker: WindowTracker,
    config: SchedulerConfig,
    consecutive_failures: HashMap<PairId, u32>,
}

/// Everything a single tick needs to report back to the driving loop.
#[derive(Debug, Default)]
pub struct TickReport {
    pub closed_window_count: usize,
    /// Immediate sleep the driving loop must wait out before its next tick,
    /// set to the most severe backoff outcome observed this tick (spec.md
    /// §4.6's "Immediate sleep" column). `None` when no 429 occurred.
    pub backoff_sleep: Option<Duration>,
}

impl Scheduler {
    pub fn new(
        fetcher_a: Arc<dyn MarketFetcher>,
        fetcher_b: Arc<dyn MarketFetcher>,
        recorder: Recorder,
        config: SchedulerConfig,
        now_wall_ms: i64,
    ) -> Self {
        let rate_limit = RateLimitState::new(config.base_interval_ms, now_wall_ms);
        Self {
            fetcher_a,
            fetcher_b,
            recorder,
            rate_limit,
            window_tracker: WindowTracker::new(),
            config,
            consecutive_failures: HashMap::new(),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.rate_limit.current_interval_ms.min(10_000))
    }

    /// Run one scheduling tick: fetch both venues for every pair
    /// concurrently, then process each pair's result serially.
    pub async fn tick(&mut self, now_mono_ns: u64, now_wall_ms: i64) -> TickReport {
        let deadline = self.deadline();

        let fetches = self.config.pairs.iter().map(|pair| {
            let fetcher_a = Arc::clone(&self.fetcher_a);
            let fetcher_b = Arc::clone(&self.fetcher_b);
            let instrument_a = pair.venue_a_instrument.clone();
            let instrument_b = pair.venue_b_instrument.clone();
            async move {
                let (a, b) = tokio::join!(
                    fetcher_a.fetch(Venue::A, &instrument_a, deadline),
                    fetcher_b.fetch(Venue::B, &instrument_b, deadline),
                );
                (a, b)
            }
        });
        let results = futures::future::join_all(fetches).await;

        let mut report = TickReport::default();
        let pairs = self.config.pairs.clone();

        for (pair, (quote_a_res, quote_b_res)) in pairs.iter().zip(results.into_iter()) {
            let had_429 = matches!(&quote_a_res, Err(e) if e.kind == TransportErrorKind::RateLimited)
                || matches!(&quote_b_res, Err(e) if e.kind == TransportErrorKind::RateLimited);
            if had_429 {
                let outcome = apply_429(&mut self.rate_limit, now_wall_ms);
                // Rank only escalates within a tick, so the last outcome seen
                // is always the most severe one the driving loop must honor.
                report.backoff_sleep = Some(outcome.sleep);
                self.recorder
                    .record_error(ErrorEvent {
                        kind: "rate_limited",
                        pair_id: Some(pair.pair_id.clone()),
                        http_status: Some(429),
                        backoff_seconds: Some(outcome.sleep.as_secs()),
                        new_interval: Some(outcome.new_interval_ms),
                        detail: format!("{:?}", outcome.rank),
                    })
                    .await;
                if outcome.should_alert {
                    self.recorder
                        .record_error(ErrorEvent {
                            kind: "backoff_applied",
                            pair_id: Some(pair.pair_id.clone()),
                            http_status: None,
                            backoff_seconds: Some(outcome.sleep.as_secs()),
                            new_interval: Some(outcome.new_interval_ms),
                            detail: "third or later 429 within trailing 30 minutes".into(),
                        })
                        .await;
                }
            }

            self.process_pair(pair, quote_a_res, quote_b_res, had_429, now_mono_ns, now_wall_ms, &mut report)
                .await;
        }

        if let Some(new_interval) = apply_cooldown(&mut self.rate_limit, now_wall_ms) {
            self.recorder
                .record_error(ErrorEvent {
                    kind: "cooldown_relaxed",
                    pair_id: None,
                    http_status: None,
                    backoff_seconds: None,
                    new_interval: Some(new_interval),
                    detail: "30 minute clean streak, decaying toward base interval".into(),
                })
                .await;
        }

        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_pair(
        &mut self,
        pair: &MarketPair,
        quote_a_res: Result<Quote, crate::fetcher::TransportError>,
        quote_b_res: Result<Quote, crate::fetcher::TransportError>,
        had_429: bool,
        now_mono_ns: u64,
        now_wall_ms: i64,
        report: &mut TickReport,
    ) {
        let mut status = ObservationStatus::Ok;

        for (label, res) in [("venue_a", &quote_a_res), ("venue_b", &quote_b_res)] {
            if let Err(e) = res {
                status = ObservationStatus::Error;
                if e.kind != TransportErrorKind::RateLimited {
                    self.recorder
                        .record_error(ErrorEvent {
                            kind: "transport_error",
                            pair_id: Some(pair.pair_id.clone()),
                            http_status: None,
                            backoff_seconds: None,
                            new_interval: None,
                            detail: format!("{label}: {e}"),
                        })
                        .await;
                }
            }
        }

        // Pair-level consecutive-failure counter. 429s never count toward it
        // — rate limiting is backpressure, not data failure.
        if status == ObservationStatus::Error && !had_429 {
            let counter = self.consecutive_failures.entry(pair.pair_id.clone()).or_insert(0);
            *counter += 1;
            if *counter == PAIR_ERROR_AFTER_FAILURES {
                self.recorder
                    .record_error(ErrorEvent {
                        kind: "transport_error",
                        pair_id: Some(pair.pair_id.clone()),
                        http_status: None,
                        backoff_seconds: None,
                        new_interval: None,
                        detail: format!(
                            "{PAIR_ERROR_AFTER_FAILURES} consecutive transport failures, pair marked ERROR"
                        ),
                    })
                    .await;
            }
        } else if status == ObservationStatus::Ok {
            self.consecutive_failures.remove(&pair.pair_id);
        }

        let (quote_a, quote_b) = match (quote_a_res, quote_b_res) {
            (Ok(a), Ok(b)) => (a, b),
            _ => {
                self.emit_error_snapshot(pair, now_wall_ms).await;
                self.advance_windows_on_error(pair, now_mono_ns, now_wall_ms, report).await;
                return;
            }
        };

        if let Err(invalid) = validator::validate(&quote_a).and(validator::validate(&quote_b)) {
            status = ObservationStatus::Error;
            self.recorder
                .record_error(ErrorEvent {
                    kind: "validation_failed",
                    pair_id: Some(pair.pair_id.clone()),
                    http_status: None,
                    backoff_seconds: None,
                    new_interval: None,
                    detail: format!("{invalid}"),
                })
                .await;
            self.emit_error_snapshot(pair, now_wall_ms).await;
            self.advance_windows_on_error(pair, now_mono_ns, now_wall_ms, report).await;
            return;
        }

        let total_cost = cost::cost_total(&quote_a, pair.contract_size, &quote_b, self.config.gas_fee_per_trade_usd);
        let net = spread::compute(&quote_a, &quote_b, total_cost);

        if net.crossed_book {
            self.recorder
                .record_error(ErrorEvent {
                    kind: "crossed_book",
                    pair_id: Some(pair.pair_id.clone()),
                    http_status: None,
                    backoff_seconds: None,
                    new_interval: None,
                    detail: "both directions positive simultaneously".into(),
                })
                .await;
        }

        self.recorder
            .record_snapshot(SnapshotRow {
                timestamp_ms: now_wall_ms,
                pair_id: pair.pair_id.clone(),
                status,
                kalshi_bid: Some(quote_a.bid),
                kalshi_ask: Some(quote_a.ask),
                poly_bid: Some(quote_b.bid),
                poly_ask: Some(quote_b.ask),
                total_cost: Some(total_cost),
                net_spread_buy_k_sell_p: Some(net.spread_ab),
                net_spread_buy_p_sell_k: Some(net.spread_ba),
            })
            .await;

        for (direction, spread) in [
            (Direction::AToB, net.spread_ab),
            (Direction::BToA, net.spread_ba),
        ] {
            if let Some(closed) = self.window_tracker.on_observation(
                &pair.pair_id,
                direction,
                Some(spread),
                now_mono_ns,
                now_wall_ms,
            ) {
                report.closed_window_count += 1;
                self.close_window(closed).await;
            }
        }
    }

    async fn close_window(&self, window: crate::types::OpportunityWindow) {
        if window.interrupted {
            self.recorder
                .record_error(ErrorEvent {
                    kind: "window_forced_close",
                    pair_id: Some(window.pair_id.clone()),
                    http_status: None,
                    backoff_seconds: None,
                    new_interval: None,
                    detail: format!("direction {}", window.direction.display()),
                })
                .await;
        }
        self.recorder.record_window_close(window).await;
    }

    async fn emit_error_snapshot(&self, pair: &MarketPair, now_wall_ms: i64) {
        self.recorder
            .record_snapshot(SnapshotRow {
                timestamp_ms: now_wall_ms,
                pair_id: pair.pair_id.clone(),
                status: ObservationStatus::Error,
                kalshi_bid: None,
                kalshi_ask: None,
                poly_bid: None,
                poly_ask: None,
                total_cost: None,
                net_spread_buy_k_sell_p: None,
                net_spread_buy_p_sell_k: None,
            })
            .await;
    }

    async fn advance_windows_on_error(
        &mut self,
        pair: &MarketPair,
        now_mono_ns: u64,
        now_wall_ms: i64,
        report: &mut TickReport,
    ) {
        for direction in Direction::ALL {
            if let Some(closed) =
                self.window_tracker
                    .on_observation(&pair.pair_id, direction, None, now_mono_ns, now_wall_ms)
            {
                report.closed_window_count += 1;
                self.close_window(closed).await;
            }
        }
    }

    pub fn pairs(&self) -> &[MarketPair] {
        &self.config.pairs
    }
}
