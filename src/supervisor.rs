//! Wires config, checkpoint restore, the fetch/recorder pipeline, the
//! periodic checkpointer, and graceful shutdown together. Exit codes:
//! 0 clean shutdown, 1 config/startup failure, 2 fatal log-write failure,
//! 130 interrupted by signal (standard `128 + SIGINT`).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{self, Checkpointer};
use crate::cli::Cli;
use crate::config::Config;
use crate::fetcher::{KalshiFetcher, MarketFetcher, PolymarketFetcher};
use crate::recorder::{ErrorEvent, Recorder};
use crate::scheduler::{Scheduler, SchedulerConfig};

pub enum ExitCode {
    Clean = 0,
    StartupFailure = 1,
    FatalLogWrite = 2,
    Interrupted = 130,
}

pub async fn run(cli: Cli) -> ExitCode {
    let config = match Config::load(&cli.config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("startup failed: {e}");
            return ExitCode::StartupFailure;
        }
    };

    let recorder = match Recorder::spawn(&cli.log_dir) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("failed to open log sinks in {}: {e}", cli.log_dir.display());
            return ExitCode::StartupFailure;
        }
    };

    let fetcher_a: Arc<dyn MarketFetcher> = match KalshiFetcher::new(&config.venues.venue_a_base_url) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            tracing::error!("failed to build venue-A client: {e}");
            return ExitCode::StartupFailure;
        }
    };
    let fetcher_b: Arc<dyn MarketFetcher> = match PolymarketFetcher::new(&config.venues.venue_b_base_url) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            tracing::error!("failed to build venue-B client: {e}");
            return ExitCode::StartupFailure;
        }
    };

    let now_wall_ms = now_ms();
    let base_interval_ms = config.monitoring.polling_interval_seconds * 1_000;

    let mut scheduler = Scheduler::new(
        fetcher_a,
        fetcher_b,
        recorder.clone(),
        SchedulerConfig {
            pairs: config.market_pairs.clone(),
            base_interval_ms,
            gas_fee_per_trade_usd: config.cost_assumptions.gas_fee_per_trade_usd,
        },
        now_wall_ms,
    );

    let checkpointer = Arc::new(Checkpointer::new(&cli.log_dir));
    let checkpoint_path = cli.log_dir.join("window_state.json");
    reconcile_checkpoint(&checkpoint_path, &mut scheduler, &recorder, now_wall_ms).await;

    if cli.once {
        let now_mono_ns = 0;
        scheduler.tick(now_mono_ns, now_wall_ms).await;
        save_checkpoint(&checkpointer, &scheduler, now_ms());
        return ExitCode::Clean;
    }

    let checkpoint_period = Duration::from_secs(config.monitoring.checkpoint_interval_seconds);
    let config_duration_hours = config.monitoring.monitoring_duration_hours;
    run_loop(cli, scheduler, checkpointer, recorder, checkpoint_period, config_duration_hours).await
}

async fn reconcile_checkpoint(
    path: &Path,
    scheduler: &mut Scheduler,
    recorder: &Recorder,
    now_wall_ms: i64,
) {
    let outcome = checkpoint::load(path, now_wall_ms);
    if let Some(rate_limit) =
        checkpoint::reconcile(outcome, &mut scheduler.window_tracker, recorder).await
    {
        scheduler.rate_limit = rate_limit;
    }
}

fn save_checkpoint(checkpointer: &Checkpointer, scheduler: &Scheduler, now_wall_ms: i64) {
    let windows = scheduler.window_tracker.snapshot();
    if let Err(e) = checkpointer.save(now_wall_ms, scheduler.rate_limit, windows) {
        tracing::warn!("checkpoint write failed: {e}");
    }
}

async fn run_loop(
    cli: Cli,
    mut scheduler: Scheduler,
    checkpointer: Arc<Checkpointer>,
    mut recorder: Recorder,
    checkpoint_period: Duration,
    config_duration_hours: Option<f64>,
) -> ExitCode {
    // CLI flag wins when present; otherwise fall back to the config file's
    // `monitoring.monitoring_duration_hours` (spec.md §6: "default infinity").
    let duration_hours = cli.duration_hours.or(config_duration_hours);
    let deadline =
        duration_hours.map(|h| tokio::time::Instant::now() + Duration::from_secs_f64(h * 3_600.0));

    let mut tick_interval = tokio::time::interval(Duration::from_millis(scheduler.rate_limit.current_interval_ms));
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut checkpoint_interval = tokio::time::interval(checkpoint_period);
    checkpoint_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let exit_code;
    let mut mono_clock = 0u64;

    loop {
        let sleep_until_deadline = async {
            if let Some(d) = deadline {
                tokio::time::sleep_until(d).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tick_interval.tick() => {
                mono_clock += scheduler.rate_limit.current_interval_ms as u64 * 1_000_000;
                let report = scheduler.tick(mono_clock, now_ms()).await;

                let want = Duration::from_millis(scheduler.rate_limit.current_interval_ms);
                if let Some(delay) = next_tick_delay(tick_interval.period(), want, report.backoff_sleep) {
                    if report.backoff_sleep.is_some() {
                        tracing::warn!("rate limited, backing off for {:?}", delay);
                    }
                    tick_interval = tokio::time::interval_at(tokio::time::Instant::now() + delay, want);
                    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                }
            }
            _ = checkpoint_interval.tick() => {
                save_checkpoint(&checkpointer, &scheduler, now_ms());
            }
            fatal = recorder.wait_for_fatal() => {
                tracing::error!("fatal: {fatal}");
                exit_code = ExitCode::FatalLogWrite;
                break;
            }
            _ = sleep_until_deadline => {
                tracing::info!("monitoring duration elapsed, shutting down");
                exit_code = ExitCode::Clean;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received interrupt, shutting down");
                exit_code = ExitCode::Interrupted;
                break;
            }
        }
    }

    let closed = scheduler.window_tracker.force_close_all(mono_clock, now_ms());
    for window in closed {
        recorder
            .record_error(ErrorEvent {
                kind: "window_forced_close",
                pair_id: Some(window.pair_id.clone()),
                http_status: None,
                backoff_seconds: None,
                new_interval: None,
                detail: format!("direction {} closed on shutdown", window.direction.display()),
            })
            .await;
        recorder.record_window_close(window).await;
    }
    save_checkpoint(&checkpointer, &scheduler, now_ms());

    exit_code
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decide how far out the driving loop's next tick deadline must be pushed,
/// given this tick's outcome. `current_period` is the installed
/// `tick_interval`'s period, `want` is `RateLimitState::current_interval_ms`
/// as of just now, and `backoff_sleep` is set when a 429 occurred this tick
/// (spec.md §4.6's "Immediate sleep" column).
///
/// Returns `None` when the installed interval already matches `want` and no
/// backoff applies — nothing needs to change. Otherwise returns the delay
/// before the next tick should fire: the backoff sleep when one applies
/// (this always wins over just adopting `want`, since 30/60/120s always
/// exceeds the handful-of-seconds polling interval), or `want` itself when
/// only the interval changed (cooldown decay) — never `Duration::ZERO`,
/// which is what a bare `tokio::time::interval(want)` replacement would fire
/// at immediately.
fn next_tick_delay(current_period: Duration, want: Duration, backoff_sleep: Option<Duration>) -> Option<Duration> {
    match backoff_sleep {
        Some(sleep) => Some(sleep),
        None if current_period != want => Some(want),
        None => None,
    }
}
