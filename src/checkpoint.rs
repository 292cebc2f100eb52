//! Crash-consistent periodic checkpointing of in-flight window state. Writes
//! go to a `.tmp` sibling, fsync, then atomic rename — never a partial file
//! visible under the real name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::recorder::{synthesize_interrupted_close, Recorder};
use crate::types::{OpportunityWindow, RateLimitState};
use crate::window::WindowTracker;

/// Restarts within this grace period resume the in-flight windows as-is.
/// Past it, every open window is treated as interrupted by the outage.
const RESTART_GRACE_MS: i64 = 5 * 60_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    last_updated_wall_ms: i64,
    rate_limit: RateLimitState,
    active_windows: Vec<OpportunityWindow>,
}

pub struct Checkpointer {
    path: PathBuf,
}

impl Checkpointer {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join("window_state.json"),
        }
    }

    pub fn save(
        &self,
        now_wall_ms: i64,
        rate_limit: RateLimitState,
        active_windows: Vec<OpportunityWindow>,
    ) -> std::io::Result<()> {
        let payload = CheckpointFile {
            last_updated_wall_ms: now_wall_ms,
            rate_limit,
            active_windows,
        };
        let json = serde_json::to_string_pretty(&payload)
            .unwrap_or_else(|_| "{}".to_string());

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = std::fs::File::create(&tmp_path)?;
            let mut writer = std::io::BufWriter::new(&file);
            use std::io::Write;
            writer.write_all(json.as_bytes())?;
            writer.flush()?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

}

/// Outcome of attempting to load a checkpoint at startup.
pub enum LoadOutcome {
    /// No checkpoint file, or it failed to parse. Start fresh.
    Fresh,
    /// Restart happened within the grace period — windows resume untouched.
    Resumed {
        rate_limit: RateLimitState,
        windows: Vec<OpportunityWindow>,
    },
    /// Restart happened after the grace period. Every previously-open window
    /// is synthesized into an interrupted close and should be appended to
    /// `opportunity_windows.csv` before monitoring resumes.
    Stale {
        rate_limit: RateLimitState,
        interrupted_closes: Vec<OpportunityWindow>,
    },
}

/// Read-path reconciliation only — never reports a write failure. A missing
/// or corrupt checkpoint is silently treated as "no prior state."
pub fn load(path: &Path, now_wall_ms: i64) -> LoadOutcome {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return LoadOutcome::Fresh,
    };
    let parsed: CheckpointFile = match serde_json::from_str(&contents) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("checkpoint at {} failed to parse, starting fresh: {e}", path.display());
            return LoadOutcome::Fresh;
        }
    };

    if now_wall_ms - parsed.last_updated_wall_ms <= RESTART_GRACE_MS {
        LoadOutcome::Resumed {
            rate_limit: parsed.rate_limit,
            windows: parsed.active_windows,
        }
    } else {
        let interrupted_closes = parsed
            .active_windows
            .into_iter()
            .map(|w| synthesize_interrupted_close(w, parsed.last_updated_wall_ms))
            .collect();
        LoadOutcome::Stale {
            rate_limit: parsed.rate_limit,
            interrupted_closes,
        }
    }
}

/// Apply a `LoadOutcome` against a fresh `WindowTracker` and `Recorder`,
/// returning the rate-limit state to seed the scheduler with (if any).
pub async fn reconcile(
    outcome: LoadOutcome,
    tracker: &mut WindowTracker,
    recorder: &Recorder,
) -> Option<RateLimitState> {
    match outcome {
        LoadOutcome::Fresh => None,
        LoadOutcome::Resumed { rate_limit, windows } => {
            tracker.restore(windows);
            Some(rate_limit)
        }
        LoadOutcome::Stale {
            rate_limit,
            interrupted_closes,
        } => {
            for closed in interrupted_closes {
                recorder.record_window_close(closed).await;
            }
            Some(rate_limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cents, Direction};
    use uuid::Uuid;

    fn sample_window(pair_id: &str) -> OpportunityWindow {
        OpportunityWindow {
            window_id: Uuid::new_v4(),
            pair_id: pair_id.to_string(),
            direction: Direction::AToB,
            start_time_mono_ns: 0,
            last_seen_mono_ns: 0,
            end_time_mono_ns: None,
            start_time_wall_ms: 1_000,
            end_time_wall_ms: None,
            peak_spread: Cents(5),
            sum_spread: Cents(9),
            observation_count: 2,
            interrupted: false,
            consecutive_errors: 0,
        }
    }

    #[test]
    fn missing_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = load(&dir.path().join("nope.json"), 0);
        assert!(matches!(outcome, LoadOutcome::Fresh));
    }

    #[test]
    fn corrupt_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window_state.json");
        std::fs::write(&path, b"not json at all").unwrap();
        let outcome = load(&path, 0);
        assert!(matches!(outcome, LoadOutcome::Fresh));
    }

    /// Restart well within the grace period resumes windows untouched.
    #[test]
    fn restart_within_grace_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path());
        let rate_limit = RateLimitState::new(2_000, 0);
        checkpointer
            .save(100_000, rate_limit, vec![sample_window("T1")])
            .unwrap();

        let outcome = load(&checkpointer.path, 100_000 + 60_000); // +1 min
        match outcome {
            LoadOutcome::Resumed { windows, .. } => {
                assert_eq!(windows.len(), 1);
                assert_eq!(windows[0].pair_id, "T1");
            }
            _ => panic!("expected Resumed"),
        }
    }

    /// Restart past the grace period forces each open window interrupted.
    #[test]
    fn restart_past_grace_marks_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path());
        let rate_limit = RateLimitState::new(2_000, 0);
        checkpointer
            .save(100_000, rate_limit, vec![sample_window("T1")])
            .unwrap();

        let outcome = load(&checkpointer.path, 100_000 + 10 * 60_000); // +10 min
        match outcome {
            LoadOutcome::Stale { interrupted_closes, .. } => {
                assert_eq!(interrupted_closes.len(), 1);
                assert!(interrupted_closes[0].interrupted);
                assert_eq!(interrupted_closes[0].end_time_wall_ms, Some(100_000));
            }
            _ => panic!("expected Stale"),
        }
    }

    #[test]
    fn save_then_load_round_trips_rate_limit() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path());
        let mut rate_limit = RateLimitState::new(2_000, 0);
        rate_limit.current_interval_ms = 4_500;
        checkpointer.save(5_000, rate_limit, vec![]).unwrap();

        let outcome = load(&checkpointer.path, 5_000);
        match outcome {
            LoadOutcome::Resumed { rate_limit: rl, windows } => {
                assert_eq!(rl.current_interval_ms, 4_500);
                assert!(windows.is_empty());
            }
            _ => panic!("expected Resumed"),
        }
    }

    #[test]
    fn save_replaces_file_atomically_without_leaving_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path());
        checkpointer
            .save(1, RateLimitState::new(2_000, 0), vec![])
            .unwrap();
        assert!(checkpointer.path.exists());
        assert!(!checkpointer.path.with_extension("json.tmp").exists());
    }
}
