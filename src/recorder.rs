//! Three append-only sinks behind a single-writer discipline.
//! A bounded channel feeds one owning task so that "no two appenders write
//! to the same file simultaneously" is structural rather than a lock.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::types::{Cents, Direction, ObservationStatus, OpportunityWindow, PairId};

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub timestamp_ms: i64,
    pub pair_id: PairId,
    pub status: ObservationStatus,
    pub kalshi_bid: Option<f64>,
    pub kalshi_ask: Option<f64>,
    pub poly_bid: Option<f64>,
    pub poly_ask: Option<f64>,
    pub total_cost: Option<Cents>,
    pub net_spread_buy_k_sell_p: Option<Cents>,
    pub net_spread_buy_p_sell_k: Option<Cents>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorLine {
    ts: i64,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pair_id: Option<PairId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backoff_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_interval: Option<u64>,
    detail: String,
}

/// Builder for an `errors.log` line. Every caught error produces exactly one.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub kind: &'static str,
    pub pair_id: Option<PairId>,
    pub http_status: Option<u16>,
    pub backoff_seconds: Option<u64>,
    pub new_interval: Option<u64>,
    pub detail: String,
}

enum RecorderMsg {
    Snapshot(SnapshotRow),
    WindowClose(OpportunityWindow),
    Error(ErrorEvent),
}

fn iso_millis(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

fn fmt_opt_f64(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_default()
}

fn fmt_opt_cents(v: Option<Cents>) -> String {
    v.map(|c| format!("{:.2}", c.as_dollars())).unwrap_or_default()
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

struct CsvSink {
    file: std::fs::File,
}

impl CsvSink {
    fn open(path: &Path, header: &str) -> anyhow::Result<Self> {
        let existed = path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        if !existed {
            writeln!(file, "{header}")?;
            file.flush()?;
        }
        Ok(Self { file })
    }

    fn write_row(&mut self, row: &str) -> std::io::Result<()> {
        writeln!(self.file, "{row}")?;
        self.file.flush()
    }
}

/// Handle used by the rest of the pipeline to push rows into the recorder
/// task. Cheap to clone — backed by an `mpsc::Sender`.
#[derive(Clone)]
pub struct Recorder {
    tx: mpsc::Sender<RecorderMsg>,
    fatal_rx: watch::Receiver<Option<String>>,
}

impl Recorder {
    pub fn spawn(log_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_dir)?;

        let mut snapshots = CsvSink::open(
            &log_dir.join("price_snapshots.csv"),
            "timestamp,market_pair,kalshi_bid,kalshi_ask,poly_bid,poly_ask,total_cost,net_spread_buy_K_sell_P,net_spread_buy_P_sell_K",
        )?;
        let mut windows = CsvSink::open(
            &log_dir.join("opportunity_windows.csv"),
            "window_id,market_pair,start_time,end_time,duration_seconds,peak_spread,avg_spread,direction,observation_count,interrupted",
        )?;
        let mut errors = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("errors.log"))?;

        let (tx, mut rx) = mpsc::channel::<RecorderMsg>(1024);
        let (fatal_tx, fatal_rx) = watch::channel(None);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let result = match &msg {
                    RecorderMsg::Snapshot(row) => {
                        let line = snapshot_line(row);
                        write_with_retry(&mut snapshots, &line)
                    }
                    RecorderMsg::WindowClose(window) => {
                        let line = window_line(window);
                        write_with_retry(&mut windows, &line)
                    }
                    RecorderMsg::Error(ev) => {
                        let line = error_line(ev);
                        write_with_retry_raw(&mut errors, &line)
                    }
                };
                if let Err(e) = result {
                    tracing::error!("Recorder: persistent write failure: {e}");
                    let _ = fatal_tx.send(Some(format!("log write error: {e}")));
                }
            }
        });

        Ok(Self { tx, fatal_rx })
    }

    pub async fn record_snapshot(&self, row: SnapshotRow) {
        let _ = self.tx.send(RecorderMsg::Snapshot(row)).await;
    }

    pub async fn record_window_close(&self, window: OpportunityWindow) {
        let _ = self.tx.send(RecorderMsg::WindowClose(window)).await;
    }

    pub async fn record_error(&self, event: ErrorEvent) {
        let _ = self.tx.send(RecorderMsg::Error(event)).await;
    }

    /// Resolves once the recorder task has hit an unrecoverable write error
    /// Retries once, then escalates to fatal over the watch channel.
    pub async fn wait_for_fatal(&mut self) -> String {
        loop {
            if let Some(msg) = self.fatal_rx.borrow().clone() {
                return msg;
            }
            if self.fatal_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

fn write_with_retry(sink: &mut CsvSink, line: &str) -> std::io::Result<()> {
    match sink.write_row(line) {
        Ok(()) => Ok(()),
        Err(_) => sink.write_row(line),
    }
}

fn write_with_retry_raw(file: &mut std::fs::File, line: &str) -> std::io::Result<()> {
    let attempt = |f: &mut std::fs::File| -> std::io::Result<()> {
        writeln!(f, "{line}")?;
        f.flush()
    };
    match attempt(file) {
        Ok(()) => Ok(()),
        Err(_) => attempt(file),
    }
}

fn snapshot_line(row: &SnapshotRow) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{}",
        iso_millis(row.timestamp_ms),
        csv_escape(&row.pair_id),
        fmt_opt_f64(row.kalshi_bid),
        fmt_opt_f64(row.kalshi_ask),
        fmt_opt_f64(row.poly_bid),
        fmt_opt_f64(row.poly_ask),
        fmt_opt_cents(row.total_cost),
        fmt_opt_cents(row.net_spread_buy_k_sell_p),
        fmt_opt_cents(row.net_spread_buy_p_sell_k),
    )
}

fn window_line(w: &OpportunityWindow) -> String {
    let start = iso_millis(w.start_time_wall_ms);
    let end = w
        .end_time_wall_ms
        .map(iso_millis)
        .unwrap_or_default();
    let duration = w
        .duration_seconds()
        .map(|d| d.to_string())
        .unwrap_or_default();
    format!(
        "{},{},{},{},{},{:.2},{:.2},{},{},{}",
        w.window_id,
        csv_escape(&w.pair_id),
        start,
        end,
        duration,
        w.peak_spread.as_dollars(),
        w.avg_spread().as_dollars(),
        w.direction.display(),
        w.observation_count,
        w.interrupted,
    )
}

fn error_line(ev: &ErrorEvent) -> String {
    let line = ErrorLine {
        ts: chrono::Utc::now().timestamp_millis(),
        kind: ev.kind,
        pair_id: ev.pair_id.clone(),
        http_status: ev.http_status,
        backoff_seconds: ev.backoff_seconds,
        new_interval: ev.new_interval,
        detail: ev.detail.clone(),
    };
    serde_json::to_string(&line).unwrap_or_else(|_| "{\"kind\":\"serialize_error\"}".to_string())
}

/// Synthesize a forced window-close row for a stale checkpoint.
pub fn synthesize_interrupted_close(mut window: OpportunityWindow, last_updated_wall_ms: i64) -> OpportunityWindow {
    window.end_time_wall_ms = Some(last_updated_wall_ms);
    window.interrupted = true;
    window
}

pub fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}
