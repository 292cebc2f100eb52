//! The `MarketFetcher` capability and its two concrete
//! implementations. Fetches for distinct `(venue, instrument)` pairs are
//! independent and may run concurrently.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{Quote, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportErrorKind {
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("network error")]
    Network,
    #[error("HTTP error")]
    Http,
    #[error("response decode error")]
    Decode,
    #[error("authentication error")]
    AuthN,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait MarketFetcher: Send + Sync {
    async fn fetch(
        &self,
        venue: Venue,
        instrument: &str,
        deadline: Duration,
    ) -> Result<Quote, TransportError>;
}

fn classify_status(status: reqwest::StatusCode) -> TransportErrorKind {
    if status.as_u16() == 429 {
        TransportErrorKind::RateLimited
    } else if status.as_u16() == 401 || status.as_u16() == 403 {
        TransportErrorKind::AuthN
    } else {
        TransportErrorKind::Http
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn run_with_deadline<F, T>(fut: F, deadline: Duration) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::new(TransportErrorKind::Timeout, "deadline exceeded")),
    }
}

// --- Venue-A: Kalshi-shaped taker/maker fee venue ---

pub struct KalshiFetcher {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct KalshiTickerResponse {
    yes_bid: f64,
    yes_ask: f64,
    #[serde(default = "now_ms")]
    ts: i64,
}

impl KalshiFetcher {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn fetch_inner(&self, ticker: &str) -> Result<Quote, TransportError> {
        let url = format!("{}/markets/{ticker}/ticker", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !resp.status().is_success() {
            let kind = classify_status(resp.status());
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::new(kind, body));
        }

        let local_timestamp_ms = now_ms();
        let data: KalshiTickerResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::new(TransportErrorKind::Decode, e.to_string()))?;

        Ok(Quote {
            venue: Venue::A,
            bid: data.yes_bid,
            ask: data.yes_ask,
            remote_timestamp_ms: data.ts,
            local_timestamp_ms,
        })
    }
}

#[async_trait]
impl MarketFetcher for KalshiFetcher {
    async fn fetch(
        &self,
        _venue: Venue,
        instrument: &str,
        deadline: Duration,
    ) -> Result<Quote, TransportError> {
        run_with_deadline(self.fetch_inner(instrument), deadline).await
    }
}

// --- Venue-B: Polymarket-shaped CLOB venue ---

pub struct PolymarketFetcher {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct BookLevel {
    price: String,
    #[allow(dead_code)]
    size: String,
}

#[derive(Deserialize)]
struct BookResponse {
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
}

impl PolymarketFetcher {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn fetch_inner(&self, token_id: &str) -> Result<Quote, TransportError> {
        let url = format!("{}/book", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !resp.status().is_success() {
            let kind = classify_status(resp.status());
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::new(kind, body));
        }

        let local_timestamp_ms = now_ms();
        let book: BookResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::new(TransportErrorKind::Decode, e.to_string()))?;

        let best_bid = book
            .bids
            .first()
            .and_then(|l| l.price.parse::<f64>().ok())
            .ok_or_else(|| TransportError::new(TransportErrorKind::Decode, "empty bid side"))?;
        let best_ask = book
            .asks
            .first()
            .and_then(|l| l.price.parse::<f64>().ok())
            .ok_or_else(|| TransportError::new(TransportErrorKind::Decode, "empty ask side"))?;

        Ok(Quote {
            venue: Venue::B,
            bid: best_bid,
            ask: best_ask,
            remote_timestamp_ms: local_timestamp_ms,
            local_timestamp_ms,
        })
    }
}

#[async_trait]
impl MarketFetcher for PolymarketFetcher {
    async fn fetch(
        &self,
        _venue: Venue,
        instrument: &str,
        deadline: Duration,
    ) -> Result<Quote, TransportError> {
        run_with_deadline(self.fetch_inner(instrument), deadline).await
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::new(TransportErrorKind::Timeout, e.to_string())
    } else if e.is_connect() {
        TransportError::new(TransportErrorKind::Network, e.to_string())
    } else if e.is_decode() {
        TransportError::new(TransportErrorKind::Decode, e.to_string())
    } else {
        TransportError::new(TransportErrorKind::Network, e.to_string())
    }
}
