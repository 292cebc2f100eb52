//! Pure data-quality predicates on a `Quote`. A transport error never reaches
//! here — it is classified directly into `PairObservation::status = Error`
//! by the Scheduler.

use crate::types::Quote;

const MAX_CLOCK_SKEW_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    #[error("bid or ask missing (NaN)")]
    MissingPrice,
    #[error("bid/ask out of [0.01, 0.99]")]
    PriceOutOfRange,
    #[error("bid above ask")]
    BidAboveAsk,
    #[error("clock skew {skew_ms}ms exceeds 10s")]
    StaleClock { skew_ms: i64 },
}

pub fn validate(quote: &Quote) -> Result<(), InvalidReason> {
    if quote.bid.is_nan() || quote.ask.is_nan() {
        return Err(InvalidReason::MissingPrice);
    }
    if !(0.01..=0.99).contains(&quote.bid) || !(0.01..=0.99).contains(&quote.ask) {
        return Err(InvalidReason::PriceOutOfRange);
    }
    if quote.bid > quote.ask {
        return Err(InvalidReason::BidAboveAsk);
    }
    let skew_ms = (quote.local_timestamp_ms - quote.remote_timestamp_ms).abs();
    if skew_ms >= MAX_CLOCK_SKEW_MS {
        return Err(InvalidReason::StaleClock { skew_ms });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Venue;

    fn quote(bid: f64, ask: f64, remote_ms: i64, local_ms: i64) -> Quote {
        Quote {
            venue: Venue::A,
            bid,
            ask,
            remote_timestamp_ms: remote_ms,
            local_timestamp_ms: local_ms,
        }
    }

    #[test]
    fn accepts_sane_quote() {
        assert!(validate(&quote(0.45, 0.47, 1_000, 1_500)).is_ok());
    }

    #[test]
    fn rejects_bid_below_floor() {
        assert_eq!(
            validate(&quote(0.0, 0.47, 1_000, 1_000)),
            Err(InvalidReason::PriceOutOfRange)
        );
    }

    #[test]
    fn rejects_ask_above_ceiling() {
        assert_eq!(
            validate(&quote(0.5, 1.0, 1_000, 1_000)),
            Err(InvalidReason::PriceOutOfRange)
        );
    }

    #[test]
    fn rejects_crossed_bid_ask() {
        assert_eq!(
            validate(&quote(0.6, 0.4, 1_000, 1_000)),
            Err(InvalidReason::BidAboveAsk)
        );
    }

    #[test]
    fn rejects_stale_clock_s6() {
        // |local - remote| = 12s, past the allowed skew.
        let err = validate(&quote(0.5, 0.6, 0, 12_000)).unwrap_err();
        assert_eq!(err, InvalidReason::StaleClock { skew_ms: 12_000 });
    }

    #[test]
    fn accepts_boundary_prices() {
        assert!(validate(&quote(0.01, 0.99, 0, 0)).is_ok());
    }

    #[test]
    fn accepts_skew_just_under_threshold() {
        assert!(validate(&quote(0.5, 0.6, 0, 9_999)).is_ok());
    }
}
