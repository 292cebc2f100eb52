//! Fee-aware cost model. Venue-A is a taker+maker fee schedule
//! (Kalshi-shaped); Venue-B models its current spread as an implicit cost
//! plus a flat per-trade gas fee (Polymarket-shaped).

use crate::types::{Cents, Quote};

const VENUE_A_TAKER_RATE: f64 = 0.07;
const VENUE_A_MAKER_RATE: f64 = 0.0175;

/// `taker_fee(p) = ceil_cents(0.07 * C * p * (1 - p))`
pub fn taker_fee(price: f64, contract_size: f64) -> Cents {
    Cents::from_dollars_ceil(VENUE_A_TAKER_RATE * contract_size * price * (1.0 - price))
}

/// `maker_fee(p) = ceil_cents(0.0175 * C * p * (1 - p))`
pub fn maker_fee(price: f64, contract_size: f64) -> Cents {
    Cents::from_dollars_ceil(VENUE_A_MAKER_RATE * contract_size * price * (1.0 - price))
}

/// A round trip on Venue-A crosses the book once (taker) and rests once (maker).
pub fn venue_a_total(price: f64, contract_size: f64) -> Cents {
    taker_fee(price, contract_size) + maker_fee(price, contract_size)
}

/// `cost_total = venue_a_total + (quote_b.ask - quote_b.bid) + 2 * gas_fee_per_trade_usd`.
///
/// `PairObservation` carries a single `cost_total` shared by both
/// `spread_ab` and `spread_ba` (the data model has one field, not
/// one per direction). The Venue-A fee schedule is symmetric in `p` vs
/// `1-p`, so the Venue-A mid price is used as the representative execution
/// price for both legs rather than picking bid-for-one-direction,
/// ask-for-the-other and producing two diverging totals the data model has
/// no field for.
pub fn cost_total(
    quote_a: &Quote,
    contract_size: f64,
    quote_b: &Quote,
    gas_fee_per_trade_usd: f64,
) -> Cents {
    let venue_a_mid = (quote_a.bid + quote_a.ask) / 2.0;
    let venue_b_friction = Cents::from_dollars_ceil((quote_b.ask - quote_b.bid).max(0.0));
    let gas = Cents::from_dollars_ceil(2.0 * gas_fee_per_trade_usd);
    venue_a_total(venue_a_mid, contract_size) + venue_b_friction + gas
}
