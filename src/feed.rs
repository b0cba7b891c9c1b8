//! Upstream producers feeding the hub.
//!
//! Synthetic stand-ins for the market data and model pipelines: a random-walk
//! price ticker, a periodic model signal, and per-subscriber portfolio
//! valuations. Payload field names and cadences follow the platform's feed
//! contract; the hub only sees the push API.

use crate::hub::Hub;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Default instrument universe with base prices for the random walk
const SYMBOLS: &[(&str, f64)] = &[
    ("BTC", 35_000.0),
    ("ETH", 1_650.0),
    ("SOL", 105.0),
    ("ADA", 0.45),
    ("DOT", 6.20),
];

const PRICE_INTERVAL: Duration = Duration::from_secs(2);
const SIGNAL_INTERVAL: Duration = Duration::from_secs(60);
const PORTFOLIO_INTERVAL: Duration = Duration::from_secs(10);

/// Spawn a background task that pushes a fresh quote for every watched
/// symbol every two seconds.
pub fn spawn_price_feed(hub: Arc<Hub>) {
    tokio::spawn(async move {
        let mut prices: Vec<(&str, f64)> = SYMBOLS.to_vec();

        loop {
            tokio::time::sleep(PRICE_INTERVAL).await;

            for (symbol, price) in prices.iter_mut() {
                // quiet symbols don't advance, matching the subscriber-gated poll
                if !hub.has_subscribers(symbol).await {
                    continue;
                }
                let quote = next_quote(price);
                hub.push_to_topic(symbol, quote).await;
            }
        }
    });
}

/// Nudge the price by up to ±1% and build the quote payload
fn next_quote(price: &mut f64) -> Value {
    let mut rng = rand::rng();
    *price *= 1.0 + rng.random_range(-0.01..=0.01);
    let decimals = if *price < 1.0 { 4 } else { 2 };

    json!({
        "price": round_to(*price, decimals),
        "change24h": round_to(rng.random_range(-5.0..=5.0), 2),
        "volume": rng.random_range(0..1_000_000_000u64),
        "timestamp": Utc::now().timestamp_millis(),
    })
}

/// Spawn a background task that broadcasts a model signal for the majors to
/// every connected client once a minute.
pub fn spawn_signal_feed(hub: Arc<Hub>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SIGNAL_INTERVAL).await;

            for symbol in ["BTC", "ETH"] {
                let signal = next_signal(symbol);
                hub.push_global(signal).await;
            }
        }
    });
}

fn next_signal(symbol: &str) -> Value {
    let mut rng = rand::rng();
    let action = ["buy", "sell", "hold"][rng.random_range(0..3)];

    json!({
        "symbol": symbol,
        "action": action,
        "confidence": round_to(rng.random_range(0.5..=0.95), 2),
        "model": "lstm",
        "timeframe": "4h",
    })
}

/// Spawn a background task that pushes a valuation snapshot to each
/// portfolio subscriber every ten seconds.
pub fn spawn_portfolio_feed(hub: Arc<Hub>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PORTFOLIO_INTERVAL).await;

            for identity in hub.portfolio_subscribers().await {
                let snapshot = portfolio_snapshot();
                hub.push_to_identity(&identity, snapshot).await;
            }
        }
    });
}

fn portfolio_snapshot() -> Value {
    let mut rng = rand::rng();

    json!({
        "total_value": round_to(125_000.0 + rng.random_range(-2_500.0..=2_500.0), 2),
        "daily_change": round_to(rng.random_range(-500.0..=500.0), 2),
        "daily_change_percent": round_to(rng.random_range(-2.5..=2.5), 2),
        "last_updated": Utc::now().timestamp_millis(),
    })
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
