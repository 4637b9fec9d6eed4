//! MEXC spot book ticker feed, `spot@public.bookTicker.v3.api@<SYMBOL>`
//! channel. Publishes best bid/ask only; every frame replaces the book,
//! so the feed behaves as a rolling one-level snapshot.

use serde_json::Value;

use super::{parse_number, BookUpdate, Parsed};
use crate::error::EngineError;

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let method = if subscribe { "SUBSCRIPTION" } else { "UNSUBSCRIPTION" };
    serde_json::json!({
        "method": method,
        "params": [format!("spot@public.bookTicker.v3.api@{formatted_symbol}")],
    })
    .to_string()
}

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    // Pongs and subscription acks echo a "method"-shaped message.
    if let Some(method) = data.get("msg").and_then(Value::as_str) {
        if method == "PONG" {
            return Ok(Parsed::Ignore);
        }
    }
    if let Some(method) = data.get("method").and_then(Value::as_str) {
        if method == "PONG" {
            return Ok(Parsed::Ignore);
        }
        if method == "SUBSCRIPTION" || method == "UNSUBSCRIPTION" {
            tracing::debug!(params = ?data.get("params"), "MEXC: {method} ack");
            return Ok(Parsed::Ignore);
        }
    }

    let channel = data.get("c").and_then(Value::as_str).unwrap_or_default();
    if !channel.starts_with("spot@public.bookTicker.v3.api@") {
        return Ok(Parsed::Ignore);
    }
    let Some(ticker) = data.get("d") else {
        return Ok(Parsed::Ignore);
    };
    if ticker.get("s").and_then(Value::as_str).is_none() {
        return Ok(Parsed::Ignore);
    }

    let side = |price_key: &str, qty_key: &str| -> Vec<(f64, f64)> {
        match (
            ticker.get(price_key).and_then(parse_number),
            ticker.get(qty_key).and_then(parse_number),
        ) {
            (Some(price), Some(qty)) if qty > 0.0 => vec![(price, qty)],
            _ => Vec::new(),
        }
    };
    let bids = side("b", "B");
    let asks = side("a", "A");
    Ok(Parsed::Book(BookUpdate::snapshot(bids, asks)))
}
