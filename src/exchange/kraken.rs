//! Kraken v1 spot `book-25` channel. Book messages are positional arrays:
//! `[channelId, bookData, channelName, pair]`, with `as`/`bs` keys on the
//! snapshot and `a`/`b` on deltas. Delta frames carry a CRC32 checksum over
//! the top ten levels in the `c` field; the state store verifies it.
//!
//! Kraken lists a fixed set of USD pairs, so the symbol formatter is a
//! lookup rather than a string rewrite; unlisted canonical symbols are a
//! configuration error.

use serde_json::Value;

use super::{BookUpdate, Parsed, RawLevel, UpdateKind};
use crate::error::EngineError;

const SYMBOL_MAP: [(&str, &str); 7] = [
    ("BTCUSDT", "BTC/USD"),
    ("ETHUSDT", "ETH/USD"),
    ("SOLUSDT", "SOL/USD"),
    ("DOGEUSDT", "DOGE/USD"),
    ("ADAUSDT", "ADA/USD"),
    ("XRPUSDT", "XRP/USD"),
    ("LINKUSDT", "LINK/USD"),
];

pub(super) fn format_symbol(canonical: &str) -> Option<String> {
    SYMBOL_MAP
        .iter()
        .find(|(common, _)| *common == canonical)
        .map(|(_, pair)| (*pair).to_string())
}

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let event = if subscribe { "subscribe" } else { "unsubscribe" };
    let subscription = if subscribe {
        serde_json::json!({"name": "book", "depth": 25})
    } else {
        serde_json::json!({"name": "book"})
    };
    serde_json::json!({
        "event": event,
        "pair": [formatted_symbol],
        "subscription": subscription,
    })
    .to_string()
}

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    if let Some(event) = data.get("event").and_then(Value::as_str) {
        match event {
            "pong" | "heartbeat" | "systemStatus" => {}
            "subscriptionStatus" => {
                tracing::debug!(
                    status = data.get("status").and_then(|v| v.as_str()),
                    "Kraken: subscription status"
                );
            }
            other => tracing::debug!("Kraken: unhandled event {other}"),
        }
        return Ok(Parsed::Ignore);
    }

    let Some(parts) = data.as_array() else {
        return Ok(Parsed::Ignore);
    };
    if parts.len() < 4 {
        return Ok(Parsed::Ignore);
    }
    let channel = parts[parts.len() - 2].as_str().unwrap_or_default();
    if !channel.starts_with("book-") {
        return Ok(Parsed::Ignore);
    }
    let book = &parts[1];

    // Snapshots carry both sides under "as"/"bs".
    if book.get("as").is_some() && book.get("bs").is_some() {
        let (bids, wire_bids) = collect_side(book.get("bs"));
        let (asks, wire_asks) = collect_side(book.get("as"));
        let mut update = BookUpdate::snapshot(bids, asks);
        update.wire_bids = wire_bids;
        update.wire_asks = wire_asks;
        update.checksum = parse_checksum(book);
        return Ok(Parsed::Book(update));
    }

    // Deltas may split bid and ask payloads across the positional slots.
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    let mut wire_bids = Vec::new();
    let mut wire_asks = Vec::new();
    let mut checksum = None;
    for part in &parts[1..parts.len() - 2] {
        let (levels, wire) = collect_side(part.get("b"));
        bids.extend(levels);
        wire_bids.extend(wire);
        let (levels, wire) = collect_side(part.get("a"));
        asks.extend(levels);
        wire_asks.extend(wire);
        checksum = checksum.or_else(|| parse_checksum(part));
    }
    if bids.is_empty() && asks.is_empty() {
        return Ok(Parsed::Ignore);
    }

    let mut update = BookUpdate::delta(bids, asks);
    update.wire_bids = wire_bids;
    update.wire_asks = wire_asks;
    update.checksum = checksum;
    Ok(Parsed::Book(update))
}

/// Kraken levels are `[price, volume, timestamp, ...]` with price and
/// volume as strings. The strings feed the checksum, so they are kept
/// verbatim next to the parsed values.
fn collect_side(value: Option<&Value>) -> (Vec<(f64, f64)>, Vec<RawLevel>) {
    let mut levels = Vec::new();
    let mut wire = Vec::new();
    for entry in value.and_then(Value::as_array).into_iter().flatten() {
        let Some(arr) = entry.as_array() else { continue };
        let (Some(price_s), Some(qty_s)) =
            (arr.first().and_then(Value::as_str), arr.get(1).and_then(Value::as_str))
        else {
            continue;
        };
        let (Ok(price), Ok(qty)) = (price_s.parse::<f64>(), qty_s.parse::<f64>()) else {
            continue;
        };
        levels.push((price, qty));
        wire.push(RawLevel { price: price_s.to_string(), qty: qty_s.to_string() });
    }
    (levels, wire)
}

fn parse_checksum(book: &Value) -> Option<u32> {
    match book.get("c") {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_u64().map(|n| n as u32),
        _ => None,
    }
}
