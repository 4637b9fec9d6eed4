//! Coinbase Exchange `level2` channel. One full snapshot after subscribing,
//! then `l2update` messages whose changes are `[side, price, size]` triples
//! with a zero size removing the level.

use serde_json::Value;

use super::{parse_number, BookUpdate, Parsed};
use crate::error::EngineError;

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let msg_type = if subscribe { "subscribe" } else { "unsubscribe" };
    serde_json::json!({
        "type": msg_type,
        "product_ids": [formatted_symbol],
        "channels": ["level2"],
    })
    .to_string()
}

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    match data.get("type").and_then(Value::as_str) {
        Some("snapshot") if data.get("product_id").is_some() => {
            let bids = super::parse_levels(data.get("bids"));
            let asks = super::parse_levels(data.get("asks"));
            Ok(Parsed::Book(BookUpdate::snapshot(bids, asks)))
        }
        Some("l2update") if data.get("product_id").is_some() => {
            let mut bids = Vec::new();
            let mut asks = Vec::new();
            for change in data.get("changes").and_then(Value::as_array).into_iter().flatten() {
                let Some(arr) = change.as_array() else { continue };
                let (Some(side), Some(price), Some(size)) = (
                    arr.first().and_then(Value::as_str),
                    arr.get(1).and_then(parse_number),
                    arr.get(2).and_then(parse_number),
                ) else {
                    continue;
                };
                match side {
                    "buy" => bids.push((price, size)),
                    "sell" => asks.push((price, size)),
                    _ => {}
                }
            }
            Ok(Parsed::Book(BookUpdate::delta(bids, asks)))
        }
        Some("subscriptions") | Some("heartbeat") => Ok(Parsed::Ignore),
        Some("error") => Err(EngineError::protocol(format!(
            "Coinbase: error message: {}",
            data.get("message").and_then(Value::as_str).unwrap_or("?")
        ))),
        _ => Ok(Parsed::Ignore),
    }
}
