//! Bybit v5 linear public feed, `orderbook.50.<SYMBOL>` topic. Sends one
//! typed snapshot after subscribing, then deltas where a zero quantity
//! removes the level.

use serde_json::Value;

use super::{parse_levels, BookUpdate, Parsed, UpdateKind};
use crate::error::EngineError;

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let op = if subscribe { "subscribe" } else { "unsubscribe" };
    serde_json::json!({
        "op": op,
        "args": [format!("orderbook.50.{formatted_symbol}")],
    })
    .to_string()
}

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    // Subscription acks and pongs carry an "op" field.
    if let Some(op) = data.get("op").and_then(Value::as_str) {
        if op == "subscribe" || op == "unsubscribe" {
            tracing::debug!(success = data.get("success").and_then(|v| v.as_bool()), "Bybit: {op} ack");
        }
        return Ok(Parsed::Ignore);
    }

    let topic = data.get("topic").and_then(Value::as_str).unwrap_or_default();
    if !topic.starts_with("orderbook.50.") {
        return Ok(Parsed::Ignore);
    }

    let book = data
        .get("data")
        .ok_or_else(|| EngineError::protocol("Bybit: orderbook message without data"))?;
    let kind = match data.get("type").and_then(Value::as_str) {
        Some("snapshot") => UpdateKind::Snapshot,
        Some("delta") => UpdateKind::Delta,
        other => {
            return Err(EngineError::protocol(format!(
                "Bybit: unexpected orderbook message type {other:?}"
            )))
        }
    };

    let mut update = BookUpdate {
        bids: parse_levels(book.get("b")),
        asks: parse_levels(book.get("a")),
        wire_bids: Vec::new(),
        wire_asks: Vec::new(),
        kind,
        last_update_id: book.get("u").and_then(Value::as_u64),
        checksum: None,
    };
    if update.last_update_id.is_none() {
        update.last_update_id = book.get("seq").and_then(Value::as_u64);
    }
    Ok(Parsed::Book(update))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_delta() {
        let snapshot = serde_json::json!({
            "topic": "orderbook.50.BTCUSDT",
            "type": "snapshot",
            "data": {"s": "BTCUSDT", "b": [["50000", "1.5"]], "a": [["50001", "1.3"]], "u": 1, "seq": 10},
        });
        match parse(&snapshot).unwrap() {
            Parsed::Book(u) => {
                assert_eq!(u.kind, UpdateKind::Snapshot);
                assert_eq!(u.bids, vec![(50000.0, 1.5)]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        let delta = serde_json::json!({
            "topic": "orderbook.50.BTCUSDT",
            "type": "delta",
            "data": {"s": "BTCUSDT", "b": [["50000", "0"]], "a": [], "u": 2, "seq": 11},
        });
        match parse(&delta).unwrap() {
            Parsed::Book(u) => {
                assert_eq!(u.kind, UpdateKind::Delta);
                assert_eq!(u.bids, vec![(50000.0, 0.0)]);
                assert!(u.asks.is_empty());
            }
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn acks_and_pongs_are_ignored() {
        let ack = serde_json::json!({"op": "subscribe", "success": true});
        assert!(matches!(parse(&ack).unwrap(), Parsed::Ignore));
        let pong = serde_json::json!({"op": "pong"});
        assert!(matches!(parse(&pong).unwrap(), Parsed::Ignore));
    }

    #[test]
    fn subscribe_payload_shape() {
        let msg: Value = serde_json::from_str(&subscribe_message("BTCUSDT", true)).unwrap();
        assert_eq!(msg["op"], "subscribe");
        assert_eq!(msg["args"][0], "orderbook.50.BTCUSDT");
    }
}
