//! Gemini v1 market data feed, `l2_updates` subscription. The feed does not
//! label its snapshot: the first `l2_updates` message after subscribing is
//! the full book, every later one is a delta. This is the one adapter that
//! needs the snapshot-received flag to classify a frame; it still never
//! touches book state.

use serde_json::Value;

use super::{parse_number, BookUpdate, Parsed};
use crate::error::EngineError;

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let msg_type = if subscribe { "subscribe" } else { "unsubscribe" };
    serde_json::json!({
        "type": msg_type,
        "subscriptions": [{"name": "l2_updates", "symbols": [formatted_symbol]}],
    })
    .to_string()
}

pub(super) fn parse(data: &Value, snapshot_received: bool) -> Result<Parsed, EngineError> {
    match data.get("type").and_then(Value::as_str) {
        Some("l2_updates") => {}
        Some("subscription_ack") | Some("heartbeat") | Some("trade") | Some("auction_result") => {
            return Ok(Parsed::Ignore)
        }
        _ => return Ok(Parsed::Ignore),
    }

    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for change in data.get("changes").and_then(Value::as_array).into_iter().flatten() {
        let Some(side) = change.get("side").and_then(Value::as_str) else { continue };
        let Some(price) = change.get("price").and_then(parse_number) else { continue };
        let quantity = change
            .get("remaining")
            .or_else(|| change.get("delta"))
            .and_then(parse_number)
            .unwrap_or(0.0);
        let cancelled = change.get("reason").and_then(Value::as_str) == Some("cancel");
        let quantity = if cancelled { 0.0 } else { quantity };
        match side {
            "bid" => bids.push((price, quantity)),
            "ask" => asks.push((price, quantity)),
            _ => {}
        }
    }

    let update = if snapshot_received {
        BookUpdate::delta(bids, asks)
    } else {
        // First l2_updates after subscribing carries the full book.
        BookUpdate::snapshot(bids, asks)
    };
    Ok(Parsed::Book(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::UpdateKind;

    fn l2(changes: Value) -> Value {
        serde_json::json!({"type": "l2_updates", "symbol": "BTCUSD", "changes": changes})
    }

    #[test]
    fn first_message_is_the_snapshot() {
        let raw = l2(serde_json::json!([
            {"side": "bid", "price": "50000", "remaining": "1.5"},
            {"side": "ask", "price": "50001", "remaining": "0.5"},
        ]));
        match parse(&raw, false).unwrap() {
            Parsed::Book(u) => {
                assert_eq!(u.kind, UpdateKind::Snapshot);
                assert_eq!(u.bids, vec![(50000.0, 1.5)]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn later_messages_are_deltas_and_cancels_delete() {
        let raw = l2(serde_json::json!([
            {"side": "bid", "price": "50000", "remaining": "2.0", "reason": "cancel"},
        ]));
        match parse(&raw, true).unwrap() {
            Parsed::Book(u) => {
                assert_eq!(u.kind, UpdateKind::Delta);
                assert_eq!(u.bids, vec![(50000.0, 0.0)]);
            }
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_is_ignored() {
        let raw = serde_json::json!({"type": "heartbeat"});
        assert!(matches!(parse(&raw, true).unwrap(), Parsed::Ignore));
    }
}
