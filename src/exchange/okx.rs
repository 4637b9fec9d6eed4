//! OKX v5 public `books` channel on the perpetual swap instrument. Action
//! `snapshot` replaces the book, `update` merges. Levels arrive as
//! four-element arrays; only price and size matter.

use serde_json::Value;

use super::{parse_levels, parse_number, BookUpdate, Parsed, UpdateKind};
use crate::error::EngineError;

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let op = if subscribe { "subscribe" } else { "unsubscribe" };
    serde_json::json!({
        "op": op,
        "args": [{"channel": "books", "instId": formatted_symbol}],
    })
    .to_string()
}

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    if let Some(event) = data.get("event").and_then(Value::as_str) {
        if event == "error" {
            return Err(EngineError::protocol(format!(
                "OKX: error event: {}",
                data.get("msg").and_then(Value::as_str).unwrap_or("?")
            )));
        }
        tracing::debug!("OKX: {event} ack");
        return Ok(Parsed::Ignore);
    }

    let channel = data
        .pointer("/arg/channel")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let book = data.get("data").and_then(Value::as_array).and_then(|d| d.first());
    let (Some(book), "books") = (book, channel) else {
        return Ok(Parsed::Ignore);
    };

    let kind = match data.get("action").and_then(Value::as_str) {
        Some("snapshot") => UpdateKind::Snapshot,
        Some("update") => UpdateKind::Delta,
        other => {
            return Err(EngineError::protocol(format!(
                "OKX: unexpected books action {other:?}"
            )))
        }
    };

    Ok(Parsed::Book(BookUpdate {
        bids: parse_levels(book.get("bids")),
        asks: parse_levels(book.get("asks")),
        wire_bids: Vec::new(),
        wire_asks: Vec::new(),
        kind,
        last_update_id: book.get("ts").and_then(parse_number).map(|ts| ts as u64),
        checksum: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_update_actions() {
        let snapshot = serde_json::json!({
            "arg": {"channel": "books", "instId": "BTCUSDT-SWAP"},
            "action": "snapshot",
            "data": [{"bids": [["50000", "2", "0", "4"]], "asks": [["50001", "3", "0", "2"]], "ts": "1700000000000"}],
        });
        match parse(&snapshot).unwrap() {
            Parsed::Book(u) => {
                assert_eq!(u.kind, UpdateKind::Snapshot);
                assert_eq!(u.bids, vec![(50000.0, 2.0)]);
                assert_eq!(u.last_update_id, Some(1700000000000));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        let update = serde_json::json!({
            "arg": {"channel": "books", "instId": "BTCUSDT-SWAP"},
            "action": "update",
            "data": [{"bids": [["50000", "0", "0", "0"]], "asks": [], "ts": "1700000000100"}],
        });
        match parse(&update).unwrap() {
            Parsed::Book(u) => assert_eq!(u.kind, UpdateKind::Delta),
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn subscribe_ack_is_ignored() {
        let ack = serde_json::json!({"event": "subscribe", "arg": {"channel": "books"}});
        assert!(matches!(parse(&ack).unwrap(), Parsed::Ignore));
    }

    #[test]
    fn error_event_is_a_protocol_error() {
        let err = serde_json::json!({"event": "error", "msg": "channel not found"});
        assert!(parse(&err).is_err());
    }
}
