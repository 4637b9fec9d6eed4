//! Bitget v2 public `books` channel (SPOT instrument type). Same
//! snapshot/update action split as OKX; ping/pong are bare text frames
//! handled before JSON parsing.

use serde_json::Value;

use super::{parse_levels, parse_number, BookUpdate, Parsed, UpdateKind};
use crate::error::EngineError;

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let op = if subscribe { "subscribe" } else { "unsubscribe" };
    serde_json::json!({
        "op": op,
        "args": [{"instType": "SPOT", "channel": "books", "instId": formatted_symbol}],
    })
    .to_string()
}

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    if let Some(event) = data.get("event").and_then(Value::as_str) {
        if event == "error" {
            return Err(EngineError::protocol(format!(
                "Bitget: error event: {}",
                data.get("msg").and_then(Value::as_str).unwrap_or("?")
            )));
        }
        tracing::debug!("Bitget: {event} ack");
        return Ok(Parsed::Ignore);
    }

    let kind = match data.get("action").and_then(Value::as_str) {
        Some("snapshot") => UpdateKind::Snapshot,
        Some("update") => UpdateKind::Delta,
        _ => return Ok(Parsed::Ignore),
    };
    let Some(book) = data.get("data").and_then(Value::as_array).and_then(|d| d.first()) else {
        return Ok(Parsed::Ignore);
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
