//! Bitrue legacy depth feed. Frames may arrive as gzip-compressed binary
//! (inflated upstream by sniffing the magic bytes), the server pings with
//! `{"ping": ts}` expecting `{"pong": ts}` back, and the `tick` payload is
//! always a full snapshot. This adapter is best-effort: the feed is only
//! semi-documented and its framing has been observed, not specified.

use serde_json::Value;

use super::{BookUpdate, Parsed};
use crate::error::EngineError;

pub(super) fn subscribe_message(formatted_symbol: &str, subscribe: bool) -> String {
    let event = if subscribe { "sub" } else { "unsub" };
    let lower = formatted_symbol.to_lowercase();
    serde_json::json!({
        "event": event,
        "params": {
            "cb_id": lower,
            "channel": format!("market_{lower}_simple_depth_step0"),
        },
    })
    .to_string()
}

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    if let Some(ping) = data.get("ping") {
        return Ok(Parsed::Reply(serde_json::json!({"pong": ping}).to_string()));
    }
    if data.get("event_rep").is_some() {
        tracing::debug!("Bitrue: subscription ack");
        return Ok(Parsed::Ignore);
    }

    let channel = data.get("channel").and_then(Value::as_str).unwrap_or_default();
    let Some(tick) = data.get("tick") else {
        return Ok(Parsed::Ignore);
    };
    if !channel.contains("depth") {
        return Ok(Parsed::Ignore);
    }

    // Full snapshot every time; drop empty levels at the source.
    let keep_positive = |levels: Vec<(f64, f64)>| {
        levels.into_iter().filter(|(_, q)| *q > 0.0).collect::<Vec<_>>()
    };
    let bids = keep_positive(super::parse_levels(tick.get("buys")));
    let asks = keep_positive(super::parse_levels(tick.get("asks")));
    Ok(Parsed::Book(BookUpdate::snapshot(bids, asks)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeId, Parsed, RawFrame, UpdateKind};
    use std::io::Write;

    // Best-effort coverage: these frames mirror observed Bitrue traffic,
    // not an exhaustive protocol description.

    #[test]
    fn server_ping_is_answered_with_pong() {
        let raw = serde_json::json!({"ping": 1700000000123u64});
        match parse(&raw).unwrap() {
            Parsed::Reply(r) => {
                let v: Value = serde_json::from_str(&r).unwrap();
                assert_eq!(v["pong"], 1700000000123u64);
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn depth_tick_is_a_snapshot() {
        let raw = serde_json::json!({
            "channel": "market_btcusdt_simple_depth_step0",
            "tick": {
                "buys": [["50000", "1.0"], ["49999", "0"]],
                "asks": [["50001", "2.0"]],
            },
        });
        match parse(&raw).unwrap() {
            Parsed::Book(u) => {
                assert_eq!(u.kind, UpdateKind::Snapshot);
                assert_eq!(u.bids, vec![(50000.0, 1.0)]); // zero-qty filtered at source
                assert_eq!(u.asks, vec![(50001.0, 2.0)]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn gzip_binary_frame_is_inflated() {
        let raw = serde_json::json!({
            "channel": "market_btcusdt_simple_depth_step0",
            "tick": {"buys": [["50000", "1.0"]], "asks": [["50001", "2.0"]]},
        })
        .to_string();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(raw.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let parsed = ExchangeId::Bitrue
            .parse_frame(RawFrame::Binary(&compressed), true)
            .unwrap();
        assert!(matches!(parsed, Parsed::Book(_)));
    }
}
