//! Binance USD-M futures partial book stream. The subscription is embedded
//! in the URL (`<sym>@depth20@100ms`) and every message is a complete
//! 20-level snapshot, so there is no snapshot/delta distinction to track.

use serde_json::Value;

use super::{parse_levels, BookUpdate, Parsed};
use crate::error::EngineError;

pub(super) fn parse(data: &Value) -> Result<Parsed, EngineError> {
    let is_depth = data.get("e").and_then(Value::as_str) == Some("depthUpdate")
        || (data.get("lastUpdateId").is_some() && data.get("b").is_some() && data.get("a").is_some());
    if !is_depth {
        return Ok(Parsed::Ignore);
    }

    let bids = parse_levels(data.get("b").or_else(|| data.get("bids")));
    let asks = parse_levels(data.get("a").or_else(|| data.get("asks")));

    let mut update = BookUpdate::snapshot(bids, asks);
    update.last_update_id = data
        .get("lastUpdateId")
        .or_else(|| data.get("U"))
        .and_then(Value::as_u64);
    Ok(Parsed::Book(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::UpdateKind;

    #[test]
    fn partial_stream_message_is_a_snapshot() {
        let raw = serde_json::json!({
            "lastUpdateId": 160,
            "b": [["50000.00", "1.5"], ["49999.00", "2.0"]],
            "a": [["50001.00", "1.3"]],
        });
        match parse(&raw).unwrap() {
            Parsed::Book(update) => {
                assert_eq!(update.kind, UpdateKind::Snapshot);
                assert_eq!(update.bids, vec![(50000.0, 1.5), (49999.0, 2.0)]);
                assert_eq!(update.asks, vec![(50001.0, 1.3)]);
                assert_eq!(update.last_update_id, Some(160));
            }
            other => panic!("expected book update, got {other:?}"),
        }
    }

    #[test]
    fn non_depth_traffic_is_ignored() {
        let raw = serde_json::json!({"result": null, "id": 1});
        assert!(matches!(parse(&raw).unwrap(), Parsed::Ignore));
    }
}
