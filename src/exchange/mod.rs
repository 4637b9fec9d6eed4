pub mod binance;
pub mod bitget;
pub mod bitrue;
pub mod bybit;
pub mod coinbase;
pub mod gemini;
pub mod kraken;
pub mod mexc;
pub mod okx;

use std::fmt;
use std::io::Read;
use std::time::Duration;

use serde_json::Value;

use crate::error::EngineError;

/// Supported exchanges. Declaration order doubles as the stable tie-break
/// priority when two exchanges quote the exact same price in the
/// per-exchange view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Bybit,
    Okx,
    Kraken,
    Bitget,
    Mexc,
    Coinbase,
    Gemini,
    Bitrue,
}

pub const ALL_EXCHANGES: [ExchangeId; 9] = [
    ExchangeId::Binance,
    ExchangeId::Bybit,
    ExchangeId::Okx,
    ExchangeId::Kraken,
    ExchangeId::Bitget,
    ExchangeId::Mexc,
    ExchangeId::Coinbase,
    ExchangeId::Gemini,
    ExchangeId::Bitrue,
];

/// Whether a message replaces the book wholesale or merges into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Snapshot,
    Delta,
}

/// One price level exactly as transmitted. Checksummed feeds define their
/// digest over these strings, not over reparsed floats, so they must
/// survive untouched alongside the numeric levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLevel {
    pub price: String,
    pub qty: String,
}

/// Normalized order book message. A quantity of exactly zero in a delta
/// means "remove this price level". Parsers build these without ever
/// touching book state; the merge point lives in the state store.
/// `wire_bids`/`wire_asks` are populated only by feeds that checksum
/// their book (Kraken) and mirror `bids`/`asks` level for level.
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub wire_bids: Vec<RawLevel>,
    pub wire_asks: Vec<RawLevel>,
    pub kind: UpdateKind,
    pub last_update_id: Option<u64>,
    pub checksum: Option<u32>,
}

impl BookUpdate {
    pub fn snapshot(bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> Self {
        Self {
            bids,
            asks,
            wire_bids: Vec::new(),
            wire_asks: Vec::new(),
            kind: UpdateKind::Snapshot,
            last_update_id: None,
            checksum: None,
        }
    }

    pub fn delta(bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> Self {
        Self {
            bids,
            asks,
            wire_bids: Vec::new(),
            wire_asks: Vec::new(),
            kind: UpdateKind::Delta,
            last_update_id: None,
            checksum: None,
        }
    }
}

/// Outcome of parsing one inbound frame.
#[derive(Debug)]
pub enum Parsed {
    /// Order book data to hand to the state store.
    Book(BookUpdate),
    /// A control frame the server expects answered (application-level pong).
    Reply(String),
    /// Ack, pong, heartbeat or other non-book traffic. Must not perturb state.
    Ignore,
}

/// One inbound transport frame, borrowed from the WebSocket message.
#[derive(Debug, Clone, Copy)]
pub enum RawFrame<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ExchangeId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Binance => "Binance",
            Self::Bybit => "Bybit",
            Self::Okx => "OKX",
            Self::Kraken => "Kraken",
            Self::Bitget => "Bitget",
            Self::Mexc => "MEXC",
            Self::Coinbase => "Coinbase",
            Self::Gemini => "Gemini",
            Self::Bitrue => "Bitrue",
        }
    }

    /// Short tag used when labelling levels in the per-exchange view.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Binance => "BNB",
            Self::Bybit => "BYB",
            Self::Okx => "OKX",
            Self::Kraken => "KRK",
            Self::Bitget => "BGT",
            Self::Mexc => "MXC",
            Self::Coinbase => "CB",
            Self::Gemini => "GEM",
            Self::Bitrue => "BTR",
        }
    }

    /// Map a canonical symbol (e.g. `BTCUSDT`) to the exchange's native
    /// format. Kraken only lists a fixed set of USD pairs; anything else is
    /// a configuration error surfaced before any connection is attempted.
    pub fn format_symbol(&self, symbol: &str) -> Result<String, EngineError> {
        let upper = symbol.to_uppercase();
        match self {
            Self::Binance => Ok(upper.to_lowercase()),
            Self::Bybit | Self::Bitget | Self::Bitrue | Self::Mexc => Ok(upper),
            Self::Okx => Ok(format!("{upper}-SWAP")),
            Self::Kraken => kraken::format_symbol(&upper).ok_or(EngineError::Unsupported {
                exchange: self.name(),
                symbol: upper,
            }),
            Self::Coinbase => Ok(upper.replace("USDT", "-USD")),
            Self::Gemini => Ok(upper.replace("USDT", "USD")),
        }
    }

    /// WebSocket endpoint. Binance embeds the subscription in the URL; the
    /// rest use a fixed public endpoint plus an explicit subscribe frame.
    pub fn ws_url(&self, formatted_symbol: &str) -> String {
        match self {
            Self::Binance => {
                format!("wss://fstream.binance.com/ws/{formatted_symbol}@depth20@100ms")
            }
            Self::Bybit => "wss://stream.bybit.com/v5/public/linear".to_string(),
            Self::Okx => "wss://ws.okx.com/ws/v5/public".to_string(),
            Self::Kraken => "wss://ws.kraken.com".to_string(),
            Self::Bitget => "wss://ws.bitget.com/v2/ws/public".to_string(),
            Self::Mexc => "wss://wbs.mexc.com/ws".to_string(),
            Self::Coinbase => "wss://ws-feed.exchange.coinbase.com".to_string(),
            Self::Gemini => "wss://api.gemini.com/v1/marketdata".to_string(),
            Self::Bitrue => "wss://ws.bitrue.com/market/ws".to_string(),
        }
    }

    pub fn subscribe_message(&self, formatted_symbol: &str) -> Option<String> {
        match self {
            Self::Binance => None,
            Self::Bybit => Some(bybit::subscribe_message(formatted_symbol, true)),
            Self::Okx => Some(okx::subscribe_message(formatted_symbol, true)),
            Self::Kraken => Some(kraken::subscribe_message(formatted_symbol, true)),
            Self::Bitget => Some(bitget::subscribe_message(formatted_symbol, true)),
            Self::Mexc => Some(mexc::subscribe_message(formatted_symbol, true)),
            Self::Coinbase => Some(coinbase::subscribe_message(formatted_symbol, true)),
            Self::Gemini => Some(gemini::subscribe_message(formatted_symbol, true)),
            Self::Bitrue => Some(bitrue::subscribe_message(formatted_symbol, true)),
        }
    }

    /// Used on teardown when the transport is still open, so a reused
    /// endpoint stops streaming the old symbol.
    pub fn unsubscribe_message(&self, formatted_symbol: &str) -> Option<String> {
        match self {
            Self::Binance => None,
            Self::Bybit => Some(bybit::subscribe_message(formatted_symbol, false)),
            Self::Okx => Some(okx::subscribe_message(formatted_symbol, false)),
            Self::Kraken => Some(kraken::subscribe_message(formatted_symbol, false)),
            Self::Bitget => Some(bitget::subscribe_message(formatted_symbol, false)),
            Self::Mexc => Some(mexc::subscribe_message(formatted_symbol, false)),
            Self::Coinbase => Some(coinbase::subscribe_message(formatted_symbol, false)),
            Self::Gemini => Some(gemini::subscribe_message(formatted_symbol, false)),
            Self::Bitrue => Some(bitrue::subscribe_message(formatted_symbol, false)),
        }
    }

    /// Application-level keepalive (interval, payload) for exchanges that
    /// drop idle connections. Bitrue instead answers server-initiated pings.
    pub fn keepalive(&self) -> Option<(Duration, String)> {
        match self {
            Self::Bybit => Some((Duration::from_secs(20), r#"{"op":"ping"}"#.to_string())),
            Self::Okx => Some((Duration::from_secs(25), "ping".to_string())),
            Self::Kraken => Some((Duration::from_secs(30), r#"{"event":"ping"}"#.to_string())),
            Self::Bitget => Some((Duration::from_secs(30), "ping".to_string())),
            Self::Mexc => Some((Duration::from_secs(30), r#"{"method":"PING"}"#.to_string())),
            Self::Binance | Self::Coinbase | Self::Gemini | Self::Bitrue => None,
        }
    }

    /// Whether deltas are meaningless until an explicit snapshot arrives.
    pub fn needs_snapshot(&self) -> bool {
        !matches!(self, Self::Binance | Self::Mexc)
    }

    /// Maximum retained depth per side; bounds memory against thin deep
    /// levels that are never displayed.
    pub fn max_depth(&self) -> Option<usize> {
        match self {
            Self::Binance => None, // partial stream is already 20 levels
            Self::Mexc => None,    // book ticker carries one level per side
            Self::Kraken => Some(25),
            Self::Bybit | Self::Okx | Self::Bitget | Self::Coinbase | Self::Gemini => Some(50),
            Self::Bitrue => Some(50),
        }
    }

    /// Per-exchange retry budget override; `None` falls back to the
    /// configured default.
    pub fn max_retries(&self) -> Option<u32> {
        match self {
            Self::Bitrue => Some(3), // legacy feed, fail fast
            _ => None,
        }
    }

    /// Parse one inbound frame into a normalized outcome. Pure with respect
    /// to book state: gating and merge semantics live in the state store.
    pub fn parse_frame(
        &self,
        frame: RawFrame<'_>,
        snapshot_received: bool,
    ) -> Result<Parsed, EngineError> {
        let inflated;
        let text = match frame {
            RawFrame::Text(t) => t,
            RawFrame::Binary(bytes) => {
                // Only the Bitrue legacy feed sends binary frames
                // (gzip-compressed JSON). Anything else is dropped.
                if *self != Self::Bitrue {
                    return Ok(Parsed::Ignore);
                }
                inflated = inflate_frame(bytes)?;
                &inflated
            }
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Parsed::Ignore);
        }
        // Bitget and OKX ping/pong as bare text, outside JSON framing.
        if trimmed.eq_ignore_ascii_case("ping") {
            return Ok(Parsed::Reply("pong".to_string()));
        }
        if trimmed.eq_ignore_ascii_case("pong") {
            return Ok(Parsed::Ignore);
        }

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| EngineError::protocol(format!("{}: invalid JSON: {e}", self.name())))?;

        match self {
            Self::Binance => binance::parse(&value),
            Self::Bybit => bybit::parse(&value),
            Self::Okx => okx::parse(&value),
            Self::Kraken => kraken::parse(&value),
            Self::Bitget => bitget::parse(&value),
            Self::Mexc => mexc::parse(&value),
            Self::Coinbase => coinbase::parse(&value),
            Self::Gemini => gemini::parse(&value, snapshot_received),
            Self::Bitrue => bitrue::parse(&value),
        }
    }
}

/// Decompress a binary frame when it carries the gzip magic, otherwise
/// treat it as plain UTF-8. Best-effort handling for the Bitrue feed.
fn inflate_frame(bytes: &[u8]) -> Result<String, EngineError> {
    if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        let mut out = String::new();
        flate2::read::GzDecoder::new(bytes)
            .read_to_string(&mut out)
            .map_err(|e| EngineError::protocol(format!("gzip inflate failed: {e}")))?;
        Ok(out)
    } else {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EngineError::protocol(format!("non-UTF8 binary frame: {e}")))
    }
}

/// Parse one `[price, quantity, ...]` wire level. Extra trailing elements
/// (timestamps, order counts) are tolerated; prices and quantities arrive as
/// strings on most feeds, numbers on a few.
pub(crate) fn parse_level(entry: &Value) -> Option<(f64, f64)> {
    let arr = entry.as_array()?;
    Some((parse_number(arr.first()?)?, parse_number(arr.get(1)?)?))
}

pub(crate) fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Collect every parseable level of a wire array; unparseable entries are
/// skipped rather than failing the whole frame.
pub(crate) fn parse_levels(value: Option<&Value>) -> Vec<(f64, f64)> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_level).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_formatting_per_exchange() {
        assert_eq!(ExchangeId::Binance.format_symbol("BTCUSDT").unwrap(), "btcusdt");
        assert_eq!(ExchangeId::Bybit.format_symbol("btcusdt").unwrap(), "BTCUSDT");
        assert_eq!(ExchangeId::Okx.format_symbol("BTCUSDT").unwrap(), "BTCUSDT-SWAP");
        assert_eq!(ExchangeId::Kraken.format_symbol("BTCUSDT").unwrap(), "BTC/USD");
        assert_eq!(ExchangeId::Mexc.format_symbol("btcusdt").unwrap(), "BTCUSDT");
        assert_eq!(ExchangeId::Coinbase.format_symbol("ETHUSDT").unwrap(), "ETH-USD");
        assert_eq!(ExchangeId::Gemini.format_symbol("ETHUSDT").unwrap(), "ETHUSD");
    }

    #[test]
    fn kraken_rejects_unlisted_symbols() {
        let err = ExchangeId::Kraken.format_symbol("SHIBUSDT").unwrap_err();
        assert!(matches!(err, EngineError::Unsupported { .. }));
    }

    #[test]
    fn bare_ping_is_answered() {
        let parsed = ExchangeId::Bitget
            .parse_frame(RawFrame::Text("ping"), true)
            .unwrap();
        match parsed {
            Parsed::Reply(r) => assert_eq!(r, "pong"),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn binary_frames_ignored_outside_bitrue() {
        let parsed = ExchangeId::Bybit
            .parse_frame(RawFrame::Binary(&[0x00, 0x01]), true)
            .unwrap();
        assert!(matches!(parsed, Parsed::Ignore));
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let err = ExchangeId::Bybit
            .parse_frame(RawFrame::Text("{not json"), true)
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }
}
