//! Auxiliary per-connection data: fee schedule, funding rate, 24h volume.
//! Fetched once after a connection is established, read-only afterwards.
//! Every fetch is best-effort: a failed or missing endpoint falls back to
//! published fee tiers and leaves funding/volume unset, and never blocks
//! the connection from going ready.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::exchange::ExchangeId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeSchedule {
    pub maker: f64,
    pub taker: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FundingRate {
    /// Rate as a percentage, e.g. 0.01 for one basis point.
    pub rate_pct: f64,
    pub next_funding_time_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub asset_volume: f64,
    pub usd_volume: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AuxData {
    pub fees: FeeSchedule,
    pub funding: Option<FundingRate>,
    pub volume: Option<VolumeInfo>,
}

impl Default for AuxData {
    fn default() -> Self {
        Self { fees: FeeSchedule { maker: 0.0, taker: 0.0 }, funding: None, volume: None }
    }
}

/// Published base-tier spot/perp rates, used when the exchange offers no
/// public fee endpoint (all of them, for unauthenticated clients).
pub fn default_fees(exchange: ExchangeId) -> FeeSchedule {
    match exchange {
        ExchangeId::Binance => FeeSchedule { maker: 0.0002, taker: 0.0005 },
        ExchangeId::Bybit => FeeSchedule { maker: 0.0001, taker: 0.0006 },
        ExchangeId::Okx => FeeSchedule { maker: 0.0002, taker: 0.0005 },
        ExchangeId::Kraken => FeeSchedule { maker: 0.0016, taker: 0.0026 },
        ExchangeId::Bitget => FeeSchedule { maker: 0.0002, taker: 0.0006 },
        ExchangeId::Mexc => FeeSchedule { maker: 0.0002, taker: 0.0006 },
        ExchangeId::Coinbase => FeeSchedule { maker: 0.005, taker: 0.005 },
        ExchangeId::Gemini => FeeSchedule { maker: 0.0025, taker: 0.0035 },
        ExchangeId::Bitrue => FeeSchedule { maker: 0.00098, taker: 0.00098 },
    }
}

pub struct AuxClient {
    client: Client,
}

impl AuxClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Fetch everything available for one connection. Individual failures
    /// are logged and degrade to defaults.
    pub async fn fetch(&self, exchange: ExchangeId, formatted_symbol: &str) -> AuxData {
        let funding = match self.fetch_funding(exchange, formatted_symbol).await {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!("{}: funding rate unavailable: {e:#}", exchange.name());
                None
            }
        };
        let volume = match self.fetch_volume(exchange, formatted_symbol).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("{}: 24h volume unavailable: {e:#}", exchange.name());
                None
            }
        };
        AuxData { fees: default_fees(exchange), funding, volume }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.client.get(url).send().await.context("HTTP request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }
        response.json().await.context("invalid JSON body")
    }

    async fn fetch_funding(
        &self,
        exchange: ExchangeId,
        symbol: &str,
    ) -> Result<Option<FundingRate>> {
        let data = match exchange {
            ExchangeId::Binance => {
                let url = format!(
                    "https://fapi.binance.com/fapi/v1/premiumIndex?symbol={}",
                    symbol.to_uppercase()
                );
                self.get_json(&url).await?
            }
            ExchangeId::Bybit => {
                let url = format!(
                    "https://api.bybit.com/v5/market/tickers?category=linear&symbol={symbol}"
                );
                self.get_json(&url).await?
            }
            ExchangeId::Okx => {
                let url = format!(
                    "https://www.okx.com/api/v5/public/funding-rate?instId={symbol}"
                );
                self.get_json(&url).await?
            }
            // Spot venues have no funding rate.
            _ => return Ok(None),
        };
        Ok(parse_funding(exchange, &data))
    }

    async fn fetch_volume(&self, exchange: ExchangeId, symbol: &str) -> Result<Option<VolumeInfo>> {
        let data = match exchange {
            ExchangeId::Binance => {
                let url = format!(
                    "https://fapi.binance.com/fapi/v1/ticker/24hr?symbol={}",
                    symbol.to_uppercase()
                );
                self.get_json(&url).await?
            }
            ExchangeId::Bybit => {
                let url = format!(
                    "https://api.bybit.com/v5/market/tickers?category=linear&symbol={symbol}"
                );
                self.get_json(&url).await?
            }
            ExchangeId::Coinbase => {
                let url = format!(
                    "https://api.exchange.coinbase.com/products/{symbol}/stats"
                );
                self.get_json(&url).await?
            }
            ExchangeId::Gemini => {
                let url = format!(
                    "https://api.gemini.com/v1/pubticker/{}",
                    symbol.to_lowercase()
                );
                self.get_json(&url).await?
            }
            ExchangeId::Mexc => {
                let url = format!(
                    "https://api.mexc.com/api/v3/ticker/24hr?symbol={}",
                    symbol.to_uppercase()
                );
                self.get_json(&url).await?
            }
            ExchangeId::Bitrue => {
                let url = format!(
                    "https://openapi.bitrue.com/api/v1/ticker/24hr?symbol={}",
                    symbol.to_uppercase()
                );
                self.get_json(&url).await?
            }
            ExchangeId::Okx | ExchangeId::Kraken | ExchangeId::Bitget => return Ok(None),
        };
        Ok(parse_volume(exchange, &data))
    }
}

impl Default for AuxClient {
    fn default() -> Self {
        Self::new()
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_funding(exchange: ExchangeId, data: &Value) -> Option<FundingRate> {
    match exchange {
        ExchangeId::Binance => Some(FundingRate {
            rate_pct: number(&data["lastFundingRate"])? * 100.0,
            next_funding_time_ms: data["nextFundingTime"].as_i64(),
        }),
        ExchangeId::Bybit => {
            let ticker = data["result"]["list"].get(0)?;
            Some(FundingRate {
                rate_pct: number(&ticker["fundingRate"])? * 100.0,
                next_funding_time_ms: number(&ticker["nextFundingTime"]).map(|t| t as i64),
            })
        }
        ExchangeId::Okx => {
            let entry = data["data"].get(0)?;
            Some(FundingRate {
                rate_pct: number(&entry["fundingRate"])? * 100.0,
                next_funding_time_ms: number(&entry["nextFundingTime"]).map(|t| t as i64),
            })
        }
        _ => None,
    }
}

fn parse_volume(exchange: ExchangeId, data: &Value) -> Option<VolumeInfo> {
    match exchange {
        ExchangeId::Binance => Some(VolumeInfo {
            asset_volume: number(&data["volume"])?,
            usd_volume: number(&data["quoteVolume"])?,
        }),
        ExchangeId::Bybit => {
            let ticker = data["result"]["list"].get(0)?;
            Some(VolumeInfo {
                asset_volume: number(&ticker["volume24h"])?,
                usd_volume: number(&ticker["turnover24h"])?,
            })
        }
        ExchangeId::Coinbase => {
            let asset = number(&data["volume"])?;
            let last = number(&data["last"]).unwrap_or(0.0);
            Some(VolumeInfo { asset_volume: asset, usd_volume: asset * last })
        }
        ExchangeId::Gemini => {
            // `volume` keys by asset and quote currency names.
            let volume = data.get("volume")?;
            let obj = volume.as_object()?;
            let usd = obj.get("USD").and_then(number).unwrap_or(0.0);
            let asset = obj
                .iter()
                .filter(|(k, _)| *k != "USD" && *k != "timestamp")
                .find_map(|(_, v)| number(v))?;
            Some(VolumeInfo { asset_volume: asset, usd_volume: usd })
        }
        ExchangeId::Mexc | ExchangeId::Bitrue => Some(VolumeInfo {
            asset_volume: number(&data["volume"])?,
            usd_volume: number(&data["quoteVolume"])?,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_exchange_has_a_fee_fallback() {
        for exchange in crate::exchange::ALL_EXCHANGES {
            let fees = default_fees(exchange);
            assert!(fees.taker > 0.0, "{exchange} missing taker rate");
            assert!(fees.taker < 0.02, "{exchange} taker rate implausible");
        }
    }

    #[test]
    fn binance_funding_parses() {
        let data = serde_json::json!({
            "symbol": "BTCUSDT",
            "lastFundingRate": "0.00010000",
            "nextFundingTime": 1700000000000i64,
        });
        let funding = parse_funding(ExchangeId::Binance, &data).unwrap();
        assert!((funding.rate_pct - 0.01).abs() < 1e-9);
        assert_eq!(funding.next_funding_time_ms, Some(1700000000000));
    }

    #[test]
    fn bybit_volume_parses_from_ticker_list() {
        let data = serde_json::json!({
            "retCode": 0,
            "result": {"list": [{"volume24h": "12345.6", "turnover24h": "617280000"}]},
        });
        let volume = parse_volume(ExchangeId::Bybit, &data).unwrap();
        assert_eq!(volume.asset_volume, 12345.6);
        assert_eq!(volume.usd_volume, 617280000.0);
    }

    #[test]
    fn gemini_volume_keys_by_currency() {
        let data = serde_json::json!({
            "volume": {"BTC": "2210.5", "USD": "110525000.0", "timestamp": 1700000000000i64},
        });
        let volume = parse_volume(ExchangeId::Gemini, &data).unwrap();
        assert_eq!(volume.asset_volume, 2210.5);
        assert_eq!(volume.usd_volume, 110525000.0);
    }

    #[test]
    fn malformed_payload_yields_none() {
        assert!(parse_volume(ExchangeId::Binance, &serde_json::json!({})).is_none());
        assert!(parse_funding(ExchangeId::Okx, &serde_json::json!({"data": []})).is_none());
    }
}
