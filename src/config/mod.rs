use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::aggregate::{AggregationSettings, SmallOrderFilter, ViewMode};
use crate::connection::ConnectionConfig;
use crate::exchange::ExchangeId;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Exchanges selected at startup. More can be selected at runtime.
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeId>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { symbol: default_symbol(), exchanges: default_exchanges() }
    }
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}
fn default_exchanges() -> Vec<ExchangeId> {
    vec![ExchangeId::Binance, ExchangeId::Bybit]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewConfig {
    #[serde(default = "default_mode")]
    pub mode: ViewMode,
    #[serde(default)]
    pub fee_adjusted: bool,
    #[serde(default)]
    pub filter_small_orders: bool,
    #[serde(default = "default_min_quantity")]
    pub min_quantity: f64,
    #[serde(default = "default_min_usd_value")]
    pub min_usd_value: f64,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            fee_adjusted: false,
            filter_small_orders: false,
            min_quantity: default_min_quantity(),
            min_usd_value: default_min_usd_value(),
            depth: default_depth(),
        }
    }
}

fn default_mode() -> ViewMode {
    ViewMode::Unified
}
fn default_min_quantity() -> f64 {
    0.0
}
fn default_min_usd_value() -> f64 {
    0.0
}
fn default_depth() -> usize {
    50
}

impl ViewConfig {
    pub fn aggregation_settings(&self) -> AggregationSettings {
        AggregationSettings {
            mode: self.mode,
            fee_adjusted: self.fee_adjusted,
            filter: self.filter_small_orders.then(|| SmallOrderFilter {
                min_quantity: self.min_quantity,
                min_usd_value: self.min_usd_value,
            }),
            depth: self.depth,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_protocol_error_limit")]
    pub protocol_error_limit: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_cap_secs: default_backoff_cap_secs(),
            protocol_error_limit: default_protocol_error_limit(),
        }
    }
}

fn default_max_retries() -> u32 {
    10
}
fn default_backoff_cap_secs() -> u64 {
    60
}
fn default_protocol_error_limit() -> u32 {
    5
}

impl ConnectionSettings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_retries: self.max_retries,
            backoff_cap_secs: self.backoff_cap_secs,
            protocol_error_limit: self.protocol_error_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How often the console consumer prints the aggregated top of book.
    #[serde(default = "default_print_interval_secs")]
    pub print_interval_secs: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            print_interval_secs: default_print_interval_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_print_interval_secs() -> u64 {
    5
}

impl Config {
    pub fn load() -> Result<Arc<Self>> {
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("BOOK").separator("_"));

        let config = builder.build()?;
        Ok(Arc::new(config.try_deserialize()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.feed.symbol, "BTCUSDT");
        assert_eq!(config.view.mode, ViewMode::Unified);
        assert!(config.view.aggregation_settings().filter.is_none());
        assert_eq!(config.connection.max_retries, 10);
    }

    #[test]
    fn filter_toggle_builds_filter() {
        let view = ViewConfig {
            filter_small_orders: true,
            min_quantity: 0.5,
            min_usd_value: 1000.0,
            ..Default::default()
        };
        let filter = view.aggregation_settings().filter.unwrap();
        assert_eq!(filter.min_quantity, 0.5);
        assert_eq!(filter.min_usd_value, 1000.0);
    }
}
