//! Aggregation across exchanges. Pure functions over copied-out book
//! views, so every pass sees a consistent per-exchange snapshot and the
//! connection tasks are never blocked by a consumer.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::exchange::ExchangeId;

/// How levels from different exchanges are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Sum quantities per price across exchanges.
    Unified,
    /// Keep every level separate, tagged by origin exchange.
    Individual,
    /// Only each exchange's best bid and ask.
    TopOfBook,
}

/// Drops dust levels: quantity below an absolute floor, or notional value
/// (quantity times estimated mid) below a USD floor.
#[derive(Debug, Clone, Copy, Serialize, serde::Deserialize)]
pub struct SmallOrderFilter {
    pub min_quantity: f64,
    pub min_usd_value: f64,
}

#[derive(Debug, Clone)]
pub struct AggregationSettings {
    pub mode: ViewMode,
    pub fee_adjusted: bool,
    pub filter: Option<SmallOrderFilter>,
    /// Levels retained per side in the output.
    pub depth: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self { mode: ViewMode::Unified, fee_adjusted: false, filter: None, depth: 50 }
    }
}

/// One exchange's book as seen at aggregation time: copied out, best
/// level first on both sides, plus the taker fee used for adjustment.
#[derive(Debug, Clone)]
pub struct BookView {
    pub exchange: ExchangeId,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub taker_fee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggLevel {
    pub price: f64,
    pub quantity: f64,
    /// Running total from the best level down. Unified mode accumulates
    /// across the merged side; individual mode accumulates per exchange.
    pub total: f64,
    /// Origin exchange; `None` for merged unified levels.
    pub exchange: Option<ExchangeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossedMarket {
    pub profit: f64,
    /// Percent of the sell price, e.g. 4.76 for a 5-point cross at 105.
    pub profit_pct: f64,
    pub buy_exchange: Option<ExchangeId>,
    pub sell_exchange: Option<ExchangeId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedBook {
    pub bids: Vec<AggLevel>,
    pub asks: Vec<AggLevel>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    /// Spread as a percent of the best ask.
    pub spread_pct: Option<f64>,
    pub crossed: Option<CrossedMarket>,
    pub timestamp_ms: i64,
}

/// Run one aggregation pass over the current ready set. Tolerates any mix
/// of empty and populated views.
pub fn aggregate(views: &[BookView], settings: &AggregationSettings) -> AggregatedBook {
    // Fee adjustment happens before any comparison, sort or spread: a bid
    // is worth less after selling fees, an ask costs more after buying fees.
    let adjusted: Vec<BookView> = views
        .iter()
        .map(|v| {
            let fee = if settings.fee_adjusted { v.taker_fee } else { 0.0 };
            let mut view = BookView {
                exchange: v.exchange,
                bids: v.bids.iter().map(|&(p, q)| (p * (1.0 - fee), q)).collect(),
                asks: v.asks.iter().map(|&(p, q)| (p * (1.0 + fee), q)).collect(),
                taker_fee: v.taker_fee,
            };
            if let Some(filter) = &settings.filter {
                apply_filter(&mut view, filter);
            }
            view
        })
        .collect();

    let (bids, asks) = match settings.mode {
        ViewMode::Unified => unified(&adjusted, settings.depth),
        ViewMode::Individual => individual(&adjusted, settings.depth),
        ViewMode::TopOfBook => top_of_book(&adjusted),
    };

    let best_bid = bids.first().map(|l| l.price);
    let best_ask = asks.first().map(|l| l.price);
    let spread = match (best_bid, best_ask) {
        (Some(b), Some(a)) => Some(a - b),
        _ => None,
    };
    let spread_pct = match (spread, best_ask) {
        (Some(s), Some(a)) if a != 0.0 => Some(s / a * 100.0),
        _ => None,
    };

    let crossed = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) if bid >= ask => Some(CrossedMarket {
            profit: bid - ask,
            profit_pct: if bid != 0.0 { (bid - ask) / bid * 100.0 } else { 0.0 },
            buy_exchange: best_ask_origin(&adjusted),
            sell_exchange: best_bid_origin(&adjusted),
        }),
        _ => None,
    };

    AggregatedBook {
        bids,
        asks,
        best_bid,
        best_ask,
        spread,
        spread_pct,
        crossed,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    }
}

/// Estimated mid for notional filtering: average of the view's best bid
/// and ask, falling back to whichever side exists. Zero means no notional
/// filtering (a symbol with no levels has nothing to filter anyway).
fn estimated_mid(view: &BookView) -> f64 {
    match (view.bids.first(), view.asks.first()) {
        (Some(&(b, _)), Some(&(a, _))) => (b + a) / 2.0,
        (Some(&(b, _)), None) => b,
        (None, Some(&(a, _))) => a,
        (None, None) => 0.0,
    }
}

fn apply_filter(view: &mut BookView, filter: &SmallOrderFilter) {
    let mid = estimated_mid(view);
    let keep = |&(_, qty): &(f64, f64)| {
        if qty < filter.min_quantity {
            return false;
        }
        mid == 0.0 || qty * mid >= filter.min_usd_value
    };
    view.bids.retain(keep);
    view.asks.retain(keep);
}

fn unified(views: &[BookView], depth: usize) -> (Vec<AggLevel>, Vec<AggLevel>) {
    let mut bid_map: BTreeMap<OrderedFloat<f64>, f64> = BTreeMap::new();
    let mut ask_map: BTreeMap<OrderedFloat<f64>, f64> = BTreeMap::new();
    for view in views {
        for &(price, qty) in &view.bids {
            *bid_map.entry(OrderedFloat(price)).or_default() += qty;
        }
        for &(price, qty) in &view.asks {
            *ask_map.entry(OrderedFloat(price)).or_default() += qty;
        }
    }

    let mut total = 0.0;
    let bids = bid_map
        .iter()
        .rev()
        .take(depth)
        .map(|(p, q)| {
            total += q;
            AggLevel { price: p.0, quantity: *q, total, exchange: None }
        })
        .collect();

    let mut total = 0.0;
    let asks = ask_map
        .iter()
        .take(depth)
        .map(|(p, q)| {
            total += q;
            AggLevel { price: p.0, quantity: *q, total, exchange: None }
        })
        .collect();

    (bids, asks)
}

fn individual(views: &[BookView], depth: usize) -> (Vec<AggLevel>, Vec<AggLevel>) {
    // Cumulative totals are per exchange, computed before interleaving, so
    // a level's total still reads as "size available on this venue down to
    // this price".
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for view in views {
        let mut total = 0.0;
        for &(price, qty) in &view.bids {
            total += qty;
            bids.push(AggLevel { price, quantity: qty, total, exchange: Some(view.exchange) });
        }
        let mut total = 0.0;
        for &(price, qty) in &view.asks {
            total += qty;
            asks.push(AggLevel { price, quantity: qty, total, exchange: Some(view.exchange) });
        }
    }

    // Equal prices tie-break by exchange declaration order, keeping the
    // interleave stable from pass to pass.
    bids.sort_by(|a, b| {
        OrderedFloat(b.price)
            .cmp(&OrderedFloat(a.price))
            .then(a.exchange.cmp(&b.exchange))
    });
    asks.sort_by(|a, b| {
        OrderedFloat(a.price)
            .cmp(&OrderedFloat(b.price))
            .then(a.exchange.cmp(&b.exchange))
    });
    bids.truncate(depth);
    asks.truncate(depth);
    (bids, asks)
}

fn top_of_book(views: &[BookView]) -> (Vec<AggLevel>, Vec<AggLevel>) {
    let mut bids: Vec<AggLevel> = views
        .iter()
        .filter_map(|v| {
            v.bids.first().map(|&(price, quantity)| AggLevel {
                price,
                quantity,
                total: quantity,
                exchange: Some(v.exchange),
            })
        })
        .collect();
    let mut asks: Vec<AggLevel> = views
        .iter()
        .filter_map(|v| {
            v.asks.first().map(|&(price, quantity)| AggLevel {
                price,
                quantity,
                total: quantity,
                exchange: Some(v.exchange),
            })
        })
        .collect();

    bids.sort_by(|a, b| {
        OrderedFloat(b.price)
            .cmp(&OrderedFloat(a.price))
            .then(a.exchange.cmp(&b.exchange))
    });
    asks.sort_by(|a, b| {
        OrderedFloat(a.price)
            .cmp(&OrderedFloat(b.price))
            .then(a.exchange.cmp(&b.exchange))
    });
    (bids, asks)
}

fn best_bid_origin(views: &[BookView]) -> Option<ExchangeId> {
    views
        .iter()
        .filter_map(|v| v.bids.first().map(|&(p, _)| (v.exchange, p)))
        .max_by(|a, b| OrderedFloat(a.1).cmp(&OrderedFloat(b.1)))
        .map(|(ex, _)| ex)
}

fn best_ask_origin(views: &[BookView]) -> Option<ExchangeId> {
    views
        .iter()
        .filter_map(|v| v.asks.first().map(|&(p, _)| (v.exchange, p)))
        .min_by(|a, b| OrderedFloat(a.1).cmp(&OrderedFloat(b.1)))
        .map(|(ex, _)| ex)
}
