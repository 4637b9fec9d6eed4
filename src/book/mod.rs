//! Per-connection order book state. Parsers hand in normalized updates;
//! this store owns the merge semantics: snapshot gating, zero-quantity
//! deletes, depth bounding and integrity checks.

pub mod checksum;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ordered_float::OrderedFloat;
use parking_lot::RwLock;

use crate::error::EngineError;
use crate::exchange::{BookUpdate, ExchangeId, UpdateKind};

pub type Price = OrderedFloat<f64>;

/// What the store did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Book state changed; consumers should re-aggregate.
    Applied,
    /// Update was dropped without touching state (delta before snapshot).
    Discarded,
}

#[derive(Default)]
struct BookInner {
    bids: BTreeMap<Price, f64>,
    asks: BTreeMap<Price, f64>,
    // Transmitted level strings, kept only for checksummed feeds; the
    // digest is defined over these, never over reformatted floats.
    bid_wire: BTreeMap<Price, checksum::WireLevel>,
    ask_wire: BTreeMap<Price, checksum::WireLevel>,
    snapshot_received: bool,
}

fn merge_wire(
    map: &mut BTreeMap<Price, checksum::WireLevel>,
    levels: &[crate::exchange::RawLevel],
    kind: UpdateKind,
) {
    if kind == UpdateKind::Snapshot {
        map.clear();
    }
    for level in levels {
        let (Ok(price), Ok(qty)) = (level.price.parse::<f64>(), level.qty.parse::<f64>()) else {
            continue;
        };
        let key = OrderedFloat(price);
        if qty == 0.0 {
            map.remove(&key);
        } else {
            map.insert(key, (level.price.clone(), level.qty.clone()));
        }
    }
}

pub struct OrderBook {
    pub exchange: ExchangeId,
    inner: RwLock<BookInner>,
    last_update_time: AtomicU64,
    update_count: AtomicU64,
}

impl OrderBook {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            inner: RwLock::new(BookInner::default()),
            last_update_time: AtomicU64::new(0),
            update_count: AtomicU64::new(0),
        }
    }

    /// Merge one normalized update. Deltas arriving before the first
    /// snapshot (on exchanges that replay from a snapshot) are discarded
    /// rather than producing a book that was never in a consistent state.
    pub fn apply(&self, update: &BookUpdate) -> Result<ApplyOutcome, EngineError> {
        let mut inner = self.inner.write();

        match update.kind {
            UpdateKind::Snapshot => {
                inner.bids.clear();
                inner.asks.clear();
                for &(price, qty) in &update.bids {
                    if qty > 0.0 {
                        inner.bids.insert(OrderedFloat(price), qty);
                    }
                }
                for &(price, qty) in &update.asks {
                    if qty > 0.0 {
                        inner.asks.insert(OrderedFloat(price), qty);
                    }
                }
                inner.snapshot_received = true;
            }
            UpdateKind::Delta => {
                if self.exchange.needs_snapshot() && !inner.snapshot_received {
                    return Ok(ApplyOutcome::Discarded);
                }
                for &(price, qty) in &update.bids {
                    let price = OrderedFloat(price);
                    if qty == 0.0 {
                        inner.bids.remove(&price);
                    } else {
                        inner.bids.insert(price, qty);
                    }
                }
                for &(price, qty) in &update.asks {
                    let price = OrderedFloat(price);
                    if qty == 0.0 {
                        inner.asks.remove(&price);
                    } else {
                        inner.asks.insert(price, qty);
                    }
                }
            }
        }
        merge_wire(&mut inner.bid_wire, &update.wire_bids, update.kind);
        merge_wire(&mut inner.ask_wire, &update.wire_asks, update.kind);

        if let Some(max) = self.exchange.max_depth() {
            // Bids keep the highest prices, asks the lowest.
            while inner.bids.len() > max {
                inner.bids.pop_first();
            }
            while inner.asks.len() > max {
                inner.asks.pop_last();
            }
            let BookInner { bids, asks, bid_wire, ask_wire, .. } = &mut *inner;
            bid_wire.retain(|price, _| bids.contains_key(price));
            ask_wire.retain(|price, _| asks.contains_key(price));
        }

        if let Some(expected) = update.checksum {
            let computed = checksum::book_crc32(&inner.ask_wire, &inner.bid_wire);
            if computed != expected {
                return Err(EngineError::Integrity { expected, computed });
            }
        }

        self.last_update_time
            .store(chrono::Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
        self.update_count.fetch_add(1, Ordering::Relaxed);
        Ok(ApplyOutcome::Applied)
    }

    /// Drop all state, including the snapshot flag. Used when a connection
    /// drops or an integrity check fails, so stale depth never leaks into
    /// the aggregated view.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.bids.clear();
        inner.asks.clear();
        inner.bid_wire.clear();
        inner.ask_wire.clear();
        inner.snapshot_received = false;
    }

    pub fn snapshot_received(&self) -> bool {
        self.inner.read().snapshot_received
    }

    /// Bids, best first (descending price).
    pub fn bid_levels(&self, depth: usize) -> Vec<(f64, f64)> {
        let inner = self.inner.read();
        inner
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(p, q)| (p.0, *q))
            .collect()
    }

    /// Asks, best first (ascending price).
    pub fn ask_levels(&self, depth: usize) -> Vec<(f64, f64)> {
        let inner = self.inner.read();
        inner.asks.iter().take(depth).map(|(p, q)| (p.0, *q)).collect()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.inner.read().bids.keys().next_back().map(|p| p.0)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.inner.read().asks.keys().next().map(|p| p.0)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.bids.is_empty() && inner.asks.is_empty()
    }

    pub fn latency_ms(&self) -> u64 {
        let last_update = self.last_update_time.load(Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp_millis() as u64;
        now.saturating_sub(last_update)
    }

    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::BookUpdate;

    #[test]
    fn snapshot_replaces_book_wholesale() {
        let book = OrderBook::new(ExchangeId::Bybit);
        book.apply(&BookUpdate::snapshot(
            vec![(50000.0, 1.5), (49999.0, 2.0)],
            vec![(50001.0, 1.3)],
        ))
        .unwrap();
        book.apply(&BookUpdate::snapshot(vec![(40000.0, 1.0)], vec![(40001.0, 1.0)]))
            .unwrap();

        assert_eq!(book.best_bid(), Some(40000.0));
        assert_eq!(book.best_ask(), Some(40001.0));
        assert_eq!(book.bid_levels(10).len(), 1);
    }

    #[test]
    fn delta_before_snapshot_is_discarded() {
        let book = OrderBook::new(ExchangeId::Bybit);
        let outcome = book
            .apply(&BookUpdate::delta(vec![(50000.0, 1.0)], vec![]))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Discarded);
        assert!(book.is_empty());
    }

    #[test]
    fn binance_stream_needs_no_gate() {
        // The partial depth stream is a rolling snapshot, so even a frame
        // tagged as a delta is safe to apply directly.
        let book = OrderBook::new(ExchangeId::Binance);
        let outcome = book
            .apply(&BookUpdate::delta(vec![(50000.0, 1.0)], vec![(50001.0, 1.0)]))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[test]
    fn zero_quantity_deletes_level() {
        let book = OrderBook::new(ExchangeId::Bybit);
        book.apply(&BookUpdate::snapshot(
            vec![(50000.0, 1.5), (49999.0, 2.0)],
            vec![(50001.0, 1.3)],
        ))
        .unwrap();
        book.apply(&BookUpdate::delta(vec![(50000.0, 0.0)], vec![]))
            .unwrap();

        assert_eq!(book.best_bid(), Some(49999.0));

        // Feeds may repeat a delete for a level that is already gone;
        // that is a plain no-op, not an error.
        let outcome = book
            .apply(&BookUpdate::delta(vec![(50000.0, 0.0)], vec![]))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(book.best_bid(), Some(49999.0));
        assert_eq!(book.bid_levels(10).len(), 1);
    }

    #[test]
    fn delta_upserts_existing_level() {
        let book = OrderBook::new(ExchangeId::Bybit);
        book.apply(&BookUpdate::snapshot(vec![(50000.0, 1.5)], vec![]))
            .unwrap();
        book.apply(&BookUpdate::delta(vec![(50000.0, 3.0)], vec![]))
            .unwrap();

        assert_eq!(book.bid_levels(1), vec![(50000.0, 3.0)]);
    }

    #[test]
    fn depth_is_bounded_keeping_best_levels() {
        let book = OrderBook::new(ExchangeId::Kraken); // max depth 25
        let bids: Vec<_> = (0..40).map(|i| (50000.0 - i as f64, 1.0)).collect();
        let asks: Vec<_> = (0..40).map(|i| (50001.0 + i as f64, 1.0)).collect();
        book.apply(&BookUpdate::snapshot(bids, asks)).unwrap();

        let bids = book.bid_levels(100);
        let asks = book.ask_levels(100);
        assert_eq!(bids.len(), 25);
        assert_eq!(asks.len(), 25);
        assert_eq!(bids[0].0, 50000.0);
        assert_eq!(asks[0].0, 50001.0);
    }

    /// A Kraken-style update carrying both parsed numbers and the level
    /// strings exactly as transmitted.
    fn wire_update(
        kind: UpdateKind,
        bids: &[(&str, &str)],
        asks: &[(&str, &str)],
    ) -> BookUpdate {
        let parse = |levels: &[(&str, &str)]| {
            levels
                .iter()
                .map(|(p, q)| (p.parse().unwrap(), q.parse().unwrap()))
                .collect::<Vec<(f64, f64)>>()
        };
        let raw = |levels: &[(&str, &str)]| {
            levels
                .iter()
                .map(|(p, q)| crate::exchange::RawLevel {
                    price: p.to_string(),
                    qty: q.to_string(),
                })
                .collect::<Vec<_>>()
        };
        let mut update = match kind {
            UpdateKind::Snapshot => BookUpdate::snapshot(parse(bids), parse(asks)),
            UpdateKind::Delta => BookUpdate::delta(parse(bids), parse(asks)),
        };
        update.wire_bids = raw(bids);
        update.wire_asks = raw(asks);
        update
    }

    #[test]
    fn checksum_mismatch_is_an_integrity_error() {
        let book = OrderBook::new(ExchangeId::Kraken);
        book.apply(&wire_update(
            UpdateKind::Snapshot,
            &[("50000.00000", "1.00000000")],
            &[("50001.00000", "1.00000000")],
        ))
        .unwrap();

        let mut update =
            wire_update(UpdateKind::Delta, &[("49999.00000", "2.00000000")], &[]);
        update.checksum = Some(1); // deliberately wrong
        let err = book.apply(&update).unwrap_err();
        assert!(matches!(err, EngineError::Integrity { .. }));
    }

    #[test]
    fn matching_checksum_passes() {
        // Five-decimal prices: the digest must hash the strings Kraken
        // sent, so the expected value is spelled from those exact digits.
        let book = OrderBook::new(ExchangeId::Kraken);
        book.apply(&wire_update(
            UpdateKind::Snapshot,
            &[("3538.70000", "1.20000000")],
            &[("3538.80000", "0.50000000")],
        ))
        .unwrap();

        let mut update =
            wire_update(UpdateKind::Delta, &[("3538.60000", "2.00000000")], &[]);
        update.checksum = Some(crc32fast::hash(
            b"35388000050000000353870000120000000353860000200000000",
        ));
        assert_eq!(book.apply(&update).unwrap(), ApplyOutcome::Applied);
    }

    #[test]
    fn clear_resets_snapshot_gate() {
        let book = OrderBook::new(ExchangeId::Okx);
        book.apply(&BookUpdate::snapshot(vec![(50000.0, 1.0)], vec![]))
            .unwrap();
        book.clear();

        assert!(book.is_empty());
        let outcome = book
            .apply(&BookUpdate::delta(vec![(50000.0, 1.0)], vec![]))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Discarded);
    }
}
