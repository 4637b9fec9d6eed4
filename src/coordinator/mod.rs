//! Owns the registry of live connections and republishes every
//! aggregation pass on a watch channel. The watch channel is the entire
//! presentation contract: consumers render or persist it however they
//! like without touching engine state.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::info;

use crate::aggregate::{aggregate, AggregatedBook, AggregationSettings, BookView};
use crate::connection::{ConnStatus, ConnectionConfig, ConnectionHandle, EngineEvent};
use crate::exchange::{ExchangeId, ALL_EXCHANGES};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusSummary {
    pub ready: usize,
    pub connecting: usize,
    pub error: usize,
    pub total: usize,
}

/// Per-feed health line for the status indicator.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FeedStatus {
    pub exchange: ExchangeId,
    pub status: ConnStatus,
    /// Milliseconds since the last applied update.
    pub latency_ms: u64,
    pub update_count: u64,
}

pub struct Coordinator {
    connections: DashMap<ExchangeId, ConnectionHandle>,
    symbol: RwLock<String>,
    settings: RwLock<AggregationSettings>,
    conn_config: ConnectionConfig,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<EngineEvent>>,
    output: watch::Sender<AggregatedBook>,
}

impl Coordinator {
    pub fn new(
        symbol: String,
        settings: AggregationSettings,
        conn_config: ConnectionConfig,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (output, _) = watch::channel(AggregatedBook::default());
        Arc::new(Self {
            connections: DashMap::new(),
            symbol: RwLock::new(symbol),
            settings: RwLock::new(settings),
            conn_config,
            events_tx,
            events_rx: Mutex::new(events_rx),
            output,
        })
    }

    /// Subscribe to aggregation output. Always yields the latest pass.
    pub fn subscribe(&self) -> watch::Receiver<AggregatedBook> {
        self.output.subscribe()
    }

    pub fn symbol(&self) -> String {
        self.symbol.read().clone()
    }

    /// Bring an exchange into the aggregation set. Idempotent.
    pub fn select(&self, exchange: ExchangeId) {
        if self.connections.contains_key(&exchange) {
            return;
        }
        info!("selecting {exchange}");
        let handle = ConnectionHandle::spawn(
            exchange,
            &self.symbol(),
            self.conn_config.clone(),
            self.events_tx.clone(),
        );
        self.connections.insert(exchange, handle);
        self.aggregate_now();
    }

    /// Remove an exchange, tearing its connection down and dropping its
    /// levels from the next pass.
    pub async fn deselect(&self, exchange: ExchangeId) {
        if let Some((_, handle)) = self.connections.remove(&exchange) {
            info!("deselecting {exchange}");
            handle.shutdown().await;
            self.aggregate_now();
        }
    }

    /// Switch every live connection to a new symbol. Old books never leak
    /// into the new symbol's output: all connections are fully torn down
    /// before any new one is spawned.
    pub async fn set_symbol(&self, symbol: String) {
        if *self.symbol.read() == symbol {
            return;
        }
        info!("switching symbol to {symbol}");
        let selected: Vec<ExchangeId> =
            self.connections.iter().map(|e| *e.key()).collect();
        for exchange in &selected {
            if let Some((_, handle)) = self.connections.remove(exchange) {
                handle.shutdown().await;
            }
        }
        *self.symbol.write() = symbol;
        for exchange in selected {
            self.select(exchange);
        }
        self.aggregate_now();
    }

    pub fn update_settings(&self, settings: AggregationSettings) {
        *self.settings.write() = settings;
        self.aggregate_now();
    }

    pub fn settings(&self) -> AggregationSettings {
        self.settings.read().clone()
    }

    /// Per-exchange status in registry order, for the status indicator.
    pub fn statuses(&self) -> Vec<FeedStatus> {
        ALL_EXCHANGES
            .iter()
            .filter_map(|ex| {
                self.connections.get(ex).map(|h| FeedStatus {
                    exchange: *ex,
                    status: h.status(),
                    latency_ms: h.book().latency_ms(),
                    update_count: h.book().update_count(),
                })
            })
            .collect()
    }

    pub fn status_summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for entry in self.connections.iter() {
            summary.total += 1;
            match entry.status() {
                ConnStatus::Ready => summary.ready += 1,
                ConnStatus::Connecting | ConnStatus::Connected | ConnStatus::FetchingAuxData => {
                    summary.connecting += 1
                }
                ConnStatus::Error => summary.error += 1,
                _ => {}
            }
        }
        summary
    }

    /// Run one aggregation pass over the currently ready connections and
    /// publish it. Views are copied out in registry order so equal-price
    /// tie-breaks stay stable between passes.
    pub fn aggregate_now(&self) {
        let settings = self.settings.read().clone();
        let views: Vec<BookView> = ALL_EXCHANGES
            .iter()
            .filter_map(|ex| self.connections.get(ex))
            .filter_map(|handle| handle.view(settings.depth))
            .collect();
        let book = aggregate(&views, &settings);
        self.output.send_replace(book);
    }

    /// Event pump: re-aggregate whenever any connection's book or status
    /// changes. Bursts are coalesced into a single pass.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.events_rx.lock().await;
        while rx.recv().await.is_some() {
            while rx.try_recv().is_ok() {}
            self.aggregate_now();
        }
    }

    /// Tear down everything. Used on shutdown.
    pub async fn close(&self) {
        let selected: Vec<ExchangeId> =
            self.connections.iter().map(|e| *e.key()).collect();
        for exchange in selected {
            if let Some((_, handle)) = self.connections.remove(&exchange) {
                handle.shutdown().await;
            }
        }
    }
}
