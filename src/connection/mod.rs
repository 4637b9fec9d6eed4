//! One WebSocket connection per exchange: connect, subscribe, keep alive,
//! feed the book store, reconnect with bounded backoff. A connection only
//! ever mutates its own book and status; failures are contained here and
//! reported upward as status changes.

use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::auxdata::{AuxClient, AuxData};
use crate::book::{ApplyOutcome, OrderBook};
use crate::error::EngineError;
use crate::exchange::{ExchangeId, Parsed, RawFrame, UpdateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnStatus {
    Disconnected,
    Connecting,
    Connected,
    FetchingAuxData,
    Ready,
    Error,
    Closing,
    /// Symbol not listed on this exchange; no connection is ever attempted.
    Unsupported,
}

impl ConnStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Notifications from connection tasks to the coordinator.
#[derive(Debug, Clone, Copy)]
pub enum EngineEvent {
    BookChanged(ExchangeId),
    StatusChanged(ExchangeId, ConnStatus),
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_retries: u32,
    pub backoff_cap_secs: u64,
    /// Consecutive malformed frames tolerated before the connection is
    /// treated as broken and recycled.
    pub protocol_error_limit: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { max_retries: 10, backoff_cap_secs: 60, protocol_error_limit: 5 }
    }
}

/// Handle to a live (or permanently failed) connection. Dropping the
/// handle does not stop the task; call [`ConnectionHandle::shutdown`].
pub struct ConnectionHandle {
    pub exchange: ExchangeId,
    book: Arc<OrderBook>,
    status: Arc<RwLock<ConnStatus>>,
    aux: Arc<RwLock<AuxData>>,
    shutdown: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Spawn the connection task. An unsupported symbol short-circuits to
    /// `Unsupported` without spawning anything.
    pub fn spawn(
        exchange: ExchangeId,
        symbol: &str,
        config: ConnectionConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let book = Arc::new(OrderBook::new(exchange));
        let status = Arc::new(RwLock::new(ConnStatus::Disconnected));
        let aux = Arc::new(RwLock::new(AuxData::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let formatted = match exchange.format_symbol(symbol) {
            Ok(f) => f,
            Err(e) => {
                warn!("{}: {e}", exchange.name());
                *status.write() = ConnStatus::Unsupported;
                let _ = events.send(EngineEvent::StatusChanged(exchange, ConnStatus::Unsupported));
                return Self { exchange, book, status, aux, shutdown: shutdown_tx, task: None };
            }
        };

        let ctx = ConnCtx {
            exchange,
            formatted_symbol: formatted,
            book: book.clone(),
            status: status.clone(),
            aux: aux.clone(),
            events,
            config,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(run(ctx));
        Self { exchange, book, status, aux, shutdown: shutdown_tx, task: Some(task) }
    }

    pub fn status(&self) -> ConnStatus {
        *self.status.read()
    }

    pub fn book(&self) -> &Arc<OrderBook> {
        &self.book
    }

    pub fn aux(&self) -> AuxData {
        *self.aux.read()
    }

    /// Copy out this connection's book for aggregation, or `None` when the
    /// connection is not ready.
    pub fn view(&self, depth: usize) -> Option<crate::aggregate::BookView> {
        if !self.status().is_ready() {
            return None;
        }
        Some(crate::aggregate::BookView {
            exchange: self.exchange,
            bids: self.book.bid_levels(depth),
            asks: self.book.ask_levels(depth),
            taker_fee: self.aux.read().fees.taker,
        })
    }

    /// Cooperative teardown. The shutdown channel is owned by this handle
    /// instance, so a retry timer scheduled by this task can never fire
    /// into a connection created later for the same exchange.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

struct ConnCtx {
    exchange: ExchangeId,
    formatted_symbol: String,
    book: Arc<OrderBook>,
    status: Arc<RwLock<ConnStatus>>,
    aux: Arc<RwLock<AuxData>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    config: ConnectionConfig,
    shutdown: watch::Receiver<bool>,
}

impl ConnCtx {
    fn set_status(&self, status: ConnStatus) {
        let mut current = self.status.write();
        if *current != status {
            *current = status;
            drop(current);
            let _ = self.events.send(EngineEvent::StatusChanged(self.exchange, status));
        }
    }
}

/// Backoff before retry `n` (1-based): 2^n seconds, capped.
fn backoff_secs(retries: u32, cap_secs: u64) -> u64 {
    min(1u64 << min(retries, 16), cap_secs)
}

enum SessionEnd {
    /// Teardown requested; the run loop must exit without reconnecting.
    Shutdown,
}

async fn run(mut ctx: ConnCtx) {
    let max_retries = ctx.exchange.max_retries().unwrap_or(ctx.config.max_retries);
    let aux_client = AuxClient::new();
    let url = ctx.exchange.ws_url(&ctx.formatted_symbol);
    let mut retries = 0u32;

    loop {
        ctx.set_status(ConnStatus::Connecting);
        info!("{}: connecting to {url}", ctx.exchange.name());

        let session_result = tokio::select! {
            _ = ctx.shutdown.changed() => break,
            connected = connect_async(&url) => match connected {
                Ok((ws, _response)) => {
                    ctx.set_status(ConnStatus::Connected);
                    retries = 0;

                    ctx.set_status(ConnStatus::FetchingAuxData);
                    let aux = aux_client.fetch(ctx.exchange, &ctx.formatted_symbol).await;
                    *ctx.aux.write() = aux;

                    session(&mut ctx, ws).await
                }
                Err(e) => Err(EngineError::from(e)),
            },
        };

        // Whatever ended the session, the book is stale now.
        ctx.book.clear();
        let _ = ctx.events.send(EngineEvent::BookChanged(ctx.exchange));

        match session_result {
            Ok(SessionEnd::Shutdown) => break,
            Err(e) => {
                error!("{}: {e}", ctx.exchange.name());
                ctx.set_status(ConnStatus::Error);
                retries += 1;
                if retries > max_retries {
                    error!(
                        "{}: giving up after {max_retries} retries",
                        ctx.exchange.name()
                    );
                    return; // permanent Error, no Disconnected transition
                }
                let delay = backoff_secs(retries, ctx.config.backoff_cap_secs);
                warn!("{}: reconnecting in {delay}s (attempt {retries})", ctx.exchange.name());
                tokio::select! {
                    _ = ctx.shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                }
            }
        }
    }

    ctx.set_status(ConnStatus::Disconnected);
}

async fn session(
    ctx: &mut ConnCtx,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Result<SessionEnd, EngineError> {
    let (mut write, mut read) = ws.split();

    if let Some(sub) = ctx.exchange.subscribe_message(&ctx.formatted_symbol) {
        debug!("{}: subscribing: {sub}", ctx.exchange.name());
        write.send(Message::Text(sub)).await?;
    }

    // Streams without a snapshot phase are usable immediately.
    if !ctx.exchange.needs_snapshot() {
        ctx.set_status(ConnStatus::Ready);
    }

    let keepalive = ctx.exchange.keepalive();
    let mut keepalive_timer = tokio::time::interval(
        keepalive.as_ref().map(|(d, _)| *d).unwrap_or(Duration::from_secs(3600)),
    );
    keepalive_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive_timer.reset();

    let mut protocol_errors = 0u32;

    loop {
        tokio::select! {
            _ = ctx.shutdown.changed() => {
                ctx.set_status(ConnStatus::Closing);
                if let Some(unsub) = ctx.exchange.unsubscribe_message(&ctx.formatted_symbol) {
                    let _ = write.send(Message::Text(unsub)).await;
                }
                let _ = write.close().await;
                return Ok(SessionEnd::Shutdown);
            }
            _ = keepalive_timer.tick(), if keepalive.is_some() => {
                let (_, payload) = keepalive.as_ref().unwrap();
                write.send(Message::Text(payload.clone())).await?;
            }
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(EngineError::transport("stream ended")),
                };
                // Frames are handled strictly in arrival order; deltas must
                // never be applied out of sequence.
                match msg {
                    Message::Text(text) => {
                        handle_frame(ctx, &mut write, RawFrame::Text(&text), &mut protocol_errors).await?;
                    }
                    Message::Binary(bytes) => {
                        handle_frame(ctx, &mut write, RawFrame::Binary(&bytes), &mut protocol_errors).await?;
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Message::Pong(_) => debug!("{}: pong", ctx.exchange.name()),
                    Message::Close(frame) => {
                        return Err(EngineError::transport(format!(
                            "server closed connection: {frame:?}"
                        )));
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn handle_frame<W>(
    ctx: &ConnCtx,
    write: &mut W,
    frame: RawFrame<'_>,
    protocol_errors: &mut u32,
) -> Result<(), EngineError>
where
    W: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    match ctx.exchange.parse_frame(frame, ctx.book.snapshot_received()) {
        Ok(Parsed::Book(update)) => {
            *protocol_errors = 0;
            match ctx.book.apply(&update) {
                Ok(ApplyOutcome::Applied) => {
                    if update.kind == UpdateKind::Snapshot && !ctx.status.read().is_ready() {
                        ctx.set_status(ConnStatus::Ready);
                    }
                    let _ = ctx.events.send(EngineEvent::BookChanged(ctx.exchange));
                }
                Ok(ApplyOutcome::Discarded) => {
                    debug!("{}: delta discarded before snapshot", ctx.exchange.name());
                }
                Err(e @ EngineError::Integrity { .. }) => {
                    // Book can no longer be trusted; resubscribe from scratch.
                    ctx.book.clear();
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }
        Ok(Parsed::Reply(payload)) => {
            *protocol_errors = 0;
            write.send(Message::Text(payload)).await?;
            Ok(())
        }
        Ok(Parsed::Ignore) => {
            *protocol_errors = 0;
            Ok(())
        }
        Err(EngineError::Protocol(msg)) => {
            *protocol_errors += 1;
            warn!(
                "{}: dropping malformed frame ({}/{}): {msg}",
                ctx.exchange.name(),
                protocol_errors,
                ctx.config.protocol_error_limit
            );
            if *protocol_errors >= ctx.config.protocol_error_limit {
                return Err(EngineError::transport(
                    "too many consecutive malformed frames",
                ));
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_secs(1, 60), 2);
        assert_eq!(backoff_secs(2, 60), 4);
        assert_eq!(backoff_secs(5, 60), 32);
        assert_eq!(backoff_secs(6, 60), 60);
        assert_eq!(backoff_secs(40, 60), 60); // shift stays bounded
    }

    #[tokio::test]
    async fn unsupported_symbol_never_connects() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::spawn(
            ExchangeId::Kraken,
            "SHIBUSDT",
            ConnectionConfig::default(),
            tx,
        );
        assert_eq!(handle.status(), ConnStatus::Unsupported);
        assert!(handle.view(10).is_none());
        match rx.recv().await {
            Some(EngineEvent::StatusChanged(ExchangeId::Kraken, ConnStatus::Unsupported)) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await; // no task to join, must not hang
    }

    #[tokio::test]
    async fn view_requires_ready_status() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::spawn(
            ExchangeId::Bybit,
            "BTCUSDT",
            ConnectionConfig { max_retries: 0, ..Default::default() },
            tx,
        );
        // Freshly spawned, nothing applied yet.
        assert!(handle.view(10).is_none());
        handle.shutdown().await;
    }
}
