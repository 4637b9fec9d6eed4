use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use orderbook_aggregator::config::Config;
use orderbook_aggregator::coordinator::Coordinator;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let level: Level = config.performance.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🚀 Order Book Aggregator - Starting...");
    info!("✅ Configuration loaded");
    info!("   Symbol: {}", config.feed.symbol);
    info!(
        "   Exchanges: {}",
        config
            .feed
            .exchanges
            .iter()
            .map(|e| e.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("   Mode: {:?}", config.view.mode);

    let coordinator = Coordinator::new(
        config.feed.symbol.clone(),
        config.view.aggregation_settings(),
        config.connection.connection_config(),
    );

    for exchange in &config.feed.exchanges {
        coordinator.select(*exchange);
    }

    let pump_task = tokio::spawn(coordinator.clone().run());

    // Console consumer: print the aggregated top of book periodically.
    let consumer_task = {
        let coordinator = coordinator.clone();
        let interval_secs = config.performance.print_interval_secs;
        tokio::spawn(async move {
            let output = coordinator.subscribe();
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let summary = coordinator.status_summary();
                let book = output.borrow().clone();
                match (book.best_bid, book.best_ask) {
                    (Some(bid), Some(ask)) => {
                        info!(
                            "📊 {} | Bid: ${:.2} | Ask: ${:.2} | Spread: {:.4}% | Levels: {}/{} | Feeds: {}/{} ready",
                            coordinator.symbol(),
                            bid,
                            ask,
                            book.spread_pct.unwrap_or(0.0),
                            book.bids.len(),
                            book.asks.len(),
                            summary.ready,
                            summary.total,
                        );
                        let feeds: Vec<String> = coordinator
                            .statuses()
                            .iter()
                            .map(|f| {
                                format!(
                                    "{}:{:?} {}ms/{}u",
                                    f.exchange.tag(),
                                    f.status,
                                    f.latency_ms,
                                    f.update_count,
                                )
                            })
                            .collect();
                        info!("   {}", feeds.join(" | "));
                        if let Some(crossed) = &book.crossed {
                            warn!(
                                "⚡ Crossed market: profit ${:.2} ({:.2}%) buy {:?} sell {:?}",
                                crossed.profit,
                                crossed.profit_pct,
                                crossed.buy_exchange,
                                crossed.sell_exchange,
                            );
                        }
                    }
                    _ => info!(
                        "📊 {} | waiting for data | Feeds: {}/{} ready",
                        coordinator.symbol(),
                        summary.ready,
                        summary.total,
                    ),
                }
            }
        })
    };

    info!("✅ All tasks started");

    tokio::select! {
        result = pump_task => {
            if let Err(e) = result {
                warn!("Event pump error: {}", e);
            }
        }
        result = consumer_task => {
            if let Err(e) = result {
                warn!("Consumer task error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    coordinator.close().await;
    info!("👋 Aggregator stopped");
    Ok(())
}
