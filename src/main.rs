//! tickpulse daemon
//!
//! Runs the feed (live websocket or seeded synthetic market) and a fixed
//! cadence evaluation loop, logging new alerts and a periodic status line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickpulse::alerts::AlertPriority;
use tickpulse::config::{AppConfig, FeedMode};
use tickpulse::feed::FeedConnector;
use tickpulse::store::StateStore;
use tickpulse::synthetic::SyntheticMarket;
use tickpulse::MonitorSession;

/// Status line every this many evaluation ticks
const STATUS_EVERY_TICKS: u64 = 20;
const SYNTHETIC_TRADE_INTERVAL: Duration = Duration::from_millis(100);
const SYNTHETIC_BACKFILL: usize = 300;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let config = AppConfig::from_env();

    info!(
        mode = ?config.feed_mode,
        url = %config.feed.url,
        eval_interval_ms = config.eval_interval_ms,
        "tickpulse starting"
    );

    let store = Arc::new(StateStore::new(config.buffers.clone()));
    let mut session = MonitorSession::new(&config, Arc::clone(&store));

    let connector = match config.feed_mode {
        FeedMode::Live => {
            let connector = FeedConnector::new(config.feed.clone(), Arc::clone(&store));
            connector.start().context("failed to start feed connector")?;
            Some(connector)
        }
        FeedMode::Synthetic => {
            let mut market =
                SyntheticMarket::new(config.synthetic_seed, config.synthetic_scenario)
                    .context("invalid synthetic market parameters")?;
            market.seed_store(&store, Utc::now(), SYNTHETIC_BACKFILL);
            info!(
                seed = config.synthetic_seed,
                scenario = %config.synthetic_scenario,
                "synthetic feed seeded"
            );

            let feed_store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut ticker = interval(SYNTHETIC_TRADE_INTERVAL);
                loop {
                    ticker.tick().await;
                    market.tick(&feed_store, Utc::now());
                }
            });
            None
        }
    };

    let mut eval = interval(config.eval_interval());
    eval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = eval.tick() => {
                let out = session.tick(None, None);
                ticks += 1;

                for alert in &out.new_alerts {
                    match alert.priority {
                        AlertPriority::Critical | AlertPriority::High => {
                            warn!(rule = %alert.rule_id, priority = %alert.priority, "{}", alert.message)
                        }
                        _ => info!(rule = %alert.rule_id, priority = %alert.priority, "{}", alert.message),
                    }
                }

                if ticks % STATUS_EVERY_TICKS == 0 {
                    let status = session.status(connector.as_deref());
                    let top = out.insights.first().map(|i| i.message.as_str()).unwrap_or("-");
                    info!(
                        status = %status.connection_status,
                        price = out.features.current_price,
                        spread_bps = out.features.spread_bps,
                        volatility_bps = out.features.volatility_bps,
                        velocity = out.features.velocity,
                        trades = status.buffers.trades,
                        errors = status.error_count,
                        top_insight = top,
                        "status"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    if let Some(connector) = connector {
        // stop() blocks for up to the configured stop timeout
        let stopped = tokio::task::spawn_blocking(move || connector.stop())
            .await
            .unwrap_or(false);
        if !stopped {
            warn!("feed connector did not stop cleanly");
        }
    }

    info!(ticks, "tickpulse stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickpulse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
