// ===============================
// src/main.rs
// ===============================
/*
 # paper-trade the mock market and watch it
 cargo run --release -- --timesteps 20000 --record-file data/events.jsonl
 curl -s localhost:9898/metrics | egrep '^(orders_total|position|pnl_)'

 # replay recorded snapshots
 cargo run --release -- --feed-mode replay --replay-file data/day0.jsonl
*/
/*
=============================================================================
Project : prosperity_trader: per-timestep multi-product trading engine
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Fair-value estimation, inventory-aware market making, composite
          statistical arbitrage and conversion arbitrage for a simulated
          multi-product exchange, with a replay / paper-trading driver,
          Prometheus metrics and JSONL event recording.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod recorder;
mod feed;
mod book;
mod memory;
mod fair_value;
mod strategy;
mod risk;
mod basket;
mod conversion;
mod trader;
mod gateway;          // paper venue (taker fills + conversions)
mod positions;

use std::collections::BTreeMap;
use tokio::{
    select,
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::domain::{Decision, Event, MarketSnapshot, OwnTrade};
use crate::gateway::PaperExchange;
use crate::trader::Trader;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Config ----
    let (args, limits) = config::load();
    let table = match config::strategy_table(&args) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "invalid strategy table");
            return;
        }
    };

    // ---- Metrics ----
    metrics::init();
    if args.metrics_port != 0 {
        metrics::serve_metrics(args.metrics_port);
    }

    let strategies: Vec<&str> = table.products.keys().map(|s| s.as_str()).collect();
    let composites: Vec<&str> = table.composites.iter().map(|c| c.symbol.as_str()).collect();
    info!(
        feed_mode = args.feed_mode.as_str(),
        products = ?args.products,
        timesteps = args.timesteps,
        seed = args.seed,
        starfruit_estimator = ?args.starfruit_estimator,
        strategies = ?strategies,
        composites = ?composites,
        "startup config"
    );
    metrics::CONFIG_FEED_MODE.with_label_values(&[args.feed_mode.as_str()]).set(1);

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let recorder = args.record_file.clone().map(|path| tokio::spawn(recorder::run(rec_rx, path)));

    // ---- Feed ----
    let (snap_tx, mut snap_rx) = mpsc::channel::<MarketSnapshot>(256);
    match args.feed_mode {
        config::FeedMode::Mock => {
            tokio::spawn(feed::run_mock(snap_tx, args.products.clone(), args.timesteps, args.seed));
        }
        config::FeedMode::Replay => {
            let Some(path) = args.replay_file.clone() else {
                error!("--feed-mode replay needs --replay-file / REPLAY_FILE");
                return;
            };
            tokio::spawn(async move {
                if let Err(e) = feed::run_replay(path, snap_tx).await {
                    error!(error = %e, "replay aborted");
                }
            });
        }
    }

    // ---- Engine loop ----
    let trader = Trader::new(table, limits.clone());
    for s in trader.limits().symbols() {
        if let Some(l) = trader.limits().limit_of(s) {
            metrics::CONFIG_LIMIT.with_label_values(&[s]).set(l);
        }
    }
    let mut exchange = PaperExchange::new(limits);
    let mut trader_data = String::new();
    let mut own_trades: BTreeMap<String, Vec<OwnTrade>> = BTreeMap::new();
    let recording = recorder.is_some();
    let record = |ev: Event| {
        if recording {
            let _ = rec_tx.try_send(ev);
        }
    };

    let mut heartbeat = interval(Duration::from_secs(1));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut steps: u64 = 0;
    let mut since_beat: u64 = 0;

    loop {
        select! {
            maybe_snap = snap_rx.recv() => {
                let Some(snap) = maybe_snap else {
                    info!("feed exhausted");
                    break;
                };
                let state = exchange.trading_state(&snap, std::mem::take(&mut trader_data), std::mem::take(&mut own_trades));
                let out = match trader.run(&state) {
                    Ok(o) => o,
                    Err(e) => {
                        error!(error = %e, timestamp = snap.timestamp, "trader failed, stopping");
                        record(Event::Note(format!("fatal at {}: {e}", snap.timestamp)));
                        break;
                    }
                };
                debug!(
                    timestamp = snap.timestamp,
                    orders = out.order_count(),
                    conversions = out.conversions,
                    "decision"
                );
                metrics::TIMESTEPS.inc();
                steps += 1;
                since_beat += 1;

                let exec = exchange.execute(&snap, &out);
                if let Some((symbol, qty, price)) = &exec.conversion {
                    record(Event::Note(format!("conversion {symbol} {qty} @ {price:.2}")));
                } else if out.conversions != 0 {
                    warn!(requested = out.conversions, "conversion request had nothing to close");
                }

                record(Event::Snapshot(snap.clone()));
                record(Event::Decision(Decision {
                    timestamp: snap.timestamp,
                    orders: out.orders,
                    conversions: out.conversions,
                }));
                for f in exec.fills {
                    record(Event::Fill(f));
                }
                trader_data = out.trader_data;
                own_trades = exec.own_trades;
            }
            _ = heartbeat.tick() => {
                info!(
                    steps = since_beat,
                    realized = exchange.ledger().realized(),
                    unrealized = exchange.ledger().unrealized(),
                    "heartbeat"
                );
                since_beat = 0;
            }
        }
    }

    let ledger = exchange.ledger();
    for (symbol, qty) in ledger.positions().filter(|(_, q)| *q != 0) {
        if let Some(b) = ledger.get(symbol) {
            info!(symbol, qty, avg_cost = b.avg_cost, realized = b.realized, unrealized = b.unrealized, "open position");
        }
    }
    info!(steps, realized = ledger.realized(), unrealized = ledger.unrealized(), "session finished");

    drop(record);
    drop(rec_tx);
    if let Some(handle) = recorder {
        let _ = handle.await;
    }
}
