//! One writer thread, several reader threads, one store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};

use tickpulse::config::BufferConfig;
use tickpulse::models::{DepthSnapshot, Trade};
use tickpulse::store::StateStore;

const WRITES: u64 = 5_000;

#[test]
fn readers_never_see_torn_or_oversized_state() {
    let config = BufferConfig {
        trades: 256,
        depth: 32,
        ..BufferConfig::default()
    };
    let store = Arc::new(StateStore::new(config));
    let done = Arc::new(AtomicBool::new(false));
    let start = Utc::now();

    let writer = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for i in 0..WRITES {
                let ts = start + Duration::milliseconds(i as i64);
                let price = 100.0 + (i % 7) as f64 * 0.01;
                store.add_trade(Trade::new(ts, price, 0.5, i % 3 == 0, i));
                if i % 5 == 0 {
                    let bid_qty = 1.0 + (i % 4) as f64;
                    store.add_depth(DepthSnapshot::top_of_book(ts, price - 0.01, bid_qty, price + 0.01, 2.0));
                }
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0u64;
                while !done.load(Ordering::SeqCst) || reads < 100 {
                    let trades = store.recent_trades(1_000);
                    assert!(trades.len() <= 256);
                    assert!(trades.windows(2).all(|w| w[0].trade_id < w[1].trade_id));

                    let market = store.market();
                    assert!(market.spread_bps >= 0.0);
                    if market.best_bid > 0.0 {
                        assert!(market.best_bid < market.best_ask);
                    }

                    let sizes = store.buffer_sizes();
                    assert!(sizes.trades <= 256 && sizes.depth <= 32);
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        assert!(r.join().unwrap() >= 100);
    }

    let trades = store.all_trades();
    assert_eq!(trades.len(), 256);
    assert_eq!(trades.last().map(|t| t.trade_id), Some(WRITES - 1));
    assert_eq!(trades.first().map(|t| t.trade_id), Some(WRITES - 256));
    assert_eq!(store.buffer_sizes().depth, 32);
}
