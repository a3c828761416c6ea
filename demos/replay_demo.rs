//! Replay a synthetic quote stream through every engine.
//!
//! Run with: cargo run --example replay_demo

use std::time::Duration;
use streamfold::config::Config;
use streamfold::core::{AnyEngine, Engine, EngineKind, OutputRecord, SharedSink};
use streamfold::shard::run_sharded;
use streamfold::source::Event;

fn quotes() -> Vec<Event> {
    let symbols = ["AAPL", "MSFT", "NVDA"];
    (0..30)
        .map(|i| {
            let symbol = symbols[i % symbols.len()];
            let price = 100.0 + (i as f64 * 0.37).sin() * 5.0;
            Event::new(i as i64 * 5_000, symbol)
                .with_field("price", price)
                .with_field("volume", (10 + i % 4) as f64)
                .with_field("value", price)
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.hopping.window_size = Duration::from_secs(30);
    config.hopping.step = Duration::from_secs(10);

    let events = quotes();

    for kind in [EngineKind::Hopping, EngineKind::Sliding, EngineKind::CrossSectional] {
        let mut engine = AnyEngine::build(kind, &config)?;
        let records = engine.feed_all(&events);

        println!("== {kind}: {} records", records.len());
        for record in records.iter().rev().take(3).rev() {
            println!("{}", serde_json::to_string(record)?);
        }
        println!("{}", engine.stats().summary());
        println!();
    }

    // Same sliding run split across two shards
    let sink = SharedSink::new();
    let engines = run_sharded(
        events,
        2,
        |_| AnyEngine::build(EngineKind::Sliding, &config),
        &sink,
    )?;
    let primed = sink
        .snapshot()
        .iter()
        .filter(|r| matches!(r, OutputRecord::Sliding(s) if s.value.is_some()))
        .count();
    println!(
        "== sharded sliding: {} shards, {} records, {primed} primed",
        engines.len(),
        sink.len()
    );

    Ok(())
}
