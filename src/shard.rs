//! Key-sharded parallel execution.
//!
//! Events are routed by a hash of their key to one of `shards` worker
//! threads. Each worker owns its own engine, so no engine state is shared;
//! a key always lands on the same worker and its events are applied in
//! arrival order. Workers append to a shared sink, which keeps per-key
//! output order but interleaves keys arbitrarily.

use crate::config::ConfigError;
use crate::core::engine::Engine;
use crate::core::output::{OutputSink, SinkError};
use crate::source::types::Event;
use crossbeam_channel::bounded;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

/// Queue depth between the router and each worker.
pub const SHARD_QUEUE_DEPTH: usize = 1_024;

/// Errors from a sharded run.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("shard count must be positive")]
    ZeroShards,
    #[error("engine construction failed: {0}")]
    Config(#[from] ConfigError),
    #[error("output sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("shard worker {0} panicked")]
    WorkerPanicked(usize),
}

/// Shard index for `key`.
pub fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

/// Run `events` through `shards` engines in parallel.
///
/// `factory` builds the engine for each shard index. `sink` is cloned into
/// every worker, so it should be a sink whose clones share storage, such as
/// [`SharedSink`](crate::core::output::SharedSink). The engines are returned
/// in shard order once every event has been applied.
pub fn run_sharded<E, F, I, S>(
    events: I,
    shards: usize,
    mut factory: F,
    sink: &S,
) -> Result<Vec<E>, ShardError>
where
    E: Engine + Send,
    F: FnMut(usize) -> Result<E, ConfigError>,
    I: IntoIterator<Item = Event>,
    S: OutputSink + Clone + Send,
{
    if shards == 0 {
        return Err(ShardError::ZeroShards);
    }
    let engines = (0..shards)
        .map(&mut factory)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(shards, "starting sharded run");

    thread::scope(|scope| {
        let mut senders = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards);

        for (id, mut engine) in engines.into_iter().enumerate() {
            let (sender, receiver) = bounded::<Event>(SHARD_QUEUE_DEPTH);
            let mut sink = sink.clone();
            senders.push(sender);
            workers.push(scope.spawn(move || -> Result<E, SinkError> {
                let mut processed = 0usize;
                for event in receiver.iter() {
                    for output in engine.feed(&event) {
                        sink.append(output.into())?;
                    }
                    processed += 1;
                }
                tracing::debug!(shard = id, processed, "shard drained");
                Ok(engine)
            }));
        }

        for event in events {
            let shard = shard_for(&event.key, shards);
            if senders[shard].send(event).is_err() {
                // Worker stopped on a sink error; surfaced by join below.
                break;
            }
        }
        drop(senders);

        workers
            .into_iter()
            .enumerate()
            .map(|(id, worker)| match worker.join() {
                Ok(result) => result.map_err(ShardError::from),
                Err(_) => Err(ShardError::WorkerPanicked(id)),
            })
            .collect()
    })
}
