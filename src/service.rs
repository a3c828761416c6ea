//! Async engine task.
//!
//! Wraps an engine in a tokio task fed through a channel. The only await
//! point is receiving the next event; each event is applied synchronously,
//! so cancelling the task between events leaves the engine whole. The
//! engine is handed back when the task ends.

use crate::core::engine::Engine;
use crate::core::output::OutputRecord;
use crate::source::types::Event;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Errors from the engine service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("engine task is no longer accepting events")]
    Closed,
    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Handle to a running engine task.
pub struct EngineHandle<E> {
    events: mpsc::Sender<Event>,
    outputs: mpsc::UnboundedReceiver<OutputRecord>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<E>,
}

/// Spawn `engine` on the current tokio runtime.
pub fn spawn_engine<E>(engine: E, queue_depth: usize) -> EngineHandle<E>
where
    E: Engine + Send + 'static,
{
    let (events_tx, events_rx) = mpsc::channel(queue_depth.max(1));
    let (outputs_tx, outputs_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(run_engine(engine, events_rx, outputs_tx, shutdown_rx));

    EngineHandle {
        events: events_tx,
        outputs: outputs_rx,
        shutdown: shutdown_tx,
        task,
    }
}

async fn run_engine<E: Engine>(
    mut engine: E,
    mut events: mpsc::Receiver<Event>,
    outputs: mpsc::UnboundedSender<OutputRecord>,
    mut shutdown: oneshot::Receiver<()>,
) -> E {
    let mut processed = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(engine = engine.name(), processed, "engine service cancelled");
                break;
            }
            next = events.recv() => match next {
                Some(event) => {
                    for record in engine.feed(&event) {
                        if outputs.send(record.into()).is_err() {
                            tracing::debug!("output receiver dropped");
                        }
                    }
                    processed += 1;
                }
                None => {
                    tracing::debug!(engine = engine.name(), processed, "event stream closed");
                    break;
                }
            }
        }
    }
    engine
}

impl<E> EngineHandle<E> {
    /// A sender for feeding events from other tasks.
    ///
    /// Clones keep the event stream open; drop them before [`finish`](Self::finish).
    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    /// Queue one event, waiting for space.
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.events.send(event).await.map_err(|_| ServiceError::Closed)
    }

    /// Wait for the next output record.
    pub async fn recv(&mut self) -> Option<OutputRecord> {
        self.outputs.recv().await
    }

    /// Take an output record if one is ready.
    pub fn try_recv(&mut self) -> Option<OutputRecord> {
        self.outputs.try_recv().ok()
    }

    /// Close the event stream, let the task apply everything queued and
    /// return the engine with any outputs not yet received.
    pub async fn finish(self) -> Result<(E, Vec<OutputRecord>), ServiceError> {
        let EngineHandle {
            events,
            mut outputs,
            shutdown,
            task,
        } = self;
        drop(events);
        let engine = task.await?;
        drop(shutdown);

        let mut remaining = Vec::new();
        while let Ok(record) = outputs.try_recv() {
            remaining.push(record);
        }
        Ok((engine, remaining))
    }

    /// Stop consuming immediately and return the engine as it stands.
    /// Queued events that were not yet applied are dropped.
    pub async fn cancel(self) -> Result<E, ServiceError> {
        let _ = self.shutdown.send(());
        Ok(self.task.await?)
    }
}
