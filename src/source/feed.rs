//! Background event feed.
//!
//! Decodes events on a dedicated thread and hands them to the consumer over
//! a bounded channel, so the consumer loop can poll for shutdown between
//! events instead of blocking inside a read.

use crate::source::reader::{JsonLinesReader, SourceError};
use crate::source::types::Event;
use crossbeam_channel::{bounded, Receiver};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Default queue depth between the decoding thread and the consumer.
pub const DEFAULT_QUEUE_DEPTH: usize = 10_000;

/// A running decoder thread and the receiving end of its queue.
pub struct ChannelFeed {
    receiver: Receiver<Result<Event, SourceError>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<usize>>,
}

impl ChannelFeed {
    /// Start decoding `input` on a background thread.
    pub fn spawn<R>(input: R, queue_depth: usize) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (sender, receiver) = bounded(queue_depth.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::spawn(move || {
            let mut sent = 0usize;
            for item in JsonLinesReader::new(input) {
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if sender.send(item).is_err() {
                    break;
                }
                sent += 1;
            }
            tracing::debug!(sent, "event feed finished");
            sent
        });

        Self {
            receiver,
            running,
            handle: Some(handle),
        }
    }

    /// Get the receiver for decoded events.
    pub fn receiver(&self) -> &Receiver<Result<Event, SourceError>> {
        &self.receiver
    }

    /// Check if the decoder thread is still allowed to produce.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the decoder thread to stop after its current line.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the decoder and wait for it, returning how many items it queued.
    pub fn join(mut self) -> usize {
        self.stop();
        // Unblock a producer waiting on a full queue.
        while self.receiver.try_recv().is_ok() {}
        let handle = self.handle.take();
        drop(self.receiver);
        handle.and_then(|h| h.join().ok()).unwrap_or(0)
    }
}
