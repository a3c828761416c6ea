//! Per-key arrival-order checks.
//!
//! Engines tolerate events whose time goes backwards for a key. In strict
//! mode each such event is logged and kept as a warning the caller can drain;
//! in lenient mode it is only traced.

use crate::source::types::{GroupKey, Timestamp};
use serde::{Deserialize, Serialize};

/// How engines report events that arrive behind their key's watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    #[default]
    Lenient,
    Strict,
}

/// An event observed with a time earlier than its key's latest time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfOrderEvent {
    pub key: GroupKey,
    pub time: Timestamp,
    /// Latest time previously observed for the key
    pub watermark: Timestamp,
    /// Position of the event in the engine's input
    pub event_index: usize,
}

/// Tracks ordering warnings for one engine.
#[derive(Debug, Clone, Default)]
pub struct OrderingGuard {
    mode: OrderingMode,
    warnings: Vec<OutOfOrderEvent>,
}

impl OrderingGuard {
    pub fn new(mode: OrderingMode) -> Self {
        Self {
            mode,
            warnings: Vec::new(),
        }
    }

    pub fn mode(&self) -> OrderingMode {
        self.mode
    }

    /// Check an event against its key's previous watermark.
    ///
    /// Returns true when the event is out of order.
    pub fn observe(
        &mut self,
        engine: &'static str,
        key: &str,
        time: Timestamp,
        watermark: Option<Timestamp>,
        event_index: usize,
    ) -> bool {
        let Some(watermark) = watermark.filter(|wm| time < *wm) else {
            return false;
        };

        match self.mode {
            OrderingMode::Strict => {
                tracing::warn!(engine, key, time, watermark, event_index, "out-of-order event");
                self.warnings.push(OutOfOrderEvent {
                    key: key.to_owned(),
                    time,
                    watermark,
                    event_index,
                });
            }
            OrderingMode::Lenient => {
                tracing::trace!(engine, key, time, watermark, "out-of-order event tolerated");
            }
        }
        true
    }

    /// Get and remove the collected warnings.
    pub fn take_warnings(&mut self) -> Vec<OutOfOrderEvent> {
        std::mem::take(&mut self.warnings)
    }

    pub fn pending_warnings(&self) -> usize {
        self.warnings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_events_pass() {
        let mut guard = OrderingGuard::new(OrderingMode::Strict);

        assert!(!guard.observe("test", "A", 10, None, 0));
        assert!(!guard.observe("test", "A", 10, Some(10), 1));
        assert!(!guard.observe("test", "A", 11, Some(10), 2));
        assert_eq!(guard.pending_warnings(), 0);
    }

    #[test]
    fn test_strict_mode_collects_warnings() {
        let mut guard = OrderingGuard::new(OrderingMode::Strict);

        assert!(guard.observe("test", "A", 5, Some(10), 3));
        let warnings = guard.take_warnings();

        assert_eq!(
            warnings,
            vec![OutOfOrderEvent {
                key: "A".to_string(),
                time: 5,
                watermark: 10,
                event_index: 3,
            }]
        );
        assert!(guard.take_warnings().is_empty());
    }

    #[test]
    fn test_lenient_mode_only_reports() {
        let mut guard = OrderingGuard::default();

        assert_eq!(guard.mode(), OrderingMode::Lenient);
        assert!(guard.observe("test", "A", 5, Some(10), 0));
        assert_eq!(guard.pending_warnings(), 0);
    }
}
