//! Event source contract for the aggregation engines.
//!
//! Engines consume already-structured [`Event`]s. This module provides the
//! event type itself plus a JSON-lines decoder and a threaded feed used by
//! the CLI.

pub mod feed;
pub mod reader;
pub mod types;

// Re-export commonly used types
pub use feed::{ChannelFeed, DEFAULT_QUEUE_DEPTH};
pub use reader::{JsonLinesReader, SourceError};
pub use types::{Event, FieldName, GroupKey, Timestamp};
