//! In-memory event buffer with batched background delivery.
//!
//! A single flusher task owns the buffer. Producers hand events over a
//! bounded channel, so recording never blocks and never shares the buffer
//! with the flush in progress. The flusher drains the buffer on a timer,
//! when it reaches `buffer_size`, on demand, and once more at shutdown.

mod flusher;

pub use flusher::{BufferStats, EventBuffer, FlushReport, FlushTrigger};

use crate::backend::Delivery;
use crate::models::TraceEvent;
use async_trait::async_trait;

/// Destination of flushed events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event; returns the backend event id when delivered
    async fn deliver(&self, event: &TraceEvent) -> Delivery<String>;
}
