//! Push sinks
//!
//! A sink is the server side of one client connection. Transports (a
//! WebSocket writer, an SSE stream) implement [`PushSink`]; [`ChannelSink`]
//! hands events to an in-process receiver.

use crate::error::BusError;
use crate::event::PushEvent;
use std::fmt::Debug;
use tokio::sync::mpsc;

/// Delivery endpoint of one connection
#[async_trait::async_trait]
pub trait PushSink: Send + Sync + Debug {
    /// Deliver one event
    ///
    /// # Errors
    /// [`BusError::SinkFailed`] for transient failures (retried),
    /// [`BusError::SinkClosed`] when the client is gone.
    async fn send(&self, event: &PushEvent) -> Result<(), BusError>;
}

/// Sink backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PushEvent>,
}

impl ChannelSink {
    /// Create sink and its receiving end
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl PushSink for ChannelSink {
    async fn send(&self, event: &PushEvent) -> Result<(), BusError> {
        self.tx
            .send(event.clone())
            .map_err(|_| BusError::SinkClosed)
    }
}
