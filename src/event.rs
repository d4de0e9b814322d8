//! Connection events and the delegate interface
//!
//! A connection never owns its delegate: it holds a clearable handle that
//! is dropped on `cleanup()` or explicit unregistration, after which no
//! further events are delivered. Events for one connection are emitted in
//! generation order; there is no ordering across connections.

use bytes::Bytes;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A tagged event payload delivered asynchronously to the caller.
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection reached `Open`
    Open {
        /// Id of the connection the event belongs to
        connection_id: String,
        /// Sub-protocol selected by the server, if any
        protocol: Option<String>,
    },
    /// A data frame arrived
    Message {
        /// Id of the connection the event belongs to
        connection_id: String,
        /// Frame payload
        data: Bytes,
        /// Whether the frame was binary (text otherwise)
        is_binary: bool,
    },
    /// A non-terminal or pre-close failure
    Error {
        /// Id of the connection the event belongs to
        connection_id: String,
        /// Human-readable failure description
        message: String,
    },
    /// The connection reached `Closed`; always the last event
    Close {
        /// Id of the connection the event belongs to
        connection_id: String,
        /// Close code (peer-sent or synthetic)
        code: u16,
        /// Close reason
        reason: String,
    },
}

impl Event {
    /// The id of the connection this event belongs to.
    pub fn connection_id(&self) -> &str {
        match self {
            Self::Open { connection_id, .. }
            | Self::Message { connection_id, .. }
            | Self::Error { connection_id, .. }
            | Self::Close { connection_id, .. } => connection_id,
        }
    }
}

/// Non-owning delegate interface a connection delivers events through.
pub trait EventSink: Send + Sync {
    /// Called from the connection's I/O task for every generated event.
    fn on_event(&self, event: Event);
}

/// [`EventSink`] that forwards into an unbounded channel, for callers that
/// prefer pulling events off a stream to implementing the trait.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: Event) {
        // Receiver dropped means the caller stopped listening; that is
        // their unregistration, not an error.
        let _ = self.tx.send(event);
    }
}

/// Stream of events produced by a [`ChannelSink`].
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl futures::Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a connected sink/stream pair.
pub fn channel() -> (std::sync::Arc<ChannelSink>, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (std::sync::Arc::new(ChannelSink { tx }), EventStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut stream) = channel();
        sink.on_event(Event::Open {
            connection_id: "c1".into(),
            protocol: None,
        });
        sink.on_event(Event::Close {
            connection_id: "c1".into(),
            code: 1000,
            reason: "done".into(),
        });

        assert!(matches!(stream.next().await, Some(Event::Open { .. })));
        match stream.next().await {
            Some(Event::Close { code, .. }) => assert_eq!(code, 1000),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (sink, stream) = channel();
        drop(stream);
        sink.on_event(Event::Error {
            connection_id: "c1".into(),
            message: "late".into(),
        });
    }

    #[test]
    fn test_connection_id_accessor() {
        let event = Event::Message {
            connection_id: "abc".into(),
            data: Bytes::from_static(b"x"),
            is_binary: false,
        };
        assert_eq!(event.connection_id(), "abc");
    }
}
