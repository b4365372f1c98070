//! The two asynchronous primitives every transport must provide.
//!
//! A connection is constructed from a [`Scope`](crate::protocol::Scope)
//! plus an optional [`Receive`] and an optional [`Transmit`]. Operating a
//! connection without the corresponding primitive fails with a state error
//! ("not plugged"), so half-plugged connections are usable for whatever
//! half they carry.
//!
//! The channel-backed implementations below are the in-memory transport
//! used by the test suites and the examples: inbound messages are fed
//! through a tokio mpsc sender, outbound messages drain into a receiver.
//! Cancellation and timeouts stay entirely on the transport side; if a
//! suspended receive or send is torn down externally, the error unwinds
//! through the plug chain.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::{InboundMessage, OutboundMessage, TransportError};

/// The "receive next inbound message" primitive.
#[async_trait]
pub trait Receive: Send {
    async fn receive(&mut self) -> Result<InboundMessage, TransportError>;
}

/// The "send outbound message" primitive.
#[async_trait]
pub trait Transmit: Send {
    async fn transmit(&mut self, message: OutboundMessage) -> Result<(), TransportError>;
}

/// Receiving end of an in-memory inbound message channel.
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

/// Transmitting end of an in-memory outbound message channel.
#[derive(Debug)]
pub struct ChannelTransmitter {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// Creates an inbound message channel.
///
/// The returned sender is held by the driving side (a test, an example
/// server); the [`ChannelReceiver`] is handed to the connection.
pub fn inbound_channel() -> (mpsc::UnboundedSender<InboundMessage>, ChannelReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelReceiver { rx })
}

/// Creates an outbound message channel.
///
/// The [`ChannelTransmitter`] is handed to the connection; the returned
/// receiver observes everything the connection sends.
pub fn outbound_channel() -> (ChannelTransmitter, mpsc::UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelTransmitter { tx }, rx)
}

#[async_trait]
impl Receive for ChannelReceiver {
    async fn receive(&mut self) -> Result<InboundMessage, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transmit for ChannelTransmitter {
    async fn transmit(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_receiver_yields_fed_messages() {
        let (tx, mut receiver) = inbound_channel();
        tx.send(InboundMessage::HttpDisconnect).unwrap();
        let message = receiver.receive().await.unwrap();
        assert_eq!(message, InboundMessage::HttpDisconnect);
    }

    #[tokio::test]
    async fn closed_channel_surfaces_transport_error() {
        let (tx, mut receiver) = inbound_channel();
        drop(tx);
        assert!(matches!(receiver.receive().await, Err(TransportError::Closed)));
    }
}
