//! WebSocket capability of a connection.
//!
//! The capability is attached at construction, only for scopes that
//! declare a WebSocket exchange, and layers a five-state handshake/close
//! protocol over the same two transport primitives the HTTP side uses.
//! Calling a WebSocket operation on a plain HTTP connection is a request
//! error (wrong connection type), not a state error.

use tracing::trace;

use super::Conn;
use crate::protocol::{InboundMessage, OutboundMessage, Payload, PlugError, RequestError, RuntimeError, StateError};

/// Handshake/close protocol state.
///
/// Transitions are monotonic: `Init → Connecting → Open → Closing/Closed`,
/// never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Init,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
pub(crate) struct WsCapability {
    state: WsState,
    closing_code: Option<u16>,
}

impl WsCapability {
    pub(crate) fn new() -> Self {
        Self { state: WsState::Init, closing_code: None }
    }
}

/// What a WebSocket receive produced: either a state transition (the
/// handshake arriving, the peer disconnecting) or a data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    State(WsState),
    Message(Payload),
}

impl Conn {
    fn ws(&self) -> Result<&WsCapability, PlugError> {
        self.ws.as_ref().ok_or_else(|| RequestError::NotWebSocket.into())
    }

    fn ws_mut(&mut self) -> Result<&mut WsCapability, PlugError> {
        self.ws.as_mut().ok_or_else(|| RequestError::NotWebSocket.into())
    }

    pub fn ws_state(&self) -> Result<WsState, PlugError> {
        Ok(self.ws()?.state)
    }

    /// The close code recorded by `ws_close` or a peer disconnect.
    pub fn ws_closing_code(&self) -> Result<Option<u16>, PlugError> {
        Ok(self.ws()?.closing_code)
    }

    /// Receives the next WebSocket event.
    ///
    /// In `Init` only the opening handshake is acceptable and moves the
    /// state to `Connecting`. A peer disconnect moves to `Closed` and
    /// records the close code. Anything else is delivered as a frame
    /// payload. Receiving on a closed connection is a state error.
    pub async fn ws_receive(&mut self) -> Result<WsEvent, PlugError> {
        let state = self.ws()?.state;
        if state == WsState::Closed {
            return Err(StateError::WsClosed.into());
        }
        let message = self.receive().await?;
        if state == WsState::Init {
            return match message {
                InboundMessage::WebSocketConnect => {
                    self.ws_mut()?.state = WsState::Connecting;
                    trace!("websocket handshake received");
                    Ok(WsEvent::State(WsState::Connecting))
                }
                other => Err(StateError::WsHandshakeExpected { actual: other.kind() }.into()),
            };
        }
        match message {
            InboundMessage::WebSocketDisconnect { code } => {
                let ws = self.ws_mut()?;
                ws.state = WsState::Closed;
                ws.closing_code = Some(code);
                trace!(code, "websocket peer disconnected");
                Ok(WsEvent::State(WsState::Closed))
            }
            InboundMessage::WebSocketReceive { payload } => Ok(WsEvent::Message(payload)),
            other => Err(RuntimeError::unexpected_message(other.kind()).into()),
        }
    }

    /// Accepts the pending handshake, negotiating an optional subprotocol.
    ///
    /// Called while still in `Init`, it transparently performs the
    /// handshake receive first. Requires `Connecting` afterwards; the
    /// accept message carries the current response headers.
    pub async fn ws_accept(&mut self, subprotocol: Option<&str>) -> Result<(), PlugError> {
        if self.ws()?.state == WsState::Init {
            self.ws_receive().await?;
        }
        let state = self.ws()?.state;
        if state != WsState::Connecting {
            return Err(StateError::ws_invalid_state(WsState::Connecting, state).into());
        }
        let headers = self.resp_header_pairs();
        self.send(OutboundMessage::WebSocketAccept { subprotocol: subprotocol.map(str::to_owned), headers }).await?;
        self.ws_mut()?.state = WsState::Open;
        Ok(())
    }

    /// Sends a data frame; binary or text follows the payload kind.
    pub async fn ws_send(&mut self, payload: impl Into<Payload>) -> Result<(), PlugError> {
        let state = self.ws()?.state;
        if state != WsState::Open {
            return Err(StateError::ws_invalid_state(WsState::Open, state).into());
        }
        self.send(OutboundMessage::WebSocketSend { payload: payload.into() }).await
    }

    /// Sends a close frame and moves to `Closing` (code defaults to 1000).
    ///
    /// Closing an already closing or closed connection is a state error;
    /// the state machine never moves backwards and a peer-recorded close
    /// code is never overwritten.
    pub async fn ws_close(&mut self, code: Option<u16>) -> Result<(), PlugError> {
        let state = self.ws()?.state;
        if matches!(state, WsState::Closing | WsState::Closed) {
            return Err(StateError::ws_invalid_state(WsState::Open, state).into());
        }
        let code = code.unwrap_or(1000);
        self.send(OutboundMessage::WebSocketClose { code }).await?;
        let ws = self.ws_mut()?;
        ws.state = WsState::Closing;
        ws.closing_code = Some(code);
        Ok(())
    }

    /// Starts a lazy pass over incoming frames.
    ///
    /// Requires `Open`; the pass ends (without yielding a terminating
    /// value) once the state leaves `Open` via close or disconnect. Not
    /// restartable once ended by construction of its borrow.
    pub fn ws_messages(&mut self) -> Result<WsMessages<'_>, PlugError> {
        let state = self.ws()?.state;
        if state != WsState::Open {
            return Err(StateError::ws_invalid_state(WsState::Open, state).into());
        }
        Ok(WsMessages { conn: self })
    }
}

/// Lazy frame sequence over an open WebSocket, see [`Conn::ws_messages`].
#[derive(Debug)]
pub struct WsMessages<'conn> {
    conn: &'conn mut Conn,
}

impl WsMessages<'_> {
    /// Yields the next frame payload, or `None` once the connection is
    /// closing or closed.
    pub async fn next(&mut self) -> Result<Option<Payload>, PlugError> {
        loop {
            let event = self.conn.ws_receive().await?;
            let state = self.conn.ws_state()?;
            if matches!(state, WsState::Closing | WsState::Closed) {
                return Ok(None);
            }
            if let WsEvent::Message(payload) = event {
                return Ok(Some(payload));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::plugged;
    use super::*;
    use crate::protocol::Scope;
    use bytes::Bytes;

    fn frame(payload: Payload) -> InboundMessage {
        InboundMessage::WebSocketReceive { payload }
    }

    #[tokio::test]
    async fn handshake_then_accept_opens_the_connection() {
        let (mut conn, tx, mut rx) = plugged(Scope::websocket("/ws"));
        tx.send(InboundMessage::WebSocketConnect).unwrap();

        assert_eq!(conn.ws_state().unwrap(), WsState::Init);
        conn.ws_accept(Some("chat")).await.unwrap();
        assert_eq!(conn.ws_state().unwrap(), WsState::Open);

        match rx.try_recv().unwrap() {
            OutboundMessage::WebSocketAccept { subprotocol, .. } => {
                assert_eq!(subprotocol.as_deref(), Some("chat"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_receive_then_accept() {
        let (mut conn, tx, _rx) = plugged(Scope::websocket("/ws"));
        tx.send(InboundMessage::WebSocketConnect).unwrap();

        let event = conn.ws_receive().await.unwrap();
        assert_eq!(event, WsEvent::State(WsState::Connecting));
        conn.ws_accept(None).await.unwrap();
        assert_eq!(conn.ws_state().unwrap(), WsState::Open);
    }

    #[tokio::test]
    async fn handshake_expects_connect_message() {
        let (mut conn, tx, _rx) = plugged(Scope::websocket("/ws"));
        tx.send(frame(Payload::from("early"))).unwrap();

        let err = conn.ws_receive().await.unwrap_err();
        assert!(matches!(
            err,
            PlugError::State { source: StateError::WsHandshakeExpected { actual: "websocket.receive" } }
        ));
    }

    #[tokio::test]
    async fn receive_on_closed_connection_fails() {
        let (mut conn, tx, _rx) = plugged(Scope::websocket("/ws"));
        tx.send(InboundMessage::WebSocketConnect).unwrap();
        tx.send(InboundMessage::WebSocketDisconnect { code: 1001 }).unwrap();

        conn.ws_receive().await.unwrap();
        let event = conn.ws_receive().await.unwrap();
        assert_eq!(event, WsEvent::State(WsState::Closed));
        assert_eq!(conn.ws_closing_code().unwrap(), Some(1001));

        let err = conn.ws_receive().await.unwrap_err();
        assert!(matches!(err, PlugError::State { source: StateError::WsClosed }));
    }

    #[tokio::test]
    async fn send_requires_open_state() {
        let (mut conn, _tx, _rx) = plugged(Scope::websocket("/ws"));
        let err = conn.ws_send("too early").await.unwrap_err();
        assert!(matches!(
            err,
            PlugError::State { source: StateError::WsInvalidState { expected: WsState::Open, current: WsState::Init } }
        ));
    }

    #[tokio::test]
    async fn frames_round_until_disconnect() {
        let (mut conn, tx, mut rx) = plugged(Scope::websocket("/ws"));
        tx.send(InboundMessage::WebSocketConnect).unwrap();
        conn.ws_accept(None).await.unwrap();

        tx.send(frame(Payload::from(Bytes::from_static(b"binary")))).unwrap();
        tx.send(frame(Payload::from("text"))).unwrap();
        tx.send(InboundMessage::WebSocketDisconnect { code: 1000 }).unwrap();

        let mut messages = conn.ws_messages().unwrap();
        assert_eq!(messages.next().await.unwrap(), Some(Payload::Binary(Bytes::from_static(b"binary"))));
        assert_eq!(messages.next().await.unwrap(), Some(Payload::Text("text".to_owned())));
        assert_eq!(messages.next().await.unwrap(), None);
        drop(messages);

        assert!(conn.ws_send("bye").await.is_err());
        assert_eq!(conn.ws_state().unwrap(), WsState::Closed);

        // accept message was the only outbound traffic
        assert!(matches!(rx.try_recv(), Ok(OutboundMessage::WebSocketAccept { .. })));
    }

    #[tokio::test]
    async fn close_records_code_and_state() {
        let (mut conn, tx, mut rx) = plugged(Scope::websocket("/ws"));
        tx.send(InboundMessage::WebSocketConnect).unwrap();
        conn.ws_accept(None).await.unwrap();

        conn.ws_close(None).await.unwrap();
        assert_eq!(conn.ws_state().unwrap(), WsState::Closing);
        assert_eq!(conn.ws_closing_code().unwrap(), Some(1000));

        let _accept = rx.try_recv().unwrap();
        assert_eq!(rx.try_recv().unwrap(), OutboundMessage::WebSocketClose { code: 1000 });
    }

    #[tokio::test]
    async fn close_after_peer_disconnect_fails_and_keeps_peer_code() {
        let (mut conn, tx, mut rx) = plugged(Scope::websocket("/ws"));
        tx.send(InboundMessage::WebSocketConnect).unwrap();
        tx.send(InboundMessage::WebSocketDisconnect { code: 1001 }).unwrap();

        conn.ws_accept(None).await.unwrap();
        assert_eq!(conn.ws_receive().await.unwrap(), WsEvent::State(WsState::Closed));

        let err = conn.ws_close(None).await.unwrap_err();
        assert!(matches!(
            err,
            PlugError::State { source: StateError::WsInvalidState { current: WsState::Closed, .. } }
        ));
        assert_eq!(conn.ws_state().unwrap(), WsState::Closed);
        assert_eq!(conn.ws_closing_code().unwrap(), Some(1001));

        // no close frame went out after the accept
        let _accept = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn double_close_fails_the_second_time() {
        let (mut conn, tx, _rx) = plugged(Scope::websocket("/ws"));
        tx.send(InboundMessage::WebSocketConnect).unwrap();
        conn.ws_accept(None).await.unwrap();

        conn.ws_close(Some(4000)).await.unwrap();
        let err = conn.ws_close(None).await.unwrap_err();
        assert!(matches!(
            err,
            PlugError::State { source: StateError::WsInvalidState { current: WsState::Closing, .. } }
        ));
        assert_eq!(conn.ws_closing_code().unwrap(), Some(4000));
    }

    #[tokio::test]
    async fn ws_operations_need_the_capability() {
        let (mut conn, _tx, _rx) = plugged(Scope::http(http::Method::GET, "/"));
        let err = conn.ws_receive().await.unwrap_err();
        assert!(matches!(err, PlugError::Request { source: RequestError::NotWebSocket }));
    }
}
