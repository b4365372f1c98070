use bytes::Bytes;
use http::StatusCode;

/// A frame body that is either binary or text.
///
/// HTTP body chunks are required to be binary at the point of consumption;
/// WebSocket frames may legitimately be either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Binary(Bytes),
    Text(String),
}

impl Payload {
    /// Returns true if this payload carries binary data
    #[inline]
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    /// Returns the binary data, or None for a text payload
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(bytes) => Some(bytes),
            Payload::Text(_) => None,
        }
    }

    /// Consumes the payload and returns its binary data, or None for text
    pub fn into_binary(self) -> Option<Bytes> {
        match self {
            Payload::Binary(bytes) => Some(bytes),
            Payload::Text(_) => None,
        }
    }

    /// Length of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Binary(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Self {
        Payload::Binary(Bytes::from_static(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

/// A message delivered by the transport.
///
/// The variants correspond one-to-one to the inbound event shapes of the
/// host protocol: request body chunks, client disconnection and the
/// WebSocket handshake/frame/close events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// A chunk of the request body; `more_body` signals whether further
    /// chunks follow.
    HttpRequest { body: Payload, more_body: bool },
    /// The client went away mid-exchange.
    HttpDisconnect,
    /// The WebSocket opening handshake.
    WebSocketConnect,
    /// A WebSocket data frame.
    WebSocketReceive { payload: Payload },
    /// The WebSocket peer closed the connection.
    WebSocketDisconnect { code: u16 },
}

impl InboundMessage {
    /// Wire-level type name of this message, used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::HttpRequest { .. } => "http.request",
            InboundMessage::HttpDisconnect => "http.disconnect",
            InboundMessage::WebSocketConnect => "websocket.connect",
            InboundMessage::WebSocketReceive { .. } => "websocket.receive",
            InboundMessage::WebSocketDisconnect { .. } => "websocket.disconnect",
        }
    }
}

/// A message handed to the transport for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Response head: status plus serialized header pairs.
    HttpResponseStart { status: StatusCode, headers: Vec<(Bytes, Bytes)> },
    /// A chunk of the response body; `more_body = false` terminates the
    /// response.
    HttpResponseBody { body: Bytes, more_body: bool },
    /// Accept the WebSocket handshake.
    WebSocketAccept { subprotocol: Option<String>, headers: Vec<(Bytes, Bytes)> },
    /// A WebSocket data frame.
    WebSocketSend { payload: Payload },
    /// Close the WebSocket connection.
    WebSocketClose { code: u16 },
}

impl OutboundMessage {
    /// Wire-level type name of this message, used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::HttpResponseStart { .. } => "http.response.start",
            OutboundMessage::HttpResponseBody { .. } => "http.response.body",
            OutboundMessage::WebSocketAccept { .. } => "websocket.accept",
            OutboundMessage::WebSocketSend { .. } => "websocket.send",
            OutboundMessage::WebSocketClose { .. } => "websocket.close",
        }
    }

    /// Returns true if this message opens the response.
    ///
    /// The first such message observed during a send flips the connection
    /// into the started state.
    #[inline]
    pub fn is_response_start(&self) -> bool {
        matches!(self, OutboundMessage::HttpResponseStart { .. })
    }

    /// Returns true if this message terminates the response body.
    ///
    /// The first such message observed during a send flips the connection
    /// into the halted state.
    #[inline]
    pub fn is_final_body(&self) -> bool {
        matches!(self, OutboundMessage::HttpResponseBody { more_body: false, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_start_is_detected() {
        let message = OutboundMessage::HttpResponseStart { status: StatusCode::OK, headers: vec![] };
        assert!(message.is_response_start());
        assert!(!message.is_final_body());
    }

    #[test]
    fn only_terminal_body_is_final() {
        let more = OutboundMessage::HttpResponseBody { body: Bytes::from_static(b"a"), more_body: true };
        let last = OutboundMessage::HttpResponseBody { body: Bytes::new(), more_body: false };
        assert!(!more.is_final_body());
        assert!(last.is_final_body());
    }

    #[test]
    fn into_binary_rejects_text_payloads() {
        let binary = Payload::from(Bytes::from_static(b"abc"));
        assert_eq!(binary.as_binary().map(|b| b.len()), Some(3));
        assert!(Payload::from("abc").into_binary().is_none());
    }
}
