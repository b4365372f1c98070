use bytes::Bytes;
use http::Method;

/// Whether an exchange speaks plain HTTP or negotiated a WebSocket.
///
/// Decided once at construction from the transport metadata; the WebSocket
/// capability of a connection exists only for [`ConnType::WebSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnType {
    Http,
    WebSocket,
}

/// The static metadata record of one logical exchange.
///
/// A boundary adapter builds a `Scope` from whatever its host calling
/// convention provides and never touches it again; the only field mutated
/// afterwards is `path`, which forwarding routers may rewrite.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Raw header pairs as delivered by the transport, in order.
    pub headers: Vec<(Bytes, Bytes)>,
    pub method: Method,
    pub path: String,
    pub root_path: String,
    pub scheme: String,
    pub query_string: Bytes,
    pub conn_type: ConnType,
}

impl Scope {
    /// Creates an HTTP scope with empty headers and query string
    pub fn http(method: Method, path: impl Into<String>) -> Self {
        Self {
            headers: Vec::new(),
            method,
            path: path.into(),
            root_path: String::new(),
            scheme: "http".to_owned(),
            query_string: Bytes::new(),
            conn_type: ConnType::Http,
        }
    }

    /// Creates a WebSocket scope with empty headers and query string
    pub fn websocket(path: impl Into<String>) -> Self {
        Self {
            headers: Vec::new(),
            method: Method::GET,
            path: path.into(),
            root_path: String::new(),
            scheme: "ws".to_owned(),
            query_string: Bytes::new(),
            conn_type: ConnType::WebSocket,
        }
    }

    /// Appends a raw header pair
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes())));
        self
    }

    pub fn with_query_string(mut self, query_string: &'static str) -> Self {
        self.query_string = Bytes::from_static(query_string.as_bytes());
        self
    }
}
