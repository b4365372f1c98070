//! Connection lifecycle and middleware core for message-oriented
//! transports.
//!
//! This crate is the request-processing heart of a server built atop an
//! abstract bidirectional transport: a static metadata record plus two
//! asynchronous primitives, "receive next inbound message" and "send
//! outbound message". It provides:
//!
//! - [`Conn`]: the per-exchange lifecycle state machine, covering the
//!   HTTP request/response flow and, when negotiated, the WebSocket
//!   handshake/close protocol
//! - [`Plug`]: the composable middleware unit with ordered children and
//!   chain-wide short-circuit via the connection's halted flag
//! - [`Adapter`]: the glue that turns a transport triple into one plug
//!   chain invocation per exchange
//!
//! Routing lives in the companion `plug-router` crate.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use futures::FutureExt;
//! use plug_core::{plug_fn, Adapter, Conn, Pipeline, Scope};
//! use plug_core::transport::{inbound_channel, outbound_channel};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let app = Pipeline::new().plug(plug_fn(|conn: &mut Conn| {
//!     async move { conn.send_resp(Bytes::from_static(b"hello world"), None, true).await }.boxed()
//! }));
//! let adapter = Adapter::new(app);
//!
//! let (_tx_in, receiver) = inbound_channel();
//! let (transmitter, _rx_out) = outbound_channel();
//! let scope = Scope::http(http::Method::GET, "/");
//!
//! let conn = adapter.handle(scope, Box::new(receiver), Box::new(transmitter)).await.unwrap();
//! assert!(conn.halted());
//! # }
//! ```

pub mod adapter;
pub mod conn;
pub mod plug;
pub mod protocol;
pub mod transport;

pub use adapter::{Adapter, DelegateApp};
pub use conn::{BodyIter, Conn, ConnHook, WsEvent, WsMessages, WsState};
pub use plug::{plug_fn, FnPlug, Guard, Pipeline, Plug};
pub use protocol::{
    ConnType, InboundMessage, OutboundMessage, Payload, PlugError, RequestError, RuntimeError, Scope, StateError,
    TransportError,
};
pub use transport::{Receive, Transmit};
