//! Core protocol abstractions shared by every connection.
//!
//! This module provides the fundamental building blocks the rest of the
//! crate is written against:
//!
//! - **Scope** ([`scope`]): the static metadata record a transport hands us
//!   when a new exchange begins
//!   - [`Scope`]: headers, method, path and friends
//!   - [`ConnType`]: whether the exchange is plain HTTP or a WebSocket
//!
//! - **Messages** ([`message`]): the typed in-memory form of every message
//!   that can cross the transport boundary
//!   - [`InboundMessage`]: what the transport delivers to us
//!   - [`OutboundMessage`]: what we hand back to the transport
//!   - [`Payload`]: a binary-or-text frame body
//!
//! - **Errors** ([`error`]): the error taxonomy of the crate
//!   - [`PlugError`]: top-level error type
//!   - [`RequestError`], [`StateError`], [`RuntimeError`], [`TransportError`]
//!
//! The message enums mirror the wire-level event shapes one-to-one, so a
//! boundary adapter only has to translate field names, never semantics.

mod error;
mod message;
mod scope;

pub use error::{PlugError, RequestError, RuntimeError, StateError, TransportError};
pub use message::{InboundMessage, OutboundMessage, Payload};
pub use scope::{ConnType, Scope};
