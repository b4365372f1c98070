use crate::conn::WsState;
use thiserror::Error;

/// Top level error type of the crate.
///
/// Every fallible operation returns this type. The inner enums keep the
/// three error families of the lifecycle model apart: malformed input
/// ([`RequestError`]), illegal operations for the current lifecycle state
/// ([`StateError`]) and internal contract violations ([`RuntimeError`]).
/// Transport failures surface as [`TransportError`] and unwind through the
/// plug chain like any other error.
#[derive(Debug, Error)]
pub enum PlugError {
    #[error("request error: {source}")]
    Request {
        #[from]
        source: RequestError,
    },

    #[error("state error: {source}")]
    State {
        #[from]
        source: StateError,
    },

    #[error("runtime error: {source}")]
    Runtime {
        #[from]
        source: RuntimeError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },
}

/// Malformed or protocol-violating input from the client side.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("connection type is not http")]
    NotHttp,

    #[error("connection type is not websocket")]
    NotWebSocket,

    #[error("client disconnected")]
    Disconnected,

    #[error("body is longer than declared: received {received}, declared {declared}")]
    BodyOverflow { received: u64, declared: u64 },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid query string: {reason}")]
    InvalidQuery { reason: String },
}

impl RequestError {
    pub fn body_overflow(received: u64, declared: u64) -> Self {
        Self::BodyOverflow { received, declared }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn invalid_query<S: ToString>(reason: S) -> Self {
        Self::InvalidQuery { reason: reason.to_string() }
    }
}

/// Illegal operation for the current lifecycle state.
///
/// Every state-changing operation succeeds at most once; these variants are
/// what the explicit flags report instead of retrying.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("conn is not plugged: missing {primitive} primitive")]
    NotPlugged { primitive: &'static str },

    #[error("conn already halted")]
    AlreadyHalted,

    #[error("http response already started")]
    AlreadyStarted,

    #[error("cannot change status code after response started")]
    StatusFrozen,

    #[error("body iter is already started and is not finished")]
    BodyIterInFlight,

    #[error("receiving on closed websocket connection")]
    WsClosed,

    #[error("expecting websocket connect message, but got {actual}")]
    WsHandshakeExpected { actual: &'static str },

    #[error("websocket operation needs state {expected:?}, current state is {current:?}")]
    WsInvalidState { expected: WsState, current: WsState },
}

impl StateError {
    pub fn not_plugged(primitive: &'static str) -> Self {
        Self::NotPlugged { primitive }
    }

    pub fn ws_invalid_state(expected: WsState, current: WsState) -> Self {
        Self::WsInvalidState { expected, current }
    }
}

/// Internal contract violation, e.g. a transport delivering a frame kind
/// the protocol forbids at this point.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("body chunk is not binary")]
    NonBinaryChunk,

    #[error("unexpected {kind} message on websocket connection")]
    UnexpectedMessage { kind: &'static str },

    #[error("invalid response header value: {reason}")]
    InvalidHeaderValue { reason: String },
}

impl RuntimeError {
    pub fn unexpected_message(kind: &'static str) -> Self {
        Self::UnexpectedMessage { kind }
    }

    pub fn invalid_header_value<S: ToString>(reason: S) -> Self {
        Self::InvalidHeaderValue { reason: reason.to_string() }
    }
}

/// Failure of one of the two transport primitives.
///
/// The core has no retry or recovery policy: a failed receive or send
/// unwinds to the boundary adapter.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport channel closed")]
    Closed,

    #[error("transport failure: {reason}")]
    Failed { reason: String },
}

impl TransportError {
    pub fn failed<S: ToString>(reason: S) -> Self {
        Self::Failed { reason: reason.to_string() }
    }
}
