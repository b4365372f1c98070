//! Connection lifecycle state machine.
//!
//! A [`Conn`] owns the state of one logical request/response exchange and
//! mediates every message that crosses the transport. It is exclusively
//! owned by the single flow processing it; there is no sharing and no
//! locking.
//!
//! # Lifecycle
//!
//! Two flags drive the whole lifecycle: `started` flips when the first
//! response-start message is observed going out, `halted` flips when the
//! first terminal body message (`more_body = false`) is observed. The
//! invariant `halted ⇒ started` holds because a terminal body message can
//! only follow a response start on a correct transport, and every code
//! path in this module starts the response before terminating it.
//!
//! Crucially, the flags are updated by *observing outbound messages inside
//! [`Conn::send`]*, not by the high-level methods that happen to issue
//! them. Code that sends raw messages directly still participates in the
//! lifecycle, and the after-start/after-send hooks fire exactly once at
//! the corresponding transition.

mod body;
mod ws;

pub use body::BodyIter;
pub use ws::{WsEvent, WsMessages, WsState};

use std::collections::HashMap;
use std::fmt;

use bytes::{Bytes, BytesMut};
use cookie::Cookie;
use futures::future::BoxFuture;
use http::header::{CONTENT_LENGTH, COOKIE, LOCATION, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::trace;

use crate::protocol::{
    ConnType, InboundMessage, OutboundMessage, PlugError, RequestError, RuntimeError, Scope, StateError,
};
use crate::transport::{Receive, Transmit};
use ws::WsCapability;

/// An asynchronous callback invoked with the connection at a lifecycle
/// transition.
pub type ConnHook = Box<dyn for<'a> FnMut(&'a mut Conn) -> BoxFuture<'a, Result<(), PlugError>> + Send>;

/// State of one logical request/response exchange.
pub struct Conn {
    scope: Scope,
    receive: Option<Box<dyn Receive>>,
    transmit: Option<Box<dyn Transmit>>,

    // request caches, derived lazily from the scope
    req_headers: OnceCell<HeaderMap>,
    req_cookies: OnceCell<Vec<Cookie<'static>>>,

    // streaming body cursor
    pub(crate) http_body: BytesMut,
    pub(crate) http_has_more_body: bool,
    pub(crate) http_received_body_length: u64,

    // response state
    status: Option<StatusCode>,
    resp_headers: HeaderMap,
    resp_cookies: Vec<Cookie<'static>>,
    started: bool,
    halted: bool,

    // cross-middleware data exchange
    private: HashMap<String, Value>,

    // lifecycle hooks
    after_start: Vec<ConnHook>,
    after_send: Vec<ConnHook>,

    pub(crate) ws: Option<WsCapability>,
}

impl Conn {
    /// Creates a connection from transport metadata and the two transport
    /// primitives.
    ///
    /// Either primitive may be absent; operations needing the missing one
    /// fail with a "not plugged" state error. The WebSocket capability is
    /// attached if and only if the scope declares a WebSocket exchange.
    pub fn new(scope: Scope, receive: Option<Box<dyn Receive>>, transmit: Option<Box<dyn Transmit>>) -> Self {
        let ws = (scope.conn_type == ConnType::WebSocket).then(WsCapability::new);
        Self {
            scope,
            receive,
            transmit,
            req_headers: OnceCell::new(),
            req_cookies: OnceCell::new(),
            http_body: BytesMut::new(),
            http_has_more_body: true,
            http_received_body_length: 0,
            status: None,
            resp_headers: HeaderMap::new(),
            resp_cookies: Vec::new(),
            started: false,
            halted: false,
            private: HashMap::new(),
            after_start: Vec::new(),
            after_send: Vec::new(),
            ws,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn conn_type(&self) -> ConnType {
        self.scope.conn_type
    }

    pub fn method(&self) -> &Method {
        &self.scope.method
    }

    pub fn path(&self) -> &str {
        &self.scope.path
    }

    /// Rewrites the externally visible request path.
    ///
    /// Used by forwarding routers registered with path rewriting enabled.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.scope.path = path.into();
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Sets the response status.
    ///
    /// The status is frozen once the response has started: setting a
    /// different status afterwards fails, re-setting the same one is a
    /// no-op.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), PlugError> {
        if self.started && self.status != Some(status) {
            return Err(StateError::StatusFrozen.into());
        }
        self.status = Some(status);
        Ok(())
    }

    /// Request headers as a case-insensitive multi-map, parsed from the raw
    /// scope pairs on first access.
    pub fn req_headers(&self) -> Result<&HeaderMap, PlugError> {
        self.req_headers.get_or_try_init(|| {
            let mut map = HeaderMap::with_capacity(self.scope.headers.len());
            for (name, value) in &self.scope.headers {
                let name = HeaderName::from_bytes(name).map_err(RequestError::invalid_header)?;
                let value = HeaderValue::from_bytes(value).map_err(RequestError::invalid_header)?;
                map.append(name, value);
            }
            Ok(map)
        })
    }

    /// Request cookies, parsed once from the `cookie` header.
    pub fn req_cookies(&self) -> Result<&[Cookie<'static>], PlugError> {
        let cookies = self.req_cookies.get_or_try_init(|| {
            let mut cookies = Vec::new();
            if let Some(value) = self.req_headers()?.get(COOKIE) {
                let raw = value.to_str().map_err(RequestError::invalid_header)?.to_owned();
                for parsed in Cookie::split_parse(raw) {
                    cookies.push(parsed.map_err(RequestError::invalid_header)?);
                }
            }
            Ok::<_, PlugError>(cookies)
        })?;
        Ok(cookies.as_slice())
    }

    /// Looks up a request cookie by name.
    pub fn req_cookie(&self, name: &str) -> Result<Option<&Cookie<'static>>, PlugError> {
        Ok(self.req_cookies()?.iter().find(|cookie| cookie.name() == name))
    }

    /// Query parameters decoded from the raw query string, in order.
    pub fn query_params(&self) -> Result<Vec<(String, String)>, PlugError> {
        serde_urlencoded::from_bytes::<Vec<(String, String)>>(&self.scope.query_string)
            .map_err(|e| RequestError::invalid_query(e).into())
    }

    /// Appends a response header.
    pub fn put_resp_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.resp_headers.append(name, value);
        self
    }

    pub fn resp_headers(&self) -> &HeaderMap {
        &self.resp_headers
    }

    /// Queues a cookie; it is serialized into a `set-cookie` header when
    /// the response starts.
    pub fn put_resp_cookie(&mut self, cookie: Cookie<'static>) -> &mut Self {
        self.resp_cookies.push(cookie);
        self
    }

    /// Looks up a value in the private store.
    ///
    /// `None` means the key was never set; `Some(Value::Null)` means it
    /// was deliberately set to an absent value. The two are distinct so
    /// that typo'd keys do not read as silently empty.
    pub fn get_private(&self, key: &str) -> Option<&Value> {
        self.private.get(key)
    }

    pub fn put_private(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.private.insert(key.into(), value);
        self
    }

    /// Direct access to the private store for plugs that maintain
    /// composite entries.
    pub fn private_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.private
    }

    /// Registers a callback fired once when the response starts.
    pub fn register_after_start<F>(&mut self, hook: F)
    where
        F: for<'a> FnMut(&'a mut Conn) -> BoxFuture<'a, Result<(), PlugError>> + Send + 'static,
    {
        self.after_start.push(Box::new(hook));
    }

    /// Registers a callback fired once when the terminal body message is
    /// sent.
    pub fn register_after_send<F>(&mut self, hook: F)
    where
        F: for<'a> FnMut(&'a mut Conn) -> BoxFuture<'a, Result<(), PlugError>> + Send + 'static,
    {
        self.after_send.push(Box::new(hook));
    }

    /// Receives the next inbound message from the transport.
    pub async fn receive(&mut self) -> Result<InboundMessage, PlugError> {
        let receive = self.receive.as_mut().ok_or_else(|| StateError::not_plugged("receive"))?;
        Ok(receive.receive().await?)
    }

    /// Sends an outbound message, observing it for lifecycle transitions.
    ///
    /// The first response-start message flips `started` and fires the
    /// after-start hooks in registration order; the first terminal body
    /// message flips `halted` and fires the after-send hooks. Detection
    /// keys on the message itself, so raw sends from any code path keep
    /// the lifecycle coherent.
    pub async fn send(&mut self, message: OutboundMessage) -> Result<(), PlugError> {
        let starts = !self.started && message.is_response_start();
        let completes = !self.halted && message.is_final_body();
        let kind = message.kind();
        {
            let transmit = self.transmit.as_mut().ok_or_else(|| StateError::not_plugged("send"))?;
            transmit.transmit(message).await?;
        }
        if starts {
            self.started = true;
            trace!(kind, "response started");
            self.fire_hooks(HookKind::AfterStart).await?;
        }
        if completes {
            self.halted = true;
            trace!(kind, "response completed, conn halted");
            self.fire_hooks(HookKind::AfterSend).await?;
        }
        Ok(())
    }

    async fn fire_hooks(&mut self, kind: HookKind) -> Result<(), PlugError> {
        // The list is taken out while firing so hooks may borrow the conn;
        // it is restored afterwards (each list fires at most once per conn,
        // the lifecycle flags cannot flip twice).
        let mut hooks = match kind {
            HookKind::AfterStart => std::mem::take(&mut self.after_start),
            HookKind::AfterSend => std::mem::take(&mut self.after_send),
        };
        let mut result = Ok(());
        for hook in hooks.iter_mut() {
            if let Err(e) = hook(self).await {
                result = Err(e);
                break;
            }
        }
        let slot = match kind {
            HookKind::AfterStart => &mut self.after_start,
            HookKind::AfterSend => &mut self.after_send,
        };
        hooks.append(slot);
        *slot = hooks;
        result
    }

    /// Sends a response body chunk, starting the response first if needed.
    ///
    /// Fails if the connection is already halted, or if a status different
    /// from the established one is supplied after the response started.
    /// When `halt` is requested on a not-yet-started response, a
    /// content-length header is synthesized from the body size.
    pub async fn send_resp(
        &mut self,
        body: impl Into<Bytes>,
        status: Option<StatusCode>,
        halt: bool,
    ) -> Result<(), PlugError> {
        let body = body.into();
        if self.halted {
            return Err(StateError::AlreadyHalted.into());
        }
        if self.started {
            if let Some(status) = status {
                if self.status != Some(status) {
                    return Err(StateError::StatusFrozen.into());
                }
            }
        } else {
            if let Some(status) = status {
                self.status = Some(status);
            }
            if halt {
                self.resp_headers.append(CONTENT_LENGTH, HeaderValue::from(body.len()));
            }
            self.start_resp().await?;
        }
        self.send(OutboundMessage::HttpResponseBody { body, more_body: true }).await?;
        if halt {
            self.halt().await?;
        }
        Ok(())
    }

    /// Finalizes the status (default 200) and sends the response-start
    /// message carrying the response headers and queued cookies.
    pub async fn start_resp(&mut self) -> Result<(), PlugError> {
        let status = self.status.unwrap_or(StatusCode::OK);
        self.status = Some(status);
        let mut headers = self.resp_header_pairs();
        for cookie in &self.resp_cookies {
            headers.push((Bytes::from_static(b"set-cookie"), Bytes::from(cookie.to_string())));
        }
        self.send(OutboundMessage::HttpResponseStart { status, headers }).await
    }

    /// Terminates the response.
    ///
    /// A not-yet-started response is started with status 204 first; then
    /// the terminal body message goes out. Halting twice is an error.
    pub async fn halt(&mut self) -> Result<(), PlugError> {
        if self.halted {
            return Err(StateError::AlreadyHalted.into());
        }
        if !self.started {
            self.status = Some(StatusCode::NO_CONTENT);
            self.start_resp().await?;
        }
        self.send(OutboundMessage::HttpResponseBody { body: Bytes::new(), more_body: false }).await
    }

    /// Redirects to `location` (default 302) and halts.
    ///
    /// Fails if the response already started.
    pub async fn redirect(
        &mut self,
        location: &str,
        code: Option<StatusCode>,
        body: impl Into<Bytes>,
    ) -> Result<(), PlugError> {
        if self.started {
            return Err(StateError::AlreadyStarted.into());
        }
        let value = HeaderValue::from_str(location).map_err(RuntimeError::invalid_header_value)?;
        self.resp_headers.append(LOCATION, value);
        self.status = Some(code.unwrap_or(StatusCode::FOUND));
        self.send_resp(body, None, true).await
    }

    /// Serializes the current response headers into raw pairs.
    pub(crate) fn resp_header_pairs(&self) -> Vec<(Bytes, Bytes)> {
        self.resp_headers
            .iter()
            .map(|(name, value)| {
                (Bytes::copy_from_slice(name.as_str().as_bytes()), Bytes::copy_from_slice(value.as_bytes()))
            })
            .collect()
    }

    /// Declared body limit: the non-chunked content length, if any.
    ///
    /// A chunked transfer encoding, an absent header or a declared zero all
    /// mean "no limit to enforce".
    pub(crate) fn declared_body_limit(&self) -> Result<Option<u64>, PlugError> {
        let headers = self.req_headers()?;
        let chunked = headers
            .get(TRANSFER_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == "chunked");
        if chunked {
            return Ok(None);
        }
        match headers.get(CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => {
                let length = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| RequestError::invalid_content_length("not an integer"))?;
                Ok((length > 0).then_some(length))
            }
        }
    }
}

#[derive(Clone, Copy)]
enum HookKind {
    AfterStart,
    AfterSend,
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("type", &self.scope.conn_type)
            .field("method", &self.scope.method)
            .field("path", &self.scope.path)
            .field("status", &self.status)
            .field("started", &self.started)
            .field("halted", &self.halted)
            .finish()
    }
}
