//! Streaming request body consumption.
//!
//! [`BodyIter`] is a lazy, finite, non-restartable pass over the request
//! body: each step receives one inbound message, appends any delivered
//! chunk to the connection's accumulation buffer and yields it. At most
//! one pass may be in flight at a time; starting another while the
//! previous one still has data pending is a state error.

use bytes::{Bytes, BytesMut};

use super::Conn;
use crate::protocol::{ConnType, InboundMessage, PlugError, RequestError, RuntimeError, StateError};

/// Lazy pass over the request body chunks.
///
/// Produced by [`Conn::body_iter`]; drive it with [`BodyIter::next`] until
/// it yields `None`.
#[derive(Debug)]
pub struct BodyIter<'conn> {
    conn: &'conn mut Conn,
    /// One full-buffer yield when the body was already drained by an
    /// earlier pass. Restarting after exhaustion replays the accumulated
    /// content instead of failing; a regression test pins this behavior.
    replay: Option<Bytes>,
    limit: Option<u64>,
}

impl Conn {
    /// Starts a lazy pass over the request body.
    ///
    /// Fails with a request error on a non-HTTP connection and with a
    /// state error if a previous pass is still in flight. The declared
    /// content length (when the transfer encoding is not chunked) is
    /// enforced while iterating.
    pub fn body_iter(&mut self) -> Result<BodyIter<'_>, PlugError> {
        if self.conn_type() != ConnType::Http {
            return Err(RequestError::NotHttp.into());
        }
        if self.http_received_body_length > 0 && self.http_has_more_body {
            return Err(StateError::BodyIterInFlight.into());
        }
        let replay = (self.http_received_body_length > 0 && !self.http_has_more_body)
            .then(|| Bytes::copy_from_slice(&self.http_body));
        let limit = self.declared_body_limit()?;
        Ok(BodyIter { conn: self, replay, limit })
    }

    /// Fully drains [`Conn::body_iter`] and returns the concatenation.
    pub async fn body(&mut self) -> Result<Bytes, PlugError> {
        let mut iter = self.body_iter()?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = iter.next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl BodyIter<'_> {
    /// Yields the next body chunk, or `None` once the body is exhausted.
    ///
    /// Messages that do not deliver body data are skipped without
    /// yielding. A disconnect message fails the pass with a request
    /// error; a non-binary chunk is an internal contract violation.
    pub async fn next(&mut self) -> Result<Option<Bytes>, PlugError> {
        if let Some(replay) = self.replay.take() {
            return Ok(Some(replay));
        }
        while self.conn.http_has_more_body {
            if let Some(limit) = self.limit {
                if self.conn.http_received_body_length > limit {
                    return Err(RequestError::body_overflow(self.conn.http_received_body_length, limit).into());
                }
            }
            let message = self.conn.receive().await?;
            match message {
                InboundMessage::HttpDisconnect => return Err(RequestError::Disconnected.into()),
                InboundMessage::HttpRequest { body, more_body } => {
                    let chunk = body.into_binary().ok_or(RuntimeError::NonBinaryChunk)?;
                    self.conn.http_body.extend_from_slice(&chunk);
                    self.conn.http_has_more_body = more_body;
                    self.conn.http_received_body_length += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                // not a body-delivery message, skip without yielding
                _ => continue,
            }
        }
        Ok(None)
    }
}
