//! Boundary glue between a transport and a plug chain.
//!
//! A host runtime hands us three things per exchange: the metadata
//! record and the two asynchronous primitives. [`Adapter`] turns that
//! triple into a [`Conn`] and runs the root plug exactly once. Anything
//! the chain raises unwinds out of [`Adapter::handle`] untouched; error
//! presentation is the host's business.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::conn::Conn;
use crate::plug::Plug;
use crate::protocol::{PlugError, Scope};
use crate::transport::{Receive, Transmit};

/// Runs a root plug once per exchange.
pub struct Adapter<P> {
    root: P,
}

impl<P: Plug> Adapter<P> {
    pub fn new(root: P) -> Self {
        Self { root }
    }

    /// Constructs a connection from the transport triple and processes it
    /// through the root plug chain.
    ///
    /// Returns the finished connection so the caller can inspect its
    /// final lifecycle state.
    pub async fn handle(
        &self,
        scope: Scope,
        receive: Box<dyn Receive>,
        transmit: Box<dyn Transmit>,
    ) -> Result<Conn, PlugError> {
        debug!(method = %scope.method, path = %scope.path, "handling exchange");
        let mut conn = Conn::new(scope, Some(receive), Some(transmit));
        self.root.process(&mut conn).await?;
        Ok(conn)
    }
}

impl<P> fmt::Debug for Adapter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter").finish_non_exhaustive()
    }
}

/// An externally supplied application driven over the connection's own
/// receive/send primitives.
///
/// The delegate observes and emits raw messages through the connection,
/// so its sends still participate in lifecycle transition detection.
/// This is a pure pass-through: no additional state-machine logic is
/// layered on top.
#[async_trait]
pub trait DelegateApp: Send + Sync {
    async fn handle(&self, conn: &mut Conn) -> Result<(), PlugError>;
}

impl Conn {
    /// Invokes an externally supplied delegate application on this
    /// connection.
    pub async fn call_app(&mut self, app: &dyn DelegateApp) -> Result<(), PlugError> {
        app.handle(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::testing::http_get;
    use crate::plug::{plug_fn, Pipeline};
    use crate::protocol::OutboundMessage;
    use crate::transport::{inbound_channel, outbound_channel};
    use bytes::Bytes;
    use futures::FutureExt;
    use http::StatusCode;

    #[tokio::test]
    async fn adapter_runs_the_root_plug_once() {
        let root = Pipeline::new().plug(plug_fn(|conn: &mut Conn| {
            async move { conn.send_resp(Bytes::from_static(b"ok"), None, true).await }.boxed()
        }));
        let adapter = Adapter::new(root);

        let (_tx, receiver) = inbound_channel();
        let (transmitter, mut rx_out) = outbound_channel();
        let conn = adapter.handle(http_get("/"), Box::new(receiver), Box::new(transmitter)).await.unwrap();

        assert!(conn.halted());
        assert_eq!(conn.status(), Some(StatusCode::OK));
        assert!(rx_out.try_recv().unwrap().is_response_start());
    }

    #[tokio::test]
    async fn delegate_sends_participate_in_lifecycle() {
        struct RawApp;

        #[async_trait]
        impl DelegateApp for RawApp {
            async fn handle(&self, conn: &mut Conn) -> Result<(), PlugError> {
                conn.send(OutboundMessage::HttpResponseStart { status: StatusCode::OK, headers: vec![] }).await?;
                conn.send(OutboundMessage::HttpResponseBody { body: Bytes::new(), more_body: false }).await
            }
        }

        let (mut conn, _tx, _rx) = crate::conn::testing::plugged(http_get("/"));
        conn.call_app(&RawApp).await.unwrap();
        assert!(conn.started());
        assert!(conn.halted());
    }
}
