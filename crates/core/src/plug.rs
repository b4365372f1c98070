//! Composable middleware units.
//!
//! A [`Plug`] is one processing step in a tree-shaped, short-circuiting
//! chain. Every plug owns an ordered, per-instance list of child plugs
//! that run before its own terminal logic; after each child returns, the
//! connection's halted flag is checked and the chain stops immediately
//! once it is set. Children act as preconditions and cross-cutting
//! effects (logging, parsing, authorization) that can unilaterally
//! terminate the exchange.
//!
//! Children run strictly one after another, never concurrently, so
//! short-circuit ordering is deterministic. Errors are never swallowed:
//! anything raised anywhere in the chain unwinds to the boundary adapter.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::conn::Conn;
use crate::protocol::PlugError;

/// One composable processing step.
#[async_trait]
pub trait Plug: Send + Sync {
    /// The ordered child plugs run ahead of [`Plug::call`].
    ///
    /// The default is empty. Implementors with children must own their
    /// list per instance; sharing one list between instances would alias
    /// registrations across unrelated chains.
    fn plugs(&self) -> &[Arc<dyn Plug>] {
        &[]
    }

    /// Terminal logic of this plug, run after all children completed
    /// without halting the connection.
    async fn call(&self, conn: &mut Conn) -> Result<(), PlugError>;

    /// Runs the full chain: children in order with halt short-circuit,
    /// then the terminal logic.
    async fn process(&self, conn: &mut Conn) -> Result<(), PlugError> {
        for plug in self.plugs() {
            plug.process(conn).await?;
            if conn.halted() {
                debug!("conn halted, short-circuiting plug chain");
                return Ok(());
            }
        }
        self.call(conn).await
    }
}

/// A plug that is nothing but its child list.
///
/// Useful as the root of an application: compose cross-cutting plugs and
/// a router into one chain with a no-op terminal.
#[derive(Default)]
pub struct Pipeline {
    plugs: Vec<Arc<dyn Plug>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a child plug.
    pub fn plug(mut self, plug: impl Plug + 'static) -> Self {
        self.plugs.push(Arc::new(plug));
        self
    }

    /// Appends an already shared child plug.
    pub fn plug_arc(mut self, plug: Arc<dyn Plug>) -> Self {
        self.plugs.push(plug);
        self
    }
}

#[async_trait]
impl Plug for Pipeline {
    fn plugs(&self) -> &[Arc<dyn Plug>] {
        &self.plugs
    }

    async fn call(&self, _conn: &mut Conn) -> Result<(), PlugError> {
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("plugs", &self.plugs.len()).finish()
    }
}

/// A closure holder which represents any async plug function.
pub struct FnPlug<F> {
    f: F,
}

/// Wraps an async closure as a [`Plug`].
///
/// The closure borrows the connection for the duration of its future:
///
/// ```
/// use futures::FutureExt;
/// use plug_core::{plug_fn, Conn};
///
/// let hello = plug_fn(|conn: &mut Conn| {
///     async move { conn.send_resp("hello", None, true).await }.boxed()
/// });
/// # let _ = hello;
/// ```
pub fn plug_fn<F>(f: F) -> FnPlug<F>
where
    F: for<'a> Fn(&'a mut Conn) -> BoxFuture<'a, Result<(), PlugError>> + Send + Sync,
{
    FnPlug { f }
}

#[async_trait]
impl<F> Plug for FnPlug<F>
where
    F: for<'a> Fn(&'a mut Conn) -> BoxFuture<'a, Result<(), PlugError>> + Send + Sync,
{
    async fn call(&self, conn: &mut Conn) -> Result<(), PlugError> {
        (self.f)(conn).await
    }
}

impl<F> fmt::Debug for FnPlug<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPlug").finish_non_exhaustive()
    }
}

type Predicate = Box<dyn Fn(&Conn) -> bool + Send + Sync>;

/// Predicate dispatch: runs the chain of the first matching case.
///
/// Cases are tried in registration order; a connection matching none of
/// them passes through untouched.
pub struct Guard {
    cases: Vec<(Predicate, Arc<dyn Plug>)>,
}

impl Guard {
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Appends a predicate/plug case.
    pub fn case<P>(mut self, predicate: P, plug: impl Plug + 'static) -> Self
    where
        P: Fn(&Conn) -> bool + Send + Sync + 'static,
    {
        self.cases.push((Box::new(predicate), Arc::new(plug)));
        self
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plug for Guard {
    async fn call(&self, conn: &mut Conn) -> Result<(), PlugError> {
        for (predicate, plug) in &self.cases {
            if predicate(conn) {
                return plug.process(conn).await;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard").field("cases", &self.cases.len()).finish()
    }
}
