//! Pattern dispatch for the plug middleware core.
//!
//! [`Router`] is itself a plug: it runs its pre-chain children, then
//! matches the request path against angle-bracket patterns such as
//! `/users/<int:id>`, redirects slash-less requests to their canonical
//! slashed form, rejects known paths hit with the wrong method, and
//! forwards everything else to delegate plugs by literal prefix.
//! Routers nest by forwarding into each other.
//!
//! ```
//! use futures::FutureExt;
//! use plug_core::{plug_fn, Conn};
//! use plug_router::Router;
//!
//! # fn build() -> Result<Router, plug_router::RouterSetupError> {
//! let hello = plug_fn(|conn: &mut Conn| {
//!     async move { conn.send_resp("hello", None, true).await }.boxed()
//! });
//! Router::new().route("/hello/<name>", &[http::Method::GET], hello)
//! # }
//! ```

mod error;
mod router;
mod rule;

pub use error::RouterSetupError;
pub use router::{Router, CONSUMED_PATH_KEY, REMAINING_PATH_KEY, ROUTER_ARGS_KEY};
pub use rule::{Converter, RouteArgs, Rule};
