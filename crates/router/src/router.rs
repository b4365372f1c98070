//! Pattern dispatch and prefix forwarding.
//!
//! A [`Router`] is a plug whose terminal logic matches the per-exchange
//! *remaining path* against its route table and, failing that, forwards
//! to delegate plugs by literal prefix. Nested routers compose by
//! forwarding into each other: every level strips its consumed prefix
//! from the remaining path, so the innermost router only ever sees its
//! own slice of the request path.
//!
//! Both tables are built during setup and never mutated while serving;
//! registration conflicts (duplicate endpoint name, duplicate forward
//! prefix) fail immediately.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::debug;

use plug_core::{Conn, Plug, PlugError};

use crate::error::RouterSetupError;
use crate::rule::{RouteArgs, Rule};

/// Private-store key holding the not-yet-consumed part of the request
/// path, shrinking across nested forwards.
pub const REMAINING_PATH_KEY: &str = "remaining_path";
/// Private-store key holding the list of forward prefixes consumed so
/// far, outermost first.
pub const CONSUMED_PATH_KEY: &str = "consumed_path";
/// Private-store key holding the accumulated route arguments, merged
/// across nested forwards.
pub const ROUTER_ARGS_KEY: &str = "router_args";

struct RouteEntry {
    rule: Rule,
    methods: Option<HashSet<Method>>,
    endpoint: String,
    plug: Arc<dyn Plug>,
}

struct ForwardEntry {
    prefix: String,
    delegate: Arc<dyn Plug>,
    change_path: bool,
}

impl RouteEntry {
    fn allows(&self, method: &Method) -> bool {
        self.methods.as_ref().is_none_or(|set| set.contains(method))
    }
}

enum RouteOutcome {
    Matched { index: usize, args: RouteArgs },
    Canonicalize { location: String },
    MethodNotAllowed,
    NotFound,
}

/// A plug performing pattern dispatch with hierarchical delegation.
pub struct Router {
    plugs: Vec<Arc<dyn Plug>>,
    routes: Vec<RouteEntry>,
    endpoints: HashSet<String>,
    forwards: Vec<ForwardEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self { plugs: Vec::new(), routes: Vec::new(), endpoints: HashSet::new(), forwards: Vec::new() }
    }

    /// Appends a pre-chain child plug run before dispatch.
    pub fn plug(mut self, plug: impl Plug + 'static) -> Self {
        self.plugs.push(Arc::new(plug));
        self
    }

    /// Registers a route with a name derived from the handler type.
    ///
    /// An empty method list leaves the route unrestricted; a non-empty
    /// one implicitly allows OPTIONS alongside the listed methods.
    pub fn route<P: Plug + 'static>(self, pattern: &str, methods: &[Method], plug: P) -> Result<Self, RouterSetupError> {
        let methods = Self::method_set(methods);
        self.add_route(pattern, methods, None, plug)
    }

    /// Registers a route under an explicit endpoint name.
    ///
    /// Method handling is the same as for [`Router::route`].
    pub fn named_route<P: Plug + 'static>(
        self,
        pattern: &str,
        methods: &[Method],
        name: &str,
        plug: P,
    ) -> Result<Self, RouterSetupError> {
        let methods = Self::method_set(methods);
        self.add_route(pattern, methods, Some(name), plug)
    }

    // the convenience registrars always allow OPTIONS on restricted routes
    fn method_set(methods: &[Method]) -> Option<HashSet<Method>> {
        if methods.is_empty() {
            return None;
        }
        let mut set: HashSet<Method> = methods.iter().cloned().collect();
        set.insert(Method::OPTIONS);
        Some(set)
    }

    /// Registers a route with full control over methods and name.
    ///
    /// The endpoint name (explicit, or derived from the handler type)
    /// must be unique within this router.
    pub fn add_route<P: Plug + 'static>(
        mut self,
        pattern: &str,
        methods: Option<HashSet<Method>>,
        name: Option<&str>,
        plug: P,
    ) -> Result<Self, RouterSetupError> {
        let rule = Rule::parse(pattern)?;
        let endpoint = name.map_or_else(derived_name::<P>, str::to_owned);
        if !self.endpoints.insert(endpoint.clone()) {
            return Err(RouterSetupError::DuplicateEndpoint { name: endpoint });
        }
        debug!(pattern, endpoint = %endpoint, "route registered");
        self.routes.push(RouteEntry { rule, methods, endpoint, plug: Arc::new(plug) });
        Ok(self)
    }

    /// Registers a forward: requests whose remaining path starts with
    /// `prefix` and match no route are delegated to `delegate`, with the
    /// prefix stripped from the remaining path. With `change_path` set,
    /// the externally visible request path is rewritten too.
    ///
    /// The prefix must be unique within this router.
    pub fn forward(
        mut self,
        prefix: &str,
        delegate: impl Plug + 'static,
        change_path: bool,
    ) -> Result<Self, RouterSetupError> {
        if self.forwards.iter().any(|forward| forward.prefix == prefix) {
            return Err(RouterSetupError::DuplicateForward { prefix: prefix.to_owned() });
        }
        debug!(prefix, change_path, "forward registered");
        self.forwards.push(ForwardEntry { prefix: prefix.to_owned(), delegate: Arc::new(delegate), change_path });
        Ok(self)
    }

    fn match_route(&self, path: &str, method: &Method) -> RouteOutcome {
        let mut canonical: Option<String> = None;
        let mut method_mismatch = false;
        for (index, entry) in self.routes.iter().enumerate() {
            if let Some(args) = entry.rule.match_path(path) {
                if entry.allows(method) {
                    return RouteOutcome::Matched { index, args };
                }
                method_mismatch = true;
                continue;
            }
            if canonical.is_none() && entry.rule.matches_with_slash(path) {
                canonical = Some(format!("{path}/"));
            }
        }
        if let Some(location) = canonical {
            return RouteOutcome::Canonicalize { location };
        }
        if method_mismatch {
            return RouteOutcome::MethodNotAllowed;
        }
        RouteOutcome::NotFound
    }

    /// Remaining path of the exchange, initialized from the request path
    /// on first contact with any router.
    fn remaining_path(&self, conn: &mut Conn) -> String {
        if let Some(Value::String(path)) = conn.get_private(REMAINING_PATH_KEY) {
            return path.clone();
        }
        let path = conn.path().to_owned();
        conn.put_private(REMAINING_PATH_KEY, Value::String(path.clone()));
        path
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn derived_name<P>() -> String {
    std::any::type_name::<P>().to_owned()
}

fn merge_router_args(conn: &mut Conn, args: RouteArgs) {
    let entry = conn
        .private_mut()
        .entry(ROUTER_ARGS_KEY.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(map) = entry {
        for (name, value) in args {
            map.insert(name, value);
        }
    }
}

fn push_consumed(conn: &mut Conn, prefix: &str) {
    let entry = conn
        .private_mut()
        .entry(CONSUMED_PATH_KEY.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(items) = entry {
        items.push(Value::String(prefix.to_owned()));
    }
}

#[async_trait]
impl Plug for Router {
    fn plugs(&self) -> &[Arc<dyn Plug>] {
        &self.plugs
    }

    async fn call(&self, conn: &mut Conn) -> Result<(), PlugError> {
        let remaining = self.remaining_path(conn);
        match self.match_route(&remaining, conn.method()) {
            RouteOutcome::Matched { index, args } => {
                let entry = &self.routes[index];
                debug!(path = %remaining, endpoint = %entry.endpoint, "route matched");
                merge_router_args(conn, args);
                entry.plug.process(conn).await
            }
            RouteOutcome::Canonicalize { location } => {
                debug!(path = %remaining, location = %location, "redirecting to canonical path");
                conn.redirect(&location, Some(StatusCode::FOUND), Bytes::new()).await
            }
            RouteOutcome::MethodNotAllowed => {
                debug!(path = %remaining, method = %conn.method(), "method not allowed");
                conn.send_resp(Bytes::new(), Some(StatusCode::METHOD_NOT_ALLOWED), true).await
            }
            RouteOutcome::NotFound => {
                // among matching prefixes the *shortest* wins; longer and
                // more specific prefixes lose the tie-break
                let matched = self
                    .forwards
                    .iter()
                    .filter(|forward| remaining.starts_with(forward.prefix.as_str()))
                    .min_by_key(|forward| forward.prefix.len());
                match matched {
                    Some(forward) => {
                        let stripped = remaining[forward.prefix.len()..].to_owned();
                        debug!(prefix = %forward.prefix, remaining = %stripped, "forwarding");
                        push_consumed(conn, &forward.prefix);
                        conn.put_private(REMAINING_PATH_KEY, Value::String(stripped.clone()));
                        if forward.change_path {
                            conn.set_path(stripped);
                        }
                        forward.delegate.process(conn).await
                    }
                    // no route, no forward: fall through untouched and
                    // leave the response to the enclosing chain
                    None => Ok(()),
                }
            }
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("forwards", &self.forwards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use plug_core::transport::{inbound_channel, outbound_channel};
    use plug_core::{plug_fn, InboundMessage, OutboundMessage, Pipeline, Scope};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    fn plugged(scope: Scope) -> (Conn, UnboundedSender<InboundMessage>, UnboundedReceiver<OutboundMessage>) {
        let (tx_in, receiver) = inbound_channel();
        let (transmitter, rx_out) = outbound_channel();
        let conn = Conn::new(scope, Some(Box::new(receiver)), Some(Box::new(transmitter)));
        (conn, tx_in, rx_out)
    }

    fn get(path: &str) -> Scope {
        Scope::http(Method::GET, path)
    }

    /// Marks the conn with the handler name so tests can see who ran.
    fn handler(name: &'static str) -> impl Plug {
        plug_fn(move |conn: &mut Conn| {
            async move {
                conn.put_private("handled_by", Value::String(name.to_owned()));
                Ok(())
            }
            .boxed()
        })
    }

    fn handled_by(conn: &Conn) -> Option<&str> {
        conn.get_private("handled_by").and_then(Value::as_str)
    }

    fn router_arg<'c>(conn: &'c Conn, name: &str) -> Option<&'c Value> {
        match conn.get_private(ROUTER_ARGS_KEY) {
            Some(Value::Object(map)) => map.get(name),
            _ => None,
        }
    }

    #[tokio::test]
    async fn exact_match_extracts_parameters() {
        let router = Router::new().route("/foo/<name>/", &[], handler("show")).unwrap();
        let (mut conn, _tx, _rx) = plugged(get("/foo/bar/"));
        router.process(&mut conn).await.unwrap();

        assert_eq!(handled_by(&conn), Some("show"));
        assert_eq!(router_arg(&conn, "name"), Some(&Value::String("bar".to_owned())));
    }

    #[tokio::test]
    async fn int_converter_yields_integer_argument() {
        let router = Router::new().route("/users/<int:id>", &[], handler("user")).unwrap();
        let (mut conn, _tx, _rx) = plugged(get("/users/42"));
        router.process(&mut conn).await.unwrap();

        assert_eq!(handled_by(&conn), Some("user"));
        assert_eq!(router_arg(&conn, "id"), Some(&Value::from(42)));
    }

    #[tokio::test]
    async fn missing_trailing_slash_redirects_to_canonical_path() {
        let router = Router::new().route("/test/", &[], handler("test")).unwrap();
        let (mut conn, _tx, mut rx) = plugged(get("/test"));
        router.process(&mut conn).await.unwrap();

        assert!(conn.halted());
        assert_eq!(conn.status(), Some(StatusCode::FOUND));
        match rx.try_recv().unwrap() {
            OutboundMessage::HttpResponseStart { headers, .. } => {
                assert!(headers.iter().any(|(name, value)| name == "location" && value == "/test/"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(handled_by(&conn).is_none());
    }

    #[tokio::test]
    async fn wrong_method_is_rejected_without_forwarding() {
        let router = Router::new()
            .route("/only-get", &[Method::GET], handler("get"))
            .unwrap()
            .forward("/only", handler("forwarded"), false)
            .unwrap();

        let (mut conn, _tx, _rx) = plugged(Scope::http(Method::PUT, "/only-get"));
        router.process(&mut conn).await.unwrap();

        assert_eq!(conn.status(), Some(StatusCode::METHOD_NOT_ALLOWED));
        assert!(conn.halted());
        assert!(handled_by(&conn).is_none());
    }

    #[tokio::test]
    async fn restricted_route_implicitly_allows_options() {
        let router = Router::new().route("/thing", &[Method::GET], handler("thing")).unwrap();
        let (mut conn, _tx, _rx) = plugged(Scope::http(Method::OPTIONS, "/thing"));
        router.process(&mut conn).await.unwrap();
        assert_eq!(handled_by(&conn), Some("thing"));
    }

    #[tokio::test]
    async fn unmatched_request_falls_through_untouched() {
        let router = Router::new().route("/known", &[], handler("known")).unwrap();
        let (mut conn, _tx, _rx) = plugged(get("/unknown"));
        router.process(&mut conn).await.unwrap();

        assert!(!conn.started());
        assert!(!conn.halted());
        assert!(handled_by(&conn).is_none());
    }

    #[test]
    fn duplicate_endpoint_name_fails_setup() {
        struct NamedHandler;

        #[async_trait]
        impl Plug for NamedHandler {
            async fn call(&self, _conn: &mut Conn) -> Result<(), PlugError> {
                Ok(())
            }
        }

        let result = Router::new()
            .route("/a", &[], NamedHandler)
            .unwrap()
            .route("/b", &[], NamedHandler);
        assert!(matches!(result, Err(RouterSetupError::DuplicateEndpoint { .. })));

        // an explicit name resolves the conflict
        let resolved = Router::new()
            .route("/a", &[], NamedHandler)
            .unwrap()
            .named_route("/b", &[], "second", NamedHandler);
        assert!(resolved.is_ok());
    }

    #[test]
    fn duplicate_forward_prefix_fails_setup() {
        let result = Router::new()
            .forward("/sub", handler("one"), false)
            .unwrap()
            .forward("/sub", handler("two"), false);
        assert!(matches!(result, Err(RouterSetupError::DuplicateForward { .. })));
    }

    #[tokio::test]
    async fn nested_forwards_strip_the_path_level_by_level() {
        let innermost = Router::new().route("/1", &[], handler("innermost")).unwrap();
        let middle = Router::new().forward("/nested", innermost, false).unwrap();
        let outer = Router::new().forward("/sub", middle, false).unwrap();

        let (mut conn, _tx, _rx) = plugged(get("/sub/nested/1"));
        outer.process(&mut conn).await.unwrap();

        assert_eq!(handled_by(&conn), Some("innermost"));
        assert_eq!(
            conn.get_private(CONSUMED_PATH_KEY),
            Some(&Value::Array(vec![
                Value::String("/sub".to_owned()),
                Value::String("/nested".to_owned())
            ]))
        );
        assert_eq!(conn.get_private(REMAINING_PATH_KEY), Some(&Value::String("/1".to_owned())));
        // without change_path the visible request path is untouched
        assert_eq!(conn.path(), "/sub/nested/1");
    }

    #[tokio::test]
    async fn forward_args_merge_across_levels() {
        let inner = Router::new().route("/posts/<int:post>", &[], handler("post")).unwrap();
        let outer = Router::new()
            .route("/users/<int:user>", &[], handler("user"))
            .unwrap()
            .forward("/blog", inner, false)
            .unwrap();

        let (mut conn, _tx, _rx) = plugged(get("/blog/posts/7"));
        outer.process(&mut conn).await.unwrap();

        assert_eq!(handled_by(&conn), Some("post"));
        assert_eq!(router_arg(&conn, "post"), Some(&Value::from(7)));
    }

    // The tie-break picks the *shortest* matching prefix, counter to the
    // longest-prefix convention most routers use. Pinned on purpose.
    #[tokio::test]
    async fn shortest_forward_prefix_wins_the_tie_break() {
        let specific = Router::new().route("/v1/x", &[], handler("specific")).unwrap();
        let general = Router::new().route("/v1/x", &[], handler("general")).unwrap();
        let router = Router::new()
            .forward("/api/v1", specific, false)
            .unwrap()
            .forward("/api", general, false)
            .unwrap();

        let (mut conn, _tx, _rx) = plugged(get("/api/v1/x"));
        router.process(&mut conn).await.unwrap();

        assert_eq!(handled_by(&conn), Some("general"));
        assert_eq!(conn.get_private(REMAINING_PATH_KEY), Some(&Value::String("/v1/x".to_owned())));
    }

    #[tokio::test]
    async fn change_path_rewrites_the_visible_request_path() {
        let inner = Router::new().route("/inner", &[], handler("inner")).unwrap();
        let router = Router::new().forward("/mounted", inner, true).unwrap();

        let (mut conn, _tx, _rx) = plugged(get("/mounted/inner"));
        router.process(&mut conn).await.unwrap();

        assert_eq!(handled_by(&conn), Some("inner"));
        assert_eq!(conn.path(), "/inner");
    }

    #[tokio::test]
    async fn halted_pre_chain_suppresses_dispatch() {
        let logger = plug_fn(|conn: &mut Conn| async move { conn.halt().await }.boxed());
        let router = Router::new().route("/", &[], handler("root")).unwrap();
        let chain = Pipeline::new().plug(logger).plug(router);

        let (mut conn, _tx, _rx) = plugged(get("/"));
        chain.process(&mut conn).await.unwrap();

        assert!(conn.halted());
        assert!(handled_by(&conn).is_none());
    }

    #[tokio::test]
    async fn router_pre_chain_children_run_before_dispatch() {
        let stamp = plug_fn(|conn: &mut Conn| {
            async move {
                conn.put_private("stamped", Value::Bool(true));
                Ok(())
            }
            .boxed()
        });
        let router = Router::new().plug(stamp).route("/", &[], handler("root")).unwrap();

        let (mut conn, _tx, _rx) = plugged(get("/"));
        router.process(&mut conn).await.unwrap();

        assert_eq!(conn.get_private("stamped"), Some(&Value::Bool(true)));
        assert_eq!(handled_by(&conn), Some("root"));
    }
}
