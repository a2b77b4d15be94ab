//! Dispatch facade, HTTP listener, and graceful shutdown.
//!
//! The [`Server`] is the single top-level handler: it owns the routing
//! table and the global middleware chain, and every inbound request goes
//! through [`Server::dispatch`]. The listener side is hyper + tokio —
//! accept loop, per-connection tasks, and SIGTERM/Ctrl-C draining.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before SIGKILL. The
//! server reacts by:
//! 1. Immediately stopping `listener.accept()` — no new connections.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::listen`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Error;
use crate::handler::{ErasedHandler, Handler};
use crate::method::Method;
use crate::middleware::{self, BoxedMiddleware};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// The HTTP server: routing table + global middleware chain.
///
/// Both are fixed by the time requests flow: the chain at construction, the
/// table through the consuming registration methods. Dispatch therefore
/// reads shared state without any locking.
///
/// ```rust,no_run
/// use midway::{middleware, Request, Response, Server};
///
/// # async fn hello(_req: Request) -> Response { Response::text("hi") }
/// # async fn run() {
/// Server::with_middlewares([middleware::trace()])
///     .get("/hello", hello)
///     .listen("0.0.0.0:3000")
///     .await
///     .unwrap();
/// # }
/// ```
pub struct Server {
    router: Router,
    middlewares: Vec<BoxedMiddleware>,
}

impl Server {
    /// A server with an empty global chain.
    pub fn new() -> Self {
        Self { router: Router::new(), middlewares: Vec::new() }
    }

    /// A server whose global chain is `middlewares`, in the given order.
    ///
    /// The first middleware executes outermost: its pre-handler logic runs
    /// first and its post-handler logic last. The chain is fixed here —
    /// there is deliberately no way to add to it later.
    pub fn with_middlewares(middlewares: impl IntoIterator<Item = BoxedMiddleware>) -> Self {
        Self {
            router: Router::new(),
            middlewares: middlewares.into_iter().collect(),
        }
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Registers a handler for a method + path pair. Returns `self` so
    /// registrations chain.
    ///
    /// The pattern goes to the routing table verbatim — parameter syntax
    /// (`{name}`) and conflict rules are [`matchit`]'s.
    ///
    /// # Panics
    ///
    /// Panics if the routing table rejects the pattern.
    pub fn handle(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.router.register(method, path, handler.into_boxed_handler());
        self
    }

    /// Shorthand for [`handle`](Self::handle) with [`Method::Get`].
    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.handle(Method::Get, path, handler)
    }

    /// Shorthand for [`handle`](Self::handle) with [`Method::Post`].
    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.handle(Method::Post, path, handler)
    }

    /// Shorthand for [`handle`](Self::handle) with [`Method::Put`].
    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.handle(Method::Put, path, handler)
    }

    /// Shorthand for [`handle`](Self::handle) with [`Method::Delete`].
    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.handle(Method::Delete, path, handler)
    }

    /// Shorthand for [`handle`](Self::handle) with [`Method::Patch`].
    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.handle(Method::Patch, path, handler)
    }

    /// Shorthand for [`handle`](Self::handle) with [`Method::Head`].
    pub fn head(self, path: &str, handler: impl Handler) -> Self {
        self.handle(Method::Head, path, handler)
    }

    /// Shorthand for [`handle`](Self::handle) with [`Method::Options`].
    pub fn options(self, path: &str, handler: impl Handler) -> Self {
        self.handle(Method::Options, path, handler)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Routes one request through the global chain and produces a response.
    ///
    /// A routing miss resolves to the built-in not-found handler, which is
    /// composed with the global chain exactly like a registered one — a 404
    /// is still traced, tagged, or whatever else the chain does.
    ///
    /// The composed handler is rebuilt on each call; composition is pure,
    /// so this is a handful of `Arc` clones, and no caching is needed for
    /// correctness.
    pub async fn dispatch(&self, mut req: Request) -> Response {
        let resolved = match self.router.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.params = params;
                handler
            }
            None => not_found.into_boxed_handler(),
        };

        middleware::compose_slice(resolved, &self.middlewares)
            .call(req)
            .await
    }

    // ── Listener ─────────────────────────────────────────────────────────────

    /// Binds `addr` and serves requests until a full graceful shutdown
    /// (SIGTERM or Ctrl-C, followed by all in-flight requests completing).
    ///
    /// Bind failures (e.g. address already in use) propagate as [`Error`].
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    pub async fn listen(self, addr: &str) -> Result<(), Error> {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        let listener = TcpListener::bind(addr).await?;

        // Shared across concurrent connection tasks without copying the
        // routing table.
        let server = Arc::new(self);

        info!(%addr, "midway listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM immediately stops
                // accepting, even with connections queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let server = Arc::clone(&server);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection, not
                        // once per connection.
                        let svc = service_fn(move |req| {
                            let server = Arc::clone(&server);
                            async move { serve_request(server, req).await }
                        });

                        // auto::Builder handles both HTTP/1.1 and HTTP/2,
                        // whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not
                // grow without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: every in-flight connection finishes before we return.
        while tasks.join_next().await.is_some() {}

        info!("midway stopped");
        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

// ── Hyper glue ────────────────────────────────────────────────────────────────

/// Lifts one hyper request into [`Request`], dispatches it, and lowers the
/// response back to the wire types.
///
/// The error type is [`Infallible`]: every failure becomes an HTTP response,
/// so hyper never sees an error from us. Handler panics are the one
/// exception — they propagate into the connection task, by policy.
async fn serve_request(
    server: Arc<Server>,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    // A method outside the RFC 9110 set never reaches the routing table.
    let Ok(method) = req.method().as_str().parse::<Method>() else {
        return Ok(Response::status(StatusCode::METHOD_NOT_ALLOWED).into_http());
    };

    let path = req.uri().path().to_owned();
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (k.as_str().to_owned(), String::from_utf8_lossy(v.as_bytes()).into_owned())
        })
        .collect();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(e) => {
            error!("failed to read request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_http());
        }
    };

    let request = Request::new(method, path, headers, body);
    Ok(server.dispatch(request).await.into_http())
}

/// Terminal handler for routing misses. Runs through the global chain like
/// any registered handler.
async fn not_found(_req: Request) -> Response {
    Response::status(StatusCode::NOT_FOUND)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by the Kubernetes
/// control plane) and **SIGINT** (Ctrl-C, for local dev). On Windows only
/// Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves, so on non-Unix platforms the SIGTERM arm
    // is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{compose, from_fn, Next};

    fn request(method: Method, path: &str) -> Request {
        Request::new(method, path.to_owned(), Vec::new(), Vec::new())
    }

    async fn hello(_req: Request) -> Response {
        Response::text("Hello, World!")
    }

    /// Prepends and appends the tag's digits to the inner response body.
    fn tag(i: u32) -> BoxedMiddleware {
        from_fn(move |req: Request, next: Next| async move {
            let mut res = next.run(req).await;
            let mut body = i.to_string().into_bytes();
            body.extend_from_slice(res.body());
            body.extend(i.to_string().into_bytes());
            res.set_body(body);
            res
        })
    }

    #[tokio::test]
    async fn global_chain_wraps_route_handler() {
        let app = Server::with_middlewares([tag(1)]).get("/1", hello);

        let res = app.dispatch(request(Method::Get, "/1")).await;
        assert_eq!(res.body(), b"1Hello, World!1");
    }

    #[tokio::test]
    async fn no_middlewares_leaves_handler_untouched() {
        let app = Server::new().get("/1", hello);

        let res = app.dispatch(request(Method::Get, "/1")).await;
        assert_eq!(res.body(), b"Hello, World!");
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn global_chain_wraps_local_chain() {
        let app = Server::with_middlewares([tag(1)])
            .get("/1", compose(hello, [tag(2), tag(3)]));

        let res = app.dispatch(request(Method::Get, "/1")).await;
        assert_eq!(res.body(), b"123Hello, World!321");
    }

    #[tokio::test]
    async fn not_found_runs_through_global_chain() {
        let app = Server::with_middlewares([tag(9)]).get("/1", hello);

        let res = app.dispatch(request(Method::Get, "/missing")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        // The chain saw the 404: both markers landed around the empty body.
        assert_eq!(res.body(), b"99");
    }

    #[tokio::test]
    async fn method_mismatch_is_a_routing_miss() {
        let app = Server::new().get("/1", hello);

        let res = app.dispatch(request(Method::Post, "/1")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn repeated_dispatch_is_deterministic() {
        let app = Server::with_middlewares([tag(1)])
            .get("/1", compose(hello, [tag(2)]))
            .get("/2", hello);

        for _ in 0..3 {
            let res = app.dispatch(request(Method::Get, "/1")).await;
            assert_eq!(res.body(), b"12Hello, World!21");
            let res = app.dispatch(request(Method::Get, "/2")).await;
            assert_eq!(res.body(), b"1Hello, World!1");
        }
    }

    #[tokio::test]
    async fn path_params_reach_the_handler() {
        async fn echo_id(req: Request) -> Response {
            Response::text(req.param("id").unwrap_or("none").to_owned())
        }

        let app = Server::new().get("/users/{id}", echo_id);

        let res = app.dispatch(request(Method::Get, "/users/42")).await;
        assert_eq!(res.body(), b"42");
    }

    #[tokio::test]
    async fn registration_shorthands_route_by_method() {
        async fn created(_req: Request) -> Response {
            Response::status(StatusCode::CREATED)
        }

        let app = Server::new()
            .get("/r", hello)
            .post("/r", created)
            .delete("/r", |_req: Request| async {
                Response::status(StatusCode::NO_CONTENT)
            });

        let res = app.dispatch(request(Method::Post, "/r")).await;
        assert_eq!(res.status_code(), StatusCode::CREATED);
        let res = app.dispatch(request(Method::Delete, "/r")).await;
        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        let res = app.dispatch(request(Method::Get, "/r")).await;
        assert_eq!(res.body(), b"Hello, World!");
    }

    #[tokio::test]
    async fn concurrent_dispatches_share_nothing_mutable() {
        let app = Arc::new(Server::with_middlewares([tag(1)]).get("/1", hello));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let app = Arc::clone(&app);
            handles.push(tokio::spawn(async move {
                app.dispatch(request(Method::Get, "/1")).await
            }));
        }
        for handle in handles {
            let res = handle.await.unwrap();
            assert_eq!(res.body(), b"1Hello, World!1");
        }
    }
}
