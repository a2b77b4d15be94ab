//! Middleware and the composition algorithm.
//!
//! A middleware is a handler transformer: it takes the next handler in the
//! chain and returns a new handler that layers behavior before and/or after
//! delegating to it. Composition is pure — it builds the wrapper chain and
//! performs no I/O — so a composed handler can be rebuilt on every dispatch
//! and invoked concurrently without synchronisation.
//!
//! # Ordering
//!
//! [`compose`] applies the list back-to-front: the last middleware wraps the
//! terminal handler first and ends up innermost, the first middleware ends
//! up outermost. At request time that yields standard onion ordering — for
//! `[m1, m2]` around terminal `t`:
//!
//! ```text
//! m1-before → m2-before → t → m2-after → m1-after
//! ```
//!
//! # Writing middleware
//!
//! [`from_fn`] is the usual entry point:
//!
//! ```rust
//! use midway::middleware::{from_fn, BoxedMiddleware, Next};
//! use midway::Request;
//!
//! fn auth() -> BoxedMiddleware {
//!     from_fn(|req: Request, next: Next| async move {
//!         if req.header("authorization").is_none() {
//!             return midway::Response::status(midway::StatusCode::UNAUTHORIZED);
//!         }
//!         next.run(req).await
//!     })
//! }
//! ```
//!
//! For full control over the wrapping step, implement [`Middleware`]
//! directly or use a closure `Fn(BoxedHandler) -> BoxedHandler`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::handler::Handler;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

pub use crate::handler::{BoxedHandler, ErasedHandler};

/// A handler transformer.
///
/// `wrap` receives the next handler in the chain and returns the wrapped
/// one. It runs once per composition, not once per request; any per-request
/// work belongs inside the handler it returns.
pub trait Middleware {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

/// A shared, type-erased middleware, as stored in a chain.
pub type BoxedMiddleware = Arc<dyn Middleware + Send + Sync + 'static>;

/// Any `Fn(BoxedHandler) -> BoxedHandler` closure is a middleware.
impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

// ── Composition ───────────────────────────────────────────────────────────────

/// Composes an ordered middleware chain around a terminal handler.
///
/// The empty chain is the identity: the terminal handler is returned
/// unchanged, with no wrapping layer. Otherwise middlewares wrap
/// back-to-front so the first element of the chain executes outermost (see
/// the module docs for the resulting order).
///
/// The result is itself a [`Handler`], so it can be registered as a route
/// handler — that is how a route carries a local chain independent of the
/// server's global one.
pub fn compose<H, I>(terminal: H, middlewares: I) -> BoxedHandler
where
    H: Handler,
    I: IntoIterator<Item = BoxedMiddleware>,
{
    let chain: Vec<BoxedMiddleware> = middlewares.into_iter().collect();
    compose_slice(terminal.into_boxed_handler(), &chain)
}

/// Slice form used on the dispatch hot path, where the global chain already
/// lives in a `Vec` and only the `Arc`s need cloning.
pub(crate) fn compose_slice(
    terminal: BoxedHandler,
    middlewares: &[BoxedMiddleware],
) -> BoxedHandler {
    if middlewares.is_empty() {
        return terminal;
    }
    middlewares.iter().rfold(terminal, |inner, mw| mw.wrap(inner))
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// The remainder of the chain, from a [`from_fn`] middleware's point of view.
///
/// Call [`run`](Next::run) to delegate inward; skip it to short-circuit with
/// an early response.
pub struct Next(BoxedHandler);

impl Next {
    pub async fn run(self, req: Request) -> Response {
        self.0.call(req).await
    }
}

/// Builds a middleware from an async function over `(Request, Next)`.
///
/// The function runs once per request with the request and the rest of the
/// chain; whatever it returns (after optional post-processing of the inner
/// response) becomes the layer's response.
pub fn from_fn<F, Fut, R>(f: F) -> BoxedMiddleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    Arc::new(FromFn(Arc::new(f)))
}

struct FromFn<F>(Arc<F>);

impl<F, Fut, R> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let f = Arc::clone(&self.0);
        (move |req: Request| (*f)(req, Next(Arc::clone(&next)))).into_boxed_handler()
    }
}

// ── Built-ins ─────────────────────────────────────────────────────────────────

/// Per-request tracing: logs method, path, status, and latency at `info`.
///
/// Put it first in the global chain so the recorded latency covers every
/// other layer.
pub fn trace() -> BoxedMiddleware {
    from_fn(|req: Request, next: Next| async move {
        let method = req.method();
        let path = req.path().to_owned();
        let start = Instant::now();

        let res = next.run(req).await;

        info!(
            %method,
            %path,
            status = res.status_code().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request",
        );
        res
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::method::Method;

    fn get(path: &str) -> Request {
        Request {
            method: Method::Get,
            path: path.to_owned(),
            headers: Vec::new(),
            body: Vec::new(),
            params: HashMap::new(),
        }
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

    /// Records an event before and after delegating inward.
    fn record(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> BoxedMiddleware {
        from_fn(move |req: Request, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name}-before"));
                let res = next.run(req).await;
                log.lock().unwrap().push(format!("{name}-after"));
                res
            }
        })
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let terminal = hello.into_boxed_handler();
        let composed = compose(Arc::clone(&terminal), []);

        // Not merely equivalent: the very same handler, no wrapping layer.
        assert!(Arc::ptr_eq(&terminal, &composed));

        let res = composed.call(get("/")).await;
        assert_eq!(res.body(), b"Hello, World!");
    }

    #[tokio::test]
    async fn single_middleware_equals_direct_wrap() {
        let composed = compose(hello, [tag(7)]);
        let direct = tag(7).wrap(hello.into_boxed_handler());

        let a = composed.call(get("/")).await;
        let b = direct.call(get("/")).await;
        assert_eq!(a.body(), b"7Hello, World!7");
        assert_eq!(a.body(), b.body());
    }

    #[tokio::test]
    async fn onion_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let log = Arc::clone(&log);
            move |_req: Request| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push("terminal".to_owned());
                    Response::text("ok")
                }
            }
        };

        let chain = [
            record(Arc::clone(&log), "m1"),
            record(Arc::clone(&log), "m2"),
            record(Arc::clone(&log), "m3"),
        ];
        compose(handler, chain).call(get("/")).await;

        assert_eq!(
            *log.lock().unwrap(),
            [
                "m1-before", "m2-before", "m3-before",
                "terminal",
                "m3-after", "m2-after", "m1-after",
            ],
        );
    }

    #[tokio::test]
    async fn nested_compose_keeps_outer_chain_outermost() {
        let local = compose(hello, [tag(2), tag(3)]);
        let combined = compose(local, [tag(1)]);

        let res = combined.call(get("/")).await;
        assert_eq!(res.body(), b"123Hello, World!321");
    }

    #[tokio::test]
    async fn composed_handler_is_reusable() {
        let composed = compose(hello, [tag(1)]);
        for _ in 0..3 {
            let res = composed.call(get("/")).await;
            assert_eq!(res.body(), b"1Hello, World!1");
        }
    }

    #[tokio::test]
    async fn closure_middleware_wraps_like_from_fn() {
        let upper: BoxedMiddleware = Arc::new(|next: BoxedHandler| -> BoxedHandler {
            (move |req: Request| {
                let next = Arc::clone(&next);
                async move {
                    let mut res = next.call(req).await;
                    res.set_body(res.body().to_ascii_uppercase());
                    res
                }
            })
            .into_boxed_handler()
        });

        let res = compose(hello, [upper]).call(get("/")).await;
        assert_eq!(res.body(), b"HELLO, WORLD!");
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_layers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let deny = from_fn(|_req: Request, _next: Next| async move {
            Response::status(http::StatusCode::FORBIDDEN)
        });

        let chain = [deny, record(Arc::clone(&log), "inner")];
        let res = compose(hello, chain).call(get("/")).await;

        assert_eq!(res.status_code(), http::StatusCode::FORBIDDEN);
        assert!(log.lock().unwrap().is_empty());
    }
}
