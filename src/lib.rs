//! # midway
//!
//! A minimal HTTP dispatch layer: route requests by method and path, and
//! wrap an ordered middleware chain around whatever handler the route
//! resolves to. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! midway owns exactly two things:
//!
//! - **Dispatch** — a [`Server`] holds a routing table and a global
//!   middleware chain, both fixed once requests start flowing. Every
//!   request resolves to a handler (registered, or the built-in not-found)
//!   and runs through the same composed chain.
//! - **Composition** — [`middleware::compose`] turns a terminal [`Handler`]
//!   and an ordered middleware list into one handler with standard onion
//!   ordering: the first middleware sees the request first and the response
//!   last. An empty list is the identity.
//!
//! Everything else is a collaborator: [`matchit`] matches paths, hyper
//! frames HTTP, tokio accepts connections, and your reverse proxy does
//! proxy things (TLS, rate limiting, body-size limits).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use midway::{middleware, Request, Response, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Server::with_middlewares([middleware::trace()])
//!         .get("/users/{id}", get_user)
//!         .post("/users", create_user);
//!
//!     app.listen("0.0.0.0:3000").await.unwrap();
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//!
//! async fn create_user(req: Request) -> Response {
//!     if req.body().is_empty() {
//!         return Response::status(midway::StatusCode::BAD_REQUEST);
//!     }
//!     Response::builder()
//!         .status(midway::StatusCode::CREATED)
//!         .header("location", "/users/99")
//!         .json(br#"{"id":"99"}"#.to_vec())
//! }
//! ```
//!
//! ## Per-route chains
//!
//! [`middleware::compose`] returns an ordinary handler, so a route can carry
//! its own local chain independent of the global one; at request time the
//! global chain wraps the local one:
//!
//! ```rust,no_run
//! # use midway::{middleware::{self, compose}, Request, Response, Server};
//! # async fn handler(_req: Request) -> Response { Response::text("ok") }
//! # fn auth() -> midway::middleware::BoxedMiddleware { middleware::trace() }
//! let app = Server::new()
//!     .get("/admin", compose(handler, [auth()]));
//! ```

mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod health;
pub mod middleware;

pub use error::Error;
pub use handler::Handler;
pub use http::StatusCode;
pub use method::Method;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response};
pub use server::Server;
