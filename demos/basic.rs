//! Minimal midway example — JSON endpoints, a global trace middleware, and a
//! route with its own local chain.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl http://localhost:3000/admin            # 401 without the header
//!   curl http://localhost:3000/admin -H 'authorization: Bearer x'
//!   curl http://localhost:3000/healthz

use midway::middleware::{self, compose, from_fn, BoxedMiddleware, Next};
use midway::{health, Request, Response, Server, StatusCode};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = Server::with_middlewares([middleware::trace()])
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        // Local chain: auth applies to this route only, inside the global
        // trace middleware.
        .get("/admin", compose(admin, [require_auth()]))
        .get("/healthz", health::liveness)
        .get("/readyz", health::readiness);

    app.listen("0.0.0.0:3000").await.expect("server error");
}

fn require_auth() -> BoxedMiddleware {
    from_fn(|req: Request, next: Next| async move {
        if req.header("authorization").is_none() {
            return Response::status(StatusCode::UNAUTHORIZED);
        }
        next.run(req).await
    })
}

// GET /users/{id}
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

// POST /users
//
// req.body() is &[u8] — parse with serde_json::from_slice or similar; midway
// does not touch the bytes.
async fn create_user(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(StatusCode::BAD_REQUEST);
    }

    Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#.to_owned().into_bytes())
}

// GET /admin — only reachable through require_auth
async fn admin(_req: Request) -> Response {
    Response::text("admin area")
}
