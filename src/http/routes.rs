//! Built-in routes served by the binary.
//!
//! - `GET /`             → `ok`
//! - `GET /delay/{ms}`   → waits, then responds (head and body together)
//! - `GET /stream/{ms}`  → sends the head at once, the body after the delay

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Path;
use axum::routing::get;
use axum::Router;

/// Router used by the binary and the integration tests.
pub fn router() -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/delay/{ms}", get(delayed))
        .route("/stream/{ms}", get(streamed))
}

async fn delayed(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "ok"
}

async fn streamed(Path(ms): Path<u64>) -> Body {
    let chunk = futures_util::stream::once(async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, Infallible>(Bytes::from_static(b"ok"))
    });
    Body::from_stream(chunk)
}
