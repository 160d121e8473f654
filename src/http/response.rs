//! In-flight response association.
//!
//! # Responsibilities
//! - Expose the response being produced on a connection to the terminator
//! - Hold header additions (e.g. `connection: close`) until the head is sealed
//! - Clear the association once the body has been fully produced

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::response::Response;
use http_body::{Body as HttpBody, Frame, SizeHint};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};

use crate::net::connection::{InFlightResponse, SocketHandle};

#[derive(Debug, Default)]
struct SlotState {
    sealed: bool,
    pending: HeaderMap,
}

/// The response of one request/response exchange.
#[derive(Debug, Default)]
pub struct ResponseSlot {
    state: Mutex<SlotState>,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply pending headers to the outgoing head and mark headers as sent.
    pub fn seal(&self, headers: &mut HeaderMap) {
        let mut state = self.state.lock().expect("response slot mutex poisoned");
        for (name, value) in state.pending.drain() {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }
        state.sealed = true;
    }
}

impl InFlightResponse for ResponseSlot {
    fn headers_sent(&self) -> bool {
        self.state.lock().expect("response slot mutex poisoned").sealed
    }

    fn set_header(&self, name: HeaderName, value: HeaderValue) -> bool {
        let mut state = self.state.lock().expect("response slot mutex poisoned");
        if state.sealed {
            tracing::debug!(header = %name, "Headers already sent, dropping header");
            return false;
        }
        state.pending.insert(name, value);
        true
    }
}

/// Keeps a response attached to its connection; detaches on drop.
pub struct InFlightGuard {
    socket: Arc<SocketHandle>,
    slot: Arc<ResponseSlot>,
}

impl InFlightGuard {
    /// Attach a fresh response slot to `socket`.
    pub fn begin(socket: Arc<SocketHandle>) -> Self {
        let slot = Arc::new(ResponseSlot::new());
        socket.attach(slot.clone());
        Self { socket, slot }
    }

    /// Seal the response head and tie the rest of the association to the body.
    pub fn finish(self, response: Response) -> Response {
        let (mut parts, body) = response.into_parts();
        self.slot.seal(&mut parts.headers);
        Response::from_parts(parts, Body::new(TrackedBody { inner: body, _guard: self }))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let slot: Arc<dyn InFlightResponse> = self.slot.clone();
        self.socket.detach(&slot);
    }
}

/// Response body that keeps the exchange in flight until it is dropped.
struct TrackedBody {
    inner: Body,
    _guard: InFlightGuard,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::{Connection, ConnectionKind, ServerId};
    use hyper::header::CONNECTION;

    fn socket() -> Arc<SocketHandle> {
        let (socket, _rx) = SocketHandle::new(
            ServerId::new(),
            ConnectionKind::Plain,
            "127.0.0.1:1234".parse().unwrap(),
        );
        socket
    }

    #[test]
    fn pending_header_is_applied_on_seal() {
        let slot = ResponseSlot::new();
        assert!(!slot.headers_sent());
        assert!(slot.set_header(CONNECTION, HeaderValue::from_static("close")));

        let mut headers = HeaderMap::new();
        slot.seal(&mut headers);
        assert!(slot.headers_sent());
        assert_eq!(headers.get(CONNECTION).unwrap(), "close");
    }

    #[test]
    fn header_after_seal_is_dropped() {
        let slot = ResponseSlot::new();
        let mut headers = HeaderMap::new();
        slot.seal(&mut headers);

        assert!(!slot.set_header(CONNECTION, HeaderValue::from_static("close")));
        let mut again = HeaderMap::new();
        slot.seal(&mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn accepted_header_always_reaches_the_sealed_head() {
        for _ in 0..200 {
            let slot = Arc::new(ResponseSlot::new());
            let writer = {
                let slot = slot.clone();
                std::thread::spawn(move || slot.set_header(CONNECTION, HeaderValue::from_static("close")))
            };
            let mut headers = HeaderMap::new();
            slot.seal(&mut headers);

            let accepted = writer.join().unwrap();
            assert_eq!(accepted, headers.contains_key(CONNECTION));
        }
    }

    #[test]
    fn association_lives_until_body_is_dropped() {
        let socket = socket();
        let guard = InFlightGuard::begin(socket.clone());
        assert!(socket.in_flight().is_some());

        let response = guard.finish(Response::new(Body::from("ok")));
        let in_flight = socket.in_flight().expect("still in flight while body is pending");
        assert!(in_flight.headers_sent());

        drop(response);
        assert!(socket.in_flight().is_none());
    }

    #[test]
    fn abandoned_exchange_detaches() {
        let socket = socket();
        let guard = InFlightGuard::begin(socket.clone());
        drop(guard);
        assert!(socket.in_flight().is_none());
    }
}
