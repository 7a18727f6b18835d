//! Webhook HTTP server.
//!
//! `POST /webhook` dispatches deliveries to the registered handler for
//! their `(event, action)` pair. `GET /health` reports liveness.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use closer_core::collaborator::Collaborator;
use closer_core::handler::HandlerError;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::registry::HandlerRegistry;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Shared state for HTTP handlers.
pub struct AppState {
    pub registry: HandlerRegistry,
    pub collaborator: Arc<dyn Collaborator>,
    pub deliveries: Option<DeliveryGuard>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("deliveries", &self.deliveries)
            .finish_non_exhaustive()
    }
}

/// What the guard knows about a delivery id when it arrives.
#[derive(Debug)]
pub enum Admission<'a> {
    /// Not seen before; the caller now owns it until the claim is completed or dropped.
    Accepted(DeliveryClaim<'a>),
    /// Another attempt is still being handled.
    InFlight,
    /// Already handled successfully.
    Completed,
}

/// Exclusive hold on an in-flight delivery id.
///
/// Dropping the claim without completing it releases the id, so a failed or
/// abandoned attempt can be redelivered.
#[derive(Debug)]
pub struct DeliveryClaim<'a> {
    guard: &'a DeliveryGuard,
    id: String,
    completed: bool,
}

impl DeliveryClaim<'_> {
    /// Record the delivery as handled.
    pub fn complete(mut self) {
        self.completed = true;
        self.guard.finish(&self.id);
    }
}

impl Drop for DeliveryClaim<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.guard.seen().in_flight.remove(&self.id);
        }
    }
}

/// Tracks in-flight delivery ids and a bounded FIFO of completed ones.
#[derive(Debug)]
pub struct DeliveryGuard {
    capacity: usize,
    seen: Mutex<SeenDeliveries>,
}

#[derive(Debug, Default)]
struct SeenDeliveries {
    in_flight: HashSet<String>,
    completed: HashSet<String>,
    order: VecDeque<String>,
}

impl DeliveryGuard {
    /// A guard remembering up to `capacity` completed ids, or `None` when capacity is 0.
    pub fn new(capacity: usize) -> Option<Self> {
        (capacity > 0).then(|| Self {
            capacity,
            seen: Mutex::new(SeenDeliveries::default()),
        })
    }

    fn seen(&self) -> MutexGuard<'_, SeenDeliveries> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `id` for handling unless it is in flight or completed.
    pub fn begin(&self, id: &str) -> Admission<'_> {
        let mut seen = self.seen();
        if seen.completed.contains(id) {
            return Admission::Completed;
        }
        if !seen.in_flight.insert(id.to_string()) {
            return Admission::InFlight;
        }
        Admission::Accepted(DeliveryClaim {
            guard: self,
            id: id.to_string(),
            completed: false,
        })
    }

    /// Move `id` from in flight to completed, evicting the oldest completed id at capacity.
    fn finish(&self, id: &str) {
        let mut seen = self.seen();
        seen.in_flight.remove(id);
        if seen.completed.contains(id) {
            return;
        }
        if seen.order.len() >= self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.completed.remove(&oldest);
            }
        }
        seen.completed.insert(id.to_string());
        seen.order.push_back(id.to_string());
    }

    /// Number of completed ids remembered.
    pub fn len(&self) -> usize {
        self.seen().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.seen().in_flight.len()
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn start_server(
    state: Arc<AppState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("webhook server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

// --- Response types ---

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Status-only response body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn status_response(status: StatusCode, body: &'static str) -> Response {
    (status, Json(StatusResponse { status: body })).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// --- Handlers ---

async fn health_check() -> impl IntoResponse {
    Json(StatusResponse { status: "ok" })
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(event) = header(&headers, EVENT_HEADER) else {
        return error_response(StatusCode::BAD_REQUEST, "missing X-GitHub-Event header");
    };
    let delivery = header(&headers, DELIVERY_HEADER);

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(event, delivery, error = %e, "rejected undecodable payload");
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("invalid payload: {e}"),
            );
        }
    };
    let action = payload.get("action").and_then(Value::as_str).unwrap_or("");

    let Some(handler) = state.registry.get(event, action) else {
        debug!(event, action, delivery, "no handler registered, ignoring");
        return status_response(StatusCode::ACCEPTED, "ignored");
    };

    let claim = match (&state.deliveries, delivery) {
        (Some(guard), Some(id)) => match guard.begin(id) {
            Admission::Accepted(claim) => Some(claim),
            Admission::InFlight => {
                info!(event, action, delivery = id, "delivery already in progress");
                return status_response(StatusCode::CONFLICT, "in_progress");
            }
            Admission::Completed => {
                info!(event, action, delivery = id, "duplicate delivery, skipping");
                return status_response(StatusCode::OK, "duplicate");
            }
        },
        _ => None,
    };

    match handler.handle(state.collaborator.as_ref(), &payload).await {
        Ok(outcome) => {
            if let Some(claim) = claim {
                claim.complete();
            }
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e) => {
            // Dropping the claim releases the id for redelivery.
            drop(claim);
            match e {
                HandlerError::Event(e) => {
                    warn!(event, action, delivery, error = %e, "malformed event payload");
                    error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
                }
                e => {
                    error!(event, action, delivery, error = %e, "event handling failed");
                    error_response(StatusCode::BAD_GATEWAY, e.to_string())
                }
            }
        }
    }
}
