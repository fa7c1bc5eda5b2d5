//! # Debug HTTP routes (feature `http`).
//!
//! ```text
//! POST /_debug/publish    {exchange, routing, message}  → 200 | 500 "Event bus connection refused"
//! POST /_debug/subscribe  {exchange, routing}           → 200 (messages are only logged)
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::core::{Listener, Publisher};
use crate::error::FeatureError;
use crate::features::Features;
use crate::service;

/// Body of `POST /_debug/publish`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Target exchange.
    pub exchange: String,
    /// Routing key.
    pub routing: String,
    /// Message payload.
    pub message: Value,
}

/// Body of `POST /_debug/subscribe`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Exchange to bind to.
    pub exchange: String,
    /// Binding pattern.
    pub routing: String,
}

/// Shared state of the debug routes.
#[derive(Clone)]
pub struct DebugState {
    listener: Arc<Listener>,
    publisher: Arc<Publisher>,
}

/// Debug routes for an explicit listener and publisher.
pub fn routes(listener: Arc<Listener>, publisher: Arc<Publisher>) -> Router {
    Router::new()
        .route("/_debug/publish", post(post_publish))
        .route("/_debug/subscribe", post(post_subscribe))
        .with_state(DebugState {
            listener,
            publisher,
        })
}

/// Debug routes for the components registered by [`service::setup`].
pub fn router(features: &Features) -> Result<Router, FeatureError> {
    Ok(routes(
        service::get_listener(features)?,
        service::get_publisher(features)?,
    ))
}

async fn post_publish(State(state): State<DebugState>, Json(req): Json<PublishRequest>) -> Response {
    match state
        .publisher
        .publish(&req.exchange, &req.routing, &req.message)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(exchange = %req.exchange, routing = %req.routing, "unable to publish: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Event bus connection refused").into_response()
        }
    }
}

async fn post_subscribe(
    State(state): State<DebugState>,
    Json(req): Json<SubscribeRequest>,
) -> StatusCode {
    state.listener.subscribe(req.exchange, req.routing);
    StatusCode::OK
}
