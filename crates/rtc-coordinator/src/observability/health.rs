//! Health endpoints for the coordinator.
//!
//! - `GET /health` - Liveness check (is the process running?)
//! - `GET /ready` - Readiness check (can we serve traffic?)
//!
//! The `/metrics` endpoint is merged onto the same router in `main` and
//! rendered by `metrics-exporter-prometheus`.
//!
//! # Health State
//!
//! Readiness requires all of:
//! - the media worker is up
//! - the document store is connected
//! - the coordinator is not draining

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the coordinator.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup initialization.
    live: AtomicBool,
    /// Media worker is running.
    media_ready: AtomicBool,
    /// Document store connection established.
    store_ready: AtomicBool,
    /// Shutdown has started.
    draining: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, with no dependency ready yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            media_ready: AtomicBool::new(false),
            store_ready: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    /// Record whether the media worker is up.
    pub fn set_media_ready(&self, ready: bool) {
        self.media_ready.store(ready, Ordering::SeqCst);
    }

    /// Record whether the document store is connected.
    pub fn set_store_ready(&self, ready: bool) {
        self.store_ready.store(ready, Ordering::SeqCst);
    }

    /// Mark the service as not ready because shutdown has started.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Ready once both dependencies are up, until draining starts.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.media_ready.load(Ordering::SeqCst)
            && self.store_ready.load(Ordering::SeqCst)
            && !self.draining.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|State(state): State<Arc<HealthState>>| async move {
            check_status(state.is_live())
        }))
        .route("/ready", get(|State(state): State<Arc<HealthState>>| async move {
            check_status(state.is_ready())
        }))
        .with_state(health_state)
}

fn check_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
