//! HTTP API Server
//!
//! REST API for client writes, log reads, health and status queries on the
//! primary, and the replication endpoint on secondaries.

use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{ApiConfig, NodeRole};
use crate::error::{Error, Result};
use crate::replication::{
    FlushRequest, Payload, PrimaryNode, ReplicateRequest, ReplicationNode, SecondaryNode, SequenceId, WriteRequest,
};
use crate::state::{ClusterSummary, HealthStatus, NodeHealth};

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    router: Router,
}

impl HttpServer {
    /// Server exposing the primary's routes
    pub fn primary(config: ApiConfig, node: Arc<PrimaryNode>) -> Self {
        Self {
            config,
            router: primary_router(node),
        }
    }

    /// Server exposing a secondary's routes
    pub fn secondary(config: ApiConfig, node: Arc<SecondaryNode>) -> Self {
        Self {
            config,
            router: secondary_router(node),
        }
    }

    /// Build the router with tracing and, if enabled, CORS
    fn app(&self) -> Router {
        let app = self.router.clone().layer(TraceLayer::new_for_http());
        if self.config.cors_enabled {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Start the HTTP server and serve until shutdown is signalled
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        tracing::info!("HTTP API stopped");
        Ok(())
    }
}

/// Routes served by the primary
pub fn primary_router(node: Arc<PrimaryNode>) -> Router {
    Router::new()
        .route("/ping", get(handle_ping))
        .route("/messages", post(handle_submit).get(handle_messages::<PrimaryNode>))
        .route("/health", get(handle_health))
        .route("/status", get(handle_primary_status))
        .route("/flush", post(handle_flush))
        .with_state(node)
}

/// Routes served by a secondary
pub fn secondary_router(node: Arc<SecondaryNode>) -> Router {
    Router::new()
        .route("/ping", get(handle_ping))
        .route("/messages", post(handle_apply).get(handle_messages::<SecondaryNode>))
        .route("/status", get(handle_secondary_status))
        .route("/flush", post(handle_reset))
        .with_state(node)
}

// ============ Request/Response Types ============

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Missing acknowledgments, for write-concern failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<usize>,
}

/// Primary status response
#[derive(Debug, Serialize, Deserialize)]
pub struct PrimaryStatusResponse {
    pub node_id: String,
    pub role: NodeRole,
    pub has_quorum: bool,
    pub log_length: usize,
    pub cluster: ClusterSummary,
    pub replicas: Vec<NodeHealth>,
}

/// Secondary status response
#[derive(Debug, Serialize, Deserialize)]
pub struct SecondaryStatusResponse {
    pub node_id: String,
    pub role: NodeRole,
    pub log_length: usize,
    pub staged: usize,
    pub next_id: SequenceId,
}

/// Flush response
#[derive(Debug, Serialize, Deserialize)]
pub struct FlushResponse {
    pub success: bool,
}

fn error_response(e: &Error) -> Response {
    let (status, code) = match e {
        Error::NoQuorum { .. } => (StatusCode::SERVICE_UNAVAILABLE, "NO_QUORUM"),
        Error::WriteConcernNotMet { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "WRITE_CONCERN"),
        Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        Error::NoReply => (StatusCode::INTERNAL_SERVER_ERROR, "NO_REPLY"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
            shortfall: e.shortfall(),
        }),
    )
        .into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: rejection.body_text(),
            code: "INVALID_REQUEST".to_string(),
            shortfall: None,
        }),
    )
        .into_response()
}

// ============ Handlers ============

async fn handle_ping() -> &'static str {
    "pong"
}

async fn handle_submit(
    State(node): State<Arc<PrimaryNode>>,
    body: std::result::Result<Json<WriteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    match node.submit(request).await {
        Ok(ack) => (StatusCode::OK, Json(ack.message)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_apply(
    State(node): State<Arc<SecondaryNode>>,
    body: std::result::Result<Json<ReplicateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    match node.apply(request).await {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_messages<N: ReplicationNode + 'static>(
    State(node): State<Arc<N>>,
) -> Json<Vec<Payload>> {
    Json(node.messages().await)
}

async fn handle_flush(State(node): State<Arc<PrimaryNode>>) -> Response {
    match node.flush().await {
        Ok(()) => Json(FlushResponse { success: true }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// An empty body restarts the replica at id 0
async fn handle_reset(State(node): State<Arc<SecondaryNode>>, body: Bytes) -> Response {
    let request = if body.is_empty() {
        FlushRequest::default()
    } else {
        match serde_json::from_slice::<FlushRequest>(&body) {
            Ok(request) => request,
            Err(e) => return error_response(&Error::InvalidRequest(e.to_string())),
        }
    };

    node.reset(request.next_id).await;
    Json(FlushResponse { success: true }).into_response()
}

async fn handle_health(
    State(node): State<Arc<PrimaryNode>>,
) -> Json<std::collections::BTreeMap<String, HealthStatus>> {
    Json(node.cluster().health_map().await)
}

async fn handle_primary_status(State(node): State<Arc<PrimaryNode>>) -> Json<PrimaryStatusResponse> {
    let cluster = node.cluster();
    Json(PrimaryStatusResponse {
        node_id: node.node_id().to_string(),
        role: node.role(),
        has_quorum: cluster.has_quorum().await,
        log_length: node.log_len().await,
        cluster: cluster.summary().await,
        replicas: cluster.snapshot().await,
    })
}

async fn handle_secondary_status(
    State(node): State<Arc<SecondaryNode>>,
) -> Json<SecondaryStatusResponse> {
    Json(SecondaryStatusResponse {
        node_id: node.node_id().to_string(),
        role: node.role(),
        log_length: node.messages().await.len(),
        staged: node.pending().await,
        next_id: node.next_expected().await,
    })
}
