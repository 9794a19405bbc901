//! REST API Server Module
//!
//! Read-only HTTP view of the validator's state: the current head validator,
//! stream cursors, and stored conversion requests. Users redeeming a Hive
//! deposit on Ethereum fetch the collected withdrawal signatures from here.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use crate::config::ApiConfig;
use crate::error::BridgeError;
use crate::store::{BridgeStore, StatusRecord, ETHEREUM_CURSOR, HEAD_VALIDATOR, HIVE_CURSOR};

// ============================================================================
// RESPONSE STRUCTURES
// ============================================================================

/// Standardized response structure for all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Node status returned by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    /// This node's validator account
    pub validator: String,
    pub head_validator: Option<String>,
    /// Version of the head validator record
    pub head_validator_version: u64,
    pub is_head_validator: bool,
    pub hive_cursor: Option<String>,
    pub ethereum_cursor: Option<String>,
}

/// Store failure surfaced as a 500.
#[derive(Debug)]
struct StoreRejection(String);

impl warp::reject::Reject for StoreRejection {}

fn reject_store_error(e: BridgeError) -> Rejection {
    warp::reject::custom(StoreRejection(e.to_string()))
}

fn with_store(
    store: Arc<dyn BridgeStore>,
) -> impl Filter<Extract = (Arc<dyn BridgeStore>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || store.clone())
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn get_status_handler(
    validator: String,
    store: Arc<dyn BridgeStore>,
) -> Result<impl Reply, Rejection> {
    let head = store
        .find_status_by_name(HEAD_VALIDATOR)
        .await
        .map_err(reject_store_error)?;
    let cursor = |record: Option<StatusRecord>| record.map(|r| r.data);
    let hive_cursor = store
        .find_status_by_name(HIVE_CURSOR)
        .await
        .map_err(reject_store_error)?;
    let ethereum_cursor = store
        .find_status_by_name(ETHEREUM_CURSOR)
        .await
        .map_err(reject_store_error)?;

    let status = NodeStatus {
        is_head_validator: head.as_ref().map_or(false, |h| h.data == validator),
        head_validator_version: head.as_ref().map_or(0, |h| h.version),
        head_validator: head.map(|h| h.data),
        validator,
        hive_cursor: cursor(hive_cursor),
        ethereum_cursor: cursor(ethereum_cursor),
    };
    Ok(warp::reply::json(&ApiResponse::ok(status)))
}

async fn get_conversion_handler(
    reference: String,
    store: Arc<dyn BridgeStore>,
) -> Result<warp::reply::Response, Rejection> {
    match store
        .find_by_reference_id(&reference)
        .await
        .map_err(reject_store_error)?
    {
        Some(request) => Ok(warp::reply::json(&ApiResponse::ok(request)).into_response()),
        None => Ok(warp::reply::with_status(
            warp::reply::json(&ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(format!("Conversion {} not found", reference)),
            }),
            StatusCode::NOT_FOUND,
        )
        .into_response()),
    }
}

async fn get_pending_handler(store: Arc<dyn BridgeStore>) -> Result<impl Reply, Rejection> {
    let pending = store.list_pending().await.map_err(reject_store_error)?;
    Ok(warp::reply::json(&ApiResponse::ok(pending)))
}

async fn get_validators_handler(store: Arc<dyn BridgeStore>) -> Result<impl Reply, Rejection> {
    let validators = store.list_validators().await.map_err(reject_store_error)?;
    Ok(warp::reply::json(&ApiResponse::ok(validators)))
}

/// Converts rejections into standardized API responses.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if let Some(err) = rej.find::<StoreRejection>() {
        (StatusCode::INTERNAL_SERVER_ERROR, err.0.clone())
    } else if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// REST API server exposing the validator's stored state.
pub struct ApiServer {
    config: ApiConfig,
    validator: String,
    store: Arc<dyn BridgeStore>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, validator: &str, store: Arc<dyn BridgeStore>) -> Self {
        Self {
            config,
            validator: validator.to_string(),
            store,
        }
    }

    /// Serves until the shutdown flag flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let host: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid api.host '{}': {}", self.config.host, e))?;
        let addr = SocketAddr::new(host, self.config.port);

        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown.changed().await;
            })
            .map_err(|e| anyhow::anyhow!("Failed to bind API server to {}: {}", addr, e))?;

        info!("API server listening on {}", bound);
        server.await;
        info!("API server stopped");
        Ok(())
    }

    /// All API routes with the rejection handler applied.
    pub fn routes(
        &self,
    ) -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
        let store = self.store.clone();
        let validator = self.validator.clone();

        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::ok("Bridge validator is running".to_string()))
        });

        let status = warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::any().map(move || validator.clone()))
            .and(with_store(store.clone()))
            .and_then(get_status_handler);

        let pending = warp::path!("conversions" / "pending")
            .and(warp::get())
            .and(with_store(store.clone()))
            .and_then(get_pending_handler);

        let conversion = warp::path!("conversions" / String)
            .and(warp::get())
            .and(with_store(store.clone()))
            .and_then(get_conversion_handler);

        let validators = warp::path("validators")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_store(store))
            .and_then(get_validators_handler);

        health
            .or(status)
            .or(pending)
            .or(conversion)
            .or(validators)
            .recover(handle_rejection)
    }
}
