//! Webhook HTTP server handlers
//!
//! Implements the mutating (defaulting) and validating admission endpoints
//! for PostgresCluster resources.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use super::policies::{ValidationContext, validate_all};
use crate::crd::PostgresCluster;

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

/// AdmissionRequest contains the details of the admission request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: GroupVersionKind,
    pub resource: GroupVersionResource,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
    /// Only `JSONPatch` is defined by the API server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    /// Base64-encoded JSON patch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Create the webhook router
pub(crate) fn create_webhook_router() -> Router {
    Router::new()
        .route("/mutate", post(mutate_postgres_cluster))
        .route("/validate", post(validate_postgres_cluster))
}

type HandlerResponse = (StatusCode, Json<AdmissionReviewResponse>);

/// Unwrap the request of a review, or build the response rejecting it
fn take_request(review: AdmissionReview) -> Result<AdmissionRequest, HandlerResponse> {
    match review.request {
        Some(req) => Ok(req),
        None => {
            error!("Admission review missing request");
            Err((
                StatusCode::BAD_REQUEST,
                Json(create_response(
                    "",
                    false,
                    "Missing request in AdmissionReview",
                    None,
                )),
            ))
        }
    }
}

/// Parse an embedded object as a PostgresCluster
fn parse_cluster(uid: &str, obj: serde_json::Value) -> Result<PostgresCluster, HandlerResponse> {
    serde_json::from_value(obj).map_err(|e| {
        error!(error = %e, "Failed to parse PostgresCluster");
        (
            StatusCode::OK,
            Json(create_response(
                uid,
                false,
                &format!("Failed to parse object: {}", e),
                None,
            )),
        )
    })
}

/// Defaulting admission webhook handler
///
/// Runs the same normalization the reconciler applies at the start of every
/// pass and answers with a patch replacing `/spec` when anything was filled in.
pub(crate) async fn mutate_postgres_cluster(
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let request = match take_request(review) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let uid = request.uid.clone();

    let Some(obj) = request.object else {
        return (StatusCode::OK, Json(create_response(&uid, true, "", None)));
    };
    let cluster = match parse_cluster(&uid, obj) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let normalized = cluster.spec.normalized();
    if normalized == cluster.spec {
        info!(uid = %uid, "Nothing to default");
        return (StatusCode::OK, Json(create_response(&uid, true, "", None)));
    }

    match defaulting_patch(&normalized) {
        Ok(patch) => {
            info!(uid = %uid, name = ?request.name, "Defaulted PostgresCluster spec");
            let mut response = create_response(&uid, true, "", None);
            response.response.patch_type = Some("JSONPatch".to_string());
            response.response.patch = Some(patch);
            (StatusCode::OK, Json(response))
        }
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to build defaulting patch");
            (
                StatusCode::OK,
                Json(create_response(&uid, false, &e.to_string(), None)),
            )
        }
    }
}

/// Base64-encoded JSON patch replacing the whole spec
pub(crate) fn defaulting_patch<T: Serialize>(spec: &T) -> Result<String, serde_json::Error> {
    let ops = serde_json::json!([{
        "op": "replace",
        "path": "/spec",
        "value": spec,
    }]);
    Ok(BASE64.encode(serde_json::to_vec(&ops)?))
}

/// Validate PostgresCluster admission webhook handler
pub(crate) async fn validate_postgres_cluster(
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let request = match take_request(review) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let uid = request.uid.clone();
    info!(
        uid = %uid,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // DELETE operations may not have object
    let Some(obj) = request.object else {
        if request.operation == "DELETE" {
            return (StatusCode::OK, Json(create_response(&uid, true, "", None)));
        }
        return (
            StatusCode::OK,
            Json(create_response(
                &uid,
                false,
                "Missing object in request",
                None,
            )),
        );
    };
    let mut cluster = match parse_cluster(&uid, obj) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    cluster.spec.normalize();

    // Parse the old object for UPDATE operations
    let old_cluster: Option<PostgresCluster> = match request.old_object {
        Some(obj) => match serde_json::from_value::<PostgresCluster>(obj) {
            Ok(mut c) => {
                c.spec.normalize();
                Some(c)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse old PostgresCluster, treating as CREATE");
                None
            }
        },
        None => None,
    };

    let ctx = ValidationContext::new(&cluster, old_cluster.as_ref());
    let result = validate_all(&ctx);

    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
        return (
            StatusCode::OK,
            Json(create_response(&uid, false, &message, Some(&reason))),
        );
    }

    info!(uid = %uid, create = ctx.is_create(), "Admission request allowed");
    (StatusCode::OK, Json(create_response(&uid, true, "", None)))
}

/// Create an AdmissionReview response
fn create_response(
    uid: &str,
    allowed: bool,
    message: &str,
    reason: Option<&str>,
) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed,
            status: if allowed {
                None
            } else {
                Some(AdmissionStatus {
                    code: 403,
                    message: message.to_string(),
                    reason: reason.map(String::from),
                })
            },
            patch_type: None,
            patch: None,
        },
    }
}

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8443;

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:8443 and serves the /mutate and /validate endpoints.
/// TLS certificates are loaded from the paths specified (PEM format).
pub async fn run_webhook_server(cert_path: &str, key_path: &str) -> Result<(), WebhookError> {
    let app = create_webhook_router();

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Webhook server error: {0}")]
    Server(String),
}
