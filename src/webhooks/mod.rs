//! Admission webhooks for PostgresCluster
//!
//! The mutating endpoint applies defaulting so stored declarations are
//! already normalized. The validating endpoint rejects declarations the
//! reconciler would refuse, plus changes to fields that cannot change
//! after creation.

pub mod policies;
mod server;

pub use policies::{ValidationContext, ValidationResult};
pub use server::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, AdmissionReviewResponse,
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

/// Router serving `/mutate` and `/validate`, without TLS
pub fn router() -> axum::Router {
    server::create_webhook_router()
}
