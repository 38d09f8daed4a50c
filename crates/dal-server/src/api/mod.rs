//! REST API of the orchestrator.
//!
//! ## Endpoints
//!
//! ### Experiments
//! - `POST /experiments/initialize` - Validate a config and train the seed model
//! - `GET /experiments/:id/status` - State and counters
//! - `POST /experiments/:id/reset` - Return to idle
//! - `GET /experiments/:id/next-sample` - Most uncertain unlabeled sample
//! - `POST /experiments/:id/submit-label` - Label a sample directly
//! - `GET /experiments/:id/metrics` - Current metrics
//! - `GET /experiments/:id/model-updates?limit=` - Recorded model updates
//!
//! ### Voting
//! - `POST /experiments/:id/voting/start` - Open a session for a sample
//! - `POST /experiments/:id/voting/:session/vote` - Cast a vote
//! - `GET /experiments/:id/voting/:session/results` - Session state
//!
//! ### Ledger and system
//! - `GET /ledger/status`, `GET /ledger/blocks?limit=`, `GET /ledger/verify`
//! - `GET /system/status`, `POST /system/reset`, `GET /health`

pub mod dto;
pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use dal_coordination::SharedOrchestrator;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};

/// Layers every service gets: panics become redacted 500s, then request tracing
pub fn with_common_layers(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .layer(TraceLayer::new_for_http())
}

/// Build the orchestrator API router
pub fn create_router(orchestrator: SharedOrchestrator) -> Router {
    let router = Router::new()
        // Experiments
        .route("/experiments/initialize", post(handlers::initialize_experiment))
        .route("/experiments/:experiment_id/status", get(handlers::experiment_status))
        .route("/experiments/:experiment_id/reset", post(handlers::reset_experiment))
        .route("/experiments/:experiment_id/next-sample", get(handlers::next_sample))
        .route("/experiments/:experiment_id/submit-label", post(handlers::submit_label))
        .route("/experiments/:experiment_id/metrics", get(handlers::metrics))
        .route("/experiments/:experiment_id/model-updates", get(handlers::model_updates))
        // Voting
        .route("/experiments/:experiment_id/voting/start", post(handlers::start_voting))
        .route(
            "/experiments/:experiment_id/voting/:session_id/vote",
            post(handlers::submit_vote),
        )
        .route(
            "/experiments/:experiment_id/voting/:session_id/results",
            get(handlers::voting_results),
        )
        // Ledger
        .route("/ledger/status", get(handlers::ledger_status))
        .route("/ledger/blocks", get(handlers::ledger_blocks))
        .route("/ledger/verify", get(handlers::ledger_verify))
        // System
        .route("/system/status", get(handlers::system_status))
        .route("/system/reset", post(handlers::reset_system))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(orchestrator);
    with_common_layers(router)
}
