//! Axum request handlers for the orchestrator API

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use dal_coordination::ledger::ChainStatus;
use dal_coordination::orchestrator::{ResetOutcome, SystemReset};
use dal_coordination::{
    ExperimentConfig, ExperimentStatus, LabelCommit, NextSample, SharedOrchestrator, StartVoting,
    SystemStatus, VoteRequest, VoteSubmission,
};
use tracing::info;

use super::dto::*;
use super::error::{ApiError, ApiResult};

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type Limit = Result<Query<LimitQuery>, QueryRejection>;

// ============================================================================
// Experiments
// ============================================================================

pub async fn initialize_experiment(
    State(orch): State<SharedOrchestrator>,
    body: JsonBody<ExperimentConfig>,
) -> ApiResult<Json<ApiResponse<InitializeResponse>>> {
    let Json(config) = body?;
    let init = orch.initialize_experiment(config).await?;
    Ok(Json(ApiResponse::success(InitializeResponse {
        experiment_id: init.experiment_id,
        experiment: init.status,
        audit: init.audit,
    })))
}

pub async fn experiment_status(
    State(orch): State<SharedOrchestrator>,
    Path(experiment_id): Path<String>,
) -> ApiResult<Json<ApiResponse<ExperimentStatus>>> {
    let status = orch.get_experiment_status(&experiment_id).await?;
    Ok(Json(ApiResponse::success(status)))
}

pub async fn reset_experiment(
    State(orch): State<SharedOrchestrator>,
    Path(experiment_id): Path<String>,
) -> ApiResult<Json<ApiResponse<ResetOutcome>>> {
    let outcome = orch.reset_experiment(&experiment_id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn next_sample(
    State(orch): State<SharedOrchestrator>,
    Path(experiment_id): Path<String>,
) -> ApiResult<Response> {
    let response = match orch.get_next_sample(&experiment_id).await? {
        NextSample::Sample(query) => Json(ApiResponse::success(query)).into_response(),
        NextSample::NoSamples => Json(NoSamplesResponse::new()).into_response(),
    };
    Ok(response)
}

pub async fn submit_label(
    State(orch): State<SharedOrchestrator>,
    Path(experiment_id): Path<String>,
    body: JsonBody<SubmitLabelRequest>,
) -> ApiResult<Json<ApiResponse<LabelCommit>>> {
    let Json(request) = body?;
    let sample_index = request.sample_id.index()?;
    let commit = orch
        .submit_label(&experiment_id, sample_index, request.label, request.metadata)
        .await?;
    Ok(Json(ApiResponse::success(commit)))
}

pub async fn metrics(
    State(orch): State<SharedOrchestrator>,
    Path(experiment_id): Path<String>,
) -> ApiResult<Json<ApiResponse<MetricsResponse>>> {
    let metrics = orch.get_metrics(&experiment_id).await?;
    Ok(Json(ApiResponse::success(MetricsResponse {
        experiment_id,
        metrics,
    })))
}

pub async fn model_updates(
    State(orch): State<SharedOrchestrator>,
    Path(experiment_id): Path<String>,
    query: Limit,
) -> ApiResult<Json<ApiResponse<ModelUpdatesResponse>>> {
    let Query(query) = query?;
    let updates = orch
        .get_model_updates(&experiment_id, query.limit_or(10))
        .await?;
    Ok(Json(ApiResponse::success(ModelUpdatesResponse {
        experiment_id,
        updates,
    })))
}

// ============================================================================
// Voting
// ============================================================================

pub async fn start_voting(
    State(orch): State<SharedOrchestrator>,
    Path(experiment_id): Path<String>,
    body: JsonBody<StartVotingRequest>,
) -> ApiResult<Json<ApiResponse<SessionResponse>>> {
    let Json(request) = body?;
    let sample_index = request.sample_id.index()?;
    let base = orch.get_experiment_status(&experiment_id).await?.voting;

    let session = orch
        .start_voting_session(
            &experiment_id,
            StartVoting {
                sample_index,
                config: request.config_over(base.as_ref()),
            },
        )
        .await?;
    info!(experiment_id = %experiment_id, session_id = %session.id, sample_index, "Voting session started");
    Ok(Json(ApiResponse::success(SessionResponse { session })))
}

pub async fn submit_vote(
    State(orch): State<SharedOrchestrator>,
    Path((experiment_id, session_id)): Path<(String, String)>,
    body: JsonBody<VoteRequest>,
) -> ApiResult<Json<ApiResponse<VoteSubmission>>> {
    let Json(vote) = body?;
    let submission = orch.submit_vote(&experiment_id, &session_id, vote).await?;
    Ok(Json(ApiResponse::success(submission)))
}

pub async fn voting_results(
    State(orch): State<SharedOrchestrator>,
    Path((experiment_id, session_id)): Path<(String, String)>,
) -> ApiResult<Json<ApiResponse<SessionResponse>>> {
    let session = orch.get_voting_results(&experiment_id, &session_id).await?;
    Ok(Json(ApiResponse::success(SessionResponse { session })))
}

// ============================================================================
// Ledger
// ============================================================================

pub async fn ledger_status(
    State(orch): State<SharedOrchestrator>,
) -> ApiResult<Json<ApiResponse<ChainStatus>>> {
    let status = orch.ledger_status().await?;
    Ok(Json(ApiResponse::success(status)))
}

pub async fn ledger_blocks(
    State(orch): State<SharedOrchestrator>,
    query: Limit,
) -> ApiResult<Json<ApiResponse<BlocksResponse>>> {
    let Query(query) = query?;
    let blocks = orch.recent_blocks(query.limit_or(10)).await?;
    Ok(Json(ApiResponse::success(BlocksResponse { blocks })))
}

pub async fn ledger_verify(
    State(orch): State<SharedOrchestrator>,
) -> ApiResult<Json<ApiResponse<VerifyResponse>>> {
    let chain_valid = orch.verify_ledger().await?;
    Ok(Json(ApiResponse::success(VerifyResponse { chain_valid })))
}

// ============================================================================
// System
// ============================================================================

pub async fn system_status(
    State(orch): State<SharedOrchestrator>,
) -> Json<ApiResponse<SystemStatus>> {
    Json(ApiResponse::success(orch.system_status().await))
}

pub async fn reset_system(
    State(orch): State<SharedOrchestrator>,
) -> Json<ApiResponse<SystemReset>> {
    Json(ApiResponse::success(orch.reset_system().await))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "dal-orchestrator",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// JSON 404 for unknown routes
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
