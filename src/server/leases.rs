use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::SignedRequest;
use crate::server::AppState;
use crate::server::dto::{Ack, AcquireLeaseRequest, CommitLeaseRequest, LeaseHandle, ListLeasesParams};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::LeaseState;

pub async fn list_leases(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListLeasesParams>,
) -> impl IntoResponse {
    let leases = state.engine.list(params.repository.as_deref()).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(leases)))
}

pub async fn acquire_lease(
    State(state): State<Arc<AppState>>,
    request: SignedRequest,
) -> impl IntoResponse {
    let req: AcquireLeaseRequest = request.json()?;

    if !state.config.repositories.contains_key(&req.repository) {
        return Err(ApiError::not_found(format!(
            "Repository {} not found",
            req.repository
        )));
    }
    let owner = request.authorize(&state.authorizer, &req.repository)?;

    let lease = state
        .engine
        .acquire(&req.repository, &req.path, owner.as_str())
        .await?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(LeaseHandle::from(lease))),
    ))
}

pub async fn get_lease(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    let lease = state.engine.get(&token).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(lease.view())))
}

pub async fn commit_lease(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    request: SignedRequest,
) -> impl IntoResponse {
    let lease = state.engine.get(&token).await?;
    request.authorize(&state.authorizer, &lease.repository)?;

    let req: CommitLeaseRequest = request.json()?;
    state.engine.commit(&token, &req.payload_ref).await?;

    Ok::<_, ApiError>(Json(ApiResponse::success(Ack {
        token,
        state: LeaseState::Released,
    })))
}

pub async fn cancel_lease(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    request: SignedRequest,
) -> impl IntoResponse {
    let lease = state.engine.get(&token).await?;
    let owner = request.authorize(&state.authorizer, &lease.repository)?;

    state.engine.cancel(&token, owner.as_str()).await?;

    Ok::<_, ApiError>(Json(ApiResponse::success(Ack {
        token,
        state: LeaseState::Released,
    })))
}
