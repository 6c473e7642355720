use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::config::RepositoryConfig;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse};
use crate::types::Repository;

fn describe(name: &str, config: &RepositoryConfig) -> Repository {
    Repository {
        name: name.to_string(),
        key_ids: config.keys.iter().map(|k| k.id.clone()).collect(),
    }
}

pub async fn list_repos(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let repos: Vec<Repository> = state
        .config
        .repositories
        .iter()
        .map(|(name, repo)| describe(name, repo))
        .collect();
    Json(ApiResponse::success(repos))
}

pub async fn get_repo(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let repo = state
        .config
        .repositories
        .get(&name)
        .ok_or_else(|| ApiError::not_found(format!("Repository {name} not found")))?;
    Ok::<_, ApiError>(Json(ApiResponse::success(describe(&name, repo))))
}
