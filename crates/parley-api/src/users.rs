use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use parley_types::api::{Claims, UpdateAboutRequest, UserResponse};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn update_about(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateAboutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.update_about(&claims.sub.to_string(), &req.about)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn search_users(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    // Run blocking DB query off the async runtime
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.search_users(&prefix))
        .await
        .map_err(ApiError::join)??;

    let users: Vec<UserResponse> = rows
        .into_iter()
        .map(|row| UserResponse {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt user id '{}': {}", row.id, e);
                Uuid::default()
            }),
            username: row.username,
            about: row.about,
        })
        .collect();

    Ok(Json(users))
}
