use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info};

use palaver_db::models::UserRow;
use palaver_types::api::CreateUserRequest;
use palaver_types::models::User;

use crate::{AppState, parse_sqlite_timestamp};

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.username.is_empty() || req.username.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let username = req.username.clone();
    let row = tokio::task::spawn_blocking(move || {
        if db
            .get_user_by_username(&username)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .is_some()
        {
            return Err(StatusCode::CONFLICT);
        }
        db.create_user(&username)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    info!("User '{}' created (id {})", row.username, row.id);
    Ok((StatusCode::CREATED, Json(user_from_row(row))))
}

/// GET /users
pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_users())
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let users: Vec<User> = rows.into_iter().map(user_from_row).collect();
    Ok(Json(users))
}

pub(crate) fn user_from_row(row: UserRow) -> User {
    let created_at = parse_sqlite_timestamp(&row.created_at, "user", row.id);
    User {
        id: row.id,
        username: row.username,
        created_at,
    }
}
