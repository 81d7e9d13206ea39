use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use palaver_db::models::{GroupRow, MemberRow};
use palaver_types::api::{CreateGroupRequest, JoinGroupRequest};
use palaver_types::models::{Group, GroupMember};

use crate::{AppState, parse_sqlite_timestamp};

/// POST /groups
pub async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.is_empty() || req.name.len() > 128 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let name = req.name.clone();
    let row = tokio::task::spawn_blocking(move || {
        if db
            .get_group_by_name(&name)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .is_some()
        {
            return Err(StatusCode::CONFLICT);
        }
        db.create_group(&name)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    info!("Group '{}' created (id {})", row.name, row.id);
    Ok((StatusCode::CREATED, Json(group_from_row(row))))
}

/// GET /groups
pub async fn list_groups(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_groups())
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let groups: Vec<Group> = rows.into_iter().map(group_from_row).collect();
    Ok(Json(groups))
}

/// POST /groups/{group_name}/members
pub async fn join_group(
    State(state): State<AppState>,
    Path(group_name): Path<String>,
    Json(req): Json<JoinGroupRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let role = req.role.unwrap_or_else(|| "member".to_string());
    let user_id = req.user_id;

    let db = state.db.clone();
    let row = tokio::task::spawn_blocking(move || {
        let group = db
            .get_group_by_name(&group_name)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if db
            .get_user_by_id(user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .is_none()
        {
            return Err(StatusCode::NOT_FOUND);
        }
        if db
            .is_member(group.id, user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::CONFLICT);
        }
        db.add_member(group.id, user_id, &role)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    info!(
        "User {} joined group {} as {}",
        row.user_id, row.group_id, row.role
    );
    Ok((StatusCode::CREATED, Json(member_from_row(row))))
}

pub(crate) fn group_from_row(row: GroupRow) -> Group {
    let created_at = parse_sqlite_timestamp(&row.created_at, "group", row.id);
    Group {
        id: row.id,
        name: row.name,
        created_at,
    }
}

fn member_from_row(row: MemberRow) -> GroupMember {
    let joined_at = parse_sqlite_timestamp(&row.joined_at, "membership", row.user_id);
    GroupMember {
        group_id: row.group_id,
        user_id: row.user_id,
        role: row.role,
        joined_at,
    }
}
