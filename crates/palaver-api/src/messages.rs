use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info};

use palaver_db::models::MessageRow;
use palaver_types::api::PostMessageRequest;
use palaver_types::models::Message;

use crate::{AppState, parse_sqlite_timestamp};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Exclusive created_at upper bound. Pass the oldest timestamp of the
    /// previous page to walk further back.
    pub before: Option<String>,
    /// Exclusive created_at lower bound.
    pub after: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// POST /groups/{group_name}/messages
pub async fn post_message(
    State(state): State<AppState>,
    Path(group_name): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.filter(|c| !c.is_empty());
    let image_url = req.image_url.filter(|u| !u.is_empty());
    if content.is_none() && image_url.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let user_id = req.user_id;
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
        if !db
            .is_member(group.id, user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }
        db.insert_message(group.id, user_id, content.as_deref(), image_url.as_deref())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    info!(
        "Message {} posted to group {} by user {}",
        row.id, row.group_id, row.user_id
    );
    Ok((StatusCode::CREATED, Json(message_from_row(row))))
}

/// GET /groups/{group_name}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(group_name): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, 500);

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || {
        let group = db
            .get_group_by_name(&group_name)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        db.get_messages(
            group.id,
            limit,
            query.before.as_deref(),
            query.after.as_deref(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let messages: Vec<Message> = rows.into_iter().map(message_from_row).collect();
    Ok(Json(messages))
}

fn message_from_row(row: MessageRow) -> Message {
    let created_at = parse_sqlite_timestamp(&row.created_at, "message", row.id);
    Message {
        id: row.id,
        group_id: row.group_id,
        user_id: row.user_id,
        username: row.username,
        content: row.content,
        image_url: row.image_url,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;
    use crate::{groups, users};
    use palaver_types::api::{CreateGroupRequest, CreateUserRequest, JoinGroupRequest};

    async fn seed_member(state: &AppState, username: &str, group: &str) {
        users::create_user(
            State(state.clone()),
            Json(CreateUserRequest {
                username: username.into(),
            }),
        )
        .await
        .unwrap();
        groups::create_group(
            State(state.clone()),
            Json(CreateGroupRequest { name: group.into() }),
        )
        .await
        .unwrap();
        groups::join_group(
            State(state.clone()),
            Path(group.into()),
            Json(JoinGroupRequest {
                user_id: 1,
                role: None,
            }),
        )
        .await
        .unwrap();
    }

    fn text_message(user_id: i64, content: &str) -> PostMessageRequest {
        PostMessageRequest {
            user_id,
            content: Some(content.into()),
            image_url: None,
        }
    }

    fn page(limit: u32) -> MessageQuery {
        MessageQuery {
            limit,
            before: None,
            after: None,
        }
    }

    #[tokio::test]
    async fn posts_and_reads_back_messages() {
        let state = test_state(vec![]);
        seed_member(&state, "ana", "General").await;

        let resp = post_message(
            State(state.clone()),
            Path("General".into()),
            Json(text_message(1, "hello")),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_messages(State(state), Path("General".into()), Query(page(50)))
            .await
            .unwrap()
            .into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let messages: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("hello"));
        assert_eq!(messages[0].username, "ana");
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let state = test_state(vec![]);
        seed_member(&state, "ana", "General").await;
        for text in ["one", "two", "three"] {
            post_message(
                State(state.clone()),
                Path("General".into()),
                Json(text_message(1, text)),
            )
            .await
            .unwrap();
        }

        let resp = get_messages(State(state), Path("General".into()), Query(page(2)))
            .await
            .unwrap()
            .into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let messages: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_deref(), Some("three"));
        assert_eq!(messages[1].content.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn posting_without_membership_is_forbidden() {
        let state = test_state(vec![]);
        seed_member(&state, "ana", "General").await;
        users::create_user(
            State(state.clone()),
            Json(CreateUserRequest {
                username: "bob".into(),
            }),
        )
        .await
        .unwrap();

        let result = post_message(
            State(state),
            Path("General".into()),
            Json(text_message(2, "hi")),
        )
        .await;
        assert!(matches!(result, Err(StatusCode::FORBIDDEN)));
    }

    #[tokio::test]
    async fn posting_needs_content_or_an_image() {
        let state = test_state(vec![]);
        seed_member(&state, "ana", "General").await;

        let result = post_message(
            State(state.clone()),
            Path("General".into()),
            Json(PostMessageRequest {
                user_id: 1,
                content: None,
                image_url: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(StatusCode::BAD_REQUEST)));

        let resp = post_message(
            State(state),
            Path("General".into()),
            Json(PostMessageRequest {
                user_id: 1,
                content: None,
                image_url: Some("https://cdn.example/cat.png".into()),
            }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn unknown_group_and_user_are_not_found() {
        let state = test_state(vec![]);
        seed_member(&state, "ana", "General").await;

        let result = post_message(
            State(state.clone()),
            Path("Nowhere".into()),
            Json(text_message(1, "hi")),
        )
        .await;
        assert!(matches!(result, Err(StatusCode::NOT_FOUND)));

        let result = post_message(
            State(state.clone()),
            Path("General".into()),
            Json(text_message(42, "hi")),
        )
        .await;
        assert!(matches!(result, Err(StatusCode::NOT_FOUND)));

        let result = get_messages(State(state), Path("Nowhere".into()), Query(page(50))).await;
        assert!(matches!(result, Err(StatusCode::NOT_FOUND)));
    }
}
