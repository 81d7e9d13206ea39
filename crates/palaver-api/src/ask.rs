use axum::{Json, extract::State, http::StatusCode};
use tracing::error;

use palaver_agent::AgentError;
use palaver_types::api::{AskRequest, AskResponse, ErrorResponse};

use crate::AppState;

/// POST /ask
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, Json<ErrorResponse>)> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "InvalidQuestion".into(),
                message: "question must not be empty".into(),
            }),
        ));
    }

    match state.agent.ask(question).await {
        Ok(answer) => Ok(Json(AskResponse {
            answer: answer.answer,
            columns: Some(answer.columns),
            rows: Some(answer.rows),
            sql: Some(answer.sql),
        })),
        Err(err) => {
            error!("Question failed ({}): {}", err.code(), err);
            Err((status_for(&err), Json(error_body(&err))))
        }
    }
}

/// POST /schema/refresh
pub async fn refresh_schema(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    match state.agent.refresh_schema().await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(err) => {
            error!("Schema refresh failed: {}", err);
            Err((status_for(&err), Json(error_body(&err))))
        }
    }
}

fn error_body(err: &AgentError) -> ErrorResponse {
    ErrorResponse {
        error: err.code().into(),
        message: err.to_string(),
    }
}

fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::CatalogUnavailable(_) | AgentError::GenerationUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AgentError::GenerationTimeout | AgentError::ExecutionTimeout => StatusCode::GATEWAY_TIMEOUT,
        AgentError::NoQueryFound
        | AgentError::UnknownReference { .. }
        | AgentError::NotReadOnly(_)
        | AgentError::SyntaxError(_)
        | AgentError::UnresolvableQuery { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AgentError::ExecutionError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
