use axum::{
    routing::{get, post, put},
    Router, Json,
    extract::{Path, State},
    response::Sse,
    http::StatusCode,
};
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::dispatch::{CommandPayload, DispatchError, DispatchRegistry};
use crate::application::execution::ExecutionService;
use crate::domain::events::StreamEvent;
use crate::domain::execution::ExecutionId;

pub struct AppState {
    pub registry: Arc<DispatchRegistry>,
    pub execution_service: Arc<dyn ExecutionService>,
}

pub fn app(registry: Arc<DispatchRegistry>, service: Arc<dyn ExecutionService>) -> Router {
    let state = Arc::new(AppState {
        registry,
        execution_service: service,
    });

    Router::new()
        .route("/executions", post(start_execution))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .route("/executions/{id}/confirm", post(confirm_tool_calls))
        .route("/executions/{id}/reject", post(reject_tool_calls))
        .route("/executions/{id}/tool-calls/{index}", put(update_tool_call))
        .route("/executions/{id}/stream", get(stream_execution))
        .with_state(state)
}

fn error_response(error: DispatchError) -> (StatusCode, Json<Value>) {
    let status = match &error {
        // Unregistered/duplicate handlers are hard bugs: 5xx, never swallowed.
        DispatchError::UnregisteredHandler(_) | DispatchError::DuplicateHandler(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        DispatchError::MalformedPayload(_, _) => StatusCode::BAD_REQUEST,
        DispatchError::Handler(_, _) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(json!({ "error": error.to_string() })))
}

async fn dispatch(
    state: &AppState,
    tag: &str,
    data: Value,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .registry
        .dispatch(CommandPayload::new(tag, data))
        .await
        .map(Json)
        .map_err(error_response)
}

fn parse_id(id: &str) -> Result<ExecutionId, (StatusCode, Json<Value>)> {
    Uuid::parse_str(id).map(ExecutionId).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid execution ID" })),
        )
    })
}

async fn start_execution(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    dispatch(&state, "execution.start", payload).await
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let execution_id = parse_id(&id)?;
    dispatch(&state, "execution.get", json!({ "execution_id": execution_id })).await
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let execution_id = parse_id(&id)?;
    dispatch(&state, "execution.cancel", json!({ "execution_id": execution_id })).await
}

async fn confirm_tool_calls(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let execution_id = parse_id(&id)?;
    dispatch(&state, "execution.confirm", json!({ "execution_id": execution_id })).await
}

async fn reject_tool_calls(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let execution_id = parse_id(&id)?;
    let reason = payload.get("reason").cloned().unwrap_or(Value::Null);
    dispatch(
        &state,
        "execution.reject",
        json!({ "execution_id": execution_id, "reason": reason }),
    )
    .await
}

async fn update_tool_call(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, usize)>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let execution_id = parse_id(&id)?;
    let key = payload.get("key").cloned().unwrap_or(Value::Null);
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    dispatch(
        &state,
        "execution.update_tool_call",
        json!({
            "execution_id": execution_id,
            "call_index": index,
            "key": key,
            "value": value,
        }),
    )
    .await
}

/// Long-lived SSE stream of execution events.
///
/// Keep-alive frames surface as SSE comments: framing only, invisible to
/// payload consumers. Client disconnect drops the stream, which releases
/// the upstream subscription and stops the keep-alive timer.
async fn stream_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, (StatusCode, Json<Value>)>
{
    let execution_id = parse_id(&id)?;
    let stream = state
        .execution_service
        .stream_execution(execution_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;

    let sse_stream = stream.map(|frame| {
        Ok(match frame {
            StreamEvent::Event(event) => axum::response::sse::Event::default()
                .data(serde_json::to_string(&event).unwrap_or_default()),
            StreamEvent::KeepAlive => {
                axum::response::sse::Event::default().comment("keep-alive")
            }
        })
    });

    Ok(Sse::new(sse_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::execution::{register_command_handlers, StartExecutionRequest};
    use crate::domain::cancellation::{CancelReason, CancelSignal};
    use crate::domain::execution::Execution;
    use crate::infrastructure::confirmation_gate::PendingConfirmationInfo;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::stream::ExecutionEventStream;
    use anyhow::bail;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct MockExecutionService;

    #[async_trait]
    impl ExecutionService for MockExecutionService {
        async fn start_execution(&self, _request: StartExecutionRequest) -> anyhow::Result<ExecutionId> {
            Ok(ExecutionId::new())
        }
        async fn get_execution(&self, id: ExecutionId) -> anyhow::Result<Execution> {
            bail!("Execution {id} not found")
        }
        async fn cancel_execution(
            &self,
            _id: ExecutionId,
            _reason: CancelReason,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stream_execution(&self, id: ExecutionId) -> anyhow::Result<ExecutionEventStream> {
            let bus = EventBus::new(8);
            Ok(ExecutionEventStream::open(
                &bus,
                id,
                CancelSignal::cancelled_with(CancelReason::Manual("gone".to_string())),
                std::time::Duration::from_secs(30),
            ))
        }
        async fn pending_confirmation(&self, _id: ExecutionId) -> Option<PendingConfirmationInfo> {
            None
        }
        async fn confirm_tool_calls(&self, id: ExecutionId) -> anyhow::Result<()> {
            bail!("No pending confirmation for execution {id}")
        }
        async fn reject_tool_calls(
            &self,
            id: ExecutionId,
            _reason: Option<String>,
        ) -> anyhow::Result<()> {
            bail!("No pending confirmation for execution {id}")
        }
        async fn update_tool_call(
            &self,
            id: ExecutionId,
            _call_index: usize,
            _key: String,
            _value: Value,
        ) -> anyhow::Result<()> {
            bail!("No pending confirmation for execution {id}")
        }
    }

    fn test_app() -> Router {
        let registry = Arc::new(DispatchRegistry::new());
        let service: Arc<dyn ExecutionService> = Arc::new(MockExecutionService);
        register_command_handlers(&registry, service.clone()).unwrap();
        app(registry, service)
    }

    #[tokio::test]
    async fn test_start_execution_returns_id() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/executions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"workflow": "triage", "input": "hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_execution_id_is_bad_request() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/executions/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_handler_failure_is_unprocessable() {
        let app = test_app();
        let id = ExecutionId::new();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/executions/{}/confirm", id.0))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
