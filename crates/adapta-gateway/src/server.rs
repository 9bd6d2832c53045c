use crate::error::ApiError;
use crate::models::SendMessageRequest;
use adapta_core::AgentCard;
use adapta_tasks::{TaskExecutor, TaskRecord};
use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared state behind every route.
pub struct GatewayState {
    /// Served at `/.well-known/agent.json`.
    pub card: AgentCard,
    /// Runs and tracks tasks.
    pub executor: TaskExecutor,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Builds the router serving `card` and dispatching tasks to `executor`.
    pub fn build(card: AgentCard, executor: TaskExecutor) -> Router {
        let state = Arc::new(GatewayState { card, executor });
        Router::new()
            .route("/.well-known/agent.json", get(card_handler))
            .route("/health", get(health_handler))
            .route("/message/send", post(send_handler))
            .route("/message/stream", post(stream_handler))
            .route("/tasks", get(list_handler))
            .route("/tasks/{id}", get(get_handler).delete(delete_handler))
            .route("/tasks/{id}/cancel", post(cancel_handler))
            .with_state(state)
    }
}

type AppState = State<Arc<GatewayState>>;

async fn card_handler(State(state): AppState) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "adapta"}))
}

async fn send_handler(
    State(state): AppState,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<TaskRecord>, ApiError> {
    let context_id = req.context_id;
    let blocking = req.blocking;
    let input = req.message.into_text()?;
    info!(input_len = input.len(), blocking, "Message received");

    let record = if blocking {
        state.executor.run(&input, context_id.as_deref()).await?
    } else {
        let id = state.executor.submit(&input, context_id.as_deref()).await?;
        state.executor.get(id).await?
    };
    Ok(Json(record))
}

async fn stream_handler(
    State(state): AppState,
    Json(req): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let context_id = req.context_id;
    let input = req.message.into_text()?;
    let (id, chunks) = state.executor.stream(&input, context_id.as_deref()).await?;
    info!(task_id = %id, input_len = input.len(), "Streaming message received");

    let events = chunks.map(move |chunk| match chunk {
        Ok(text) => Event::default()
            .event("chunk")
            .json_data(serde_json::json!({"taskId": id, "text": text})),
        Err(e) => Event::default().event("error").json_data(&e),
    });

    // Runs once `chunks` is exhausted, so the record is terminal by then.
    let executor = state.executor.clone();
    let final_task = futures_util::stream::once(async move {
        match executor.get(id).await {
            Ok(record) => Event::default().event("task").json_data(&record),
            Err(e) => Event::default()
                .event("error")
                .json_data(serde_json::json!({"error": e.to_string()})),
        }
    });

    Ok(Sse::new(events.chain(final_task)).keep_alive(KeepAlive::default()))
}

async fn list_handler(State(state): AppState) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    Ok(Json(state.executor.list().await?))
}

async fn get_handler(
    State(state): AppState,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, ApiError> {
    Ok(Json(state.executor.get(id).await?))
}

async fn cancel_handler(
    State(state): AppState,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, ApiError> {
    Ok(Json(state.executor.cancel(id).await?))
}

async fn delete_handler(
    State(state): AppState,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, ApiError> {
    Ok(Json(state.executor.remove(id).await?))
}
