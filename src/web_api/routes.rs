//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::config_store::{
    AlgorithmConfig, CreateChannelRequest, Gb28181Config, PushStreamConfig, ReportConfig,
    StreamConfig, UpdateChannelRequest,
};
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::supervisor::PipelineContext;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Channels
        .route("/api/channels", get(list_channels))
        .route("/api/channels", post(create_channel))
        .route("/api/channels/:id", get(get_channel))
        .route("/api/channels/:id", put(update_channel))
        .route("/api/channels/:id", delete(delete_channel))
        // Algorithm configs
        .route("/api/algorithm-configs/default", get(default_algorithm_config))
        .route("/api/algorithm-configs/:id", get(get_algorithm_config))
        .route("/api/algorithm-configs/:id", put(put_algorithm_config))
        .route("/api/algorithm-configs/:id", delete(delete_algorithm_config))
        // Alerts
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/cleanup", post(cleanup_alerts))
        .route("/api/alerts/:id", get(get_alert))
        .route("/api/alerts/:id", delete(delete_alert))
        .route("/api/channels/:id/alerts", get(list_channel_alerts))
        // Global configs
        .route("/api/config/stream", get(get_stream_config))
        .route("/api/config/stream", put(put_stream_config))
        .route("/api/config/push_stream", get(get_push_stream_config))
        .route("/api/config/push_stream", put(put_push_stream_config))
        .route("/api/config/gb28181", get(get_gb28181_config))
        .route("/api/config/gb28181", put(put_gb28181_config))
        .route("/api/report-config", get(get_report_config))
        .route("/api/report-config", put(put_report_config))
        // Models
        .route("/api/models", get(list_models))
        // WebSocket feeds
        .route("/ws/channel", get(ws_channel))
        .route("/ws/alert", get(ws_alert))
        .with_state(state)
}

/// Pipeline context handed to supervisor threads started from the API
fn pipeline_context(state: &AppState) -> PipelineContext {
    PipelineContext {
        config_store: state.config_store.clone(),
        service: state.config_store.service().clone(),
        frame_bus: state.frame_bus.clone(),
        suppression: state.suppression.clone(),
        alert_sink: state.alert_sink.clone(),
        runtime: tokio::runtime::Handle::current(),
        model_dir: state.config.model_dir.clone(),
    }
}

// ========================================
// Channels
// ========================================

async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    let channels = state.config_store.cached_channels().await;
    Json(ApiResponse::success(channels))
}

async fn get_channel(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.config_store.service().get_channel(id).await {
        Ok(Some(channel)) => Json(ApiResponse::success(channel)).into_response(),
        Ok(None) => crate::Error::NotFound(format!("Channel {id} not found")).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create_channel(
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> impl IntoResponse {
    match state.config_store.service().create_channel(req).await {
        Ok(channel) => {
            let _ = state.config_store.refresh_cache().await;

            if channel.enabled {
                if let Err(e) = state
                    .channels
                    .start(pipeline_context(&state), channel.clone())
                {
                    tracing::error!(channel_id = channel.id, error = %e, "Supervisor start failed");
                }
            }

            (StatusCode::CREATED, Json(ApiResponse::success(channel))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateChannelRequest>,
) -> impl IntoResponse {
    let before = match state.config_store.service().get_channel(id).await {
        Ok(Some(c)) => c,
        Ok(None) => return crate::Error::NotFound(format!("Channel {id} not found")).into_response(),
        Err(e) => return e.into_response(),
    };

    match state.config_store.service().update_channel(id, req).await {
        Ok(channel) => {
            let _ = state.config_store.refresh_cache().await;

            let source_changed = before.source_url != channel.source_url;
            if source_changed && channel.enabled {
                // new source requires a full pipeline restart
                if let Err(e) = state
                    .channels
                    .restart(pipeline_context(&state), channel.clone())
                {
                    tracing::error!(channel_id = id, error = %e, "Supervisor restart failed");
                }
            } else if before.enabled != channel.enabled {
                if channel.enabled {
                    if let Err(e) = state
                        .channels
                        .start(pipeline_context(&state), channel.clone())
                    {
                        tracing::error!(channel_id = id, error = %e, "Supervisor start failed");
                    }
                } else {
                    state.channels.stop(id);
                }
            }
            // push_enabled changes are picked up by the running
            // supervisor from the cache; no restart needed

            Json(ApiResponse::success(channel)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn delete_channel(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    state.channels.stop(id);
    match state.config_store.service().delete_channel(id).await {
        Ok(()) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"success": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ========================================
// Algorithm configs
// ========================================

#[derive(Deserialize)]
struct DefaultConfigQuery {
    #[serde(default)]
    channel_id: i64,
}

async fn default_algorithm_config(Query(query): Query<DefaultConfigQuery>) -> impl IntoResponse {
    Json(ApiResponse::success(AlgorithmConfig::default_for(
        query.channel_id,
    )))
}

async fn get_algorithm_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.config_store.service().get_algorithm_config(id).await {
        Ok(config) => Json(ApiResponse::success(config)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn put_algorithm_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut config): Json<AlgorithmConfig>,
) -> impl IntoResponse {
    config.channel_id = id;
    match state.config_store.service().put_algorithm_config(config).await {
        Ok(()) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"success": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn delete_algorithm_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.config_store.service().delete_algorithm_config(id).await {
        Ok(deleted) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"success": deleted})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ========================================
// Alerts
// ========================================

#[derive(Deserialize)]
struct AlertListQuery {
    #[serde(default = "default_alert_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_alert_limit() -> i64 {
    100
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertListQuery>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .list_alerts(query.limit, query.offset)
        .await
    {
        Ok(alerts) => Json(ApiResponse::success(alerts)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_channel_alerts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<AlertListQuery>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .list_alerts_by_channel(id, query.limit, query.offset)
        .await
    {
        Ok(alerts) => Json(ApiResponse::success(alerts)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_alert(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.config_store.service().get_alert(id).await {
        Ok(Some(alert)) => Json(ApiResponse::success(alert)).into_response(),
        Ok(None) => crate::Error::NotFound(format!("Alert {id} not found")).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_alert(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.config_store.service().delete_alert(id).await {
        Ok(deleted) => Json(json!({"success": deleted})).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct CleanupRequest {
    days: i64,
}

async fn cleanup_alerts(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> impl IntoResponse {
    match state.config_store.service().cleanup_old_alerts(req.days).await {
        Ok(removed) => Json(json!({"success": true, "removed": removed})).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Global configs
// ========================================

async fn get_stream_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.config_store.cached_stream_config().await,
    ))
}

async fn put_stream_config(
    State(state): State<AppState>,
    Json(config): Json<StreamConfig>,
) -> impl IntoResponse {
    match state.config_store.service().put_stream_config(&config).await {
        Ok(()) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"success": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn get_push_stream_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.config_store.service().get_push_stream_config().await {
        Ok(config) => Json(ApiResponse::success(config)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn put_push_stream_config(
    State(state): State<AppState>,
    Json(config): Json<PushStreamConfig>,
) -> impl IntoResponse {
    match state
        .config_store
        .service()
        .put_push_stream_config(&config)
        .await
    {
        Ok(()) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"success": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn get_gb28181_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.config_store.cached_gb28181_config().await,
    ))
}

async fn put_gb28181_config(
    State(state): State<AppState>,
    Json(config): Json<Gb28181Config>,
) -> impl IntoResponse {
    match state.config_store.service().put_gb28181_config(&config).await {
        Ok(()) => {
            let _ = state.config_store.refresh_cache().await;
            Json(json!({"success": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn get_report_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.config_store.cached_report_config().await,
    ))
}

async fn put_report_config(
    State(state): State<AppState>,
    Json(config): Json<ReportConfig>,
) -> impl IntoResponse {
    match state.config_store.service().put_report_config(&config).await {
        Ok(()) => {
            let _ = state.config_store.refresh_cache().await;
            if !config.enabled {
                // the next enabled publish reconnects lazily
                state.reporter.teardown().await;
            }
            Json(json!({"success": true})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ========================================
// Models
// ========================================

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let mut models = Vec::new();
    match tokio::fs::read_dir(&state.config.model_dir).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".onnx") {
                    models.push(name);
                }
            }
            models.sort();
            Json(ApiResponse::success(models)).into_response()
        }
        Err(e) => crate::Error::Io(e).into_response(),
    }
}

// ========================================
// WebSocket feeds
// ========================================

#[derive(Deserialize)]
struct WsCommand {
    action: String,
    channel_id: Option<i64>,
}

async fn ws_channel(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_channel_socket(socket, state))
}

async fn handle_channel_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let subscriber_id = state.frame_bus.add_channel_subscriber(tx);

    tracing::info!(subscriber_id, "Channel WebSocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if let Message::Text(text) = message {
            match serde_json::from_str::<WsCommand>(&text) {
                Ok(cmd) if cmd.action == "subscribe" => {
                    if let Some(channel_id) = cmd.channel_id {
                        state.frame_bus.switch_channel(subscriber_id, channel_id);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(subscriber_id, error = %e, "Unparseable WS command");
                }
            }
        }
    }

    state.frame_bus.remove_subscriber(subscriber_id);
    send_task.abort();
    tracing::info!(subscriber_id, "Channel WebSocket disconnected");
}

async fn ws_alert(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_alert_socket(socket, state))
}

async fn handle_alert_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let subscriber_id = state.frame_bus.add_alert_subscriber(tx);

    tracing::info!(subscriber_id, "Alert WebSocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // inbound messages on the alert feed are ignored
    while let Some(Ok(_)) = receiver.next().await {}

    state.frame_bus.remove_subscriber(subscriber_id);
    send_task.abort();
    tracing::info!(subscriber_id, "Alert WebSocket disconnected");
}
