//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the coordinator and media
//! services for business logic.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::poll::{create_poll_session, poll_events, submit_poll_event};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::config::Config;
use crate::error::CinesyncResult;
use crate::media::proxy::{info_handler, metadata_handler, stream_handler};
use crate::store::{ChatMessage, PlaybackState, RoomRecord};
use crate::utils::now_millis;

/// Client-facing room projection. Omits internal identity fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomProjection {
    pub room_id: String,
    pub host_display_name: String,
    pub current_video_url: Option<String>,
    pub current_video_title: Option<String>,
    pub last_known_time: f64,
    pub last_known_state: PlaybackState,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<RoomRecord> for RoomProjection {
    fn from(record: RoomRecord) -> Self {
        Self {
            room_id: record.room_id,
            host_display_name: record.host_display_name,
            current_video_url: record.current_video_url,
            current_video_title: record.current_video_title,
            last_known_time: record.last_known_time,
            last_known_state: record.last_known_state,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// `POST /api/rooms` body. Both fields are optional; send `{}` for defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Display label for the room; informational only.
    #[serde(default)]
    pub name: Option<String>,
    /// Display name of the creator, who holds host reclaim rights.
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "CineSync server is running",
        "timestamp": now_millis(),
        "environment": state.config.environment,
    }))
}

async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> CinesyncResult<(StatusCode, Json<RoomProjection>)> {
    let record = state.coordinator.create_room(body.name, body.host).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> CinesyncResult<Json<RoomProjection>> {
    let record = state.coordinator.get_room(&room_id).await?;
    Ok(Json(record.into()))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> CinesyncResult<Json<Vec<ChatMessage>>> {
    let messages = state.coordinator.messages(&room_id, query.limit).await?;
    Ok(Json(messages))
}

/// Builds the CORS layer from the configured origin allow-list.
///
/// Credentials are allowed, which rules out wildcard origins: anything that
/// fails to parse is skipped with a warning rather than silently widening
/// the policy.
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("[Server] invalid CORS origin {:?}, skipping", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::RANGE, header::AUTHORIZATION])
}

/// Assembles the full application router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{room_id}", get(get_room))
        .route("/api/rooms/{room_id}/messages", get(list_messages))
        .route("/api/video/metadata", get(metadata_handler))
        .route("/api/video/info", get(info_handler))
        .route("/api/video/stream", get(stream_handler))
        .route("/ws", get(ws_handler))
        .route("/poll", post(create_poll_session))
        .route(
            "/poll/{session_id}",
            get(poll_events).post(submit_poll_event),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
