//! Room inspection endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::connection_manager::RoomInfo;
use crate::error::{AppError, Result};
use crate::realtime::events;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomInfo>,
    pub total_rooms: usize,
}

/// GET /api/v1/rooms - List all rooms with member counts
pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomListResponse> {
    let rooms = state.connection_manager.list_rooms();
    let total = rooms.len();

    Json(RoomListResponse {
        rooms,
        total_rooms: total,
    })
}

/// GET /api/v1/rooms/{room_id} - Get room details
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomInfo>> {
    if !events::is_valid_room_id(&room_id) {
        return Err(AppError::Validation(format!(
            "room id must be 1-{} bytes without control characters",
            events::MAX_ROOM_ID_LEN
        )));
    }

    state
        .connection_manager
        .room_info(&room_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Room '{}' has no members", room_id)))
}
