use axum::Json;
use axum::extract;
use serde::{Deserialize, Serialize};

use super::AppState;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationResponse {
    pub generation: u64,
}

/// Reports the generation currently served.
pub async fn get_generation(
    extract::State(state): extract::State<AppState>,
) -> Json<GenerationResponse> {
    Json(GenerationResponse {
        generation: state.service.generation(),
    })
}

/// Moves to a new generation, dropping every cached artifact.
///
/// This is the hook for deployments that rebuild the render logic without restarting.
pub async fn advance_generation(
    extract::State(state): extract::State<AppState>,
) -> Json<GenerationResponse> {
    sentry::configure_scope(|scope| {
        scope.set_transaction(Some("POST /generation"));
    });

    let generation = state.service.advance_generation();
    Json(GenerationResponse { generation })
}
