//! Door image route

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::error::SurveyResult;
use crate::AppState;

pub fn image_routes() -> Router<AppState> {
    Router::new().route("/door-images/:d2d", get(door_image))
}

/// GET /door-images/:d2d
pub async fn door_image(State(state): State<AppState>, Path(d2d): Path<u32>) -> SurveyResult<Response> {
    let image = state.assets.resolve(d2d).await?;
    let bytes = image.bytes().await?;
    Ok(([(header::CONTENT_TYPE, image.content_type())], bytes).into_response())
}
