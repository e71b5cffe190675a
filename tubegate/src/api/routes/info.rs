//! Media information route.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use media_extractor::MediaInfo;

use crate::api::error::ApiResult;
use crate::api::models::InfoQuery;
use crate::api::routes::media::validate_url;
use crate::api::server::AppState;

/// Create the info router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_info))
}

/// Title, metadata and the full variant list of a source.
async fn get_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> ApiResult<Json<MediaInfo>> {
    let url = validate_url(&state, query.url.as_deref())?;
    let info = state.extractor.fetch_variants(url).await?;
    Ok(Json(info))
}
