use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::search::{NearbyProducer, ProximitySearch};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub radius_km: Option<f64>,
}

/// Public producer listing by distance. Hidden producers are left out.
pub fn proximity_router(search: Arc<ProximitySearch>) -> Router {
    Router::new()
        .route("/api/v1/producers/nearby", get(nearby_handler))
        .with_state(search)
}

pub(crate) async fn nearby_handler(
    State(search): State<Arc<ProximitySearch>>,
    params: Result<Query<NearbyParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    let radius_km = params.radius_km.unwrap_or(search.default_radius_km());

    let producers: Vec<NearbyProducer> = search
        .producers_within_radius(params.lat, params.lon, Some(radius_km))
        .await?
        .into_iter()
        .filter(|nearby| nearby.producer.visible)
        .collect();

    let body = json!({
        "lat": params.lat,
        "lon": params.lon,
        "radius_km": radius_km,
        "count": producers.len(),
        "producers": producers,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}
