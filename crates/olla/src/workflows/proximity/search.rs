use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProximityConfig;
use crate::domain::{Producer, PRODUCER_ROLE};
use crate::error::ErrorKind;
use crate::gateway::{decode_row, Filter, StoreError, StoreGateway, Table};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, thiserror::Error)]
pub enum ProximityError {
    #[error("invalid proximity query: {0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProximityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProximityError::InvalidQuery(_) => ErrorKind::MalformedEvent,
            ProximityError::Store(err) => err.kind(),
        }
    }
}

/// Great-circle distance in kilometres between two points given in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ProximityQuery {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl ProximityQuery {
    pub fn validate(&self) -> Result<(), ProximityError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ProximityError::InvalidQuery(format!(
                "latitude {} is out of range",
                self.lat
            )));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(ProximityError::InvalidQuery(format!(
                "longitude {} is out of range",
                self.lon
            )));
        }
        if !self.radius_km.is_finite() || self.radius_km < 0.0 {
            return Err(ProximityError::InvalidQuery(format!(
                "radius {} must be a non-negative distance",
                self.radius_km
            )));
        }
        Ok(())
    }
}

/// A producer within range, with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyProducer {
    #[serde(flatten)]
    pub producer: Producer,
    pub distance_km: f64,
}

/// Rank producers by distance from the query point.
///
/// Producers without coordinates are skipped. Ties keep input order.
pub fn rank_by_distance<I>(producers: I, query: &ProximityQuery) -> Vec<NearbyProducer>
where
    I: IntoIterator<Item = Producer>,
{
    let mut nearby: Vec<NearbyProducer> = producers
        .into_iter()
        .filter_map(|producer| {
            let (lat, lon) = producer.coordinates()?;
            let distance = haversine_km(query.lat, query.lon, lat, lon);
            (distance <= query.radius_km).then(|| NearbyProducer {
                producer,
                distance_km: round_to_hundredths(distance),
            })
        })
        .collect();

    nearby.sort_by(|left, right| left.distance_km.total_cmp(&right.distance_km));
    nearby
}

/// Full-scan proximity lookup over the `producers` table.
#[derive(Clone)]
pub struct ProximitySearch {
    store: Arc<dyn StoreGateway>,
    default_radius_km: f64,
}

impl ProximitySearch {
    pub fn new(store: Arc<dyn StoreGateway>, config: &ProximityConfig) -> Self {
        Self {
            store,
            default_radius_km: config.default_radius_km,
        }
    }

    pub fn default_radius_km(&self) -> f64 {
        self.default_radius_km
    }

    pub async fn producers_within_radius(
        &self,
        lat: f64,
        lon: f64,
        radius_km: Option<f64>,
    ) -> Result<Vec<NearbyProducer>, ProximityError> {
        let query = ProximityQuery {
            lat,
            lon,
            radius_km: radius_km.unwrap_or(self.default_radius_km),
        };
        query.validate()?;

        let rows = self
            .store
            .get(Table::Producers, &Filter::eq("role", PRODUCER_ROLE))
            .await?;

        let producers = rows.into_iter().filter_map(|row| {
            let id = row.get("id").cloned();
            match decode_row::<Producer>(row) {
                Ok(producer) => Some(producer),
                Err(err) => {
                    warn!(producer_id = ?id, error = %err, "skipping undecodable producer row");
                    None
                }
            }
        });

        let nearby = rank_by_distance(producers, &query);
        debug!(
            lat = query.lat,
            lon = query.lon,
            radius_km = query.radius_km,
            matches = nearby.len(),
            "proximity search complete"
        );
        Ok(nearby)
    }
}
