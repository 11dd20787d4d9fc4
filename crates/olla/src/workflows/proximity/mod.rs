//! Producer proximity search (haversine over a full scan).

pub mod router;
pub mod search;

pub use router::{proximity_router, NearbyParams};
pub use search::{
    haversine_km, rank_by_distance, NearbyProducer, ProximityError, ProximityQuery,
    ProximitySearch, EARTH_RADIUS_KM,
};
