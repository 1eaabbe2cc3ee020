//! Map widget, place lookup and geolocation seams.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, ErrorKind};
use crate::markers::MarkerSpec;
use crate::model::Coordinates;
use crate::store::Viewport;

pub type MarkerClick = Arc<dyn Fn() + Send + Sync>;

/// Native marker primitives. Implementations must not invoke click handlers
/// from inside these calls.
pub trait MapWidget: Send + Sync {
    type Marker: Send;

    fn create_marker(&self, spec: &MarkerSpec, on_click: MarkerClick) -> Self::Marker;
    fn update_marker(&self, marker: &mut Self::Marker, spec: &MarkerSpec);
    fn remove_marker(&self, marker: Self::Marker);
    fn set_view(&self, viewport: Viewport);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceSuggestion {
    pub lookup_id: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaceDetails {
    pub lookup_id: String,
    pub name: String,
    pub location: Coordinates,
    pub formatted_address: Option<String>,
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("place lookup failed: {0}")]
    Service(String),
    #[error("no details for {0}")]
    NotFound(String),
}

impl From<LookupError> for AppError {
    fn from(e: LookupError) -> Self {
        match &e {
            LookupError::Service(_) => AppError::new(ErrorKind::Network, "Place search failed"),
            LookupError::NotFound(_) => AppError::new(ErrorKind::NotFound, "Place not found"),
        }
        .with_internal(e.to_string())
    }
}

#[async_trait::async_trait]
pub trait PlaceLookup: Send + Sync {
    async fn autocomplete(&self, query: &str) -> Result<Vec<PlaceSuggestion>, LookupError>;
    async fn details(&self, lookup_id: &str) -> Result<PlaceDetails, LookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("location request timed out")]
    Timeout,
}

impl From<GeolocationError> for AppError {
    fn from(e: GeolocationError) -> Self {
        let kind = match e {
            GeolocationError::PermissionDenied => ErrorKind::LocationPermissionDenied,
            GeolocationError::Unavailable(_) | GeolocationError::Timeout => ErrorKind::Location,
        };
        AppError::new(kind, e.to_string())
    }
}

#[async_trait::async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, GeolocationError>;
}
