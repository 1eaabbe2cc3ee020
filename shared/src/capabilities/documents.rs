//! Document store seam: per-user trips and per-trip places, with live
//! place snapshots.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorKind};
use crate::model::{NewTrip, PlaceDocument, PlaceId, PlacePatch, PlaceRecord, Trip, TripId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DocumentError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid document: {0}")]
    Invalid(String),
}

impl DocumentError {
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<DocumentError> for AppError {
    fn from(e: DocumentError) -> Self {
        let internal = e.to_string();
        match e {
            DocumentError::PermissionDenied(_) => {
                AppError::new(ErrorKind::PermissionDenied, "Permission denied")
            }
            DocumentError::NotFound(_) => AppError::new(ErrorKind::NotFound, "Not found"),
            DocumentError::Unavailable(_) => {
                AppError::new(ErrorKind::Network, "Document store unavailable")
            }
            DocumentError::Invalid(ref reason) => AppError::new(ErrorKind::Internal, reason.clone()),
        }
        .with_internal(internal)
    }
}

/// Full place listings, newest visit first. The stream ends after an error.
pub type PlaceSnapshots = BoxStream<'static, Result<Vec<PlaceRecord>, DocumentError>>;

/// Unsubscribes when dropped, whether or not anyone is still polling the
/// snapshot stream.
pub struct SubscriptionGuard(Option<Box<dyn FnOnce() + Send>>);

impl SubscriptionGuard {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(unsubscribe)))
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.0.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SubscriptionGuard").field(&self.0.is_some()).finish()
    }
}

pub struct PlaceSubscription {
    pub snapshots: PlaceSnapshots,
    pub guard: SubscriptionGuard,
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Newest trip first.
    async fn list_trips(&self, user: &UserId) -> Result<Vec<Trip>, DocumentError>;

    /// The created trip starts with `places_count == 0`.
    async fn create_trip(&self, user: &UserId, trip: NewTrip) -> Result<Trip, DocumentError>;

    /// Deletes the trip's places first, then the trip.
    async fn delete_trip(&self, user: &UserId, trip: &TripId) -> Result<(), DocumentError>;

    /// Live query over one trip's places ordered by visited date descending.
    /// Emits the current listing first, then one listing per change.
    fn subscribe_places(&self, user: &UserId, trip: &TripId) -> PlaceSubscription;

    async fn create_place(
        &self,
        user: &UserId,
        trip: &TripId,
        place: PlaceDocument,
    ) -> Result<PlaceId, DocumentError>;

    async fn update_place(
        &self,
        user: &UserId,
        trip: &TripId,
        place: &PlaceId,
        patch: PlacePatch,
    ) -> Result<(), DocumentError>;

    async fn delete_place(
        &self,
        user: &UserId,
        trip: &TripId,
        place: &PlaceId,
    ) -> Result<(), DocumentError>;
}
