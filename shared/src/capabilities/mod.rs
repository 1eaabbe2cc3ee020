pub mod auth;
pub mod documents;
pub mod map;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod storage;

use std::sync::Arc;

pub use self::auth::{AuthError, AuthProvider, AuthUser};
pub use self::documents::{
    DocumentError, DocumentStore, PlaceSnapshots, PlaceSubscription, SubscriptionGuard,
};
pub use self::map::{
    GeolocationError, Geolocator, LookupError, MapWidget, MarkerClick, PlaceDetails, PlaceLookup,
    PlaceSuggestion,
};
pub use self::storage::{ObjectStorage, ProgressFn, StorageError, StorageObject};

// All I/O runs in the async journal host; the Crux core only needs Render
// to tell the shell a new view is ready.
pub use crux_core::render::Render;

use crate::app::{App, Event};

pub type AppRender = Render<Event>;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
}

/// External collaborators a journal is wired to.
#[derive(Clone)]
pub struct Services {
    pub documents: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub auth: Arc<dyn AuthProvider>,
    pub lookup: Arc<dyn PlaceLookup>,
    pub geolocator: Arc<dyn Geolocator>,
}
