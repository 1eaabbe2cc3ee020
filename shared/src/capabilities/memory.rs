//! In-process implementations of every capability.
//!
//! Test doubles, built for this crate's tests and behind the `testing`
//! feature for anyone else. Each one exposes a few knobs for injecting
//! faults (denied writes, failing or stalled uploads, broken subscriptions).

use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use super::auth::{AuthError, AuthProvider, AuthUser};
use super::documents::{DocumentError, DocumentStore, PlaceSubscription, SubscriptionGuard};
use super::map::{
    GeolocationError, Geolocator, LookupError, MapWidget, MarkerClick, PlaceDetails, PlaceLookup,
    PlaceSuggestion,
};
use super::storage::{ObjectStorage, ProgressFn, StorageError, StorageObject};
use super::Services;
use crate::lock;
use crate::markers::{MarkerKey, MarkerSpec, MarkerStyle};
use crate::model::{
    Coordinates, NewTrip, PlaceDocument, PlaceId, PlacePatch, PlaceRecord, Trip, TripId, UserId,
};
use crate::store::Viewport;

// ============================================================================
// Documents
// ============================================================================

type TripKey = (UserId, TripId);
type SnapshotSender = mpsc::UnboundedSender<Result<Vec<PlaceRecord>, DocumentError>>;

#[derive(Default)]
struct DocumentState {
    trips: HashMap<UserId, Vec<Trip>>,
    places: HashMap<TripKey, Vec<PlaceRecord>>,
    subscribers: HashMap<TripKey, Vec<SnapshotSender>>,
    next_id: u64,
}

impl DocumentState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn snapshot(&self, key: &TripKey) -> Vec<PlaceRecord> {
        let mut records = self.places.get(key).cloned().unwrap_or_default();
        records.sort_by(|a, b| b.document.visited_date.cmp(&a.document.visited_date));
        records
    }

    fn broadcast(&mut self, key: &TripKey) {
        let snapshot = self.snapshot(key);
        if let Some(senders) = self.subscribers.get_mut(key) {
            senders.retain(|tx| tx.unbounded_send(Ok(snapshot.clone())).is_ok());
        }
    }

    fn adjust_count(&mut self, key: &TripKey, delta: i64) {
        if let Some(trip) = self
            .trips
            .get_mut(&key.0)
            .and_then(|trips| trips.iter_mut().find(|t| t.id == key.1))
        {
            trip.places_count = if delta >= 0 {
                trip.places_count.saturating_add(1)
            } else {
                trip.places_count.saturating_sub(1)
            };
        }
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    state: Mutex<DocumentState>,
    deny_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    place_writes: AtomicUsize,
    subscriptions_opened: AtomicUsize,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent write fails with `PermissionDenied`.
    pub fn deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    /// Delays every write, for exercising save timeouts.
    pub fn set_write_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of place create/update/delete calls that reached the store.
    pub fn place_write_count(&self) -> usize {
        self.place_writes.load(Ordering::SeqCst)
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.subscriptions_opened.load(Ordering::SeqCst)
    }

    pub fn live_subscribers(&self, user: &UserId, trip: &TripId) -> usize {
        let key = (user.clone(), trip.clone());
        lock(&self.state)
            .subscribers
            .get(&key)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    pub fn places(&self, user: &UserId, trip: &TripId) -> Vec<PlaceRecord> {
        lock(&self.state).snapshot(&(user.clone(), trip.clone()))
    }

    pub fn trips(&self, user: &UserId) -> Vec<Trip> {
        lock(&self.state).trips.get(user).cloned().unwrap_or_default()
    }

    /// Inserts a document as if another client wrote it.
    pub fn seed_place(&self, user: &UserId, trip: &TripId, document: PlaceDocument) -> PlaceId {
        let key = (user.clone(), trip.clone());
        let mut state = lock(&self.state);
        let id = PlaceId::new(state.next_id("place"));
        state.places.entry(key.clone()).or_default().push(PlaceRecord {
            id: id.clone(),
            document,
        });
        state.adjust_count(&key, 1);
        state.broadcast(&key);
        id
    }

    /// Pushes an error to every live subscriber of the trip and drops them.
    pub fn fail_subscriptions(&self, user: &UserId, trip: &TripId, error: DocumentError) {
        let key = (user.clone(), trip.clone());
        let mut state = lock(&self.state);
        if let Some(senders) = state.subscribers.remove(&key) {
            for tx in senders {
                let _ = tx.unbounded_send(Err(error.clone()));
            }
        }
    }

    async fn before_write(&self, what: &str) -> Result<(), DocumentError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(DocumentError::PermissionDenied(what.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_trips(&self, user: &UserId) -> Result<Vec<Trip>, DocumentError> {
        let mut trips = self.trips(user);
        trips.reverse();
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trips)
    }

    async fn create_trip(&self, user: &UserId, trip: NewTrip) -> Result<Trip, DocumentError> {
        self.before_write("create trip").await?;
        let mut state = lock(&self.state);
        let trip = Trip {
            id: TripId::new(state.next_id("trip")),
            title: trip.title,
            start_date: trip.start_date,
            end_date: trip.end_date,
            places_count: 0,
            created_at: Utc::now(),
        };
        state.trips.entry(user.clone()).or_default().push(trip.clone());
        Ok(trip)
    }

    async fn delete_trip(&self, user: &UserId, trip: &TripId) -> Result<(), DocumentError> {
        self.before_write("delete trip").await?;
        let key = (user.clone(), trip.clone());
        let mut state = lock(&self.state);
        let trips = state.trips.entry(user.clone()).or_default();
        let before = trips.len();
        trips.retain(|t| &t.id != trip);
        if trips.len() == before {
            return Err(DocumentError::NotFound(trip.to_string()));
        }
        state.places.remove(&key);
        state.broadcast(&key);
        Ok(())
    }

    fn subscribe_places(&self, user: &UserId, trip: &TripId) -> PlaceSubscription {
        let key = (user.clone(), trip.clone());
        let (tx, rx) = mpsc::unbounded();
        let mut state = lock(&self.state);
        let _ = tx.unbounded_send(Ok(state.snapshot(&key)));
        let closer = tx.clone();
        state.subscribers.entry(key).or_default().push(tx);
        self.subscriptions_opened.fetch_add(1, Ordering::SeqCst);
        PlaceSubscription {
            snapshots: rx.boxed(),
            guard: SubscriptionGuard::new(move || closer.close_channel()),
        }
    }

    async fn create_place(
        &self,
        user: &UserId,
        trip: &TripId,
        place: PlaceDocument,
    ) -> Result<PlaceId, DocumentError> {
        self.place_writes.fetch_add(1, Ordering::SeqCst);
        self.before_write("create place").await?;
        Ok(self.seed_place(user, trip, place))
    }

    async fn update_place(
        &self,
        user: &UserId,
        trip: &TripId,
        place: &PlaceId,
        patch: PlacePatch,
    ) -> Result<(), DocumentError> {
        self.place_writes.fetch_add(1, Ordering::SeqCst);
        self.before_write("update place").await?;
        let key = (user.clone(), trip.clone());
        let mut state = lock(&self.state);
        let record = state
            .places
            .get_mut(&key)
            .and_then(|records| records.iter_mut().find(|r| &r.id == place))
            .ok_or_else(|| DocumentError::NotFound(place.to_string()))?;
        record.document.apply_patch(patch);
        state.broadcast(&key);
        Ok(())
    }

    async fn delete_place(
        &self,
        user: &UserId,
        trip: &TripId,
        place: &PlaceId,
    ) -> Result<(), DocumentError> {
        self.place_writes.fetch_add(1, Ordering::SeqCst);
        self.before_write("delete place").await?;
        let key = (user.clone(), trip.clone());
        let mut state = lock(&self.state);
        let records = state.places.entry(key.clone()).or_default();
        let before = records.len();
        records.retain(|r| &r.id != place);
        if records.len() == before {
            return Err(DocumentError::NotFound(place.to_string()));
        }
        state.adjust_count(&key, -1);
        state.broadcast(&key);
        Ok(())
    }
}

// ============================================================================
// Object storage
// ============================================================================

pub struct MemoryObjectStorage {
    base_url: String,
    objects: Mutex<BTreeMap<String, StorageObject>>,
    failing: Mutex<Vec<String>>,
    stalled: Mutex<Vec<String>>,
    puts: AtomicUsize,
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: "https://storage.traveldot.test/".into(),
            objects: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(Vec::new()),
            stalled: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
        }
    }

    /// Uploads whose path contains `needle` fail with a network error.
    pub fn fail_paths_containing(&self, needle: impl Into<String>) {
        lock(&self.failing).push(needle.into());
    }

    /// Uploads whose path contains `needle` never complete.
    pub fn stall_paths_containing(&self, needle: impl Into<String>) {
        lock(&self.stalled).push(needle.into());
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn stored_paths(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn object(&self, path: &str) -> Option<StorageObject> {
        lock(&self.objects).get(path).cloned()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(
        &self,
        object: StorageObject,
        progress: Option<ProgressFn>,
    ) -> Result<Url, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let matches = |list: &Mutex<Vec<String>>| {
            lock(list).iter().any(|needle| object.path.contains(needle.as_str()))
        };

        if matches(&self.failing) {
            return Err(StorageError::Network(format!("connection reset for {}", object.path)));
        }
        if matches(&self.stalled) {
            std::future::pending::<()>().await;
        }

        if let Some(report) = &progress {
            report(0.0);
        }
        tokio::task::yield_now().await;
        if let Some(report) = &progress {
            report(1.0);
        }

        let url = Url::parse(&format!("{}{}", self.base_url, object.path))
            .map_err(|e| StorageError::Rejected {
                status: 400,
                reason: e.to_string(),
            })?;
        lock(&self.objects).insert(object.path.clone(), object);
        Ok(url)
    }
}

// ============================================================================
// Map widget
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MarkerHandle(u64);

struct LiveMarker {
    spec: MarkerSpec,
    on_click: MarkerClick,
}

#[derive(Default)]
struct MapState {
    next: u64,
    live: HashMap<u64, LiveMarker>,
    created: usize,
    updated: usize,
    removed: usize,
    views: Vec<Viewport>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MapOpCounts {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Map widget that records native marker operations.
#[derive(Default)]
pub struct RecordingMap {
    state: Mutex<MapState>,
}

impl RecordingMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        lock(&self.state).live.len()
    }

    pub fn regular_ids(&self) -> BTreeSet<PlaceId> {
        lock(&self.state)
            .live
            .values()
            .filter_map(|m| match &m.spec.key {
                MarkerKey::Place(id) => Some(id.clone()),
                MarkerKey::Selected => None,
            })
            .collect()
    }

    pub fn selected_markers(&self) -> Vec<MarkerSpec> {
        lock(&self.state)
            .live
            .values()
            .filter(|m| m.spec.style == MarkerStyle::Selected)
            .map(|m| m.spec.clone())
            .collect()
    }

    pub fn marker(&self, key: &MarkerKey) -> Option<MarkerSpec> {
        lock(&self.state)
            .live
            .values()
            .find(|m| &m.spec.key == key)
            .map(|m| m.spec.clone())
    }

    pub fn op_counts(&self) -> MapOpCounts {
        let state = lock(&self.state);
        MapOpCounts {
            created: state.created,
            updated: state.updated,
            removed: state.removed,
        }
    }

    pub fn last_view(&self) -> Option<Viewport> {
        lock(&self.state).views.last().copied()
    }

    /// Fires the click handler of the marker with `key`. The handler runs
    /// after the internal lock is released.
    pub fn click(&self, key: &MarkerKey) -> bool {
        let handler = lock(&self.state)
            .live
            .values()
            .find(|m| &m.spec.key == key)
            .map(|m| m.on_click.clone());
        match handler {
            Some(on_click) => {
                on_click();
                true
            }
            None => false,
        }
    }
}

impl MapWidget for RecordingMap {
    type Marker = MarkerHandle;

    fn create_marker(&self, spec: &MarkerSpec, on_click: MarkerClick) -> MarkerHandle {
        let mut state = lock(&self.state);
        state.next += 1;
        let handle = state.next;
        state.live.insert(
            handle,
            LiveMarker {
                spec: spec.clone(),
                on_click,
            },
        );
        state.created += 1;
        MarkerHandle(handle)
    }

    fn update_marker(&self, marker: &mut MarkerHandle, spec: &MarkerSpec) {
        let mut state = lock(&self.state);
        if let Some(live) = state.live.get_mut(&marker.0) {
            live.spec = spec.clone();
        }
        state.updated += 1;
    }

    fn remove_marker(&self, marker: MarkerHandle) {
        let mut state = lock(&self.state);
        state.live.remove(&marker.0);
        state.removed += 1;
    }

    fn set_view(&self, viewport: Viewport) {
        lock(&self.state).views.push(viewport);
    }
}

// ============================================================================
// Auth
// ============================================================================

const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    user: AuthUser,
    password: SecretString,
}

pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, Account>>,
    current: watch::Sender<Option<AuthUser>>,
    resets: Mutex<Vec<String>>,
    next_uid: AtomicU64,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuth {
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current,
            resets: Mutex::new(Vec::new()),
            next_uid: AtomicU64::new(0),
        }
    }

    /// Registers an account without signing it in.
    pub fn with_account(self, email: &str, password: &str) -> Self {
        let user = self.new_user(email);
        lock(&self.accounts).insert(
            email.to_string(),
            Account {
                user,
                password: SecretString::new(password.to_string()),
            },
        );
        self
    }

    pub fn password_resets(&self) -> Vec<String> {
        lock(&self.resets).clone()
    }

    fn new_user(&self, email: &str) -> AuthUser {
        let n = self.next_uid.fetch_add(1, Ordering::SeqCst) + 1;
        AuthUser {
            id: UserId::new(format!("user-{n}")),
            email: email.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthUser, AuthError> {
        if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let user = {
            let mut accounts = lock(&self.accounts);
            if accounts.contains_key(email) {
                return Err(AuthError::EmailInUse);
            }
            let user = self.new_user(email);
            accounts.insert(
                email.to_string(),
                Account {
                    user: user.clone(),
                    password: password.clone(),
                },
            );
            user
        };
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<AuthUser, AuthError> {
        let user = {
            let accounts = lock(&self.accounts);
            match accounts.get(email) {
                Some(account)
                    if account.password.expose_secret() == password.expose_secret() =>
                {
                    account.user.clone()
                }
                _ => return Err(AuthError::WrongCredentials),
            }
        };
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.current.send_replace(None);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        lock(&self.resets).push(email.to_string());
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.current.subscribe()
    }
}

// ============================================================================
// Lookup and geolocation
// ============================================================================

#[derive(Default)]
pub struct StaticPlaceLookup {
    places: Vec<PlaceDetails>,
    details_calls: AtomicUsize,
}

impl StaticPlaceLookup {
    #[must_use]
    pub fn new(places: Vec<PlaceDetails>) -> Self {
        Self {
            places,
            details_calls: AtomicUsize::new(0),
        }
    }

    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PlaceLookup for StaticPlaceLookup {
    async fn autocomplete(&self, query: &str) -> Result<Vec<PlaceSuggestion>, LookupError> {
        let needle = query.to_lowercase();
        Ok(self
            .places
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .map(|p| PlaceSuggestion {
                lookup_id: p.lookup_id.clone(),
                description: match &p.formatted_address {
                    Some(address) => format!("{}, {address}", p.name),
                    None => p.name.clone(),
                },
            })
            .collect())
    }

    async fn details(&self, lookup_id: &str) -> Result<PlaceDetails, LookupError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        self.places
            .iter()
            .find(|p| p.lookup_id == lookup_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(lookup_id.to_string()))
    }
}

pub struct FixedGeolocator {
    result: Mutex<Result<Coordinates, GeolocationError>>,
}

impl FixedGeolocator {
    #[must_use]
    pub fn new(result: Result<Coordinates, GeolocationError>) -> Self {
        Self {
            result: Mutex::new(result),
        }
    }

    pub fn set(&self, result: Result<Coordinates, GeolocationError>) {
        *lock(&self.result) = result;
    }
}

impl Default for FixedGeolocator {
    fn default() -> Self {
        Self::new(Err(GeolocationError::Unavailable("no fix".into())))
    }
}

#[async_trait::async_trait]
impl Geolocator for FixedGeolocator {
    async fn current_position(&self) -> Result<Coordinates, GeolocationError> {
        lock(&self.result).clone()
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// All in-memory backends, kept concretely typed so callers can reach the
/// fault-injection knobs.
#[derive(Clone)]
pub struct MemoryBackend {
    pub documents: Arc<MemoryDocumentStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub auth: Arc<MemoryAuth>,
    pub lookup: Arc<StaticPlaceLookup>,
    pub geolocator: Arc<FixedGeolocator>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryAuth::new(), StaticPlaceLookup::default())
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new(auth: MemoryAuth, lookup: StaticPlaceLookup) -> Self {
        Self {
            documents: Arc::new(MemoryDocumentStore::new()),
            storage: Arc::new(MemoryObjectStorage::new()),
            auth: Arc::new(auth),
            lookup: Arc::new(lookup),
            geolocator: Arc::new(FixedGeolocator::default()),
        }
    }

    #[must_use]
    pub fn services(&self) -> Services {
        Services {
            documents: self.documents.clone(),
            storage: self.storage.clone(),
            auth: self.auth.clone(),
            lookup: self.lookup.clone(),
            geolocator: self.geolocator.clone(),
        }
    }
}
