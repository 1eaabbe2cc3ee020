//! Async host around the [`App`] reducer.
//!
//! The reducer is pure; everything that talks to the outside world lives
//! here. A [`Journal`] owns the model behind a mutex, applies events to it,
//! runs the remote work an event hands back, and after every event brings
//! the map markers and the place subscription in line with the new state.
//!
//! Must be driven from inside a tokio runtime: the place subscription and
//! the auth follower are spawned tasks.

use chrono::{DateTime, Local, NaiveDate, Utc};
use futures::future::join_all;
use lru::LruCache;
use secrecy::SecretString;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::app::{App, Event, Followup, Model, ViewModel};
use crate::capabilities::{
    AuthUser, DocumentError, MapWidget, MarkerClick, PlaceDetails, PlaceSuggestion, ProgressFn,
    Services,
};
use crate::config::{ConfigError, JournalConfig};
use crate::editor::{aggregate_uploads, DeleteJob, DraftEdit, EditorTicket, SaveJob};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::lock;
use crate::markers::{MarkerReconciler, ReconcileStats};
use crate::model::{NewTrip, Place, PlaceId, Trip, TripId};
use crate::store::{EditorMode, Viewport};
use crate::sync::{RemoteSyncBridge, SnapshotSink, SyncTarget};
use crate::upload::{validate_staged, PhotoUploader, StagedFile, UploadError};

/// How a call to [`Journal::save`] ended.
#[derive(Clone, Debug, PartialEq)]
pub enum SaveOutcome {
    Saved { place: Place, failed_uploads: usize },
    /// Refused before any remote work: blank name, no trip, or offline.
    /// The reason is already in the view.
    Rejected,
    Failed(AppError),
    /// The editor was closed or reopened while the save was in flight.
    Abandoned,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeleteOutcome {
    Deleted(PlaceId),
    Rejected,
    Failed(AppError),
}

struct MapSurface<W: MapWidget> {
    markers: MarkerReconciler<W>,
    last_view: Option<Viewport>,
}

struct Inner<W: MapWidget + 'static> {
    app: App,
    config: JournalConfig,
    services: Services,
    uploader: PhotoUploader,
    model: Mutex<Model>,
    map: Mutex<MapSurface<W>>,
    sync: Mutex<RemoteSyncBridge>,
    lookups: Mutex<LruCache<String, PlaceDetails>>,
    auth_follower: Mutex<Option<JoinHandle<()>>>,
    unmounted: AtomicBool,
    this: Weak<Inner<W>>,
}

/// Cheap to clone; clones share one model.
pub struct Journal<W: MapWidget + 'static> {
    inner: Arc<Inner<W>>,
}

impl<W: MapWidget + 'static> Clone for Journal<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl<W: MapWidget + 'static> Journal<W> {
    pub fn new(config: JournalConfig, services: Services, widget: Arc<W>) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache_size = NonZeroUsize::new(config.lookup_cache_size).unwrap_or(NonZeroUsize::MIN);
        let inner = Arc::new_cyclic(|this| Inner {
            app: App,
            uploader: PhotoUploader::new(Arc::clone(&services.storage), &config),
            model: Mutex::new(Model::with_config(&config)),
            map: Mutex::new(MapSurface {
                markers: MarkerReconciler::new(widget),
                last_view: None,
            }),
            sync: Mutex::new(RemoteSyncBridge::new(Arc::clone(&services.documents))),
            lookups: Mutex::new(LruCache::new(cache_size)),
            auth_follower: Mutex::new(None),
            unmounted: AtomicBool::new(false),
            this: this.clone(),
            config,
            services,
        });
        info!("journal mounted");
        let journal = Self { inner };
        journal.inner.render();
        Ok(journal)
    }

    pub fn config(&self) -> &JournalConfig {
        &self.inner.config
    }

    pub fn view(&self) -> ViewModel {
        let model = lock(&self.inner.model);
        crux_core::App::view(&self.inner.app, &model)
    }

    /// Read access to the model, e.g. for assertions.
    pub fn with_model<R>(&self, f: impl FnOnce(&Model) -> R) -> R {
        f(&lock(&self.inner.model))
    }

    /// Applies one event. Remote work it starts is returned, not run.
    pub fn dispatch(&self, event: Event) -> Followup {
        self.inner.dispatch(event)
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Picks up a session the auth provider already holds.
    pub async fn restore_session(&self) -> AppResult<()> {
        match self.inner.services.auth.current_user() {
            Some(user) => self.inner.on_user_changed(Some(user)).await,
            None => Ok(()),
        }
    }

    /// Follows the provider's current-user notifications until unmount.
    pub fn follow_auth(&self) {
        let mut changes = self.inner.services.auth.watch();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let user = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else { break };
                if let Err(e) = inner.on_user_changed(user).await {
                    debug!(error = %e, "auth change handling failed");
                }
            }
        });
        if let Some(previous) = lock(&self.inner.auth_follower).replace(task) {
            previous.abort();
        }
    }

    #[instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &SecretString) -> AppResult<AuthUser> {
        let result = self.inner.services.auth.sign_up(email, password).await;
        self.inner.finish_auth(result).await
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &SecretString) -> AppResult<AuthUser> {
        let result = self.inner.services.auth.sign_in(email, password).await;
        self.inner.finish_auth(result).await
    }

    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> AppResult<()> {
        if let Err(e) = self.inner.services.auth.sign_out().await {
            let error = AppError::from(e);
            self.inner.dispatch(Event::AuthFailed { error: error.clone() });
            return Err(error);
        }
        self.inner.dispatch(Event::SignedOut);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn send_password_reset(&self, email: &str) -> AppResult<()> {
        match self.inner.services.auth.send_password_reset(email).await {
            Ok(()) => {
                self.inner.dispatch(Event::PasswordResetSent {
                    email: email.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                let error = AppError::from(e);
                self.inner.dispatch(Event::AuthFailed { error: error.clone() });
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Trips
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn create_trip(
        &self,
        title: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> AppResult<Trip> {
        let user = self.inner.require_user()?;
        let new_trip = NewTrip {
            title: title.trim().to_string(),
            start_date,
            end_date,
        };
        let trip = self
            .inner
            .report(self.inner.services.documents.create_trip(&user, new_trip).await)?;
        self.inner.dispatch(Event::TripCreated { trip: trip.clone() });
        Ok(trip)
    }

    pub fn switch_trip(&self, trip: &TripId) {
        self.inner.dispatch(Event::TripSelected { trip: trip.clone() });
    }

    #[instrument(skip(self))]
    pub async fn delete_trip(&self, trip: &TripId) -> AppResult<()> {
        let user = self.inner.require_user()?;
        self.inner
            .report(self.inner.services.documents.delete_trip(&user, trip).await)?;
        self.inner.dispatch(Event::TripDeleted { trip: trip.clone() });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Map
    // ------------------------------------------------------------------

    pub fn set_online(&self, online: bool) {
        self.inner.dispatch(Event::NetworkChanged { online });
    }

    pub fn select_place(&self, place: Option<Place>) {
        self.inner.dispatch(Event::PlaceSelected { place });
    }

    /// Marker click path.
    pub fn select_place_by_id(&self, id: &PlaceId) {
        self.inner.select_place_by_id(id);
    }

    pub fn map_clicked(&self) {
        self.inner.dispatch(Event::MapClicked);
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.inner.dispatch(Event::ViewportChanged { viewport });
    }

    pub fn toggle_layout(&self) {
        self.inner.dispatch(Event::LayoutToggled);
    }

    /// A click on a map point of interest resolves like a chosen suggestion.
    pub async fn click_poi(&self, lookup_id: &str) -> AppResult<Place> {
        self.choose_suggestion(lookup_id).await
    }

    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> AppResult<Vec<PlaceSuggestion>> {
        self.inner.dispatch(Event::SearchChanged {
            query: query.to_string(),
        });
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let suggestions = self
            .inner
            .report(self.inner.services.lookup.autocomplete(query.trim()).await)?;
        self.inner.dispatch(Event::SearchResults {
            query: query.to_string(),
            suggestions: suggestions.clone(),
        });
        Ok(suggestions)
    }

    /// Resolves a suggestion into an unsaved place and selects it.
    #[instrument(skip(self))]
    pub async fn choose_suggestion(&self, lookup_id: &str) -> AppResult<Place> {
        let cached = lock(&self.inner.lookups).get(lookup_id).cloned();
        let details = match cached {
            Some(details) => details,
            None => {
                let details = self
                    .inner
                    .report(self.inner.services.lookup.details(lookup_id).await)?;
                lock(&self.inner.lookups).put(lookup_id.to_string(), details.clone());
                details
            }
        };
        let place = Place::unsaved(details.name, details.location, details.formatted_address);
        self.inner.dispatch(Event::SearchChanged {
            query: String::new(),
        });
        self.inner.dispatch(Event::PlaceSelected {
            place: Some(place.clone()),
        });
        Ok(place)
    }

    #[instrument(skip(self))]
    pub async fn locate_me(&self) -> AppResult<()> {
        match self.inner.services.geolocator.current_position().await {
            Ok(location) => {
                self.inner.dispatch(Event::LocationFound { location });
                Ok(())
            }
            Err(e) => {
                let error = AppError::from(e);
                self.inner.dispatch(Event::ErrorRaised { error: error.clone() });
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Editor
    // ------------------------------------------------------------------

    pub fn open_editor(&self, mode: EditorMode) {
        self.inner.dispatch(Event::OpenEditor {
            mode,
            today: today(),
        });
    }

    pub fn close_editor(&self) {
        self.inner.dispatch(Event::CloseEditor);
    }

    pub fn edit_draft(&self, edit: DraftEdit) {
        self.inner.dispatch(Event::DraftEdited { edit });
    }

    pub fn stage_photos(&self, files: Vec<StagedFile>) {
        self.inner.dispatch(Event::PhotosStaged { files });
    }

    pub fn remove_photo(&self, index: usize) {
        self.edit_draft(DraftEdit::RemovePhoto(index));
    }

    /// Uploads staged photos concurrently, then writes the place. Individual
    /// upload failures are tolerated as long as one upload succeeds.
    #[instrument(skip(self))]
    pub async fn save(&self) -> SaveOutcome {
        let Followup::Save(job) = self.inner.dispatch(Event::SaveRequested) else {
            return SaveOutcome::Rejected;
        };
        self.inner.run_save(job).await
    }

    pub fn request_delete(&self) {
        self.inner.dispatch(Event::DeleteRequested);
    }

    pub fn cancel_delete(&self) {
        self.inner.dispatch(Event::DeleteCancelled);
    }

    #[instrument(skip(self))]
    pub async fn confirm_delete(&self) -> DeleteOutcome {
        let Followup::Delete(job) = self.inner.dispatch(Event::DeleteConfirmed) else {
            return DeleteOutcome::Rejected;
        };
        self.inner.run_delete(job).await
    }

    // ------------------------------------------------------------------
    // Misc
    // ------------------------------------------------------------------

    /// Reopens the place subscription after an interruption.
    pub fn resync(&self) -> bool {
        let Some(target) = lock(&self.inner.model).sync_target() else {
            return false;
        };
        self.inner.dispatch(Event::SyncStarted {
            user: target.user,
            trip: target.trip,
        });
        let sink = self.inner.sink();
        lock(&self.inner.sync).resync(sink)
    }

    pub fn dismiss_toast(&self, id: u64) {
        self.inner.dispatch(Event::DismissToast { id });
    }

    pub fn tick(&self) {
        self.inner.dispatch(Event::TimerTick {
            now_ms: crate::get_current_time_ms(),
        });
    }

    /// Tears down every native marker and the live subscription.
    pub fn unmount(&self) {
        self.inner.unmounted.store(true, Ordering::SeqCst);
        lock(&self.inner.sync).stop();
        lock(&self.inner.map).markers.clear();
        if let Some(task) = lock(&self.inner.auth_follower).take() {
            task.abort();
        }
        info!("journal unmounted");
    }
}

impl<W: MapWidget + 'static> Inner<W> {
    fn dispatch(&self, event: Event) -> Followup {
        self.dispatch_if(event, |_| true).unwrap_or(Followup::None)
    }

    /// Applies `event` only if `guard` holds. The guard runs under the same
    /// model lock as the update. `None` means the guard refused.
    fn dispatch_if(&self, event: Event, guard: impl FnOnce(&Model) -> bool) -> Option<Followup> {
        let (followup, target) = {
            let mut model = lock(&self.model);
            if !guard(&model) {
                return None;
            }
            let followup = self.app.apply(event, &mut model);
            (followup, model.sync_target())
        };
        self.follow_target(target);
        self.render();
        Some(followup)
    }

    fn follow_target(&self, target: Option<SyncTarget>) {
        if self.unmounted.load(Ordering::SeqCst) {
            return;
        }
        let mut bridge = lock(&self.sync);
        if bridge.current() != target.as_ref() {
            bridge.retarget(target, self.sink());
        }
    }

    /// The map lock is held while the model is read so concurrent renders
    /// cannot apply an older state over a newer one.
    fn render(&self) -> ReconcileStats {
        if self.unmounted.load(Ordering::SeqCst) {
            return ReconcileStats::default();
        }
        let mut map = lock(&self.map);
        let (places, selected, viewport) = {
            let model = lock(&self.model);
            (
                model.store.places().to_vec(),
                model.store.selected().cloned(),
                model.store.viewport(),
            )
        };

        if map.last_view != Some(viewport) {
            map.markers.widget().set_view(viewport);
            map.last_view = Some(viewport);
        }

        let weak = self.this.clone();
        map.markers.reconcile(&places, selected.as_ref(), move |id| {
            let weak = weak.clone();
            let click: MarkerClick = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.select_place_by_id(&id);
                }
            });
            click
        })
    }

    fn sink(&self) -> Arc<dyn SnapshotSink> {
        Arc::new(SnapshotForwarder {
            inner: self.this.clone(),
        })
    }

    fn select_place_by_id(&self, id: &PlaceId) {
        let place = lock(&self.model).store.find(id).cloned();
        match place {
            Some(place) => {
                self.dispatch(Event::PlaceSelected { place: Some(place) });
            }
            None => debug!(place = %id, "click on a place that is gone"),
        }
    }

    fn require_user(&self) -> AppResult<crate::model::UserId> {
        lock(&self.model)
            .user_id()
            .cloned()
            .ok_or_else(|| AppError::new(ErrorKind::MissingContext, "Sign in first"))
    }

    /// Surfaces a failed remote call as a toast and hands it back.
    fn report<T, E: Into<AppError>>(&self, result: Result<T, E>) -> AppResult<T> {
        result.map_err(|e| {
            let error = e.into();
            self.dispatch(Event::ErrorRaised {
                error: error.clone(),
            });
            error
        })
    }

    async fn finish_auth(
        &self,
        result: Result<AuthUser, crate::capabilities::AuthError>,
    ) -> AppResult<AuthUser> {
        match result {
            Ok(user) => {
                self.on_user_changed(Some(user.clone())).await?;
                Ok(user)
            }
            Err(e) => {
                let error = AppError::from(e);
                self.dispatch(Event::AuthFailed {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Repeated notifications for the same user are no-ops.
    async fn on_user_changed(&self, user: Option<AuthUser>) -> AppResult<()> {
        let Some(user) = user else {
            let _ = self.dispatch_if(Event::SignedOut, Model::is_authenticated);
            return Ok(());
        };
        // Sign-in and the auth follower both land here; only one of them
        // may adopt the user and bootstrap its trips.
        let id = user.id.clone();
        if self
            .dispatch_if(Event::SignedIn { user }, |m| m.user_id() != Some(&id))
            .is_none()
        {
            return Ok(());
        }
        self.bootstrap_trips().await
    }

    /// Loads the user's trips. A user without any gets the default trip.
    #[instrument(skip(self))]
    async fn bootstrap_trips(&self) -> AppResult<()> {
        let user = self.require_user()?;
        let documents = &self.services.documents;
        let mut trips = self.report(documents.list_trips(&user).await)?;
        if trips.is_empty() {
            info!(user = %user, "no trips yet, creating the default trip");
            let trip = self.report(
                documents
                    .create_trip(&user, NewTrip::single_day(&self.config.default_trip_title, today()))
                    .await,
            )?;
            trips.push(trip);
        }
        if lock(&self.model).user_id() != Some(&user) {
            debug!(user = %user, "user changed while loading trips");
            return Ok(());
        }
        self.dispatch(Event::TripsLoaded { trips });
        Ok(())
    }

    fn is_current(&self, ticket: EditorTicket) -> bool {
        lock(&self.model).editor.is_current(ticket)
    }

    async fn upload_one(&self, job: &SaveJob, file: &StagedFile) -> AppResult<String> {
        validate_staged(&self.config, file)?;
        let progress: ProgressFn = {
            let weak = self.this.clone();
            let ticket = job.ticket;
            let id = file.id.clone();
            Arc::new(move |fraction| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(Event::SaveProgress {
                        ticket,
                        file: id.clone(),
                        fraction,
                    });
                }
            })
        };
        let upload = self
            .uploader
            .upload(&job.user, &job.trip, file, Some(progress));
        match tokio::time::timeout(self.config.upload_timeout(), upload).await {
            Ok(Ok(url)) => Ok(url.to_string()),
            Ok(Err(e)) => {
                warn!(file = %file.id, error = %e, "photo upload failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(file = %file.id, "photo upload timed out");
                Err(UploadError::TimedOut {
                    after_ms: self.config.upload_timeout_ms,
                }
                .into())
            }
        }
    }

    async fn persist(
        &self,
        job: &SaveJob,
        uploaded: &[String],
        now: DateTime<Utc>,
    ) -> Result<PlaceId, DocumentError> {
        let documents = &self.services.documents;
        match (job.mode, &job.target) {
            (EditorMode::Edit, Some(id)) => {
                documents
                    .update_place(&job.user, &job.trip, id, job.to_patch(uploaded, now))
                    .await?;
                Ok(id.clone())
            }
            _ => {
                documents
                    .create_place(&job.user, &job.trip, job.to_document(uploaded, now))
                    .await
            }
        }
    }

    async fn run_save(&self, job: SaveJob) -> SaveOutcome {
        let ticket = job.ticket;
        let results = join_all(job.staged.iter().map(|file| self.upload_one(&job, file))).await;

        let summary = match aggregate_uploads(results) {
            Ok(summary) => summary,
            Err(error) => {
                self.dispatch(Event::SaveFailed {
                    ticket,
                    error: error.clone(),
                });
                return SaveOutcome::Failed(error);
            }
        };

        // Closing the editor mid-upload abandons the save.
        if !self.is_current(ticket) {
            info!("editor closed during upload, not persisting");
            return SaveOutcome::Abandoned;
        }

        let failed_uploads = summary.failed_count();
        if failed_uploads > 0 {
            self.dispatch(Event::UploadsPartiallyFailed {
                ticket,
                failed: failed_uploads,
            });
        }

        let now = Utc::now();
        let written = tokio::time::timeout(
            self.config.save_timeout(),
            self.persist(&job, &summary.uploaded, now),
        )
        .await;
        let result = match written {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(AppError::from(e)),
            Err(_) => Err(AppError::new(ErrorKind::SaveTimeout, "Saving took too long")
                .with_context("timeout_ms", self.config.save_timeout_ms.to_string())),
        };

        match result {
            Ok(id) => {
                let place = job.saved_place(id, &summary.uploaded, now);
                info!(place = ?place.id, photos = place.content.media.len(), "place saved");
                self.dispatch(Event::SaveCompleted {
                    ticket,
                    place: place.clone(),
                    mode: job.mode,
                });
                SaveOutcome::Saved {
                    place,
                    failed_uploads,
                }
            }
            Err(error) => {
                self.dispatch(Event::SaveFailed {
                    ticket,
                    error: error.clone(),
                });
                SaveOutcome::Failed(error)
            }
        }
    }

    async fn run_delete(&self, job: DeleteJob) -> DeleteOutcome {
        let deleted = tokio::time::timeout(
            self.config.save_timeout(),
            self.services
                .documents
                .delete_place(&job.user, &job.trip, &job.place_id),
        )
        .await;
        let result = match deleted {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::from(e)),
            Err(_) => Err(AppError::new(ErrorKind::SaveTimeout, "Deleting took too long")),
        };
        match result {
            Ok(()) => {
                info!(place = %job.place_id, "place deleted");
                self.dispatch(Event::DeleteCompleted {
                    ticket: job.ticket,
                    place_id: job.place_id.clone(),
                });
                DeleteOutcome::Deleted(job.place_id)
            }
            Err(error) => {
                self.dispatch(Event::DeleteFailed {
                    ticket: job.ticket,
                    error: error.clone(),
                });
                DeleteOutcome::Failed(error)
            }
        }
    }
}

struct SnapshotForwarder<W: MapWidget + 'static> {
    inner: Weak<Inner<W>>,
}

impl<W: MapWidget + 'static> SnapshotSink for SnapshotForwarder<W> {
    fn snapshot(&self, target: &SyncTarget, places: Vec<Place>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.dispatch(Event::PlacesSnapshot {
                user: target.user.clone(),
                trip: target.trip.clone(),
                places,
            });
        }
    }

    fn interrupted(&self, target: &SyncTarget, error: DocumentError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.dispatch(Event::SyncInterrupted {
                user: target.user.clone(),
                trip: target.trip.clone(),
                error: error.into(),
            });
        }
    }
}
