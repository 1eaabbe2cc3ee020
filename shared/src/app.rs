use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capabilities::auth::AuthUser;
use crate::capabilities::map::PlaceSuggestion;
use crate::capabilities::Capabilities;
use crate::config::JournalConfig;
use crate::editor::{
    DeleteJob, Draft, DraftEdit, DraftField, Editor, EditorPhase, EditorTicket, SaveContext,
    SaveJob,
};
use crate::error::{AppError, ErrorKind, ErrorSeverity};
use crate::model::{Coordinates, LocalId, MarkerColor, Place, PlaceId, Trip, TripId, UserId};
use crate::store::{EditorLayout, EditorMode, PlaceStore, Viewport};
use crate::sync::SyncTarget;
use crate::upload::StagedFile;

const MAX_TOASTS: usize = 5;

// ============================================================================
// Toasts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToastMessage {
    pub id: u64,
    pub message: String,
    pub kind: ToastKind,
    pub created_at_ms: u64,
    pub duration_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(id: u64, message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            id,
            message: message.into(),
            kind,
            created_at_ms: crate::get_current_time_ms(),
            duration_ms: kind.default_duration_ms(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.duration_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl ToastKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            Self::Info => 3000,
            Self::Success => 2000,
            Self::Warning => 4000,
            Self::Error => 5000,
        }
    }
}

// ============================================================================
// Model
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Connecting,
    Live,
    Interrupted { message: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchState {
    pub query: String,
    pub suggestions: Vec<PlaceSuggestion>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub user: Option<AuthUser>,
    /// Newest first.
    pub trips: Vec<Trip>,
    pub current_trip: Option<TripId>,
    pub store: PlaceStore,
    pub editor: Editor,
    pub online: bool,
    pub sync: SyncStatus,
    pub search: SearchState,
    pub toasts: Vec<ToastMessage>,
    next_toast_id: u64,
}

impl Default for Model {
    fn default() -> Self {
        Self::with_config(&JournalConfig::default())
    }
}

impl Model {
    #[must_use]
    pub fn with_config(config: &JournalConfig) -> Self {
        Self {
            user: None,
            trips: Vec::new(),
            current_trip: None,
            store: PlaceStore::new(
                Viewport {
                    center: config.default_center,
                    zoom: config.default_zoom,
                },
                config.focus_zoom,
            ),
            editor: Editor::default(),
            online: true,
            sync: SyncStatus::Idle,
            search: SearchState::default(),
            toasts: Vec::new(),
            next_toast_id: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }

    pub fn current_trip(&self) -> Option<&Trip> {
        let id = self.current_trip.as_ref()?;
        self.trips.iter().find(|t| &t.id == id)
    }

    /// The (user, trip) the place subscription should be scoped to.
    pub fn sync_target(&self) -> Option<SyncTarget> {
        Some(SyncTarget::new(
            self.user_id()?.clone(),
            self.current_trip.clone()?,
        ))
    }

    pub fn save_context(&self) -> SaveContext {
        SaveContext {
            user: self.user_id().cloned(),
            trip: self.current_trip.clone(),
            online: self.online,
        }
    }

    pub fn show_toast(&mut self, message: impl Into<String>, kind: ToastKind) -> u64 {
        self.next_toast_id += 1;
        let id = self.next_toast_id;
        self.toasts.push(ToastMessage::new(id, message, kind));
        if self.toasts.len() > MAX_TOASTS {
            self.toasts.remove(0);
        }
        id
    }

    pub fn show_error(&mut self, error: &AppError) {
        match error.severity {
            ErrorSeverity::Transient => warn!(error = %error, "operation failed"),
            _ => tracing::error!(error = %error, "operation failed"),
        }
        self.show_toast(error.user_facing_message(), ToastKind::Error);
    }

    pub fn dismiss_toast(&mut self, id: u64) {
        self.toasts.retain(|t| t.id != id);
    }

    fn prune_toasts(&mut self, now_ms: u64) {
        self.toasts.retain(|t| !t.is_expired(now_ms));
    }

    /// Everything scoped to the current trip goes away.
    fn leave_trip(&mut self) {
        self.store.clear();
        self.editor.close();
        self.sync = SyncStatus::Idle;
    }

    fn enter_trip(&mut self, trip: Option<TripId>) {
        if self.current_trip == trip {
            return;
        }
        self.leave_trip();
        self.current_trip = trip;
        if self.sync_target().is_some() {
            self.sync = SyncStatus::Connecting;
        }
    }

    fn close_editor(&mut self) {
        self.editor.close();
        self.store.close_editor();
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Session
    SignedIn { user: AuthUser },
    SignedOut,
    AuthFailed { error: AppError },
    PasswordResetSent { email: String },

    // Trips
    TripsLoaded { trips: Vec<Trip> },
    TripCreated { trip: Trip },
    TripSelected { trip: TripId },
    TripDeleted { trip: TripId },

    // Sync
    SyncStarted { user: UserId, trip: TripId },
    PlacesSnapshot { user: UserId, trip: TripId, places: Vec<Place> },
    SyncInterrupted { user: UserId, trip: TripId, error: AppError },

    // Map
    NetworkChanged { online: bool },
    PlaceSelected { place: Option<Place> },
    /// Click on empty map background.
    MapClicked,
    ViewportChanged { viewport: Viewport },
    LocationFound { location: Coordinates },

    // Editor
    OpenEditor { mode: EditorMode, today: NaiveDate },
    CloseEditor,
    LayoutToggled,
    DraftEdited { edit: DraftEdit },
    PhotosStaged { files: Vec<StagedFile> },
    SaveRequested,
    SaveProgress { ticket: EditorTicket, file: LocalId, fraction: f32 },
    UploadsPartiallyFailed { ticket: EditorTicket, failed: usize },
    SaveCompleted { ticket: EditorTicket, place: Place, mode: EditorMode },
    SaveFailed { ticket: EditorTicket, error: AppError },
    DeleteRequested,
    DeleteCancelled,
    DeleteConfirmed,
    DeleteCompleted { ticket: EditorTicket, place_id: PlaceId },
    DeleteFailed { ticket: EditorTicket, error: AppError },

    // Search
    SearchChanged { query: String },
    SearchResults { query: String, suggestions: Vec<PlaceSuggestion> },

    ErrorRaised { error: AppError },
    DismissToast { id: u64 },
    TimerTick { now_ms: u64 },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SignedIn { .. } => "signed_in",
            Self::SignedOut => "signed_out",
            Self::AuthFailed { .. } => "auth_failed",
            Self::PasswordResetSent { .. } => "password_reset_sent",
            Self::TripsLoaded { .. } => "trips_loaded",
            Self::TripCreated { .. } => "trip_created",
            Self::TripSelected { .. } => "trip_selected",
            Self::TripDeleted { .. } => "trip_deleted",
            Self::SyncStarted { .. } => "sync_started",
            Self::PlacesSnapshot { .. } => "places_snapshot",
            Self::SyncInterrupted { .. } => "sync_interrupted",
            Self::NetworkChanged { .. } => "network_changed",
            Self::PlaceSelected { .. } => "place_selected",
            Self::MapClicked => "map_clicked",
            Self::ViewportChanged { .. } => "viewport_changed",
            Self::LocationFound { .. } => "location_found",
            Self::OpenEditor { .. } => "open_editor",
            Self::CloseEditor => "close_editor",
            Self::LayoutToggled => "layout_toggled",
            Self::DraftEdited { .. } => "draft_edited",
            Self::PhotosStaged { .. } => "photos_staged",
            Self::SaveRequested => "save_requested",
            Self::SaveProgress { .. } => "save_progress",
            Self::UploadsPartiallyFailed { .. } => "uploads_partially_failed",
            Self::SaveCompleted { .. } => "save_completed",
            Self::SaveFailed { .. } => "save_failed",
            Self::DeleteRequested => "delete_requested",
            Self::DeleteCancelled => "delete_cancelled",
            Self::DeleteConfirmed => "delete_confirmed",
            Self::DeleteCompleted { .. } => "delete_completed",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::SearchChanged { .. } => "search_changed",
            Self::SearchResults { .. } => "search_results",
            Self::ErrorRaised { .. } => "error_raised",
            Self::DismissToast { .. } => "dismiss_toast",
            Self::TimerTick { .. } => "timer_tick",
        }
    }
}

/// Remote work an event hands to the host.
#[must_use]
#[derive(Clone, Debug, PartialEq)]
pub enum Followup {
    None,
    Save(SaveJob),
    Delete(DeleteJob),
}

// ============================================================================
// View
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlaceView {
    pub id: Option<String>,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
    pub visited_date: Option<NaiveDate>,
    pub color: String,
    pub text: String,
    pub photos: Vec<String>,
    pub tags: Vec<String>,
}

impl From<&Place> for PlaceView {
    fn from(p: &Place) -> Self {
        Self {
            id: p.id.as_ref().map(ToString::to_string),
            name: p.name.clone(),
            lat: p.location.lat(),
            lng: p.location.lng(),
            address: p.address.clone(),
            visited_date: p.visited_date,
            color: p.color.hex().to_string(),
            text: p.content.text.clone(),
            photos: p.photo_urls(),
            tags: p.tags.as_slice().to_vec(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TripView {
    pub id: String,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub places_count: u32,
    pub is_current: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColorOption {
    pub hex: String,
    pub label: String,
    pub selected: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EditorView {
    pub mode: EditorMode,
    pub phase: EditorPhase,
    pub name: String,
    pub name_error: Option<String>,
    pub address: Option<String>,
    pub visited_date: NaiveDate,
    pub colors: Vec<ColorOption>,
    pub text: String,
    pub tags: Vec<String>,
    pub tag_input: String,
    pub photos: Vec<String>,
    /// Mean fraction over staged files while saving.
    pub upload_progress: Option<f32>,
    pub can_delete: bool,
}

impl EditorView {
    fn build(editor: &Editor, draft: &Draft) -> Self {
        let progress = editor.progress();
        let upload_progress = (editor.phase() == EditorPhase::Saving && !progress.is_empty())
            .then(|| progress.values().sum::<f32>() / progress.len() as f32);
        Self {
            mode: draft.mode,
            phase: editor.phase(),
            name: draft.name.clone(),
            name_error: draft.error(DraftField::Name).map(str::to_owned),
            address: draft.address.clone(),
            visited_date: draft.visited_date,
            colors: MarkerColor::ALL
                .into_iter()
                .map(|c| ColorOption {
                    hex: c.hex().to_string(),
                    label: c.label().to_string(),
                    selected: c == draft.color,
                })
                .collect(),
            text: draft.text.clone(),
            tags: draft.tags.as_slice().to_vec(),
            tag_input: draft.tag_input.clone(),
            photos: draft.photos().to_vec(),
            upload_progress,
            can_delete: draft.mode == EditorMode::Edit && draft.target.is_some(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToastView {
    pub id: u64,
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl From<&ToastMessage> for ToastView {
    fn from(t: &ToastMessage) -> Self {
        Self {
            id: t.id,
            message: t.message.clone(),
            kind: t.kind,
            duration_ms: t.duration_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub is_authenticated: bool,
    pub user_email: Option<String>,
    pub trips: Vec<TripView>,
    pub places: Vec<PlaceView>,
    pub selected: Option<PlaceView>,
    pub viewport: Viewport,
    pub editor: Option<EditorView>,
    pub editor_layout: EditorLayout,
    pub online: bool,
    pub sync: SyncStatus,
    pub search_query: String,
    pub suggestions: Vec<PlaceSuggestion>,
    pub toasts: Vec<ToastView>,
}

// ============================================================================
// App
// ============================================================================

#[derive(Default)]
pub struct App;

impl App {
    /// Applies `event` to the model. Any remote work the event starts is
    /// returned for the host to run.
    pub fn apply(&self, event: Event, model: &mut Model) -> Followup {
        debug!(event = event.name(), "apply");
        match event {
            Event::SignedIn { user } => {
                if model.user_id() == Some(&user.id) {
                    return Followup::None;
                }
                info!(user = %user.id, "signed in");
                model.leave_trip();
                model.trips.clear();
                model.current_trip = None;
                model.user = Some(user);
            }

            Event::SignedOut => {
                model.leave_trip();
                model.trips.clear();
                model.current_trip = None;
                model.user = None;
                model.search = SearchState::default();
            }

            Event::AuthFailed { error } => model.show_error(&error),

            Event::PasswordResetSent { email } => {
                model.show_toast(format!("Password reset email sent to {email}"), ToastKind::Info);
            }

            Event::TripsLoaded { trips } => {
                model.trips = trips;
                let keep = model
                    .current_trip
                    .as_ref()
                    .filter(|id| model.trips.iter().any(|t| &t.id == *id))
                    .cloned();
                let next = keep.or_else(|| model.trips.first().map(|t| t.id.clone()));
                model.enter_trip(next);
            }

            Event::TripCreated { trip } => {
                let id = trip.id.clone();
                if !model.trips.iter().any(|t| t.id == id) {
                    model.trips.insert(0, trip);
                }
                if model.current_trip.is_none() {
                    model.enter_trip(Some(id));
                }
            }

            Event::TripSelected { trip } => {
                if model.trips.iter().any(|t| t.id == trip) {
                    model.enter_trip(Some(trip));
                } else {
                    warn!(trip = %trip, "unknown trip selected");
                }
            }

            Event::TripDeleted { trip } => {
                model.trips.retain(|t| t.id != trip);
                if model.current_trip.as_ref() == Some(&trip) {
                    let next = model.trips.first().map(|t| t.id.clone());
                    model.enter_trip(next);
                }
            }

            Event::SyncStarted { user, trip } => {
                if model.user_id() == Some(&user) && model.current_trip.as_ref() == Some(&trip) {
                    model.sync = SyncStatus::Connecting;
                }
            }

            Event::PlacesSnapshot { user, trip, places } => {
                if model.user_id() != Some(&user) || model.current_trip.as_ref() != Some(&trip) {
                    debug!(trip = %trip, "dropping snapshot for inactive trip");
                    return Followup::None;
                }
                let count = u32::try_from(places.len()).unwrap_or(u32::MAX);
                if let Some(t) = model.trips.iter_mut().find(|t| t.id == trip) {
                    t.places_count = count;
                }
                model.store.set_places(places);
                model.sync = SyncStatus::Live;
            }

            Event::SyncInterrupted { user, trip, error } => {
                if model.user_id() != Some(&user) || model.current_trip.as_ref() != Some(&trip) {
                    return Followup::None;
                }
                model.sync = SyncStatus::Interrupted {
                    message: error.message.clone(),
                };
                model.show_toast(
                    "Live updates paused. Your places may be out of date.",
                    ToastKind::Warning,
                );
            }

            Event::NetworkChanged { online } => {
                if model.online && !online {
                    model.show_toast("No internet connection", ToastKind::Warning);
                }
                model.online = online;
            }

            Event::PlaceSelected { place } => model.store.set_selected_place(place),

            Event::MapClicked => model.store.set_selected_place(None),

            Event::ViewportChanged { viewport } => model.store.set_viewport(viewport),

            Event::LocationFound { location } => model.store.focus_on(location),

            Event::OpenEditor { mode, today } => {
                let draft = match mode {
                    EditorMode::Add => Draft::blank(
                        model.store.selected(),
                        model.store.viewport().center,
                        today,
                    ),
                    EditorMode::Edit => {
                        let target = model
                            .store
                            .selected_id()
                            .and_then(|id| model.store.find(id))
                            .or_else(|| model.store.selected().filter(|p| p.is_persisted()));
                        match target {
                            Some(place) => Draft::from_place(place, today),
                            None => {
                                model.show_error(&AppError::new(
                                    ErrorKind::Validation,
                                    "Select a saved place to edit",
                                ));
                                return Followup::None;
                            }
                        }
                    }
                };
                model.editor.open(draft);
                model.store.open_editor(mode);
            }

            Event::CloseEditor => model.close_editor(),

            Event::LayoutToggled => {
                let layout = model.store.editor_layout().toggled();
                model.store.set_editor_layout(layout);
            }

            Event::DraftEdited { edit } => match model.editor.draft_mut() {
                Some(draft) => draft.apply(edit),
                None => debug!("draft edit ignored, editor not editing"),
            },

            Event::PhotosStaged { files } => {
                if let Some(draft) = model.editor.draft_mut() {
                    draft.stage_files(files);
                }
            }

            Event::SaveRequested => {
                let ctx = model.save_context();
                match model.editor.begin_save(&ctx) {
                    Ok(job) => {
                        info!(
                            mode = ?job.mode,
                            staged = job.staged.len(),
                            existing = job.existing_photos.len(),
                            "save started"
                        );
                        return Followup::Save(job);
                    }
                    // Shown inline next to the field.
                    Err(e) if e.kind == ErrorKind::Validation => {}
                    Err(e) => model.show_error(&e),
                }
            }

            Event::SaveProgress {
                ticket,
                file,
                fraction,
            } => model.editor.record_progress(ticket, &file, fraction),

            Event::UploadsPartiallyFailed { ticket, failed } => {
                if model.editor.is_current(ticket) {
                    let noun = if failed == 1 { "photo" } else { "photos" };
                    model.show_toast(
                        format!("{failed} {noun} failed to upload; the others were saved"),
                        ToastKind::Warning,
                    );
                }
            }

            Event::SaveCompleted {
                ticket,
                place,
                mode,
            } => {
                if model.editor.finish_save(ticket, &Ok(())) {
                    model.store.close_editor();
                    model.store.set_selected_place(Some(place));
                    let message = match mode {
                        EditorMode::Add => "Place added",
                        EditorMode::Edit => "Place updated",
                    };
                    model.show_toast(message, ToastKind::Success);
                }
            }

            Event::SaveFailed { ticket, error } => {
                let result = Err(error);
                if model.editor.finish_save(ticket, &result) {
                    if let Err(error) = result {
                        model.show_error(&error);
                    }
                }
            }

            Event::DeleteRequested => {
                if let Err(e) = model.editor.request_delete() {
                    model.show_error(&e);
                }
            }

            Event::DeleteCancelled => model.editor.cancel_delete(),

            Event::DeleteConfirmed => {
                let ctx = model.save_context();
                match model.editor.begin_delete(&ctx) {
                    Ok(job) => return Followup::Delete(job),
                    Err(e) => model.show_error(&e),
                }
            }

            Event::DeleteCompleted { ticket, place_id } => {
                // The remote delete happened either way.
                model.store.delete_place(&place_id);
                if model.editor.finish_delete(ticket, &Ok(())) {
                    model.store.close_editor();
                    model.store.set_selected_place(None);
                    model.show_toast("Place deleted", ToastKind::Success);
                }
            }

            Event::DeleteFailed { ticket, error } => {
                let result = Err(error);
                if model.editor.finish_delete(ticket, &result) {
                    if let Err(error) = result {
                        model.show_error(&error);
                    }
                }
            }

            Event::SearchChanged { query } => {
                if query.trim().is_empty() {
                    model.search.suggestions.clear();
                }
                model.search.query = query;
            }

            Event::SearchResults { query, suggestions } => {
                if query == model.search.query {
                    model.search.suggestions = suggestions;
                }
            }

            Event::ErrorRaised { error } => model.show_error(&error),

            Event::DismissToast { id } => model.dismiss_toast(id),

            Event::TimerTick { now_ms } => model.prune_toasts(now_ms),
        }
        Followup::None
    }
}

fn no_host_error(operation: &str) -> AppError {
    AppError::new(ErrorKind::Internal, "")
        .with_internal(format!("{operation} needs a journal host to run remote work"))
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        // Remote work is run by `Journal`. Driven on its own the core cannot
        // upload or persist, so a started save or delete fails straight back
        // into the editor instead of sitting in a busy phase.
        match self.apply(event, model) {
            Followup::None => {}
            Followup::Save(job) => {
                warn!("save requested without a journal host");
                let error = no_host_error("save");
                let _ = self.apply(Event::SaveFailed { ticket: job.ticket, error }, model);
            }
            Followup::Delete(job) => {
                warn!("delete requested without a journal host");
                let error = no_host_error("delete");
                let _ = self.apply(Event::DeleteFailed { ticket: job.ticket, error }, model);
            }
        }
        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        let current = model.current_trip.as_ref();
        ViewModel {
            is_authenticated: model.is_authenticated(),
            user_email: model.user.as_ref().map(|u| u.email.clone()),
            trips: model
                .trips
                .iter()
                .map(|t| TripView {
                    id: t.id.to_string(),
                    title: t.title.clone(),
                    start_date: t.start_date,
                    end_date: t.end_date,
                    places_count: t.places_count,
                    is_current: Some(&t.id) == current,
                })
                .collect(),
            places: model.store.places().iter().map(PlaceView::from).collect(),
            selected: model.store.selected().map(PlaceView::from),
            viewport: model.store.viewport(),
            editor: model
                .editor
                .draft()
                .filter(|_| model.editor.is_open())
                .map(|draft| EditorView::build(&model.editor, draft)),
            editor_layout: model.store.editor_layout(),
            online: model.online,
            sync: model.sync.clone(),
            search_query: model.search.query.clone(),
            suggestions: model.search.suggestions.clone(),
            toasts: model.toasts.iter().map(ToastView::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Effect;
    use chrono::Utc;
    use crux_core::testing::AppTester;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn user() -> AuthUser {
        AuthUser {
            id: UserId::new("user-1"),
            email: "a@b.c".into(),
        }
    }

    fn trip(id: &str) -> Trip {
        Trip {
            id: TripId::new(id),
            title: id.to_uppercase(),
            start_date: today(),
            end_date: today(),
            places_count: 0,
            created_at: Utc::now(),
        }
    }

    fn place(id: &str) -> Place {
        let mut p = Place::unsaved(id, Coordinates::new(13.0, 100.0).unwrap(), None);
        p.id = Some(PlaceId::new(id));
        p
    }

    fn signed_in_with_trip() -> Model {
        let app = App;
        let mut model = Model::default();
        let _ = app.apply(Event::SignedIn { user: user() }, &mut model);
        let _ = app.apply(
            Event::TripsLoaded {
                trips: vec![trip("t1"), trip("t2")],
            },
            &mut model,
        );
        model
    }

    mod toast_tests {
        use super::*;

        #[test]
        fn test_toast_kind_duration() {
            assert_eq!(ToastKind::Info.default_duration_ms(), 3000);
            assert_eq!(ToastKind::Success.default_duration_ms(), 2000);
            assert_eq!(ToastKind::Warning.default_duration_ms(), 4000);
            assert_eq!(ToastKind::Error.default_duration_ms(), 5000);
        }

        #[test]
        fn test_toast_is_expired() {
            let toast = ToastMessage::new(1, "Test", ToastKind::Info);
            assert!(!toast.is_expired(toast.created_at_ms + 1000));
            assert!(toast.is_expired(toast.created_at_ms + 3001));
        }

        #[test]
        fn test_timer_tick_prunes_and_dismiss_removes() {
            let mut model = Model::default();
            let first = model.show_toast("one", ToastKind::Success);
            model.show_toast("two", ToastKind::Error);
            model.dismiss_toast(first);
            assert_eq!(model.toasts.len(), 1);

            let now = model.toasts[0].created_at_ms + 10_000;
            let _ = App.apply(Event::TimerTick { now_ms: now }, &mut model);
            assert!(model.toasts.is_empty());
        }

        #[test]
        fn test_toast_queue_is_bounded() {
            let mut model = Model::default();
            for i in 0..8 {
                model.show_toast(format!("t{i}"), ToastKind::Info);
            }
            assert_eq!(model.toasts.len(), MAX_TOASTS);
            assert_eq!(model.toasts[0].message, "t3");
        }
    }

    mod session_tests {
        use super::*;

        #[test]
        fn test_first_trip_becomes_current() {
            let model = signed_in_with_trip();
            assert_eq!(model.current_trip, Some(TripId::new("t1")));
            assert_eq!(model.sync, SyncStatus::Connecting);
            assert_eq!(
                model.sync_target(),
                Some(SyncTarget::new(UserId::new("user-1"), TripId::new("t1")))
            );
        }

        #[test]
        fn test_sign_out_clears_everything() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(
                Event::PlacesSnapshot {
                    user: UserId::new("user-1"),
                    trip: TripId::new("t1"),
                    places: vec![place("a")],
                },
                &mut model,
            );
            let _ = app.apply(Event::SignedOut, &mut model);
            assert!(model.store.places().is_empty());
            assert!(model.trips.is_empty());
            assert!(model.sync_target().is_none());
            assert_eq!(model.sync, SyncStatus::Idle);
        }

        #[test]
        fn test_repeated_sign_in_is_idempotent() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(Event::SignedIn { user: user() }, &mut model);
            assert_eq!(model.current_trip, Some(TripId::new("t1")));
        }

        #[test]
        fn test_deleting_current_trip_moves_to_next() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(Event::TripDeleted { trip: TripId::new("t1") }, &mut model);
            assert_eq!(model.current_trip, Some(TripId::new("t2")));
            let _ = app.apply(Event::TripDeleted { trip: TripId::new("t2") }, &mut model);
            assert_eq!(model.current_trip, None);
            assert_eq!(model.sync, SyncStatus::Idle);
        }
    }

    mod sync_tests {
        use super::*;

        #[test]
        fn test_snapshot_replaces_places_and_counts() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(
                Event::PlacesSnapshot {
                    user: UserId::new("user-1"),
                    trip: TripId::new("t1"),
                    places: vec![place("a"), place("b")],
                },
                &mut model,
            );
            assert_eq!(model.store.places().len(), 2);
            assert_eq!(model.current_trip().map(|t| t.places_count), Some(2));
            assert_eq!(model.sync, SyncStatus::Live);
        }

        #[test]
        fn test_snapshot_for_other_trip_is_dropped() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(
                Event::PlacesSnapshot {
                    user: UserId::new("user-1"),
                    trip: TripId::new("t2"),
                    places: vec![place("x")],
                },
                &mut model,
            );
            assert!(model.store.places().is_empty());
        }

        #[test]
        fn test_interruption_warns() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(
                Event::SyncInterrupted {
                    user: UserId::new("user-1"),
                    trip: TripId::new("t1"),
                    error: AppError::new(ErrorKind::Network, "dropped"),
                },
                &mut model,
            );
            assert!(matches!(model.sync, SyncStatus::Interrupted { .. }));
            assert_eq!(model.toasts.last().map(|t| t.kind), Some(ToastKind::Warning));
        }
    }

    mod editor_tests {
        use super::*;

        #[test]
        fn test_blank_name_never_starts_a_save() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(Event::OpenEditor { mode: EditorMode::Add, today: today() }, &mut model);
            let followup = app.apply(Event::SaveRequested, &mut model);
            assert_eq!(followup, Followup::None);
            let view = app_view(&model);
            assert_eq!(
                view.editor.and_then(|e| e.name_error),
                Some(crate::editor::NAME_REQUIRED.to_string())
            );
            assert!(model.toasts.is_empty());
        }

        #[test]
        fn test_offline_save_is_refused_with_toast() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(Event::NetworkChanged { online: false }, &mut model);
            let _ = app.apply(Event::OpenEditor { mode: EditorMode::Add, today: today() }, &mut model);
            let _ = app.apply(
                Event::DraftEdited { edit: DraftEdit::Name("Café X".into()) },
                &mut model,
            );
            assert_eq!(app.apply(Event::SaveRequested, &mut model), Followup::None);
            assert_eq!(model.toasts.last().map(|t| t.kind), Some(ToastKind::Error));
            assert_eq!(model.editor.phase(), EditorPhase::Editing);
        }

        #[test]
        fn test_edit_without_selection_is_rejected() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(Event::OpenEditor { mode: EditorMode::Edit, today: today() }, &mut model);
            assert!(!model.editor.is_open());
            assert!(!model.store.editor_open());
        }

        #[test]
        fn test_save_completion_selects_and_closes() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(Event::OpenEditor { mode: EditorMode::Add, today: today() }, &mut model);
            let _ = app.apply(Event::DraftEdited { edit: DraftEdit::Name("Pier".into()) }, &mut model);
            let Followup::Save(job) = app.apply(Event::SaveRequested, &mut model) else {
                panic!("expected a save job");
            };

            let saved = place("p-new");
            let _ = app.apply(
                Event::SaveCompleted {
                    ticket: job.ticket,
                    place: saved.clone(),
                    mode: EditorMode::Add,
                },
                &mut model,
            );
            assert!(!model.editor.is_open());
            assert!(!model.store.editor_open());
            assert_eq!(model.store.selected(), Some(&saved));
            assert_eq!(model.toasts.last().map(|t| t.message.as_str()), Some("Place added"));
        }

        #[test]
        fn test_late_save_after_close_is_discarded() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(Event::OpenEditor { mode: EditorMode::Add, today: today() }, &mut model);
            let _ = app.apply(Event::DraftEdited { edit: DraftEdit::Name("Pier".into()) }, &mut model);
            let Followup::Save(job) = app.apply(Event::SaveRequested, &mut model) else {
                panic!("expected a save job");
            };
            let _ = app.apply(Event::CloseEditor, &mut model);
            let _ = app.apply(
                Event::SaveFailed {
                    ticket: job.ticket,
                    error: AppError::new(ErrorKind::SaveTimeout, "slow"),
                },
                &mut model,
            );
            assert!(model.toasts.is_empty());
        }

        #[test]
        fn test_delete_flow() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(
                Event::PlacesSnapshot {
                    user: UserId::new("user-1"),
                    trip: TripId::new("t1"),
                    places: vec![place("a"), place("b")],
                },
                &mut model,
            );
            let _ = app.apply(Event::PlaceSelected { place: Some(place("a")) }, &mut model);
            let _ = app.apply(Event::OpenEditor { mode: EditorMode::Edit, today: today() }, &mut model);
            let _ = app.apply(Event::DeleteRequested, &mut model);
            let Followup::Delete(job) = app.apply(Event::DeleteConfirmed, &mut model) else {
                panic!("expected a delete job");
            };
            assert_eq!(job.place_id, PlaceId::new("a"));

            let _ = app.apply(
                Event::DeleteCompleted {
                    ticket: job.ticket,
                    place_id: job.place_id,
                },
                &mut model,
            );
            assert!(model.store.selected().is_none());
            assert_eq!(model.store.places().len(), 1);
            assert!(!model.editor.is_open());
        }

        #[test]
        fn test_delete_completion_clears_any_selection() {
            let app = App;
            let mut model = signed_in_with_trip();
            let _ = app.apply(
                Event::PlacesSnapshot {
                    user: UserId::new("user-1"),
                    trip: TripId::new("t1"),
                    places: vec![place("a"), place("b")],
                },
                &mut model,
            );
            let _ = app.apply(Event::PlaceSelected { place: Some(place("a")) }, &mut model);
            let _ = app.apply(Event::OpenEditor { mode: EditorMode::Edit, today: today() }, &mut model);
            let _ = app.apply(Event::DeleteRequested, &mut model);
            let Followup::Delete(job) = app.apply(Event::DeleteConfirmed, &mut model) else {
                panic!("expected a delete job");
            };
            // Selection moves on while the delete is in flight.
            let _ = app.apply(Event::PlaceSelected { place: Some(place("b")) }, &mut model);

            let _ = app.apply(
                Event::DeleteCompleted {
                    ticket: job.ticket,
                    place_id: job.place_id,
                },
                &mut model,
            );
            assert!(model.store.selected().is_none());
            assert_eq!(model.store.places().len(), 1);
        }
    }

    fn app_view(model: &Model) -> ViewModel {
        crux_core::App::view(&App, model)
    }

    #[test]
    fn test_update_renders() {
        let app = AppTester::<App, Effect>::default();
        let mut model = Model::default();

        let update = app.update(Event::SignedIn { user: user() }, &mut model);
        assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
        assert!(model.is_authenticated());

        let update = app.update(Event::LayoutToggled, &mut model);
        assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
        assert_eq!(app_view(&model).editor_layout, EditorLayout::Panel);
    }

    #[test]
    fn test_update_without_host_fails_save_and_delete_back_to_editing() {
        let app = AppTester::<App, Effect>::default();
        let mut model = signed_in_with_trip();

        let _ = app.update(Event::OpenEditor { mode: EditorMode::Add, today: today() }, &mut model);
        let _ = app.update(Event::DraftEdited { edit: DraftEdit::Name("Pier".into()) }, &mut model);
        let update = app.update(Event::SaveRequested, &mut model);
        assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
        assert_eq!(model.editor.phase(), EditorPhase::Editing);
        assert!(model.editor.is_open());
        assert_eq!(model.toasts.last().map(|t| t.kind), Some(ToastKind::Error));

        let mut model = signed_in_with_trip();
        let _ = app.update(
            Event::PlacesSnapshot {
                user: UserId::new("user-1"),
                trip: TripId::new("t1"),
                places: vec![place("a")],
            },
            &mut model,
        );
        let _ = app.update(Event::PlaceSelected { place: Some(place("a")) }, &mut model);
        let _ = app.update(Event::OpenEditor { mode: EditorMode::Edit, today: today() }, &mut model);
        let _ = app.update(Event::DeleteRequested, &mut model);
        let _ = app.update(Event::DeleteConfirmed, &mut model);
        assert_eq!(model.editor.phase(), EditorPhase::Editing);
        assert_eq!(model.store.places().len(), 1);
        assert_eq!(model.toasts.last().map(|t| t.kind), Some(ToastKind::Error));
    }

    #[test]
    fn test_view_lists_palette_for_open_editor() {
        let app = App;
        let mut model = signed_in_with_trip();
        let _ = app.apply(Event::OpenEditor { mode: EditorMode::Add, today: today() }, &mut model);
        let _ = app.apply(
            Event::DraftEdited { edit: DraftEdit::Color(MarkerColor::Green) },
            &mut model,
        );
        let editor = app_view(&model).editor.unwrap();
        assert_eq!(editor.colors.len(), 6);
        let selected: Vec<_> = editor.colors.iter().filter(|c| c.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].hex, "#10B981");
        assert!(!editor.can_delete);
    }
}
