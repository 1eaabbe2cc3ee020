//! In-memory place state for the open trip.
//!
//! Only the sync bridge replaces `places` wholesale; the optimistic
//! [`PlaceStore::delete_place`] is the one local mutation, and the next
//! snapshot overwrites it either way.

use serde::{Deserialize, Serialize};

use crate::model::{Coordinates, Place, PlaceId};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorMode {
    #[default]
    Add,
    Edit,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorLayout {
    #[default]
    Popup,
    Panel,
}

impl EditorLayout {
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Popup => Self::Panel,
            Self::Panel => Self::Popup,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: Coordinates,
    pub zoom: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaceStore {
    places: Vec<Place>,
    selected: Option<Place>,
    viewport: Viewport,
    focus_zoom: f64,
    editor_open: bool,
    editor_mode: EditorMode,
    editor_layout: EditorLayout,
}

impl PlaceStore {
    #[must_use]
    pub fn new(viewport: Viewport, focus_zoom: f64) -> Self {
        Self {
            places: Vec::new(),
            selected: None,
            viewport,
            focus_zoom,
            editor_open: false,
            editor_mode: EditorMode::Add,
            editor_layout: EditorLayout::Popup,
        }
    }

    #[must_use]
    pub fn places(&self) -> &[Place] {
        &self.places
    }

    #[must_use]
    pub fn selected(&self) -> Option<&Place> {
        self.selected.as_ref()
    }

    #[must_use]
    pub fn selected_id(&self) -> Option<&PlaceId> {
        self.selected.as_ref().and_then(|p| p.id.as_ref())
    }

    #[must_use]
    pub fn find(&self, id: &PlaceId) -> Option<&Place> {
        self.places.iter().find(|p| p.id.as_ref() == Some(id))
    }

    #[must_use]
    pub fn contains(&self, id: &PlaceId) -> bool {
        self.find(id).is_some()
    }

    #[must_use]
    pub const fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[must_use]
    pub const fn editor_open(&self) -> bool {
        self.editor_open
    }

    #[must_use]
    pub const fn editor_mode(&self) -> EditorMode {
        self.editor_mode
    }

    #[must_use]
    pub const fn editor_layout(&self) -> EditorLayout {
        self.editor_layout
    }

    /// Total replace. A selected place that reappears in the new list is
    /// refreshed so its marker tracks remote edits.
    pub fn set_places(&mut self, places: Vec<Place>) {
        if let Some(id) = self.selected_id().cloned() {
            if let Some(fresh) = places.iter().find(|p| p.id.as_ref() == Some(&id)) {
                self.selected = Some(fresh.clone());
            }
        }
        self.places = places;
    }

    /// Selecting a place moves the viewport onto it. Selecting `None` only
    /// clears the preview; the editor is untouched either way.
    pub fn set_selected_place(&mut self, place: Option<Place>) {
        if let Some(p) = &place {
            self.viewport = Viewport {
                center: p.location,
                zoom: self.viewport.zoom.max(self.focus_zoom),
            };
        }
        self.selected = place;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn focus_on(&mut self, center: Coordinates) {
        self.viewport = Viewport {
            center,
            zoom: self.viewport.zoom.max(self.focus_zoom),
        };
    }

    pub fn open_editor(&mut self, mode: EditorMode) {
        self.editor_open = true;
        self.editor_mode = mode;
    }

    pub fn close_editor(&mut self) {
        self.editor_open = false;
    }

    pub fn set_editor_layout(&mut self, layout: EditorLayout) {
        self.editor_layout = layout;
    }

    /// Optimistic local removal ahead of the confirming snapshot.
    pub fn delete_place(&mut self, id: &PlaceId) {
        self.places.retain(|p| p.id.as_ref() != Some(id));
        if self.selected_id() == Some(id) {
            self.selected = None;
        }
    }

    /// Drops everything tied to the current trip.
    pub fn clear(&mut self) {
        self.places.clear();
        self.selected = None;
        self.editor_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(lat: f64, lng: f64) -> Coordinates {
        Coordinates::new(lat, lng).unwrap()
    }

    fn place(id: &str, lat: f64) -> Place {
        let mut p = Place::unsaved(id.to_uppercase(), coords(lat, 100.0), None);
        p.id = Some(PlaceId::new(id));
        p
    }

    fn store() -> PlaceStore {
        PlaceStore::new(
            Viewport {
                center: coords(13.7563, 100.5018),
                zoom: 12.0,
            },
            15.0,
        )
    }

    #[test]
    fn test_set_places_replaces() {
        let mut s = store();
        s.set_places(vec![place("a", 1.0), place("b", 2.0)]);
        s.set_places(vec![place("c", 3.0)]);
        let ids: Vec<_> = s.places().iter().filter_map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![PlaceId::new("c")]);
    }

    #[test]
    fn test_selection_follows_viewport() {
        let mut s = store();
        s.set_selected_place(Some(place("a", 10.0)));
        assert_eq!(s.viewport().center.lat(), 10.0);
        assert_eq!(s.viewport().zoom, 15.0);

        s.set_viewport(Viewport {
            center: coords(0.0, 0.0),
            zoom: 18.0,
        });
        s.set_selected_place(Some(place("b", 20.0)));
        // Never zooms back out.
        assert_eq!(s.viewport().zoom, 18.0);
    }

    #[test]
    fn test_select_none_keeps_editor_state() {
        let mut s = store();
        s.open_editor(EditorMode::Add);
        s.set_selected_place(None);
        assert!(s.editor_open());
        assert!(s.selected().is_none());
    }

    #[test]
    fn test_delete_clears_matching_selection() {
        let mut s = store();
        s.set_places(vec![place("a", 1.0), place("b", 2.0)]);
        s.set_selected_place(Some(place("a", 1.0)));

        s.delete_place(&PlaceId::new("b"));
        assert!(s.selected().is_some());

        s.delete_place(&PlaceId::new("a"));
        assert!(s.selected().is_none());
        assert!(s.places().is_empty());
    }

    #[test]
    fn test_snapshot_refreshes_selected() {
        let mut s = store();
        s.set_places(vec![place("a", 1.0)]);
        s.set_selected_place(Some(place("a", 1.0)));

        let mut renamed = place("a", 1.0);
        renamed.name = "Renamed".into();
        s.set_places(vec![renamed]);
        assert_eq!(s.selected().map(|p| p.name.as_str()), Some("Renamed"));
    }

    #[test]
    fn test_layout_toggle_survives_editor_close() {
        let mut s = store();
        s.set_editor_layout(s.editor_layout().toggled());
        s.open_editor(EditorMode::Edit);
        s.close_editor();
        assert_eq!(s.editor_layout(), EditorLayout::Panel);
        assert_eq!(s.editor_mode(), EditorMode::Edit);
    }
}
