//! Projection of the place store onto native map markers.
//!
//! [`plan_markers`] is the pure diff; [`MarkerReconciler`] owns the native
//! handles and applies plans to a [`MapWidget`]. A selected place never has a
//! regular marker: it is drawn only by the dedicated selected marker.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::capabilities::map::{MapWidget, MarkerClick};
use crate::model::{Coordinates, MarkerColor, Place, PlaceId};

/// Stacking key reserved for the selected marker.
pub const SELECTED_MARKER_KEY: &str = "__selected__";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerKey {
    Place(PlaceId),
    Selected,
}

impl MarkerKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Place(id) => id.as_str(),
            Self::Selected => SELECTED_MARKER_KEY,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerStyle {
    Regular,
    Selected,
}

impl MarkerStyle {
    #[must_use]
    pub const fn width(self) -> u32 {
        match self {
            Self::Regular => 28,
            Self::Selected => 36,
        }
    }

    #[must_use]
    pub const fn height(self) -> u32 {
        match self {
            Self::Regular => 36,
            Self::Selected => 46,
        }
    }

    #[must_use]
    pub const fn z_index(self) -> i32 {
        match self {
            Self::Regular => 100,
            Self::Selected => 2000,
        }
    }
}

/// Everything the widget needs to draw one marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub key: MarkerKey,
    pub position: Coordinates,
    pub title: String,
    pub color: MarkerColor,
    pub style: MarkerStyle,
}

impl MarkerSpec {
    #[must_use]
    pub fn regular(id: &PlaceId, place: &Place) -> Self {
        Self {
            key: MarkerKey::Place(id.clone()),
            position: place.location,
            title: place.name.clone(),
            color: place.color,
            style: MarkerStyle::Regular,
        }
    }

    #[must_use]
    pub fn selected(place: &Place) -> Self {
        Self {
            key: MarkerKey::Selected,
            position: place.location,
            title: place.name.clone(),
            color: place.color,
            style: MarkerStyle::Selected,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerPlan {
    pub create: Vec<(PlaceId, MarkerSpec)>,
    pub update: Vec<(PlaceId, MarkerSpec)>,
    pub remove: Vec<PlaceId>,
}

impl MarkerPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// Diffs the regular marker table against the current places.
///
/// Markers whose spec is unchanged produce no update. Places without an id
/// and repeated ids (after the first) are ignored.
#[must_use]
pub fn plan_markers(
    previous: &HashMap<PlaceId, MarkerSpec>,
    places: &[Place],
    selected: Option<&PlaceId>,
) -> MarkerPlan {
    let mut plan = MarkerPlan::default();
    let mut wanted: HashSet<&PlaceId> = HashSet::with_capacity(places.len());
    let mut seen: HashSet<&PlaceId> = HashSet::with_capacity(places.len());

    for place in places {
        let Some(id) = place.id.as_ref() else {
            continue;
        };
        if !seen.insert(id) || Some(id) == selected {
            continue;
        }
        wanted.insert(id);

        let spec = MarkerSpec::regular(id, place);
        match previous.get(id) {
            Some(existing) if *existing == spec => {}
            Some(_) => plan.update.push((id.clone(), spec)),
            None => plan.create.push((id.clone(), spec)),
        }
    }

    plan.remove = previous
        .keys()
        .filter(|id| !wanted.contains(id))
        .cloned()
        .collect();
    plan.remove.sort();
    plan
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectedPlan {
    Unchanged,
    /// Drop any previous selected marker and draw this one.
    Show(MarkerSpec),
    Hide,
}

#[must_use]
pub fn plan_selected(previous: Option<&MarkerSpec>, selected: Option<&Place>) -> SelectedPlan {
    match (previous, selected.map(MarkerSpec::selected)) {
        (None, None) => SelectedPlan::Unchanged,
        (Some(_), None) => SelectedPlan::Hide,
        (Some(prev), Some(next)) if *prev == next => SelectedPlan::Unchanged,
        (_, Some(next)) => SelectedPlan::Show(next),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ReconcileStats {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Sole owner of native marker handles.
pub struct MarkerReconciler<W: MapWidget> {
    widget: Arc<W>,
    specs: HashMap<PlaceId, MarkerSpec>,
    handles: HashMap<PlaceId, W::Marker>,
    selected: Option<(MarkerSpec, W::Marker)>,
}

impl<W: MapWidget> MarkerReconciler<W> {
    pub fn new(widget: Arc<W>) -> Self {
        Self {
            widget,
            specs: HashMap::new(),
            handles: HashMap::new(),
            selected: None,
        }
    }

    pub fn widget(&self) -> &Arc<W> {
        &self.widget
    }

    pub fn regular_count(&self) -> usize {
        self.handles.len()
    }

    pub fn has_selected(&self) -> bool {
        self.selected.is_some()
    }

    /// `on_select` builds the click handler for a newly created regular marker.
    pub fn reconcile<F>(
        &mut self,
        places: &[Place],
        selected: Option<&Place>,
        on_select: F,
    ) -> ReconcileStats
    where
        F: Fn(PlaceId) -> MarkerClick,
    {
        let mut stats = ReconcileStats::default();
        let selected_id = selected.and_then(|p| p.id.as_ref());
        let plan = plan_markers(&self.specs, places, selected_id);

        for id in plan.remove {
            self.specs.remove(&id);
            if let Some(handle) = self.handles.remove(&id) {
                self.widget.remove_marker(handle);
                stats.removed += 1;
            }
        }

        for (id, spec) in plan.update {
            if let Some(handle) = self.handles.get_mut(&id) {
                self.widget.update_marker(handle, &spec);
                stats.updated += 1;
            }
            self.specs.insert(id, spec);
        }

        for (id, spec) in plan.create {
            let handle = self.widget.create_marker(&spec, on_select(id.clone()));
            self.handles.insert(id.clone(), handle);
            self.specs.insert(id, spec);
            stats.created += 1;
        }

        match plan_selected(self.selected.as_ref().map(|(spec, _)| spec), selected) {
            SelectedPlan::Unchanged => {}
            SelectedPlan::Hide => {
                if let Some((_, handle)) = self.selected.take() {
                    self.widget.remove_marker(handle);
                    stats.removed += 1;
                }
            }
            SelectedPlan::Show(spec) => {
                if let Some((_, handle)) = self.selected.take() {
                    self.widget.remove_marker(handle);
                    stats.removed += 1;
                }
                let noop: MarkerClick = Arc::new(|| {});
                let handle = self.widget.create_marker(&spec, noop);
                self.selected = Some((spec, handle));
                stats.created += 1;
            }
        }

        if !stats.is_noop() {
            debug!(
                created = stats.created,
                updated = stats.updated,
                removed = stats.removed,
                "markers reconciled"
            );
        }
        stats
    }

    /// Removes every native marker. Called on unmount.
    pub fn clear(&mut self) {
        for (_, handle) in self.handles.drain() {
            self.widget.remove_marker(handle);
        }
        self.specs.clear();
        if let Some((_, handle)) = self.selected.take() {
            self.widget.remove_marker(handle);
        }
    }
}

impl<W: MapWidget> Drop for MarkerReconciler<W> {
    fn drop(&mut self) {
        self.clear();
    }
}
