use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::error::{AppError, ErrorKind};
use crate::model::{Coordinates, MarkerColor, MediaEntry, Place, PlaceId, Tags};
use crate::store::EditorMode;
use crate::upload::StagedFile;

pub const NAME_REQUIRED: &str = "Name is required";

/// Fields that can carry an inline error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftField {
    Name,
}

/// A single user edit to the open draft.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DraftEdit {
    Name(String),
    VisitedDate(NaiveDate),
    Color(MarkerColor),
    Text(String),
    TagInput(String),
    /// Enter in the tag field.
    CommitTag,
    RemoveTag(String),
    RemovePhoto(usize),
}

/// True for persisted photo URLs; local previews (`blob:`, `file:`, data
/// URIs) are not remote.
pub fn is_remote_url(candidate: &str) -> bool {
    Url::parse(candidate).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Transient editor field state.
#[derive(Clone, Debug, PartialEq)]
pub struct Draft {
    pub mode: EditorMode,
    /// The place being edited; `None` in add mode.
    pub target: Option<PlaceId>,
    pub name: String,
    pub location: Coordinates,
    pub address: Option<String>,
    pub visited_date: NaiveDate,
    pub color: MarkerColor,
    pub text: String,
    pub tags: Tags,
    pub tag_input: String,
    // Display list: remote URLs and local previews, in grid order.
    photos: Vec<String>,
    // One entry per local preview in `photos`, same relative order.
    staged: Vec<StagedFile>,
    known_media: Vec<MediaEntry>,
    errors: BTreeMap<DraftField, String>,
    created_at: Option<DateTime<Utc>>,
}

impl Draft {
    /// Add-mode draft. A selected place (search result, dropped pin) seeds
    /// name, coordinates and address; otherwise the draft sits at
    /// `fallback`.
    pub fn blank(seed: Option<&Place>, fallback: Coordinates, today: NaiveDate) -> Self {
        let (name, location, address) = match seed {
            Some(p) => (p.name.clone(), p.location, p.address.clone()),
            None => (String::new(), fallback, None),
        };
        Self {
            mode: EditorMode::Add,
            target: None,
            name,
            location,
            address,
            visited_date: today,
            color: MarkerColor::default(),
            text: String::new(),
            tags: Tags::new(),
            tag_input: String::new(),
            photos: Vec::new(),
            staged: Vec::new(),
            known_media: Vec::new(),
            errors: BTreeMap::new(),
            created_at: None,
        }
    }

    /// Edit-mode draft copied from a stored place.
    pub fn from_place(place: &Place, today: NaiveDate) -> Self {
        Self {
            mode: EditorMode::Edit,
            target: place.id.clone(),
            name: place.name.clone(),
            location: place.location,
            address: place.address.clone(),
            visited_date: place.visited_date.unwrap_or(today),
            color: place.color,
            text: place.content.text.clone(),
            tags: place.tags.clone(),
            tag_input: String::new(),
            photos: place.photo_urls(),
            staged: Vec::new(),
            known_media: place.content.media.clone(),
            errors: BTreeMap::new(),
            created_at: place.created_at,
        }
    }

    pub fn apply(&mut self, edit: DraftEdit) {
        match edit {
            DraftEdit::Name(name) => {
                self.name = name;
                self.errors.remove(&DraftField::Name);
            }
            DraftEdit::VisitedDate(date) => self.visited_date = date,
            DraftEdit::Color(color) => self.color = color,
            DraftEdit::Text(text) => self.text = text,
            DraftEdit::TagInput(input) => self.tag_input = input,
            DraftEdit::CommitTag => {
                self.commit_tag_input();
            }
            DraftEdit::RemoveTag(tag) => {
                self.tags.remove(&tag);
            }
            DraftEdit::RemovePhoto(index) => {
                self.remove_photo(index);
            }
        }
    }

    /// Commits the tag input if it is non-empty and new. The input is
    /// cleared either way.
    pub fn commit_tag_input(&mut self) -> bool {
        let tag = self.tag_input.trim().to_string();
        self.tag_input.clear();
        !tag.is_empty() && self.tags.insert(tag)
    }

    /// Previews show up in the grid right away.
    pub fn stage_files(&mut self, files: impl IntoIterator<Item = StagedFile>) {
        for file in files {
            self.photos.push(file.preview_url.clone());
            self.staged.push(file);
        }
    }

    /// Removes the photo at `index` from the grid. A local preview also
    /// drops the staged file at the same position among previews; a remote
    /// photo leaves the staged list alone.
    pub fn remove_photo(&mut self, index: usize) -> bool {
        let Some(url) = self.photos.get(index) else {
            return false;
        };
        if !is_remote_url(url) {
            let staged_index = self.photos[..index]
                .iter()
                .filter(|p| !is_remote_url(p))
                .count();
            if staged_index < self.staged.len() {
                self.staged.remove(staged_index);
            }
        }
        self.photos.remove(index);
        true
    }

    pub fn photos(&self) -> &[String] {
        &self.photos
    }

    pub fn staged(&self) -> &[StagedFile] {
        &self.staged
    }

    pub fn remote_photos(&self) -> Vec<String> {
        self.photos
            .iter()
            .filter(|p| is_remote_url(p))
            .cloned()
            .collect()
    }

    pub(crate) fn known_media(&self) -> &[MediaEntry] {
        &self.known_media
    }

    pub(crate) const fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn errors(&self) -> &BTreeMap<DraftField, String> {
        &self.errors
    }

    pub fn error(&self, field: DraftField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    /// Returns the trimmed name, or flags the name field.
    pub fn validate(&mut self) -> Result<String, AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            self.errors.insert(DraftField::Name, NAME_REQUIRED.to_string());
            return Err(AppError::new(ErrorKind::Validation, NAME_REQUIRED)
                .with_context("field", "name"));
        }
        self.errors.remove(&DraftField::Name);
        Ok(name.to_string())
    }
}
