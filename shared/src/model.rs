use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::error::{AppError, ErrorKind};

/// Rating persisted with every place until rating input exists.
pub const PLACE_RATING: f64 = 4.5;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(UserId);
typed_id!(TripId);
typed_id!(PlaceId);
typed_id!(LocalId);

impl LocalId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// --- Coordinates: validated, NaN-safe ---

#[derive(Debug, Clone, Error)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinates")]
pub struct Coordinates {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct RawCoordinates {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawCoordinates> for Coordinates {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinates) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lng)
    }
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }

    /// For compile-time constants already known to be in range.
    pub(crate) const fn from_trusted(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lng(&self) -> f64 {
        self.lng
    }
}

// --- Marker palette ---

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerColor {
    #[default]
    #[serde(rename = "#3B82F6")]
    Blue,
    #[serde(rename = "#EF4444")]
    Red,
    #[serde(rename = "#10B981")]
    Green,
    #[serde(rename = "#8B5CF6")]
    Purple,
    #[serde(rename = "#F59E0B")]
    Orange,
    #[serde(rename = "#EAB308")]
    Yellow,
}

impl MarkerColor {
    pub const ALL: [MarkerColor; 6] = [
        Self::Blue,
        Self::Red,
        Self::Green,
        Self::Purple,
        Self::Orange,
        Self::Yellow,
    ];

    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Blue => "#3B82F6",
            Self::Red => "#EF4444",
            Self::Green => "#10B981",
            Self::Purple => "#8B5CF6",
            Self::Orange => "#F59E0B",
            Self::Yellow => "#EAB308",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Blue => "Blue",
            Self::Red => "Red",
            Self::Green => "Green",
            Self::Purple => "Purple",
            Self::Orange => "Orange",
            Self::Yellow => "Yellow",
        }
    }

    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.hex().eq_ignore_ascii_case(hex.trim()))
    }

    /// Unknown or empty wire values fall back to the default tint.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        if value.is_empty() {
            return Self::default();
        }
        Self::from_hex(value).unwrap_or_else(|| {
            warn!(color = value, "unknown marker color, using default");
            Self::default()
        })
    }
}

// --- Content ---

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Photo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaEntry {
    #[serde(rename = "type", default)]
    pub kind: MediaKind,
    pub url: String,
    /// Older entries were written without one; they read as the epoch.
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl MediaEntry {
    #[must_use]
    pub fn photo(url: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: MediaKind::Photo,
            url: url.into(),
            timestamp,
        }
    }
}

/// Normalized rich content. Always written in the structured shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireContent")]
pub struct Content {
    pub text: String,
    pub media: Vec<MediaEntry>,
}

impl Content {
    pub fn photo_urls(&self) -> impl Iterator<Item = &str> + '_ {
        self.media
            .iter()
            .filter(|m| m.kind == MediaKind::Photo)
            .map(|m| m.url.as_str())
    }
}

/// Content as found in stored documents: the structured object, or a bare
/// string written by older clients.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Structured {
        #[serde(default)]
        text: String,
        #[serde(default)]
        media: Vec<MediaEntry>,
    },
    Legacy(String),
}

impl From<WireContent> for Content {
    fn from(wire: WireContent) -> Self {
        match wire {
            WireContent::Structured { text, media } => Self { text, media },
            WireContent::Legacy(text) => Self {
                text,
                media: Vec::new(),
            },
        }
    }
}

// --- Tags ---

/// Insertion-ordered labels, deduplicated by exact (case-sensitive) match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Tags(Vec<String>);

impl Tags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the tag was already present.
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.0.contains(&tag) {
            return false;
        }
        self.0.push(tag);
        true
    }

    pub fn remove(&mut self, tag: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| t != tag);
        self.0.len() != before
    }

    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for Tags {
    fn from(raw: Vec<String>) -> Self {
        raw.into_iter().collect()
    }
}

impl From<Tags> for Vec<String> {
    fn from(tags: Tags) -> Self {
        tags.0
    }
}

impl FromIterator<String> for Tags {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.insert(tag);
        }
        tags
    }
}

// --- Place ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// Absent until the document store assigns one.
    pub id: Option<PlaceId>,
    pub name: String,
    pub location: Coordinates,
    pub address: Option<String>,
    pub visited_date: Option<NaiveDate>,
    pub color: MarkerColor,
    pub content: Content,
    pub tags: Tags,
    pub rating: f64,
    pub is_public: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Place {
    /// A place that exists only on the client, e.g. a search result or a
    /// dropped pin.
    #[must_use]
    pub fn unsaved(name: impl Into<String>, location: Coordinates, address: Option<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            location,
            address,
            visited_date: None,
            color: MarkerColor::default(),
            content: Content::default(),
            tags: Tags::new(),
            rating: PLACE_RATING,
            is_public: false,
            created_at: None,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn from_record(record: PlaceRecord) -> Self {
        let PlaceRecord { id, document } = record;
        let address = Some(document.address).filter(|a| !a.is_empty());
        Self {
            id: Some(id),
            name: document.name,
            location: document.coordinates,
            address,
            visited_date: document.visited_date.map(|ts| ts.date_naive()),
            color: MarkerColor::from_wire(&document.color),
            content: document.content,
            tags: document.tags,
            rating: document.rating,
            is_public: document.is_public,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    #[must_use]
    pub fn photo_urls(&self) -> Vec<String> {
        self.content.photo_urls().map(str::to_owned).collect()
    }
}

// --- Trip ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: TripId,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub places_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrip {
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl NewTrip {
    #[must_use]
    pub fn single_day(title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            start_date: date,
            end_date: date,
        }
    }
}

// --- Wire documents ---

#[must_use]
pub fn date_to_timestamp(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Place document as exchanged with the document store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceDocument {
    pub name: String,
    pub coordinates: Coordinates,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub visited_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PlaceDocument {
    pub fn apply_patch(&mut self, patch: PlacePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(visited_date) = patch.visited_date {
            self.visited_date = Some(visited_date);
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(rating) = patch.rating {
            self.rating = rating;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(is_public) = patch.is_public {
            self.is_public = is_public;
        }
        self.updated_at = Some(patch.updated_at);
    }
}

/// Partial update. Coordinates and address are fixed at creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visited_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a live snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub id: PlaceId,
    pub document: PlaceDocument,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bangkok() -> Coordinates {
        Coordinates::new(13.7563, 100.5018).unwrap()
    }

    #[test]
    fn test_coordinates_reject_out_of_range() {
        assert!(matches!(
            Coordinates::new(91.0, 0.0),
            Err(CoordinateError::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            Coordinates::new(0.0, -180.5),
            Err(CoordinateError::LongitudeOutOfRange(_))
        ));
        assert!(matches!(
            Coordinates::new(f64::NAN, 0.0),
            Err(CoordinateError::NonFinite)
        ));
    }

    #[test]
    fn test_coordinates_deserialize_validates() {
        let ok: Coordinates = serde_json::from_value(json!({"lat": 1.5, "lng": 2.5})).unwrap();
        assert_eq!(ok.lat(), 1.5);
        assert!(serde_json::from_value::<Coordinates>(json!({"lat": 100.0, "lng": 0.0})).is_err());
    }

    #[test]
    fn test_marker_color_hex_lookup_is_case_insensitive() {
        assert_eq!(MarkerColor::from_hex("#10b981"), Some(MarkerColor::Green));
        assert_eq!(MarkerColor::from_hex("#000000"), None);
        assert_eq!(MarkerColor::from_wire("#000000"), MarkerColor::Blue);
        assert_eq!(MarkerColor::from_wire(""), MarkerColor::Blue);
        assert_eq!(
            serde_json::to_value(MarkerColor::Purple).unwrap(),
            json!("#8B5CF6")
        );
    }

    #[test]
    fn test_tags_dedupe_case_sensitively() {
        let mut tags = Tags::new();
        assert!(tags.insert("food"));
        assert!(!tags.insert("food"));
        assert!(tags.insert("Food"));
        assert_eq!(tags.as_slice(), ["food", "Food"]);
        assert!(tags.remove("food"));
        assert!(!tags.remove("food"));
        assert_eq!(tags.as_slice(), ["Food"]);
    }

    #[test]
    fn test_tags_deserialize_drops_duplicates() {
        let tags: Tags = serde_json::from_value(json!(["a", "b", "a"])).unwrap();
        assert_eq!(tags.as_slice(), ["a", "b"]);
    }

    #[test]
    fn test_structured_content_normalizes() {
        let content: Content = serde_json::from_value(json!({
            "text": "noodles",
            "media": [{"type": "photo", "url": "https://x/1.jpg", "timestamp": "2024-03-01T00:00:00Z"}]
        }))
        .unwrap();
        assert_eq!(content.text, "noodles");
        assert_eq!(content.photo_urls().collect::<Vec<_>>(), ["https://x/1.jpg"]);
    }

    #[test]
    fn test_legacy_string_content_normalizes() {
        let content: Content = serde_json::from_value(json!("just text")).unwrap();
        assert_eq!(content.text, "just text");
        assert!(content.media.is_empty());

        // Always written back in the structured shape.
        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!({"text": "just text", "media": []})
        );
    }

    #[test]
    fn test_media_without_timestamp_still_decodes() {
        let content: Content = serde_json::from_value(json!({
            "text": "harbour",
            "media": [
                {"type": "photo", "url": "https://cdn.example.com/a.jpg"},
                {"type": "photo", "url": "https://cdn.example.com/b.jpg", "timestamp": "2024-03-01T08:00:00Z"},
            ],
        }))
        .unwrap();
        assert_eq!(
            content.photo_urls().collect::<Vec<_>>(),
            ["https://cdn.example.com/a.jpg", "https://cdn.example.com/b.jpg"]
        );
        assert_eq!(content.media[0].timestamp, DateTime::<Utc>::default());
    }

    #[test]
    fn test_document_tolerates_missing_fields() {
        let doc: PlaceDocument = serde_json::from_value(json!({
            "name": "Wat Pho",
            "coordinates": {"lat": 13.7465, "lng": 100.4927},
        }))
        .unwrap();
        let place = Place::from_record(PlaceRecord {
            id: PlaceId::new("p1"),
            document: doc,
        });
        assert_eq!(place.address, None);
        assert_eq!(place.visited_date, None);
        assert_eq!(place.color, MarkerColor::Blue);
        assert!(place.content.text.is_empty());
    }

    #[test]
    fn test_document_wire_shape_is_camel_case() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let doc = PlaceDocument {
            name: "Café X".into(),
            coordinates: bangkok(),
            address: String::new(),
            visited_date: Some(date_to_timestamp(date)),
            content: Content::default(),
            tags: vec!["food".to_string()].into(),
            rating: PLACE_RATING,
            color: MarkerColor::Green.hex().into(),
            is_public: false,
            created_at: None,
            updated_at: None,
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["visitedDate"], json!("2024-03-01T00:00:00Z"));
        assert_eq!(value["isPublic"], json!(false));
        assert_eq!(value["color"], json!("#10B981"));
        assert_eq!(value["content"], json!({"text": "", "media": []}));
    }

    #[test]
    fn test_patch_leaves_unset_fields() {
        let mut doc = PlaceDocument {
            name: "Old".into(),
            coordinates: bangkok(),
            address: "Somewhere".into(),
            visited_date: None,
            content: Content::default(),
            tags: Tags::new(),
            rating: PLACE_RATING,
            color: MarkerColor::Red.hex().into(),
            is_public: false,
            created_at: None,
            updated_at: None,
        };
        let now = Utc::now();
        doc.apply_patch(PlacePatch {
            name: Some("New".into()),
            visited_date: None,
            content: None,
            tags: None,
            rating: None,
            color: None,
            is_public: None,
            updated_at: now,
        });
        assert_eq!(doc.name, "New");
        assert_eq!(doc.address, "Somewhere");
        assert_eq!(doc.color, "#EF4444");
        assert_eq!(doc.updated_at, Some(now));
    }
}
