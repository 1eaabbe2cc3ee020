use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::draft::Draft;
use super::EditorTicket;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::model::{
    date_to_timestamp, Content, Coordinates, MarkerColor, MediaEntry, Place, PlaceDocument,
    PlaceId, PlacePatch, Tags, TripId, UserId, PLACE_RATING,
};
use crate::store::EditorMode;
use crate::upload::StagedFile;

/// Session facts a remote write depends on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveContext {
    pub user: Option<UserId>,
    pub trip: Option<TripId>,
    pub online: bool,
}

impl SaveContext {
    pub(crate) fn require(&self) -> AppResult<(UserId, TripId)> {
        let (Some(user), Some(trip)) = (&self.user, &self.trip) else {
            return Err(AppError::new(
                ErrorKind::MissingContext,
                "Sign in and pick a trip first",
            ));
        };
        if !self.online {
            return Err(AppError::new(ErrorKind::Offline, "You are offline"));
        }
        Ok((user.clone(), trip.clone()))
    }
}

/// Everything a save needs, captured when the save starts so later draft
/// edits cannot leak into it.
#[derive(Clone, Debug, PartialEq)]
pub struct SaveJob {
    pub ticket: EditorTicket,
    pub mode: EditorMode,
    pub target: Option<PlaceId>,
    pub user: UserId,
    pub trip: TripId,
    pub name: String,
    pub location: Coordinates,
    pub address: Option<String>,
    pub visited_date: NaiveDate,
    pub color: MarkerColor,
    pub text: String,
    pub tags: Tags,
    /// Already-persisted photos, in display order.
    pub existing_photos: Vec<String>,
    pub staged: Vec<StagedFile>,
    known_media: Vec<MediaEntry>,
    created_at: Option<DateTime<Utc>>,
}

impl SaveJob {
    pub(crate) fn capture(
        ticket: EditorTicket,
        draft: &Draft,
        name: String,
        user: UserId,
        trip: TripId,
    ) -> Self {
        Self {
            ticket,
            mode: draft.mode,
            target: draft.target.clone(),
            user,
            trip,
            name,
            location: draft.location,
            address: draft.address.clone(),
            visited_date: draft.visited_date,
            color: draft.color,
            text: draft.text.clone(),
            tags: draft.tags.clone(),
            existing_photos: draft.remote_photos(),
            staged: draft.staged().to_vec(),
            known_media: draft.known_media().to_vec(),
            created_at: draft.created_at(),
        }
    }

    /// Existing photos first, then `uploaded` in staging order. Existing
    /// photos keep their original timestamp.
    pub fn media(&self, uploaded: &[String], now: DateTime<Utc>) -> Vec<MediaEntry> {
        let existing = self.existing_photos.iter().map(|url| {
            self.known_media
                .iter()
                .find(|m| &m.url == url)
                .cloned()
                .unwrap_or_else(|| MediaEntry::photo(url.clone(), now))
        });
        let fresh = uploaded.iter().map(|url| MediaEntry::photo(url.clone(), now));
        existing.chain(fresh).collect()
    }

    fn content(&self, uploaded: &[String], now: DateTime<Utc>) -> Content {
        Content {
            text: self.text.clone(),
            media: self.media(uploaded, now),
        }
    }

    pub fn to_document(&self, uploaded: &[String], now: DateTime<Utc>) -> PlaceDocument {
        PlaceDocument {
            name: self.name.clone(),
            coordinates: self.location,
            address: self.address.clone().unwrap_or_default(),
            visited_date: Some(date_to_timestamp(self.visited_date)),
            content: self.content(uploaded, now),
            tags: self.tags.clone(),
            rating: PLACE_RATING,
            color: self.color.hex().to_string(),
            is_public: false,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn to_patch(&self, uploaded: &[String], now: DateTime<Utc>) -> PlacePatch {
        PlacePatch {
            name: Some(self.name.clone()),
            visited_date: Some(date_to_timestamp(self.visited_date)),
            content: Some(self.content(uploaded, now)),
            tags: Some(self.tags.clone()),
            rating: Some(PLACE_RATING),
            color: Some(self.color.hex().to_string()),
            is_public: None,
            updated_at: now,
        }
    }

    /// The place as it will look once the snapshot confirms the write.
    pub fn saved_place(&self, id: PlaceId, uploaded: &[String], now: DateTime<Utc>) -> Place {
        Place {
            id: Some(id),
            name: self.name.clone(),
            location: self.location,
            address: self.address.clone(),
            visited_date: Some(self.visited_date),
            color: self.color,
            content: self.content(uploaded, now),
            tags: self.tags.clone(),
            rating: PLACE_RATING,
            is_public: false,
            created_at: self.created_at.or(Some(now)),
            updated_at: Some(now),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteJob {
    pub ticket: EditorTicket,
    pub user: UserId,
    pub trip: TripId,
    pub place_id: PlaceId,
}

/// Outcome of a batch of uploads that did not fail outright.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UploadSummary {
    /// Successful URLs, in staging order.
    pub uploaded: Vec<String>,
    pub failures: Vec<AppError>,
}

impl UploadSummary {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// Splits per-file results. Fails only when files were staged and none of
/// them made it.
pub fn aggregate_uploads(results: Vec<Result<String, AppError>>) -> AppResult<UploadSummary> {
    let total = results.len();
    let mut summary = UploadSummary::default();
    for result in results {
        match result {
            Ok(url) => summary.uploaded.push(url),
            Err(e) => summary.failures.push(e),
        }
    }

    if total > 0 && summary.uploaded.is_empty() {
        let cause = summary
            .failures
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        return Err(AppError::new(
            ErrorKind::AllUploadsFailed,
            format!("All {total} photos failed to upload"),
        )
        .with_internal(cause)
        .with_context("failed", total.to_string()));
    }
    Ok(summary)
}
