//! Place editor: draft state and the save/delete lifecycle.
//!
//! Every open/close bumps the [`EditorTicket`]. Async work started under an
//! older ticket finishes into nothing: its completion is ignored rather than
//! applied to whatever the user has moved on to.

mod draft;
mod save;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub use self::draft::{is_remote_url, Draft, DraftEdit, DraftField, NAME_REQUIRED};
pub use self::save::{aggregate_uploads, DeleteJob, SaveContext, SaveJob, UploadSummary};

use crate::error::{AppError, AppResult, ErrorKind};
use crate::model::LocalId;
use crate::store::EditorMode;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EditorTicket(u64);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorPhase {
    #[default]
    Closed,
    Editing,
    Saving,
    ConfirmingDelete,
    Deleting,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Editor {
    phase: EditorPhase,
    ticket: EditorTicket,
    draft: Option<Draft>,
    progress: BTreeMap<LocalId, f32>,
}

impl Editor {
    pub const fn phase(&self) -> EditorPhase {
        self.phase
    }

    pub const fn ticket(&self) -> EditorTicket {
        self.ticket
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn mode(&self) -> Option<EditorMode> {
        self.draft.as_ref().map(|d| d.mode)
    }

    pub fn is_open(&self) -> bool {
        self.phase != EditorPhase::Closed
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, EditorPhase::Saving | EditorPhase::Deleting)
    }

    /// Whether a completion carrying `ticket` still belongs to this session.
    pub fn is_current(&self, ticket: EditorTicket) -> bool {
        self.is_open() && ticket == self.ticket
    }

    pub fn progress(&self) -> &BTreeMap<LocalId, f32> {
        &self.progress
    }

    fn bump(&mut self) -> EditorTicket {
        self.ticket = EditorTicket(self.ticket.0.wrapping_add(1));
        self.ticket
    }

    pub fn open(&mut self, draft: Draft) -> EditorTicket {
        self.draft = Some(draft);
        self.phase = EditorPhase::Editing;
        self.progress.clear();
        self.bump()
    }

    /// Closing abandons any in-flight save or delete.
    pub fn close(&mut self) {
        if self.is_busy() {
            debug!(ticket = self.ticket.0, "editor closed with work in flight");
        }
        self.draft = None;
        self.phase = EditorPhase::Closed;
        self.progress.clear();
        self.bump();
    }

    /// Draft edits are only accepted while editing.
    pub fn draft_mut(&mut self) -> Option<&mut Draft> {
        match self.phase {
            EditorPhase::Editing => self.draft.as_mut(),
            _ => None,
        }
    }

    /// Name first, then session context, then connectivity. Nothing is
    /// captured unless all three pass.
    pub fn begin_save(&mut self, ctx: &SaveContext) -> AppResult<SaveJob> {
        if self.phase != EditorPhase::Editing {
            return Err(AppError::new(ErrorKind::Internal, "Editor is not accepting saves")
                .with_context("phase", format!("{:?}", self.phase)));
        }
        let ticket = self.ticket;
        let draft = self
            .draft
            .as_mut()
            .ok_or_else(|| AppError::new(ErrorKind::Internal, "No draft to save"))?;
        let name = draft.validate()?;
        let (user, trip) = ctx.require()?;

        let job = SaveJob::capture(ticket, draft, name, user, trip);
        self.progress = job.staged.iter().map(|f| (f.id.clone(), 0.0)).collect();
        self.phase = EditorPhase::Saving;
        Ok(job)
    }

    pub fn record_progress(&mut self, ticket: EditorTicket, file: &LocalId, fraction: f32) {
        if ticket != self.ticket || self.phase != EditorPhase::Saving {
            return;
        }
        if let Some(slot) = self.progress.get_mut(file) {
            *slot = fraction.clamp(0.0, 1.0);
        }
    }

    /// Returns false when the result is stale and was dropped. Success
    /// closes the editor; failure keeps the draft for a manual retry.
    pub fn finish_save(&mut self, ticket: EditorTicket, result: &AppResult<()>) -> bool {
        if !self.is_current(ticket) || self.phase != EditorPhase::Saving {
            debug!(ticket = ticket.0, current = self.ticket.0, "stale save result dropped");
            return false;
        }
        match result {
            Ok(()) => self.close(),
            Err(_) => {
                self.phase = EditorPhase::Editing;
                self.progress.clear();
            }
        }
        true
    }

    /// Edit mode on a persisted place only.
    pub fn request_delete(&mut self) -> AppResult<()> {
        let deletable = self.phase == EditorPhase::Editing
            && self
                .draft
                .as_ref()
                .is_some_and(|d| d.mode == EditorMode::Edit && d.target.is_some());
        if !deletable {
            return Err(AppError::new(
                ErrorKind::Validation,
                "Only saved places can be deleted",
            ));
        }
        self.phase = EditorPhase::ConfirmingDelete;
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        if self.phase == EditorPhase::ConfirmingDelete {
            self.phase = EditorPhase::Editing;
        }
    }

    pub fn begin_delete(&mut self, ctx: &SaveContext) -> AppResult<DeleteJob> {
        if self.phase != EditorPhase::ConfirmingDelete {
            return Err(AppError::new(ErrorKind::Internal, "Delete was not confirmed"));
        }
        let place_id = self
            .draft
            .as_ref()
            .and_then(|d| d.target.clone())
            .ok_or_else(|| AppError::new(ErrorKind::Internal, "No place to delete"))?;
        let (user, trip) = match ctx.require() {
            Ok(pair) => pair,
            Err(e) => {
                self.phase = EditorPhase::Editing;
                return Err(e);
            }
        };
        self.phase = EditorPhase::Deleting;
        Ok(DeleteJob {
            ticket: self.ticket,
            user,
            trip,
            place_id,
        })
    }

    pub fn finish_delete(&mut self, ticket: EditorTicket, result: &AppResult<()>) -> bool {
        if !self.is_current(ticket) || self.phase != EditorPhase::Deleting {
            debug!(ticket = ticket.0, "stale delete result dropped");
            return false;
        }
        match result {
            Ok(()) => self.close(),
            Err(_) => self.phase = EditorPhase::Editing,
        }
        true
    }
}
