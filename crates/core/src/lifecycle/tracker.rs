use super::{compute_file_view, forced_stage, FileView, StageTitle};
use crate::error::{PortalError, PortalResult};
use crate::file::PatientFile;
use crate::session::Role;
use uuid::Uuid;

/// Page-level stage tracker for one viewer.
///
/// Holds the last computed [`FileView`] plus the stage the user explicitly navigated to. The
/// view is recomputed from scratch on every fetch; the user's choice survives a re-fetch only
/// when no priority rule forces a stage and the stage is still selectable on the same file.
#[derive(Clone, Debug)]
pub struct StageTracker {
    role: Role,
    user_id: String,
    view: FileView,
    selected: Option<(Uuid, StageTitle)>,
}

impl StageTracker {
    pub fn new(role: Role, user_id: impl Into<String>) -> Self {
        Self {
            role,
            user_id: user_id.into(),
            view: FileView::NoFile,
            selected: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn view(&self) -> &FileView {
        &self.view
    }

    pub fn active_stage(&self) -> Option<StageTitle> {
        self.view.active_stage()
    }

    /// Recompute the view from freshly fetched state.
    ///
    /// `None` means the backend reported no file.
    pub fn apply_fetch(&mut self, file: Option<&PatientFile>) -> &FileView {
        let mut view = compute_file_view(self.role, file, &self.user_id);

        match (&mut view, file) {
            (FileView::Staged(staged), Some(file)) => {
                let forced = forced_stage(self.role, file, &self.user_id);
                let keep = match self.selected {
                    Some((file_id, stage)) => {
                        forced.is_none() && file_id == staged.file_id && staged.is_selectable(stage)
                    }
                    None => false,
                };

                if keep {
                    if let Some((_, stage)) = self.selected {
                        staged.active = stage;
                    }
                } else {
                    self.selected = None;
                }
            }
            _ => self.selected = None,
        }

        self.view = view;
        &self.view
    }

    /// Keep the last-known view after a failed fetch. Never guesses a new stage.
    pub fn hold(&self) -> &FileView {
        tracing::debug!(
            active = ?self.view.active_stage(),
            "fetch failed, holding last-known stage"
        );
        &self.view
    }

    /// Explicit user navigation to `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidInput`] if there is no file or the stage is not part of the
    /// current sequence, is disabled, or is the text-only chip.
    pub fn select(&mut self, stage: StageTitle) -> PortalResult<StageTitle> {
        let FileView::Staged(staged) = &mut self.view else {
            return Err(PortalError::InvalidInput("no patient file is open".into()));
        };
        if !staged.is_selectable(stage) {
            return Err(PortalError::InvalidInput(format!(
                "stage {stage} is not available"
            )));
        }

        staged.active = stage;
        self.selected = Some((staged.file_id, stage));
        Ok(stage)
    }

    /// Drop the loaded view, e.g. after the file was discarded.
    pub fn reset(&mut self) {
        self.view = FileView::NoFile;
        self.selected = None;
    }
}
