//! Screen controllers.
//!
//! A screen owns the last-known-good data for one view and re-fetches it on demand. Every fetch
//! carries a generation number; a response whose generation is no longer current (a newer
//! fetch started, or the screen was torn down) is dropped. Failures keep the old data and raise
//! a toast.

use crate::api::FileApi;
use crate::notify::Notifier;
use api_shared::StagePayload;
use async_trait::async_trait;
use referral_core::{
    FileView, ListView, LoadMode, PatientFile, PatientFileSummary, PortalError, PortalResult,
    Role, StageTitle, StageTracker, ViewId,
};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// What the screen shows while a fetch is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Blocking,
    Background,
}

/// A mounted view the refresh coordinator can drive.
#[async_trait]
pub trait Screen: Send + Sync {
    fn view_id(&self) -> ViewId;

    /// Re-fetch. Returns `true` when fresh data was applied.
    async fn refresh(&self, mode: LoadMode) -> bool;

    /// Stop accepting responses.
    fn teardown(&self);
}

fn next_load_state(current: LoadState, mode: LoadMode) -> LoadState {
    match mode {
        LoadMode::Blocking => LoadState::Blocking,
        LoadMode::Background => LoadState::Background,
        LoadMode::Silent => current,
    }
}

// ============================================================================
// File detail
// ============================================================================

/// Where a file screen gets its file from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileSource {
    /// The caller's single in-progress file.
    InProgress,
    ById(Uuid),
}

struct FileState {
    generation: u64,
    torn_down: bool,
    loaded: bool,
    file: Option<PatientFile>,
    tracker: StageTracker,
    load: LoadState,
    editing: bool,
    deferred: Option<LoadMode>,
}

/// Detail controller for one patient file.
pub struct FileScreen {
    view: ViewId,
    source: FileSource,
    api: Arc<dyn FileApi>,
    notifier: Notifier,
    state: Mutex<FileState>,
    submissions: tokio::sync::Mutex<()>,
}

impl FileScreen {
    /// # Arguments
    /// * `view` - Which screen this is, for event routing.
    /// * `source` - In-progress file or a specific id.
    /// * `role`, `user_id` - The viewer, for stage computation.
    pub fn new(
        view: ViewId,
        source: FileSource,
        api: Arc<dyn FileApi>,
        notifier: Notifier,
        role: Role,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            view,
            source,
            api,
            notifier,
            state: Mutex::new(FileState {
                generation: 0,
                torn_down: false,
                loaded: false,
                file: None,
                tracker: StageTracker::new(role, user_id),
                load: LoadState::Idle,
                editing: false,
                deferred: None,
            }),
            submissions: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn file(&self) -> Option<PatientFile> {
        self.lock().file.clone()
    }

    pub fn file_view(&self) -> FileView {
        self.lock().tracker.view().clone()
    }

    pub fn active_stage(&self) -> Option<StageTitle> {
        self.lock().tracker.active_stage()
    }

    pub fn load_state(&self) -> LoadState {
        self.lock().load
    }

    /// Whether a fetch has ever succeeded.
    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    pub fn is_editing(&self) -> bool {
        self.lock().editing
    }

    pub fn has_deferred_refresh(&self) -> bool {
        self.lock().deferred.is_some()
    }

    /// Navigate to `stage` within the allowed, enabled set.
    pub fn select_stage(&self, stage: StageTitle) -> PortalResult<StageTitle> {
        self.lock().tracker.select(stage)
    }

    /// The user started changing a stage form. Background refreshes wait until [`end_edit`].
    ///
    /// [`end_edit`]: FileScreen::end_edit
    pub fn begin_edit(&self) {
        self.lock().editing = true;
    }

    /// The user left the form without saving. Runs any refresh deferred while editing.
    pub async fn end_edit(&self) -> bool {
        let deferred = {
            let mut st = self.lock();
            st.editing = false;
            st.deferred.take()
        };
        match deferred {
            Some(mode) => {
                tracing::debug!(view = %self.view, "running deferred refresh");
                self.fetch(mode).await
            }
            None => false,
        }
    }

    async fn fetch(&self, mode: LoadMode) -> bool {
        let generation = {
            let mut st = self.lock();
            if st.torn_down {
                return false;
            }
            if st.editing && mode != LoadMode::Blocking {
                tracing::debug!(view = %self.view, ?mode, "deferring refresh while editing");
                st.deferred = Some(match st.deferred {
                    Some(LoadMode::Background) => LoadMode::Background,
                    _ => mode,
                });
                return false;
            }
            st.generation += 1;
            st.load = next_load_state(st.load, mode);
            st.generation
        };

        let result = match self.source {
            FileSource::InProgress => self.api.fetch_in_progress().await,
            FileSource::ById(id) => self.api.fetch_file(id).await,
        };
        self.apply(generation, result)
    }

    fn apply(&self, generation: u64, result: PortalResult<Option<PatientFile>>) -> bool {
        let error = {
            let mut st = self.lock();
            if st.torn_down || st.generation != generation {
                tracing::debug!(view = %self.view, generation, "ignoring late response");
                return false;
            }
            st.load = LoadState::Idle;
            match result {
                Ok(file) => {
                    st.tracker.apply_fetch(file.as_ref());
                    st.file = file;
                    st.loaded = true;
                    return true;
                }
                Err(e) => {
                    st.tracker.hold();
                    e
                }
            }
        };
        self.notifier.error(&error);
        false
    }

    /// Save one stage. At most one submission runs at a time; the response replaces the
    /// local file and ends any edit in progress.
    pub async fn submit_stage(&self, stage: StageTitle, payload: StagePayload) -> bool {
        let _serialised = self.submissions.lock().await;
        let Some(id) = self.file_id() else {
            self.notifier
                .error(&PortalError::InvalidInput("no file is open".into()));
            return false;
        };
        let result = self.api.submit_stage(id, stage, payload).await;
        self.apply_write(result)
    }

    /// Hand the open file to review.
    pub async fn submit_file(&self) -> bool {
        let _serialised = self.submissions.lock().await;
        let Some(id) = self.file_id() else {
            self.notifier
                .error(&PortalError::InvalidInput("no file is open".into()));
            return false;
        };
        let result = self.api.submit_file(id).await;
        self.apply_write(result)
    }

    fn file_id(&self) -> Option<Uuid> {
        self.lock().file.as_ref().and_then(|f| f.id)
    }

    fn apply_write(&self, result: PortalResult<PatientFile>) -> bool {
        let generation = {
            let mut st = self.lock();
            if st.torn_down {
                return false;
            }
            // The write response is newer than anything in flight.
            st.generation += 1;
            st.editing = false;
            st.deferred = None;
            st.generation
        };
        self.apply(generation, result.map(Some))
    }
}

#[async_trait]
impl Screen for FileScreen {
    fn view_id(&self) -> ViewId {
        self.view
    }

    async fn refresh(&self, mode: LoadMode) -> bool {
        self.fetch(mode).await
    }

    fn teardown(&self) {
        let mut st = self.lock();
        st.torn_down = true;
        st.generation += 1;
        st.load = LoadState::Idle;
    }
}

// ============================================================================
// Lists
// ============================================================================

struct ListState {
    generation: u64,
    torn_down: bool,
    loaded: bool,
    rows: Vec<PatientFileSummary>,
    load: LoadState,
}

/// Controller for one list view.
pub struct ListScreen {
    view: ListView,
    api: Arc<dyn FileApi>,
    notifier: Notifier,
    state: Mutex<ListState>,
}

impl ListScreen {
    pub fn new(view: ListView, api: Arc<dyn FileApi>, notifier: Notifier) -> Self {
        Self {
            view,
            api,
            notifier,
            state: Mutex::new(ListState {
                generation: 0,
                torn_down: false,
                loaded: false,
                rows: Vec::new(),
                load: LoadState::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn rows(&self) -> Vec<PatientFileSummary> {
        self.lock().rows.clone()
    }

    pub fn load_state(&self) -> LoadState {
        self.lock().load
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }
}

#[async_trait]
impl Screen for ListScreen {
    fn view_id(&self) -> ViewId {
        ViewId::List(self.view)
    }

    async fn refresh(&self, mode: LoadMode) -> bool {
        let generation = {
            let mut st = self.lock();
            if st.torn_down {
                return false;
            }
            st.generation += 1;
            st.load = next_load_state(st.load, mode);
            st.generation
        };

        let result = self.api.list_files(self.view).await;

        let error = {
            let mut st = self.lock();
            if st.torn_down || st.generation != generation {
                tracing::debug!(view = %self.view, generation, "ignoring late response");
                return false;
            }
            st.load = LoadState::Idle;
            match result {
                Ok(rows) => {
                    st.rows = rows;
                    st.loaded = true;
                    return true;
                }
                Err(e) => e,
            }
        };
        self.notifier.error(&error);
        false
    }

    fn teardown(&self) {
        let mut st = self.lock();
        st.torn_down = true;
        st.generation += 1;
        st.load = LoadState::Idle;
    }
}
