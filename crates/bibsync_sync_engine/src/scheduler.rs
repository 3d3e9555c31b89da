//! Sync run scheduling.
//!
//! ## Run lifecycle
//!
//! ```text
//! Idle → Running(0) → Completed
//!                   → Aborted(fatal)
//!                   → Restarting(1) → Running(1) → ...
//! ```
//!
//! Libraries are processed by a bounded pool of scoped worker threads.
//! Actions within one library run sequentially; libraries run concurrently.
//! A non-fatal error is recorded as a warning for its library and ends that
//! library's processing for the run. A fatal error stops every worker from
//! dispatching further actions.

use crate::action::SyncAction;
use crate::config::SyncConfig;
use crate::error::{store_failure, EngineError, EngineResult, SubmissionError};
use crate::executor::{into_sync_error, SyncActionExecutor};
use crate::submission::{Submission, SubmissionBuilder};
use crate::transport::SyncTransport;
use bibsync_store::{
    EntityKind, Library, LibraryId, ReadPendingChanges, ReadPendingDeletions, Store,
};
use bibsync_sync_protocol::{
    classify, ErrorContext, Failure, Fatal, LibraryWarning, SyncError, SyncObject,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a run submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    /// Collections, searches and items.
    Normal,
    /// Collections only.
    CollectionsOnly,
    /// Like `Normal`, but every library is re-baselined up front instead of
    /// restarting the run on a version mismatch.
    Full,
}

impl SyncKind {
    /// Object types submitted, in dependency order.
    pub fn objects(&self) -> &'static [SyncObject] {
        match self {
            SyncKind::Normal | SyncKind::Full => {
                &[SyncObject::Collection, SyncObject::Search, SyncObject::Item]
            }
            SyncKind::CollectionsOnly => &[SyncObject::Collection],
        }
    }
}

/// State of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has started.
    Idle,
    /// A run attempt is in progress.
    Running {
        /// Attempt number, starting at 0.
        attempt: u32,
    },
    /// Waiting to restart after a version mismatch.
    Restarting {
        /// Number of the upcoming attempt.
        attempt: u32,
    },
    /// The last run completed.
    Completed,
    /// The last run was aborted.
    Aborted,
}

impl RunState {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running { .. } | RunState::Restarting { .. })
    }

    /// Returns true if a new run can start from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, RunState::Idle | RunState::Completed | RunState::Aborted)
    }

    /// Returns true if `next` may follow this state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (s, RunState::Running { attempt: 0 }) => s.can_start(),
            (RunState::Restarting { attempt }, RunState::Running { attempt: next }) => *attempt == next,
            (RunState::Running { attempt }, RunState::Restarting { attempt: next }) => next == attempt + 1,
            (RunState::Running { .. }, RunState::Completed | RunState::Aborted) => true,
            (RunState::Restarting { .. }, RunState::Aborted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running { attempt } => write!(f, "running (attempt {attempt})"),
            RunState::Restarting { attempt } => write!(f, "restarting (attempt {attempt})"),
            RunState::Completed => f.write_str("completed"),
            RunState::Aborted => f.write_str("aborted"),
        }
    }
}

/// Outcome of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// The run finished; some libraries may have reported warnings.
    Completed {
        /// Non-fatal errors, by library.
        warnings: Vec<LibraryWarning>,
    },
    /// The run stopped on a fatal error.
    Aborted(Fatal),
}

impl RunReport {
    /// Returns true for completed runs.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunReport::Completed { .. })
    }

    /// Warnings of a completed run.
    pub fn warnings(&self) -> &[LibraryWarning] {
        match self {
            RunReport::Completed { warnings } => warnings,
            RunReport::Aborted(_) => &[],
        }
    }
}

/// Receives run progress.
pub trait SyncObserver: Send + Sync {
    /// Called on every state transition.
    fn state_changed(&self, _libraries: &[LibraryId], _state: RunState) {}

    /// Called once when a run ends.
    fn finished(&self, _report: &RunReport) {}
}

/// Runs in progress, shared between a scheduler and its cancel handles.
#[derive(Debug, Default)]
struct Runs {
    next_id: u64,
    active: BTreeMap<u64, ActiveRun>,
    /// Id and state of the most recently started run.
    latest: Option<(u64, RunState)>,
}

#[derive(Debug)]
struct ActiveRun {
    libraries: Vec<LibraryId>,
    cancelled: Arc<AtomicBool>,
}

impl Runs {
    fn cancel_where(&self, selected: impl Fn(&ActiveRun) -> bool) -> usize {
        let mut count = 0;
        for run in self.active.values().filter(|run| selected(run)) {
            run.cancelled.store(true, Ordering::SeqCst);
            count += 1;
        }
        count
    }
}

/// Cancels runs of the scheduler it was taken from.
///
/// A cancel only reaches runs in progress when it is requested; runs started
/// afterwards are unaffected.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<Mutex<Runs>>);

impl CancelHandle {
    /// Requests cancellation of every run in progress.
    ///
    /// Returns the number of runs cancelled.
    pub fn cancel(&self) -> usize {
        self.0.lock().cancel_where(|_| true)
    }

    /// Requests cancellation of the run syncing `library_id`.
    ///
    /// Returns false if no run in progress covers the library.
    pub fn cancel_library(&self, library_id: LibraryId) -> bool {
        self.0
            .lock()
            .cancel_where(|run| run.libraries.contains(&library_id))
            > 0
    }
}

/// Why a library stopped processing.
#[derive(Debug)]
enum Stop {
    Fatal(Fatal),
    Cancelled,
    Restart,
}

/// Outcome of one run attempt.
enum AttemptOutcome {
    Finished(RunReport),
    Restart,
}

/// Shared accumulator of one run attempt.
#[derive(Default)]
struct Accumulator {
    warnings: Vec<LibraryWarning>,
    fatal: Option<Fatal>,
    restart: bool,
}

/// A claimed run. Releases its libraries when dropped.
struct RunGuard {
    runs: Arc<Mutex<Runs>>,
    id: u64,
    libraries: Vec<LibraryId>,
    cancelled: Arc<AtomicBool>,
}

impl RunGuard {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn publish(&self, state: RunState) {
        let mut runs = self.runs.lock();
        if matches!(runs.latest, Some((id, _)) if id == self.id) {
            runs.latest = Some((self.id, state));
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.lock().active.remove(&self.id);
    }
}

/// One attempt of a run, shared by its workers.
struct RunAttempt<'a> {
    kind: SyncKind,
    attempt: u32,
    run: &'a RunGuard,
    accumulator: Mutex<Accumulator>,
}

/// Schedules sync runs over a set of libraries.
///
/// Runs over disjoint library sets may proceed concurrently; each has its own
/// cancel flag and state.
pub struct SyncScheduler<T: SyncTransport> {
    config: SyncConfig,
    executor: SyncActionExecutor<T>,
    builder: SubmissionBuilder,
    store: Arc<Store>,
    runs: Arc<Mutex<Runs>>,
    observer: Option<Arc<dyn SyncObserver>>,
}

impl<T: SyncTransport> SyncScheduler<T> {
    /// Creates a scheduler.
    pub fn new(config: SyncConfig, transport: Arc<T>, store: Arc<Store>) -> Self {
        Self {
            executor: SyncActionExecutor::new(config.clone(), transport, Arc::clone(&store)),
            builder: SubmissionBuilder::new(Arc::clone(&store)),
            config,
            store,
            runs: Arc::new(Mutex::new(Runs::default())),
            observer: None,
        }
    }

    /// Sets the progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the state of the most recently started run.
    pub fn state(&self) -> RunState {
        self.runs
            .lock()
            .latest
            .map_or(RunState::Idle, |(_, state)| state)
    }

    /// Returns the libraries of every run in progress.
    pub fn active_libraries(&self) -> BTreeSet<LibraryId> {
        self.runs
            .lock()
            .active
            .values()
            .flat_map(|run| run.libraries.iter().copied())
            .collect()
    }

    /// Returns the action executor.
    pub fn executor(&self) -> &SyncActionExecutor<T> {
        &self.executor
    }

    /// Cancels every run in progress.
    pub fn cancel(&self) -> usize {
        self.cancel_handle().cancel()
    }

    /// Cancels the run syncing `library_id`, leaving other runs alone.
    pub fn cancel_library(&self, library_id: LibraryId) -> bool {
        self.cancel_handle().cancel_library(library_id)
    }

    /// Returns a handle that cancels runs from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.runs))
    }

    /// Runs a sync over `libraries`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Busy`] if a run over any of the libraries is
    /// already in progress. Sync failures are reported in the [`RunReport`].
    pub fn run(&self, kind: SyncKind, libraries: &[LibraryId]) -> EngineResult<RunReport> {
        let run = self.claim(libraries)?;
        info!(run = run.id, ?kind, libraries = ?libraries, "sync run started");

        let mut current = RunState::Idle;
        let mut attempt = 0;
        let report = loop {
            self.transition(&run, &mut current, RunState::Running { attempt })?;
            match self.run_attempt(&run, kind, attempt) {
                AttemptOutcome::Finished(report) => break report,
                AttemptOutcome::Restart => {
                    if !self.config.retry.allows_retry(attempt) {
                        warn!(attempt, "version mismatch persists, giving up");
                        break RunReport::Aborted(Fatal::CantResolveConflict);
                    }
                    attempt += 1;
                    self.transition(&run, &mut current, RunState::Restarting { attempt })?;
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "restarting run");
                    std::thread::sleep(delay);
                    if run.is_cancelled() {
                        break RunReport::Aborted(Fatal::Cancelled);
                    }
                }
            }
        };

        let end = if report.is_completed() {
            RunState::Completed
        } else {
            RunState::Aborted
        };
        self.transition(&run, &mut current, end)?;
        match &report {
            RunReport::Completed { warnings } => {
                info!(run = run.id, warnings = warnings.len(), "sync run completed");
            }
            RunReport::Aborted(fatal) => warn!(run = run.id, error = %fatal, "sync run aborted"),
        }
        if let Some(observer) = &self.observer {
            observer.finished(&report);
        }
        Ok(report)
    }

    fn claim(&self, libraries: &[LibraryId]) -> EngineResult<RunGuard> {
        let mut runs = self.runs.lock();
        let busy: Vec<LibraryId> = libraries
            .iter()
            .filter(|id| runs.active.values().any(|run| run.libraries.contains(id)))
            .copied()
            .collect();
        if !busy.is_empty() {
            return Err(EngineError::Busy { libraries: busy });
        }

        let id = runs.next_id;
        runs.next_id += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        runs.active.insert(
            id,
            ActiveRun {
                libraries: libraries.to_vec(),
                cancelled: Arc::clone(&cancelled),
            },
        );
        runs.latest = Some((id, RunState::Idle));
        Ok(RunGuard {
            runs: Arc::clone(&self.runs),
            id,
            libraries: libraries.to_vec(),
            cancelled,
        })
    }

    fn transition(&self, run: &RunGuard, current: &mut RunState, next: RunState) -> EngineResult<()> {
        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        *current = next;
        run.publish(next);
        if let Some(observer) = &self.observer {
            observer.state_changed(&run.libraries, next);
        }
        Ok(())
    }

    fn run_attempt(&self, run: &RunGuard, kind: SyncKind, attempt: u32) -> AttemptOutcome {
        let requested = &run.libraries;
        let libraries: Vec<Library> = requested
            .iter()
            .filter_map(|id| {
                let library = self.store.library(*id);
                if library.is_none() {
                    warn!(library = %id, "library not found, skipping");
                }
                library
            })
            .collect();
        if libraries.is_empty() && !requested.is_empty() {
            return AttemptOutcome::Finished(RunReport::Aborted(Fatal::AllLibrariesFetchFailed));
        }

        let workers = self.config.worker_count.clamp(1, libraries.len().max(1));
        let queue = Mutex::new(libraries.into_iter().collect::<VecDeque<_>>());
        let current = RunAttempt {
            kind,
            attempt,
            run,
            accumulator: Mutex::new(Accumulator::default()),
        };

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.work(&current, &queue));
            }
        });

        let mut accumulator = current.accumulator.into_inner();
        if run.is_cancelled() {
            return AttemptOutcome::Finished(RunReport::Aborted(Fatal::Cancelled));
        }
        if let Some(fatal) = accumulator.fatal {
            return AttemptOutcome::Finished(RunReport::Aborted(fatal));
        }
        if accumulator.restart {
            return AttemptOutcome::Restart;
        }
        accumulator.warnings.sort_by_key(|w| w.library_id);
        AttemptOutcome::Finished(RunReport::Completed {
            warnings: accumulator.warnings,
        })
    }

    /// Worker loop: takes libraries off the queue until it is empty or the run stops.
    fn work(&self, current: &RunAttempt<'_>, queue: &Mutex<VecDeque<Library>>) {
        loop {
            {
                let acc = current.accumulator.lock();
                if current.run.is_cancelled() || acc.fatal.is_some() || acc.restart {
                    return;
                }
            }
            let Some(library) = queue.lock().pop_front() else {
                return;
            };

            let mut warnings = Vec::new();
            let result = self.sync_library(current, &library, &mut warnings);
            let mut acc = current.accumulator.lock();
            acc.warnings.extend(warnings);
            match result {
                Ok(()) => {}
                Err(Stop::Fatal(fatal)) => {
                    warn!(library = %library.id, error = %fatal, "fatal error");
                    acc.fatal.get_or_insert(fatal);
                }
                Err(Stop::Restart) => acc.restart = true,
                Err(Stop::Cancelled) => {}
            }
        }
    }

    fn sync_library(
        &self,
        current: &RunAttempt<'_>,
        library: &Library,
        warnings: &mut Vec<LibraryWarning>,
    ) -> Result<(), Stop> {
        let id = library.id;
        let kind = current.kind;
        debug!(library = %id, attempt = current.attempt, "syncing library");

        if id.is_group() && !library.can_edit_metadata && self.has_pending_writes(id)? {
            return Err(Stop::Fatal(Fatal::MissingGroupPermissions));
        }

        self.check_continue(current)?;
        match self.executor.verify_baseline(id) {
            Ok(_) => {}
            Err(SyncError::NonFatal(e)) if e.is_version_mismatch() && kind == SyncKind::Full => {
                debug!(library = %id, "re-baselined");
            }
            Err(e) => return self.library_failure(id, e, warnings),
        }

        for object in kind.objects() {
            let submission = self
                .builder
                .build_pending(id, *object)
                .map_err(|e| self.fatal_submission(e, id))?;
            for action in self.update_actions(submission) {
                if !self.dispatch(current, &action, warnings)? {
                    return Ok(());
                }
            }
        }

        for object in kind.objects().iter().rev() {
            let keys = self
                .builder
                .pending_deletions(id, *object)
                .map_err(|e| self.fatal_submission(e, id))?;
            for chunk in keys.chunks(self.config.batch_size) {
                let action = SyncAction::SubmitDeletion {
                    library_id: id,
                    object: *object,
                    keys: chunk.to_vec(),
                    since_version: None,
                };
                if !self.dispatch(current, &action, warnings)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Executes and commits one action. Returns `false` if the library
    /// should stop processing because of a non-fatal error.
    fn dispatch(
        &self,
        current: &RunAttempt<'_>,
        action: &SyncAction,
        warnings: &mut Vec<LibraryWarning>,
    ) -> Result<bool, Stop> {
        self.check_continue(current)?;
        let library_id = action.library_id();

        let confirmation = match self.executor.execute(action) {
            Ok(confirmation) => confirmation,
            Err(e) => return self.library_failure(library_id, e, warnings).map(|()| false),
        };
        if current.run.is_cancelled() {
            debug!(library = %library_id, action = action.name(), "discarding result of cancelled run");
            return Err(Stop::Cancelled);
        }
        self.executor.commit(&confirmation).map_err(|e| match e {
            SyncError::Fatal(fatal) => Stop::Fatal(fatal),
            SyncError::NonFatal(other) => Stop::Fatal(Fatal::DbError {
                message: other.to_string(),
            }),
        })?;

        match confirmation.warning() {
            Some(warning) => {
                warnings.push(LibraryWarning {
                    library_id,
                    error: warning.clone(),
                });
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Records a failure scoped to one library.
    fn library_failure(
        &self,
        library_id: LibraryId,
        error: SyncError,
        warnings: &mut Vec<LibraryWarning>,
    ) -> Result<(), Stop> {
        match error {
            SyncError::Fatal(fatal) => Err(Stop::Fatal(fatal)),
            SyncError::NonFatal(e) if e.is_version_mismatch() => {
                info!(library = %library_id, "restarting run on version mismatch");
                Err(Stop::Restart)
            }
            SyncError::NonFatal(e) => {
                warn!(library = %library_id, error = %e, "library warning");
                warnings.push(LibraryWarning { library_id, error: e });
                Ok(())
            }
        }
    }

    fn check_continue(&self, current: &RunAttempt<'_>) -> Result<(), Stop> {
        if current.run.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        if let Some(fatal) = &current.accumulator.lock().fatal {
            debug!(error = %fatal, "run aborted by another library");
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    fn update_actions(&self, submission: Submission) -> Vec<SyncAction> {
        let Submission {
            library_id,
            object,
            parameters,
            change_uuids,
        } = submission;
        parameters
            .chunks(self.config.batch_size)
            .map(|chunk| {
                let chunk_uuids = chunk
                    .iter()
                    .filter_map(|p| p.get("key").and_then(|k| k.as_str()))
                    .filter_map(|k| change_uuids.get_key_value(k))
                    .map(|(k, ids)| (k.clone(), ids.clone()))
                    .collect();
                SyncAction::SubmitUpdate {
                    library_id,
                    object,
                    parameters: chunk.to_vec(),
                    change_uuids: chunk_uuids,
                    since_version: None,
                    update_library_version: true,
                }
            })
            .collect()
    }

    fn has_pending_writes(&self, library_id: LibraryId) -> Result<bool, Stop> {
        let kinds = vec![
            EntityKind::Item,
            EntityKind::Attachment,
            EntityKind::Collection,
            EntityKind::Search,
        ];
        self.store
            .perform(|txn| {
                let changed = txn.perform(ReadPendingChanges {
                    library_id,
                    kinds: kinds.clone(),
                })?;
                let deleted = txn.perform(ReadPendingDeletions { library_id, kinds })?;
                Ok(!changed.is_empty() || !deleted.is_empty())
            })
            .map_err(|e| self.fatal_store(&e, library_id))
    }

    fn fatal_store(&self, err: &bibsync_store::StoreError, library_id: LibraryId) -> Stop {
        let context = ErrorContext::library(library_id, self.config.api_base_url.clone());
        match into_sync_error(classify(Failure::Local(store_failure(err)), &context), library_id) {
            SyncError::Fatal(fatal) => Stop::Fatal(fatal),
            SyncError::NonFatal(other) => Stop::Fatal(Fatal::DbError {
                message: other.to_string(),
            }),
        }
    }

    fn fatal_submission(&self, err: SubmissionError, library_id: LibraryId) -> Stop {
        match err {
            SubmissionError::Store(e) => self.fatal_store(&e, library_id),
            other => Stop::Fatal(Fatal::DbError {
                message: other.to_string(),
            }),
        }
    }
}

impl<T: SyncTransport> fmt::Debug for SyncScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("state", &self.state())
            .field("active", &self.active_libraries())
            .field("worker_count", &self.config.worker_count)
            .finish()
    }
}
