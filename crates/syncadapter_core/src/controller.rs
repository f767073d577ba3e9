//! The sync session controller.
//!
//! A run moves through [`RunPhase`]s on the triggering thread:
//!
//! ```text
//! Idle → Gated → CredentialResolution → Running → Completing → Idle
//!          │              │
//!          └─ Deferred    └─ CredentialFailure
//! ```
//!
//! In `Running` the controller spawns one worker thread that builds and
//! starts the session engine, and one watchdog thread, then blocks on a
//! one-shot channel. The sending half lives only in the run's sink, so the
//! channel is released either by the first terminal callback or by the sink
//! being dropped.

use crate::account::{spawn_disable_for_upgrade, Account, AccountStore, ClientRegistration};
use crate::backoff::BackoffStore;
use crate::clock::{Clock, SystemClock};
use crate::config::ControllerConfig;
use crate::credentials::{CredentialProvider, CredentialStatus, Credentials};
use crate::engine::{
    ClientIdentity, SessionEngineFactory, SessionHandle, SessionParameters, SessionResultSink,
};
use crate::error::{SyncError, SyncResult};
use crate::pickle::{AccountParameters, AccountPickler, PICKLE_VERSION};
use crate::policy::BackoffPolicy;
use crate::stage::Stage;
use crate::stats::{RunCounters, SyncStats};
use crate::watchdog::{ConnectionReaper, NoopReaper, Watchdog};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Phase of a run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// No run in progress.
    Idle,
    /// Checking the backoff window.
    Gated,
    /// Resolving credentials on the triggering thread.
    CredentialResolution,
    /// Worker and watchdog running; waiting for a terminal callback.
    Running,
    /// Updating backoff and joining background work.
    Completing,
}

/// Why credential resolution ended a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialFailure {
    /// The provider returned an error.
    Provider(String),
    /// The account has no credentials.
    Missing,
    /// Every credential field is blank; automatic sync was disabled.
    Blank,
    /// The password is missing.
    MissingPassword,
    /// The sync key is missing.
    MissingSyncKey,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The backoff window is open; try again after `delay_until_secs`.
    Deferred {
        /// Seconds until the host should retry, including the pad.
        delay_until_secs: u64,
    },
    /// Another run is in progress on this controller.
    AlreadyRunning,
    /// Credentials were unusable; no worker was started.
    CredentialFailure(CredentialFailure),
    /// The engine reported success.
    Succeeded,
    /// The engine or worker reported an error.
    Failed {
        /// Rendered error.
        error: String,
    },
    /// The engine abandoned the run.
    Aborted {
        /// Reason given by the engine.
        reason: String,
    },
    /// The engine went away without reporting an outcome.
    EngineVanished,
}

/// Result of [`SyncController::run_sync`].
#[derive(Debug, Clone)]
pub struct RunResult {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Error statistics.
    pub stats: SyncStats,
    /// Stages the engine reported as completed, in order.
    pub stages_completed: Vec<Stage>,
    /// Whether the host asked to cancel while the run was in flight.
    pub cancel_requested: bool,
    /// Earliest next sync after this run, in epoch milliseconds.
    pub next_sync_millis: i64,
    /// Wall time spent in `run_sync`.
    pub duration: Duration,
}

impl RunResult {
    /// Returns true if the engine reported success.
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Returns the retry delay for a deferred run.
    pub fn delay_until_secs(&self) -> Option<u64> {
        match self.outcome {
            RunOutcome::Deferred { delay_until_secs } => Some(delay_until_secs),
            _ => None,
        }
    }
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Account to sync.
    pub account: Account,
    /// Whether the user asked for this run; forced runs ignore backoff.
    pub forced: bool,
    /// Stages to run, or `None` for all.
    pub stages: Option<Vec<Stage>>,
    /// Host extras passed through to the engine.
    pub extras: HashMap<String, String>,
}

impl RunContext {
    /// Creates a scheduled (non-forced) run for `account`.
    pub fn new(account: Account) -> Self {
        Self {
            account,
            forced: false,
            stages: None,
            extras: HashMap::new(),
        }
    }

    /// Marks the run as forced.
    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// Limits the run to `stages`.
    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Adds a host extra.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

impl From<crate::request::SyncRequest> for RunContext {
    fn from(request: crate::request::SyncRequest) -> Self {
        Self {
            account: request.account,
            forced: request.manual,
            stages: request.stages,
            extras: HashMap::new(),
        }
    }
}

/// Host-side scheduler hooks.
pub trait SyncHost: Send + Sync {
    /// Returns false to skip the run entirely.
    fn should_run(&self) -> bool {
        true
    }

    /// Called with the result of every run that was attempted.
    fn on_run_complete(&self, result: &RunResult);
}

/// Message on the completion channel.
#[derive(Debug)]
enum Terminal {
    Succeeded,
    Failed(String),
    Aborted(String),
}

/// Per-run state owned by the triggering thread.
struct RunState {
    phase: RunPhase,
    forced: bool,
    started: Instant,
    account: Option<Account>,
    counters: Arc<RunCounters>,
    stages: Arc<Mutex<Vec<Stage>>>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel: Arc<AtomicBool>,
}

impl RunState {
    fn new(ctx: &RunContext) -> Self {
        Self {
            phase: RunPhase::Idle,
            forced: ctx.forced,
            started: Instant::now(),
            account: Some(ctx.account.clone()),
            counters: Arc::new(RunCounters::new()),
            stages: Arc::new(Mutex::new(Vec::new())),
            background: Arc::new(Mutex::new(Vec::new())),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
    }

    fn join_background(&self) {
        let handles = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("background task panicked");
            }
        }
    }
}

/// Receives engine callbacks for one run.
///
/// Holds the only sender of the completion channel. Dropping the last
/// reference without a terminal callback disconnects the channel.
struct RunSink {
    policy: Arc<BackoffPolicy>,
    accounts: Arc<dyn AccountStore>,
    account: Option<Account>,
    forced: bool,
    counters: Arc<RunCounters>,
    stages: Arc<Mutex<Vec<Stage>>>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
    sender: Mutex<Option<SyncSender<Terminal>>>,
}

impl RunSink {
    fn finish(&self, terminal: Terminal) {
        match self.sender.lock().take() {
            Some(sender) => {
                tracing::trace!(?terminal, "notifying controller");
                let _ = sender.send(terminal);
            }
            None => tracing::warn!(?terminal, "ignoring terminal callback after the run ended"),
        }
    }

    /// Records `error` and ends the run with it.
    ///
    /// Errors reported after the run ended are logged but not counted.
    fn fail(&self, error: SyncError) {
        let Some(sender) = self.sender.lock().take() else {
            tracing::warn!(error = %error, "ignoring error reported after the run ended");
            return;
        };
        let class = self.counters.record(&error);
        if error.is_unclassified() {
            tracing::error!(
                error = %error,
                details = ?error,
                ?class,
                "aborting sync on unclassified failure"
            );
        } else {
            tracing::error!(error = %error, ?class, "aborting sync");
        }
        let _ = sender.send(Terminal::Failed(error.to_string()));
    }

    fn push_background(&self, handle: JoinHandle<()>) {
        self.background.lock().push(handle);
    }
}

impl SessionResultSink for RunSink {
    fn on_success(&self, session: &dyn SessionHandle) {
        tracing::info!("session indicated success");
        tracing::debug!(prefs = session.prefs_path(), "persisting session config");
        if let Err(e) = session.persist_config() {
            tracing::warn!(error = %e, "failed to persist session config");
        }
        self.finish(Terminal::Succeeded);
    }

    fn on_error(&self, _session: &dyn SessionHandle, error: SyncError) {
        tracing::info!("session indicated error");
        self.fail(error);
    }

    fn on_aborted(&self, _session: &dyn SessionHandle, reason: &str) {
        tracing::warn!(reason, "sync aborted");
        self.finish(Terminal::Aborted(reason.to_string()));
    }

    fn on_stage_completed(&self, stage: Stage, _session: &dyn SessionHandle) {
        tracing::trace!(%stage, "stage completed");
        self.stages.lock().push(stage);
    }

    fn inform_unauthorized_response(
        &self,
        _session: &dyn SessionHandle,
        old_cluster_url: Option<&str>,
    ) {
        tracing::info!(old_cluster_url, "unauthorized; node assignment is stale");
        self.policy.mark_node_stale();
    }

    fn inform_node_assigned(
        &self,
        _session: &dyn SessionHandle,
        old_cluster_url: Option<&str>,
        new_cluster_url: &str,
    ) {
        tracing::info!(old_cluster_url, new_cluster_url, "node assigned");
        self.policy.clear_node_stale();
    }

    fn inform_node_authentication_failed(
        &self,
        _session: &dyn SessionHandle,
        failed_cluster_url: &str,
    ) {
        tracing::warn!(failed_cluster_url, "node authentication failed");
        self.policy.clear_node_stale();
    }

    fn inform_upgrade_required_response(&self, _session: &dyn SessionHandle) {
        let Some(account) = self.account.clone() else {
            tracing::warn!("upgrade required but no account to disable");
            return;
        };
        tracing::warn!(account = %account.name, "upgrade required; disabling automatic sync");
        match spawn_disable_for_upgrade(self.accounts.clone(), account) {
            Ok(handle) => self.push_background(handle),
            Err(e) => tracing::warn!(error = %e, "failed to spawn account update"),
        }
    }

    fn request_backoff(&self, duration_ms: i64) {
        self.policy.request_backoff(duration_ms);
    }

    fn should_back_off(&self) -> bool {
        self.policy.should_back_off(self.forced)
    }

    fn want_node_assignment(&self) -> bool {
        self.policy.want_node_assignment()
    }
}

impl Drop for RunSink {
    fn drop(&mut self) {
        if self.sender.get_mut().is_some() {
            tracing::warn!("session engine released the run without reporting an outcome");
        }
    }
}

/// Inputs the worker thread needs.
struct WorkerTask {
    factory: Arc<dyn SessionEngineFactory>,
    sink: Arc<RunSink>,
    registration: Arc<ClientRegistration>,
    accounts: Arc<dyn AccountStore>,
    pickler: AccountPickler,
    account: Account,
    credentials: Credentials,
    server_api_version: String,
    stages: Option<Vec<Stage>>,
    extras: HashMap<String, String>,
}

impl WorkerTask {
    fn run(self) {
        let sink = self.sink.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.start_engine()));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => sink.fail(e),
            Err(payload) => sink.fail(SyncError::WorkerPanicked(panic_message(payload.as_ref()))),
        }
    }

    fn start_engine(self) -> SyncResult<()> {
        tracing::trace!("performing sync");
        self.pickle_account();

        let params = SessionParameters::from_credentials(
            self.server_api_version,
            &self.credentials,
            self.stages,
            self.extras,
        )?;
        let sink: Arc<dyn SessionResultSink> = self.sink;
        let identity: Arc<dyn ClientIdentity> = self.registration;
        let engine = self.factory.create(params, sink, identity)?;
        engine.start()
    }

    fn pickle_account(&self) {
        let (Some(password), Some(sync_key), Some(server_url)) = (
            self.credentials.password.as_ref(),
            self.credentials.sync_key.as_ref(),
            self.credentials.server_url.as_ref(),
        ) else {
            return;
        };
        let params = AccountParameters {
            account_name: self.account.name.clone(),
            sync_key: sync_key.clone(),
            password: password.clone(),
            server_url: server_url.clone(),
            cluster_url: None,
            client_name: self.registration.client_name(),
            client_guid: self.registration.account_guid(),
            sync_automatically: self.accounts.sync_automatically(&self.account),
            version: PICKLE_VERSION,
        };
        match self.pickler.pickle_in_background(params) {
            Ok(handle) => self.sink.push_background(handle),
            Err(e) => tracing::warn!(error = %e, "failed to spawn account pickler"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Clears the running flag when a run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Coordinates sync runs for one host.
pub struct SyncController {
    config: ControllerConfig,
    store: Arc<dyn BackoffStore>,
    policy: Arc<BackoffPolicy>,
    credentials: Arc<dyn CredentialProvider>,
    accounts: Arc<dyn AccountStore>,
    factory: Arc<dyn SessionEngineFactory>,
    reaper: Arc<dyn ConnectionReaper>,
    pickler: AccountPickler,
    running: AtomicBool,
    cancel: Mutex<Option<Arc<AtomicBool>>>,
}

impl SyncController {
    /// Creates a controller using the system clock and no connection reaper.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn BackoffStore>,
        credentials: Arc<dyn CredentialProvider>,
        accounts: Arc<dyn AccountStore>,
        factory: Arc<dyn SessionEngineFactory>,
    ) -> Self {
        let policy = Arc::new(BackoffPolicy::new(store.clone(), Arc::new(SystemClock), &config));
        let pickler = AccountPickler::new(config.pickle_path());
        Self {
            config,
            store,
            policy,
            credentials,
            accounts,
            factory,
            reaper: Arc::new(NoopReaper),
            pickler,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.policy = Arc::new(BackoffPolicy::new(self.store.clone(), clock, &self.config));
        self
    }

    /// Replaces the connection reaper driven by the watchdog.
    pub fn with_reaper(mut self, reaper: Arc<dyn ConnectionReaper>) -> Self {
        self.reaper = reaper;
        self
    }

    /// Returns the backoff policy.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Returns true while a run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Records a cancellation request for the current run.
    ///
    /// The worker is not interrupted; the request is logged and reported in
    /// [`RunResult::cancel_requested`].
    pub fn on_sync_canceled(&self) {
        match self.cancel.lock().as_ref() {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                tracing::info!("sync cancel requested");
            }
            None => tracing::debug!("sync cancel requested with no run in progress"),
        }
    }

    /// Runs the sync if `host` allows it and reports the result back.
    pub fn perform_sync(&self, host: &dyn SyncHost, ctx: RunContext) -> Option<RunResult> {
        if !host.should_run() {
            tracing::debug!(account = %ctx.account.name, "host declined sync");
            return None;
        }
        let result = self.run_sync(ctx);
        host.on_run_complete(&result);
        Some(result)
    }

    /// Runs one sync on the calling thread, blocking until it ends.
    ///
    /// Never panics and never returns an error; every failure is folded into
    /// the returned [`RunResult`].
    pub fn run_sync(&self, ctx: RunContext) -> RunResult {
        let mut state = RunState::new(&ctx);

        if self.running.swap(true, Ordering::AcqRel) {
            tracing::warn!(account = %ctx.account.name, "sync already in progress");
            return self.result(&state, RunOutcome::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        state.enter(RunPhase::Gated);
        if let Some(outcome) = self.gate(&state) {
            return self.result(&state, outcome);
        }

        let registration = Arc::new(ClientRegistration::new(
            self.accounts.clone(),
            ctx.account.clone(),
        ));
        tracing::info!(
            account = %ctx.account.name,
            client_name = %registration.client_name(),
            client_guid = %registration.account_guid(),
            clients = registration.clients_count(),
            forced = ctx.forced,
            "syncing account"
        );

        state.enter(RunPhase::CredentialResolution);
        let credentials = match self.resolve_credentials(&mut state) {
            Ok(credentials) => credentials,
            Err(failure) => {
                let clients = state.account.as_ref().map(|_| registration.clients_count());
                self.policy.extend_by(self.policy.sync_interval(clients));
                state.enter(RunPhase::Idle);
                return self.result(&state, RunOutcome::CredentialFailure(failure));
            }
        };

        state.enter(RunPhase::Running);
        let outcome = self.run_worker(&state, ctx, registration.clone(), credentials);

        state.enter(RunPhase::Completing);
        self.cancel.lock().take();
        let interval = self.policy.sync_interval(Some(registration.clients_count()));
        self.policy.extend_by(interval);
        state.join_background();
        let result = self.result(&state, outcome);
        tracing::info!(
            outcome = ?result.outcome,
            next_sync = result.next_sync_millis,
            interval_ms = interval.as_millis() as u64,
            took_ms = result.duration.as_millis() as u64,
            "sync finished"
        );
        state.enter(RunPhase::Idle);
        result
    }

    fn gate(&self, state: &RunState) -> Option<RunOutcome> {
        let delay = self.policy.delay_millis();
        if delay <= 0 {
            return None;
        }
        if self.policy.should_back_off(state.forced) {
            tracing::info!(delay_ms = delay, "not syncing: backoff window open");
            let delay_until_secs = (delay / 1000) as u64 + self.config.backoff_pad.as_secs();
            return Some(RunOutcome::Deferred { delay_until_secs });
        }
        if state.forced {
            tracing::info!(delay_ms = delay, "forced sync: overruling remaining backoff");
        } else {
            tracing::info!(delay_ms = delay, "node assignment wanted: ignoring remaining backoff");
        }
        None
    }

    fn resolve_credentials(&self, state: &mut RunState) -> Result<Credentials, CredentialFailure> {
        let Some(account) = state.account.clone() else {
            state.counters.record_auth_error();
            return Err(CredentialFailure::Missing);
        };

        let credentials = match self.credentials.resolve_credentials(&account) {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                tracing::error!(account = %account.name, "no account parameters: aborting sync");
                state.counters.record_auth_error();
                return Err(CredentialFailure::Missing);
            }
            Err(e) => {
                let class = state.counters.record(&e);
                tracing::error!(error = %e, ?class, "credential lookup failed: aborting sync");
                return Err(CredentialFailure::Provider(e.to_string()));
            }
        };

        tracing::debug!(
            credentials = %credentials.describe(self.config.log_personal_information),
            "resolved credentials"
        );

        match credentials.status() {
            CredentialStatus::Complete => Ok(credentials),
            CredentialStatus::Blank => {
                tracing::error!(
                    account = %account.name,
                    "no credentials attached to account: disabling"
                );
                if let Err(e) = self.accounts.set_sync_automatically(&account, false) {
                    tracing::error!(
                        error = %e,
                        account = %account.name,
                        "unable to disable account"
                    );
                }
                state.counters.record_auth_error();
                state.account = None;
                Err(CredentialFailure::Blank)
            }
            CredentialStatus::MissingPassword => {
                tracing::error!("no password: aborting sync");
                state.counters.record_auth_error();
                Err(CredentialFailure::MissingPassword)
            }
            CredentialStatus::MissingSyncKey => {
                tracing::error!("no sync key: aborting sync");
                state.counters.record_auth_error();
                Err(CredentialFailure::MissingSyncKey)
            }
        }
    }

    fn run_worker(
        &self,
        state: &RunState,
        ctx: RunContext,
        registration: Arc<ClientRegistration>,
        credentials: Credentials,
    ) -> RunOutcome {
        *self.cancel.lock() = Some(state.cancel.clone());

        let (sender, completion) = mpsc::sync_channel::<Terminal>(1);
        let sink = Arc::new(RunSink {
            policy: self.policy.clone(),
            accounts: self.accounts.clone(),
            account: state.account.clone(),
            forced: state.forced,
            counters: state.counters.clone(),
            stages: state.stages.clone(),
            background: state.background.clone(),
            sender: Mutex::new(Some(sender)),
        });

        let task = WorkerTask {
            factory: self.factory.clone(),
            sink,
            registration,
            accounts: self.accounts.clone(),
            pickler: self.pickler.clone(),
            account: ctx.account,
            credentials,
            server_api_version: self.config.server_api_version.clone(),
            stages: ctx.stages,
            extras: ctx.extras,
        };

        let spawned = thread::Builder::new()
            .name("sync-worker".into())
            .spawn(move || task.run());
        if let Err(e) = spawned {
            let error = SyncError::Io(e);
            state.counters.record(&error);
            tracing::error!(error = %error, "failed to start sync worker");
            return RunOutcome::Failed {
                error: error.to_string(),
            };
        }

        let watchdog = match Watchdog::start(
            self.reaper.clone(),
            self.config.watchdog_interval,
            self.config.idle_connection_timeout,
            state.cancel.clone(),
        ) {
            Ok(watchdog) => Some(watchdog),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start connection watchdog");
                None
            }
        };

        tracing::trace!("waiting on completion channel");
        let outcome = match completion.recv() {
            Ok(Terminal::Succeeded) => RunOutcome::Succeeded,
            Ok(Terminal::Failed(error)) => RunOutcome::Failed { error },
            Ok(Terminal::Aborted(reason)) => RunOutcome::Aborted { reason },
            Err(_) => {
                state.counters.record_io_error();
                tracing::error!("session engine ended without an outcome");
                RunOutcome::EngineVanished
            }
        };

        if let Some(watchdog) = watchdog {
            let report = watchdog.shutdown();
            tracing::debug!(sweeps = report.sweeps, "watchdog stopped");
        }
        outcome
    }

    fn result(&self, state: &RunState, outcome: RunOutcome) -> RunResult {
        RunResult {
            outcome,
            stats: state.counters.snapshot(),
            stages_completed: state.stages.lock().clone(),
            cancel_requested: state.cancel.load(Ordering::Acquire),
            next_sync_millis: self.store.earliest_next_sync(),
            duration: state.started.elapsed(),
        }
    }
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MemoryAccountStore;
    use crate::backoff::MemoryBackoffStore;
    use crate::clock::ManualClock;
    use crate::credentials::StaticCredentialProvider;
    use crate::engine::{BasicSessionHandle, SessionEngine};
    use tempfile::{tempdir, TempDir};

    /// Engine that reports success synchronously.
    struct SucceedingFactory;

    struct SucceedingEngine {
        sink: Arc<dyn SessionResultSink>,
    }

    impl SessionEngine for SucceedingEngine {
        fn start(self: Box<Self>) -> SyncResult<()> {
            let handle = BasicSessionHandle::new("sync.prefs.test");
            self.sink.on_stage_completed(Stage::SyncBookmarks, &handle);
            self.sink.on_success(&handle);
            Ok(())
        }
    }

    impl SessionEngineFactory for SucceedingFactory {
        fn create(
            &self,
            _params: SessionParameters,
            sink: Arc<dyn SessionResultSink>,
            _identity: Arc<dyn ClientIdentity>,
        ) -> SyncResult<Box<dyn SessionEngine>> {
            Ok(Box::new(SucceedingEngine { sink }))
        }
    }

    struct Fixture {
        dir: TempDir,
        controller: SyncController,
        store: Arc<MemoryBackoffStore>,
        creds: Arc<StaticCredentialProvider>,
    }

    fn fixture(now: i64) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryBackoffStore::new());
        let creds = Arc::new(StaticCredentialProvider::new());
        let controller = SyncController::new(
            ControllerConfig::new(dir.path()),
            store.clone(),
            creds.clone(),
            Arc::new(MemoryAccountStore::new()),
            Arc::new(SucceedingFactory),
        )
        .with_clock(Arc::new(ManualClock::new(now)));
        Fixture {
            dir,
            controller,
            store,
            creds,
        }
    }

    #[test]
    fn deferred_run_reports_padded_delay() {
        let Fixture {
            controller,
            store,
            ..
        } = fixture(1_000);
        store.set_earliest_next_sync(31_500).unwrap();

        let result = controller.run_sync(RunContext::new(Account::new("alice")));
        assert_eq!(result.delay_until_secs(), Some(30 + 5));
        assert_eq!(store.earliest_next_sync(), 31_500);
        assert!(!result.stats.has_errors());
        assert!(!controller.is_running());
    }

    #[test]
    fn success_extends_by_single_device_interval() {
        let Fixture {
            dir,
            controller,
            store,
            creds,
        } = fixture(0);
        creds.insert("alice", Credentials::new("alice", "pw", "key", "https://s"));

        let result = controller.run_sync(RunContext::new(Account::new("alice")));
        assert!(result.is_success());
        assert_eq!(result.stages_completed, vec![Stage::SyncBookmarks]);
        assert_eq!(store.earliest_next_sync(), 86_400_000);
        assert_eq!(result.next_sync_millis, 86_400_000);
        assert!(dir.path().join("sync.account.json").exists());
    }

    #[test]
    fn missing_credentials_count_as_auth_error() {
        let Fixture {
            controller,
            store,
            ..
        } = fixture(0);
        let result = controller.run_sync(RunContext::new(Account::new("nobody")));
        assert_eq!(
            result.outcome,
            RunOutcome::CredentialFailure(CredentialFailure::Missing)
        );
        assert_eq!(result.stats.auth_errors, 1);
        assert_eq!(store.earliest_next_sync(), 86_400_000);
    }

    #[test]
    fn panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn cancel_without_run_is_harmless() {
        let Fixture { controller, .. } = fixture(0);
        controller.on_sync_canceled();
        assert!(!controller.is_running());
    }
}
