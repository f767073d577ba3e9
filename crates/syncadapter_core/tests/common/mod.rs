//! Scripted session engine shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use syncadapter_core::{
    Account, BasicSessionHandle, ClientIdentity, ControllerConfig, Credentials, ManualClock,
    MemoryAccountStore, MemoryBackoffStore, SessionEngine, SessionEngineFactory,
    SessionParameters, SessionResultSink, Stage, StaticCredentialProvider, SyncController,
    SyncError, SyncResult,
};
use tempfile::TempDir;

/// One scripted engine action.
#[derive(Clone, Copy)]
pub enum Step {
    Stage(Stage),
    Success,
    Error(fn() -> SyncError),
    Abort(&'static str),
    Unauthorized,
    NodeAssigned,
    NodeAuthFailed,
    UpgradeRequired,
    Backoff(i64),
    SetClients(u32),
    Sleep(Duration),
    Panic,
    ReturnErr(fn() -> SyncError),
}

/// Builds engines that replay a script.
#[derive(Default)]
pub struct ScriptedFactory {
    script: Mutex<Vec<Step>>,
    on_own_thread: bool,
    fail_create: Option<fn() -> SyncError>,
    pub created: Mutex<Vec<SessionParameters>>,
}

impl ScriptedFactory {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Replays the script on a thread owned by the engine.
    pub fn threaded(script: Vec<Step>) -> Self {
        Self {
            on_own_thread: true,
            ..Self::new(script)
        }
    }

    pub fn failing(error: fn() -> SyncError) -> Self {
        Self {
            fail_create: Some(error),
            ..Self::default()
        }
    }

    pub fn set_script(&self, script: Vec<Step>) {
        *self.script.lock() = script;
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().len()
    }
}

struct ScriptedEngine {
    script: Vec<Step>,
    sink: Arc<dyn SessionResultSink>,
    identity: Arc<dyn ClientIdentity>,
    prefs: String,
    on_own_thread: bool,
}

impl ScriptedEngine {
    fn replay(self) -> SyncResult<()> {
        let handle = BasicSessionHandle::new(self.prefs.clone());
        for step in self.script {
            match step {
                Step::Stage(stage) => self.sink.on_stage_completed(stage, &handle),
                Step::Success => self.sink.on_success(&handle),
                Step::Error(make) => self.sink.on_error(&handle, make()),
                Step::Abort(reason) => self.sink.on_aborted(&handle, reason),
                Step::Unauthorized => self
                    .sink
                    .inform_unauthorized_response(&handle, Some("https://node1.example/")),
                Step::NodeAssigned => self.sink.inform_node_assigned(
                    &handle,
                    Some("https://node1.example/"),
                    "https://node2.example/",
                ),
                Step::NodeAuthFailed => self
                    .sink
                    .inform_node_authentication_failed(&handle, "https://node2.example/"),
                Step::UpgradeRequired => self.sink.inform_upgrade_required_response(&handle),
                Step::Backoff(ms) => self.sink.request_backoff(ms),
                Step::SetClients(count) => self.identity.set_clients_count(count),
                Step::Sleep(duration) => thread::sleep(duration),
                Step::Panic => panic!("scripted engine panic"),
                Step::ReturnErr(make) => return Err(make()),
            }
        }
        Ok(())
    }
}

impl SessionEngine for ScriptedEngine {
    fn start(self: Box<Self>) -> SyncResult<()> {
        if self.on_own_thread {
            thread::spawn(move || {
                let _ = self.replay();
            });
            return Ok(());
        }
        self.replay()
    }
}

impl SessionEngineFactory for ScriptedFactory {
    fn create(
        &self,
        params: SessionParameters,
        sink: Arc<dyn SessionResultSink>,
        identity: Arc<dyn ClientIdentity>,
    ) -> SyncResult<Box<dyn SessionEngine>> {
        if let Some(make) = self.fail_create {
            return Err(make());
        }
        let prefs = params.prefs_scope.clone();
        self.created.lock().push(params);
        Ok(Box::new(ScriptedEngine {
            script: self.script.lock().clone(),
            sink,
            identity,
            prefs,
            on_own_thread: self.on_own_thread,
        }))
    }
}

/// A controller wired to in-memory collaborators.
pub struct Harness {
    pub dir: TempDir,
    pub controller: SyncController,
    pub store: Arc<MemoryBackoffStore>,
    pub clock: Arc<ManualClock>,
    pub credentials: Arc<StaticCredentialProvider>,
    pub accounts: Arc<MemoryAccountStore>,
    pub factory: Arc<ScriptedFactory>,
    pub account: Account,
}

pub const NOW: i64 = 1_700_000_000_000;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const FIVE_MIN_MS: i64 = 5 * 60 * 1000;

impl Harness {
    pub fn new(factory: ScriptedFactory) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryBackoffStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let credentials = Arc::new(StaticCredentialProvider::new());
        let accounts = Arc::new(MemoryAccountStore::new());
        let factory = Arc::new(factory);
        let config = ControllerConfig::new(dir.path())
            .with_watchdog(Duration::from_millis(5), Duration::from_secs(30));

        let controller = SyncController::new(
            config,
            store.clone(),
            credentials.clone(),
            accounts.clone(),
            factory.clone(),
        )
        .with_clock(clock.clone());

        let account = Account::new("alice@example.com");
        credentials.insert(
            account.name.clone(),
            Credentials::new(
                "alice@example.com",
                "hunter2",
                "abcde-fghij-klmno",
                "https://sync.example/",
            ),
        );

        Self {
            dir,
            controller,
            store,
            clock,
            credentials,
            accounts,
            factory,
            account,
        }
    }

    pub fn scripted(script: Vec<Step>) -> Self {
        Self::new(ScriptedFactory::new(script))
    }
}
