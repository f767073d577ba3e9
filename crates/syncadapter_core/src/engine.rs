//! Interfaces between the controller and the session engine.
//!
//! The session engine executes the protocol stages of one run. The
//! controller builds it through a [`SessionEngineFactory`] on the worker
//! thread and observes it only through the [`SessionResultSink`] it hands
//! over. Exactly one of `on_success`, `on_error` or `on_aborted` ends a run;
//! every other callback is informational.

use crate::credentials::{prefs_scope, Credentials};
use crate::error::{SyncError, SyncResult};
use crate::stage::Stage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Username and sync key used to unlock collection keys.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyBundle {
    username: String,
    sync_key: String,
}

impl KeyBundle {
    /// Creates a key bundle.
    pub fn new(username: impl Into<String>, sync_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            sync_key: sync_key.into(),
        }
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the sync key.
    ///
    /// Do not log the result.
    pub fn sync_key(&self) -> &str {
        &self.sync_key
    }
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundle")
            .field("username", &self.username)
            .field("sync_key", &"[REDACTED]")
            .finish()
    }
}

/// Everything a session engine needs to start a run.
#[derive(Clone)]
pub struct SessionParameters {
    /// Storage API version.
    pub server_api_version: String,
    /// Storage server URL.
    pub server_url: String,
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Scope under which the engine persists its configuration.
    pub prefs_scope: String,
    /// Keys for decrypting collection keys.
    pub key_bundle: KeyBundle,
    /// Stages to run, or `None` for all.
    pub stages: Option<Vec<Stage>>,
    /// Host-supplied extras.
    pub extras: HashMap<String, String>,
}

impl SessionParameters {
    /// Builds session parameters from resolved credentials.
    ///
    /// # Errors
    ///
    /// Returns an authentication failure if any credential field needed to
    /// talk to the server is missing or empty.
    pub fn from_credentials(
        server_api_version: impl Into<String>,
        credentials: &Credentials,
        stages: Option<Vec<Stage>>,
        extras: HashMap<String, String>,
    ) -> SyncResult<Self> {
        let username = required(&credentials.username, "username")?;
        let server_url = required(&credentials.server_url, "server URL")?;
        let password = required(&credentials.password, "password")?;
        let sync_key = required(&credentials.sync_key, "sync key")?;

        Ok(Self {
            server_api_version: server_api_version.into(),
            prefs_scope: prefs_scope(username, server_url),
            key_bundle: KeyBundle::new(username, sync_key),
            server_url: server_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            stages,
            extras,
        })
    }

    /// Returns true if `stage` should run.
    pub fn includes(&self, stage: Stage) -> bool {
        self.stages
            .as_ref()
            .is_none_or(|stages| stages.contains(&stage))
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> SyncResult<&'a str> {
    match field.as_deref() {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(SyncError::auth(format!("missing {name}"))),
    }
}

impl Drop for SessionParameters {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl std::fmt::Debug for SessionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParameters")
            .field("server_api_version", &self.server_api_version)
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("prefs_scope", &self.prefs_scope)
            .field("key_bundle", &self.key_bundle)
            .field("stages", &self.stages)
            .field("extras", &self.extras)
            .finish()
    }
}

/// The engine's view of its own session, passed to callbacks.
pub trait SessionHandle: Send + Sync {
    /// Returns the prefs scope the session persists into.
    fn prefs_path(&self) -> &str;

    /// Persists the session configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration could not be written.
    fn persist_config(&self) -> SyncResult<()>;
}

/// A minimal [`SessionHandle`] that counts persist calls.
#[derive(Debug, Default)]
pub struct BasicSessionHandle {
    prefs_path: String,
    persisted: AtomicU64,
    fail_persist: bool,
}

impl BasicSessionHandle {
    /// Creates a handle for `prefs_path`.
    pub fn new(prefs_path: impl Into<String>) -> Self {
        Self {
            prefs_path: prefs_path.into(),
            persisted: AtomicU64::new(0),
            fail_persist: false,
        }
    }

    /// Creates a handle whose `persist_config` always fails.
    pub fn failing(prefs_path: impl Into<String>) -> Self {
        Self {
            fail_persist: true,
            ..Self::new(prefs_path)
        }
    }

    /// Returns how many times the configuration was persisted.
    pub fn persist_count(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }
}

impl SessionHandle for BasicSessionHandle {
    fn prefs_path(&self) -> &str {
        &self.prefs_path
    }

    fn persist_config(&self) -> SyncResult<()> {
        if self.fail_persist {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "prefs are read-only",
            )));
        }
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Receives the outcome and side-channel signals of a session.
pub trait SessionResultSink: Send + Sync {
    /// The run finished successfully. Terminal.
    fn on_success(&self, session: &dyn SessionHandle);

    /// The run failed. Terminal.
    fn on_error(&self, session: &dyn SessionHandle, error: SyncError);

    /// The run was abandoned. Terminal.
    fn on_aborted(&self, session: &dyn SessionHandle, reason: &str);

    /// A stage finished.
    fn on_stage_completed(&self, stage: Stage, session: &dyn SessionHandle);

    /// The server answered 401 for `old_cluster_url`.
    fn inform_unauthorized_response(
        &self,
        session: &dyn SessionHandle,
        old_cluster_url: Option<&str>,
    );

    /// A new node was assigned.
    fn inform_node_assigned(
        &self,
        session: &dyn SessionHandle,
        old_cluster_url: Option<&str>,
        new_cluster_url: &str,
    );

    /// Authentication against a freshly assigned node failed.
    fn inform_node_authentication_failed(
        &self,
        session: &dyn SessionHandle,
        failed_cluster_url: &str,
    );

    /// The server requires a newer client.
    fn inform_upgrade_required_response(&self, session: &dyn SessionHandle);

    /// The server asked for no new run to start for `duration_ms`.
    fn request_backoff(&self, duration_ms: i64);

    /// Returns true if the session should stop early because of backoff.
    fn should_back_off(&self) -> bool;

    /// Returns true if the session must fetch a new node assignment.
    fn want_node_assignment(&self) -> bool;
}

/// Durable identity of this client, as seen by the engine.
pub trait ClientIdentity: Send + Sync {
    /// Returns the client GUID, creating it on first use.
    fn account_guid(&self) -> String;

    /// Returns the client name, defaulting it on first use.
    fn client_name(&self) -> String;

    /// Returns the number of clients on the account.
    fn clients_count(&self) -> u32;

    /// Records the number of clients on the account.
    fn set_clients_count(&self, count: u32);

    /// Returns true if `guid` is this client's GUID.
    fn is_local_guid(&self, guid: &str) -> bool;
}

/// A session engine ready to run.
pub trait SessionEngine: Send {
    /// Runs the session.
    ///
    /// The engine may finish synchronously or hand work to its own threads.
    /// Either way it reports the outcome through the sink it was created
    /// with.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not be started. The controller
    /// then ends the run with that error.
    fn start(self: Box<Self>) -> SyncResult<()>;
}

/// Builds session engines.
pub trait SessionEngineFactory: Send + Sync {
    /// Creates an engine for one run.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be configured.
    fn create(
        &self,
        params: SessionParameters,
        sink: Arc<dyn SessionResultSink>,
        identity: Arc<dyn ClientIdentity>,
    ) -> SyncResult<Box<dyn SessionEngine>>;
}
