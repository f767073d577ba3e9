//! # Sync Adapter Core
//!
//! Control core of a client that periodically syncs local collections with
//! a remote multi-device sync service.
//!
//! This crate provides:
//! - Backoff gating with persisted, jittered windows
//! - Credential resolution and account disabling on the triggering thread
//! - Worker/triggering thread coordination over a one-shot channel
//! - Error classification into parse, I/O and auth statistics
//! - Node-assignment staleness tracking
//! - Account parameter pickling and a connection watchdog
//!
//! ## Architecture
//!
//! The wire protocol is out of scope. A [`SessionEngineFactory`] supplied by
//! the host builds a [`SessionEngine`] for each run; the engine reports back
//! through a [`SessionResultSink`]. The [`SyncController`] owns everything
//! around that: whether to run, what to hand the engine, and what to do with
//! the outcome.
//!
//! ## Key Invariants
//!
//! - A non-forced run never starts inside the backoff window unless the
//!   node assignment is stale
//! - The backoff window only moves forward, except through an explicit set
//! - Exactly one terminal callback ends a run; extras are ignored
//! - Every failure path releases the triggering thread
//! - No worker is started when credentials are unusable

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod account;
mod backoff;
mod clock;
mod config;
mod controller;
mod credentials;
mod engine;
mod error;
mod pickle;
mod policy;
mod request;
mod stage;
mod stats;
mod watchdog;

pub use account::{
    spawn_disable_for_upgrade, Account, AccountStore, ClientRegistration, MemoryAccountStore,
    DEFAULT_ACCOUNT_TYPE, KEY_ACCOUNT_GUID, KEY_CLIENT_NAME, KEY_ENABLE_ON_UPGRADE,
    KEY_NUM_CLIENTS, PRODUCT_NAME,
};
pub use backoff::{BackoffState, BackoffStore, FileBackoffStore, MemoryBackoffStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ControllerConfig, MULTI_DEVICE_INTERVAL, SINGLE_DEVICE_INTERVAL};
pub use controller::{
    CredentialFailure, RunContext, RunOutcome, RunPhase, RunResult, SyncController, SyncHost,
};
pub use credentials::{
    prefs_scope, CredentialProvider, CredentialStatus, Credentials, StaticCredentialProvider,
    GLOBAL_PREFS_SCOPE, PREFS_SCOPE_PREFIX,
};
pub use engine::{
    BasicSessionHandle, ClientIdentity, KeyBundle, SessionEngine, SessionEngineFactory,
    SessionHandle, SessionParameters, SessionResultSink,
};
pub use error::{ErrorClass, SyncError, SyncResult};
pub use pickle::{AccountParameters, AccountPickler, PICKLE_VERSION};
pub use policy::{fuzz_duration, BackoffPolicy};
pub use request::{request_immediate_sync, QueuedRequester, SyncRequest, SyncRequester};
pub use stage::Stage;
pub use stats::{RunCounters, SyncStats};
pub use watchdog::{ConnectionReaper, NoopReaper, Watchdog, WatchdogReport};
