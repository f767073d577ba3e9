//! Backoff state persisted across controller restarts.

mod common;

use common::{ScriptedFactory, Step, DAY_MS, NOW};
use proptest::prelude::*;
use std::sync::Arc;
use syncadapter_core::{
    prefs_scope, Account, BackoffStore, ControllerConfig, Credentials, FileBackoffStore,
    ManualClock, MemoryAccountStore, RunContext, RunOutcome, StaticCredentialProvider,
    SyncController, GLOBAL_PREFS_SCOPE,
};
use tempfile::tempdir;

fn controller(dir: &std::path::Path, store: Arc<FileBackoffStore>, now: i64) -> SyncController {
    let credentials = Arc::new(StaticCredentialProvider::new());
    credentials.insert("alice", Credentials::new("alice", "pw", "key", "https://s/"));
    SyncController::new(
        ControllerConfig::new(dir),
        store,
        credentials,
        Arc::new(MemoryAccountStore::new()),
        Arc::new(ScriptedFactory::new(vec![Step::Unauthorized, Step::Success])),
    )
    .with_clock(Arc::new(ManualClock::new(now)))
}

#[test]
fn window_and_stale_flag_survive_restart() {
    let dir = tempdir().unwrap();

    {
        let store = Arc::new(FileBackoffStore::open(dir.path(), GLOBAL_PREFS_SCOPE).unwrap());
        let result =
            controller(dir.path(), store, NOW).run_sync(RunContext::new(Account::new("alice")));
        assert!(result.is_success());
    }

    let store = Arc::new(FileBackoffStore::open(dir.path(), GLOBAL_PREFS_SCOPE).unwrap());
    assert_eq!(store.earliest_next_sync(), NOW + DAY_MS);
    assert!(store.cluster_url_is_stale());

    store.set_cluster_url_is_stale(false).unwrap();
    let result = controller(dir.path(), store, NOW + 1_000)
        .run_sync(RunContext::new(Account::new("alice")));
    assert!(matches!(result.outcome, RunOutcome::Deferred { .. }));
}

#[test]
fn account_scopes_do_not_share_state() {
    let dir = tempdir().unwrap();
    let alice = FileBackoffStore::open(dir.path(), &prefs_scope("alice", "https://s/")).unwrap();
    let bob = FileBackoffStore::open(dir.path(), &prefs_scope("bob", "https://s/")).unwrap();

    alice.extend_earliest_next_sync(NOW).unwrap();
    assert_eq!(bob.earliest_next_sync(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn persisted_window_is_the_maximum_extension(
        targets in proptest::collection::vec(0i64..1_000_000, 1..12),
    ) {
        let dir = tempdir().unwrap();
        {
            let store = FileBackoffStore::open(dir.path(), "scope").unwrap();
            for &target in &targets {
                store.extend_earliest_next_sync(target).unwrap();
            }
        }
        let reopened = FileBackoffStore::open(dir.path(), "scope").unwrap();
        let expected = targets.iter().copied().max().unwrap_or(0).max(0);
        prop_assert_eq!(reopened.earliest_next_sync(), expected);
    }
}
