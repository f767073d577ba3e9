//! Accounts, per-account user data, and the durable client registration.

use crate::engine::ClientIdentity;
use crate::error::SyncResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use syncadapter_repository::Guid;

/// User-data key holding the client GUID.
pub const KEY_ACCOUNT_GUID: &str = "account.guid";
/// User-data key holding the client name.
pub const KEY_CLIENT_NAME: &str = "account.clientName";
/// User-data key holding the number of clients on the account.
pub const KEY_NUM_CLIENTS: &str = "account.numClients";
/// User-data key set to "1" when sync was disabled pending an upgrade.
pub const KEY_ENABLE_ON_UPGRADE: &str = "account.enableOnUpgrade";

/// Account type used when none is given.
pub const DEFAULT_ACCOUNT_TYPE: &str = "org.syncadapter.sync";

/// Product name used in default client names.
pub const PRODUCT_NAME: &str = "syncadapter";

/// A host account that sync runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Account {
    /// Account name, usually an email address.
    pub name: String,
    /// Host account type.
    pub account_type: String,
}

impl Account {
    /// Creates an account of the default type.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_type(name, DEFAULT_ACCOUNT_TYPE)
    }

    /// Creates an account of `account_type`.
    pub fn with_type(name: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_type: account_type.into(),
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.account_type)
    }
}

/// Host storage for per-account settings.
pub trait AccountStore: Send + Sync {
    /// Returns the user-data value for `key`.
    fn user_data(&self, account: &Account, key: &str) -> Option<String>;

    /// Stores a user-data value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be stored.
    fn set_user_data(&self, account: &Account, key: &str, value: &str) -> SyncResult<()>;

    /// Enables or disables automatic sync for `account`.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting could not be stored.
    fn set_sync_automatically(&self, account: &Account, enabled: bool) -> SyncResult<()>;

    /// Returns whether automatic sync is enabled for `account`.
    fn sync_automatically(&self, account: &Account) -> bool;
}

/// An in-memory account store.
///
/// Automatic sync defaults to enabled.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    user_data: Mutex<HashMap<(Account, String), String>>,
    auto_sync: Mutex<HashMap<Account, bool>>,
}

impl MemoryAccountStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn user_data(&self, account: &Account, key: &str) -> Option<String> {
        self.user_data
            .lock()
            .get(&(account.clone(), key.to_string()))
            .cloned()
    }

    fn set_user_data(&self, account: &Account, key: &str, value: &str) -> SyncResult<()> {
        self.user_data
            .lock()
            .insert((account.clone(), key.to_string()), value.to_string());
        Ok(())
    }

    fn set_sync_automatically(&self, account: &Account, enabled: bool) -> SyncResult<()> {
        self.auto_sync.lock().insert(account.clone(), enabled);
        Ok(())
    }

    fn sync_automatically(&self, account: &Account) -> bool {
        self.auto_sync.lock().get(account).copied().unwrap_or(true)
    }
}

/// Durable identity of this client within an account.
///
/// Get-or-create operations run under one lock so concurrent callers agree
/// on the generated values.
pub struct ClientRegistration {
    store: Arc<dyn AccountStore>,
    account: Account,
    default_client_name: String,
    lock: Mutex<()>,
}

impl ClientRegistration {
    /// Creates a registration for `account`.
    pub fn new(store: Arc<dyn AccountStore>, account: Account) -> Self {
        Self::with_default_name(
            store,
            account,
            format!("{PRODUCT_NAME} on {}", std::env::consts::OS),
        )
    }

    /// Creates a registration whose client name defaults to `default_client_name`.
    pub fn with_default_name(
        store: Arc<dyn AccountStore>,
        account: Account,
        default_client_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            account,
            default_client_name: default_client_name.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the account this registration belongs to.
    pub fn account(&self) -> &Account {
        &self.account
    }

    fn get_or_insert(&self, key: &str, make: impl FnOnce() -> String) -> String {
        let _guard = self.lock.lock();
        if let Some(value) = self.store.user_data(&self.account, key) {
            return value;
        }
        let value = make();
        tracing::debug!(account = %self.account.name, key, "initialising account user data");
        if let Err(e) = self.store.set_user_data(&self.account, key, &value) {
            tracing::warn!(error = %e, key, "failed to store account user data");
        }
        value
    }
}

impl ClientIdentity for ClientRegistration {
    fn account_guid(&self) -> String {
        self.get_or_insert(KEY_ACCOUNT_GUID, || Guid::random().as_str().to_string())
    }

    fn client_name(&self) -> String {
        self.get_or_insert(KEY_CLIENT_NAME, || self.default_client_name.clone())
    }

    fn clients_count(&self) -> u32 {
        let raw = self.get_or_insert(KEY_NUM_CLIENTS, || "0".to_string());
        raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, "unparseable client count, treating as 0");
            0
        })
    }

    fn set_clients_count(&self, count: u32) {
        let _guard = self.lock.lock();
        if let Err(e) = self
            .store
            .set_user_data(&self.account, KEY_NUM_CLIENTS, &count.to_string())
        {
            tracing::warn!(error = %e, count, "failed to store client count");
        }
    }

    fn is_local_guid(&self, guid: &str) -> bool {
        self.account_guid() == guid
    }
}

impl std::fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Marks `account` to be re-enabled on upgrade and turns automatic sync off,
/// on a background thread.
pub fn spawn_disable_for_upgrade(
    store: Arc<dyn AccountStore>,
    account: Account,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sync-upgrade-disable".into())
        .spawn(move || {
            if let Err(e) = store.set_user_data(&account, KEY_ENABLE_ON_UPGRADE, "1") {
                tracing::warn!(
                    error = %e,
                    account = %account.name,
                    "failed to mark account for re-enable"
                );
            }
            match store.set_sync_automatically(&account, false) {
                Ok(()) => {
                    tracing::info!(account = %account.name, "automatic sync disabled until upgrade")
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    account = %account.name,
                    "failed to disable automatic sync"
                ),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> (ClientRegistration, Arc<MemoryAccountStore>) {
        let store = Arc::new(MemoryAccountStore::new());
        let reg = ClientRegistration::with_default_name(
            store.clone(),
            Account::new("alice@example.com"),
            "Test Device",
        );
        (reg, store)
    }

    #[test]
    fn guid_is_generated_once() {
        let (reg, store) = registration();
        let guid = reg.account_guid();
        assert_eq!(guid.len(), Guid::GENERATED_LEN);
        assert_eq!(reg.account_guid(), guid);
        assert_eq!(
            store.user_data(reg.account(), KEY_ACCOUNT_GUID).as_deref(),
            Some(guid.as_str())
        );
        assert!(reg.is_local_guid(&guid));
        assert!(!reg.is_local_guid("someone-else"));
    }

    #[test]
    fn client_name_defaults_and_persists() {
        let (reg, store) = registration();
        assert_eq!(reg.client_name(), "Test Device");
        store
            .set_user_data(reg.account(), KEY_CLIENT_NAME, "Renamed")
            .unwrap();
        assert_eq!(reg.client_name(), "Renamed");
    }

    #[test]
    fn clients_count_defaults_to_zero() {
        let (reg, store) = registration();
        assert_eq!(reg.clients_count(), 0);
        assert_eq!(
            store.user_data(reg.account(), KEY_NUM_CLIENTS).as_deref(),
            Some("0")
        );

        reg.set_clients_count(3);
        assert_eq!(reg.clients_count(), 3);
    }

    #[test]
    fn garbage_clients_count_reads_as_zero() {
        let (reg, store) = registration();
        store
            .set_user_data(reg.account(), KEY_NUM_CLIENTS, "many")
            .unwrap();
        assert_eq!(reg.clients_count(), 0);
    }

    #[test]
    fn concurrent_guid_creation_agrees() {
        let (reg, _) = registration();
        let reg = Arc::new(reg);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                thread::spawn(move || reg.account_guid())
            })
            .collect();
        let guids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(guids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn disable_for_upgrade() {
        let store = Arc::new(MemoryAccountStore::new());
        let account = Account::new("bob");
        assert!(store.sync_automatically(&account));

        spawn_disable_for_upgrade(store.clone(), account.clone())
            .unwrap()
            .join()
            .unwrap();

        assert!(!store.sync_automatically(&account));
        assert_eq!(
            store.user_data(&account, KEY_ENABLE_ON_UPGRADE).as_deref(),
            Some("1")
        );
    }
}
