//! Account credentials and their resolution.

use crate::account::Account;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Prefix of every per-account preferences scope.
pub const PREFS_SCOPE_PREFIX: &str = "sync.prefs.";

/// Scope shared by all accounts for backoff state.
pub const GLOBAL_PREFS_SCOPE: &str = "sync.prefs.global";

/// Number of hex characters of the digest kept in a prefs scope.
const SCOPE_DIGEST_LEN: usize = 32;

/// Credentials for one sync account.
///
/// Secrets are zeroized on drop and redacted in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Account username.
    pub username: Option<String>,
    /// Account password.
    pub password: Option<String>,
    /// Key used to decrypt collection keys.
    pub sync_key: Option<String>,
    /// Storage server URL.
    pub server_url: Option<String>,
}

/// Completeness of a [`Credentials`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Every field is missing or empty.
    Blank,
    /// The password is missing or empty.
    MissingPassword,
    /// The sync key is missing or empty.
    MissingSyncKey,
    /// Password and sync key are present.
    Complete,
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.is_empty())
}

impl Credentials {
    /// Creates a full set of credentials.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        sync_key: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            sync_key: Some(sync_key.into()),
            server_url: Some(server_url.into()),
        }
    }

    /// Classifies these credentials.
    ///
    /// Username and server URL are not checked here; the worker validates
    /// them when it builds the session parameters.
    pub fn status(&self) -> CredentialStatus {
        let username = present(&self.username);
        let password = present(&self.password);
        let sync_key = present(&self.sync_key);
        let server_url = present(&self.server_url);

        if !(username || password || sync_key || server_url) {
            CredentialStatus::Blank
        } else if !password {
            CredentialStatus::MissingPassword
        } else if !sync_key {
            CredentialStatus::MissingSyncKey
        } else {
            CredentialStatus::Complete
        }
    }

    /// Returns the prefs scope for these credentials, if username and server
    /// URL are both present.
    pub fn prefs_scope(&self) -> Option<String> {
        match (self.username.as_deref(), self.server_url.as_deref()) {
            (Some(u), Some(s)) if !u.is_empty() && !s.is_empty() => Some(prefs_scope(u, s)),
            _ => None,
        }
    }

    /// Renders the credentials for a debug log line.
    ///
    /// Secrets are only included when `personal` is true.
    pub fn describe(&self, personal: bool) -> String {
        let secret = |field: &Option<String>| -> String {
            match (personal, field) {
                (true, Some(value)) => value.clone(),
                (false, Some(_)) => "<present>".into(),
                (_, None) => "<absent>".into(),
            }
        };
        format!(
            "username={:?} server={:?} password={} sync_key={}",
            self.username.as_deref().unwrap_or(""),
            self.server_url.as_deref().unwrap_or(""),
            secret(&self.password),
            secret(&self.sync_key),
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |field: &Option<String>| field.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("sync_key", &redact(&self.sync_key))
            .field("server_url", &self.server_url)
            .finish()
    }
}

/// Derives the stable prefs scope for an account.
///
/// The scope is `sync.prefs.` followed by the first 32 hex characters of
/// `SHA-256(username ":" server_url)`.
pub fn prefs_scope(username: &str, server_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(server_url.as_bytes());
    let digest = hasher.finalize();

    let mut scope = String::with_capacity(PREFS_SCOPE_PREFIX.len() + SCOPE_DIGEST_LEN);
    scope.push_str(PREFS_SCOPE_PREFIX);
    for byte in digest.iter().take(SCOPE_DIGEST_LEN / 2) {
        let _ = write!(scope, "{byte:02x}");
    }
    scope
}

/// Resolves credentials for an account.
pub trait CredentialProvider: Send + Sync {
    /// Returns the credentials stored for `account`, or `None` if the account
    /// has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store could not be read.
    fn resolve_credentials(&self, account: &Account) -> SyncResult<Option<Credentials>>;
}

/// A credential provider backed by a map, for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    entries: Mutex<HashMap<String, Credentials>>,
    failure: Mutex<Option<String>>,
}

impl StaticCredentialProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores credentials for the account named `account_name`.
    pub fn insert(&self, account_name: impl Into<String>, credentials: Credentials) {
        self.entries.lock().insert(account_name.into(), credentials);
    }

    /// Removes the credentials for `account_name`.
    pub fn remove(&self, account_name: &str) {
        self.entries.lock().remove(account_name);
    }

    /// Makes every later lookup fail with an authentication error.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn resolve_credentials(&self, account: &Account) -> SyncResult<Option<Credentials>> {
        if let Some(message) = self.failure.lock().as_ref() {
            return Err(SyncError::auth(message.clone()));
        }
        Ok(self.entries.lock().get(&account.name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(Credentials::default().status(), CredentialStatus::Blank);

        let empty = Credentials::new("", "", "", "");
        assert_eq!(empty.status(), CredentialStatus::Blank);

        let mut creds = Credentials::new("alice", "pw", "key", "https://sync.example");
        assert_eq!(creds.status(), CredentialStatus::Complete);

        creds.sync_key = Some(String::new());
        assert_eq!(creds.status(), CredentialStatus::MissingSyncKey);

        creds.password = None;
        assert_eq!(creds.status(), CredentialStatus::MissingPassword);
    }

    #[test]
    fn missing_username_is_still_complete() {
        let creds = Credentials {
            username: None,
            password: Some("pw".into()),
            sync_key: Some("key".into()),
            server_url: None,
        };
        assert_eq!(creds.status(), CredentialStatus::Complete);
        assert_eq!(creds.prefs_scope(), None);
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::new("alice", "hunter2", "abcde-fghij", "https://s");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("abcde-fghij"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn describe_respects_personal_flag() {
        let creds = Credentials::new("alice", "hunter2", "k", "https://s");
        assert!(!creds.describe(false).contains("hunter2"));
        assert!(creds.describe(false).contains("<present>"));
        assert!(creds.describe(true).contains("hunter2"));
    }

    #[test]
    fn prefs_scope_is_stable_and_distinct() {
        let a = prefs_scope("alice", "https://one.example/");
        assert_eq!(a, prefs_scope("alice", "https://one.example/"));
        assert_ne!(a, prefs_scope("alice", "https://two.example/"));
        assert_ne!(a, prefs_scope("bob", "https://one.example/"));
        assert!(a.starts_with(PREFS_SCOPE_PREFIX));
        assert_eq!(a.len(), PREFS_SCOPE_PREFIX.len() + SCOPE_DIGEST_LEN);
        assert!(a[PREFS_SCOPE_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn static_provider() {
        let provider = StaticCredentialProvider::new();
        let account = Account::new("alice");
        assert!(provider.resolve_credentials(&account).unwrap().is_none());

        provider.insert("alice", Credentials::new("alice", "pw", "k", "https://s"));
        assert!(provider.resolve_credentials(&account).unwrap().is_some());

        provider.fail_with("keystore locked");
        assert!(matches!(
            provider.resolve_credentials(&account),
            Err(SyncError::AuthenticationFailure(_))
        ));
    }
}
