//! Account parameter pickling.
//!
//! Before each run the account parameters are written to a JSON file so that
//! the account can be reconstructed if the host loses it.

use crate::backoff::write_atomically;
use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use zeroize::Zeroize;

/// Current pickle format version.
pub const PICKLE_VERSION: u32 = 1;

/// Account parameters as stored in the pickle file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountParameters {
    /// Account name.
    #[serde(rename = "accountName")]
    pub account_name: String,
    /// Sync key.
    #[serde(rename = "syncKey")]
    pub sync_key: String,
    /// Account password.
    pub password: String,
    /// Storage server URL.
    #[serde(rename = "serverURL")]
    pub server_url: String,
    /// Cluster URL; always re-fetched, so usually absent.
    #[serde(rename = "clusterURL", default)]
    pub cluster_url: Option<String>,
    /// Client name.
    #[serde(rename = "clientName")]
    pub client_name: String,
    /// Client GUID.
    #[serde(rename = "clientGUID")]
    pub client_guid: String,
    /// Whether automatic sync was enabled when pickled.
    #[serde(rename = "syncAutomatically", default)]
    pub sync_automatically: bool,
    /// Pickle format version.
    #[serde(default)]
    pub version: u32,
}

impl Drop for AccountParameters {
    fn drop(&mut self) {
        self.password.zeroize();
        self.sync_key.zeroize();
    }
}

impl std::fmt::Debug for AccountParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountParameters")
            .field("account_name", &self.account_name)
            .field("sync_key", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .field("server_url", &self.server_url)
            .field("cluster_url", &self.cluster_url)
            .field("client_name", &self.client_name)
            .field("client_guid", &self.client_guid)
            .field("sync_automatically", &self.sync_automatically)
            .field("version", &self.version)
            .finish()
    }
}

/// Reads and writes the account pickle file.
#[derive(Debug, Clone)]
pub struct AccountPickler {
    path: PathBuf,
}

impl AccountPickler {
    /// Creates a pickler writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the pickle file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `params` atomically, stamping the current format version.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn pickle(&self, params: &AccountParameters) -> SyncResult<()> {
        let mut stamped = params.clone();
        stamped.version = PICKLE_VERSION;
        let data = serde_json::to_vec_pretty(&stamped)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomically(&self.path, &data)?;
        tracing::debug!(
            path = %self.path.display(),
            account = %params.account_name,
            "pickled account parameters"
        );
        Ok(())
    }

    /// Reads the pickle back, or `None` if there is no pickle file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn unpickle(&self) -> SyncResult<Option<AccountParameters>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pickles `params` on a background thread.
    ///
    /// Failures are logged and otherwise ignored.
    pub fn pickle_in_background(&self, params: AccountParameters) -> io::Result<JoinHandle<()>> {
        let pickler = self.clone();
        thread::Builder::new()
            .name("sync-account-pickle".into())
            .spawn(move || {
                if let Err(e) = pickler.pickle(&params) {
                    tracing::warn!(error = %e, "failed to pickle account parameters; ignoring");
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn params() -> AccountParameters {
        AccountParameters {
            account_name: "alice@example.com".into(),
            sync_key: "abcde-fghij".into(),
            password: "hunter2".into(),
            server_url: "https://sync.example/".into(),
            cluster_url: None,
            client_name: "Phone".into(),
            client_guid: "abcdefabcdef".into(),
            sync_automatically: true,
            version: 0,
        }
    }

    #[test]
    fn pickle_then_unpickle() {
        let dir = tempdir().unwrap();
        let pickler = AccountPickler::new(dir.path().join("sync.account.json"));
        pickler.pickle(&params()).unwrap();

        let restored = pickler.unpickle().unwrap().unwrap();
        assert_eq!(restored.account_name, "alice@example.com");
        assert_eq!(restored.version, PICKLE_VERSION);
        assert!(restored.sync_automatically);
    }

    #[test]
    fn uses_wire_field_names() {
        let dir = tempdir().unwrap();
        let pickler = AccountPickler::new(dir.path().join("p.json"));
        pickler.pickle(&params()).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(pickler.path()).unwrap()).unwrap();
        for key in [
            "accountName",
            "syncKey",
            "password",
            "serverURL",
            "clusterURL",
            "clientName",
            "clientGUID",
            "syncAutomatically",
            "version",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let pickler = AccountPickler::new(dir.path().join("absent.json"));
        assert!(pickler.unpickle().unwrap().is_none());
    }

    #[test]
    fn background_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let pickler = AccountPickler::new(blocker.join("nested").join("p.json"));
        pickler
            .pickle_in_background(params())
            .unwrap()
            .join()
            .unwrap();
        assert!(pickler.unpickle().is_err() || pickler.unpickle().unwrap().is_none());
    }

    #[test]
    fn debug_redacts() {
        let rendered = format!("{:?}", params());
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("abcde-fghij"));
    }

    #[cfg(unix)]
    #[test]
    fn pickle_with_secrets_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let pickler = AccountPickler::new(dir.path().join("sync.account.json"));
        pickler.pickle(&params()).unwrap();
        // Overwriting an existing pickle keeps the restricted mode.
        pickler.pickle(&params()).unwrap();

        let mode = fs::metadata(pickler.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0, "pickle mode {mode:o}");
        assert!(String::from_utf8(fs::read(pickler.path()).unwrap())
            .unwrap()
            .contains("hunter2"));
    }
}
