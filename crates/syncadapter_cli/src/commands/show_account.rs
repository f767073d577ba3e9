//! Show-account command implementation.

use super::{CommandError, Format};
use serde::Serialize;
use std::path::Path;
use syncadapter_core::{prefs_scope, AccountPickler};

/// Pickled account parameters with secrets reduced to presence flags.
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    /// Account name.
    pub account_name: String,
    /// Storage server URL.
    pub server_url: String,
    /// Cluster URL, if pickled.
    pub cluster_url: Option<String>,
    /// Client name.
    pub client_name: String,
    /// Client GUID.
    pub client_guid: String,
    /// Whether automatic sync was enabled.
    pub sync_automatically: bool,
    /// Pickle format version.
    pub version: u32,
    /// Whether a password is stored.
    pub has_password: bool,
    /// Whether a sync key is stored.
    pub has_sync_key: bool,
    /// Prefs scope derived from account name and server URL.
    pub prefs_scope: String,
}

/// Loads the pickle named `file` under `path`.
pub fn load(path: &Path, file: &str) -> Result<AccountSummary, CommandError> {
    let pickle_path = path.join(file);
    let params = AccountPickler::new(&pickle_path)
        .unpickle()?
        .ok_or(CommandError::NoPickle(pickle_path))?;

    Ok(AccountSummary {
        prefs_scope: prefs_scope(&params.account_name, &params.server_url),
        account_name: params.account_name.clone(),
        server_url: params.server_url.clone(),
        cluster_url: params.cluster_url.clone(),
        client_name: params.client_name.clone(),
        client_guid: params.client_guid.clone(),
        sync_automatically: params.sync_automatically,
        version: params.version,
        has_password: !params.password.is_empty(),
        has_sync_key: !params.sync_key.is_empty(),
    })
}

/// Runs the show-account command.
pub fn run(path: &Path, file: &str, format: &str) -> Result<(), CommandError> {
    let format = Format::parse(format)?;
    let summary = load(path, file)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        Format::Text => {
            println!("Account:            {}", summary.account_name);
            println!("Server:             {}", summary.server_url);
            if let Some(cluster) = &summary.cluster_url {
                println!("Cluster:            {cluster}");
            }
            println!("Client:             {} ({})", summary.client_name, summary.client_guid);
            println!("Sync automatically: {}", summary.sync_automatically);
            println!("Password stored:    {}", summary.has_password);
            println!("Sync key stored:    {}", summary.has_sync_key);
            println!("Prefs scope:        {}", summary.prefs_scope);
            println!("Pickle version:     {}", summary.version);
        }
    }
    Ok(())
}
