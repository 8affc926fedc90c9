//! Durable line store for account records
//!
//! One account per line, five `----`-delimited fields. Every save rewrites
//! the whole file through a temp-file + rename so a crash mid-write cannot
//! corrupt previously valid records. File permissions are 0600 since the
//! lines carry session tokens.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::account::Account;
use crate::error::{Error, Result};

/// Read all accounts from the store, preserving file order.
///
/// Load order matters: rotation is sequential, so the file order is the
/// ring order. Malformed lines are skipped with a warning; a missing file
/// yields an empty set (cold start).
pub async fn read_accounts(path: &Path) -> Result<Vec<Account>> {
    if !path.exists() {
        warn!(path = %path.display(), "account store not found, starting with empty pool");
        return Ok(Vec::new());
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io(format!("reading account store: {e}")))?;

    let mut accounts = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Account::parse_line(line) {
            Ok(account) => accounts.push(account),
            Err(e) => warn!(line = number + 1, error = %e, "skipping malformed account line"),
        }
    }

    info!(path = %path.display(), accounts = accounts.len(), "loaded account store");
    Ok(accounts)
}

/// Rewrite the store with the given records.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target.
pub async fn write_accounts(path: &Path, accounts: &[Account]) -> Result<()> {
    let mut body = accounts
        .iter()
        .map(Account::to_line)
        .collect::<Vec<_>>()
        .join("\n");
    body.push('\n');

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("account store path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, body.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;

    debug!(path = %path.display(), accounts = accounts.len(), "persisted account store");
    Ok(())
}
