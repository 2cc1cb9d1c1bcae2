//! Account pool store
//!
//! All durable writes go through a process-wide tokio mutex and an atomic
//! temp-file + rename, so concurrent savers are strictly serialized and a
//! crash mid-write can never leave a torn file. Reads never take the write
//! mutex; they may observe a previously committed state but never a partial
//! one.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::{Clock, SharedClock, StorageCode, StorageError, system_clock};

use crate::normalize::{normalize_account_storage, normalize_storage};
use crate::paths::{PLUGIN_DIR_NAME, ensure_allowed};
use crate::schema::{AccountStorage, MAX_ACCOUNTS, STORAGE_VERSION};

/// Serializes every durable write in the process. tokio's mutex queues
/// waiters in FIFO order, which is the ordering contract for the file.
static WRITE_MUTEX: Mutex<()> = Mutex::const_new(());

/// Result of an `import` merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Accounts newly added to the pool.
    pub imported: usize,
    /// Accounts in the file that duplicated existing ones.
    pub skipped: usize,
    /// Pool size after the merge.
    pub total: usize,
}

/// Handle to the durable pool file.
pub struct AccountStore {
    path: PathBuf,
    clock: SharedClock,
}

impl AccountStore {
    pub fn new(path: PathBuf) -> Self {
        Self::with_clock(path, system_clock())
    }

    pub fn with_clock(path: PathBuf, clock: SharedClock) -> Self {
        Self { path, clock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and normalize the pool.
    ///
    /// Malformed files and entries degrade to warnings; the caller gets a
    /// valid pool or `None`, never an error. A v1 file is migrated and
    /// re-saved; a failed re-save is logged and the migrated pool is still
    /// returned.
    pub async fn load(&self) -> Option<AccountStorage> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no account storage file");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read account storage");
                return None;
            }
        };

        let raw: Value = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "account storage is not valid JSON");
                return None;
            }
        };

        let Some(outcome) = normalize_account_storage(&raw, self.clock.now_ms()) else {
            warn!(path = %self.path.display(), "account storage has an unrecognized shape");
            return None;
        };
        for warning in &outcome.warnings {
            warn!(path = %self.path.display(), "{warning}");
        }
        if outcome.migrated {
            info!(accounts = outcome.storage.accounts.len(), "migrated account storage v1 -> v3");
            if let Err(err) = self.save(&outcome.storage).await {
                warn!(error = %err, "failed to re-save migrated storage; will migrate again next load");
            }
        }
        Some(outcome.storage)
    }

    /// Persist the pool atomically under the write mutex.
    pub async fn save(&self, storage: &AccountStorage) -> Result<(), StorageError> {
        let _guard = WRITE_MUTEX.lock().await;
        self.ensure_parent_dir().await?;
        self.ensure_gitignore().await;

        let mut json = serde_json::to_string_pretty(storage).map_err(|err| {
            StorageError::new(
                StorageCode::Unknown,
                &self.path,
                format!("serializing pool: {err}"),
            )
        })?;
        json.push('\n');

        commit_atomic(&self.path, json.as_bytes(), self.clock.now_ms()).await?;
        metrics::counter!("store_saves_total").increment(1);
        debug!(path = %self.path.display(), accounts = storage.accounts.len(), "persisted account pool");
        Ok(())
    }

    /// Remove the pool file. A missing file is not an error.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = WRITE_MUTEX.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "cleared account storage");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::from_io(&err, &self.path)),
        }
    }

    /// Write the current pool to `dest` for backup or transfer.
    ///
    /// Refuses an existing destination unless `force` is set, and refuses
    /// to export an empty pool.
    pub async fn export(&self, dest: &Path, force: bool) -> Result<usize, StorageError> {
        ensure_allowed(dest)?;
        let storage = self.load().await.unwrap_or_else(AccountStorage::empty);
        if storage.accounts.is_empty() {
            return Err(StorageError::new(
                StorageCode::Unknown,
                dest,
                "no accounts to export",
            ));
        }
        if !force && dest.exists() {
            return Err(StorageError::new(
                StorageCode::Unknown,
                dest,
                "destination exists (pass force to overwrite)",
            ));
        }
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            return Err(StorageError::from_io(&err, dest));
        }

        let mut json = serde_json::to_string_pretty(&storage).map_err(|err| {
            StorageError::new(StorageCode::Unknown, dest, format!("serializing pool: {err}"))
        })?;
        json.push('\n');
        tokio::fs::write(dest, json.as_bytes())
            .await
            .map_err(|err| StorageError::from_io(&err, dest))?;
        restrict_permissions(dest).await?;

        info!(path = %dest.display(), accounts = storage.accounts.len(), "exported account pool");
        Ok(storage.accounts.len())
    }

    /// Merge accounts from `src` into the current pool.
    ///
    /// New accounts are appended, then the regular dedup pass collapses
    /// duplicates; the current active indexes are preserved. Fails without
    /// writing when the merge would exceed the pool cap.
    pub async fn import(&self, src: &Path) -> Result<ImportOutcome, StorageError> {
        ensure_allowed(src)?;
        let contents = tokio::fs::read_to_string(src)
            .await
            .map_err(|err| StorageError::from_io(&err, src))?;
        let raw: Value = serde_json::from_str(&contents).map_err(|err| {
            StorageError::new(StorageCode::Unknown, src, format!("not valid JSON: {err}"))
        })?;
        let Some(incoming) = normalize_account_storage(&raw, self.clock.now_ms()) else {
            return Err(StorageError::new(
                StorageCode::Unknown,
                src,
                "not a recognized account storage file",
            ));
        };

        let current = self.load().await.unwrap_or_else(AccountStorage::empty);
        let before = current.accounts.len();
        let incoming_count = incoming.storage.accounts.len();

        let mut merged_accounts = current.accounts;
        merged_accounts.extend(incoming.storage.accounts);
        let merged = normalize_storage(
            AccountStorage {
                version: STORAGE_VERSION,
                accounts: merged_accounts,
                active_index: current.active_index,
                active_index_by_family: current.active_index_by_family,
            },
            self.clock.now_ms(),
        );

        let total = merged.accounts.len();
        if total > MAX_ACCOUNTS {
            return Err(StorageError::new(
                StorageCode::Unknown,
                src,
                format!("import would exceed the {MAX_ACCOUNTS} account limit ({total})"),
            ));
        }

        self.save(&merged).await?;
        let imported = total.saturating_sub(before);
        Ok(ImportOutcome {
            imported,
            skipped: incoming_count.saturating_sub(imported),
            total,
        })
    }

    async fn ensure_parent_dir(&self) -> Result<(), StorageError> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| StorageError::from_io(&err, &self.path))
    }

    /// When the pool lives in `<project>/.opencode` and the project is a
    /// git checkout, keep `.opencode/` out of version control.
    async fn ensure_gitignore(&self) {
        let Some(dir) = self.path.parent() else {
            return;
        };
        if dir.file_name().and_then(|name| name.to_str()) != Some(PLUGIN_DIR_NAME) {
            return;
        }
        let Some(project) = dir.parent() else {
            return;
        };
        if !project.join(".git").exists() {
            return;
        }

        let entry = format!("{PLUGIN_DIR_NAME}/");
        let gitignore = project.join(".gitignore");
        let current = tokio::fs::read_to_string(&gitignore).await.unwrap_or_default();
        if current.lines().any(|line| line.trim() == entry) {
            return;
        }
        let mut updated = current;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&entry);
        updated.push('\n');
        if let Err(err) = tokio::fs::write(&gitignore, updated).await {
            warn!(path = %gitignore.display(), error = %err, "failed to update .gitignore");
        }
    }
}

/// Write `bytes` to `<path>.<ms>.tmp`, verify the temp file is non-empty,
/// and rename it over the target. The temp file is unlinked on any failure
/// so aborted writes leave nothing behind.
async fn commit_atomic(path: &Path, bytes: &[u8], now_ms: u64) -> Result<(), StorageError> {
    let tmp = PathBuf::from(format!("{}.{now_ms}.tmp", path.display()));

    if let Err(err) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::from_io(&err, path));
    }

    restrict_permissions(&tmp).await?;

    let written = match tokio::fs::metadata(&tmp).await {
        Ok(meta) => meta.len(),
        Err(err) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::from_io(&err, path));
        }
    };
    if written == 0 {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::new(
            StorageCode::Eempty,
            path,
            "temp file was written as 0 bytes",
        ));
    }

    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::from_io(&err, path));
    }
    Ok(())
}

/// 0600 on unix; a no-op elsewhere.
async fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|err| StorageError::from_io(&err, path))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
