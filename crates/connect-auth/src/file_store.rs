//! File-backed credential store
//!
//! Persists the session credential, the signed-in flag and the count of
//! consecutive failed refreshes as a JSON file. All
//! writes use atomic temp-file + rename to prevent corruption on crash. A tokio
//! Mutex serializes writes coming from the refresh coordinator and the login
//! flow.
//!
//! The in-memory copy is the source of truth while the process runs; the file
//! is only read at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::{Credential, CredentialStore, StoreFuture};
use crate::error::{Error, Result};

/// On-disk layout: the credential fields plus session bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(flatten)]
    credential: Credential,
    #[serde(default)]
    logged_in: bool,
    #[serde(default)]
    failed_refreshes: u32,
}

/// Credential store persisted to a single JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<StoredSession>,
}

impl FileCredentialStore {
    /// Load the session from `path`.
    ///
    /// If the file doesn't exist, creates it empty (signed out).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let session: StoredSession = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                logged_in = session.logged_in,
                failed_refreshes = session.failed_refreshes,
                "loaded credentials"
            );
            session
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            let session = StoredSession::default();
            write_atomic(&path, &session).await?;
            session
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Whether a credential has been installed and not cleared since.
    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.logged_in
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> StoreFuture<'_, Credential> {
        Box::pin(async move { self.state.lock().await.credential.clone() })
    }

    fn set(&self, credential: Credential) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.logged_in = !credential.access_token.is_empty();
            state.credential = credential;
            if let Err(e) = write_atomic(&self.path, &state).await {
                warn!(path = %self.path.display(), error = %e, "failed to persist credential");
            }
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.credential = Credential::default();
            state.logged_in = false;
            if let Err(e) = write_atomic(&self.path, &state).await {
                warn!(path = %self.path.display(), error = %e, "failed to persist cleared credential");
            }
        })
    }

    fn failed_refreshes(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move { self.state.lock().await.failed_refreshes })
    }

    fn set_failed_refreshes(&self, count: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.failed_refreshes == count {
                return;
            }
            state.failed_refreshes = count;
            if let Err(e) = write_atomic(&self.path, &state).await {
                warn!(path = %self.path.display(), error = %e, "failed to persist refresh count");
            }
        })
    }
}

/// Write the session to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 since the file holds tokens.
async fn write_atomic(path: &Path, data: &StoredSession) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credential(suffix: &str) -> Credential {
        Credential::new(
            format!("at_{suffix}"),
            format!("rt_{suffix}"),
            "Bearer",
            1_735_500_000_000,
        )
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(test_credential("1")).await;

        let store2 = FileCredentialStore::load(path).await.unwrap();
        let cred = store2.get().await;
        assert_eq!(cred.access_token, "at_1");
        assert_eq!(cred.refresh_token, "rt_1");
        assert_eq!(cred.token_type, "Bearer");
        assert!(store2.is_logged_in().await);
    }

    #[tokio::test]
    async fn cold_start_creates_signed_out_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        assert!(!path.exists());
        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        assert!(store.get().await.is_empty());
        assert!(!store.is_logged_in().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["logged_in"], false);
        assert_eq!(parsed["access_token"], "");
    }

    #[tokio::test]
    async fn clear_persists_signed_out_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(test_credential("1")).await;
        store.clear().await;

        assert_eq!(store.get().await, Credential::default());
        let reloaded = FileCredentialStore::load(path).await.unwrap();
        assert!(reloaded.get().await.is_empty());
        assert!(!reloaded.is_logged_in().await);
    }

    #[tokio::test]
    async fn failed_refresh_count_survives_reload_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(test_credential("1")).await;
        store.set_failed_refreshes(4).await;

        let reloaded = FileCredentialStore::load(path.clone()).await.unwrap();
        assert_eq!(reloaded.failed_refreshes().await, 4);

        reloaded.clear().await;
        let after_clear = FileCredentialStore::load(path).await.unwrap();
        assert!(after_clear.get().await.is_empty());
        assert_eq!(after_clear.failed_refreshes().await, 4);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = FileCredentialStore::load(path).await;
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[tokio::test]
    async fn missing_logged_in_flag_defaults_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let json = r#"{"access_token":"at","refresh_token":"rt","token_type":"Bearer","expires_at":5}"#;
        tokio::fs::write(&path, json).await.unwrap();

        let store = FileCredentialStore::load(path).await.unwrap();
        assert_eq!(store.get().await.access_token, "at");
        assert!(!store.is_logged_in().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(test_credential("1")).await;

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_leave_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(FileCredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(test_credential(&i.to_string())).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let in_memory = store.get().await;
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: StoredSession = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.credential, in_memory);
    }
}
