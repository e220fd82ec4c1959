//! Durable host identity
//!
//! The host id lives in a single file under the agent root. When the file
//! exists it is authoritative; otherwise the host is looked up by its
//! platform-supplied custom identifier, and created as a last resort.

use crate::models::{Host, HostParams, HostStatus};
use crate::sync::{ApiError, BackendApi};
use anyhow::Context;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The persisted host id at `<root>/id`
#[derive(Debug, Clone)]
pub struct IdFile {
    path: PathBuf,
}

impl IdFile {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join("id"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the id with trailing CR/LF trimmed; `None` when the file is absent
    pub async fn load(&self) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(
                content.trim_end_matches(['\r', '\n']).to_string(),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    /// Write the raw id bytes, creating parent directories as needed
    pub async fn save(&self, id: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, id.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    pub async fn remove(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// Why a resolution attempt failed
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Server-side or transport failure; nothing was persisted
    #[error("retryable: {0}")]
    Retryable(ApiError),
    /// Client-side API error or broken local state; retrying will not help
    #[error("fatal: {0:#}")]
    Fatal(anyhow::Error),
    /// Cancelled before a backend call returned; any id already obtained is persisted
    #[error("cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Retryable(_))
    }
}

impl From<ApiError> for ResolveError {
    fn from(e: ApiError) -> Self {
        if e.is_retryable() {
            ResolveError::Retryable(e)
        } else {
            ResolveError::Fatal(e.into())
        }
    }
}

/// Establishes exactly one durable identity for this host
pub struct HostResolver {
    api: Arc<dyn BackendApi>,
    id_file: IdFile,
}

impl HostResolver {
    pub fn new(api: Arc<dyn BackendApi>, root: impl AsRef<Path>) -> Self {
        Self {
            api,
            id_file: IdFile::new(root),
        }
    }

    pub fn id_file(&self) -> &IdFile {
        &self.id_file
    }

    /// Find, adopt or create the host record and bring its fields up to date.
    ///
    /// Cancellation interrupts a pending backend call but never the write of
    /// an id the backend has already handed out.
    pub async fn resolve(
        &self,
        params: &HostParams,
        cancel: &CancellationToken,
    ) -> Result<Host, ResolveError> {
        if let Some(id) = self.id_file.load().await.map_err(ResolveError::Fatal)? {
            if id.is_empty() {
                return Err(ResolveError::Fatal(anyhow::anyhow!(
                    "host id file {} is empty",
                    self.id_file.path().display()
                )));
            }
            let host = call(cancel, self.api.find_host(&id)).await?;
            call(cancel, self.api.update_host(&host.id, params)).await?;
            debug!(host_id = %host.id, "Resolved host from id file");
            return Ok(host);
        }

        if let Some(custom_identifier) = params.custom_identifier.as_deref() {
            let hosts = call(
                cancel,
                self.api.find_hosts(custom_identifier, &HostStatus::ACTIVE),
            )
            .await?;
            if let Some(host) = hosts.into_iter().next() {
                call(cancel, self.api.update_host(&host.id, params)).await?;
                self.id_file.save(&host.id).await.map_err(ResolveError::Fatal)?;
                info!(
                    host_id = %host.id,
                    custom_identifier = %custom_identifier,
                    "Adopted existing host by custom identifier"
                );
                return Ok(host);
            }
        }

        let id = call(cancel, self.api.create_host(params)).await?;
        self.id_file.save(&id).await.map_err(ResolveError::Fatal)?;
        info!(host_id = %id, "Created host");
        call(cancel, self.api.find_host(&id)).await
    }

    /// The persisted id, if any
    pub async fn local_id(&self) -> anyhow::Result<Option<String>> {
        Ok(self.id_file.load().await?.filter(|id| !id.is_empty()))
    }

    /// Remove the persisted id
    pub async fn forget(&self) -> anyhow::Result<()> {
        self.id_file.remove().await
    }
}

/// Await a backend call unless `cancel` fires first
async fn call<T>(
    cancel: &CancellationToken,
    request: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ResolveError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        result = request => Ok(result?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{host, Call, FakeApi};
    use tempfile::TempDir;

    fn params(custom_identifier: Option<&str>) -> HostParams {
        HostParams {
            name: "node-1".to_string(),
            custom_identifier: custom_identifier.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_id_file_round_trip_trims_newlines() {
        let dir = TempDir::new().unwrap();
        let id_file = IdFile::new(dir.path().join("nested/root"));

        assert_eq!(id_file.load().await.unwrap(), None);
        id_file.save("abcde").await.unwrap();
        assert_eq!(std::fs::read(id_file.path()).unwrap(), b"abcde");

        std::fs::write(id_file.path(), "abcde\r\n").unwrap();
        assert_eq!(id_file.load().await.unwrap().as_deref(), Some("abcde"));

        id_file.remove().await.unwrap();
        id_file.remove().await.unwrap();
        assert_eq!(id_file.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_creates_host_when_nothing_is_known() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::new().with_next_id("abcde"));
        let resolver = HostResolver::new(api.clone(), dir.path());

        let host = resolver.resolve(&params(None), &CancellationToken::new()).await.unwrap();

        assert_eq!(host.id, "abcde");
        assert_eq!(std::fs::read_to_string(dir.path().join("id")).unwrap(), "abcde");
        assert_eq!(api.count(|c| matches!(c, Call::FindHosts(..))), 0);
        assert_eq!(
            api.calls(),
            vec![
                Call::CreateHost(params(None)),
                Call::FindHost("abcde".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_id_file_never_creates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("id"), "xyz\n").unwrap();
        let api = Arc::new(FakeApi::new().with_host(host("xyz", HostStatus::Working)));
        let resolver = HostResolver::new(api.clone(), dir.path());

        for _ in 0..3 {
            let host = resolver.resolve(&params(Some("i-0123")), &CancellationToken::new()).await.unwrap();
            assert_eq!(host.id, "xyz");
        }

        assert_eq!(api.count(|c| matches!(c, Call::CreateHost(_))), 0);
        assert_eq!(api.count(|c| matches!(c, Call::FindHosts(..))), 0);
        assert_eq!(api.count(|c| matches!(c, Call::FindHost(id) if id == "xyz")), 3);
        assert_eq!(api.count(|c| matches!(c, Call::UpdateHost(id, _) if id == "xyz")), 3);
    }

    #[tokio::test]
    async fn test_empty_id_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("id"), "").unwrap();
        let api = Arc::new(FakeApi::new());
        let resolver = HostResolver::new(api.clone(), dir.path());

        let err = resolver.resolve(&params(None), &CancellationToken::new()).await.unwrap_err();

        assert!(!err.is_retryable());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_adopts_host_by_custom_identifier() {
        let dir = TempDir::new().unwrap();
        let mut retired = host("aaa", HostStatus::Working);
        retired.status = None;
        retired.custom_identifier = Some("i-0123".to_string());
        let mut active = host("bbb", HostStatus::Standby);
        active.custom_identifier = Some("i-0123".to_string());
        let api = Arc::new(FakeApi::new().with_host(retired).with_host(active));
        let resolver = HostResolver::new(api.clone(), dir.path());

        let host = resolver.resolve(&params(Some("i-0123")), &CancellationToken::new()).await.unwrap();

        assert_eq!(host.id, "bbb");
        assert_eq!(resolver.local_id().await.unwrap().as_deref(), Some("bbb"));
        assert_eq!(api.count(|c| matches!(c, Call::CreateHost(_))), 0);
        assert!(api
            .calls()
            .contains(&Call::FindHosts("i-0123".to_string(), HostStatus::ACTIVE.to_vec())));
    }

    #[tokio::test]
    async fn test_creates_when_custom_identifier_has_no_match() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::new().with_next_id("fresh"));
        let resolver = HostResolver::new(api.clone(), dir.path());

        let host = resolver.resolve(&params(Some("i-9999")), &CancellationToken::new()).await.unwrap();

        assert_eq!(host.id, "fresh");
        assert_eq!(api.count(|c| matches!(c, Call::FindHosts(..))), 1);
        assert_eq!(api.count(|c| matches!(c, Call::CreateHost(_))), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_and_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::new());
        api.fail_next("create_host", ApiError::from_status(500, "internal"));
        let resolver = HostResolver::new(api.clone(), dir.path());

        let err = resolver.resolve(&params(None), &CancellationToken::new()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(resolver.local_id().await.unwrap(), None);

        let host = resolver.resolve(&params(None), &CancellationToken::new()).await.unwrap();
        assert_eq!(host.id, "abcde");
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::new());
        api.fail_next("create_host", ApiError::from_status(400, "bad request"));
        let resolver = HostResolver::new(api.clone(), dir.path());

        let err = resolver.resolve(&params(None), &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ResolveError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_transport_error_is_retryable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("id"), "xyz").unwrap();
        let api = Arc::new(FakeApi::new());
        api.fail_next("find_host", ApiError::Transport("connection reset".to_string()));
        let resolver = HostResolver::new(api, dir.path());

        let err = resolver.resolve(&params(None), &CancellationToken::new()).await.unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancel_after_create_keeps_the_new_id() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::new().with_next_id("abcde"));
        api.hang("find_host");
        let resolver = Arc::new(HostResolver::new(api.clone(), dir.path()));
        let cancel = CancellationToken::new();

        let task = {
            let resolver = Arc::clone(&resolver);
            let cancel = cancel.clone();
            tokio::spawn(async move { resolver.resolve(&params(None), &cancel).await })
        };
        while api.count(|c| matches!(c, Call::FindHost(_))) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        cancel.cancel();

        let err = tokio::time::timeout(std::time::Duration::from_secs(3), task)
            .await
            .expect("resolve ignored cancellation")
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, ResolveError::Cancelled));
        assert!(!err.is_retryable());
        assert_eq!(resolver.local_id().await.unwrap().as_deref(), Some("abcde"));
        assert_eq!(api.count(|c| matches!(c, Call::CreateHost(_))), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_hung_create_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::new());
        api.hang("create_host");
        let resolver = HostResolver::new(api.clone(), dir.path());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            resolver.resolve(&params(None), &cancel),
        )
        .await
        .expect("resolve ignored cancellation")
        .unwrap_err();

        assert!(matches!(err, ResolveError::Cancelled));
        assert_eq!(resolver.local_id().await.unwrap(), None);
    }
}
