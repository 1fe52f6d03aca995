// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Network retrieval of the artifact.
//!
//! Bytes are streamed into `<destination>.part` and renamed over the
//! destination only once the transfer completes. Any failure, including
//! cancellation, removes the partial file so a retry starts clean.

use futures_util::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::FetchError;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("lsp-tagml/", env!("CARGO_PKG_VERSION"));

/// Progress callback: `(bytes_received, total_bytes_if_known)`.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// Retrieves a remote resource into a local file.
pub trait Fetcher: Send + Sync + 'static {
    /// Streams `url` to `destination`, overwriting any existing file.
    ///
    /// The parent directory of `destination` is created first. On error no
    /// partial file is left behind.
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<Arc<ProgressFn>>,
        cancel: CancelSignal,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Receiving half of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Creates a linked cancel handle and signal.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelSignal { receiver })
}

/// Path of the in-progress download for `destination`.
#[must_use]
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// HTTP(S) fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher. `timeout` bounds the whole transfer; `None` means
    /// no limit.
    ///
    /// # Errors
    ///
    /// Returns `TransferFailed` if the HTTP client cannot be built.
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::TransferFailed(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn transfer(
        &self,
        url: &str,
        partial: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<(), FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| describe(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::TransferFailed(format!(
                "server returned {status} for {url}"
            )));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| write_failed(partial, &e))?;

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| describe(url, &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| write_failed(partial, &e))?;
            received =
                received.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
            if let Some(progress) = progress {
                progress(received, total);
            }
        }

        file.flush().await.map_err(|e| write_failed(partial, &e))?;
        file.sync_all()
            .await
            .map_err(|e| write_failed(partial, &e))?;

        debug!("Received {} bytes from {}", received, url);
        Ok(())
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: Option<Arc<ProgressFn>>,
        mut cancel: CancelSignal,
    ) -> Result<(), FetchError> {
        prepare_parent(destination).await?;

        let partial = partial_path(destination);
        info!("Downloading {} -> {}", url, destination.display());

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::Cancelled),
            res = self.transfer(url, &partial, progress.as_deref()) => res,
        };

        finish(result, &partial, destination).await
    }
}

/// Creates the destination's parent directory.
///
/// # Errors
///
/// Returns `StorageUnavailable` if the directory cannot be created.
pub async fn prepare_parent(destination: &Path) -> Result<(), FetchError> {
    let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| FetchError::StorageUnavailable {
            path: parent.to_path_buf(),
            cause: e.to_string(),
        })
}

/// Commits a completed partial file, or removes it on failure.
///
/// # Errors
///
/// Returns the transfer error, or `TransferFailed` if the rename fails.
pub async fn finish(
    result: Result<(), FetchError>,
    partial: &Path,
    destination: &Path,
) -> Result<(), FetchError> {
    match result {
        Ok(()) => match tokio::fs::rename(partial, destination).await {
            Ok(()) => Ok(()),
            Err(e) => {
                discard(partial).await;
                Err(FetchError::TransferFailed(format!(
                    "cannot move download into {}: {e}",
                    destination.display()
                )))
            }
        },
        Err(e) => {
            discard(partial).await;
            Err(e)
        }
    }
}

async fn discard(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!("Could not remove partial download {}: {}", partial.display(), e);
    }
}

fn describe(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::TransferFailed(format!("timed out fetching {url}"))
    } else {
        FetchError::TransferFailed(format!("error fetching {url}: {error}"))
    }
}

fn write_failed(path: &Path, error: &std::io::Error) -> FetchError {
    FetchError::TransferFailed(format!("cannot write {}: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_partial_path_appends_suffix() {
        let dest = Path::new("/cache/LSP-tagml/srv-0.1.jar");
        assert_eq!(
            partial_path(dest),
            PathBuf::from("/cache/LSP-tagml/srv-0.1.jar.part")
        );
    }

    #[tokio::test]
    async fn test_cancel_signal_fires() {
        let (handle, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        handle.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_signal_does_not_fire() {
        let mut signal = CancelSignal::never();
        let fired =
            tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_finish_failure_removes_partial() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("a.jar");
        let partial = partial_path(&dest);
        std::fs::write(&partial, b"half")?;

        let result = finish(Err(FetchError::Cancelled), &partial, &dest).await;

        assert_eq!(result, Err(FetchError::Cancelled));
        assert!(!partial.exists());
        assert!(!dest.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_finish_success_replaces_destination() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("a.jar");
        std::fs::write(&dest, b"stale")?;
        let partial = partial_path(&dest);
        std::fs::write(&partial, b"fresh")?;

        finish(Ok(()), &partial, &dest).await?;

        assert_eq!(std::fs::read(&dest)?, b"fresh");
        assert!(!partial.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_parent_reports_storage_unavailable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not dir")?;

        let result = prepare_parent(&blocker.join("sub").join("a.jar")).await;

        assert!(matches!(result, Err(FetchError::StorageUnavailable { .. })));
        Ok(())
    }
}
