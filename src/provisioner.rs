// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The provisioning state machine.
//!
//! ```text
//! Uninitialized -> Checking -> Ready
//!                           -> Fetching -> Ready
//!                                       -> Failed -> (setup again) Checking
//! ```
//!
//! One `Provisioner` owns the state for the lifetime of the host. `setup()`
//! never waits on the network: a cache miss spawns a single background fetch
//! task, and concurrent `setup()` calls observe `Checking`/`Fetching` and
//! return immediately.

use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::descriptor::ArtifactDescriptor;
use crate::error::ProvisionError;
use crate::events::{EventKind, Notifier};
use crate::fetch::{CancelHandle, CancelSignal, Fetcher, ProgressFn, cancel_pair};
use crate::storage::{MigrationOutcome, StorageLayout};
use crate::{reaper, verify};

/// Minimum byte delta between two progress events.
const PROGRESS_STEP: u64 = 1024 * 1024;

/// Where provisioning currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ProvisionState {
    /// `setup()` has not been called (or the provisioner was shut down).
    Uninitialized,
    /// Verifying the cached artifact.
    Checking,
    /// A background download is running.
    Fetching,
    /// The artifact is installed and verified.
    Ready {
        /// Location of the verified artifact.
        binary_path: PathBuf,
    },
    /// The last attempt failed; `setup()` may be called again.
    Failed {
        /// Why the attempt failed.
        #[serde(serialize_with = "serialize_reason")]
        reason: ProvisionError,
    },
}

fn serialize_reason<S: serde::Serializer>(
    reason: &ProvisionError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(reason)
}

impl ProvisionState {
    /// Short lowercase name of the state.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Checking => "checking",
            Self::Fetching => "fetching",
            Self::Ready { .. } => "ready",
            Self::Failed { .. } => "failed",
        }
    }

    /// True while a check or download is underway.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self, Self::Checking | Self::Fetching)
    }
}

/// What a `setup()` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Already ready; nothing was done.
    AlreadyReady,
    /// A check or fetch is already running; nothing was done.
    AlreadyInProgress,
    /// The cached artifact verified; no network access was needed.
    Ready(PathBuf),
    /// A background fetch was started.
    FetchStarted,
    /// Storage could not be prepared.
    Failed(ProvisionError),
}

/// State shared with the background fetch task.
struct Shared {
    descriptor: ArtifactDescriptor,
    state: watch::Sender<ProvisionState>,
    notifier: Notifier,
}

impl Shared {
    /// Publishes the event before the state so that anyone woken by the state
    /// change already has the event queued.
    fn transition(&self, to: ProvisionState) {
        let from = self.state.borrow().name();
        info!("Provisioner: {} -> {}", from, to.name());
        self.notifier.send(EventKind::StateChanged {
            from: from.to_string(),
            to: to.name().to_string(),
        });
        self.state.send_replace(to);
    }

    fn fail(&self, reason: ProvisionError) {
        warn!("Provisioning failed: {}", reason);
        self.notifier.send(EventKind::DownloadFailed {
            cause: reason.to_string(),
        });
        self.transition(ProvisionState::Failed { reason });
    }

    /// Reaps superseded artifacts and marks `binary_path` ready.
    fn become_ready(&self, dir: &Path, binary_path: PathBuf) {
        if let Some(extension) = self.descriptor.extension() {
            match reaper::reap(dir, &binary_path, &extension) {
                Ok(report) if !report.removed.is_empty() => {
                    info!("Removed {} stale artifact(s)", report.removed.len());
                    self.notifier.send(EventKind::Reaped {
                        removed: report.removed.len(),
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping stale artifact cleanup in {}: {}", dir.display(), e),
            }
        }
        self.transition(ProvisionState::Ready { binary_path });
    }
}

/// The single in-flight download.
struct FetchTask {
    handle: JoinHandle<()>,
    cancel: CancelHandle,
}

/// Owns provisioning state and drives check, fetch, verify, commit and reap.
pub struct Provisioner<F: Fetcher> {
    shared: Arc<Shared>,
    layout: StorageLayout,
    fetcher: Arc<F>,
    runtime: Handle,
    migrated: AtomicBool,
    task: Arc<Mutex<Option<FetchTask>>>,
}

impl<F: Fetcher> Provisioner<F> {
    /// Creates a provisioner in `Uninitialized`. Background work is spawned on
    /// `runtime`.
    #[must_use]
    pub fn new(
        descriptor: ArtifactDescriptor,
        layout: StorageLayout,
        fetcher: Arc<F>,
        notifier: Notifier,
        runtime: Handle,
    ) -> Self {
        let (state, _) = watch::channel(ProvisionState::Uninitialized);
        Self {
            shared: Arc::new(Shared {
                descriptor,
                state,
                notifier,
            }),
            layout,
            fetcher,
            runtime,
            migrated: AtomicBool::new(false),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// The descriptor being provisioned.
    #[must_use]
    pub fn descriptor(&self) -> &ArtifactDescriptor {
        &self.shared.descriptor
    }

    /// Where the artifact lives once installed.
    #[must_use]
    pub fn expected_path(&self) -> PathBuf {
        self.layout
            .artifact_dir()
            .join(self.shared.descriptor.file_name())
    }

    /// Starts provisioning unless already ready or in progress.
    ///
    /// Runs legacy migration (once per provisioner), resolves storage and
    /// verifies the cached artifact on the calling thread. Downloads run in
    /// the background.
    ///
    /// The cache check hashes the whole artifact. Async callers should run
    /// this off the runtime's worker threads, e.g. inside
    /// [`tokio::task::block_in_place`] or `spawn_blocking`.
    pub fn setup(&self) -> SetupOutcome {
        let mut previous = ProvisionState::Uninitialized;
        let claimed = self.shared.state.send_if_modified(|state| {
            if state.is_in_progress() || matches!(state, ProvisionState::Ready { .. }) {
                previous = state.clone();
                false
            } else {
                previous = std::mem::replace(state, ProvisionState::Checking);
                true
            }
        });

        if !claimed {
            debug!("setup() ignored in state {}", previous.name());
            return if previous.is_in_progress() {
                SetupOutcome::AlreadyInProgress
            } else {
                SetupOutcome::AlreadyReady
            };
        }

        info!("Provisioner: {} -> checking", previous.name());
        self.shared.notifier.send(EventKind::StateChanged {
            from: previous.name().to_string(),
            to: ProvisionState::Checking.name().to_string(),
        });

        self.migrate_once();

        let dir = match self.layout.resolve() {
            Ok(dir) => dir,
            Err(e) => {
                let reason = ProvisionError::Storage {
                    path: self.layout.artifact_dir(),
                    cause: e.to_string(),
                };
                self.shared.fail(reason.clone());
                return SetupOutcome::Failed(reason);
            }
        };

        let binary_path = dir.join(self.shared.descriptor.file_name());
        if verify::matches(&binary_path, self.shared.descriptor.expected_digest()) {
            info!("Cached artifact {} is valid", binary_path.display());
            self.shared.become_ready(&dir, binary_path.clone());
            return SetupOutcome::Ready(binary_path);
        }

        self.start_fetch(dir, binary_path);
        SetupOutcome::FetchStarted
    }

    fn migrate_once(&self) {
        if self.migrated.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(legacy) = self.layout.legacy_dir() else {
            return;
        };
        match self.layout.migrate_legacy() {
            MigrationOutcome::NotNeeded => {}
            MigrationOutcome::Moved(to) => self.shared.notifier.send(EventKind::Migrated {
                from: legacy,
                to: Some(to),
            }),
            MigrationOutcome::Discarded { cause } => {
                warn!("Discarded legacy storage {}: {}", legacy.display(), cause);
                self.shared.notifier.send(EventKind::Migrated {
                    from: legacy,
                    to: None,
                });
            }
        }
    }

    fn start_fetch(&self, dir: PathBuf, binary_path: PathBuf) {
        let mut slot = match self.task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };

        self.shared.transition(ProvisionState::Fetching);
        self.shared.notifier.send(EventKind::DownloadStarted {
            url: self.shared.descriptor.url().to_string(),
        });

        let (cancel, signal) = cancel_pair();
        let shared = self.shared.clone();
        let fetcher = self.fetcher.clone();
        let task = self.task.clone();

        let handle = self.runtime.spawn(async move {
            let run = run_fetch(&shared, fetcher.as_ref(), &binary_path, signal);
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(ProvisionError::TaskAborted(
                    "download task panicked".to_string(),
                )),
            };

            // Cleared before the final transition, so no later setup() can
            // have stored a newer task yet.
            release(&task);

            match result {
                Ok(()) => {
                    info!("Installed {}", binary_path.display());
                    shared.notifier.send(EventKind::DownloadSucceeded {
                        path: binary_path.clone(),
                    });
                    shared.become_ready(&dir, binary_path);
                }
                Err(reason) => shared.fail(reason),
            }
        });

        *slot = Some(FetchTask { handle, cancel });
    }

    /// True only in `Ready`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.state.borrow(), ProvisionState::Ready { .. })
    }

    /// The verified artifact path; `None` unless ready.
    #[must_use]
    pub fn binary_path(&self) -> Option<PathBuf> {
        match &*self.shared.state.borrow() {
            ProvisionState::Ready { binary_path } => Some(binary_path.clone()),
            _ => None,
        }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ProvisionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ProvisionState> {
        self.shared.state.subscribe()
    }

    /// Waits until no check or fetch is running and returns the state.
    pub async fn wait(&self) -> ProvisionState {
        let mut rx = self.shared.state.subscribe();
        let settled = rx.wait_for(|state| !state.is_in_progress()).await;
        match settled {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Cancels any in-flight fetch, waits for it to stop, and resets to
    /// `Uninitialized`.
    pub async fn shutdown(&self) {
        let task = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Download task ended abnormally: {}", e);
            }
        }

        if *self.shared.state.borrow() != ProvisionState::Uninitialized {
            self.shared.transition(ProvisionState::Uninitialized);
        }
    }
}

impl<F: Fetcher> Drop for Provisioner<F> {
    fn drop(&mut self) {
        let task = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.cancel.cancel();
        }
    }
}

/// Drops the finished task's slot entry.
fn release(task: &Mutex<Option<FetchTask>>) {
    let finished = match task.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    drop(finished);
}

/// Fetches and re-verifies the artifact. State transitions are left to the
/// caller.
async fn run_fetch<F: Fetcher>(
    shared: &Shared,
    fetcher: &F,
    binary_path: &Path,
    cancel: CancelSignal,
) -> Result<(), ProvisionError> {
    let progress = progress_reporter(shared.notifier.clone());
    fetcher
        .fetch(shared.descriptor.url(), binary_path, Some(progress), cancel)
        .await?;

    verify_download(binary_path, shared.descriptor.expected_digest()).await
}

/// Re-verifies a fresh download; deletes it if the digest is wrong.
async fn verify_download(path: &Path, expected: &str) -> Result<(), ProvisionError> {
    let owned = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || verify::digest_of(&owned))
        .await
        .map_err(|e| ProvisionError::TaskAborted(e.to_string()))?;

    let actual = match digest {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => return Ok(()),
        Ok(actual) => actual,
        Err(e) => {
            debug!("Cannot read download {}: {}", path.display(), e);
            "unreadable".to_string()
        }
    };

    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Could not remove corrupt download {}: {}", path.display(), e);
    }

    Err(ProvisionError::IntegrityMismatch {
        expected: expected.to_string(),
        actual,
    })
}

fn progress_reporter(notifier: Notifier) -> Arc<ProgressFn> {
    let last = AtomicU64::new(0);
    Arc::new(move |received: u64, total: Option<u64>| {
        let previous = last.load(Ordering::Relaxed);
        let done = total.is_some_and(|t| received >= t);
        if done || received.saturating_sub(previous) >= PROGRESS_STEP {
            last.store(received, Ordering::Relaxed);
            notifier.send(EventKind::DownloadProgress { received, total });
        }
    })
}
