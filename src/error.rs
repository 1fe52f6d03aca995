// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for artifact provisioning.
//!
//! `DescriptorError` is fatal at startup. `FetchError` and `ProvisionError`
//! are recoverable: they leave the provisioner in `Failed` and a later
//! `setup()` starts over.

use std::path::PathBuf;
use thiserror::Error;

/// The declared artifact source is unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// The declaration is not a valid record.
    #[error("malformed descriptor: {0}")]
    Syntax(String),

    /// A required field is absent or empty.
    #[error("malformed descriptor: missing field `{0}`")]
    MissingField(&'static str),

    /// The digest is not hex of the expected length.
    #[error("malformed descriptor: sha256 must be {expected} hex characters, got {value:?}")]
    InvalidDigest {
        /// The offending digest string.
        value: String,
        /// Required number of hex characters.
        expected: usize,
    },

    /// The URL template references a placeholder other than `{version}`.
    #[error("malformed descriptor: unknown placeholder `{{{0}}}` in url")]
    UnknownPlaceholder(String),

    /// The expanded URL does not parse or has no file name.
    #[error("malformed descriptor: invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// The expanded URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Failure while retrieving the artifact.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The destination directory could not be created.
    #[error("storage unavailable at {path}: {cause}")]
    StorageUnavailable {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying OS error.
        cause: String,
    },

    /// Network failure, non-success status, or write failure.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The fetch was cancelled before it completed.
    #[error("download cancelled")]
    Cancelled,
}

/// Why a provisioning attempt ended in `Failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// The storage directory could not be resolved.
    #[error("cannot prepare storage directory {path}: {cause}")]
    Storage {
        /// Directory that could not be prepared.
        path: PathBuf,
        /// Underlying OS error.
        cause: String,
    },

    /// The fetch itself failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The downloaded file does not carry the pinned digest.
    #[error("downloaded artifact is corrupt: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch {
        /// Digest pinned by the descriptor.
        expected: String,
        /// Digest of the downloaded file, or `unreadable`.
        actual: String,
    },

    /// The background task ended without reporting (panicked or aborted).
    #[error("download task aborted: {0}")]
    TaskAborted(String),
}
