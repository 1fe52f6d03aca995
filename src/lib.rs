// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Provisioning for the TAGML language server artifact.
//!
//! The editor binding asks a [`Provisioner`] whether the server jar is
//! ready. On first use (or after an upgrade) the provisioner downloads the
//! pinned artifact in the background, verifies its SHA-256 digest, and
//! removes superseded copies. The binding only launches the server once
//! [`Provisioner::is_ready`] returns true.

/// Terminal output helpers for the CLI.
pub mod cli;
/// Layered runtime settings.
pub mod config;
/// Artifact descriptor loading and validation.
pub mod descriptor;
/// Error taxonomy.
pub mod error;
/// User-visible provisioning notifications.
pub mod events;
/// Network retrieval of the artifact.
pub mod fetch;
/// The provisioning state machine.
pub mod provisioner;
/// Removal of superseded artifact files.
pub mod reaper;
/// Storage directory resolution and legacy migration.
pub mod storage;
/// SHA-256 integrity checks.
pub mod verify;

pub use descriptor::ArtifactDescriptor;
pub use error::{DescriptorError, FetchError, ProvisionError};
pub use events::{EventKind, Notifier, ProvisionEvent};
pub use fetch::{Fetcher, HttpFetcher};
pub use provisioner::{ProvisionState, Provisioner, SetupOutcome};
pub use storage::StorageLayout;
