// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Storage locations for downloaded artifacts.
//!
//! Each package identity owns one directory under the storage root. Older
//! releases kept artifacts in a flat cache directory; [`migrate`] moves that
//! legacy directory wholesale under the current root, or deletes it if the
//! move fails.

use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name used under the platform data and cache directories.
const APP_DIR: &str = "lsp-tagml";

/// Where artifacts for one package identity live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Parent of the per-package directory.
    pub root: PathBuf,
    /// Package identity; names the per-package directory.
    pub package_id: String,
    /// Parent of the legacy per-package directory, if one should be migrated.
    pub legacy_root: Option<PathBuf>,
}

/// Result of a legacy migration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing at the legacy path.
    NotNeeded,
    /// The legacy directory now lives at this path.
    Moved(PathBuf),
    /// The move failed and the legacy directory was deleted instead.
    Discarded {
        /// Why the move failed.
        cause: String,
    },
}

impl StorageLayout {
    /// Creates a layout with an explicit root and no legacy location.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, package_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            package_id: package_id.into(),
            legacy_root: None,
        }
    }

    /// Adds a legacy root whose `<package_id>` directory should be migrated.
    #[must_use]
    pub fn with_legacy_root(mut self, legacy_root: impl Into<PathBuf>) -> Self {
        self.legacy_root = Some(legacy_root.into());
        self
    }

    /// The per-package directory (may not exist yet).
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join(&self.package_id)
    }

    /// The legacy per-package directory, if a legacy root is configured.
    #[must_use]
    pub fn legacy_dir(&self) -> Option<PathBuf> {
        self.legacy_root
            .as_ref()
            .map(|legacy| legacy.join(&self.package_id))
    }

    /// Migrates the legacy directory if present. Errors are logged, not returned.
    pub fn migrate_legacy(&self) -> MigrationOutcome {
        let Some(legacy) = self.legacy_dir() else {
            return MigrationOutcome::NotNeeded;
        };

        if !is_valid_package_id(&self.package_id) {
            warn!("Skipping legacy migration for invalid package id {:?}", self.package_id);
            return MigrationOutcome::NotNeeded;
        }

        if overlaps(&legacy, &self.root) || overlaps(&legacy, &self.artifact_dir()) {
            debug!(
                "Legacy storage {} overlaps {}, nothing to migrate",
                legacy.display(),
                self.root.display()
            );
            return MigrationOutcome::NotNeeded;
        }

        match migrate(&legacy, &self.root) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Failed to clean up legacy storage {}: {}",
                    legacy.display(),
                    e
                );
                MigrationOutcome::NotNeeded
            }
        }
    }

    /// Creates the per-package directory if needed and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn resolve(&self) -> io::Result<PathBuf> {
        resolve(&self.root, &self.package_id)
    }
}

/// True if `package_id` names exactly one directory entry.
///
/// Empty ids, `.`, `..` and anything containing a path separator would
/// resolve outside the per-package directory.
#[must_use]
pub fn is_valid_package_id(package_id: &str) -> bool {
    if package_id.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(package_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// True if one path equals or contains the other.
///
/// Existing prefixes are canonicalized. Comparison ignores case on
/// platforms whose default file systems do.
fn overlaps(a: &Path, b: &Path) -> bool {
    let (a, b) = (comparable(a), comparable(b));
    a.starts_with(&b) || b.starts_with(&a)
}

fn comparable(path: &Path) -> PathBuf {
    let normalized = normalize(path);
    if cfg!(any(windows, target_os = "macos")) {
        PathBuf::from(normalized.to_string_lossy().to_lowercase())
    } else {
        normalized
    }
}

/// Canonicalizes the longest existing prefix of `path` and re-appends the rest.
fn normalize(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Default storage root: `$XDG_DATA_HOME/lsp-tagml`, or the temp dir.
#[must_use]
pub fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Default legacy root: the platform cache directory, where older releases
/// stored `<package_id>/` directly.
#[must_use]
pub fn default_legacy_root() -> Option<PathBuf> {
    dirs::cache_dir()
}

/// Returns `root/package_id`, creating it and its parents if absent.
///
/// # Errors
///
/// Returns an error if `package_id` is not a single path component or the
/// directory cannot be created.
pub fn resolve(root: &Path, package_id: &str) -> io::Result<PathBuf> {
    if !is_valid_package_id(package_id) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid package id {package_id:?}"),
        ));
    }
    let dir = root.join(package_id);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Moves `old_path` under `new_parent`; if that fails, deletes `old_path`.
///
/// # Errors
///
/// Returns an error only when the move failed and the fallback delete also
/// failed. Callers treat this as advisory.
pub fn migrate(old_path: &Path, new_parent: &Path) -> io::Result<MigrationOutcome> {
    if !old_path.is_dir() {
        return Ok(MigrationOutcome::NotNeeded);
    }

    let Some(name) = old_path.file_name() else {
        return Ok(MigrationOutcome::NotNeeded);
    };
    let target = new_parent.join(name);

    let moved = std::fs::create_dir_all(new_parent).and_then(|()| {
        if target.exists() && !is_empty_dir(&target) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ));
        }
        std::fs::rename(old_path, &target)
    });

    match moved {
        Ok(()) => {
            info!(
                "Migrated legacy storage {} -> {}",
                old_path.display(),
                target.display()
            );
            Ok(MigrationOutcome::Moved(target))
        }
        Err(e) => {
            debug!(
                "Move of {} failed ({}), removing it instead",
                old_path.display(),
                e
            );
            std::fs::remove_dir_all(old_path)?;
            Ok(MigrationOutcome::Discarded {
                cause: e.to_string(),
            })
        }
    }
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_resolve_creates_nested_dirs_idempotently() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("a").join("b");

        let first = resolve(&root, "LSP-tagml")?;
        assert!(first.is_dir());
        assert_eq!(first, root.join("LSP-tagml"));

        let second = resolve(&root, "LSP-tagml")?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_migrate_moves_directory_wholesale() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let old = dir.path().join("cache").join("LSP-tagml");
        std::fs::create_dir_all(&old)?;
        std::fs::write(old.join("srv-0.1.jar"), b"jar")?;
        std::fs::write(old.join("notes.txt"), b"txt")?;
        let new_parent = dir.path().join("data");

        let outcome = migrate(&old, &new_parent)?;

        let target = new_parent.join("LSP-tagml");
        assert_eq!(outcome, MigrationOutcome::Moved(target.clone()));
        assert!(!old.exists());
        assert_eq!(std::fs::read(target.join("srv-0.1.jar"))?, b"jar");
        assert_eq!(std::fs::read(target.join("notes.txt"))?, b"txt");
        Ok(())
    }

    #[test]
    fn test_migrate_failure_removes_old_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let old = dir.path().join("cache").join("LSP-tagml");
        std::fs::create_dir_all(&old)?;
        std::fs::write(old.join("srv-0.1.jar"), b"jar")?;

        // A file where the directory should land makes the move fail.
        let new_parent = dir.path().join("data");
        std::fs::create_dir_all(&new_parent)?;
        std::fs::write(new_parent.join("LSP-tagml"), b"in the way")?;

        let outcome = migrate(&old, &new_parent)?;

        assert!(matches!(outcome, MigrationOutcome::Discarded { .. }));
        assert!(!old.exists());
        assert_eq!(std::fs::read(new_parent.join("LSP-tagml"))?, b"in the way");
        Ok(())
    }

    #[test]
    fn test_migrate_into_populated_target_removes_old() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let old = dir.path().join("cache").join("LSP-tagml");
        std::fs::create_dir_all(&old)?;
        std::fs::write(old.join("old.jar"), b"old")?;

        let new_parent = dir.path().join("data");
        let existing = new_parent.join("LSP-tagml");
        std::fs::create_dir_all(&existing)?;
        std::fs::write(existing.join("current.jar"), b"current")?;

        let outcome = migrate(&old, &new_parent)?;

        assert!(matches!(outcome, MigrationOutcome::Discarded { .. }));
        assert!(!old.exists());
        assert!(existing.join("current.jar").exists());
        assert!(!existing.join("old.jar").exists());
        Ok(())
    }

    #[test]
    fn test_migrate_missing_old_is_noop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let outcome = migrate(&dir.path().join("nope"), &dir.path().join("data"))?;
        assert_eq!(outcome, MigrationOutcome::NotNeeded);
        assert!(!dir.path().join("data").exists());
        Ok(())
    }

    #[test]
    fn test_layout_migrate_then_resolve() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let legacy_root = dir.path().join("cache");
        std::fs::create_dir_all(legacy_root.join("LSP-tagml"))?;
        std::fs::write(legacy_root.join("LSP-tagml").join("srv.jar"), b"x")?;

        let layout =
            StorageLayout::new(dir.path().join("data"), "LSP-tagml").with_legacy_root(&legacy_root);

        assert!(matches!(
            layout.migrate_legacy(),
            MigrationOutcome::Moved(_)
        ));
        let resolved = layout.resolve()?;
        assert_eq!(resolved, layout.artifact_dir());
        assert!(resolved.join("srv.jar").exists());

        // Second run finds nothing to migrate.
        assert_eq!(layout.migrate_legacy(), MigrationOutcome::NotNeeded);
        Ok(())
    }

    #[test]
    fn test_legacy_dir_equal_to_root_is_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = StorageLayout::new(dir.path().join("LSP-tagml"), "LSP-tagml")
            .with_legacy_root(dir.path());
        let artifact_dir = layout.resolve()?;
        std::fs::write(artifact_dir.join("srv-0.1.jar"), b"verified")?;

        for _ in 0..2 {
            assert_eq!(layout.migrate_legacy(), MigrationOutcome::NotNeeded);
        }
        assert_eq!(std::fs::read(artifact_dir.join("srv-0.1.jar"))?, b"verified");
        Ok(())
    }

    #[test]
    fn test_legacy_dir_inside_artifact_dir_is_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = StorageLayout::new(dir.path(), "LSP-tagml")
            .with_legacy_root(dir.path().join("LSP-tagml").join("nested"));
        let legacy = layout.legacy_dir().unwrap_or_default();
        std::fs::create_dir_all(&legacy)?;
        std::fs::write(legacy.join("keep.jar"), b"x")?;

        assert_eq!(layout.migrate_legacy(), MigrationOutcome::NotNeeded);
        assert!(legacy.join("keep.jar").exists());
        Ok(())
    }

    #[cfg(any(windows, target_os = "macos"))]
    #[test]
    fn test_legacy_dir_differing_only_in_case_is_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = StorageLayout::new(dir.path().join("lsp-tagml"), "LSP-tagml")
            .with_legacy_root(dir.path());
        let legacy = dir.path().join("LSP-tagml");
        layout.resolve()?;
        assert!(legacy.is_dir());

        assert_eq!(layout.migrate_legacy(), MigrationOutcome::NotNeeded);
        assert!(layout.artifact_dir().is_dir());
        Ok(())
    }

    #[test]
    fn test_package_id_validation() {
        assert!(is_valid_package_id("LSP-tagml"));
        assert!(is_valid_package_id("tagml.server"));
        for bad in ["", ".", "..", "a/b", "a\\b", "/abs", "../up"] {
            assert!(!is_valid_package_id(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_empty_package_id_never_migrates_whole_cache() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(cache.join("pip"))?;
        std::fs::write(cache.join("pip").join("wheel.whl"), b"unrelated")?;

        let layout = StorageLayout::new(dir.path().join("data"), "").with_legacy_root(&cache);

        assert_eq!(layout.migrate_legacy(), MigrationOutcome::NotNeeded);
        assert!(cache.join("pip").join("wheel.whl").exists());
        assert!(layout.resolve().is_err());
        Ok(())
    }
}
