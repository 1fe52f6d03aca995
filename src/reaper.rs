// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Removal of superseded artifact files.
//!
//! Reaping is best-effort: a file that cannot be deleted is reported in the
//! [`ReapReport`] and logged, never turned into an error.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What a reap pass did.
#[derive(Debug, Default)]
pub struct ReapReport {
    /// Files that were deleted.
    pub removed: Vec<PathBuf>,
    /// Files that matched but could not be deleted.
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Deletes every file in `directory` with the given extension except
/// `keep_path`.
///
/// The extension match is case-insensitive. Subdirectories are left alone.
///
/// # Errors
///
/// Returns an error only if `directory` itself cannot be listed.
pub fn reap(directory: &Path, keep_path: &Path, extension: &str) -> io::Result<ReapReport> {
    let keep_name = keep_path.file_name();
    let keep_in_dir = keep_path.parent().is_some_and(|parent| same_dir(parent, directory));
    let mut report = ReapReport::default();

    for entry in std::fs::read_dir(directory)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();

        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }

        let matches_ext = path
            .extension()
            .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension));
        if !matches_ext {
            continue;
        }

        if keep_in_dir && path.file_name() == keep_name {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Reaped stale artifact {}", path.display());
                report.removed.push(path);
            }
            Err(e) => {
                warn!("Could not remove stale artifact {}: {}", path.display(), e);
                report.failed.push((path, e));
            }
        }
    }

    Ok(report)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
