/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! CLI utilities for terminal output: colors, notification text, PATH lookup.

use crossterm::tty::IsTty;
use std::io::stderr;
use std::path::{Path, PathBuf};

use crate::events::EventKind;

/// Configuration for color output
#[derive(Debug, Clone)]
pub struct ColorConfig {
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new ColorConfig, auto-detecting TTY unless nocolor is true
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stderr().is_tty(),
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Green (success)
    pub fn green(&self, s: &str) -> String {
        self.paint("32", s)
    }

    /// Red (errors)
    pub fn red(&self, s: &str) -> String {
        self.paint("31", s)
    }

    /// Yellow (in progress, warnings)
    pub fn yellow(&self, s: &str) -> String {
        self.paint("33", s)
    }

    /// Dim text
    pub fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    /// Bold text
    pub fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }
}

/// Human-readable byte count (`1.5 MiB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut unit = 0;
    let mut whole = bytes;
    let mut rem = 0;
    while whole >= 1024 && unit < UNITS.len() - 1 {
        rem = whole % 1024;
        whole /= 1024;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{whole}.{} {}", rem * 10 / 1024, UNITS[unit])
    }
}

/// The message a host shows for a notification, or `None` for events that
/// are only interesting in logs.
pub fn notification_text(kind: &EventKind) -> Option<String> {
    match kind {
        EventKind::DownloadStarted { url } => {
            Some(format!("Downloading TAGML language server from {url}"))
        }
        EventKind::DownloadProgress {
            received,
            total: Some(total),
        } => Some(format!(
            "  {} / {}",
            format_bytes(*received),
            format_bytes(*total)
        )),
        EventKind::DownloadProgress {
            received,
            total: None,
        } => Some(format!("  {}", format_bytes(*received))),
        EventKind::DownloadSucceeded { path } => Some(format!(
            "TAGML language server installed at {}; restart the editor to activate it",
            path.display()
        )),
        EventKind::DownloadFailed { cause } => {
            Some(format!("Error downloading TAGML server binary: {cause}"))
        }
        EventKind::Migrated { from, to: Some(to) } => Some(format!(
            "Moved legacy storage {} -> {}",
            from.display(),
            to.display()
        )),
        EventKind::Migrated { from, to: None } => {
            Some(format!("Removed legacy storage {}", from.display()))
        }
        EventKind::StateChanged { .. } | EventKind::Reaped { .. } => None,
    }
}

/// Finds `command` on `$PATH`. Commands containing a separator are checked
/// directly.
pub fn find_on_path(command: &str) -> Option<PathBuf> {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        let path = Path::new(command);
        return path.is_file().then(|| path.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(command);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{command}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
