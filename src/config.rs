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

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::descriptor::{self, ArtifactDescriptor};
use crate::storage::{self, StorageLayout};

/// Package identity used when none is configured.
pub const DEFAULT_PACKAGE_ID: &str = "LSP-tagml";

/// Default whole-transfer timeout for the artifact download.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

/// Runtime settings for the provisioner and its CLI.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Storage identity; names the per-package directory.
    #[serde(default = "default_package_id")]
    pub package_id: String,

    /// Parent directory for artifact storage (default: platform data dir)
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Parent of the legacy flat cache (default: platform cache dir)
    #[serde(default)]
    pub legacy_dir: Option<PathBuf>,

    /// Download timeout in seconds; 0 disables it (default: 300)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Descriptor file overriding the bundled `server.json`
    #[serde(default)]
    pub descriptor: Option<PathBuf>,
}

fn default_package_id() -> String {
    DEFAULT_PACKAGE_ID.to_string()
}

const fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            package_id: default_package_id(),
            storage_dir: None,
            legacy_dir: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            descriptor: None,
        }
    }
}

impl Settings {
    /// Load settings from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read, the merged settings do
    /// not deserialize, or `package_id` is not a single directory name.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("package_id", DEFAULT_PACKAGE_ID)?
            .set_default("fetch_timeout_secs", DEFAULT_FETCH_TIMEOUT_SECS)?;

        // 2. Load from user config directory (~/.config/lsp-tagml/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("lsp-tagml").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (LSP_TAGML_STORAGE_DIR, etc.)
        builder = builder.add_source(config::Environment::with_prefix("LSP_TAGML").try_parsing(true));

        let settings = builder
            .build()
            .context("Failed to build configuration")?;

        let settings: Self = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if !storage::is_valid_package_id(&settings.package_id) {
            bail!(
                "Invalid package_id {:?}: must be a single directory name",
                settings.package_id
            );
        }

        Ok(settings)
    }

    /// The download timeout, or `None` if disabled.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Option<Duration> {
        if self.fetch_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.fetch_timeout_secs))
        }
    }

    /// Storage layout derived from these settings.
    #[must_use]
    pub fn layout(&self) -> StorageLayout {
        let root = self
            .storage_dir
            .clone()
            .unwrap_or_else(storage::default_root);
        let layout = StorageLayout::new(root, self.package_id.clone());

        match self.legacy_dir.clone().or_else(storage::default_legacy_root) {
            Some(legacy) => layout.with_legacy_root(legacy),
            None => layout,
        }
    }

    /// Loads the configured descriptor, or the bundled one.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor file cannot be read or is malformed.
    pub fn descriptor(&self) -> Result<ArtifactDescriptor> {
        match &self.descriptor {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
                descriptor::from_json(&text)
                    .with_context(|| format!("Invalid descriptor {}", path.display()))
            }
            None => descriptor::bundled().context("Bundled descriptor is invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.package_id, "LSP-tagml");
        assert_eq!(settings.fetch_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let settings = Settings {
            fetch_timeout_secs: 0,
            ..Settings::default()
        };
        assert_eq!(settings.fetch_timeout(), None);
    }

    #[test]
    fn test_layout_uses_configured_dirs() {
        let settings = Settings {
            storage_dir: Some(PathBuf::from("/data")),
            legacy_dir: Some(PathBuf::from("/cache")),
            ..Settings::default()
        };
        let layout = settings.layout();
        assert_eq!(layout.artifact_dir(), PathBuf::from("/data/LSP-tagml"));
        assert_eq!(layout.legacy_dir(), Some(PathBuf::from("/cache/LSP-tagml")));
    }

    #[test]
    fn test_load_from_explicit_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "package_id = \"LSP-test\"\nfetch_timeout_secs = 5\nstorage_dir = \"/srv/artifacts\"\n",
        )?;

        let settings = Settings::load(Some(path))?;

        assert_eq!(settings.package_id, "LSP-test");
        assert_eq!(settings.fetch_timeout_secs, 5);
        assert_eq!(settings.storage_dir, Some(PathBuf::from("/srv/artifacts")));
        Ok(())
    }

    #[test]
    fn test_load_rejects_unsafe_package_id() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for bad in ["", "..", "a/b"] {
            let path = dir.path().join("config.toml");
            std::fs::write(&path, format!("package_id = {bad:?}\n"))?;

            let err = Settings::load(Some(path))
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default();
            assert!(err.contains("Invalid package_id"), "{bad:?}: {err}");
        }
        Ok(())
    }

    #[test]
    fn test_descriptor_override_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            format!(
                r#"{{"version": "9", "url": "https://x/s-{{version}}.jar", "sha256": "{}"}}"#,
                "a".repeat(64)
            ),
        )?;
        let settings = Settings {
            descriptor: Some(path),
            ..Settings::default()
        };

        let desc = settings.descriptor()?;
        assert_eq!(desc.file_name(), "s-9.jar");
        Ok(())
    }

    #[test]
    fn test_descriptor_override_missing_file_errors() {
        let settings = Settings {
            descriptor: Some(PathBuf::from("/nonexistent/server.json")),
            ..Settings::default()
        };
        assert!(settings.descriptor().is_err());
    }
}
