// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Artifact descriptor: the pinned version, source URL and expected digest.
//!
//! The declaration is normally the `server.json` resource bundled with the
//! distribution, but [`load`] only sees a [`RawDescriptor`], so any source
//! (inline fixtures included) works.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::DescriptorError;

/// Number of hex characters in a SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Descriptor resource shipped with this distribution.
pub const BUNDLED: &str = include_str!("../server.json");

/// The declaration as written, before validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDescriptor {
    /// Pinned artifact version.
    #[serde(default)]
    pub version: Option<String>,
    /// Download URL, may contain `{version}` or `${version}`.
    #[serde(default)]
    pub url: Option<String>,
    /// Expected SHA-256, hex, any case.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// A validated, immutable artifact descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    version: String,
    url: String,
    expected_digest: String,
    file_name: String,
}

impl ArtifactDescriptor {
    /// Pinned artifact version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Download URL with the version substituted.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Expected SHA-256, lowercase hex.
    #[must_use]
    pub fn expected_digest(&self) -> &str {
        &self.expected_digest
    }

    /// File name of the artifact, taken from the last URL path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Lowercase extension of the artifact file (`jar` for the language server).
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }
}

/// Parses a JSON declaration and validates it.
///
/// # Errors
///
/// Returns [`DescriptorError`] if the JSON is invalid or [`load`] rejects it.
pub fn from_json(text: &str) -> Result<ArtifactDescriptor, DescriptorError> {
    let raw: RawDescriptor =
        serde_json::from_str(text).map_err(|e| DescriptorError::Syntax(e.to_string()))?;
    load(raw)
}

/// Loads the descriptor bundled with this distribution.
///
/// # Errors
///
/// Returns [`DescriptorError`] if the bundled resource is malformed.
pub fn bundled() -> Result<ArtifactDescriptor, DescriptorError> {
    from_json(BUNDLED)
}

/// Validates a raw declaration and substitutes the version into the URL.
///
/// # Errors
///
/// Returns [`DescriptorError`] if a field is missing, the digest is not
/// 64 hex characters, the URL has an unknown placeholder, or the expanded
/// URL has no file name.
pub fn load(raw: RawDescriptor) -> Result<ArtifactDescriptor, DescriptorError> {
    let version = required(raw.version, "version")?;
    let template = required(raw.url, "url")?;
    let digest = required(raw.sha256, "sha256")?;

    if digest.len() != DIGEST_HEX_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DescriptorError::InvalidDigest {
            value: digest,
            expected: DIGEST_HEX_LEN,
        });
    }

    let url = expand_url(&template, &version)?;
    let file_name = file_name_of(&url)?;

    Ok(ArtifactDescriptor {
        version,
        url,
        expected_digest: digest.to_ascii_lowercase(),
        file_name,
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DescriptorError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(DescriptorError::MissingField(field))
}

/// Replaces every `{version}` / `${version}` in the template.
fn expand_url(template: &str, version: &str) -> Result<String, DescriptorError> {
    let placeholder = Regex::new(r"\$?\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| DescriptorError::Syntax(e.to_string()))?;

    if let Some(unknown) = placeholder
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .find(|name| name.as_str() != "version")
    {
        return Err(DescriptorError::UnknownPlaceholder(
            unknown.as_str().to_string(),
        ));
    }

    Ok(placeholder.replace_all(template, version).into_owned())
}

fn file_name_of(url: &str) -> Result<String, DescriptorError> {
    let parsed = Url::parse(url).map_err(|e| DescriptorError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| DescriptorError::InvalidUrl {
            url: url.to_string(),
            reason: "no file name in path".to_string(),
        })
}
