// src/manifest/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::errors::{GraphError, Result};
use crate::manifest::model::{Manifest, RawManifest};

/// Load a manifest document from a path without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawManifest> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawManifest = serde_json::from_str(&contents).map_err(|e| {
        GraphError::InvalidDocument(format!("{}: {e}", path.display()))
    })?;

    Ok(raw)
}

/// Load a manifest and validate it into a [`Manifest`].
///
/// Fails with a [`GraphError`] on duplicate ids, unknown dependency or hint
/// ids, and dependency cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Manifest> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let manifest = Manifest::try_from(raw)?;
    debug!(
        path = %path.display(),
        wave = %manifest.wave,
        tasks = manifest.len(),
        digest = %manifest.digest,
        "manifest loaded"
    );
    Ok(manifest)
}
