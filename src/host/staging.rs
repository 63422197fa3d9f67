//! The staging directory contract.
//!
//! A kernel repository looks like this; the host is run from `_build`:
//!
//! ```text
//! <kernel repo>/
//!     vmlinuz
//!     lib/modules/<release>/...
//!     *.dtb
//!     overlays/                 (raspberrypi only)
//!     _build/
//!         series                patch file names, one per line
//!         upstream-url.txt
//!         config.addendum.txt
//!         *.patch
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RebuildError;
use crate::{ADDENDUM_FILENAME, SERIES_FILENAME, STAGING_SUFFIX, UPSTREAM_URL_FILENAME};

/// Refuse to touch anything unless `path` is a `_build` directory.
pub fn check_staging_dir(path: &Path) -> Result<()> {
    let display = path.to_string_lossy();
    let trimmed = display.trim_end_matches('/');
    if trimmed.ends_with(&format!("/{STAGING_SUFFIX}")) {
        return Ok(());
    }
    Err(RebuildError::NotStagingDirectory {
        path: path.to_path_buf(),
        suffix: STAGING_SUFFIX,
    }
    .into())
}

/// Patch file names listed in a `series` file. Blank lines are skipped.
pub fn parse_series(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inputs and destinations resolved from a staging directory.
#[derive(Debug, Clone)]
pub struct StagingManifest {
    pub staging_dir: PathBuf,
    /// Patch paths relative to the staging directory, in series order.
    pub patches: Vec<String>,
    pub upstream_url: String,
    /// `../vmlinuz`
    pub kernel_path: PathBuf,
    /// `../lib`
    pub lib_path: PathBuf,
    pub addendum_path: PathBuf,
}

impl StagingManifest {
    /// Read `series` and `upstream-url.txt` and resolve every path the run
    /// depends on. The first missing one is the error.
    pub fn load(staging_dir: &Path) -> Result<Self> {
        let series_path = find(&staging_dir.join(SERIES_FILENAME))?;
        let series = fs::read_to_string(&series_path)
            .with_context(|| format!("Failed to read '{}'", series_path.display()))?;
        let patches = parse_series(&series);
        for patch in &patches {
            find(&staging_dir.join(patch))?;
        }

        let kernel_path = find(&staging_dir.join("../vmlinuz"))?;
        let lib_path = find(&staging_dir.join("../lib"))?;
        let addendum_path = find(&staging_dir.join(ADDENDUM_FILENAME))?;

        let url_path = find(&staging_dir.join(UPSTREAM_URL_FILENAME))?;
        let upstream_url = fs::read_to_string(&url_path)
            .with_context(|| format!("Failed to read '{}'", url_path.display()))?
            .trim()
            .to_string();
        if upstream_url.is_empty() {
            anyhow::bail!("'{}' is empty", url_path.display());
        }

        tracing::info!(
            "staging manifest: {} patches, upstream {}",
            patches.len(),
            upstream_url
        );
        Ok(Self {
            staging_dir: staging_dir.to_path_buf(),
            patches,
            upstream_url,
            kernel_path,
            lib_path,
            addendum_path,
        })
    }

    /// The kernel repository the staging directory lives in.
    pub fn repo_dir(&self) -> PathBuf {
        self.staging_dir.join("..")
    }
}

fn find(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        Ok(path.to_path_buf())
    } else {
        Err(RebuildError::MissingFile(path.to_path_buf()).into())
    }
}
