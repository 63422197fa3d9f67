//! `build-manifest.json`: what a rebuild produced, with content digests.
//!
//! The kernel, modules and device trees are built with pinned metadata, so two
//! runs over the same upstream archive and patch series must produce the same
//! `artifacts` map. Diffing two manifests is the quickest way to check that.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use walkdir::WalkDir;

use crate::target::BuildTarget;

pub const MANIFEST_FILENAME: &str = "build-manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub target: String,
    pub upstream_url: String,
    pub patches: Vec<String>,
    pub kernel_release: Option<String>,
    /// Relative path → `sha256:<hex>` for files, `symlink:<target>` for links.
    pub artifacts: BTreeMap<String, String>,
}

impl BuildManifest {
    /// Digest the artifact set found in `staging_dir`.
    pub fn collect(
        staging_dir: &Path,
        target: BuildTarget,
        upstream_url: &str,
        patches: &[String],
    ) -> Result<Self> {
        let mut artifacts = BTreeMap::new();

        let vmlinuz = staging_dir.join("vmlinuz");
        if vmlinuz.is_file() {
            artifacts.insert("vmlinuz".to_string(), digest_entry(&vmlinuz)?);
        }

        for path in crate::artifact::filesystem::files_with_extension(staging_dir, "dtb")? {
            let rel = relative(staging_dir, &path)?;
            artifacts.insert(rel, digest_entry(&path)?);
        }

        for subtree in ["overlays", "lib/modules"] {
            let root = staging_dir.join(subtree);
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry
                    .with_context(|| format!("Failed to walk {}", root.display()))?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let rel = relative(staging_dir, entry.path())?;
                artifacts.insert(rel, digest_entry(entry.path())?);
            }
        }

        Ok(Self {
            target: target.to_string(),
            upstream_url: upstream_url.to_string(),
            patches: patches.to_vec(),
            kernel_release: kernel_release(staging_dir)?,
            artifacts,
        })
    }

    pub fn write(&self, staging_dir: &Path) -> Result<()> {
        let path = staging_dir.join(MANIFEST_FILENAME);
        let mut bytes = serde_json::to_vec_pretty(self).context("Failed to serialize build manifest")?;
        bytes.push(b'\n');
        fs::write(&path, bytes).with_context(|| format!("Failed to write '{}'", path.display()))
    }

    pub fn load(staging_dir: &Path) -> Result<Self> {
        let path = staging_dir.join(MANIFEST_FILENAME);
        let bytes = fs::read(&path).with_context(|| format!("Failed to read '{}'", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse '{}'", path.display()))
    }

    /// Relative paths whose digest differs between `self` and `other`,
    /// including paths present in only one of them.
    pub fn changed_artifacts(&self, other: &BuildManifest) -> Vec<String> {
        let mut changed: Vec<String> = self
            .artifacts
            .iter()
            .filter(|(path, digest)| other.artifacts.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            other
                .artifacts
                .keys()
                .filter(|path| !self.artifacts.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

/// The `<version>` directory under `lib/modules`, if exactly one exists.
pub fn kernel_release(staging_dir: &Path) -> Result<Option<String>> {
    let modules = staging_dir.join("lib/modules");
    if !modules.is_dir() {
        return Ok(None);
    }
    let mut versions = Vec::new();
    for entry in fs::read_dir(&modules)
        .with_context(|| format!("Failed to read '{}'", modules.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            versions.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    versions.sort();
    match versions.as_slice() {
        [only] => Ok(Some(only.clone())),
        [] => Ok(None),
        many => {
            tracing::warn!("multiple kernel releases under {}: {:?}", modules.display(), many);
            Ok(None)
        }
    }
}

fn relative(base: &Path, path: &Path) -> Result<String> {
    Ok(path
        .strip_prefix(base)
        .with_context(|| format!("Failed to relativize {} against {}", path.display(), base.display()))?
        .to_string_lossy()
        .into_owned())
}

fn digest_entry(path: &Path) -> Result<String> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        return Ok(format!("symlink:{}", target.display()));
    }
    Ok(format!("sha256:{}", sha256_file(path)?))
}

fn sha256_file(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
