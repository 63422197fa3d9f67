//! Moving a finished artifact set from the staging directory into the kernel
//! repository.
//!
//! Nothing here is transactional. If a step fails halfway the repository is
//! left partially updated and the fix is to rerun.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::artifact::filesystem::{copy_file, copy_with_extension, remove_with_extension, replace_dir};
use crate::host::staging::StagingManifest;
use crate::target::{Architecture, BuildTarget, Flavor};

/// Links `modules_install` creates into the (container-only) source tree.
const DANGLING_MODULE_LINKS: &[&str] = &["build", "source"];

/// Remove `lib/modules/*/{build,source}` symlinks under `staging_dir`.
pub fn prune_module_symlinks(staging_dir: &Path) -> Result<Vec<PathBuf>> {
    let modules = staging_dir.join("lib/modules");
    let mut removed = Vec::new();
    if !modules.is_dir() {
        return Ok(removed);
    }

    for entry in WalkDir::new(&modules).min_depth(2).max_depth(2) {
        let entry = entry.with_context(|| format!("Failed to walk {}", modules.display()))?;
        let is_link_name = entry
            .file_name()
            .to_str()
            .is_some_and(|name| DANGLING_MODULE_LINKS.contains(&name));
        if !is_link_name || !entry.path_is_symlink() {
            continue;
        }
        tracing::info!("removing build/source symlink {}", entry.path().display());
        fs::remove_file(entry.path())
            .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
        removed.push(entry.into_path());
    }
    Ok(removed)
}

/// Delete what a previous run left in the staging directory, so that only
/// this run's outputs get reconciled.
pub fn clear_staged_outputs(staging_dir: &Path) -> Result<()> {
    let vmlinuz = staging_dir.join("vmlinuz");
    if vmlinuz.exists() {
        fs::remove_file(&vmlinuz).with_context(|| format!("Failed to remove {}", vmlinuz.display()))?;
    }
    for dir in ["lib", "overlays"] {
        let path = staging_dir.join(dir);
        if path.exists() {
            fs::remove_dir_all(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    remove_with_extension(staging_dir, "dtb")?;
    Ok(())
}

/// Replace the repository's kernel, modules and device trees with the ones
/// in the staging directory.
pub fn reconcile(manifest: &StagingManifest, target: BuildTarget) -> Result<()> {
    let staging = &manifest.staging_dir;
    let repo = manifest.repo_dir();

    tracing::info!("copying vmlinuz to {}", manifest.kernel_path.display());
    copy_file(&staging.join("vmlinuz"), &manifest.kernel_path)?;

    prune_module_symlinks(staging)?;
    replace_dir(&staging.join("lib/modules"), &manifest.lib_path.join("modules"))?;

    // Stale device trees go on every architecture; only arm64 ships new ones.
    let removed = remove_with_extension(&repo, "dtb")?;
    let copied = if target.arch() == Architecture::Arm64 {
        copy_with_extension(staging, &repo, "dtb")?
    } else {
        Vec::new()
    };
    tracing::info!("replaced {} device trees with {}", removed, copied.len());

    if target.flavor() == Flavor::Raspberrypi {
        replace_dir(&staging.join("overlays"), &repo.join("overlays"))?;
    }
    Ok(())
}
