//! Kernel source acquisition: download, unpack, patch.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::RebuildError;
use crate::process::Cmd;
use crate::target::Flavor;

/// Last path component of `url`, which is also the archive's local file name.
pub fn archive_name(url: &str) -> Result<&str> {
    match url.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => bail!("cannot derive an archive name from URL '{url}'"),
    }
}

/// Name of the directory the archive unpacks into.
///
/// kernel.org tarballs (`linux-6.1.tar.xz`) unpack into their own stem. The
/// raspberrypi GitHub tag archives (`1.20230405.tar.gz`) unpack into
/// `linux-<stem>`.
pub fn source_dir_name(url: &str, flavor: Flavor) -> Result<String> {
    let archive = archive_name(url)?;
    Ok(match flavor {
        Flavor::Vanilla => archive.strip_suffix(".tar.xz").unwrap_or(archive).to_string(),
        Flavor::Raspberrypi => {
            let prefixed = format!("linux-{archive}");
            prefixed
                .strip_suffix(".tar.gz")
                .map(str::to_string)
                .unwrap_or(prefixed)
        }
    })
}

/// Download `url` into `dest_dir`, named after the URL's last component.
///
/// Anything other than `200 OK` is an error.
pub fn download(url: &str, dest_dir: &Path) -> Result<PathBuf> {
    let dest = dest_dir.join(archive_name(url)?);

    let mut response = reqwest::blocking::get(url)
        .with_context(|| format!("Failed to fetch {url}"))?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(RebuildError::HttpStatus {
            url: url.to_string(),
            got: response.status().as_u16(),
        }
        .into());
    }

    let mut out = File::create(&dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let bytes = io::copy(&mut response, &mut out)
        .with_context(|| format!("Failed to download {url} to {}", dest.display()))?;
    out.sync_all()
        .with_context(|| format!("Failed to flush {}", dest.display()))?;

    tracing::info!("downloaded {} ({} bytes)", dest.display(), bytes);
    Ok(dest)
}

/// Extract `archive` inside `work_dir`. `tar` picks the decompressor.
pub fn unpack(archive: &Path, work_dir: &Path) -> Result<()> {
    Cmd::new("tar")
        .arg("xf")
        .arg_path(archive)
        .dir(work_dir)
        .error_msg("untar")
        .run_interactive()
}

/// `*.patch` files directly inside `work_dir`, in lexicographic order.
pub fn find_patches(work_dir: &Path) -> Result<Vec<PathBuf>> {
    crate::artifact::filesystem::files_with_extension(work_dir, "patch")
}

/// Apply every `*.patch` in `work_dir` to `srcdir` with `patch -p1`.
///
/// The first patch that does not apply aborts the run.
pub fn apply_patches(work_dir: &Path, srcdir: &Path) -> Result<usize> {
    if !srcdir.is_dir() {
        bail!("source directory {} does not exist", srcdir.display());
    }
    let patches = find_patches(work_dir)?;
    for patch in &patches {
        tracing::info!("applying patch {}", patch.display());
        Cmd::new("patch")
            .arg("-p1")
            .dir(srcdir)
            .stdin_file(patch)
            .error_msg(format!("applying {}", patch.display()))
            .run_interactive()?;
    }
    Ok(patches.len())
}

/// Remove a previous unpack of the same archive so patches apply to a
/// pristine tree.
pub fn clean_source_dir(srcdir: &Path) -> Result<()> {
    if srcdir.exists() {
        tracing::warn!("removing stale source tree {}", srcdir.display());
        fs::remove_dir_all(srcdir)
            .with_context(|| format!("Failed to remove {}", srcdir.display()))?;
    }
    Ok(())
}
