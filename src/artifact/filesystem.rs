//! Filesystem utilities for moving build artifacts around.
//!
//! Used on both sides of the container boundary: the driver copies kernel
//! images and device trees into the mount, the host moves them from the
//! staging directory into the kernel repository.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Copy a single file, replacing `dst` if it exists.
///
/// The permission bits of `src` are applied to `dst`.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    let perms = fs::metadata(src)
        .with_context(|| format!("Failed to stat {}", src.display()))?
        .permissions();
    fs::set_permissions(dst, perms)
        .with_context(|| format!("Failed to set permissions on {}", dst.display()))?;
    Ok(())
}

/// Recursively copy a directory, preserving symlinks.
///
/// Unlike `fs::copy`, this properly handles:
/// - Nested directories
/// - Symbolic links (preserved, not followed)
/// - File permissions
///
/// # Example
///
/// ```rust,ignore
/// use kernel_rebuild::artifact::filesystem::copy_dir_recursive;
/// use std::path::Path;
///
/// copy_dir_recursive(Path::new("lib/modules"), Path::new("../lib/modules"))?;
/// ```
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
    }

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("Failed to create symlink: {}", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        }
    }

    Ok(())
}

/// Replace `dst` with a copy of `src`: the old tree is deleted first, so
/// nothing from it survives.
pub fn replace_dir(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() || dst.is_symlink() {
        tracing::info!("removing {}", dst.display());
        fs::remove_dir_all(dst)
            .with_context(|| format!("Failed to remove directory: {}", dst.display()))?;
    }
    tracing::info!("copying {} to {}", src.display(), dst.display());
    copy_dir_recursive(src, dst)
}

/// Regular files directly inside `dir` whose extension is `ext`, sorted by
/// name.
pub fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut matches = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches)
}

/// Delete every `*.<ext>` file directly inside `dir`. Returns how many were
/// removed.
pub fn remove_with_extension(dir: &Path, ext: &str) -> Result<usize> {
    let stale = files_with_extension(dir, ext)?;
    for path in &stale {
        tracing::debug!("removing {}", path.display());
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(stale.len())
}

/// Copy every `*.<ext>` file directly inside `src_dir` into `dst_dir`.
/// Returns the copied file names.
pub fn copy_with_extension(src_dir: &Path, dst_dir: &Path, ext: &str) -> Result<Vec<String>> {
    let mut copied = Vec::new();
    for path in files_with_extension(src_dir, ext)? {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Failed to decode non-UTF-8 file name: {}", path.display()))?
            .to_string();
        copy_file(&path, &dst_dir.join(&name))?;
        copied.push(name);
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_recursive() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");

        fs::create_dir_all(src.join("subdir")).unwrap();
        fs::write(src.join("file.txt"), "hello").unwrap();
        fs::write(src.join("subdir/nested.txt"), "world").unwrap();
        std::os::unix::fs::symlink("file.txt", src.join("link")).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();

        assert!(dst.join("file.txt").exists());
        assert!(dst.join("subdir/nested.txt").exists());
        assert!(dst.join("link").is_symlink());
        assert_eq!(fs::read_link(dst.join("link")).unwrap().to_str().unwrap(), "file.txt");
    }

    #[test]
    fn test_copy_file_carries_mode() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("vmlinuz.new");
        let dst = temp.path().join("vmlinuz");
        fs::write(&src, "new kernel").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        fs::write(&dst, "old kernel").unwrap();

        copy_file(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(&dst).unwrap(), "new kernel");
        assert_eq!(fs::metadata(&dst).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn test_replace_dir_drops_stale_entries() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("new");
        let dst = temp.path().join("old");
        fs::create_dir_all(src.join("6.1.0")).unwrap();
        fs::write(src.join("6.1.0/modules.dep"), "").unwrap();
        fs::create_dir_all(dst.join("5.15.0")).unwrap();
        fs::write(dst.join("5.15.0/modules.dep"), "").unwrap();

        replace_dir(&src, &dst).unwrap();

        assert!(dst.join("6.1.0/modules.dep").exists());
        assert!(!dst.join("5.15.0").exists());
    }

    #[test]
    fn test_remove_and_copy_with_extension() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("b.dtb"), "b").unwrap();
        fs::write(src.join("a.dtb"), "a").unwrap();
        fs::write(src.join("notes.txt"), "").unwrap();
        fs::write(dst.join("stale.dtb"), "old").unwrap();
        fs::write(dst.join("keep.txt"), "").unwrap();

        assert_eq!(remove_with_extension(&dst, "dtb").unwrap(), 1);
        let copied = copy_with_extension(&src, &dst, "dtb").unwrap();

        assert_eq!(copied, vec!["a.dtb", "b.dtb"]);
        assert!(!dst.join("stale.dtb").exists());
        assert!(dst.join("keep.txt").exists());
        assert!(!dst.join("notes.txt").exists());
    }
}
