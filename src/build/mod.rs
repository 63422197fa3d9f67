//! In-container build driver.
//!
//! A strictly linear pipeline; the first failing stage ends the run:
//!
//! ```text
//! Download → Unpack → ApplyPatches → Configure → Compile
//!          → InstallModules → ExtractArtifacts
//! ```
//!
//! - [`source`] - download, unpack, patch
//! - [`kernel`] - configure, compile, install modules
//! - [`artifacts`] - kernel image and device tree extraction

pub mod artifacts;
pub mod kernel;
pub mod source;

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::BuildMetadata;
use crate::preflight;
use crate::runtime::MOUNT_POINT;
use crate::target::BuildTarget;
use crate::ADDENDUM_FILENAME;

use self::kernel::KernelMake;

/// Driver pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Unpack,
    ApplyPatches,
    Configure,
    Compile,
    InstallModules,
    ExtractArtifacts,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Download,
        Stage::Unpack,
        Stage::ApplyPatches,
        Stage::Configure,
        Stage::Compile,
        Stage::InstallModules,
        Stage::ExtractArtifacts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Unpack => "unpack",
            Stage::ApplyPatches => "apply patches",
            Stage::Configure => "configure",
            Stage::Compile => "compile",
            Stage::InstallModules => "install modules",
            Stage::ExtractArtifacts => "extract artifacts",
        }
    }

    fn position(self) -> usize {
        Stage::ALL.iter().position(|s| *s == self).unwrap_or(0) + 1
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the driver needs for one run.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub upstream_url: String,
    pub target: BuildTarget,
    /// Holds the patches and the addendum; the archive is downloaded and
    /// unpacked here.
    pub work_dir: PathBuf,
    /// The bind-mounted staging directory.
    pub mount: PathBuf,
    pub addendum: PathBuf,
    pub metadata: BuildMetadata,
    pub check_tools: bool,
}

impl DriverOptions {
    /// Options for the image's layout: work in the current directory
    /// (`/usr/src`), write to [`MOUNT_POINT`].
    pub fn in_container(upstream_url: impl Into<String>, target: BuildTarget) -> Result<Self> {
        let work_dir = std::env::current_dir().context("Failed to resolve working directory")?;
        Ok(Self::with_dirs(upstream_url, target, &work_dir, Path::new(MOUNT_POINT)))
    }

    pub fn with_dirs(
        upstream_url: impl Into<String>,
        target: BuildTarget,
        work_dir: &Path,
        mount: &Path,
    ) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            target,
            work_dir: work_dir.to_path_buf(),
            mount: mount.to_path_buf(),
            addendum: work_dir.join(ADDENDUM_FILENAME),
            metadata: BuildMetadata::PINNED,
            check_tools: true,
        }
    }
}

fn enter(stage: Stage) {
    tracing::info!("[{}/{}] {}", stage.position(), Stage::ALL.len(), stage);
}

/// Run the whole driver pipeline. Returns the built kernel release.
pub fn run_driver(opts: &DriverOptions) -> Result<String> {
    tracing::info!(
        "building {} kernel from {}",
        opts.target,
        opts.upstream_url
    );

    if opts.check_tools {
        preflight::check_required_tools(&preflight::driver_tools(opts.target.arch()))?;
        preflight::log_toolchain(opts.target.arch());
    }
    if !opts.addendum.is_file() {
        return Err(crate::RebuildError::MissingFile(opts.addendum.clone()).into());
    }

    enter(Stage::Download);
    let archive = source::download(&opts.upstream_url, &opts.work_dir)
        .with_context(|| format!("{} failed", Stage::Download))?;

    enter(Stage::Unpack);
    let srcdir = opts
        .work_dir
        .join(source::source_dir_name(&opts.upstream_url, opts.target.flavor())?);
    source::clean_source_dir(&srcdir)?;
    source::unpack(&archive, &opts.work_dir)
        .with_context(|| format!("{} failed", Stage::Unpack))?;

    enter(Stage::ApplyPatches);
    let applied = source::apply_patches(&opts.work_dir, &srcdir)
        .with_context(|| format!("{} failed", Stage::ApplyPatches))?;
    tracing::info!("applied {applied} patches");

    let make = KernelMake::new(&srcdir, opts.target);

    enter(Stage::Configure);
    make.configure(&opts.addendum)
        .with_context(|| format!("{} failed", Stage::Configure))?;

    enter(Stage::Compile);
    make.compile(&opts.metadata)
        .with_context(|| format!("{} failed", Stage::Compile))?;
    let release = kernel::get_kernel_version(make.srcdir())?;
    tracing::info!("kernel release: {release}");

    enter(Stage::InstallModules);
    make.install_modules(&opts.mount, &opts.metadata)
        .with_context(|| format!("{} failed", Stage::InstallModules))?;

    enter(Stage::ExtractArtifacts);
    artifacts::extract_artifacts(&srcdir, &opts.mount, opts.target)
        .with_context(|| format!("{} failed", Stage::ExtractArtifacts))?;

    tracing::info!("driver finished: {}", opts.mount.display());
    Ok(release)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Architecture, Flavor};
    use tempfile::TempDir;

    #[test]
    fn test_stage_order() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "download",
                "unpack",
                "apply patches",
                "configure",
                "compile",
                "install modules",
                "extract artifacts",
            ]
        );
        assert_eq!(Stage::Download.position(), 1);
        assert_eq!(Stage::ExtractArtifacts.position(), 7);
    }

    #[test]
    fn test_options_layout() {
        let target = BuildTarget::new(Architecture::Arm64, Flavor::Raspberrypi).unwrap();
        let opts = DriverOptions::with_dirs(
            "https://x/1.20230405.tar.gz",
            target,
            Path::new("/usr/src"),
            Path::new(MOUNT_POINT),
        );
        assert_eq!(opts.addendum, Path::new("/usr/src/config.addendum.txt"));
        assert_eq!(opts.mount, Path::new("/tmp/buildresult"));
        assert_eq!(opts.metadata, BuildMetadata::PINNED);
    }

    #[test]
    fn test_missing_addendum_fails_before_download() {
        let work = TempDir::new().unwrap();
        let mount = TempDir::new().unwrap();
        let target = BuildTarget::new(Architecture::Amd64, Flavor::Vanilla).unwrap();
        let mut opts = DriverOptions::with_dirs(
            "http://127.0.0.1:9/linux-6.1.tar.xz",
            target,
            work.path(),
            mount.path(),
        );
        opts.check_tools = false;

        let err = run_driver(&opts).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::RebuildError>(),
            Some(crate::RebuildError::MissingFile(_))
        ));
        assert!(!work.path().join("linux-6.1.tar.xz").exists());
    }

    #[test]
    fn test_unreachable_source_fails_in_download() {
        let work = TempDir::new().unwrap();
        let mount = TempDir::new().unwrap();
        std::fs::write(work.path().join(ADDENDUM_FILENAME), "CONFIG_A=y\n").unwrap();
        let target = BuildTarget::new(Architecture::Amd64, Flavor::Vanilla).unwrap();
        let mut opts = DriverOptions::with_dirs(
            "http://127.0.0.1:9/linux-6.1.tar.xz",
            target,
            work.path(),
            mount.path(),
        );
        opts.check_tools = false;

        let err = run_driver(&opts).unwrap_err();
        assert!(format!("{err:#}").starts_with("download failed"));
        assert!(std::fs::read_dir(mount.path()).unwrap().next().is_none());
    }
}
