//! Host orchestrator: from a `_build` staging directory to an updated kernel
//! repository.
//!
//! 1. check the working directory is a staging directory
//! 2. load the series, upstream URL and sibling artifact paths
//! 3. render the Dockerfile and build the image
//! 4. run the image with the staging directory mounted
//! 5. reconcile the produced artifacts into the repository
//!
//! Every step is fatal on failure; nothing is retried or rolled back.
//!
//! - [`staging`] - directory contract and manifest loading
//! - [`reconcile`] - artifact reconciliation

pub mod reconcile;
pub mod staging;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::artifact::filesystem::copy_file;
use crate::artifact::manifest::{BuildManifest, MANIFEST_FILENAME};
use crate::config::{StagingConfig, DEFAULT_IMAGE_TAG};
use crate::dockerfile::{self, DockerfileParams};
use crate::error::RebuildError;
use crate::runtime::{ContainerRuntime, RunOptions};
use crate::target::{Architecture, BuildTarget, Flavor};
use crate::DRIVER_BINARY;

use self::staging::StagingManifest;

/// Values given on the command line. `None` defers to the staging config.
#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    pub container_executable: Option<String>,
    pub keep_build_container: Option<bool>,
    pub cross: Option<Architecture>,
    pub flavor: Option<Flavor>,
    pub driver_binary: Option<PathBuf>,
    pub image_tag: Option<String>,
}

/// Fully resolved settings of one host run.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub staging_dir: PathBuf,
    pub container_executable: Option<String>,
    pub keep_build_container: bool,
    pub target: BuildTarget,
    pub driver_binary: PathBuf,
    pub image_tag: String,
}

impl HostOptions {
    /// Merge command-line overrides over the staging config over defaults.
    pub fn resolve(
        staging_dir: &Path,
        config: &StagingConfig,
        overrides: HostOverrides,
    ) -> Result<Self> {
        let arch = match overrides.cross {
            Some(arch) => arch,
            None => config.cross()?.unwrap_or_default(),
        };
        let flavor = overrides
            .flavor
            .or(config.target.flavor)
            .unwrap_or_default();
        let target = BuildTarget::new(arch, flavor)?;

        let driver_binary = match overrides.driver_binary {
            Some(path) => path,
            None => default_driver_binary()?,
        };

        Ok(Self {
            staging_dir: staging_dir.to_path_buf(),
            container_executable: overrides
                .container_executable
                .or_else(|| config.container.executable.clone()),
            keep_build_container: overrides
                .keep_build_container
                .or(config.container.keep_build_container)
                .unwrap_or(false),
            target,
            driver_binary,
            image_tag: overrides
                .image_tag
                .or_else(|| config.container.image_tag.clone())
                .unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string()),
        })
    }
}

/// `rebuild-kernel-driver` next to the running executable.
pub fn default_driver_binary() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    Ok(exe.with_file_name(DRIVER_BINARY))
}

/// Copy the driver into the build context under its fixed name.
pub fn stage_driver(driver_binary: &Path, staging_dir: &Path) -> Result<PathBuf> {
    if !driver_binary.is_file() {
        return Err(RebuildError::MissingFile(driver_binary.to_path_buf()).into());
    }
    let dest = staging_dir.join(DRIVER_BINARY);
    let same_file = match (driver_binary.canonicalize(), dest.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same_file {
        copy_file(driver_binary, &dest)?;
    }
    Ok(dest)
}

/// Numeric ids of the invoking user, baked into the image's build user.
pub fn current_ids() -> (u32, u32) {
    // SAFETY: getuid/getgid cannot fail and touch no memory.
    unsafe { (libc::getuid(), libc::getgid()) }
}

/// The manifest of the last successful run, if there is a readable one.
///
/// A manifest that exists but cannot be parsed is reported and skipped; it
/// only feeds the change summary.
pub fn previous_manifest(staging_dir: &Path) -> Option<BuildManifest> {
    if !staging_dir.join(MANIFEST_FILENAME).exists() {
        return None;
    }
    match BuildManifest::load(staging_dir) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            tracing::warn!("ignoring previous build manifest: {:#}", e);
            None
        }
    }
}

/// Run the whole host pipeline. Returns the manifest of the new artifacts.
pub fn rebuild_kernel(opts: &HostOptions) -> Result<BuildManifest> {
    let staging_dir = if opts.staging_dir.is_absolute() {
        opts.staging_dir.clone()
    } else {
        std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(&opts.staging_dir)
    };

    staging::check_staging_dir(&staging_dir)?;
    let manifest = StagingManifest::load(&staging_dir)?;
    let runtime = ContainerRuntime::locate(opts.container_executable.as_deref())?;

    stage_driver(&opts.driver_binary, &staging_dir)?;
    let (uid, gid) = current_ids();
    dockerfile::write(
        &staging_dir,
        &DockerfileParams {
            uid,
            gid,
            patches: &manifest.patches,
            addendum: &manifest.addendum_path,
            arch: opts.target.arch(),
        },
    )?;

    tracing::info!("building {} container for kernel compilation", runtime.name());
    let build = runtime.build_command(&staging_dir, &opts.image_tag);
    tracing::info!("{}", build.display());
    build.run_interactive()?;

    let previous = previous_manifest(&staging_dir);
    reconcile::clear_staged_outputs(&staging_dir)?;

    tracing::info!("compiling {} kernel", opts.target);
    let run = runtime.run_command(&RunOptions {
        staging_dir: &staging_dir,
        image_tag: &opts.image_tag,
        keep_container: opts.keep_build_container,
        target: opts.target,
        upstream_url: &manifest.upstream_url,
    });
    tracing::info!("{}", run.display());
    run.run_interactive()?;

    reconcile::reconcile(&manifest, opts.target)?;

    let built = BuildManifest::collect(
        &staging_dir,
        opts.target,
        &manifest.upstream_url,
        &manifest.patches,
    )?;
    built.write(&staging_dir)?;

    if let Some(previous) = previous {
        let changed = built.changed_artifacts(&previous);
        if changed.is_empty() {
            tracing::info!("artifacts identical to the previous build");
        } else {
            tracing::info!("{} artifacts differ from the previous build", changed.len());
            for path in &changed {
                tracing::debug!("changed: {path}");
            }
        }
    }

    tracing::info!(
        "kernel {} installed into {}",
        built.kernel_release.as_deref().unwrap_or("(unknown release)"),
        manifest.repo_dir().display()
    );
    Ok(built)
}
