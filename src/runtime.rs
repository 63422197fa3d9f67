//! Container engine discovery and command assembly.
//!
//! podman is looked up before docker because a `docker` binary on the host may
//! be a thin podman wrapper; resolving symlinks to the real binary lets us
//! recognize it and pass podman-only flags such as `--userns=keep-id`.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::RebuildError;
use crate::process::Cmd;
use crate::target::BuildTarget;

/// Engines searched for in `$PATH`, most preferred first.
pub const CANDIDATES: &[&str] = &["podman", "docker"];

/// Platform of the build container itself. The kernel may still target arm64
/// through cross-compilation inside it.
pub const BUILD_PLATFORM: &str = "linux/amd64";

/// Where the staging directory is mounted inside the container.
pub const MOUNT_POINT: &str = "/tmp/buildresult";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Podman,
    Docker,
}

impl RuntimeKind {
    fn from_executable(path: &Path) -> Self {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with("podman") => RuntimeKind::Podman,
            _ => RuntimeKind::Docker,
        }
    }
}

/// A resolved container engine.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    executable: PathBuf,
    kind: RuntimeKind,
}

/// Parameters of the kernel-compiling `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions<'a> {
    pub staging_dir: &'a Path,
    pub image_tag: &'a str,
    pub keep_container: bool,
    pub target: BuildTarget,
    pub upstream_url: &'a str,
}

impl ContainerRuntime {
    /// Use `executable` as given. No probing, no symlink resolution.
    pub fn from_executable(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let kind = RuntimeKind::from_executable(&executable);
        Self { executable, kind }
    }

    /// Honor an explicit override, otherwise search `$PATH`.
    pub fn locate(override_executable: Option<&str>) -> Result<Self> {
        match override_executable {
            Some(exe) if !exe.is_empty() => {
                tracing::info!("using container executable {exe} (overridden)");
                Ok(Self::from_executable(exe))
            }
            _ => Self::detect(),
        }
    }

    /// Search the process's `$PATH`.
    pub fn detect() -> Result<Self> {
        let path = std::env::var_os("PATH").unwrap_or_default();
        Self::detect_in(&path)
    }

    /// Search a specific path list, resolving symlinks on the first hit.
    pub fn detect_in(search_path: &OsStr) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
        for candidate in CANDIDATES {
            let Ok(found) = which::which_in(*candidate, Some(search_path), &cwd) else {
                continue;
            };
            let resolved = std::fs::canonicalize(&found)
                .with_context(|| format!("Failed to resolve symlinks of '{}'", found.display()))?;
            tracing::debug!(
                "container executable {} resolves to {}",
                found.display(),
                resolved.display()
            );
            return Ok(Self::from_executable(resolved));
        }
        Err(RebuildError::RuntimeNotFound {
            candidates: CANDIDATES.to_vec(),
        }
        .into())
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self.kind {
            RuntimeKind::Podman => "podman",
            RuntimeKind::Docker => "docker",
        }
    }

    /// `build` the image from the Dockerfile in `context_dir`.
    pub fn build_command(&self, context_dir: &Path, image_tag: &str) -> Cmd {
        Cmd::new(&self.executable)
            .arg("build")
            .arg(format!("--platform={BUILD_PLATFORM}"))
            .arg("--rm=true")
            .arg(format!("--tag={image_tag}"))
            .arg(".")
            .dir(context_dir)
            .error_msg(format!("{} build", self.name()))
    }

    /// `run` the image with the staging directory mounted.
    pub fn run_command(&self, opts: &RunOptions<'_>) -> Cmd {
        let mut cmd = Cmd::new(&self.executable)
            .arg("run")
            .arg(format!("--platform={BUILD_PLATFORM}"))
            .arg("--volume")
            .arg(format!("{}:{MOUNT_POINT}:Z", opts.staging_dir.display()));

        if !opts.keep_container {
            cmd = cmd.arg("--rm");
        }
        if self.kind == RuntimeKind::Podman {
            cmd = cmd.arg("--userns=keep-id");
        }

        cmd.arg(opts.image_tag)
            .arg(format!("--cross={}", opts.target.arch().cross_flag()))
            .arg(format!("--flavor={}", opts.target.flavor()))
            .arg(opts.upstream_url)
            .error_msg(format!("{} run", self.name()))
    }
}
