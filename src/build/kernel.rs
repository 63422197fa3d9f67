//! Kernel configuration, compilation and module installation.
//!
//! Every step is a `make` invocation inside the unpacked source tree. The
//! cross-compilation variables (`ARCH`, `CROSS_COMPILE`) are passed as make
//! command-line variables instead of being exported into the process
//! environment, so each invocation is self-describing in the log.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kernel_rebuild::build::kernel::KernelMake;
//!
//! let make = KernelMake::new(&srcdir, target);
//! make.configure(Path::new("/usr/src/config.addendum.txt"))?;
//! make.compile(&BuildMetadata::PINNED)?;
//! make.install_modules(Path::new("/tmp/buildresult"), &BuildMetadata::PINNED)?;
//! let version = get_kernel_version(&srcdir)?;
//! ```

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::BuildMetadata;
use crate::process::Cmd;
use crate::target::{Architecture, BuildTarget, Flavor};

/// Cross toolchain prefix installed by `crossbuild-essential-arm64`.
pub const ARM64_CROSS_COMPILE: &str = "aarch64-linux-gnu-";

/// Base configuration target for `flavor`.
pub fn defconfig_target(flavor: Flavor) -> &'static str {
    match flavor {
        Flavor::Vanilla => "defconfig",
        Flavor::Raspberrypi => "bcm2711_defconfig",
    }
}

/// What `make` builds for `arch`.
pub fn compile_targets(arch: Architecture) -> &'static [&'static str] {
    match arch {
        Architecture::Amd64 => &["bzImage", "modules"],
        Architecture::Arm64 => &["Image.gz", "dtbs", "modules"],
    }
}

/// Make variables selecting the target architecture.
pub fn arch_variables(arch: Architecture) -> Vec<String> {
    match arch {
        Architecture::Amd64 => Vec::new(),
        Architecture::Arm64 => vec![
            "ARCH=arm64".to_string(),
            format!("CROSS_COMPILE={ARM64_CROSS_COMPILE}"),
        ],
    }
}

/// Available processors, falling back to 4 when that cannot be determined.
pub fn default_jobs() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            tracing::warn!("could not detect CPU count ({}), using 4 jobs", e);
            4
        }
    }
}

/// `make` invocations against one unpacked kernel tree.
#[derive(Debug, Clone)]
pub struct KernelMake {
    srcdir: PathBuf,
    target: BuildTarget,
    jobs: usize,
    program: OsString,
}

impl KernelMake {
    pub fn new(srcdir: &Path, target: BuildTarget) -> Self {
        Self {
            srcdir: srcdir.to_path_buf(),
            target,
            jobs: default_jobs(),
            program: OsString::from("make"),
        }
    }

    /// Override the parallelism degree.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Use a different `make` executable.
    pub fn program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn srcdir(&self) -> &Path {
        &self.srcdir
    }

    fn jobs_arg(&self) -> String {
        format!("-j{}", self.jobs)
    }

    /// A `make` command in the source tree with the architecture variables set.
    pub fn command<S: AsRef<str>>(&self, targets: &[S]) -> Cmd {
        Cmd::new(&self.program)
            .args(arch_variables(self.target.arch()))
            .args(targets.iter().map(|t| t.as_ref()))
            .dir(&self.srcdir)
    }

    /// Derive `.config`: defconfig, then `mod2noconfig` so only what the
    /// addendum asks for is built as a module, then the addendum appended
    /// verbatim, then `olddefconfig` to settle every new or inconsistent
    /// symbol without prompting.
    pub fn configure(&self, addendum: &Path) -> Result<()> {
        if !self.srcdir.join("Makefile").exists() {
            bail!(
                "Invalid kernel source - no Makefile found in {}",
                self.srcdir.display()
            );
        }

        let defconfig = defconfig_target(self.target.flavor());
        tracing::info!("generating base config ({defconfig})");
        self.command(&[defconfig])
            .error_msg(format!("make {defconfig}"))
            .run_interactive()?;

        tracing::info!("disabling modules not requested by the addendum");
        self.command(&["mod2noconfig"])
            .error_msg("make mod2noconfig")
            .run_interactive()?;

        let config_path = self.srcdir.join(".config");
        append_addendum(&config_path, addendum)?;

        tracing::info!("resolving config dependencies");
        self.command(&["olddefconfig"])
            .error_msg("make olddefconfig")
            .run_interactive()?;

        let config = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read kernel config at {}", config_path.display()))?;
        let addendum_text = fs::read_to_string(addendum)
            .with_context(|| format!("Failed to read config addendum {}", addendum.display()))?;
        for line in unapplied_options(&config, &addendum_text) {
            tracing::warn!("addendum option not in final config (unmet dependency?): {line}");
        }
        Ok(())
    }

    /// Build the kernel image (plus device trees on arm64) and modules.
    pub fn compile(&self, metadata: &BuildMetadata) -> Result<()> {
        let mut targets: Vec<String> = compile_targets(self.target.arch())
            .iter()
            .map(|t| t.to_string())
            .collect();
        targets.push(self.jobs_arg());

        tracing::info!("compiling kernel ({})", targets.join(" "));
        self.command(&targets)
            .envs(metadata.env())
            .error_msg("Kernel build failed")
            .run_interactive()
    }

    /// `modules_install` with the installation root redirected to `mount`.
    pub fn install_modules(&self, mount: &Path, metadata: &BuildMetadata) -> Result<()> {
        tracing::info!("installing modules to {}", mount.display());
        let targets = [
            format!("INSTALL_MOD_PATH={}", mount.display()),
            "modules_install".to_string(),
            self.jobs_arg(),
        ];
        self.command(&targets)
            .envs(metadata.env())
            .error_msg("Module install failed")
            .run_interactive()
    }
}

/// Append the addendum to `.config` byte for byte.
pub fn append_addendum(config_path: &Path, addendum: &Path) -> Result<()> {
    let content = fs::read(addendum)
        .with_context(|| format!("Failed to read config addendum {}", addendum.display()))?;
    let mut config = OpenOptions::new()
        .append(true)
        .open(config_path)
        .with_context(|| format!("Failed to open kernel config at {}", config_path.display()))?;
    config
        .write_all(&content)
        .with_context(|| format!("Failed to append to {}", config_path.display()))?;
    tracing::info!(
        "appended {} ({} bytes) to {}",
        addendum.display(),
        content.len(),
        config_path.display()
    );
    Ok(())
}

/// Addendum assignments that did not survive into `config`.
///
/// Both `CONFIG_FOO=value` and `# CONFIG_FOO is not set` lines are checked;
/// other comments and blank lines are ignored.
pub fn unapplied_options(config: &str, addendum: &str) -> Vec<String> {
    let present: std::collections::HashSet<&str> = config.lines().map(str::trim).collect();
    addendum
        .lines()
        .map(str::trim)
        .filter(|line| is_assignment(line))
        .filter(|line| !present.contains(line))
        .map(str::to_string)
        .collect()
}

fn is_assignment(line: &str) -> bool {
    if line.starts_with("CONFIG_") && line.contains('=') {
        return true;
    }
    line.strip_prefix("# CONFIG_")
        .is_some_and(|rest| rest.ends_with(" is not set"))
}

/// Get the kernel version from the build directory.
pub fn get_kernel_version(build_dir: &Path) -> Result<String> {
    let release_path = build_dir.join("include/config/kernel.release");
    if release_path.exists() {
        return Ok(fs::read_to_string(&release_path)?.trim().to_string());
    }

    let makefile = build_dir.join("Makefile");
    if makefile.exists() {
        let content = fs::read_to_string(&makefile)?;
        let mut version = String::new();
        let mut patchlevel = String::new();
        let mut sublevel = String::new();
        let mut extraversion = String::new();

        for line in content.lines() {
            if let Some(v) = line.strip_prefix("VERSION = ") {
                version = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("PATCHLEVEL = ") {
                patchlevel = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("SUBLEVEL = ") {
                sublevel = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("EXTRAVERSION = ") {
                extraversion = v.trim().to_string();
            }
        }

        if !version.is_empty() && !patchlevel.is_empty() {
            return Ok(format!(
                "{}.{}.{}{}",
                version, patchlevel, sublevel, extraversion
            ));
        }
    }

    bail!("Could not determine kernel version")
}
