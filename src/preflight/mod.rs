//! Preflight checks for the in-container driver.
//!
//! Verifies that the image has every tool the driver shells out to before the
//! download starts, so a broken image fails in a second instead of after the
//! tarball has been fetched and unpacked.
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_rebuild::preflight::{check_required_tools, driver_tools};
//! use kernel_rebuild::Architecture;
//!
//! check_required_tools(&driver_tools(Architecture::Arm64))?;
//! ```

use anyhow::{bail, Result};

use crate::process::{self, Cmd};
use crate::target::Architecture;

/// Tools every driver run needs.
///
/// Each tuple is (command_name, package_name).
pub const BASE_TOOLS: &[(&str, &str)] = &[
    ("make", "make"),
    ("tar", "tar"),
    ("xz", "xz-utils"),
    ("gzip", "gzip"),
    ("patch", "patch"),
    ("gcc", "build-essential"),
    ("bc", "bc"),
    ("flex", "flex"),
    ("bison", "bison"),
];

/// The cross toolchain pulled in by `crossbuild-essential-arm64`.
pub const ARM64_TOOLS: &[(&str, &str)] =
    &[("aarch64-linux-gnu-gcc", "crossbuild-essential-arm64")];

/// Tools needed to build for `arch`.
pub fn driver_tools(arch: Architecture) -> Vec<(&'static str, &'static str)> {
    let mut tools = BASE_TOOLS.to_vec();
    if arch == Architecture::Arm64 {
        tools.extend_from_slice(ARM64_TOOLS);
    }
    tools
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();
    for entry in tools {
        let (tool, _) = entry;
        match process::which(tool) {
            Some(path) => tracing::debug!("{} -> {}", tool, path),
            None => missing.push(entry),
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required build tools:\n{}", msg);
    }

    Ok(())
}

/// The C compiler `make` invokes for `arch`.
pub fn compiler(arch: Architecture) -> &'static str {
    match arch {
        Architecture::Amd64 => "gcc",
        Architecture::Arm64 => "aarch64-linux-gnu-gcc",
    }
}

/// First line of `tool --version`, or `None` if the tool is missing or
/// refuses the flag.
pub fn tool_version(tool: &str) -> Option<String> {
    let output = Cmd::new(tool).arg("--version").run().ok()?;
    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Log the versions of the toolchain that will build the kernel.
pub fn log_toolchain(arch: Architecture) {
    for tool in ["make", compiler(arch)] {
        match tool_version(tool) {
            Some(version) => tracing::info!("{}: {}", tool, version),
            None => tracing::warn!("{}: version unknown", tool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_lists_every_missing_tool() {
        let tools = &[
            ("ls", "coreutils"),
            ("nonexistent_command_xyz", "fake-package"),
            ("nonexistent_command_abc", "other-package"),
        ];
        let msg = check_required_tools(tools).unwrap_err().to_string();
        assert!(msg.contains("nonexistent_command_xyz (install: fake-package)"));
        assert!(msg.contains("nonexistent_command_abc (install: other-package)"));
        assert!(!msg.contains("ls (install"));
    }

    #[test]
    fn test_tool_version_first_line() {
        let temp = tempfile::TempDir::new().unwrap();
        let tool = temp.path().join("make");
        std::fs::write(&tool, "#!/bin/sh\necho\necho 'GNU Make 4.3'\necho 'Built for x86_64'\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(
            tool_version(&tool.display().to_string()).as_deref(),
            Some("GNU Make 4.3")
        );
    }

    #[test]
    fn test_tool_version_missing_or_failing() {
        assert!(tool_version("definitely_not_a_real_command_12345").is_none());

        let temp = tempfile::TempDir::new().unwrap();
        let tool = temp.path().join("broken");
        std::fs::write(&tool, "#!/bin/sh\necho 'unknown option' >&2\nexit 2\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(tool_version(&tool.display().to_string()).is_none());
    }

    #[test]
    fn test_compiler_per_arch() {
        assert_eq!(compiler(Architecture::Amd64), "gcc");
        assert_eq!(compiler(Architecture::Arm64), "aarch64-linux-gnu-gcc");
        assert!(driver_tools(Architecture::Arm64)
            .iter()
            .any(|(t, _)| *t == compiler(Architecture::Arm64)));
    }

    #[test]
    fn test_driver_tools_cross_toolchain() {
        let native = driver_tools(Architecture::Amd64);
        assert!(native.iter().any(|(t, _)| *t == "make"));
        assert!(!native.iter().any(|(t, _)| *t == "aarch64-linux-gnu-gcc"));

        let cross = driver_tools(Architecture::Arm64);
        assert!(cross.iter().any(|(t, _)| *t == "aarch64-linux-gnu-gcc"));
    }
}
