//! Configuration: staging-directory defaults and pinned build metadata.
//!
//! A staging directory may carry a `rebuild-kernel.toml` so the flags a given
//! kernel repository always needs (e.g. `cross = "arm64"`) do not have to be
//! repeated on every invocation:
//!
//! ```toml
//! [container]
//! executable = "podman"
//! keep_build_container = false
//! image_tag = "rebuild-kernel"
//!
//! [target]
//! cross = "arm64"
//! flavor = "raspberrypi"
//! ```
//!
//! Command-line flags take precedence over the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::target::{parse_cross, Architecture, Flavor};

/// File name of the optional per-staging-directory config.
pub const CONFIG_FILENAME: &str = "rebuild-kernel.toml";

/// Default tag of the build image.
pub const DEFAULT_IMAGE_TAG: &str = "rebuild-kernel";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagingConfig {
    #[serde(default)]
    pub container: ContainerSection,
    #[serde(default)]
    pub target: TargetSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSection {
    pub executable: Option<String>,
    pub keep_build_container: Option<bool>,
    pub image_tag: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    pub cross: Option<String>,
    pub flavor: Option<Flavor>,
}

impl StagingConfig {
    /// Load `rebuild-kernel.toml` from `staging_dir`, or the empty config if
    /// the file does not exist.
    pub fn load(staging_dir: &Path) -> Result<Self> {
        let path = staging_dir.join(CONFIG_FILENAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        let parsed: StagingConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config '{}'", path.display()))?;
        parsed
            .cross()
            .with_context(|| format!("Failed to validate config '{}'", path.display()))?;
        Ok(parsed)
    }

    /// The configured cross architecture, if any.
    pub fn cross(&self) -> Result<Option<Architecture>> {
        self.target
            .cross
            .as_deref()
            .map(|value| parse_cross(value).map_err(anyhow::Error::msg))
            .transpose()
    }
}

/// Build metadata the kernel embeds into its version banner.
///
/// These are pinned so that two builds of the same sources are identical
/// regardless of which machine or when they ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildMetadata {
    pub user: &'static str,
    pub host: &'static str,
    pub timestamp: &'static str,
}

impl BuildMetadata {
    pub const PINNED: BuildMetadata = BuildMetadata {
        user: "gokrazy",
        host: "docker",
        timestamp: "Wed Mar  1 20:57:29 UTC 2017",
    };

    /// Environment variables handed to kbuild.
    pub fn env(&self) -> [(&'static str, &'static str); 3] {
        [
            ("KBUILD_BUILD_USER", self.user),
            ("KBUILD_BUILD_HOST", self.host),
            ("KBUILD_BUILD_TIMESTAMP", self.timestamp),
        ]
    }
}

impl Default for BuildMetadata {
    fn default() -> Self {
        Self::PINNED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_empty() {
        let temp = TempDir::new().unwrap();
        let config = StagingConfig::load(temp.path()).unwrap();
        assert!(config.container.executable.is_none());
        assert!(config.cross().unwrap().is_none());
    }

    #[test]
    fn test_load_full_config() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILENAME),
            "[container]\nexecutable = \"docker\"\nkeep_build_container = true\n\n\
             [target]\ncross = \"arm64\"\nflavor = \"raspberrypi\"\n",
        )
        .unwrap();

        let config = StagingConfig::load(temp.path()).unwrap();
        assert_eq!(config.container.executable.as_deref(), Some("docker"));
        assert_eq!(config.container.keep_build_container, Some(true));
        assert_eq!(config.cross().unwrap(), Some(Architecture::Arm64));
        assert_eq!(config.target.flavor, Some(Flavor::Raspberrypi));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILENAME),
            "[container]\nretries = 3\n",
        )
        .unwrap();
        let err = StagingConfig::load(temp.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse config"), "{err}");
    }

    #[test]
    fn test_invalid_cross_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CONFIG_FILENAME), "[target]\ncross = \"mips\"\n").unwrap();
        let err = StagingConfig::load(temp.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to validate config"), "{err}");
        assert!(format!("{err:#}").contains("mips"));
    }

    #[test]
    fn test_pinned_metadata_env() {
        let env = BuildMetadata::default().env();
        assert_eq!(env[0], ("KBUILD_BUILD_USER", "gokrazy"));
        assert_eq!(env[1], ("KBUILD_BUILD_HOST", "docker"));
        assert_eq!(env[2], ("KBUILD_BUILD_TIMESTAMP", "Wed Mar  1 20:57:29 UTC 2017"));
    }
}
