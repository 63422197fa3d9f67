//! The build target key: which architecture and which upstream lineage.
//!
//! `(Architecture, Flavor)` is the one branching structure the whole pipeline
//! hangs off. Only three cells are valid:
//!
//! | cross     | flavor        |
//! |-----------|---------------|
//! | `""`      | `vanilla`     |
//! | `arm64`   | `vanilla`     |
//! | `arm64`   | `raspberrypi` |

use anyhow::Result;
use serde::Deserialize;
use std::fmt;

use crate::error::RebuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Architecture {
    #[default]
    Amd64,
    Arm64,
}

impl Architecture {
    /// Value of the `--cross` flag selecting this architecture.
    pub fn cross_flag(self) -> &'static str {
        match self {
            Architecture::Amd64 => "",
            Architecture::Arm64 => "arm64",
        }
    }

    pub fn is_cross(self) -> bool {
        self != Architecture::Amd64
    }
}

/// Parse a `--cross` value. Only the empty string and `arm64` are accepted.
pub fn parse_cross(value: &str) -> Result<Architecture, String> {
    match value {
        "" => Ok(Architecture::Amd64),
        "arm64" => Ok(Architecture::Arm64),
        other => Err(format!(
            "invalid -cross value '{other}': expected one of '' or 'arm64'"
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// kernel.org sources
    #[default]
    Vanilla,
    /// github.com/raspberrypi/linux tags
    Raspberrypi,
}

impl Flavor {
    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::Vanilla => "vanilla",
            Flavor::Raspberrypi => "raspberrypi",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated `(Architecture, Flavor)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTarget {
    arch: Architecture,
    flavor: Flavor,
}

impl BuildTarget {
    pub fn new(arch: Architecture, flavor: Flavor) -> Result<Self> {
        if arch == Architecture::Amd64 && flavor == Flavor::Raspberrypi {
            return Err(RebuildError::InvalidTarget(
                "the raspberrypi flavor requires -cross=arm64".to_string(),
            )
            .into());
        }
        Ok(Self { arch, flavor })
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arch {
            Architecture::Amd64 => f.write_str("amd64"),
            Architecture::Arm64 => write!(f, "arm64/{}", self.flavor),
        }
    }
}
