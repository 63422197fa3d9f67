//! Reproducible, containerized Linux kernel rebuilds.
//!
//! Rebuilds a kernel, its modules and (for arm64) its device trees inside an
//! ephemeral container, then moves the results into the surrounding kernel
//! repository. Two executables share this crate:
//!
//! - `rebuild-kernel` runs on the host from a `_build` staging directory. It
//!   renders a Dockerfile, builds the image, runs it with the staging
//!   directory mounted and reconciles the produced artifacts ([`host`]).
//! - `rebuild-kernel-driver` is the image's entrypoint. It downloads, patches,
//!   configures and compiles the kernel and writes the artifact set into the
//!   mount ([`build`]).
//!
//! # Architecture
//!
//! ```text
//! rebuild-kernel (host)
//!     │
//!     ├── runtime      podman/docker discovery, build/run command lines
//!     ├── dockerfile   image description (uid/gid, patches, cross toolchain)
//!     └── host         staging checks, orchestration, artifact reconciliation
//!
//! rebuild-kernel-driver (container)
//!     │
//!     └── build        download → unpack → patch → configure → compile
//!                      → modules_install → extract artifacts
//! ```

pub mod artifact;
pub mod build;
pub mod config;
pub mod dockerfile;
pub mod error;
pub mod host;
pub mod logging;
pub mod preflight;
pub mod process;
pub mod runtime;
pub mod target;

pub use error::{exit_code, RebuildError};
pub use target::{Architecture, BuildTarget, Flavor};

/// Environment variable the Dockerfile sets so the driver knows it is running
/// inside the build container.
pub const IN_CONTAINER_ENV: &str = "KERNEL_REBUILD_IN_CONTAINER";

/// Name of the in-container driver executable.
pub const DRIVER_BINARY: &str = "rebuild-kernel-driver";

/// Last path component of a valid staging directory.
pub const STAGING_SUFFIX: &str = "_build";

pub const SERIES_FILENAME: &str = "series";
pub const ADDENDUM_FILENAME: &str = "config.addendum.txt";
pub const UPSTREAM_URL_FILENAME: &str = "upstream-url.txt";

/// Whether this process runs inside the build container.
pub fn in_container() -> bool {
    std::env::var(IN_CONTAINER_ENV).is_ok_and(|v| v == "1")
}
