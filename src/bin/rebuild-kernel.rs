//! Host entry point: rebuild the kernel of the repository whose `_build`
//! directory is the current working directory.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use kernel_rebuild::config::StagingConfig;
use kernel_rebuild::host::{rebuild_kernel, HostOptions, HostOverrides};
use kernel_rebuild::target::parse_cross;
use kernel_rebuild::{exit_code, in_container, logging, Architecture, Flavor, RebuildError};

#[derive(Parser)]
#[command(name = "rebuild-kernel")]
#[command(author, version, about = "Rebuild a Linux kernel inside a container", long_about = None)]
struct Cli {
    /// E.g. docker or podman to overwrite the automatically detected container executable
    #[arg(long, alias = "overwrite_container_executable", value_name = "EXE")]
    overwrite_container_executable: Option<String>,

    /// Do not delete the build container after building the kernel
    /// (`--keep-build-container=false` overrides the config file)
    #[arg(
        long,
        alias = "keep_build_container",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    keep_build_container: Option<bool>,

    /// If non-empty, cross-compile for the specified arch (one of 'arm64')
    #[arg(long, value_parser = parse_cross, value_name = "ARCH")]
    cross: Option<Architecture>,

    /// Which kernel flavor to build
    #[arg(long, value_enum)]
    flavor: Option<Flavor>,

    /// The in-container driver to copy into the image
    /// [default: rebuild-kernel-driver next to this executable]
    #[arg(long, value_name = "PATH")]
    driver_binary: Option<PathBuf>,

    /// Tag of the build image
    #[arg(long, value_name = "TAG")]
    image_tag: Option<String>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    if in_container() {
        return Err(RebuildError::WrongEnvironment(format!(
            "rebuild-kernel runs on the host; {} is set, use {} inside the container",
            kernel_rebuild::IN_CONTAINER_ENV,
            kernel_rebuild::DRIVER_BINARY
        ))
        .into());
    }

    let staging_dir = std::env::current_dir().context("Failed to resolve current directory")?;
    kernel_rebuild::host::staging::check_staging_dir(&staging_dir)?;
    let config = StagingConfig::load(&staging_dir)?;

    let opts = HostOptions::resolve(
        &staging_dir,
        &config,
        HostOverrides {
            container_executable: cli.overwrite_container_executable,
            keep_build_container: cli.keep_build_container,
            cross: cli.cross,
            flavor: cli.flavor,
            driver_binary: cli.driver_binary,
            image_tag: cli.image_tag,
        },
    )?;

    rebuild_kernel(&opts)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rebuild-kernel").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_keep_build_container_tristate() {
        assert_eq!(parse(&[]).keep_build_container, None);
        assert_eq!(parse(&["--keep-build-container"]).keep_build_container, Some(true));
        assert_eq!(parse(&["--keep_build_container"]).keep_build_container, Some(true));
        assert_eq!(
            parse(&["--keep-build-container=false"]).keep_build_container,
            Some(false)
        );
    }

    #[test]
    fn test_cross_and_flavor() {
        let cli = parse(&["--cross=arm64", "--flavor", "raspberrypi"]);
        assert_eq!(cli.cross, Some(Architecture::Arm64));
        assert_eq!(cli.flavor, Some(Flavor::Raspberrypi));
        assert!(Cli::try_parse_from(["rebuild-kernel", "--cross=amd64"]).is_err());
    }
}
