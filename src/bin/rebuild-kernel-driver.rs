//! In-container entry point: download, patch, configure and compile the
//! kernel, then write the artifacts into the mounted staging directory.

use anyhow::Result;
use clap::Parser;

use kernel_rebuild::build::{run_driver, DriverOptions};
use kernel_rebuild::target::parse_cross;
use kernel_rebuild::{exit_code, in_container, logging, Architecture, BuildTarget, Flavor, RebuildError};

#[derive(Parser)]
#[command(name = "rebuild-kernel-driver")]
#[command(author, version, about = "Kernel build driver (runs inside the build container)", long_about = None)]
struct Cli {
    /// If non-empty, cross-compile for the specified arch (one of 'arm64')
    #[arg(long, value_parser = parse_cross, default_value = "", value_name = "ARCH")]
    cross: Architecture,

    /// Which kernel flavor to build: vanilla (kernel.org) or raspberrypi
    /// (github.com/raspberrypi/linux tags)
    #[arg(long, value_enum, default_value_t = Flavor::Vanilla)]
    flavor: Flavor,

    /// URL of the upstream source archive
    #[arg(value_name = "UPSTREAM-URL")]
    upstream_url: String,
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
    if !in_container() {
        return Err(RebuildError::WrongEnvironment(format!(
            "{} only runs inside the build container ({} is not set); run rebuild-kernel instead",
            kernel_rebuild::DRIVER_BINARY,
            kernel_rebuild::IN_CONTAINER_ENV
        ))
        .into());
    }

    let target = BuildTarget::new(cli.cross, cli.flavor)?;
    let opts = DriverOptions::in_container(cli.upstream_url, target)?;
    run_driver(&opts)?;
    Ok(())
}
