//! Copying build outputs from the source tree into the mount.
//!
//! Layout written into the mount:
//!
//! ```text
//! vmlinuz                       kernel image
//! lib/modules/<release>/...     written by modules_install, not here
//! *.dtb                         arm64 only
//! overlays/*.dtbo               arm64/raspberrypi only
//! overlays/overlay_map.dtb      arm64/raspberrypi only
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::artifact::filesystem::{copy_file, copy_with_extension};
use crate::target::{Architecture, BuildTarget, Flavor};

pub const AMD64_IMAGE: &str = "arch/x86/boot/bzImage";
pub const ARM64_IMAGE: &str = "arch/arm64/boot/Image";
pub const BROADCOM_DTS_DIR: &str = "arch/arm64/boot/dts/broadcom";
pub const OVERLAYS_DTS_DIR: &str = "arch/arm64/boot/dts/overlays";
pub const OVERLAY_MAP: &str = "overlay_map.dtb";

/// Device trees of vanilla kernels, as `(name in the mount, name in
/// arch/arm64/boot/dts/broadcom)`.
///
/// Boot firmware and downstream tooling look for the Raspberry Pi
/// Foundation's names, which for several boards differ from upstream's.
/// Both zero-2 entries come from the same upstream file.
pub const LEGACY_DTB_NAMES: &[(&str, &str)] = &[
    ("bcm2710-rpi-3-b.dtb", "bcm2837-rpi-3-b.dtb"),
    ("bcm2710-rpi-3-b-plus.dtb", "bcm2837-rpi-3-b-plus.dtb"),
    ("bcm2710-rpi-cm3.dtb", "bcm2837-rpi-cm3-io3.dtb"),
    ("bcm2711-rpi-4-b.dtb", "bcm2711-rpi-4-b.dtb"),
    ("bcm2711-rpi-cm4-io.dtb", "bcm2711-rpi-cm4-io.dtb"),
    ("bcm2710-rpi-zero-2-w.dtb", "bcm2837-rpi-zero-2-w.dtb"),
    ("bcm2710-rpi-zero-2.dtb", "bcm2837-rpi-zero-2-w.dtb"),
    ("bcm2711-rpi-400.dtb", "bcm2711-rpi-400.dtb"),
];

/// Path of the compiled kernel image for `arch`, relative to the source tree.
pub fn kernel_image(arch: Architecture) -> &'static str {
    match arch {
        Architecture::Amd64 => AMD64_IMAGE,
        Architecture::Arm64 => ARM64_IMAGE,
    }
}

/// Copy the kernel image and, on arm64, the device trees into `mount`.
pub fn extract_artifacts(srcdir: &Path, mount: &Path, target: BuildTarget) -> Result<()> {
    let image = srcdir.join(kernel_image(target.arch()));
    tracing::info!("copying {} to {}", image.display(), mount.join("vmlinuz").display());
    copy_file(&image, &mount.join("vmlinuz"))?;

    if target.arch() != Architecture::Arm64 {
        return Ok(());
    }

    let broadcom = srcdir.join(BROADCOM_DTS_DIR);
    match target.flavor() {
        Flavor::Vanilla => {
            for (dest, source) in LEGACY_DTB_NAMES {
                copy_file(&broadcom.join(source), &mount.join(dest))?;
            }
            tracing::info!("copied {} device trees", LEGACY_DTB_NAMES.len());
        }
        Flavor::Raspberrypi => {
            let dtbs = copy_with_extension(&broadcom, mount, "dtb")?;
            tracing::info!("copied {} device trees", dtbs.len());

            let overlays_src = srcdir.join(OVERLAYS_DTS_DIR);
            let overlays_dst = mount.join("overlays");
            fs::create_dir_all(&overlays_dst)
                .with_context(|| format!("Failed to create {}", overlays_dst.display()))?;
            fs::set_permissions(&overlays_dst, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("Failed to set permissions on {}", overlays_dst.display()))?;

            let dtbos = copy_with_extension(&overlays_src, &overlays_dst, "dtbo")?;
            copy_file(&overlays_src.join(OVERLAY_MAP), &overlays_dst.join(OVERLAY_MAP))?;
            tracing::info!("copied {} overlays and {}", dtbos.len(), OVERLAY_MAP);
        }
    }
    Ok(())
}
