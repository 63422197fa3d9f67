//! End-to-end host runs against a fake container engine.
//!
//! The engine is a shell script: `build` checks that a Dockerfile was written,
//! `run` writes a synthetic artifact set into the `--volume` directory the way
//! the driver would.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use kernel_rebuild::artifact::manifest::{BuildManifest, MANIFEST_FILENAME};
use kernel_rebuild::config::DEFAULT_IMAGE_TAG;
use kernel_rebuild::host::{rebuild_kernel, HostOptions};
use kernel_rebuild::{exit_code, Architecture, BuildTarget, Flavor, RebuildError};
use tempfile::TempDir;
use walkdir::WalkDir;

const ENGINE: &str = r#"#!/bin/sh
echo "$@" >> "@LOG@"
case "$1" in
  build)
    [ -f Dockerfile ] || exit 7
    [ -f rebuild-kernel-driver ] || exit 8
    ;;
  run)
    while [ $# -gt 0 ]; do
      [ "$1" = "--volume" ] && vol="${2%%:*}"
      shift
    done
    [ -n "@FAIL@" ] && exit @FAIL@
    echo "new kernel" > "$vol/vmlinuz"
    mkdir -p "$vol/lib/modules/6.1.21/kernel"
    echo module > "$vol/lib/modules/6.1.21/kernel/foo.ko"
    ln -s /usr/src/linux-6.1.21 "$vol/lib/modules/6.1.21/build"
    ln -s /usr/src/linux-6.1.21 "$vol/lib/modules/6.1.21/source"
    echo dtb > "$vol/bcm2710-rpi-3-b.dtb"
    ;;
esac
exit 0
"#;

struct Repo {
    _temp: TempDir,
    root: PathBuf,
    staging: PathBuf,
    engine: PathBuf,
    driver: PathBuf,
    log: PathBuf,
}

fn repo(fail_with: Option<i32>) -> Repo {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("kernel-rpi");
    let staging = root.join("_build");
    fs::create_dir_all(&staging).unwrap();

    fs::write(root.join("vmlinuz"), "old kernel").unwrap();
    fs::create_dir_all(root.join("lib/modules/5.15.0")).unwrap();
    fs::write(root.join("lib/modules/5.15.0/old.ko"), "old").unwrap();
    fs::write(root.join("obsolete.dtb"), "old").unwrap();

    fs::write(staging.join("series"), "0001-fix.patch\n").unwrap();
    fs::write(staging.join("0001-fix.patch"), "--- a/x\n+++ b/x\n").unwrap();
    fs::write(staging.join("config.addendum.txt"), "CONFIG_SQUASHFS=y\n").unwrap();
    fs::write(
        staging.join("upstream-url.txt"),
        "https://cdn.kernel.org/pub/linux/kernel/v6.x/linux-6.1.21.tar.xz\n",
    )
    .unwrap();

    let log = temp.path().join("engine.log");
    let engine_dir = temp.path().join("engine");
    fs::create_dir_all(&engine_dir).unwrap();
    let engine = engine_dir.join("podman");
    let script = ENGINE
        .replace("@LOG@", &log.display().to_string())
        .replace("@FAIL@", &fail_with.map(|c| c.to_string()).unwrap_or_default());
    fs::write(&engine, script).unwrap();
    fs::set_permissions(&engine, fs::Permissions::from_mode(0o755)).unwrap();

    let driver = temp.path().join("rebuild-kernel-driver");
    fs::write(&driver, "#!/bin/sh\n").unwrap();

    Repo {
        _temp: temp,
        root,
        staging,
        engine,
        driver,
        log,
    }
}

fn options(repo: &Repo) -> HostOptions {
    HostOptions {
        staging_dir: repo.staging.clone(),
        container_executable: Some(repo.engine.display().to_string()),
        keep_build_container: false,
        target: BuildTarget::new(Architecture::Arm64, Flavor::Vanilla).unwrap(),
        driver_binary: repo.driver.clone(),
        image_tag: DEFAULT_IMAGE_TAG.to_string(),
    }
}

fn engine_calls(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

#[test]
fn test_full_run_reconciles_artifacts() {
    let repo = repo(None);

    let manifest = rebuild_kernel(&options(&repo)).unwrap();

    let calls = engine_calls(&repo.log);
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        "build --platform=linux/amd64 --rm=true --tag=rebuild-kernel ."
    );
    assert_eq!(
        calls[1],
        format!(
            "run --platform=linux/amd64 --volume {}:/tmp/buildresult:Z --rm --userns=keep-id \
             rebuild-kernel --cross=arm64 --flavor=vanilla \
             https://cdn.kernel.org/pub/linux/kernel/v6.x/linux-6.1.21.tar.xz",
            repo.staging.display()
        )
    );

    assert_eq!(fs::read_to_string(repo.root.join("vmlinuz")).unwrap(), "new kernel\n");
    assert!(repo.root.join("lib/modules/6.1.21/kernel/foo.ko").exists());
    assert!(!repo.root.join("lib/modules/5.15.0").exists());
    for entry in WalkDir::new(repo.root.join("lib/modules")) {
        assert!(!entry.unwrap().path_is_symlink());
    }
    assert!(repo.root.join("bcm2710-rpi-3-b.dtb").exists());
    assert!(!repo.root.join("obsolete.dtb").exists());

    let dockerfile = fs::read_to_string(repo.staging.join("Dockerfile")).unwrap();
    assert!(dockerfile.contains("COPY 0001-fix.patch /usr/src/0001-fix.patch"));
    assert!(dockerfile.contains("crossbuild-essential-arm64"));

    assert_eq!(manifest.kernel_release.as_deref(), Some("6.1.21"));
    assert_eq!(manifest.patches, vec!["0001-fix.patch"]);
    assert!(repo.staging.join(MANIFEST_FILENAME).exists());
}

#[test]
fn test_rerun_is_reproducible() {
    let repo = repo(None);

    let first = rebuild_kernel(&options(&repo)).unwrap();
    let second = rebuild_kernel(&options(&repo)).unwrap();

    assert_eq!(first, second);
    assert_eq!(BuildManifest::load(&repo.staging).unwrap(), second);
}

#[test]
fn test_missing_series_fails_before_container_build() {
    let repo = repo(None);
    fs::remove_file(repo.staging.join("series")).unwrap();

    let err = rebuild_kernel(&options(&repo)).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<RebuildError>(),
        Some(RebuildError::MissingFile(_))
    ));
    assert!(engine_calls(&repo.log).is_empty());
    assert!(!repo.staging.join("Dockerfile").exists());
}

#[test]
fn test_failed_container_run_leaves_repository_untouched() {
    let repo = repo(Some(2));

    let err = rebuild_kernel(&options(&repo)).unwrap_err();

    assert_eq!(exit_code(&err), 2);
    assert_eq!(fs::read_to_string(repo.root.join("vmlinuz")).unwrap(), "old kernel");
    assert!(repo.root.join("lib/modules/5.15.0/old.ko").exists());
    assert!(repo.root.join("obsolete.dtb").exists());
    assert!(!repo.staging.join(MANIFEST_FILENAME).exists());
}

#[test]
fn test_keep_build_container_omits_rm() {
    let repo = repo(None);
    let mut opts = options(&repo);
    opts.keep_build_container = true;

    rebuild_kernel(&opts).unwrap();

    let calls = engine_calls(&repo.log);
    assert!(!calls[1].contains(" --rm "));
    assert!(calls[1].contains("--userns=keep-id"));
}

#[test]
fn test_corrupt_previous_manifest_is_replaced() {
    let repo = repo(None);
    fs::write(repo.staging.join(MANIFEST_FILENAME), "{ truncated").unwrap();

    let manifest = rebuild_kernel(&options(&repo)).unwrap();

    assert_eq!(BuildManifest::load(&repo.staging).unwrap(), manifest);
}
