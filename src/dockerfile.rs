//! Rendering of the build image's Dockerfile.
//!
//! The image is a plain Debian toolchain plus the driver binary, the config
//! addendum and the patch series. The build user inside it gets the invoking
//! host user's uid/gid so everything it writes into the bind-mounted staging
//! directory is owned by that user on the host.

use anyhow::{bail, Context as _, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};

use crate::error::RebuildError;
use crate::target::Architecture;
use crate::{ADDENDUM_FILENAME, DRIVER_BINARY, IN_CONTAINER_ENV};

const TEMPLATE_NAME: &str = "Dockerfile";

const TEMPLATE: &str = r#"FROM debian:bookworm

RUN apt-get update && apt-get install -y \
{%- if cross %}
  crossbuild-essential-{{ cross }} \
{%- endif %}
  build-essential bc libssl-dev bison flex libelf-dev ncurses-dev ca-certificates zstd kmod python3

COPY {{ driver }} /usr/bin/{{ driver }}
COPY {{ addendum.source }} /usr/src/{{ addendum.name }}
{%- for patch in patches %}
COPY {{ patch.source }} /usr/src/{{ patch.name }}
{%- endfor %}

RUN echo 'builduser:x:{{ uid }}:{{ gid }}:nobody:/:/bin/sh' >> /etc/passwd && \
    chown -R {{ uid }}:{{ gid }} /usr/src

USER builduser
WORKDIR /usr/src
ENV {{ sentinel }}=1
ENTRYPOINT ["/usr/bin/{{ driver }}"]
"#;

/// Inputs of the Dockerfile template.
#[derive(Debug, Clone)]
pub struct DockerfileParams<'a> {
    pub uid: u32,
    pub gid: u32,
    /// Patch paths relative to the build context, in series order.
    pub patches: &'a [String],
    /// The config addendum, inside the build context. Always lands at
    /// `/usr/src/config.addendum.txt` in the image.
    pub addendum: &'a Path,
    pub arch: Architecture,
}

#[derive(serde::Serialize)]
struct FileCopy<'a> {
    source: &'a str,
    name: String,
}

fn addendum_copy<'a>(context_dir: &Path, addendum: &'a Path) -> Result<FileCopy<'a>> {
    let relative = addendum.strip_prefix(context_dir).unwrap_or(addendum);
    if relative.is_absolute() || !context_dir.join(relative).is_file() {
        return Err(RebuildError::MissingFile(context_dir.join(relative)).into());
    }
    let source = relative
        .to_str()
        .with_context(|| format!("Failed to use non-UTF-8 addendum path {}", relative.display()))?;
    Ok(FileCopy {
        source,
        name: ADDENDUM_FILENAME.to_string(),
    })
}

/// Render the Dockerfile for `params`.
///
/// Every patch must already exist in `context_dir`; a missing one fails here
/// rather than halfway through the image build.
pub fn render(context_dir: &Path, params: &DockerfileParams<'_>) -> Result<String> {
    let mut copies = Vec::with_capacity(params.patches.len());
    let mut seen = BTreeSet::new();
    for patch in params.patches {
        if !context_dir.join(patch).is_file() {
            return Err(RebuildError::UnresolvablePatch {
                patch: patch.clone(),
                context: context_dir.to_path_buf(),
            }
            .into());
        }
        let name = Path::new(patch)
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("patch path '{patch}' has no file name"))?
            .to_string();
        if !seen.insert(name.clone()) {
            bail!("two patches in series share the file name '{name}'");
        }
        copies.push(FileCopy {
            source: patch.as_str(),
            name,
        });
    }

    let addendum = addendum_copy(context_dir, params.addendum)?;

    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, TEMPLATE)
        .context("Failed to parse Dockerfile template")?;

    let mut ctx = Context::new();
    ctx.insert("uid", &params.uid);
    ctx.insert("gid", &params.gid);
    ctx.insert("cross", params.arch.cross_flag());
    ctx.insert("driver", DRIVER_BINARY);
    ctx.insert("addendum", &addendum);
    ctx.insert("patches", &copies);
    ctx.insert("sentinel", IN_CONTAINER_ENV);

    tera.render(TEMPLATE_NAME, &ctx)
        .context("Failed to render Dockerfile template")
}

/// Render and write `<context_dir>/Dockerfile`.
pub fn write(context_dir: &Path, params: &DockerfileParams<'_>) -> Result<PathBuf> {
    let content = render(context_dir, params)?;
    let path = context_dir.join(TEMPLATE_NAME);
    fs::write(&path, content).with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(path)
}
