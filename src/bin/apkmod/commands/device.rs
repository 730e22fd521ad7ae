use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use apkmod::config::ToolConfig;
use log::{info, warn};
use serde::Serialize;

use super::ensure_bridge;
use crate::{app::GlobalOptions, output::print_output};

pub fn list_packages(config: &ToolConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    let out = config.adb().list_packages();
    ensure_bridge(&out, "listing packages")?;

    let mut packages = out.lines;
    packages.sort();
    print_output(&packages, opts, |packages| {
        for package in packages {
            println!("{package}");
        }
    })
}

#[derive(Debug, Serialize)]
struct Download {
    package: String,
    directory: PathBuf,
    files: Vec<String>,
}

/// Pulls all files of `package` into `./<package>/`, replacing an existing directory.
pub fn download(package: &str, config: &ToolConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    let adb = config.adb();

    let installed = adb.list_packages();
    ensure_bridge(&installed, "listing packages")?;
    if !installed.lines.iter().any(|p| p == package) {
        anyhow::bail!("package {package} is not installed (see `apkmod list-packages`)");
    }

    let paths = adb.package_paths(package);
    ensure_bridge(&paths, "locating package files")?;

    let dir = Path::new(package).to_path_buf();
    if dir.is_dir() {
        warn!("directory {} exists, removing it", dir.display());
        fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
    }
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let total = paths.lines.len();
    for (idx, remote) in paths.lines.iter().enumerate() {
        info!("downloading ({}/{total}) {remote}", idx + 1);
        let out = adb.pull(remote, &dir);
        ensure_bridge(&out, &format!("pulling {remote}"))?;
    }

    let report = Download {
        package: package.to_string(),
        directory: dir,
        files: paths.lines,
    };
    print_output(&report, opts, |r| {
        println!("downloaded {} file(s) into {}", r.files.len(), r.directory.display());
    })
}

pub fn install(dir: &Path, config: &ToolConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    let out = config
        .adb()
        .install_dir(dir)
        .with_context(|| format!("installing from {}", dir.display()))?;
    ensure_bridge(&out, "installing")?;

    print_output(&out, opts, |out| {
        for line in &out.lines {
            println!("{line}");
        }
    })
}
