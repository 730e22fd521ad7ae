use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Serialize;

use super::{execute_command, ToolOutput};
use crate::error::{Error, Result};

const PACKAGE_PREFIX: &str = "package:";

// adb prints these when no usable device is attached.
const NO_DEVICE_MESSAGES: [&str; 4] = [
    "no devices/emulators found",
    "device offline",
    "device unauthorized",
    "device not found",
];

/// How a device bridge call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    Ok,
    NoDevice,
    Failed,
    /// adb could not be started.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeOutput {
    pub status: BridgeStatus,
    pub lines: Vec<String>,
}

impl BridgeOutput {
    pub fn is_ok(&self) -> bool {
        self.status == BridgeStatus::Ok
    }

    fn from_tool(output: ToolOutput) -> Self {
        let no_device = output
            .lines
            .iter()
            .any(|line| NO_DEVICE_MESSAGES.iter().any(|msg| line.contains(msg)));
        let status = if no_device {
            BridgeStatus::NoDevice
        } else if output.success() {
            BridgeStatus::Ok
        } else {
            BridgeStatus::Failed
        };
        BridgeOutput {
            status,
            lines: output.lines,
        }
    }

    // Keeps `package:`-prefixed lines, without the prefix.
    fn packages(mut self) -> Self {
        if self.is_ok() {
            self.lines = self
                .lines
                .iter()
                .filter_map(|line| line.trim().strip_prefix(PACKAGE_PREFIX))
                .map(str::to_string)
                .collect();
        }
        self
    }
}

/// The Android debug bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adb {
    program: String,
}

impl Adb {
    pub fn new(program: impl Into<String>) -> Self {
        Adb {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> BridgeOutput {
        match execute_command(&self.program, args) {
            Ok(output) => BridgeOutput::from_tool(output),
            Err(err) => {
                warn!("{err}");
                BridgeOutput {
                    status: BridgeStatus::Unavailable,
                    lines: vec![err.to_string()],
                }
            }
        }
    }

    /// Installed package names.
    pub fn list_packages(&self) -> BridgeOutput {
        self.run(&["shell", "pm", "list", "packages"]).packages()
    }

    /// On-device paths of a package's files; split packages have several.
    pub fn package_paths(&self, package: &str) -> BridgeOutput {
        self.run(&["shell", "pm", "path", package]).packages()
    }

    pub fn pull(&self, remote: &str, local_dir: &Path) -> BridgeOutput {
        let local = local_dir.to_string_lossy();
        self.run(&["pull", remote, local.as_ref()])
    }

    /// Installs every `.apk` of `dir` as one (possibly split) package.
    pub fn install_dir(&self, dir: &Path) -> Result<BridgeOutput> {
        let apks = apk_files(dir)?;
        if apks.is_empty() {
            return Err(Error::NotFound(format!("no .apk files in {}", dir.display())));
        }
        debug!("installing {} packages from {}", apks.len(), dir.display());

        let apks: Vec<String> = apks.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let mut args = vec!["install-multiple", "-r"];
        args.extend(apks.iter().map(String::as_str));
        Ok(self.run(&args))
    }
}

/// Regular `.apk` files directly inside `dir`, sorted by name.
pub fn apk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut apks = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && path.extension().map_or(false, |ext| ext == "apk") {
            apks.push(path);
        }
    }
    apks.sort();
    Ok(apks)
}
