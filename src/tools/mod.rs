//! Out-of-process collaborators: apktool, the package signer, adb and aapt.
//!
//! Every call blocks until the tool exits. A tool that cannot be started is an
//! [`Error::Collaborator`] with no status; a tool that ran returns its exit
//! status and output lines and the caller decides what a non-zero status means.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};

pub mod aapt;
pub mod adb;

/// Placeholder substituted with the package path in signer arguments.
pub const APK_PLACEHOLDER: &str = "{apk}";

/// Exit status and output of a finished tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    /// Standard output lines followed by standard error lines.
    pub lines: Vec<String>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turns an unsuccessful run into an error.
    pub fn check(self, tool: &str) -> Result<ToolOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::Collaborator {
                tool: tool.to_string(),
                status: self.status,
                output: self.lines,
            })
        }
    }
}

/// Wrapper around [`Command`] collecting the exit status and output.
pub fn execute_command<I, S>(program: &str, args: I) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    debug!("running {command:?}");

    let output = command.output().map_err(|err| Error::Collaborator {
        tool: program.to_string(),
        status: None,
        output: vec![err.to_string()],
    })?;

    let lines = String::from_utf8_lossy(&output.stdout)
        .lines()
        .chain(String::from_utf8_lossy(&output.stderr).lines())
        .map(str::to_string)
        .collect();
    Ok(ToolOutput {
        status: output.status.code(),
        lines,
    })
}

/// Decodes a package into an editable tree.
pub trait Decompiler {
    fn decompile(&self, apk: &Path, out_dir: &Path) -> Result<ToolOutput>;
}

/// Builds a package from an edited tree.
pub trait Recompiler {
    fn recompile(&self, tree: &Path, apk: &Path) -> Result<ToolOutput>;
}

/// Signs a package in place.
pub trait Signer {
    fn sign(&self, apk: &Path) -> Result<ToolOutput>;
}

/// apktool, used both to decode and to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apktool {
    program: String,
}

impl Apktool {
    pub fn new(program: impl Into<String>) -> Self {
        Apktool {
            program: program.into(),
        }
    }
}

impl Decompiler for Apktool {
    fn decompile(&self, apk: &Path, out_dir: &Path) -> Result<ToolOutput> {
        execute_command(
            &self.program,
            [OsStr::new("d"), OsStr::new("-f"), apk.as_os_str(), OsStr::new("-o"), out_dir.as_os_str()],
        )
    }
}

impl Recompiler for Apktool {
    fn recompile(&self, tree: &Path, apk: &Path) -> Result<ToolOutput> {
        execute_command(
            &self.program,
            [OsStr::new("b"), tree.as_os_str(), OsStr::new("-o"), apk.as_os_str()],
        )
    }
}

/// A signer driven by a program and an argument template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSigner {
    program: String,
    args: Vec<String>,
}

impl CommandSigner {
    /// `args` may contain [`APK_PLACEHOLDER`]; without one the path is appended.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandSigner {
            program: program.into(),
            args,
        }
    }

    fn arguments(&self, apk: &Path) -> Vec<String> {
        let apk = apk.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(APK_PLACEHOLDER, &apk))
            .collect();
        if !self.args.iter().any(|arg| arg.contains(APK_PLACEHOLDER)) {
            args.push(apk.into_owned());
        }
        args
    }
}

impl Signer for CommandSigner {
    fn sign(&self, apk: &Path) -> Result<ToolOutput> {
        execute_command(&self.program, self.arguments(apk))
    }
}
