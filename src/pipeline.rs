//! decompile → patch → recompile → sign, on a copy of the input.
//!
//! The input (a package file or a directory of split packages) is never
//! written to. Everything happens in a sibling `<input>.patched/` directory,
//! which is kept after the run so a failure can be inspected.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::android::archive::verify_package;
use crate::engine::{EngineOptions, PatchEngine};
use crate::error::{Error, Result};
use crate::patch::{Patch, PatchOutcome, PatchResult};
use crate::resolve::DecompiledTree;
use crate::tools::adb::apk_files;
use crate::tools::{Decompiler, Recompiler, Signer};

/// File name of the main package in a split package set.
pub const BASE_APK: &str = "base.apk";

const WORKING_COPY_SUFFIX: &str = "patched";
const DECOMPILED_SUFFIX: &str = "decompiled";
const RECOMPILED_SUFFIX: &str = "recompiled";

/// Progress of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pristine,
    Decompiled,
    Patched,
    Recompiled,
    Signed,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Pristine => "pristine",
            PipelineState::Decompiled => "decompiled",
            PipelineState::Patched => "patched",
            PipelineState::Recompiled => "recompiled",
            PipelineState::Signed => "signed",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// `<path>.<suffix>` next to `path`.
fn sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::format(path, "path has no file name"))?;
    let mut name = name.to_os_string();
    name.push(".");
    name.push(suffix);
    Ok(path.with_file_name(name))
}

/// The isolated copy of the input artifacts a run works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    root: PathBuf,
    base: PathBuf,
}

impl WorkingCopy {
    /// Creates `<input>.patched/` with copies of the input packages, replacing a stale one.
    pub fn create(input: &Path) -> Result<Self> {
        if !input.exists() {
            return Err(Error::NotFound(input.display().to_string()));
        }
        let root = sibling(input, WORKING_COPY_SUFFIX)?;
        if root.exists() {
            warn!("removing stale working copy {}", root.display());
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;

        if input.is_file() {
            let name = input
                .file_name()
                .ok_or_else(|| Error::format(input, "path has no file name"))?;
            let base = root.join(name);
            fs::copy(input, &base)?;
            return Ok(WorkingCopy { root, base });
        }

        for entry in fs::read_dir(input)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), root.join(entry.file_name()))?;
            }
        }
        let base = Self::pick_base(&root)?;
        Ok(WorkingCopy { root, base })
    }

    // `base.apk` when present, otherwise the only package.
    fn pick_base(root: &Path) -> Result<PathBuf> {
        let apks = apk_files(root)?;
        if let Some(base) = apks.iter().find(|p| p.file_name().map_or(false, |n| n == BASE_APK)) {
            return Ok(base.clone());
        }
        match apks.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(Error::NotFound(format!("no .apk files in {}", root.display()))),
            _ => Err(Error::format(
                root,
                format!("{} packages and none named {BASE_APK}", apks.len()),
            )),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The package that gets decompiled and rebuilt.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `<stem>.decompiled` inside the working copy.
    pub fn tree_dir(&self) -> PathBuf {
        let stem = self
            .base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "base".to_string());
        self.root.join(format!("{stem}.{DECOMPILED_SUFFIX}"))
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub working_copy: PathBuf,
    pub tree: PathBuf,
    pub base: PathBuf,
    /// Every package signed, in signing order.
    pub signed: Vec<PathBuf>,
    pub patches: Vec<PatchResult>,
}

/// A run that stopped before `Done`.
#[derive(Debug, Error)]
#[error("pipeline stopped after reaching the {stage} state: {error}")]
pub struct PipelineFailure {
    /// Last state reached before the failure.
    pub stage: PipelineState,
    #[source]
    pub error: Error,
    pub patches: Vec<PatchResult>,
    /// Retained for inspection; `None` if it was never created.
    pub working_copy: Option<PathBuf>,
}

struct Run {
    state: PipelineState,
    patches: Vec<PatchResult>,
    working_copy: Option<PathBuf>,
}

impl Run {
    fn advance(&mut self, state: PipelineState) {
        info!("pipeline: {} -> {}", self.state, state);
        self.state = state;
    }
}

/// Single-shot driver of the full instrumentation flow.
pub struct ArtifactPipeline<'a> {
    decompiler: &'a dyn Decompiler,
    recompiler: &'a dyn Recompiler,
    signer: &'a dyn Signer,
    options: EngineOptions,
}

impl<'a> ArtifactPipeline<'a> {
    pub fn new(
        decompiler: &'a dyn Decompiler,
        recompiler: &'a dyn Recompiler,
        signer: &'a dyn Signer,
    ) -> Self {
        ArtifactPipeline {
            decompiler,
            recompiler,
            signer,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run(
        self,
        input: &Path,
        patches: &[Box<dyn Patch>],
    ) -> std::result::Result<PipelineReport, PipelineFailure> {
        let mut run = Run {
            state: PipelineState::Pristine,
            patches: vec![],
            working_copy: None,
        };

        match self.drive(&mut run, input, patches) {
            Ok(report) => Ok(report),
            Err(err) => {
                let stage = run.state;
                error!("pipeline failed in state {stage}: {err}");
                run.advance(PipelineState::Failed);
                Err(PipelineFailure {
                    stage,
                    error: err,
                    patches: run.patches,
                    working_copy: run.working_copy,
                })
            }
        }
    }

    fn drive(&self, run: &mut Run, input: &Path, patches: &[Box<dyn Patch>]) -> Result<PipelineReport> {
        let work = WorkingCopy::create(input)?;
        run.working_copy = Some(work.root().to_path_buf());
        info!("working copy {}", work.root().display());

        let tree_dir = work.tree_dir();
        self.decompiler
            .decompile(work.base(), &tree_dir)?
            .check("decompiler")?;
        let mut tree = DecompiledTree::open(&tree_dir)?;
        run.advance(PipelineState::Decompiled);

        run.patches = PatchEngine::new(self.options).apply_all(&mut tree, patches);
        if let Some(failed) = run.patches.iter().find(|r| r.outcome == PatchOutcome::Failed) {
            return Err(Error::Patch {
                name: failed.name.clone(),
                diagnostic: failed.diagnostic.clone().unwrap_or_default(),
            });
        }
        run.advance(PipelineState::Patched);

        self.recompiler
            .recompile(tree.root(), work.base())?
            .check("recompiler")?;
        verify_package(work.base())?;
        run.advance(PipelineState::Recompiled);

        let mut signed = vec![];
        for apk in apk_files(work.root())? {
            self.signer.sign(&apk)?.check("signer")?;
            info!("signed {}", apk.display());
            signed.push(apk);
        }
        run.advance(PipelineState::Signed);

        run.advance(PipelineState::Done);
        Ok(PipelineReport {
            working_copy: work.root().to_path_buf(),
            tree: tree.root().to_path_buf(),
            base: work.base().to_path_buf(),
            signed,
            patches: run.patches.clone(),
        })
    }
}

/// Decodes `apk` into `<apk>.decompiled/`.
pub fn decompile_beside(decompiler: &dyn Decompiler, apk: &Path) -> Result<PathBuf> {
    if !apk.is_file() {
        return Err(Error::NotFound(apk.display().to_string()));
    }
    let out = sibling(apk, DECOMPILED_SUFFIX)?;
    decompiler.decompile(apk, &out)?.check("decompiler")?;
    Ok(out)
}

/// Builds `dir` into `<dir>.recompiled/<dir name>.apk`.
pub fn recompile_beside(recompiler: &dyn Recompiler, dir: &Path) -> Result<PathBuf> {
    let tree = DecompiledTree::open(dir)?;
    let out_dir = sibling(dir, RECOMPILED_SUFFIX)?;
    fs::create_dir_all(&out_dir)?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let name = name.strip_suffix(".decompiled").unwrap_or(&name).trim_end_matches(".apk");
    let apk = out_dir.join(format!("{name}.apk"));
    recompiler.recompile(tree.root(), &apk)?.check("recompiler")?;
    verify_package(&apk)?;
    Ok(apk)
}
