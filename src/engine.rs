use log::{error, info, warn};

use crate::patch::{Change, Patch, PatchOutcome, PatchResult};
use crate::resolve::DecompiledTree;

/// Engine behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Stop at the first failed patch.
    pub fail_fast: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions { fail_fast: true }
    }
}

/// Runs patches against a tree in the order given.
///
/// Each patch sees the effects of those before it. There is no rollback: a
/// failure leaves the tree as the earlier patches left it.
#[derive(Debug, Clone, Default)]
pub struct PatchEngine {
    options: EngineOptions,
}

impl PatchEngine {
    pub fn new(options: EngineOptions) -> Self {
        PatchEngine { options }
    }

    pub fn apply_all(&self, tree: &mut DecompiledTree, patches: &[Box<dyn Patch>]) -> Vec<PatchResult> {
        let mut results = Vec::with_capacity(patches.len());

        for patch in patches {
            let name = patch.name().to_string();
            let result = match patch.apply(tree) {
                Ok(Change::Applied(detail)) => {
                    info!("{name}: applied, {detail}");
                    PatchResult {
                        name,
                        outcome: PatchOutcome::Applied,
                        diagnostic: Some(detail),
                    }
                }
                Ok(Change::Skipped(reason)) => {
                    warn!("{name}: skipped, {reason}");
                    PatchResult {
                        name,
                        outcome: PatchOutcome::Skipped,
                        diagnostic: Some(reason),
                    }
                }
                Err(err) => {
                    error!("{name}: failed, {err}");
                    PatchResult {
                        name,
                        outcome: PatchOutcome::Failed,
                        diagnostic: Some(err.to_string()),
                    }
                }
            };

            let failed = result.outcome == PatchOutcome::Failed;
            results.push(result);
            if failed && self.options.fail_fast {
                break;
            }
        }

        results
    }
}
