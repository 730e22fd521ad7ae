use std::path::Path;

use apkmod::config::ToolConfig;
use apkmod::engine::EngineOptions;
use apkmod::inject::Hook;
use apkmod::patch::{HookTarget, InjectHook, Patch, PatchOutcome, PatchResult, RemoveExtractNativeLibs, StageNativeLibrary};
use apkmod::pipeline::ArtifactPipeline;
use apkmod::types::ObjectIdentifier;
use log::error;

use crate::{app::GlobalOptions, output::print_output};

pub struct PatchOptions<'a> {
    pub activity: Option<&'a str>,
    pub library: Option<&'a str>,
    pub method: Option<&'a str>,
    pub payload: Option<&'a Path>,
    pub abi: &'a str,
    pub keep_going: bool,
}

fn build_patches(options: &PatchOptions<'_>, config: &ToolConfig) -> Vec<Box<dyn Patch>> {
    let hook = match options.library {
        Some(library) => Hook::mem_scanner(library),
        None => config.hook(),
    };
    let target = match options.activity {
        Some(class) => HookTarget::Class(ObjectIdentifier::from_java_type(class)),
        None => HookTarget::LaunchActivity,
    };
    let method = options.method.unwrap_or(&config.hook_method);

    let mut patches: Vec<Box<dyn Patch>> = vec![
        Box::new(InjectHook::new(hook, target).with_method(method)),
        Box::new(RemoveExtractNativeLibs),
    ];
    if let Some(payload) = options.payload {
        patches.push(Box::new(StageNativeLibrary::new(payload, options.abi)));
    }
    patches
}

fn print_results(results: &[PatchResult]) {
    for result in results {
        let diagnostic = result.diagnostic.as_deref().unwrap_or("");
        println!("{:<28} {:<8} {diagnostic}", result.name, result.outcome.to_string());
    }
}

pub fn run(
    input: &Path,
    options: &PatchOptions<'_>,
    config: &ToolConfig,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let patches = build_patches(options, config);
    let apktool = config.apktool();
    let signer = config.signer();

    let pipeline = ArtifactPipeline::new(&apktool, &apktool, &signer).with_options(EngineOptions {
        fail_fast: !options.keep_going,
    });

    match pipeline.run(input, &patches) {
        Ok(report) => print_output(&report, opts, |r| {
            print_results(&r.patches);
            for apk in &r.signed {
                println!("signed {}", apk.display());
            }
        }),
        Err(failure) => {
            if !opts.json {
                print_results(&failure.patches);
            }
            for result in failure.patches.iter().filter(|r| r.outcome == PatchOutcome::Failed) {
                error!(
                    "patch {} failed: {}",
                    result.name,
                    result.diagnostic.as_deref().unwrap_or("no diagnostic")
                );
            }
            if let Some(work) = &failure.working_copy {
                error!("working copy kept at {}", work.display());
            }
            Err(failure.into())
        }
    }
}
