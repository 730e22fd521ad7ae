use std::path::Path;

use anyhow::Context;
use apkmod::config::ToolConfig;
use apkmod::pipeline::{decompile_beside, recompile_beside};
use apkmod::tools::aapt::Badging;
use serde::Serialize;

use crate::{app::GlobalOptions, output::print_output};

pub fn info(path: &Path, config: &ToolConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    let out = config
        .aapt()
        .dump_badging(path)?
        .check("aapt")
        .with_context(|| format!("dumping {}", path.display()))?;
    let badging = Badging::parse(&out.lines);

    print_output(&badging, opts, |b| {
        let none = "-";
        println!("package:             {}", b.package.as_deref().unwrap_or(none));
        println!(
            "version:             {} ({})",
            b.version_name.as_deref().unwrap_or(none),
            b.version_code.as_deref().unwrap_or(none)
        );
        println!(
            "launchable activity: {}",
            b.launchable_activity.as_deref().unwrap_or(none)
        );
        for permission in &b.permissions {
            println!("uses permission:     {permission}");
        }
    })
}

#[derive(Debug, Serialize)]
struct Output<'a> {
    input: &'a Path,
    output: &'a Path,
}

pub fn decompile(path: &Path, config: &ToolConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    let out = decompile_beside(&config.apktool(), path)
        .with_context(|| format!("decompiling {}", path.display()))?;
    print_output(&Output { input: path, output: &out }, opts, |o| {
        println!("decompiled into {}", o.output.display());
    })
}

pub fn recompile(path: &Path, config: &ToolConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    let apk = recompile_beside(&config.apktool(), path)
        .with_context(|| format!("recompiling {}", path.display()))?;
    print_output(&Output { input: path, output: &apk }, opts, |o| {
        println!("built {}", o.output.display());
    })
}
