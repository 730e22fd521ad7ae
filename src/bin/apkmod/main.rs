mod app;
mod commands;
mod output;

use apkmod::config::ToolConfig;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Progress on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("apkmod", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    let config = ToolConfig::from_env();

    match &cli.command {
        Command::ListPackages => commands::device::list_packages(&config, &cli.global),
        Command::Info { path } => commands::package::info(path, &config, &cli.global),
        Command::Decompile { path } => commands::package::decompile(path, &config, &cli.global),
        Command::Recompile { path } => commands::package::recompile(path, &config, &cli.global),
        Command::Patch {
            path,
            activity,
            library,
            method,
            payload,
            abi,
            keep_going,
        } => commands::patch::run(
            path,
            &commands::patch::PatchOptions {
                activity: activity.as_deref(),
                library: library.as_deref(),
                method: method.as_deref(),
                payload: payload.as_deref(),
                abi,
                keep_going: *keep_going,
            },
            &config,
            &cli.global,
        ),
        Command::Download { package } => commands::device::download(package, &config, &cli.global),
        Command::Install { path } => commands::device::install(path, &config, &cli.global),
    }
}
