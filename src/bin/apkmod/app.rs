use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// apkmod - instrument Android packages with a native-library hook
#[derive(Debug, Parser)]
#[command(name = "apkmod", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List packages installed on the connected device.
    ListPackages,

    /// Show package name, version, launch activity and permissions.
    Info {
        /// Path to the APK file.
        #[arg(value_name = "APK")]
        path: PathBuf,
    },

    /// Decode an APK into `<APK>.decompiled/`.
    Decompile {
        /// Path to the APK file.
        #[arg(value_name = "APK")]
        path: PathBuf,
    },

    /// Build a decoded directory into `<DIR>.recompiled/`.
    Recompile {
        /// Directory produced by `decompile`.
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },

    /// Inject the hook, fix the manifest, rebuild and sign into `<INPUT>.patched/`.
    Patch {
        /// An APK, or a directory of split APKs (as written by `download`).
        #[arg(value_name = "INPUT")]
        path: PathBuf,

        /// Class to inject into instead of the manifest's launch activity.
        #[arg(long, value_name = "CLASS")]
        activity: Option<String>,

        /// Library loaded by the hook, without `lib` prefix and `.so` suffix.
        #[arg(long, value_name = "NAME")]
        library: Option<String>,

        /// Method to inject into, as name and descriptor.
        #[arg(long, value_name = "SIGNATURE")]
        method: Option<String>,

        /// Native library to bundle into the package.
        #[arg(long, value_name = "SO")]
        payload: Option<PathBuf>,

        /// ABI directory the payload is placed under.
        #[arg(long, default_value = "arm64-v8a", requires = "payload")]
        abi: String,

        /// Run every patch even after one fails, then stop before rebuilding.
        #[arg(long)]
        keep_going: bool,
    },

    /// Pull every APK of an installed package into a directory named after it.
    Download {
        /// Package name, e.g. com.example.app.
        #[arg(value_name = "PACKAGE")]
        package: String,
    },

    /// Install every APK in a directory as one package.
    Install {
        /// Directory holding the APKs.
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },
}
