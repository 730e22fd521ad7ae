//! # apkmod
//!
//! A library for instrumenting Android packages: decompile with apktool,
//! inject a native-library hook into the launch activity's smali, fix up the
//! manifest, rebuild and re-sign.
//!
//! The pieces can be used on their own: [`resolve::PathResolver`] to find a
//! class across smali partitions, [`unit::BytecodeUnit`] and
//! [`inject::InjectionPlanner`] to edit one file, [`engine::PatchEngine`] to
//! run a list of [`patch::Patch`]es, and [`pipeline::ArtifactPipeline`] for the
//! whole decompile-to-signed flow.
//!
//! ```no_run
//! use apkmod::config::ToolConfig;
//! use apkmod::patch::{HookTarget, InjectHook, Patch, RemoveExtractNativeLibs};
//! use apkmod::pipeline::ArtifactPipeline;
//! use std::path::Path;
//!
//! let config = ToolConfig::from_env();
//! let apktool = config.apktool();
//! let signer = config.signer();
//! let patches: Vec<Box<dyn Patch>> = vec![
//!     Box::new(InjectHook::new(config.hook(), HookTarget::LaunchActivity)),
//!     Box::new(RemoveExtractNativeLibs),
//! ];
//! let report = ArtifactPipeline::new(&apktool, &apktool, &signer)
//!     .run(Path::new("app.apk"), &patches)
//!     .unwrap();
//! println!("{} packages signed", report.signed.len());
//! ```

pub mod android;
pub mod config;
pub mod engine;
pub mod error;
pub mod inject;
pub mod patch;
pub mod pipeline;
pub mod resolve;
mod smali_parse;
mod tests;
pub mod tools;
pub mod types;
pub mod unit;

pub use error::{Error, PlanError, Result};
pub use smali_parse::{RegisterKind, SmaliRegister};
