use std::env;

use serde::{Deserialize, Serialize};

use crate::inject::{Hook, ON_CREATE};
use crate::tools::aapt::Aapt;
use crate::tools::adb::Adb;
use crate::tools::{Apktool, CommandSigner};

pub const ENV_APKTOOL: &str = "APKMOD_APKTOOL";
pub const ENV_ADB: &str = "APKMOD_ADB";
pub const ENV_AAPT: &str = "APKMOD_AAPT";
pub const ENV_SIGNER: &str = "APKMOD_SIGNER";
pub const ENV_HOOK_LIBRARY: &str = "APKMOD_HOOK_LIBRARY";

/// Locations of the external tools and the hook parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub apktool: String,
    pub adb: String,
    pub aapt: String,
    pub signer: String,
    /// Signer arguments; `{apk}` is replaced with the package path.
    pub signer_args: Vec<String>,
    /// Library loaded by the injected hook, without `lib` and `.so`.
    pub hook_library: String,
    /// Method the hook is injected into.
    pub hook_method: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            apktool: "apktool".to_string(),
            adb: "adb".to_string(),
            aapt: "aapt".to_string(),
            signer: "uber-apk-signer".to_string(),
            signer_args: ["--apks", "{apk}", "--overwrite", "--allowResign"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hook_library: "memscanner".to_string(),
            hook_method: ON_CREATE.to_string(),
        }
    }
}

impl ToolConfig {
    /// Defaults overlaid with the `APKMOD_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |field: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        };
        set(&mut self.apktool, ENV_APKTOOL);
        set(&mut self.adb, ENV_ADB);
        set(&mut self.aapt, ENV_AAPT);
        set(&mut self.signer, ENV_SIGNER);
        set(&mut self.hook_library, ENV_HOOK_LIBRARY);
        self
    }

    pub fn apktool(&self) -> Apktool {
        Apktool::new(&self.apktool)
    }

    pub fn adb(&self) -> Adb {
        Adb::new(&self.adb)
    }

    pub fn aapt(&self) -> Aapt {
        Aapt::new(&self.aapt)
    }

    pub fn signer(&self) -> CommandSigner {
        CommandSigner::new(&self.signer, self.signer_args.clone())
    }

    pub fn hook(&self) -> Hook {
        Hook::mem_scanner(&self.hook_library)
    }
}
