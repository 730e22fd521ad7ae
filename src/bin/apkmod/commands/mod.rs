pub mod device;
pub mod package;
pub mod patch;

use apkmod::tools::adb::{BridgeOutput, BridgeStatus};

/// Turns an unsuccessful bridge call into an error carrying adb's output.
pub fn ensure_bridge(out: &BridgeOutput, what: &str) -> anyhow::Result<()> {
    let reason = match out.status {
        BridgeStatus::Ok => return Ok(()),
        BridgeStatus::NoDevice => "no device connected",
        BridgeStatus::Unavailable => "adb could not be started",
        BridgeStatus::Failed => "adb reported an error",
    };
    for line in &out.lines {
        log::error!("adb: {line}");
    }
    anyhow::bail!("{what}: {reason}")
}
