//! OS-level IP forwarding toggle.
//!
//! Enabled once at startup so that frames redirected by ARP spoofing are
//! actually forwarded by the kernel; inverted on clean exit. A non-zero exit
//! code from the toggle command is fatal at startup (§7 item 1).

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::error::ForwardingError;

fn os_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "unsupported"
    }
}

async fn run_toggle(enable: bool) -> Result<()> {
    let os = os_name();

    let status = match os {
        "macos" => {
            let val = if enable { "1" } else { "0" };
            tokio::process::Command::new("sysctl")
                .args(["-w", &format!("net.inet.ip.forwarding={val}")])
                .status()
                .await
                .context("failed to spawn sysctl")?
        }
        "linux" => {
            let val = if enable { "1" } else { "0" };
            tokio::process::Command::new("sysctl")
                .args(["-w", &format!("net.ipv4.ip_forward={val}")])
                .status()
                .await
                .context("failed to spawn sysctl")?
        }
        "windows" => {
            let val = if enable { "Enabled" } else { "Disabled" };
            tokio::process::Command::new("powershell")
                .args(["-Command", &format!("Set-NetIPInterface -Forwarding {val}")])
                .status()
                .await
                .context("failed to spawn powershell")?
        }
        other => bail!(ForwardingError::UnsupportedOs(other.to_string())),
    };

    if !status.success() {
        bail!(ForwardingError::CommandFailed(status.code().unwrap_or(-1)));
    }

    Ok(())
}

/// Enable OS IP forwarding. Fatal at startup on failure.
pub async fn enable() -> Result<()> {
    info!("enabling OS IP forwarding");
    run_toggle(true).await
}

/// Disable OS IP forwarding. Called from the clean-up path on process exit;
/// failures here are logged, not propagated — the process is already
/// shutting down.
pub async fn disable() {
    info!("disabling OS IP forwarding");
    if let Err(e) = run_toggle(false).await {
        tracing::warn!(error = %e, "failed to disable IP forwarding on shutdown");
    }
}
