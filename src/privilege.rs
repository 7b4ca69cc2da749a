//! Privilege check: the process must run as root/administrator (§6). Startup
//! fails fast otherwise.

#[cfg(unix)]
pub fn is_admin() -> bool {
    // SAFETY: geteuid takes no arguments and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(windows)]
pub fn is_admin() -> bool {
    // Best-effort: a full administrator-token check requires the Windows API
    // surface this crate doesn't otherwise depend on. Shell out to a
    // lightweight PowerShell check instead, mirroring the IP-forwarding
    // toggle's approach to Windows-specific operations.
    use std::process::Command;
    Command::new("powershell")
        .args([
            "-Command",
            "([Security.Principal.WindowsPrincipal][Security.Principal.WindowsIdentity]::GetCurrent()).IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)",
        ])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "True")
        .unwrap_or(false)
}
