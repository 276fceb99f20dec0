//! Host checks run before a program image is handed to the kernel

use crate::{Error, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Read-only globals (`.rodata` patching) need 5.2
const MIN_KERNEL: (u32, u32) = (5, 2);

/// Run pre-flight checks to validate the system can load kprobe programs
pub fn run_preflight_checks() -> Result<()> {
    debug!("Running pre-flight checks...");

    check_kernel_version()?;
    check_btf();
    check_capabilities();

    debug!("Pre-flight checks passed");
    Ok(())
}

fn check_kernel_version() -> Result<()> {
    let output = std::process::Command::new("uname").arg("-r").output()?;

    let release = String::from_utf8_lossy(&output.stdout);
    let (major, minor) = parse_kernel_release(&release).ok_or_else(|| {
        Error::ProgramLoadFailed(format!("Could not parse kernel version: {}", release.trim()))
    })?;

    if (major, minor) < MIN_KERNEL {
        return Err(Error::ProgramLoadFailed(format!(
            "Kernel {} is too old. Minimum required: {}.{}",
            release.trim(),
            MIN_KERNEL.0,
            MIN_KERNEL.1
        )));
    }

    info!("Kernel version: {} (supported)", release.trim());
    Ok(())
}

/// Parse `major.minor` out of a `uname -r` string such as `6.1.0-18-amd64`
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor_part = parts.next()?;
    let minor_digits: String = minor_part.chars().take_while(|c| c.is_ascii_digit()).collect();
    let minor = minor_digits.parse().ok()?;
    Some((major, minor))
}

fn check_btf() {
    if !Path::new("/sys/kernel/btf/vmlinux").exists() {
        warn!("BTF not found at /sys/kernel/btf/vmlinux; programs relying on CO-RE may fail to load");
    }
}

fn check_capabilities() {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        warn!(
            "Not running as root (euid={}). Ensure CAP_BPF and CAP_PERFMON (or CAP_SYS_ADMIN) are granted.",
            euid
        );
    }
}
