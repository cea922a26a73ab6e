//! Startup requirement validation for syspart.
//!
//! This module validates that the daemon has the permissions and kernel
//! interfaces it needs before the cgroup hierarchy is touched.

use nix::unistd::geteuid;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, error, info, warn};

use syspart::partition::TASKS_FILE;
use syspart::Options;

/// Validate all runtime requirements
pub fn validate_requirements(options: &Options) -> Result<(), ValidationError> {
    info!("🔍 Validating runtime requirements...");

    check_user_privileges();
    check_proc_access(&options.proc_root)?;
    check_cgroup_mount(&options.mount, options.mount_if_missing)?;

    info!("✅ All runtime requirements validated");
    Ok(())
}

/// Check if running with sufficient privileges
fn check_user_privileges() {
    if !geteuid().is_root() {
        warn!("⚠️  Not running as root - moving processes and renicing will likely fail");
        warn!("   Recommendation: Run as root or grant CAP_SYS_ADMIN and CAP_SYS_NICE");
    } else {
        info!("✅ Running as root (uid=0)");
    }
}

/// Check that process executables can be resolved
fn check_proc_access(proc_root: &Path) -> Result<(), ValidationError> {
    if !proc_root.join("self").exists() {
        error!("❌ {} does not look like a procfs mount", proc_root.display());
        return Err(ValidationError::ProcUnavailable(proc_root.display().to_string()));
    }

    let test = proc_root.join("1").join("exe");
    match fs::read_link(&test) {
        Ok(target) => {
            debug!("{} -> {}", test.display(), target.display());
            info!("✅ /proc access: Can resolve executables of all processes");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            error!("❌ Cannot resolve {} - insufficient permissions", test.display());
            error!("   Only processes of the current user can be classified!");
            error!("   Solution: setcap cap_sys_ptrace+ep /path/to/binary");
            Err(ValidationError::InsufficientPermissions(e.to_string()))
        }
        Err(e) => {
            warn!("⚠️  Could not test /proc access: {}", e);
            Ok(())
        }
    }
}

/// Check that a cgroup hierarchy is mounted, or can be mounted
fn check_cgroup_mount(mount: &Path, mount_if_missing: bool) -> Result<(), ValidationError> {
    let tasks = mount.join(TASKS_FILE);
    if tasks.exists() {
        info!("✅ cgroup hierarchy found at {}", mount.display());
        return Ok(());
    }
    if mount_if_missing {
        info!("ℹ️  No cgroup hierarchy at {} - it will be mounted", mount.display());
        return Ok(());
    }

    error!("❌ {} not found - no cgroup hierarchy mounted", tasks.display());
    error!(
        "   Solution: mount -t cgroup -o freezer,cpu,memory cgroup {}",
        mount.display()
    );
    error!("   or set `mount_if_missing: true` in the configuration");
    Err(ValidationError::CgroupNotMounted(mount.display().to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("procfs not available at {0}")]
    ProcUnavailable(String),

    #[error("no cgroup hierarchy mounted at {0}")]
    CgroupNotMounted(String),
}
