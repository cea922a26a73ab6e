//! Check command implementation.
//!
//! Validates system requirements and configuration.

use nix::unistd::geteuid;
use std::path::Path;

use syspart::partition::TASKS_FILE;
use syspart::process::{collect_pids, AttributeSource, ProcfsSource};
use syspart::sysmon::{ProcStatSource, StatSource};
use syspart::Config;

/// Validates system requirements and configuration. With `cgroups` the
/// configured partitions are also opened below the mount point.
pub fn command_check(cgroups: bool, config: &Config) -> anyhow::Result<()> {
    println!("🔍 syspart - System Check");
    println!("=========================");

    let mut all_ok = true;
    let options = config.options();

    println!("\n👤 Checking privileges...");
    if geteuid().is_root() {
        println!("   ✅ Running as root");
    } else {
        println!("   ⚠️  Not running as root - task moves and renicing will fail");
    }

    println!("\n📁 Checking {} ...", options.proc_root.display());
    let pids = collect_pids(&options.proc_root);
    if pids.is_empty() {
        println!("   ❌ Cannot read any process entries");
        all_ok = false;
    } else {
        println!("   ✅ Can read {} process entries", pids.len());
        let source = ProcfsSource::new(&options.proc_root);
        let resolved = pids
            .iter()
            .filter_map(|&pid| source.snapshot(pid, 0))
            .filter(|attrs| attrs.binary.is_some())
            .count();
        println!("   ℹ️  Executable resolved for {}/{}", resolved, pids.len());
    }

    println!("\n📈 Checking kernel statistics...");
    match ProcStatSource::open(&options.proc_root) {
        Ok(mut stats) => {
            match stats.cpu_times() {
                Ok(_) => println!("   ✅ CPU times readable"),
                Err(e) => {
                    println!("   ❌ CPU times: {}", e);
                    all_ok = false;
                }
            }
            match stats.swap() {
                Ok(swap) => match swap.used_percent() {
                    Some(pct) => println!("   ✅ Swap usage: {}%", pct),
                    None => println!("   ℹ️  No swap configured"),
                },
                Err(e) => println!("   ⚠️  Swap usage: {}", e),
            }
        }
        Err(e) => {
            if config.iowait.is_some() || config.swap.is_some() {
                println!("   ❌ Cannot open statistics: {}", e);
                all_ok = false;
            } else {
                println!("   ⚠️  Cannot open statistics: {}", e);
            }
        }
    }

    println!("\n🗂️  Checking cgroup hierarchy...");
    if mounted(&options.mount) {
        println!("   ✅ Mounted at {}", options.mount.display());
    } else if options.mount_if_missing {
        println!("   ⚠️  Not mounted at {} (mount_if_missing is set)", options.mount.display());
    } else {
        println!("   ❌ No hierarchy at {}", options.mount.display());
        all_ok = false;
    }

    println!("\n⚙️  Checking configuration...");
    match config.compile() {
        Ok(blueprint) => {
            println!(
                "   ✅ Configuration is valid: {} partition(s), {} group(s), {} rule(s)",
                blueprint.partitions.len(),
                blueprint.groups.len(),
                blueprint.rules.len()
            );
            if blueprint.rules.fallback().is_none() {
                println!("   ⚠️  No fallback rule - unmatched binaries stay where they are");
            }
            if cgroups {
                println!("\n🧪 Opening partitions...");
                match blueprint.instantiate() {
                    Ok(mut ctx) => {
                        println!("   ✅ {} partition(s) opened", ctx.partitions.len());
                        ctx.teardown();
                    }
                    Err(e) => {
                        println!("   ❌ {}", e);
                        all_ok = false;
                    }
                }
            }
        }
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}

fn mounted(mount: &Path) -> bool {
    mount.join(TASKS_FILE).exists()
}
