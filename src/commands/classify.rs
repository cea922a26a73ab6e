//! Classify command implementation.
//!
//! Evaluates the rules for one process and reports the decision without
//! moving the process or touching any partition.

use syspart::process::{AttributeSource, ProcfsSource};
use syspart::rules::{rule_eval, Command};
use syspart::Config;

/// Prints the attribute snapshot of `pid` and what the rules decide.
pub fn command_classify(pid: u32, config: &Config) -> anyhow::Result<()> {
    let blueprint = config.compile()?;
    let source = ProcfsSource::new(&blueprint.options.proc_root);

    let Some(attrs) = source.snapshot(pid, 0) else {
        anyhow::bail!("process {} not found", pid);
    };

    println!("🔍 Process {}", pid);
    println!("{}", "─".repeat(50));
    println!("{}", serde_json::to_string_pretty(&attrs)?);

    let binary = attrs.binary.as_deref().unwrap_or("");
    let Some(procdef) = blueprint.rules.lookup(binary) else {
        println!("\n⚪ No rule for '{}' and no fallback", binary);
        return Ok(());
    };
    println!("\n📜 Rule: {}", procdef.binary);

    match rule_eval(procdef, &attrs) {
        Some(Command::Group(name)) => {
            let partition = blueprint
                .groups
                .lookup(name)
                .map(|g| g.partition.clone())
                .unwrap_or_default();
            println!("   ✅ group {} (partition {})", name, partition);
        }
        Some(Command::Ignore) => println!("   🚫 ignore"),
        Some(Command::Reclassify { delay_ms }) => {
            println!("   ⏳ reclassify after {} ms", delay_ms)
        }
        None => println!("   ⚪ no statement matched"),
    }
    if procdef.renice != 0 {
        println!("   renice {}", procdef.renice);
    }
    Ok(())
}
