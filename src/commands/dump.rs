//! Dump command implementation.
//!
//! Lists partitions, groups and rules of the effective configuration
//! without touching the cgroup hierarchy.

use syspart::partition::Limit;
use syspart::Config;

fn limit(l: Limit) -> String {
    match l {
        Limit::NoControl => "-".to_string(),
        Limit::NoLimit => "unlimited".to_string(),
        Limit::Value(v) => v.to_string(),
    }
}

/// Prints the compiled registries.
pub fn command_dump(config: &Config) -> anyhow::Result<()> {
    let blueprint = config.compile()?;

    println!("📦 Partitions below {}", blueprint.options.mount.display());
    println!("{}", "─".repeat(50));
    for spec in &blueprint.partitions {
        let mut flags = Vec::new();
        if spec.flags.nofreeze {
            flags.push("nofreeze");
        }
        if spec.flags.exported {
            flags.push("exported");
        }
        if spec.frozen {
            flags.push("frozen");
        }
        println!(
            "   ├─ {} (cpu={}, memory={}) {}",
            spec.name,
            limit(spec.cpu),
            limit(spec.memory),
            flags.join(",")
        );
    }

    println!("\n🏷️  Groups");
    println!("{}", "─".repeat(50));
    print!("{}", blueprint.groups.dump());

    println!("\n📜 Rules");
    println!("{}", "─".repeat(50));
    for procdef in blueprint.rules.sorted() {
        print!("{}", procdef);
    }
    if let Some(fallback) = blueprint.rules.fallback() {
        print!("{}", fallback);
    }

    if let Some(iowait) = &blueprint.iowait {
        println!(
            "\n⏱️  iowait: low={} high={} window={} interval={:?}",
            iowait.low, iowait.high, iowait.window, iowait.interval
        );
    }
    if let Some(swap) = &blueprint.swap {
        println!(
            "💾 swap: low={} high={} smoothing={} interval={:?} notify={:?}",
            swap.low, swap.high, swap.smoothing, swap.interval, swap.notify_interval
        );
    }

    println!(
        "\n📋 Total: {} partition(s), {} group(s), {} rule(s)",
        blueprint.partitions.len(),
        blueprint.groups.len(),
        blueprint.rules.len()
    );
    Ok(())
}
