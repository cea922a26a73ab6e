//! Config command implementation.
//!
//! Writes the commented sample configuration.

use std::fs;
use std::path::PathBuf;

use syspart::config::SAMPLE_CONFIG;

/// Prints the sample configuration or writes it to `output`.
pub fn command_config(output: Option<PathBuf>) -> anyhow::Result<()> {
    match output {
        Some(path) if path.to_string_lossy() != "-" => {
            fs::write(&path, SAMPLE_CONFIG)?;
            println!("✅ Configuration written to: {}", path.display());
        }
        _ => print!("{}", SAMPLE_CONFIG),
    }
    Ok(())
}
