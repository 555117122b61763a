//! Reporting how much space the quarantine area holds.
//!
//! This shells out to `du` and has no bearing on what gets collected.

use std::{path::Path, process::Command};

use anyhow::{ensure, Context, Result};
use fn_error_context::context;

/// Extracts the size from the final `<size>\ttotal` line of `du -c` output.
pub fn parse_total(output: &str) -> Option<&str> {
    let last = output.lines().rev().find(|line| !line.trim().is_empty())?;
    let (size, label) = last.split_once('\t')?;
    (label.trim() == "total").then(|| size.trim())
}

/// Human-readable total size of everything below `path`, as reported by `du -hc`.
#[context("Measuring disk usage of {}", path.display())]
pub fn disk_usage(path: &Path) -> Result<String> {
    let output = Command::new("du")
        .arg("-hc")
        .arg(path)
        .output()
        .context("Running du")?;
    ensure!(
        output.status.success(),
        "du failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_total(&stdout)
        .map(str::to_owned)
        .context("No total in du output")
}
