//! Environment check: analyzer binary and GPU.

use console::style;

use crate::analysis::{Analyzer, CommandAnalyzer, GpuStatus};
use crate::config::Settings;

pub async fn cmd_check(settings: &Settings) -> anyhow::Result<()> {
    println!("\n{}", style("docsift Status").bold());
    println!("{}", "-".repeat(50));

    println!("\n{}", style("Configuration:").cyan());
    match settings.validate() {
        Ok(()) => println!("  {:<15} {}", "settings", style("✓ valid").green()),
        Err(e) => println!("  {:<15} {}", "settings", style(format!("✗ {}", e)).red()),
    }

    println!("\n{}", style("Analyzer:").cyan());
    let analyzer = CommandAnalyzer::new(settings.analyzer.clone());
    let available = analyzer.is_available();
    let status = if available {
        style("✓ available").green()
    } else {
        style("✗ not available").red()
    };
    println!("  {:<15} {}", analyzer.name(), status);
    if !available {
        println!("                  {}", style(analyzer.availability_hint()).dim());
    }

    println!("\n{}", style("GPU:").cyan());
    let gpu = GpuStatus::probe().await;
    if gpu.available {
        for device in &gpu.devices {
            let memory = match (device.memory_used_mb, device.memory_total_mb) {
                (Some(used), Some(total)) => format!("{}/{} MiB", used, total),
                _ => "memory unknown".to_string(),
            };
            println!("  {:<15} {} ({})", style("✓").green(), device.name, memory);
        }
    } else {
        println!(
            "  {:<15} {}",
            style("○ none").yellow(),
            style(gpu.error.unwrap_or_default()).dim()
        );
    }

    println!();
    if !available {
        anyhow::bail!("Analyzer '{}' is not available", settings.analyzer.command);
    }
    Ok(())
}
