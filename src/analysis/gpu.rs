//! GPU availability probe via `nvidia-smi`.

use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

const NVIDIA_SMI: &str = "nvidia-smi";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuDevice {
    pub name: String,
    pub memory_total_mb: Option<u64>,
    pub memory_used_mb: Option<u64>,
    pub utilization_percent: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuStatus {
    pub available: bool,
    pub devices: Vec<GpuDevice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GpuStatus {
    fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            devices: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Query `nvidia-smi`. Never fails: problems are reported in `error`.
    pub async fn probe() -> Self {
        Self::probe_with(NVIDIA_SMI, PROBE_TIMEOUT).await
    }

    pub async fn probe_with(binary: &str, timeout: Duration) -> Self {
        let mut command = Command::new(binary);
        command
            .args([
                "--query-gpu=name,memory.total,memory.used,utilization.gpu",
                "--format=csv,noheader,nounits",
            ])
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => Self::unavailable(format!("{} timed out", binary)),
            Ok(Err(e)) => Self::unavailable(format!("{} not runnable: {}", binary, e)),
            Ok(Ok(output)) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Self::unavailable(format!("{} failed: {}", binary, stderr.trim()))
            }
            Ok(Ok(output)) => {
                let devices = parse_devices(&String::from_utf8_lossy(&output.stdout));
                if devices.is_empty() {
                    Self::unavailable("no GPU devices reported")
                } else {
                    Self {
                        available: true,
                        devices,
                        error: None,
                    }
                }
            }
        }
    }
}

/// Parse `name, total, used, util` CSV rows. Blank lines are skipped.
fn parse_devices(csv: &str) -> Vec<GpuDevice> {
    csv.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let field = |i: usize| fields.get(i).copied().unwrap_or("");
            GpuDevice {
                name: field(0).to_string(),
                memory_total_mb: field(1).parse().ok(),
                memory_used_mb: field(2).parse().ok(),
                utilization_percent: field(3).parse().ok(),
            }
        })
        .collect()
}
