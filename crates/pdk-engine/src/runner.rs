// Runner selection policy and runs-on label mapping.

use pdk_core::error::PdkError;
use pdk_core::ports::{DriverHealth, RunnerType};
use pdk_core::RunnerMode;

/// Decide the concrete runner for a job given the requested mode and the
/// container driver's health.
///
/// `host` always runs on the host. `docker` requires a healthy driver.
/// `auto` uses docker when available and falls back to the host.
pub fn select_runner(mode: RunnerMode, health: &DriverHealth) -> Result<RunnerType, PdkError> {
    match mode {
        RunnerMode::Host => Ok(RunnerType::Host),
        RunnerMode::Docker => {
            if health.available {
                Ok(RunnerType::Docker)
            } else {
                Err(PdkError::docker_unavailable(
                    health
                        .error
                        .clone()
                        .unwrap_or_else(|| "driver not responding".to_string()),
                ))
            }
        }
        RunnerMode::Auto => Ok(if health.available {
            RunnerType::Docker
        } else {
            RunnerType::Host
        }),
    }
}

/// Map a runs-on label to a concrete container image.
///
/// Unrecognised labels that already look like image references (contain
/// `:` or `/`) pass through unchanged; anything else falls back to the
/// default Ubuntu image.
pub fn map_runner_image(runs_on: &str) -> String {
    let label = runs_on.trim().to_lowercase();
    match label.as_str() {
        "ubuntu-latest" | "ubuntu-24.04" => "ubuntu:24.04".to_string(),
        "ubuntu-22.04" => "ubuntu:22.04".to_string(),
        "ubuntu-20.04" => "ubuntu:20.04".to_string(),
        "windows-latest" | "windows-2022" | "windows-2019" => {
            "mcr.microsoft.com/windows/servercore:ltsc2022".to_string()
        }
        "macos-latest" | "macos-14" | "macos-13" => {
            // No macOS containers exist; the closest approximation is a
            // plain Linux userland.
            "ubuntu:24.04".to_string()
        }
        _ if label.contains(':') || label.contains('/') => runs_on.trim().to_string(),
        _ => "ubuntu:24.04".to_string(),
    }
}
