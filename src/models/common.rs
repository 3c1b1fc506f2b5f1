// Common model utilities and types

use anyhow::{Context, Result};
use candle_core::Device;
use serde::{Deserialize, Serialize};

/// Device configuration options
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA when available, then Metal, then CPU
    #[default]
    Auto,
    /// Force CPU usage
    Cpu,
    /// Force CUDA (requires the `cuda` feature)
    Cuda,
    /// Force Metal (requires the `metal` feature)
    Metal,
}

/// Resolve a preference to a concrete candle device
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let device = match preference {
        DevicePreference::Auto => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0).context("CUDA reported available but failed to open")?
            } else if candle_core::utils::metal_is_available() {
                Device::new_metal(0).context("Metal reported available but failed to open")?
            } else {
                Device::Cpu
            }
        }
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => {
            Device::new_cuda(0).context("Failed to open CUDA device (built without `cuda`?)")?
        }
        DevicePreference::Metal => {
            Device::new_metal(0).context("Failed to open Metal device (built without `metal`?)")?
        }
    };

    tracing::info!(device = device_label(&device), "Selected compute device");
    Ok(device)
}

/// Human-readable device name for logs and error messages
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal (Apple Silicon GPU)",
    }
}
