//! Compute device selection
//!
//! The device is chosen once at startup and every tensor the service creates
//! is allocated on it.

use candle_core::{Device, DeviceLocation};
use serde::{Deserialize, Serialize};
use skinlens_shared::SkinlensError;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Which device the operator asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DevicePreference {
    /// CUDA if present, then Metal, then CPU
    #[default]
    Auto,
    /// Always the CPU
    Cpu,
    /// A specific CUDA ordinal
    Cuda(usize),
    /// A specific Metal ordinal
    Metal(usize),
}

impl FromStr for DevicePreference {
    type Err = SkinlensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let parse_ordinal = |ordinal: &str| {
            ordinal.parse::<usize>().map_err(|_| {
                SkinlensError::configuration(format!("Invalid device ordinal in `{}`", s), None)
            })
        };

        match normalized.as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            "metal" => Ok(Self::Metal(0)),
            other => {
                if let Some(ordinal) = other.strip_prefix("cuda:") {
                    Ok(Self::Cuda(parse_ordinal(ordinal)?))
                } else if let Some(ordinal) = other.strip_prefix("metal:") {
                    Ok(Self::Metal(parse_ordinal(ordinal)?))
                } else {
                    Err(SkinlensError::configuration(
                        format!(
                            "Unknown device `{}` (expected auto, cpu, cuda[:N] or metal[:N])",
                            s
                        ),
                        None,
                    ))
                }
            }
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            Self::Metal(ordinal) => write!(f, "metal:{}", ordinal),
        }
    }
}

impl TryFrom<String> for DevicePreference {
    type Error = SkinlensError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DevicePreference> for String {
    fn from(value: DevicePreference) -> Self {
        value.to_string()
    }
}

/// Picks the compute device for the lifetime of the process
///
/// Never fails: an accelerator that cannot be initialised is logged and the
/// CPU is used instead.
pub fn select_device(preference: DevicePreference) -> Device {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda(ordinal) => cuda_or_cpu(ordinal),
        DevicePreference::Metal(ordinal) => metal_or_cpu(ordinal),
        DevicePreference::Auto => {
            if candle_core::utils::cuda_is_available() {
                cuda_or_cpu(0)
            } else if candle_core::utils::metal_is_available() {
                metal_or_cpu(0)
            } else {
                Device::Cpu
            }
        }
    };

    info!(
        preference = %preference,
        device = %describe_device(&device),
        "Selected compute device"
    );
    device
}

fn cuda_or_cpu(ordinal: usize) -> Device {
    match Device::new_cuda(ordinal) {
        Ok(device) => device,
        Err(e) => {
            warn!(ordinal, error = %e, "CUDA device unavailable, falling back to CPU");
            Device::Cpu
        }
    }
}

fn metal_or_cpu(ordinal: usize) -> Device {
    match Device::new_metal(ordinal) {
        Ok(device) => device,
        Err(e) => {
            warn!(ordinal, error = %e, "Metal device unavailable, falling back to CPU");
            Device::Cpu
        }
    }
}

/// Short human-readable name such as `cpu` or `cuda:0`
pub fn describe_device(device: &Device) -> String {
    match device.location() {
        DeviceLocation::Cpu => "cpu".to_string(),
        DeviceLocation::Cuda { gpu_id } => format!("cuda:{}", gpu_id),
        DeviceLocation::Metal { gpu_id } => format!("metal:{}", gpu_id),
    }
}
