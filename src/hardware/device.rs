//! Device and execution provider types

use crate::version::DriverVersion;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Class of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Npu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
            Self::Npu => write!(f, "npu"),
        }
    }
}

/// Hardware vendor, derived from the PCI vendor id where available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Amd,
    Nvidia,
    Intel,
    #[default]
    Other,
}

impl Vendor {
    pub fn from_pci_id(vendor_id: u32) -> Self {
        match vendor_id {
            0x1002 | 0x1022 => Self::Amd,
            0x10de => Self::Nvidia,
            0x8086 => Self::Intel,
            _ => Self::Other,
        }
    }
}

/// Backend that executes a model graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum ExecutionProvider {
    #[serde(rename = "DirectML")]
    DirectMl,
    #[serde(rename = "MIGraphX")]
    MiGraphX,
    /// Vendor NPU provider with dynamic dispatch
    #[serde(rename = "RyzenAI")]
    RyzenAi,
    /// Baseline CPU execution, always available. Unrecognized provider
    /// names deserialize to this variant, which must stay last.
    #[serde(rename = "CPU")]
    #[serde(other)]
    Cpu,
}

impl ExecutionProvider {
    /// Providers probed against GPU adapters when settings list none
    pub fn gpu_defaults() -> Vec<Self> {
        vec![Self::DirectMl, Self::MiGraphX]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::DirectMl => "DirectML",
            Self::MiGraphX => "MIGraphX",
            Self::RyzenAi => "RyzenAI",
        }
    }
}

/// Case-insensitive; unrecognized names select [`ExecutionProvider::Cpu`]
impl FromStr for ExecutionProvider {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Ok([Self::DirectMl, Self::MiGraphX, Self::RyzenAi]
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
            .unwrap_or(Self::Cpu))
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Utilization snapshot refreshed by the live-metrics poller
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    /// Utilization in percent (0-100)
    pub utilization: f32,
    /// Device memory in use, in bytes
    pub memory_used: u64,
    /// Memory used by this process, in bytes
    pub process_memory_used: u64,
}

/// A detected compute device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub name: String,
    /// Adapter index used by execution providers
    pub device_id: u32,
    pub vendor: Vendor,
    /// Providers that successfully built a probe session on this device
    pub providers: Vec<ExecutionProvider>,
    /// Dedicated memory in bytes
    pub memory: u64,
    /// Shared system memory available to the device, in bytes
    pub shared_memory: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<DriverVersion>,
    pub is_default: bool,
    pub metrics: LiveMetrics,
}

impl Device {
    pub fn new(kind: DeviceKind, name: impl Into<String>, device_id: u32) -> Self {
        Self {
            kind,
            name: name.into(),
            device_id,
            vendor: Vendor::Other,
            providers: Vec::new(),
            memory: 0,
            shared_memory: 0,
            driver_version: None,
            is_default: false,
            metrics: LiveMetrics::default(),
        }
    }

    /// Dedicated memory in GiB
    pub fn memory_gb(&self) -> f64 {
        self.memory as f64 / GIB
    }

    pub fn supports(&self, provider: ExecutionProvider) -> bool {
        self.providers.contains(&provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_from_pci_id() {
        assert_eq!(Vendor::from_pci_id(0x1002), Vendor::Amd);
        assert_eq!(Vendor::from_pci_id(0x10de), Vendor::Nvidia);
        assert_eq!(Vendor::from_pci_id(0x8086), Vendor::Intel);
        assert_eq!(Vendor::from_pci_id(0x1414), Vendor::Other);
    }

    #[test]
    fn test_provider_serde_names() {
        let json = serde_json::to_string(&ExecutionProvider::DirectMl).unwrap();
        assert_eq!(json, "\"DirectML\"");
        let parsed: ExecutionProvider = serde_json::from_str("\"RyzenAI\"").unwrap();
        assert_eq!(parsed, ExecutionProvider::RyzenAi);
        let unknown: ExecutionProvider = serde_json::from_str("\"OpenVINO\"").unwrap();
        assert_eq!(unknown, ExecutionProvider::Cpu);
        assert_eq!(ExecutionProvider::MiGraphX.to_string(), "MIGraphX");
    }

    #[test]
    fn test_unknown_provider_in_list_falls_back_to_cpu() {
        let parsed: Vec<ExecutionProvider> =
            serde_json::from_str(r#"["DirectML", "CUDA", "CPU"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                ExecutionProvider::DirectMl,
                ExecutionProvider::Cpu,
                ExecutionProvider::Cpu
            ]
        );
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("directml".parse::<ExecutionProvider>(), Ok(ExecutionProvider::DirectMl));
        assert_eq!(" RyzenAI ".parse::<ExecutionProvider>(), Ok(ExecutionProvider::RyzenAi));
        assert_eq!("cpu".parse::<ExecutionProvider>(), Ok(ExecutionProvider::Cpu));
        assert_eq!("OpenVINO".parse::<ExecutionProvider>(), Ok(ExecutionProvider::Cpu));
    }

    #[test]
    fn test_memory_gb() {
        let mut device = Device::new(DeviceKind::Gpu, "Radeon RX 7900 XTX", 0);
        device.memory = 24 * 1024 * 1024 * 1024;
        assert_eq!(device.memory_gb(), 24.0);
        assert!(!device.supports(ExecutionProvider::DirectMl));
    }
}
