//! Hardware profile resolution
//!
//! Profiles are configured bundles of recommended settings. The profile for
//! the running machine is chosen by matching rules against the base device
//! (the default GPU, or the CPU when no GPU is detected). Within every rule
//! candidates are ordered by descending `min_memory`, so the most demanding
//! profile that still fits wins.

use super::{DetectedHardware, Device, DeviceKind, Vendor};
use crate::models::CachePolicy;
use serde::{Deserialize, Serialize};

/// Named bundle of recommended settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub name: String,
    /// Minimum base-device memory in GiB
    pub min_memory: u32,
    /// Device name patterns; `None` or empty matches any device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<String>>,
    /// Profile tuned for AMD GPUs
    #[serde(default)]
    pub amd_gpu: bool,
    #[serde(default)]
    pub recommendations: Recommendations,
}

/// Settings a profile recommends to the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_policy: Option<CachePolicy>,
    /// Largest generated image edge in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<u32>,
    pub low_memory_mode: bool,
}

impl HardwareProfile {
    pub fn new(name: impl Into<String>, min_memory: u32) -> Self {
        Self {
            name: name.into(),
            min_memory,
            devices: None,
            amd_gpu: false,
            recommendations: Recommendations::default(),
        }
    }

    pub fn with_devices<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn amd(mut self) -> Self {
        self.amd_gpu = true;
        self
    }

    fn is_wildcard(&self) -> bool {
        self.devices.as_ref().is_none_or(|d| d.is_empty())
    }

    fn fits(&self, memory_gb: f64) -> bool {
        f64::from(self.min_memory) <= memory_gb
    }

    fn matches_any(&self, names: &[&str]) -> bool {
        self.devices.iter().flatten().any(|pattern| {
            names
                .iter()
                .any(|name| matches_pattern(pattern, name))
        })
    }

    fn matches_exact(&self, name: &str) -> bool {
        self.devices
            .iter()
            .flatten()
            .any(|pattern| pattern.eq_ignore_ascii_case(name))
    }
}

/// CPUs with an integrated NPU and iGPU
pub fn is_ryzen_ai(cpu: &Device) -> bool {
    cpu.name.to_ascii_lowercase().contains("ryzen ai")
}

/// Memory of the base device in GiB, falling back to shared memory for
/// devices that report no dedicated memory
pub fn base_memory_gb(device: &Device) -> f64 {
    if device.memory > 0 || device.kind == DeviceKind::Cpu {
        device.memory_gb()
    } else {
        device.shared_memory as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Resolve the profile for `hardware`
///
/// Rules, first match wins:
/// 1. Ryzen AI machines with a single GPU: device patterns matching the base
///    device or the CPU
/// 2. AMD base device: profiles flagged `amd_gpu`
/// 3. Exact base-device name in the profile's device list
/// 4. Wildcard profiles (no device list)
/// 5. The first configured profile
pub fn resolve_profile<'a>(
    profiles: &'a [HardwareProfile],
    hardware: &DetectedHardware,
) -> Option<&'a HardwareProfile> {
    let base = hardware.base_device();
    let memory = base_memory_gb(base);
    let is_amd = base.vendor == Vendor::Amd;
    let vendor_ok = |p: &HardwareProfile| !p.amd_gpu || is_amd;

    let ryzen_ai = is_ryzen_ai(&hardware.cpu) && hardware.gpus.len() == 1;
    let names = [base.name.as_str(), hardware.cpu.name.as_str()];

    let selected = ryzen_ai
        .then(|| best_fit(profiles, memory, |p| !p.is_wildcard() && p.matches_any(&names)))
        .flatten()
        .map(|p| (p, "ryzen_ai"))
        .or_else(|| {
            is_amd
                .then(|| best_fit(profiles, memory, |p| p.amd_gpu))
                .flatten()
                .map(|p| (p, "amd_gpu"))
        })
        .or_else(|| {
            best_fit(profiles, memory, |p| vendor_ok(p) && p.matches_exact(&base.name))
                .map(|p| (p, "device_name"))
        })
        .or_else(|| {
            best_fit(profiles, memory, |p| vendor_ok(p) && p.is_wildcard())
                .map(|p| (p, "wildcard"))
        })
        .or_else(|| profiles.first().map(|p| (p, "fallback")));

    if let Some((profile, rule)) = selected {
        tracing::debug!(
            profile = %profile.name,
            rule,
            device = %base.name,
            memory_gb = memory,
            "Resolved hardware profile"
        );
    }

    selected.map(|(profile, _)| profile)
}

/// Highest `min_memory` profile satisfying `predicate` that fits `memory`;
/// ties keep configuration order
fn best_fit<'a>(
    profiles: &'a [HardwareProfile],
    memory: f64,
    predicate: impl Fn(&HardwareProfile) -> bool,
) -> Option<&'a HardwareProfile> {
    let mut candidates: Vec<&HardwareProfile> = profiles
        .iter()
        .filter(|p| predicate(p) && p.fits(memory))
        .collect();
    candidates.sort_by(|a, b| b.min_memory.cmp(&a.min_memory));
    candidates.first().copied()
}

/// Case-insensitive match; `*` matches any run of characters, a pattern
/// without `*` matches as a substring
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();

    if !pattern.contains('*') {
        return name.contains(&pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = name.strip_prefix(first) else {
        return false;
    };

    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for part in middle {
        match remaining.find(part) {
            Some(index) => remaining = &remaining[index + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}
