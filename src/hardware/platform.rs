//! Platform hardware queries
//!
//! [`PlatformQuery`] is the seam between detection logic and the operating
//! system. [`SystemPlatform`] implements it with `sysinfo` for the CPU and
//! process, and with sysfs for GPUs (DRM cards) and NPUs (accel devices, or
//! the PCI driver directory on older kernels). NVIDIA cards do not expose
//! VRAM size in sysfs, so that is filled from nvidia-smi when available.

use super::Vendor;
use crate::version::DriverVersion;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};

/// Kernel drivers that present a display without real hardware behind it
const SOFTWARE_DRIVERS: &[&str] = &["simpledrm", "vkms", "vgem", "efifb"];

/// Kernel drivers of supported NPUs
const NPU_DRIVERS: &[&str] = &["amdxdna"];

#[derive(Debug, Clone, PartialEq)]
pub struct CpuInfo {
    pub name: String,
    pub vendor: Vendor,
    /// Total system memory in bytes
    pub memory: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NpuInfo {
    pub name: String,
    pub device_id: u32,
    pub driver_version: Option<DriverVersion>,
}

/// A display adapter as reported by the platform
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdapterInfo {
    /// Enumeration index, used as the provider device id
    pub index: u32,
    pub name: String,
    pub vendor_id: u32,
    pub pci_device_id: u32,
    pub sub_sys_id: u32,
    pub revision: u32,
    pub is_hardware: bool,
    /// Dedicated memory in bytes
    pub dedicated_memory: u64,
    /// Shared system memory in bytes
    pub shared_memory: u64,
    pub driver_version: Option<DriverVersion>,
}

impl AdapterInfo {
    /// Placeholder and software adapters are never offered as devices
    pub fn is_placeholder(&self) -> bool {
        !self.is_hardware || (self.sub_sys_id == 0 && self.revision == 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemUsage {
    pub cpu_utilization: f32,
    pub memory_used: u64,
    pub process_memory_used: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuUsage {
    pub utilization: f32,
    pub memory_used: u64,
}

/// Operating-system hardware queries
pub trait PlatformQuery: Send + Sync {
    fn cpu(&self) -> Result<CpuInfo>;

    /// Current NPU query path
    fn npu(&self) -> Result<Option<NpuInfo>>;

    /// Legacy driver enumeration, tried when [`PlatformQuery::npu`] fails
    /// or finds nothing
    fn npu_legacy(&self) -> Result<Option<NpuInfo>>;

    fn adapters(&self) -> Result<Vec<AdapterInfo>>;

    fn system_usage(&self) -> Result<SystemUsage>;

    fn gpu_usage(&self, index: u32) -> Result<GpuUsage>;
}

/// Production platform backed by sysinfo and sysfs
pub struct SystemPlatform {
    sysfs_root: PathBuf,
    system: Mutex<System>,
    /// Card directories by adapter index, filled by `adapters()`
    cards: Mutex<Vec<PathBuf>>,
}

impl SystemPlatform {
    pub fn new() -> Self {
        Self::with_sysfs_root("/sys")
    }

    /// Platform reading sysfs below `root` (tests point this at a fixture)
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            sysfs_root: root.into(),
            system: Mutex::new(system),
            cards: Mutex::new(Vec::new()),
        }
    }

    fn driver_version(&self, driver: &str) -> Option<DriverVersion> {
        read_trimmed(&self.sysfs_root.join("module").join(driver).join("version"))
            .and_then(|v| v.parse().ok())
    }

    fn read_adapter(&self, index: u32, card: &Path) -> Option<AdapterInfo> {
        let device = card.join("device");
        let vendor_id = read_hex(&device.join("vendor"))?;
        let pci_device_id = read_hex(&device.join("device")).unwrap_or(0);
        let driver = link_name(&device.join("driver"));

        let name = read_trimmed(&device.join("product_name")).unwrap_or_else(|| {
            format!(
                "{:?} GPU [{:04x}:{:04x}]",
                Vendor::from_pci_id(vendor_id),
                vendor_id,
                pci_device_id
            )
        });

        Some(AdapterInfo {
            index,
            name,
            vendor_id,
            pci_device_id,
            sub_sys_id: read_hex(&device.join("subsystem_device")).unwrap_or(0),
            revision: read_hex(&device.join("revision")).unwrap_or(0),
            is_hardware: driver
                .as_deref()
                .is_some_and(|d| !SOFTWARE_DRIVERS.contains(&d)),
            dedicated_memory: read_u64(&device.join("mem_info_vram_total")).unwrap_or(0),
            shared_memory: read_u64(&device.join("mem_info_gtt_total")).unwrap_or(0),
            driver_version: driver.as_deref().and_then(|d| self.driver_version(d)),
        })
    }
}

impl Default for SystemPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformQuery for SystemPlatform {
    fn cpu(&self) -> Result<CpuInfo> {
        let system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let cpu = system.cpus().first().context("No CPUs reported")?;

        let name = cpu.brand().trim().to_string();
        if name.is_empty() {
            anyhow::bail!("CPU brand string is empty");
        }

        let vendor = match cpu.vendor_id() {
            "AuthenticAMD" => Vendor::Amd,
            "GenuineIntel" => Vendor::Intel,
            _ => Vendor::Other,
        };

        Ok(CpuInfo {
            name,
            vendor,
            memory: system.total_memory(),
        })
    }

    fn npu(&self) -> Result<Option<NpuInfo>> {
        let accel = self.sysfs_root.join("class/accel");
        let entries = std::fs::read_dir(&accel)
            .with_context(|| format!("Failed to read {:?}", accel))?;

        let mut names: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        names.sort();

        for (index, path) in names.iter().enumerate() {
            let device = path.join("device");
            let Some(driver) = link_name(&device.join("driver")) else {
                continue;
            };
            if !NPU_DRIVERS.contains(&driver.as_str()) {
                continue;
            }

            let name = read_trimmed(&device.join("product_name"))
                .unwrap_or_else(|| "AMD NPU".to_string());
            return Ok(Some(NpuInfo {
                name,
                device_id: index as u32,
                driver_version: self.driver_version(&driver),
            }));
        }

        Ok(None)
    }

    fn npu_legacy(&self) -> Result<Option<NpuInfo>> {
        for driver in NPU_DRIVERS {
            let dir = self.sysfs_root.join("bus/pci/drivers").join(driver);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };

            // Bound devices appear as PCI addresses, e.g. 0000:c5:00.1
            let mut addresses: Vec<String> = entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.matches(':').count() == 2)
                .collect();
            addresses.sort();

            if let Some(address) = addresses.first() {
                return Ok(Some(NpuInfo {
                    name: format!("AMD NPU ({})", address),
                    device_id: 0,
                    driver_version: self.driver_version(driver),
                }));
            }
        }

        Ok(None)
    }

    fn adapters(&self) -> Result<Vec<AdapterInfo>> {
        let drm = self.sysfs_root.join("class/drm");
        let entries =
            std::fs::read_dir(&drm).with_context(|| format!("Failed to read {:?}", drm))?;

        // card0, card1, ... but not connectors such as card0-DP-1
        let mut cards: Vec<(u32, PathBuf)> = entries
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let number = name.strip_prefix("card")?.parse::<u32>().ok()?;
                Some((number, e.path()))
            })
            .collect();
        cards.sort_by_key(|(number, _)| *number);

        let mut adapters = Vec::new();
        let mut card_paths = Vec::new();
        for (_, card) in cards {
            if let Some(adapter) = self.read_adapter(adapters.len() as u32, &card) {
                adapters.push(adapter);
                card_paths.push(card);
            }
        }

        fill_nvidia_memory(&mut adapters, &card_paths);

        *self.cards.lock().unwrap_or_else(PoisonError::into_inner) = card_paths;
        Ok(adapters)
    }

    fn system_usage(&self) -> Result<SystemUsage> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let pid = sysinfo::get_current_pid().map_err(|e| anyhow::anyhow!(e))?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        Ok(SystemUsage {
            cpu_utilization: system.global_cpu_usage(),
            memory_used: system.used_memory(),
            process_memory_used: system.process(pid).map(|p| p.memory()).unwrap_or(0),
        })
    }

    fn gpu_usage(&self, index: u32) -> Result<GpuUsage> {
        let card = self
            .cards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index as usize)
            .cloned()
            .with_context(|| format!("Unknown adapter index {}", index))?;
        let device = card.join("device");

        // Drivers without these counters report zero usage
        Ok(GpuUsage {
            utilization: read_u64(&device.join("gpu_busy_percent")).unwrap_or(0) as f32,
            memory_used: read_u64(&device.join("mem_info_vram_used")).unwrap_or(0),
        })
    }
}

/// Fill VRAM size for NVIDIA adapters from nvidia-smi
fn fill_nvidia_memory(adapters: &mut [AdapterInfo], cards: &[PathBuf]) {
    if !adapters
        .iter()
        .any(|a| Vendor::from_pci_id(a.vendor_id) == Vendor::Nvidia)
    {
        return;
    }

    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=pci.bus_id,memory.total,name",
            "--format=csv,noheader,nounits",
        ])
        .output();

    let stdout = match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(stderr = %stderr, "nvidia-smi failed, NVIDIA memory unknown");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to run nvidia-smi, NVIDIA memory unknown");
            return;
        }
    };

    let reported = parse_nvidia_smi(&stdout);
    for (adapter, card) in adapters.iter_mut().zip(cards) {
        let Some(bus_id) = card
            .join("device")
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            continue;
        };
        if let Some((memory, name)) = reported.get(&normalize_bus_id(&bus_id)) {
            adapter.dedicated_memory = *memory;
            adapter.name = name.clone();
        }
    }
}

/// Parse `bus_id, memory_mib, name` rows keyed by normalized bus id
fn parse_nvidia_smi(stdout: &str) -> HashMap<String, (u64, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let bus_id = fields.next()?;
            let memory_mib = fields.next()?.parse::<u64>().ok()?;
            let name = fields.next()?.to_string();
            Some((normalize_bus_id(bus_id), (memory_mib * 1024 * 1024, name)))
        })
        .collect()
}

/// nvidia-smi reports 8-digit PCI domains, sysfs uses 4
fn normalize_bus_id(bus_id: &str) -> String {
    let lower = bus_id.to_ascii_lowercase();
    let start = lower.len().saturating_sub("0000:00:00.0".len());
    lower[start..].to_string()
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_hex(path: &Path) -> Option<u32> {
    let raw = read_trimmed(path)?;
    u32::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

fn read_u64(path: &Path) -> Option<u64> {
    read_trimmed(path)?.parse().ok()
}

fn link_name(path: &Path) -> Option<String> {
    std::fs::read_link(path)
        .ok()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn fake_card(root: &Path, card: &str, driver: &str, files: &[(&str, &str)]) {
        let device = root.join("class/drm").join(card).join("device");
        std::fs::create_dir_all(&device).unwrap();
        let driver_dir = root.join("bus/pci/drivers").join(driver);
        std::fs::create_dir_all(&driver_dir).unwrap();
        symlink(&driver_dir, device.join("driver")).unwrap();
        for (name, content) in files {
            write(&device.join(name), content);
        }
    }

    #[test]
    fn test_placeholder_filter() {
        let hardware = AdapterInfo {
            sub_sys_id: 0x5316,
            revision: 0xc8,
            is_hardware: true,
            ..Default::default()
        };
        assert!(!hardware.is_placeholder());

        let zero_ids = AdapterInfo {
            is_hardware: true,
            ..Default::default()
        };
        assert!(zero_ids.is_placeholder());

        let software = AdapterInfo {
            sub_sys_id: 1,
            revision: 1,
            is_hardware: false,
            ..Default::default()
        };
        assert!(software.is_placeholder());
    }

    #[test]
    fn test_sysfs_adapters() {
        let root = tempfile::tempdir().unwrap();
        fake_card(
            root.path(),
            "card1",
            "amdgpu",
            &[
                ("vendor", "0x1002"),
                ("device", "0x744c"),
                ("subsystem_device", "0x5316"),
                ("revision", "0xc8"),
                ("mem_info_vram_total", "25753026560"),
                ("mem_info_gtt_total", "33554432000"),
                ("gpu_busy_percent", "37"),
                ("mem_info_vram_used", "1073741824"),
                ("product_name", "Radeon RX 7900 XTX"),
            ],
        );
        fake_card(root.path(), "card0", "simpledrm", &[("vendor", "0x1234")]);
        // Connector entries are not adapters
        std::fs::create_dir_all(root.path().join("class/drm/card1-DP-1")).unwrap();
        write(&root.path().join("module/amdgpu/version"), "6.8.0\n");

        let platform = SystemPlatform::with_sysfs_root(root.path());
        let adapters = platform.adapters().unwrap();
        assert_eq!(adapters.len(), 2);

        let software = &adapters[0];
        assert!(!software.is_hardware);
        assert!(software.is_placeholder());

        let radeon = &adapters[1];
        assert_eq!(radeon.index, 1);
        assert_eq!(radeon.name, "Radeon RX 7900 XTX");
        assert_eq!(radeon.vendor_id, 0x1002);
        assert_eq!(radeon.sub_sys_id, 0x5316);
        assert_eq!(radeon.dedicated_memory, 25753026560);
        assert_eq!(radeon.driver_version, Some("6.8.0".parse().unwrap()));
        assert!(!radeon.is_placeholder());

        let usage = platform.gpu_usage(1).unwrap();
        assert_eq!(usage.utilization, 37.0);
        assert_eq!(usage.memory_used, 1073741824);
        assert!(platform.gpu_usage(7).is_err());
    }

    #[test]
    fn test_npu_modern_and_legacy_paths() {
        let root = tempfile::tempdir().unwrap();
        let platform = SystemPlatform::with_sysfs_root(root.path());

        // Neither path present
        assert!(platform.npu().is_err());
        assert_eq!(platform.npu_legacy().unwrap(), None);

        // Legacy driver directory with a bound device
        std::fs::create_dir_all(root.path().join("bus/pci/drivers/amdxdna/0000:c5:00.1")).unwrap();
        std::fs::create_dir_all(root.path().join("bus/pci/drivers/amdxdna/module")).unwrap();
        write(&root.path().join("module/amdxdna/version"), "32.0.203.240");
        let legacy = platform.npu_legacy().unwrap().unwrap();
        assert_eq!(legacy.name, "AMD NPU (0000:c5:00.1)");
        assert_eq!(legacy.driver_version, Some("32.0.203.240".parse().unwrap()));

        // Accel class device
        let device = root.path().join("class/accel/accel0/device");
        std::fs::create_dir_all(&device).unwrap();
        symlink(
            root.path().join("bus/pci/drivers/amdxdna"),
            device.join("driver"),
        )
        .unwrap();
        let modern = platform.npu().unwrap().unwrap();
        assert_eq!(modern.name, "AMD NPU");
        assert_eq!(modern.device_id, 0);
    }

    #[test]
    fn test_parse_nvidia_smi() {
        let out = "00000000:01:00.0, 24564, NVIDIA GeForce RTX 4090\n\
                   00000000:02:00.0, 8192, NVIDIA GeForce RTX 3070\n\
                   garbage line\n";
        let parsed = parse_nvidia_smi(out);
        assert_eq!(parsed.len(), 2);
        let (memory, name) = &parsed["0000:01:00.0"];
        assert_eq!(*memory, 24564 * 1024 * 1024);
        assert_eq!(name, "NVIDIA GeForce RTX 4090");
    }

    #[test]
    fn test_normalize_bus_id() {
        assert_eq!(normalize_bus_id("00000000:0A:00.0"), "0000:0a:00.0");
        assert_eq!(normalize_bus_id("0000:0a:00.0"), "0000:0a:00.0");
        assert_eq!(normalize_bus_id("short"), "short");
    }

    #[test]
    fn test_system_usage_reports() {
        let platform = SystemPlatform::new();
        let usage = platform.system_usage().unwrap();
        assert!(usage.memory_used > 0);
        assert!(usage.process_memory_used > 0);
    }
}
