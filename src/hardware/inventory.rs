//! Hardware inventory
//!
//! Detects the CPU, an optional NPU and the hardware GPU adapters, records
//! which execution providers each device supports, selects the default
//! device and keeps live utilization current through a background poller.

use super::platform::{AdapterInfo, NpuInfo, PlatformQuery};
use super::probe::ProviderProbe;
use super::profile::{HardwareProfile, resolve_profile};
use super::{Device, DeviceKind, ExecutionProvider, LiveMetrics, Vendor};
use crate::config::SettingsStore;
use crate::session::SessionFactory;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const FALLBACK_CPU_NAME: &str = "Unknown CPU";

/// Devices found by [`HardwareInventory::detect`]
#[derive(Debug, Clone, Serialize)]
pub struct DetectedHardware {
    pub cpu: Device,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npu: Option<Device>,
    pub gpus: Vec<Device>,
}

impl DetectedHardware {
    fn cpu_only(cpu: Device) -> Self {
        Self {
            cpu,
            npu: None,
            gpus: Vec::new(),
        }
    }

    pub fn default_device(&self) -> Option<&Device> {
        self.gpus.iter().find(|gpu| gpu.is_default)
    }

    /// Device profiles are matched against: the default GPU, else the CPU
    pub fn base_device(&self) -> &Device {
        self.default_device().unwrap_or(&self.cpu)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        std::iter::once(&self.cpu)
            .chain(self.npu.iter())
            .chain(self.gpus.iter())
    }
}

/// NPU-dependent feature flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub super_resolution_supported: bool,
    pub stable_diffusion_supported: bool,
}

struct InventoryState {
    hardware: DetectedHardware,
    capabilities: Capabilities,
}

pub struct HardwareInventory {
    platform: Arc<dyn PlatformQuery>,
    probe: ProviderProbe,
    settings: Arc<SettingsStore>,
    state: RwLock<InventoryState>,
}

impl HardwareInventory {
    pub fn new(
        platform: Arc<dyn PlatformQuery>,
        sessions: Arc<dyn SessionFactory>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            platform,
            probe: ProviderProbe::new(sessions),
            settings,
            state: RwLock::new(InventoryState {
                hardware: DetectedHardware::cpu_only(fallback_cpu()),
                capabilities: Capabilities::default(),
            }),
        }
    }

    /// Enumerate devices, probe providers and select the default device
    ///
    /// Blocking: probing builds native sessions. Never fails; every
    /// platform fault degrades to fewer devices.
    pub fn detect(&self) -> DetectedHardware {
        let cpu = self.detect_cpu();
        let npu = self.detect_npu();
        let mut gpus = self.detect_gpus();
        self.select_default(&mut gpus);

        let hardware = DetectedHardware { cpu, npu, gpus };
        let capabilities = self.capabilities_for(hardware.npu.as_ref());

        tracing::info!(
            cpu = %hardware.cpu.name,
            npu = hardware.npu.as_ref().map(|n| n.name.as_str()).unwrap_or("none"),
            gpus = hardware.gpus.len(),
            default_device = hardware.default_device().map(|d| d.name.as_str()).unwrap_or("none"),
            super_resolution = capabilities.super_resolution_supported,
            stable_diffusion = capabilities.stable_diffusion_supported,
            "Hardware detected"
        );

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.hardware = hardware.clone();
        state.capabilities = capabilities;
        hardware
    }

    /// Latest detection result with current live metrics
    pub fn hardware(&self) -> DetectedHardware {
        self.read_state(|s| s.hardware.clone())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.read_state(|s| s.capabilities)
    }

    /// Profile for the detected hardware from the configured profiles
    pub fn hardware_profile(&self) -> Option<HardwareProfile> {
        let hardware = self.hardware();
        self.settings
            .read(|s| resolve_profile(&s.hardware_profiles, &hardware).cloned())
    }

    /// Refresh CPU, process and GPU utilization
    ///
    /// GPU counters a driver does not provide are skipped; only a failed
    /// system query is reported as an error.
    pub fn refresh_live_metrics(&self) -> anyhow::Result<()> {
        let system = self.platform.system_usage()?;

        let gpu_ids: Vec<u32> = self.read_state(|s| s.hardware.gpus.iter().map(|g| g.device_id).collect());
        let mut gpu_usage = Vec::with_capacity(gpu_ids.len());
        for device_id in gpu_ids {
            match self.platform.gpu_usage(device_id) {
                Ok(usage) => gpu_usage.push((device_id, usage)),
                Err(e) => tracing::debug!(device_id, error = %e, "GPU usage unavailable"),
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.hardware.cpu.metrics = LiveMetrics {
            utilization: system.cpu_utilization,
            memory_used: system.memory_used,
            process_memory_used: system.process_memory_used,
        };
        for (device_id, usage) in gpu_usage {
            if let Some(gpu) = state
                .hardware
                .gpus
                .iter_mut()
                .find(|g| g.device_id == device_id)
            {
                gpu.metrics.utilization = usage.utilization;
                gpu.metrics.memory_used = usage.memory_used;
            }
        }

        Ok(())
    }

    /// Poll live metrics until `shutdown` fires
    ///
    /// Failed refreshes are logged and the loop carries on.
    pub fn spawn_poller(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_millis(self.settings.read(|s| s.poll_interval_ms).max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(interval_ms = period.as_millis() as u64, "Live metrics poller started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let inventory = self.clone();
                match tokio::task::spawn_blocking(move || inventory.refresh_live_metrics()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "Live metrics refresh failed"),
                    Err(e) => tracing::warn!(error = %e, "Live metrics task failed"),
                }
            }

            tracing::debug!("Live metrics poller stopped");
        })
    }

    fn read_state<R>(&self, f: impl FnOnce(&InventoryState) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn detect_cpu(&self) -> Device {
        match self.platform.cpu() {
            Ok(info) => {
                let mut cpu = Device::new(DeviceKind::Cpu, info.name, 0);
                cpu.vendor = info.vendor;
                cpu.memory = info.memory;
                cpu.providers = vec![ExecutionProvider::Cpu];
                cpu
            }
            Err(e) => {
                tracing::warn!(error = %e, "CPU query failed, using fallback identity");
                fallback_cpu()
            }
        }
    }

    fn detect_npu(&self) -> Option<Device> {
        let info = match self.platform.npu() {
            Ok(Some(info)) => Some(info),
            Ok(None) => self.detect_npu_legacy(),
            Err(e) => {
                tracing::debug!(error = %e, "NPU query failed, trying legacy driver enumeration");
                self.detect_npu_legacy()
            }
        }?;

        Some(self.npu_device(info))
    }

    fn detect_npu_legacy(&self) -> Option<NpuInfo> {
        self.platform.npu_legacy().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Legacy NPU enumeration failed");
            None
        })
    }

    fn npu_device(&self, info: NpuInfo) -> Device {
        let mut npu = Device::new(DeviceKind::Npu, info.name, info.device_id);
        npu.vendor = Vendor::Amd;
        npu.driver_version = info.driver_version;
        npu.providers = self
            .probe
            .supported_providers(info.device_id, &[ExecutionProvider::RyzenAi]);
        npu
    }

    fn detect_gpus(&self) -> Vec<Device> {
        let adapters = match self.platform.adapters() {
            Ok(adapters) => adapters,
            Err(e) => {
                tracing::warn!(error = %e, "Adapter enumeration failed");
                return Vec::new();
            }
        };

        let candidates = self.settings.read(|s| s.probe_providers.clone());

        adapters
            .into_iter()
            .filter(|adapter| {
                let skip = adapter.is_placeholder();
                if skip {
                    tracing::debug!(adapter = %adapter.name, "Skipping placeholder adapter");
                }
                !skip
            })
            .map(|adapter| self.gpu_device(adapter, &candidates))
            .collect()
    }

    fn gpu_device(&self, adapter: AdapterInfo, candidates: &[ExecutionProvider]) -> Device {
        let mut gpu = Device::new(DeviceKind::Gpu, adapter.name, adapter.index);
        gpu.vendor = Vendor::from_pci_id(adapter.vendor_id);
        gpu.memory = adapter.dedicated_memory;
        gpu.shared_memory = adapter.shared_memory;
        gpu.driver_version = adapter.driver_version;
        gpu.providers = self.probe.supported_providers(adapter.index, candidates);
        gpu
    }

    fn select_default(&self, gpus: &mut [Device]) {
        let configured = self.settings.read(|s| s.default_device_id);

        if let Some(device_id) = configured {
            match gpus.iter_mut().find(|g| g.device_id == device_id) {
                Some(gpu) => gpu.is_default = true,
                None => tracing::warn!(device_id, "Configured default device not detected"),
            }
            return;
        }

        // Largest memory wins, first adapter on ties
        let mut largest: Option<usize> = None;
        for (index, gpu) in gpus.iter().enumerate() {
            if largest.is_none_or(|l| gpu.memory > gpus[l].memory) {
                largest = Some(index);
            }
        }
        let Some(index) = largest else {
            tracing::info!("No GPU detected, no default device selected");
            return;
        };

        let gpu = &mut gpus[index];
        gpu.is_default = true;
        let device_id = gpu.device_id;
        let provider = gpu.providers.first().copied();
        tracing::info!(device = %gpu.name, device_id, provider = ?provider, "Selected default device");

        if let Err(e) = self.settings.update(|s| {
            s.default_device_id = Some(device_id);
            if s.default_execution_provider.is_none() {
                s.default_execution_provider = provider;
            }
        }) {
            tracing::warn!(error = %e, "Failed to persist default device");
        }
    }

    fn capabilities_for(&self, npu: Option<&Device>) -> Capabilities {
        let Some(npu) = npu else {
            return Capabilities::default();
        };

        let minimum = self.settings.read(|s| s.npu.min_stable_diffusion_driver.clone());
        let stable_diffusion_supported = match (&minimum, &npu.driver_version) {
            (None, _) => true,
            (Some(minimum), Some(installed)) => installed >= minimum,
            (Some(_), None) => false,
        };

        Capabilities {
            super_resolution_supported: true,
            stable_diffusion_supported,
        }
    }
}

fn fallback_cpu() -> Device {
    let mut cpu = Device::new(DeviceKind::Cpu, FALLBACK_CPU_NAME, 0);
    cpu.providers = vec![ExecutionProvider::Cpu];
    cpu
}
