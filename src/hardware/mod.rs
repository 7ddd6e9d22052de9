//! Hardware inventory
//!
//! Provides functionality for:
//! - Enumerating CPU, NPU and GPU devices through a platform query seam
//! - Probing which execution providers each device supports
//! - Selecting and persisting the default device
//! - Polling live utilization in the background
//! - Resolving the hardware profile for the detected machine

pub mod device;
pub mod inventory;
pub mod platform;
pub mod probe;
pub mod profile;

pub use device::{Device, DeviceKind, ExecutionProvider, LiveMetrics, Vendor};
pub use inventory::{Capabilities, DetectedHardware, HardwareInventory};
pub use platform::{PlatformQuery, SystemPlatform};
pub use probe::ProviderProbe;
pub use profile::{HardwareProfile, Recommendations, resolve_profile};
