//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

use amuse_orchestrator::download::ProgressTracker;
use amuse_orchestrator::hardware::profile::{matches_pattern, resolve_profile};
use amuse_orchestrator::hardware::{DetectedHardware, Device, DeviceKind, HardwareProfile, Vendor};
use amuse_orchestrator::DriverVersion;
use proptest::prelude::*;

const GIB: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Arbitrary Implementations
// =============================================================================

/// Wildcard profiles with distinct names
fn arb_profiles() -> impl Strategy<Value = Vec<HardwareProfile>> {
    prop::collection::vec(0u32..64, 1..8).prop_map(|tiers| {
        tiers
            .into_iter()
            .enumerate()
            .map(|(i, min)| HardwareProfile::new(format!("tier-{}", i), min))
            .collect()
    })
}

/// Machine with one non-AMD default GPU of `memory_gb` dedicated memory
fn machine(memory_gb: u64) -> DetectedHardware {
    let mut cpu = Device::new(DeviceKind::Cpu, "Intel Core i7-13700K", 0);
    cpu.vendor = Vendor::Intel;
    cpu.memory = 32 * GIB;

    let mut gpu = Device::new(DeviceKind::Gpu, "NVIDIA GeForce RTX 3080", 0);
    gpu.vendor = Vendor::Nvidia;
    gpu.memory = memory_gb * GIB;
    gpu.is_default = true;

    DetectedHardware {
        cpu,
        npu: None,
        gpus: vec![gpu],
    }
}

fn arb_version() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..5000, 1..5)
}

/// (bytes advanced, bytes rewound) per step
fn arb_transfer_steps() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((0u64..50_000, prop::option::weighted(0.1, 0u64..80_000)), 1..200)
        .prop_map(|steps| {
            steps
                .into_iter()
                .map(|(advance, rewind)| (advance, rewind.unwrap_or(0)))
                .collect()
        })
}

// =============================================================================
// Profile Resolution Properties
// =============================================================================

proptest! {
    /// A selected profile never requires more memory than the device has,
    /// unless nothing fits and the first profile is the fallback
    #[test]
    fn selected_profile_fits_memory(profiles in arb_profiles(), memory_gb in 0u64..80) {
        let hardware = machine(memory_gb);
        let selected = resolve_profile(&profiles, &hardware).unwrap();

        let any_fits = profiles.iter().any(|p| u64::from(p.min_memory) <= memory_gb);
        if any_fits {
            prop_assert!(u64::from(selected.min_memory) <= memory_gb);
        } else {
            prop_assert_eq!(&selected.name, &profiles[0].name);
        }
    }

    /// Among fitting wildcard profiles the highest requirement wins, and
    /// ties keep configuration order
    #[test]
    fn selected_profile_is_largest_fit(profiles in arb_profiles(), memory_gb in 0u64..80) {
        let hardware = machine(memory_gb);
        let selected = resolve_profile(&profiles, &hardware).unwrap();

        let best = profiles
            .iter()
            .filter(|p| u64::from(p.min_memory) <= memory_gb)
            .map(|p| p.min_memory)
            .max();
        if let Some(best) = best {
            let first_best = profiles.iter().find(|p| p.min_memory == best).unwrap();
            prop_assert_eq!(&selected.name, &first_best.name);
        }
    }

    /// Patterns without a wildcard behave as case-insensitive substrings
    #[test]
    fn plain_pattern_is_substring(prefix in "[a-z ]{0,8}", needle in "[a-z0-9]{1,8}", suffix in "[a-z ]{0,8}") {
        let name = format!("{}{}{}", prefix, needle.to_uppercase(), suffix);
        prop_assert!(matches_pattern(&needle, &name));
        let star_prefix = format!("*{}", needle);
        let star_both = format!("*{}*", needle);
        prop_assert!(matches_pattern(&star_both, &name));
        prop_assert_eq!(matches_pattern(&star_prefix, &name), name.to_lowercase().ends_with(&needle));
    }
}

// =============================================================================
// Driver Version Properties
// =============================================================================

proptest! {
    /// Ordering matches numeric comparison of zero-padded components
    #[test]
    fn version_order_is_componentwise(a in arb_version(), b in arb_version()) {
        let len = a.len().max(b.len());
        let pad = |v: &[u64]| {
            let mut v = v.to_vec();
            v.resize(len, 0);
            v
        };
        let expected = pad(&a).cmp(&pad(&b));

        let va = DriverVersion::new(a);
        let vb = DriverVersion::new(b);
        prop_assert_eq!(va.cmp(&vb), expected);
        prop_assert_eq!(vb.cmp(&va), expected.reverse());
    }

    /// Display and parse agree
    #[test]
    fn version_display_parses_back(a in arb_version()) {
        let version = DriverVersion::new(a.clone());
        let parsed: DriverVersion = version.to_string().parse().unwrap();
        prop_assert_eq!(parsed.components(), a.as_slice());
    }
}

// =============================================================================
// Progress Properties
// =============================================================================

proptest! {
    /// Reported totals never decrease, even across rewinds, and a transfer
    /// that reaches the total reports 100%
    #[test]
    fn progress_is_monotonic(total in 1u64..2_000_000, steps in arb_transfer_steps()) {
        let mut tracker = ProgressTracker::new(total);
        let mut last = 0.0f64;

        for (advance, rewind) in steps {
            tracker.rewind(rewind);
            tracker.advance(advance);
            if let Some(progress) = tracker.report("unet/model.onnx", 0, 0) {
                prop_assert!(progress.total_percent >= last);
                prop_assert!(progress.total_percent <= 100.0);
                prop_assert!(progress.bytes_downloaded <= total);
                last = progress.total_percent;
            }
        }

        tracker.advance(total);
        let final_report = tracker.report("unet/model.onnx", total, total);
        if last < 100.0 {
            let final_report = final_report.unwrap();
            prop_assert_eq!(final_report.total_percent, 100.0);
            prop_assert_eq!(final_report.file_percent, 100.0);
        }
    }
}
