//! Snapshot Model
//!
//! Normalized in-memory representation of one full display configuration:
//! one snapshot per service (`VendorSnapshot`, `OsSnapshot`) bundled into a
//! `ConfigSnapshot`. Snapshots are plain values; the engine replaces its
//! cached active snapshot as a whole after every capture.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::display::backend::{
    AdapterId, AdaptiveSync, AdvancedColorInfo, ColorData, DeviceMode, DpiScale, DriverProfile, HdrState,
    ModeInfo, MosaicTopology, PathInfo,
};

/// Per physical display state held by the vendor service.
///
/// `None` means the feature was unavailable when the snapshot was captured.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerDisplayState {
    pub color: Option<ColorData>,
    pub hdr: Option<HdrState>,
    /// Captured for reference only, never compared or re-applied
    pub adaptive_sync: Option<AdaptiveSync>,
}

/// Vendor GPU side of a configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VendorSnapshot {
    pub topology: MosaicTopology,
    /// Keyed by vendor display id
    pub displays: BTreeMap<u32, PerDisplayState>,
    pub driver_settings: DriverProfile,
    /// Informational, e.g. "GPU0 DisplayPort 0x1000" -> display id
    pub display_names: BTreeMap<String, u32>,
    pub display_identifiers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdvancedColorState {
    pub adapter_id: AdapterId,
    pub target_id: u32,
    pub info: AdvancedColorInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDpi {
    pub adapter_id: AdapterId,
    pub source_id: u32,
    pub scale: DpiScale,
}

/// One target fed by a named display source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplaySource {
    pub adapter_id: AdapterId,
    pub source_id: u32,
    pub target_id: u32,
}

/// Legacy GDI view of an attached device, kept for reference
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GdiDisplaySettings {
    pub device_name: String,
    pub device_string: String,
    pub is_primary: bool,
    pub mode: DeviceMode,
}

/// OS side of a configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OsSnapshot {
    /// Adapter entries: boot-scoped adapter id -> durable device path
    pub adapters: BTreeMap<AdapterId, String>,
    pub paths: Vec<PathInfo>,
    pub modes: Vec<ModeInfo>,
    pub advanced_color: Vec<AdvancedColorState>,
    pub dpi_scaling: Vec<SourceDpi>,
    /// Source device name (e.g. `\\.\DISPLAY1`) -> targets it feeds
    pub display_sources: BTreeMap<String, Vec<DisplaySource>>,
    pub gdi_settings: Vec<GdiDisplaySettings>,
    pub display_identifiers: Vec<String>,
    pub is_cloned: bool,
}

impl OsSnapshot {
    /// True when one source feeds more than one path target.
    pub fn compute_is_cloned(paths: &[PathInfo]) -> bool {
        let mut targets_per_source: HashMap<(AdapterId, u32), usize> = HashMap::new();
        for path in paths {
            *targets_per_source
                .entry((path.source.adapter_id, path.source.id))
                .or_default() += 1;
        }
        targets_per_source.values().any(|count| *count > 1)
    }

    pub fn target_ids(&self) -> Vec<u32> {
        self.paths.iter().map(|path| path.target.id).collect()
    }
}

/// Full configuration: OS paths/modes plus the vendor state when a vendor GPU is present
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub os: OsSnapshot,
    pub vendor: Option<VendorSnapshot>,
}

impl ConfigSnapshot {
    /// Identifiers of every display this configuration uses, sorted and unique.
    pub fn display_identifiers(&self) -> Vec<String> {
        let mut identifiers: BTreeSet<String> = self.os.display_identifiers.iter().cloned().collect();
        if let Some(vendor) = &self.vendor {
            identifiers.extend(vendor.display_identifiers.iter().cloned());
        }
        identifiers.into_iter().collect()
    }

    pub fn is_cloned(&self) -> bool {
        self.os.is_cloned
    }

    pub fn uses_topology(&self) -> bool {
        self.vendor.as_ref().is_some_and(|vendor| vendor.topology.is_enabled())
    }
}
