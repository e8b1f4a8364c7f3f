//! Equality/Diff Engine
//!
//! Snapshot types derive `PartialEq` for plain structural equality. Deciding
//! whether a saved snapshot matches the live one goes through the policies
//! below instead, applied explicitly per section:
//!
//! - collections the services may reorder (paths, modes, advanced color and
//!   DPI records, driver settings) use [`unordered_eq`]
//! - per-grid viewport rectangles use [`nested_index_eq`]
//! - display names, display sources, the adapter dictionary, legacy GDI
//!   settings, identifiers, adaptive sync and driver setting names are never
//!   compared

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::display::backend::DriverProfile;
use crate::display::snapshot::{ConfigSnapshot, OsSnapshot, VendorSnapshot};

/// Order-insensitive multiset equality.
///
/// Equal iff both sides have the same length and every element of `a` can be
/// matched to a distinct equal element of `b`. O(n·m), never panics.
pub fn unordered_eq<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut used = vec![false; b.len()];
    a.iter().all(|item| {
        let found = b
            .iter()
            .enumerate()
            .position(|(index, other)| !used[index] && other == item);
        match found {
            Some(index) => {
                used[index] = true;
                true
            }
            None => false,
        }
    })
}

/// Index-wise equality of nested arrays: same outer length, and per outer
/// index the same inner length and element-wise equality.
pub fn nested_index_eq<T: PartialEq>(a: &[Vec<T>], b: &[Vec<T>]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(left, right)| left.len() == right.len() && left.iter().zip(right).all(|(l, r)| l == r))
}

/// Part of a snapshot that differs between two configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SnapshotSection {
    Topology,
    Viewports,
    PerDisplayColor,
    PerDisplayHdr,
    DriverSettings,
    Paths,
    Modes,
    AdvancedColor,
    DpiScaling,
    CloneState,
    VendorPresence,
}

impl fmt::Display for SnapshotSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnapshotSection::Topology => "mosaic topology",
            SnapshotSection::Viewports => "viewports",
            SnapshotSection::PerDisplayColor => "display color",
            SnapshotSection::PerDisplayHdr => "display HDR",
            SnapshotSection::DriverSettings => "driver settings",
            SnapshotSection::Paths => "paths",
            SnapshotSection::Modes => "modes",
            SnapshotSection::AdvancedColor => "advanced color",
            SnapshotSection::DpiScaling => "DPI scaling",
            SnapshotSection::CloneState => "clone state",
            SnapshotSection::VendorPresence => "vendor GPU presence",
        };
        write!(f, "{}", name)
    }
}

pub fn diff_vendor(a: &VendorSnapshot, b: &VendorSnapshot) -> Vec<SnapshotSection> {
    let mut sections = Vec::new();

    let (ta, tb) = (&a.topology, &b.topology);
    if ta.brief != tb.brief
        || ta.display_settings != tb.display_settings
        || ta.overlap_x != tb.overlap_x
        || ta.overlap_y != tb.overlap_y
        || ta.grids != tb.grids
    {
        sections.push(SnapshotSection::Topology);
    }
    if !nested_index_eq(&ta.viewports, &tb.viewports) {
        sections.push(SnapshotSection::Viewports);
    }

    let colors = |s: &VendorSnapshot| s.displays.iter().map(|(id, d)| (*id, d.color)).collect::<BTreeMap<_, _>>();
    if colors(a) != colors(b) {
        sections.push(SnapshotSection::PerDisplayColor);
    }
    let hdr = |s: &VendorSnapshot| s.displays.iter().map(|(id, d)| (*id, d.hdr)).collect::<BTreeMap<_, _>>();
    if hdr(a) != hdr(b) {
        sections.push(SnapshotSection::PerDisplayHdr);
    }

    // Setting names are informational, only id and value are compared
    let values = |profile: &DriverProfile| {
        profile
            .settings
            .iter()
            .map(|setting| (setting.setting_id, setting.value))
            .collect::<Vec<_>>()
    };
    let (da, db) = (&a.driver_settings, &b.driver_settings);
    if da.name != db.name || da.is_base_profile != db.is_base_profile || !unordered_eq(&values(da), &values(db)) {
        sections.push(SnapshotSection::DriverSettings);
    }

    sections
}

pub fn diff_os(a: &OsSnapshot, b: &OsSnapshot) -> Vec<SnapshotSection> {
    let mut sections = Vec::new();
    if !unordered_eq(&a.paths, &b.paths) {
        sections.push(SnapshotSection::Paths);
    }
    if !unordered_eq(&a.modes, &b.modes) {
        sections.push(SnapshotSection::Modes);
    }
    if !unordered_eq(&a.advanced_color, &b.advanced_color) {
        sections.push(SnapshotSection::AdvancedColor);
    }
    if !unordered_eq(&a.dpi_scaling, &b.dpi_scaling) {
        sections.push(SnapshotSection::DpiScaling);
    }
    if a.is_cloned != b.is_cloned {
        sections.push(SnapshotSection::CloneState);
    }
    sections
}

/// Sections in which two snapshots differ, empty when they are the same configuration.
pub fn diff_snapshots(a: &ConfigSnapshot, b: &ConfigSnapshot) -> Vec<SnapshotSection> {
    let mut sections = match (&a.vendor, &b.vendor) {
        (Some(va), Some(vb)) => diff_vendor(va, vb),
        (None, None) => Vec::new(),
        _ => vec![SnapshotSection::VendorPresence],
    };
    sections.extend(diff_os(&a.os, &b.os));
    sections
}

pub fn snapshots_equal(a: &ConfigSnapshot, b: &ConfigSnapshot) -> bool {
    diff_snapshots(a, b).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::backend::{AdaptiveSync, HdrMode, Rect};
    use crate::display::snapshot::PerDisplayState;
    use crate::display::test_support::{path, vendor_snapshot_with_identifiers};

    #[test]
    fn test_unordered_eq_laws() {
        let a = vec![path(1, 0, 1, 100), path(1, 1, 1, 101), path(1, 1, 1, 101)];
        let reordered = vec![a[2], a[0], a[1]];
        let b = vec![path(1, 1, 1, 101), path(1, 0, 1, 100), path(1, 0, 1, 100)];

        assert!(unordered_eq(&a, &a));
        assert!(unordered_eq(&a, &reordered));
        assert!(unordered_eq(&reordered, &a));
        // Same elements, different multiplicities
        assert!(!unordered_eq(&a, &b));
        assert!(!unordered_eq(&b, &a));
        assert_eq!(unordered_eq(&reordered, &b), unordered_eq(&a, &b));

        let shorter = &a[..2];
        assert!(!unordered_eq(shorter, &a));
        assert!(!unordered_eq(&a, shorter));
    }

    #[test]
    fn test_unordered_eq_element_removed() {
        let a = vec![1, 2, 3];
        let b = vec![3, 1, 2];
        assert!(unordered_eq(&a, &b));

        let mut missing = a.clone();
        missing[1] = 3;
        assert!(!unordered_eq(&missing, &b));
        assert!(unordered_eq::<u32>(&[], &[]));
    }

    #[test]
    fn test_nested_index_eq() {
        let rect = |left: i32| Rect {
            left,
            top: 0,
            right: left + 1920,
            bottom: 1080,
        };
        let a = vec![vec![rect(0), rect(1920)], vec![rect(0)]];

        assert!(nested_index_eq(&a, &a.clone()));
        assert!(!nested_index_eq(&a, &[vec![rect(1920), rect(0)], vec![rect(0)]]));
        assert!(!nested_index_eq(&a, &[vec![rect(0), rect(1920)]]));
        assert!(!nested_index_eq(&a, &[vec![rect(0)], vec![rect(0)]]));
    }

    #[test]
    fn test_excluded_fields_do_not_matter() {
        let mut a = ConfigSnapshot {
            vendor: Some(vendor_snapshot_with_identifiers(&["NVIDIA|a"])),
            ..ConfigSnapshot::default()
        };
        a.os.paths = vec![path(1, 0, 1, 100)];
        let mut b = a.clone();

        b.os.adapters.insert(crate::display::backend::AdapterId(1), "PCI#1".to_string());
        b.os.display_identifiers.push("WINAPI|x".to_string());
        b.os.display_sources.insert("\\\\.\\DISPLAY1".to_string(), Vec::new());
        let vendor = b.vendor.as_mut().unwrap();
        vendor.display_names.insert("GPU0 DisplayPort 0x1000".to_string(), 0x1000);
        vendor.display_identifiers.clear();

        assert!(snapshots_equal(&a, &b));
    }

    #[test]
    fn test_adaptive_sync_excluded_hdr_compared() {
        let mut a = vendor_snapshot_with_identifiers(&[]);
        a.displays.insert(0x1000, PerDisplayState::default());
        let mut b = a.clone();

        b.displays.get_mut(&0x1000).unwrap().adaptive_sync = Some(AdaptiveSync {
            disable_adaptive_sync: true,
            ..AdaptiveSync::default()
        });
        assert!(diff_vendor(&a, &b).is_empty());

        b.displays.get_mut(&0x1000).unwrap().hdr = Some(crate::display::backend::HdrState {
            mode: HdrMode::Uhda,
            ..Default::default()
        });
        assert_eq!(diff_vendor(&a, &b), vec![SnapshotSection::PerDisplayHdr]);
    }

    #[test]
    fn test_driver_setting_names_are_not_compared() {
        let setting = |name: &str, value: u32| crate::display::backend::DriverSetting {
            setting_id: 0x1057_eb71,
            name: name.to_string(),
            value,
        };
        let mut a = vendor_snapshot_with_identifiers(&[]);
        a.driver_settings.settings = vec![setting("Power management mode", 1)];
        let mut b = a.clone();

        b.driver_settings.settings = vec![setting("Setting 0x1057EB71", 1)];
        assert!(diff_vendor(&a, &b).is_empty());

        b.driver_settings.settings = vec![setting("Power management mode", 2)];
        assert_eq!(diff_vendor(&a, &b), vec![SnapshotSection::DriverSettings]);
    }

    #[test]
    fn test_reordered_paths_are_equal() {
        let mut a = ConfigSnapshot::default();
        a.os.paths = vec![path(1, 0, 1, 100), path(1, 1, 1, 101)];
        let mut b = a.clone();
        b.os.paths.reverse();
        assert!(snapshots_equal(&a, &b));

        b.os.paths[0].target.id = 102;
        assert_eq!(diff_snapshots(&a, &b), vec![SnapshotSection::Paths]);
    }

    #[test]
    fn test_vendor_presence_differs() {
        let a = ConfigSnapshot::default();
        let b = ConfigSnapshot {
            vendor: Some(VendorSnapshot::default()),
            ..ConfigSnapshot::default()
        };
        assert_eq!(diff_snapshots(&a, &b), vec![SnapshotSection::VendorPresence]);
    }
}
