//! Display Identifier Builder
//!
//! Derives a stable textual identity for every physical display. An identifier
//! is seven ordered fields joined with `|`:
//!
//! `backend|adapter|connector|manufacturer|product|serial|display id`
//!
//! Each field is read independently and replaced by `*` when its read fails,
//! so one missing EDID field never drops a display from the list. The last
//! field is the per-display numeric id (the OS target id for `WINAPI`
//! identifiers), which the clone remapper reads back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

use crate::display::backend::{AdapterId, OsDisplayService, QueryScope, VendorService};
use crate::display::capture::query_display_config;
use crate::utils::error::Result;

pub const PLACEHOLDER: &str = "*";
pub const FIELD_SEPARATOR: char = '|';
pub const OS_BACKEND_TAG: &str = "WINAPI";
pub const VENDOR_BACKEND_TAG: &str = "NVIDIA";

/// Ordered identity fields of one physical display
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayIdentifier {
    pub backend: String,
    pub adapter: String,
    pub connector: String,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub display_id: u32,
}

impl fmt::Display for DisplayIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = FIELD_SEPARATOR;
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            clean(&self.backend),
            clean(&self.adapter),
            clean(&self.connector),
            clean(&self.manufacturer),
            clean(&self.product),
            clean(&self.serial),
            self.display_id
        )
    }
}

/// Keeps the separator out of field values so the suffix stays parseable.
fn clean(field: &str) -> String {
    if field.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        field.replace(FIELD_SEPARATOR, "/")
    }
}

/// Reads the trailing numeric display id of an identifier string.
pub fn display_id_from_identifier(identifier: &str) -> Option<u32> {
    identifier.rsplit(FIELD_SEPARATOR).next()?.parse().ok()
}

/// Field value or the placeholder when the read failed.
fn field_or_placeholder<T: ToString>(value: Result<T>, field: &str, display_id: u32) -> String {
    match value {
        Ok(value) => value.to_string(),
        Err(e) => {
            debug!("Could not read {} for display {}: {}", field, display_id, e);
            PLACEHOLDER.to_string()
        }
    }
}

/// Identifiers of displays driven by the OS service.
///
/// With `all_displays` every connected target is listed, otherwise only the
/// targets of active paths. Clone placeholder targets are never listed.
pub fn os_display_identifiers(os: &dyn OsDisplayService, all_displays: bool) -> Result<Vec<String>> {
    let scope = if all_displays {
        QueryScope::AllPaths
    } else {
        QueryScope::ActivePaths
    };
    let (paths, _) = query_display_config(os, scope)?;

    let mut identifiers = BTreeSet::new();
    for path in &paths {
        if all_displays && !path.target.target_available {
            continue;
        }
        // Synthetic clone target, the physical display is listed on its own path
        if path.target.is_clone_placeholder() {
            debug!("Skipping clone placeholder target {}", path.target.id);
            continue;
        }

        let target = &path.target;
        let adapter = field_or_placeholder(os.get_adapter_device_path(target.adapter_id), "adapter path", target.id);
        let name = os.get_target_device_name(target.adapter_id, target.id);
        let identifier = match name {
            Ok(name) => DisplayIdentifier {
                backend: OS_BACKEND_TAG.to_string(),
                adapter,
                connector: format!("{:?}", name.output_technology),
                manufacturer: name
                    .edid_manufacture_id
                    .map_or_else(|| PLACEHOLDER.to_string(), |id| id.to_string()),
                product: name
                    .edid_product_code
                    .map_or_else(|| PLACEHOLDER.to_string(), |code| code.to_string()),
                serial: name
                    .monitor_device_path
                    .unwrap_or_else(|| PLACEHOLDER.to_string()),
                display_id: target.id,
            },
            Err(e) => {
                debug!("Could not read device name for target {}: {}", target.id, e);
                DisplayIdentifier {
                    backend: OS_BACKEND_TAG.to_string(),
                    adapter,
                    connector: format!("{:?}", target.output_technology),
                    manufacturer: PLACEHOLDER.to_string(),
                    product: PLACEHOLDER.to_string(),
                    serial: PLACEHOLDER.to_string(),
                    display_id: target.id,
                }
            }
        };
        identifiers.insert(identifier.to_string());
    }

    Ok(identifiers.into_iter().collect())
}

/// Identifiers of displays driven by the vendor GPUs.
///
/// A machine without a vendor GPU yields an empty list.
pub fn vendor_display_identifiers(vendor: &dyn VendorService, all_displays: bool) -> Result<Vec<String>> {
    let gpus = match vendor.enumerate_gpus() {
        Ok(gpus) => gpus,
        Err(e) if e.is_transient() => {
            debug!("{} GPUs unavailable: {}", vendor.backend_name(), e);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut identifiers = BTreeSet::new();
    for gpu in &gpus {
        for display in &gpu.displays {
            let wanted = if all_displays {
                display.is_connected
            } else {
                display.is_active
            };
            if !wanted {
                continue;
            }

            let id = display.display_id;
            let identifier = DisplayIdentifier {
                backend: VENDOR_BACKEND_TAG.to_string(),
                adapter: format!("{}@{}", gpu.name, gpu.bus_id),
                connector: format!("{:?}", display.connector),
                manufacturer: field_or_placeholder(vendor.edid_manufacturer(id), "EDID manufacturer", id),
                product: field_or_placeholder(vendor.edid_product_code(id), "EDID product code", id),
                serial: field_or_placeholder(vendor.edid_serial_number(id), "EDID serial number", id),
                display_id: id,
            };
            identifiers.insert(identifier.to_string());
        }
    }

    Ok(identifiers.into_iter().collect())
}

/// Identifiers from both services, deduplicated and sorted.
pub fn build_identifiers(
    os: &dyn OsDisplayService,
    vendor: Option<&dyn VendorService>,
    all_displays: bool,
) -> Result<Vec<String>> {
    let mut identifiers: BTreeSet<String> = os_display_identifiers(os, all_displays)?.into_iter().collect();
    if let Some(vendor) = vendor {
        identifiers.extend(vendor_display_identifiers(vendor, all_displays)?);
    }
    Ok(identifiers.into_iter().collect())
}

/// Live adapter table: every adapter seen on any path, with its device path.
pub fn enumerate_adapters(os: &dyn OsDisplayService) -> Result<BTreeMap<AdapterId, String>> {
    let (paths, _) = query_display_config(os, QueryScope::AllPaths)?;

    let adapter_ids: BTreeSet<AdapterId> = paths
        .iter()
        .flat_map(|path| [path.source.adapter_id, path.target.adapter_id])
        .collect();

    let mut adapters = BTreeMap::new();
    for adapter_id in adapter_ids {
        match os.get_adapter_device_path(adapter_id) {
            Ok(device_path) => {
                adapters.insert(adapter_id, device_path);
            }
            Err(e) => warn!("Skipping adapter {} without device path: {}", adapter_id, e),
        }
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::test_support::{LEFT_TARGET, RIGHT_TARGET, desk_machine};
    use crate::utils::error::NativeStatus;

    #[test]
    fn test_identifier_format_and_suffix() {
        let identifier = DisplayIdentifier {
            backend: "WINAPI".to_string(),
            adapter: "PCI#VEN_10DE|x".to_string(),
            connector: "Hdmi".to_string(),
            manufacturer: "4268".to_string(),
            product: String::new(),
            serial: "*".to_string(),
            display_id: 4357,
        };

        let text = identifier.to_string();
        assert_eq!(text, "WINAPI|PCI#VEN_10DE/x|Hdmi|4268|*|*|4357");
        assert_eq!(display_id_from_identifier(&text), Some(4357));
        assert_eq!(display_id_from_identifier("NVIDIA|gpu|*"), None);
    }

    #[test]
    fn test_build_identifiers_is_stable() {
        let machine = desk_machine();
        let first = build_identifiers(&machine, Some(&machine), true).unwrap();
        let second = build_identifiers(&machine, Some(&machine), true).unwrap();

        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, sorted);
    }

    #[test]
    fn test_all_displays_deduplicates_targets() {
        let machine = desk_machine();
        // Every monitor appears once per source in the all-paths query
        let all = os_display_identifiers(&machine, true).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|identifier| identifier.starts_with("WINAPI|")));
    }

    #[test]
    fn test_clone_placeholder_targets_are_not_listed() {
        let machine = desk_machine();
        machine
            .with_state(|state| {
                state.paths[1].source = state.paths[0].source;
                Ok(())
            })
            .unwrap();

        let current = os_display_identifiers(&machine, false).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(display_id_from_identifier(&current[0]), Some(LEFT_TARGET));

        // The cloned monitor is still connected
        let all = os_display_identifiers(&machine, true).unwrap();
        let ids: Vec<Option<u32>> = all.iter().map(|identifier| display_id_from_identifier(identifier)).collect();
        assert_eq!(ids, vec![Some(LEFT_TARGET), Some(RIGHT_TARGET)]);
    }

    #[test]
    fn test_missing_edid_field_uses_placeholder() {
        let machine = desk_machine();
        machine
            .with_state(|state| {
                let gpu = state.vendor.as_mut().unwrap();
                gpu.edid.get_mut(&0x1000).unwrap().serial = None;
                Ok(())
            })
            .unwrap();

        let identifiers = vendor_display_identifiers(&machine, true).unwrap();
        assert_eq!(identifiers.len(), 2);
        assert!(identifiers.iter().any(|identifier| identifier.ends_with("|*|4096")));
    }

    #[test]
    fn test_vendor_absent_yields_no_identifiers() {
        let machine = desk_machine();
        machine
            .with_state(|state| {
                state.vendor = None;
                Ok(())
            })
            .unwrap();

        assert!(vendor_display_identifiers(&machine, true).unwrap().is_empty());
        assert_eq!(build_identifiers(&machine, Some(&machine), true).unwrap().len(), 2);
    }

    #[test]
    fn test_enumerate_adapters_maps_device_paths() {
        let machine = desk_machine();
        let adapters = enumerate_adapters(&machine).unwrap();
        assert_eq!(adapters.len(), 1);
        assert!(adapters.values().all(|path| path.starts_with("\\\\?\\PCI#VEN_10DE")));
    }

    #[test]
    fn test_buffer_race_during_identifier_query_is_retried() {
        let machine = desk_machine();
        machine
            .with_state(|state| {
                state.faults.buffer_races = 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(os_display_identifiers(&machine, false).unwrap().len(), 2);

        machine
            .with_state(|state| {
                state.faults.buffer_races = 2;
                Ok(())
            })
            .unwrap();
        let error = os_display_identifiers(&machine, false).unwrap_err();
        assert!(matches!(error, crate::utils::error::DisplayError::BufferRace(_)));
        assert_ne!(error.status(), Some(NativeStatus::InsufficientBuffer));
    }
}
