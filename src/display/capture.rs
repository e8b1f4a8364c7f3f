//! Snapshot capture from the live services.
//!
//! Only the path/mode query is fatal. Every other read degrades to "feature
//! unavailable" and leaves its snapshot field at a safe default.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::display::backend::{
    AdapterId, DISPLAY_DEVICE_ATTACHED_TO_DESKTOP, DISPLAY_DEVICE_PRIMARY_DEVICE, ModeInfo, OsDisplayService,
    PathInfo, QueryScope, VendorService,
};
use crate::display::identifiers::{os_display_identifiers, vendor_display_identifiers};
use crate::display::snapshot::{
    AdvancedColorState, ConfigSnapshot, DisplaySource, GdiDisplaySettings, OsSnapshot, PerDisplayState, SourceDpi,
    VendorSnapshot,
};
use crate::utils::error::{DisplayError, NativeStatus, Result};

/// Queries paths and modes, retrying once with fresh sizes when the
/// configuration changed between the size query and the data query.
pub fn query_display_config(os: &dyn OsDisplayService, scope: QueryScope) -> Result<(Vec<PathInfo>, Vec<ModeInfo>)> {
    let mut retried = false;
    loop {
        let (path_count, mode_count) = os.get_buffer_sizes(scope)?;
        match os.query_paths_and_modes(scope, path_count, mode_count) {
            Err(e) if e.status() == Some(NativeStatus::InsufficientBuffer) => {
                if retried {
                    return Err(DisplayError::BufferRace(match scope {
                        QueryScope::ActivePaths => "active paths",
                        QueryScope::AllPaths => "all paths",
                    }));
                }
                warn!("Display configuration changed during query, retrying with fresh buffer sizes");
                retried = true;
            }
            other => return other,
        }
    }
}

/// Logs a failed per-feature read and turns it into `None`.
fn optional<T>(result: Result<T>, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_transient() => {
            debug!("{} unavailable: {}", what, e);
            None
        }
        Err(e) => {
            warn!("Failed to read {}: {}", what, e);
            None
        }
    }
}

/// Captures the OS side: active paths and modes plus everything keyed by them.
pub fn capture_os(os: &dyn OsDisplayService) -> Result<OsSnapshot> {
    let (paths, modes) = query_display_config(os, QueryScope::ActivePaths)?;
    debug!("Captured {} paths and {} modes", paths.len(), modes.len());

    let adapter_ids: BTreeSet<AdapterId> = paths
        .iter()
        .flat_map(|path| [path.source.adapter_id, path.target.adapter_id])
        .collect();
    let mut adapters = BTreeMap::new();
    for adapter_id in adapter_ids {
        if let Some(device_path) = optional(
            os.get_adapter_device_path(adapter_id),
            &format!("device path of adapter {}", adapter_id),
        ) {
            adapters.insert(adapter_id, device_path);
        }
    }

    let mut advanced_color = Vec::new();
    let mut display_sources: BTreeMap<String, Vec<DisplaySource>> = BTreeMap::new();
    for path in &paths {
        let target = &path.target;
        if let Some(info) = optional(
            os.get_advanced_color(target.adapter_id, target.id),
            &format!("advanced color of target {}", target.id),
        ) {
            advanced_color.push(AdvancedColorState {
                adapter_id: target.adapter_id,
                target_id: target.id,
                info,
            });
        }

        if let Some(name) = optional(
            os.get_source_device_name(path.source.adapter_id, path.source.id),
            &format!("device name of source {}", path.source.id),
        ) {
            display_sources.entry(name).or_default().push(DisplaySource {
                adapter_id: path.source.adapter_id,
                source_id: path.source.id,
                target_id: target.id,
            });
        }
    }

    let sources: BTreeSet<(AdapterId, u32)> = paths
        .iter()
        .map(|path| (path.source.adapter_id, path.source.id))
        .collect();
    let mut dpi_scaling = Vec::new();
    for (adapter_id, source_id) in sources {
        if let Some(scale) = optional(
            os.get_source_dpi_scale(adapter_id, source_id),
            &format!("DPI scale of source {}", source_id),
        ) {
            dpi_scaling.push(SourceDpi {
                adapter_id,
                source_id,
                scale,
            });
        }
    }

    let gdi_settings = optional(os.enumerate_display_devices(), "legacy display devices")
        .unwrap_or_default()
        .into_iter()
        .filter(|device| device.state_flags & DISPLAY_DEVICE_ATTACHED_TO_DESKTOP != 0)
        .filter_map(|device| {
            let mode = device.current_mode?;
            Some(GdiDisplaySettings {
                is_primary: device.state_flags & DISPLAY_DEVICE_PRIMARY_DEVICE != 0,
                device_name: device.device_name,
                device_string: device.device_string,
                mode,
            })
        })
        .collect();

    let display_identifiers = os_display_identifiers(os, false)?;
    let is_cloned = OsSnapshot::compute_is_cloned(&paths);

    Ok(OsSnapshot {
        adapters,
        paths,
        modes,
        advanced_color,
        dpi_scaling,
        display_sources,
        gdi_settings,
        display_identifiers,
        is_cloned,
    })
}

/// Captures the vendor side, or `None` when no vendor GPU is present.
pub fn capture_vendor(vendor: &dyn VendorService) -> Result<Option<VendorSnapshot>> {
    let gpus = match vendor.enumerate_gpus() {
        Ok(gpus) if !gpus.is_empty() => gpus,
        Ok(_) => {
            debug!("No {} GPUs found", vendor.backend_name());
            return Ok(None);
        }
        Err(e) if e.is_transient() => {
            debug!("{} service unavailable: {}", vendor.backend_name(), e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let topology = optional(vendor.get_topology(), "mosaic topology").unwrap_or_default();

    let mut displays = BTreeMap::new();
    let mut display_names = BTreeMap::new();
    for (gpu_index, gpu) in gpus.iter().enumerate() {
        for display in gpu.displays.iter().filter(|display| display.is_active) {
            let id = display.display_id;
            let state = PerDisplayState {
                color: optional(vendor.get_color(id), &format!("color of display {}", id)),
                hdr: optional(vendor.get_hdr(id), &format!("HDR state of display {}", id)),
                adaptive_sync: optional(vendor.get_adaptive_sync(id), &format!("adaptive sync of display {}", id)),
            };
            displays.insert(id, state);
            display_names.insert(format!("GPU{} {:?} {:#x}", gpu_index, display.connector, id), id);
        }
    }

    let driver_settings = match vendor.open_driver_settings() {
        Ok(mut session) => optional(session.base_profile(), "driver settings base profile").unwrap_or_default(),
        Err(e) => {
            debug!("Driver settings session unavailable: {}", e);
            Default::default()
        }
    };

    let display_identifiers = vendor_display_identifiers(vendor, false)?;

    Ok(Some(VendorSnapshot {
        topology,
        displays,
        driver_settings,
        display_names,
        display_identifiers,
    }))
}

/// Captures a complete snapshot from both services.
pub fn capture(os: &dyn OsDisplayService, vendor: Option<&dyn VendorService>) -> Result<ConfigSnapshot> {
    let vendor_snapshot = match vendor {
        Some(vendor) => capture_vendor(vendor)?,
        None => None,
    };
    let os_snapshot = capture_os(os)?;

    info!(
        paths = os_snapshot.paths.len(),
        cloned = os_snapshot.is_cloned,
        topology = vendor_snapshot.as_ref().is_some_and(|v| v.topology.is_enabled()),
        "Captured display configuration"
    );

    Ok(ConfigSnapshot {
        os: os_snapshot,
        vendor: vendor_snapshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::test_support::desk_machine;

    #[test]
    fn test_capture_desk_machine() {
        let machine = desk_machine();
        let snapshot = capture(&machine, Some(&machine)).unwrap();

        assert_eq!(snapshot.os.paths.len(), 2);
        assert_eq!(snapshot.os.adapters.len(), 1);
        assert_eq!(snapshot.os.advanced_color.len(), 2);
        assert_eq!(snapshot.os.dpi_scaling.len(), 2);
        assert_eq!(snapshot.os.display_sources.len(), 2);
        assert_eq!(snapshot.os.gdi_settings.len(), 2);
        assert!(!snapshot.os.is_cloned);

        let vendor = snapshot.vendor.unwrap();
        assert!(!vendor.topology.is_enabled());
        assert_eq!(vendor.displays.len(), 2);
        assert!(vendor.driver_settings.is_base_profile);
        assert_eq!(vendor.display_identifiers.len(), 2);
    }

    #[test]
    fn test_unsupported_features_default() {
        let machine = desk_machine();
        machine
            .with_state(|state| {
                for monitor in &mut state.monitors {
                    monitor.advanced_color = None;
                }
                state.vendor.as_mut().unwrap().hdr.clear();
                Ok(())
            })
            .unwrap();

        let snapshot = capture(&machine, Some(&machine)).unwrap();
        assert!(snapshot.os.advanced_color.is_empty());
        let vendor = snapshot.vendor.unwrap();
        assert!(vendor.displays.values().all(|state| state.hdr.is_none() && state.color.is_some()));
    }

    #[test]
    fn test_no_vendor_gpu() {
        let machine = desk_machine();
        machine
            .with_state(|state| {
                state.vendor = None;
                Ok(())
            })
            .unwrap();

        let snapshot = capture(&machine, Some(&machine)).unwrap();
        assert!(snapshot.vendor.is_none());
        assert_eq!(snapshot.os.paths.len(), 2);
    }
}
