//! Recorded Machine Backend
//!
//! `FixtureMachine` implements both display services over a serializable
//! `MachineState`. It answers queries the way the native services would,
//! validates set-calls (unknown adapters or targets are rejected with
//! `InvalidParameter`), reports the extra targets of a cloned source under
//! synthetic ids, and can replay scripted faults. Machines are loaded
//! from and saved to JSON so the command line can work against recordings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::display::backend::{
    AdaptiveSync, AdapterId, AdvancedColorInfo, ColorData, DISPLAY_DEVICE_ATTACHED_TO_DESKTOP,
    DISPLAY_DEVICE_PRIMARY_DEVICE, DeviceMode, DisplayDevice, DpiScale, DriverProfile, DriverSetting,
    DriverSettingsSession, GridTopology, HdrMode, HdrState, MODE_IDX_INVALID, ModeData, ModeInfo, ModeInfoType, MosaicTopology,
    OsDisplayService, PathInfo, PathSourceInfo, PathTargetInfo, PhysicalGpu, Point, QueryScope, Rect, Scaling,
    SetFlags, TARGET_CLONE_PLACEHOLDER, TargetDeviceName, TopologyBrief, VendorService,
};
use crate::display::identifiers::{OS_BACKEND_TAG, VENDOR_BACKEND_TAG};
use crate::utils::error::{DisplayError, NativeStatus, Result};

/// First synthetic target id handed out for cloned targets
pub const CLONE_TARGET_BASE: u32 = 0x8000_0000;

/// A monitor wired to one target of an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureMonitor {
    pub adapter_id: AdapterId,
    pub target_id: u32,
    pub name: TargetDeviceName,
    /// `None` when the monitor has no advanced color support at all
    pub advanced_color: Option<AdvancedColorInfo>,
    pub connected: bool,
}

/// A display source (GDI device) of an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureSource {
    pub adapter_id: AdapterId,
    pub source_id: u32,
    pub device_name: String,
    pub device_string: String,
    pub dpi: Option<DpiScale>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureEdid {
    pub manufacturer: Option<String>,
    pub product_code: Option<u16>,
    pub serial: Option<u32>,
}

/// Vendor GPU side of a recorded machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureGpuState {
    pub gpus: Vec<PhysicalGpu>,
    pub edid: BTreeMap<u32, FixtureEdid>,
    pub topology: MosaicTopology,
    pub color: BTreeMap<u32, ColorData>,
    pub hdr: BTreeMap<u32, HdrState>,
    pub adaptive_sync: BTreeMap<u32, AdaptiveSync>,
    pub driver_profile: DriverProfile,
}

/// Scripted native failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultScript {
    /// Statuses returned by the next non-validating path/mode set calls
    pub set_paths: VecDeque<NativeStatus>,
    /// Upcoming path queries that fail with `InsufficientBuffer`
    pub buffer_races: u32,
    /// Statuses returned by the next grid set calls
    pub set_topology: VecDeque<NativeStatus>,
    pub color_failures: BTreeMap<u32, NativeStatus>,
    pub hdr_failures: BTreeMap<u32, NativeStatus>,
    /// Mosaic stays enabled when reverted through 1x1 grids
    pub topology_sticks: bool,
}

/// Complete recorded state of one machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineState {
    pub adapters: BTreeMap<AdapterId, String>,
    pub monitors: Vec<FixtureMonitor>,
    pub sources: Vec<FixtureSource>,
    /// Active paths
    pub paths: Vec<PathInfo>,
    pub modes: Vec<ModeInfo>,
    pub vendor: Option<FixtureGpuState>,
    pub faults: FaultScript,
    #[serde(skip)]
    pub calls: Vec<String>,
}

fn os_error(call: &'static str, status: NativeStatus) -> DisplayError {
    DisplayError::native(OS_BACKEND_TAG, call, status)
}

fn vendor_error(call: &'static str, status: NativeStatus) -> DisplayError {
    DisplayError::native(VENDOR_BACKEND_TAG, call, status)
}

impl MachineState {
    fn monitor(&self, adapter_id: AdapterId, target_id: u32) -> Option<&FixtureMonitor> {
        self.monitors
            .iter()
            .find(|monitor| monitor.adapter_id == adapter_id && monitor.target_id == target_id)
    }

    fn monitor_mut(&mut self, adapter_id: AdapterId, target_id: u32) -> Option<&mut FixtureMonitor> {
        self.monitors
            .iter_mut()
            .find(|monitor| monitor.adapter_id == adapter_id && monitor.target_id == target_id)
    }

    fn source(&self, adapter_id: AdapterId, source_id: u32) -> Option<&FixtureSource> {
        self.sources
            .iter()
            .find(|source| source.adapter_id == adapter_id && source.source_id == source_id)
    }

    fn source_mut(&mut self, adapter_id: AdapterId, source_id: u32) -> Option<&mut FixtureSource> {
        self.sources
            .iter_mut()
            .find(|source| source.adapter_id == adapter_id && source.source_id == source_id)
    }

    fn gpu(&self, call: &'static str) -> Result<&FixtureGpuState> {
        self.vendor
            .as_ref()
            .ok_or_else(|| vendor_error(call, NativeStatus::DeviceNotFound))
    }

    fn gpu_mut(&mut self, call: &'static str) -> Result<&mut FixtureGpuState> {
        self.vendor
            .as_mut()
            .ok_or_else(|| vendor_error(call, NativeStatus::DeviceNotFound))
    }

    /// Active paths and modes as the OS reports them.
    ///
    /// Paths to disconnected monitors are dropped. Every target after the first
    /// one fed by a source is reported under a synthetic id, flagged as a
    /// clone placeholder, and its target mode carries the same synthetic id.
    fn active_config(&self) -> (Vec<PathInfo>, Vec<ModeInfo>) {
        let mut modes = self.modes.clone();
        let mut fed_sources = HashSet::new();
        let mut placeholders = 0;
        let mut paths = Vec::new();

        let connected = self.paths.iter().filter(|path| {
            path.is_active()
                && self
                    .monitor(path.target.adapter_id, path.target.id)
                    .is_some_and(|monitor| monitor.connected)
        });
        for path in connected {
            let mut path = *path;
            path.target.status_flags &= !TARGET_CLONE_PLACEHOLDER;
            if !fed_sources.insert((path.source.adapter_id, path.source.id)) {
                placeholders += 1;
                let synthetic = CLONE_TARGET_BASE + placeholders;
                if let Some(mode) = modes.get_mut(path.target.mode_info_idx as usize)
                    && mode.info_type() == ModeInfoType::Target
                    && mode.adapter_id == path.target.adapter_id
                    && mode.id == path.target.id
                {
                    mode.id = synthetic;
                }
                path.target.id = synthetic;
                path.target.status_flags |= TARGET_CLONE_PLACEHOLDER;
            }
            paths.push(path);
        }
        (paths, modes)
    }

    fn active_paths(&self) -> Vec<PathInfo> {
        self.active_config().0
    }

    /// Active paths followed by every other source/monitor pairing on the same adapter
    fn all_paths(&self) -> Vec<PathInfo> {
        let mut paths = self.active_paths();
        for source in &self.sources {
            for monitor in self.monitors.iter().filter(|m| m.adapter_id == source.adapter_id) {
                let wired = paths.iter().any(|path| {
                    path.source.adapter_id == source.adapter_id
                        && path.source.id == source.source_id
                        && path.target.id == monitor.target_id
                });
                if wired {
                    continue;
                }
                paths.push(PathInfo {
                    source: PathSourceInfo {
                        adapter_id: source.adapter_id,
                        id: source.source_id,
                        mode_info_idx: MODE_IDX_INVALID,
                        status_flags: 0,
                    },
                    target: PathTargetInfo {
                        adapter_id: monitor.adapter_id,
                        id: monitor.target_id,
                        mode_info_idx: MODE_IDX_INVALID,
                        output_technology: monitor.name.output_technology,
                        rotation: Default::default(),
                        scaling: Scaling::Preferred,
                        refresh_rate: Default::default(),
                        scan_line_ordering: 0,
                        target_available: monitor.connected,
                        status_flags: 0,
                    },
                    flags: 0,
                });
            }
        }
        paths
    }

    fn paths_for(&self, scope: QueryScope) -> Vec<PathInfo> {
        match scope {
            QueryScope::ActivePaths => self.active_paths(),
            QueryScope::AllPaths => self.all_paths(),
        }
    }

    /// Rejects configurations the OS would refuse outright
    fn check_config(&self, paths: &[PathInfo], modes: &[ModeInfo]) -> std::result::Result<(), NativeStatus> {
        if paths.is_empty() {
            return Err(NativeStatus::InvalidParameter);
        }
        for path in paths {
            if !self.adapters.contains_key(&path.source.adapter_id) || !self.adapters.contains_key(&path.target.adapter_id)
            {
                return Err(NativeStatus::InvalidParameter);
            }
            if self.source(path.source.adapter_id, path.source.id).is_none() {
                return Err(NativeStatus::InvalidParameter);
            }
            if !self
                .monitor(path.target.adapter_id, path.target.id)
                .is_some_and(|monitor| monitor.connected)
            {
                return Err(NativeStatus::InvalidParameter);
            }
            for index in [path.source.mode_info_idx, path.target.mode_info_idx] {
                if index != MODE_IDX_INVALID && index as usize >= modes.len() {
                    return Err(NativeStatus::BadConfiguration);
                }
            }
        }
        if modes.iter().any(|mode| !self.adapters.contains_key(&mode.adapter_id)) {
            return Err(NativeStatus::InvalidParameter);
        }
        Ok(())
    }

    /// Legacy device view derived from the active paths
    fn display_devices(&self) -> Vec<DisplayDevice> {
        self.sources
            .iter()
            .map(|source| {
                let path = self.paths.iter().find(|path| {
                    path.is_active() && path.source.adapter_id == source.adapter_id && path.source.id == source.source_id
                });
                let source_mode = path
                    .and_then(|path| self.modes.get(path.source.mode_info_idx as usize))
                    .and_then(|mode| match mode.mode {
                        ModeData::Source(source_mode) => Some(source_mode),
                        _ => None,
                    });
                let frequency = path
                    .and_then(|path| self.modes.get(path.target.mode_info_idx as usize))
                    .and_then(|mode| match mode.mode {
                        ModeData::Target(signal) => Some(signal.v_sync_freq.numerator / signal.v_sync_freq.denominator.max(1)),
                        _ => None,
                    })
                    .unwrap_or_default();

                let mut state_flags = 0;
                if path.is_some() {
                    state_flags |= DISPLAY_DEVICE_ATTACHED_TO_DESKTOP;
                }
                if source_mode.is_some_and(|mode| mode.position == Point::default()) {
                    state_flags |= DISPLAY_DEVICE_PRIMARY_DEVICE;
                }

                DisplayDevice {
                    device_name: source.device_name.clone(),
                    device_string: source.device_string.clone(),
                    state_flags,
                    current_mode: source_mode.map(|mode| DeviceMode {
                        bits_per_pel: 32,
                        pels_width: mode.width,
                        pels_height: mode.height,
                        display_frequency: frequency,
                        position: mode.position,
                        orientation: 0,
                    }),
                }
            })
            .collect()
    }
}

/// Viewport rectangles of a grid, laid out row by row
pub fn grid_viewports(grid: &GridTopology) -> Vec<Rect> {
    let columns = grid.columns.max(1) as usize;
    let width = grid.display_settings.width as i32;
    let height = grid.display_settings.height as i32;
    (0..grid.displays.len())
        .map(|index| {
            let left = ((index % columns) as i32).saturating_mul(width);
            let top = ((index / columns) as i32).saturating_mul(height);
            Rect {
                left,
                top,
                right: left.saturating_add(width),
                bottom: top.saturating_add(height),
            }
        })
        .collect()
}

/// Individual-screens baseline
pub fn disabled_topology() -> MosaicTopology {
    MosaicTopology {
        brief: TopologyBrief {
            topology: 0,
            enabled: false,
            is_possible: true,
        },
        ..MosaicTopology::default()
    }
}

/// Topology the vendor service reports after `grids` have been set
pub fn topology_from_grids(grids: &[GridTopology]) -> MosaicTopology {
    let Some(mosaic) = grids.iter().find(|grid| !grid.is_single_display()) else {
        return disabled_topology();
    };
    let first_display = mosaic.displays.first().copied().unwrap_or_default();
    MosaicTopology {
        brief: TopologyBrief {
            topology: mosaic.rows.saturating_mul(10).saturating_add(mosaic.columns),
            enabled: true,
            is_possible: true,
        },
        display_settings: mosaic.display_settings,
        overlap_x: first_display.overlap_x,
        overlap_y: first_display.overlap_y,
        grids: grids.to_vec(),
        viewports: grids.iter().map(grid_viewports).collect(),
    }
}

/// Both display services backed by one recorded machine
#[derive(Debug, Clone, Default)]
pub struct FixtureMachine {
    state: Arc<Mutex<MachineState>>,
}

impl FixtureMachine {
    pub fn new(state: MachineState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let state: MachineState = serde_json::from_str(&contents)?;
        info!("Loaded recorded machine from {:?}", path);
        Ok(Self::new(state))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(&*self.lock()?)?;
        fs::write(path, contents)?;
        debug!("Saved recorded machine to {:?}", path);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MachineState>> {
        self.state
            .lock()
            .map_err(|e| DisplayError::SystemError(format!("Failed to lock machine state: {}", e)))
    }

    /// Runs `f` with exclusive access to the recorded state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MachineState) -> Result<R>) -> Result<R> {
        let mut state = self.lock()?;
        f(&mut state)
    }

    /// Mutating calls received so far, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|state| state.calls.clone()).unwrap_or_default()
    }

    /// Simulates a reboot: every adapter gets a new boot-scoped id, device paths stay.
    pub fn renumber_adapters(&self, offset: u64) -> Result<()> {
        self.with_state(|state| {
            let renumber = |id: AdapterId| AdapterId(id.0.wrapping_add(offset));
            state.adapters = std::mem::take(&mut state.adapters)
                .into_iter()
                .map(|(id, device_path)| (renumber(id), device_path))
                .collect();
            for monitor in &mut state.monitors {
                monitor.adapter_id = renumber(monitor.adapter_id);
            }
            for source in &mut state.sources {
                source.adapter_id = renumber(source.adapter_id);
            }
            for path in &mut state.paths {
                path.source.adapter_id = renumber(path.source.adapter_id);
                path.target.adapter_id = renumber(path.target.adapter_id);
            }
            for mode in &mut state.modes {
                mode.adapter_id = renumber(mode.adapter_id);
            }
            info!("Renumbered {} adapter(s)", state.adapters.len());
            Ok(())
        })
    }
}

impl OsDisplayService for FixtureMachine {
    fn get_buffer_sizes(&self, scope: QueryScope) -> Result<(u32, u32)> {
        let state = self.lock()?;
        Ok((state.paths_for(scope).len() as u32, state.modes.len() as u32))
    }

    fn query_paths_and_modes(
        &self,
        scope: QueryScope,
        path_capacity: u32,
        mode_capacity: u32,
    ) -> Result<(Vec<PathInfo>, Vec<ModeInfo>)> {
        let mut state = self.lock()?;
        if state.faults.buffer_races > 0 {
            state.faults.buffer_races -= 1;
            return Err(os_error("QueryDisplayConfig", NativeStatus::InsufficientBuffer));
        }

        let paths = state.paths_for(scope);
        let (_, modes) = state.active_config();
        if paths.len() > path_capacity as usize || modes.len() > mode_capacity as usize {
            return Err(os_error("QueryDisplayConfig", NativeStatus::InsufficientBuffer));
        }
        Ok((paths, modes))
    }

    fn set_paths_and_modes(&self, paths: &[PathInfo], modes: &[ModeInfo], flags: SetFlags) -> Result<()> {
        let mut state = self.lock()?;
        if let Err(status) = state.check_config(paths, modes) {
            return Err(os_error("SetDisplayConfig", status));
        }
        if flags.validate_only {
            return Ok(());
        }

        state.calls.push("set_paths_and_modes".to_string());
        if let Some(status) = state.faults.set_paths.pop_front() {
            return Err(os_error("SetDisplayConfig", status));
        }

        state.paths = paths.iter().filter(|path| path.is_active()).copied().collect();
        state.modes = modes.to_vec();
        Ok(())
    }

    fn get_source_dpi_scale(&self, adapter_id: AdapterId, source_id: u32) -> Result<DpiScale> {
        let state = self.lock()?;
        let source = state
            .source(adapter_id, source_id)
            .ok_or_else(|| os_error("DisplayConfigGetDeviceInfo", NativeStatus::InvalidParameter))?;
        source
            .dpi
            .ok_or_else(|| os_error("DisplayConfigGetDeviceInfo", NativeStatus::NotSupported))
    }

    fn set_source_dpi_scale(&self, adapter_id: AdapterId, source_id: u32, scale: i32) -> Result<()> {
        let mut state = self.lock()?;
        let source = state
            .source_mut(adapter_id, source_id)
            .ok_or_else(|| os_error("DisplayConfigSetDeviceInfo", NativeStatus::InvalidParameter))?;
        let dpi = source
            .dpi
            .as_mut()
            .ok_or_else(|| os_error("DisplayConfigSetDeviceInfo", NativeStatus::NotSupported))?;
        if scale < dpi.minimum || scale > dpi.maximum {
            return Err(os_error("DisplayConfigSetDeviceInfo", NativeStatus::InvalidParameter));
        }
        dpi.current = scale;
        state.calls.push(format!("set_source_dpi_scale({})", source_id));
        Ok(())
    }

    fn get_advanced_color(&self, adapter_id: AdapterId, target_id: u32) -> Result<AdvancedColorInfo> {
        let state = self.lock()?;
        let monitor = state
            .monitor(adapter_id, target_id)
            .ok_or_else(|| os_error("DisplayConfigGetDeviceInfo", NativeStatus::InvalidParameter))?;
        monitor
            .advanced_color
            .ok_or_else(|| os_error("DisplayConfigGetDeviceInfo", NativeStatus::NotSupported))
    }

    fn set_advanced_color(&self, adapter_id: AdapterId, target_id: u32, enable: bool) -> Result<()> {
        let mut state = self.lock()?;
        let monitor = state
            .monitor_mut(adapter_id, target_id)
            .ok_or_else(|| os_error("DisplayConfigSetDeviceInfo", NativeStatus::InvalidParameter))?;
        match monitor.advanced_color.as_mut() {
            Some(info) if info.supported => info.enabled = enable,
            _ => return Err(os_error("DisplayConfigSetDeviceInfo", NativeStatus::NotSupported)),
        }
        state.calls.push(format!("set_advanced_color({})", target_id));
        Ok(())
    }

    fn get_adapter_device_path(&self, adapter_id: AdapterId) -> Result<String> {
        let state = self.lock()?;
        state
            .adapters
            .get(&adapter_id)
            .cloned()
            .ok_or_else(|| os_error("DisplayConfigGetDeviceInfo", NativeStatus::InvalidParameter))
    }

    fn get_source_device_name(&self, adapter_id: AdapterId, source_id: u32) -> Result<String> {
        let state = self.lock()?;
        state
            .source(adapter_id, source_id)
            .map(|source| source.device_name.clone())
            .ok_or_else(|| os_error("DisplayConfigGetDeviceInfo", NativeStatus::InvalidParameter))
    }

    fn get_target_device_name(&self, adapter_id: AdapterId, target_id: u32) -> Result<TargetDeviceName> {
        let state = self.lock()?;
        state
            .monitor(adapter_id, target_id)
            .map(|monitor| monitor.name.clone())
            .ok_or_else(|| os_error("DisplayConfigGetDeviceInfo", NativeStatus::InvalidParameter))
    }

    fn enumerate_display_devices(&self) -> Result<Vec<DisplayDevice>> {
        Ok(self.lock()?.display_devices())
    }

    fn backend_name(&self) -> &'static str {
        OS_BACKEND_TAG
    }
}

impl VendorService for FixtureMachine {
    fn enumerate_gpus(&self) -> Result<Vec<PhysicalGpu>> {
        Ok(self.lock()?.gpu("EnumPhysicalGPUs")?.gpus.clone())
    }

    fn edid_manufacturer(&self, display_id: u32) -> Result<String> {
        let state = self.lock()?;
        let edid = state
            .gpu("GetEDID")?
            .edid
            .get(&display_id)
            .ok_or_else(|| vendor_error("GetEDID", NativeStatus::DeviceNotFound))?;
        edid.manufacturer
            .clone()
            .ok_or_else(|| vendor_error("GetEDID", NativeStatus::NotSupported))
    }

    fn edid_product_code(&self, display_id: u32) -> Result<u16> {
        let state = self.lock()?;
        let edid = state
            .gpu("GetEDID")?
            .edid
            .get(&display_id)
            .ok_or_else(|| vendor_error("GetEDID", NativeStatus::DeviceNotFound))?;
        edid.product_code
            .ok_or_else(|| vendor_error("GetEDID", NativeStatus::NotSupported))
    }

    fn edid_serial_number(&self, display_id: u32) -> Result<u32> {
        let state = self.lock()?;
        let edid = state
            .gpu("GetEDID")?
            .edid
            .get(&display_id)
            .ok_or_else(|| vendor_error("GetEDID", NativeStatus::DeviceNotFound))?;
        edid.serial
            .ok_or_else(|| vendor_error("GetEDID", NativeStatus::NotSupported))
    }

    fn get_topology(&self) -> Result<MosaicTopology> {
        Ok(self.lock()?.gpu("Mosaic_GetCurrentTopo")?.topology.clone())
    }

    fn set_display_grids(&self, grids: &[GridTopology]) -> Result<()> {
        let mut state = self.lock()?;
        state.gpu("Mosaic_SetDisplayGrids")?;
        state.calls.push("set_display_grids".to_string());
        if let Some(status) = state.faults.set_topology.pop_front() {
            return Err(vendor_error("Mosaic_SetDisplayGrids", status));
        }

        let sticks = state.faults.topology_sticks;
        let gpu = state.gpu_mut("Mosaic_SetDisplayGrids")?;
        let topology = topology_from_grids(grids);
        if topology.is_enabled() || !sticks {
            gpu.topology = topology;
        }
        Ok(())
    }

    fn disable_topology(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.calls.push("disable_topology".to_string());
        state.gpu_mut("Mosaic_EnableCurrentTopo")?.topology = disabled_topology();
        Ok(())
    }

    fn get_color(&self, display_id: u32) -> Result<ColorData> {
        let state = self.lock()?;
        if let Some(status) = state.faults.color_failures.get(&display_id) {
            return Err(vendor_error("Disp_ColorControl", *status));
        }
        state
            .gpu("Disp_ColorControl")?
            .color
            .get(&display_id)
            .copied()
            .ok_or_else(|| vendor_error("Disp_ColorControl", NativeStatus::NotSupported))
    }

    fn set_color(&self, display_id: u32, color: &ColorData) -> Result<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("set_color({})", display_id));
        if let Some(status) = state.faults.color_failures.get(&display_id).copied() {
            return Err(vendor_error("Disp_ColorControl", status));
        }
        let gpu = state.gpu_mut("Disp_ColorControl")?;
        match gpu.color.get_mut(&display_id) {
            Some(current) => *current = *color,
            None => return Err(vendor_error("Disp_ColorControl", NativeStatus::NotSupported)),
        }
        Ok(())
    }

    fn get_hdr(&self, display_id: u32) -> Result<HdrState> {
        let state = self.lock()?;
        state
            .gpu("Disp_HdrColorControl")?
            .hdr
            .get(&display_id)
            .copied()
            .ok_or_else(|| vendor_error("Disp_HdrColorControl", NativeStatus::NotSupported))
    }

    fn set_hdr_mode(&self, display_id: u32, mode: HdrMode) -> Result<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("set_hdr_mode({})", display_id));
        if let Some(status) = state.faults.hdr_failures.get(&display_id).copied() {
            return Err(vendor_error("Disp_HdrColorControl", status));
        }
        let gpu = state.gpu_mut("Disp_HdrColorControl")?;
        let hdr = gpu
            .hdr
            .get_mut(&display_id)
            .ok_or_else(|| vendor_error("Disp_HdrColorControl", NativeStatus::NotSupported))?;
        let capable = hdr.capabilities.hdr10_supported || hdr.capabilities.dolby_vision_supported;
        if mode != HdrMode::Off && !capable {
            return Err(vendor_error("Disp_HdrColorControl", NativeStatus::NotSupported));
        }
        hdr.mode = mode;
        Ok(())
    }

    fn get_adaptive_sync(&self, display_id: u32) -> Result<AdaptiveSync> {
        let state = self.lock()?;
        state
            .gpu("DISP_GetAdaptiveSyncData")?
            .adaptive_sync
            .get(&display_id)
            .copied()
            .ok_or_else(|| vendor_error("DISP_GetAdaptiveSyncData", NativeStatus::NotSupported))
    }

    fn open_driver_settings(&self) -> Result<Box<dyn DriverSettingsSession + '_>> {
        let state = self.lock()?;
        let staged = state
            .vendor
            .as_ref()
            .map(|gpu| gpu.driver_profile.clone())
            .ok_or_else(|| vendor_error("DRS_CreateSession", NativeStatus::NoActiveSession))?;
        Ok(Box::new(FixtureDriverSession {
            machine: self,
            staged,
        }))
    }

    fn backend_name(&self) -> &'static str {
        VENDOR_BACKEND_TAG
    }
}

/// Changes are staged locally and committed by `save`
struct FixtureDriverSession<'a> {
    machine: &'a FixtureMachine,
    staged: DriverProfile,
}

impl DriverSettingsSession for FixtureDriverSession<'_> {
    fn base_profile(&mut self) -> Result<DriverProfile> {
        Ok(self.staged.clone())
    }

    fn set_setting(&mut self, setting_id: u32, value: u32) -> Result<()> {
        match self.staged.settings.iter_mut().find(|s| s.setting_id == setting_id) {
            Some(setting) => setting.value = value,
            None => self.staged.settings.push(DriverSetting {
                setting_id,
                name: format!("Setting {:#010X}", setting_id),
                value,
            }),
        }
        Ok(())
    }

    fn restore_default(&mut self, setting_id: u32) -> Result<()> {
        // The base profile only lists settings that differ from the driver default
        self.staged.settings.retain(|s| s.setting_id != setting_id);
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let mut state = self.machine.lock()?;
        state.gpu_mut("DRS_SaveSettings")?.driver_profile = self.staged.clone();
        state.calls.push("save_driver_settings".to_string());
        Ok(())
    }
}
