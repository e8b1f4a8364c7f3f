//! Apply Orchestrator
//!
//! Pushes a saved snapshot back to the services in fixed stages:
//!
//! `Reconcile -> DecideTopology -> ApplyTopology -> ApplyPathsAndModes ->
//! ApplyPerDisplayState -> Refresh -> Done`
//!
//! Paths and modes are applied through an ordered list of [`ApplyStrategy`]
//! values of decreasing strictness. Per-display failures are collected in the
//! report and never abort the run. Nothing is rolled back.

use serde::Serialize;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ApplySettings;
use crate::display::backend::{
    AdapterId, DriverProfile, GridDisplay, GridTopology, ModeInfo, MosaicTopology, OsDisplayService, PathInfo,
    QueryScope, SetFlags, VendorService,
};
use crate::display::capture::query_display_config;
use crate::display::clone_remap::{CloneRemap, physical_target_ids, remap_cloned_targets};
use crate::display::compare::unordered_eq;
use crate::display::reconcile::{PatchReport, patch_identities};
use crate::display::snapshot::{ConfigSnapshot, OsSnapshot, VendorSnapshot};
use crate::utils::error::{DisplayError, NativeStatus, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyStage {
    Reconcile,
    DecideTopology,
    ApplyTopology,
    ApplyPathsAndModes,
    ApplyPerDisplayState,
    Refresh,
    Done,
}

// ============================================================================
// Topology decision
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyAction {
    Skip,
    ApplyGrids(Vec<GridTopology>),
    /// 1x1 grid per display of the current mosaic
    RevertToIndividual(Vec<GridTopology>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TopologyOutcome {
    #[default]
    Skipped,
    Applied,
    RevertedToIndividual,
    /// The 1x1 grids did not take, the mosaic was switched off directly
    ForcedDisable,
}

/// One 1x1 grid per display of `current`, the canonical "not combined" layout.
pub fn individual_screens(current: &MosaicTopology) -> Vec<GridTopology> {
    current
        .grids
        .iter()
        .flat_map(|grid| {
            grid.displays.iter().map(|display| GridTopology {
                rows: 1,
                columns: 1,
                displays: vec![GridDisplay {
                    display_id: display.display_id,
                    rotation: display.rotation,
                    ..GridDisplay::default()
                }],
                display_settings: grid.display_settings,
                ..GridTopology::default()
            })
        })
        .collect()
}

/// Decides what to do with the mosaic topology.
///
/// `None` on either side means no vendor GPU is involved, which leaves the
/// topology alone.
pub fn decide_topology_action(target: Option<&MosaicTopology>, current: Option<&MosaicTopology>) -> TopologyAction {
    let (Some(target), Some(current)) = (target, current) else {
        return TopologyAction::Skip;
    };

    match (target.is_enabled(), current.is_enabled()) {
        (false, false) => TopologyAction::Skip,
        (true, true) if target.grids == current.grids => TopologyAction::Skip,
        (true, _) => TopologyAction::ApplyGrids(target.grids.clone()),
        (false, true) => TopologyAction::RevertToIndividual(individual_screens(current)),
    }
}

// ============================================================================
// Paths and modes strategies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Try the next, more permissive strategy
    Retry,
    /// No strategy can succeed, stop here
    Fatal,
}

/// Denied access and unsupported requests fail the same way under any flags.
pub fn classify_set_failure(status: NativeStatus) -> FailureClass {
    match status {
        NativeStatus::AccessDenied | NativeStatus::NotSupported => FailureClass::Fatal,
        _ => FailureClass::Retry,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ApplyStrategy {
    pub name: &'static str,
    pub flags: SetFlags,
    pub classify: fn(NativeStatus) -> FailureClass,
}

pub fn default_strategies() -> Vec<ApplyStrategy> {
    vec![
        ApplyStrategy {
            name: "strict with mode enumeration",
            flags: SetFlags::apply().with_force_mode_enumeration(),
            classify: classify_set_failure,
        },
        ApplyStrategy {
            name: "strict",
            flags: SetFlags::apply(),
            classify: classify_set_failure,
        },
        ApplyStrategy {
            name: "allow changes",
            flags: SetFlags::apply().with_allow_changes(),
            classify: classify_set_failure,
        },
    ]
}

/// Tries each strategy in order and returns the name of the one that succeeded.
pub fn apply_paths_and_modes(
    os: &dyn OsDisplayService,
    paths: &[PathInfo],
    modes: &[ModeInfo],
    strategies: &[ApplyStrategy],
) -> Result<&'static str> {
    if strategies.is_empty() {
        return Err(DisplayError::InvalidArguments("no apply strategies configured".to_string()));
    }

    let mut attempts = 0;
    let mut last = NativeStatus::GenFailure;
    for strategy in strategies {
        attempts += 1;
        match os.set_paths_and_modes(paths, modes, strategy.flags) {
            Ok(()) => {
                info!("Applied paths and modes using the {} strategy", strategy.name);
                return Ok(strategy.name);
            }
            Err(e) => {
                let Some(status) = e.status() else {
                    return Err(e);
                };
                last = status;
                match (strategy.classify)(status) {
                    FailureClass::Retry => warn!("Strategy {} failed: {}", strategy.name, e),
                    FailureClass::Fatal => {
                        warn!("Strategy {} failed fatally: {}", strategy.name, e);
                        break;
                    }
                }
            }
        }
    }

    Err(DisplayError::ApplyFailed { attempts, last })
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Patches adapter ids and, for cloned configurations, placeholder targets.
pub fn reconcile(
    snapshot: &mut ConfigSnapshot,
    live_adapters: &BTreeMap<AdapterId, String>,
    live_identifiers: &[String],
) -> (PatchReport, Option<CloneRemap>) {
    let identity = patch_identities(&mut snapshot.os, live_adapters);
    let clone_remap = snapshot
        .os
        .is_cloned
        .then(|| remap_cloned_targets(&mut snapshot.os, &physical_target_ids(live_identifiers)));
    (identity, clone_remap)
}

// ============================================================================
// Apply run
// ============================================================================

/// A per-display setting that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayFailure {
    pub display: String,
    pub setting: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub stages: Vec<ApplyStage>,
    pub identity: PatchReport,
    pub clone_remap: Option<CloneRemap>,
    pub topology: TopologyOutcome,
    /// `None` when the live paths and modes already matched
    pub paths_strategy: Option<&'static str>,
    pub display_failures: Vec<DisplayFailure>,
    /// Whether any service state was changed
    pub mutated: bool,
}

/// One apply of a snapshot. The report stays readable after a failed run.
pub struct ApplyRun<'a> {
    os: &'a dyn OsDisplayService,
    vendor: Option<&'a dyn VendorService>,
    settings: &'a ApplySettings,
    strategies: &'a [ApplyStrategy],
    pub report: ApplyReport,
}

fn settle(duration: Duration) {
    if !duration.is_zero() {
        debug!("Waiting {:?} for the displays to settle", duration);
        thread::sleep(duration);
    }
}

impl<'a> ApplyRun<'a> {
    pub fn new(
        os: &'a dyn OsDisplayService,
        vendor: Option<&'a dyn VendorService>,
        settings: &'a ApplySettings,
        strategies: &'a [ApplyStrategy],
    ) -> Self {
        Self {
            os,
            vendor,
            settings,
            strategies,
            report: ApplyReport::default(),
        }
    }

    pub fn enter(&mut self, stage: ApplyStage) {
        debug!(?stage, "Entering apply stage");
        self.report.stages.push(stage);
    }

    /// Runs every stage up to and including the per-display state.
    pub fn execute(
        &mut self,
        target: &ConfigSnapshot,
        live_adapters: &BTreeMap<AdapterId, String>,
        live_identifiers: &[String],
    ) -> Result<()> {
        self.enter(ApplyStage::Reconcile);
        let mut snapshot = target.clone();
        let (identity, clone_remap) = reconcile(&mut snapshot, live_adapters, live_identifiers);
        self.report.identity = identity;
        if let Some(remap) = &clone_remap {
            if !remap.is_complete() {
                warn!("Cloned targets {:?} stay unmapped, applying may fail", remap.unmapped);
            }
        }
        self.report.clone_remap = clone_remap;

        self.enter(ApplyStage::DecideTopology);
        let vendor_target = snapshot.vendor.as_ref();
        let current = match (self.vendor, vendor_target) {
            (Some(vendor), Some(_)) => match vendor.get_topology() {
                Ok(topology) => Some(topology),
                Err(e) if e.is_transient() => {
                    debug!("Mosaic unavailable, leaving topology alone: {}", e);
                    None
                }
                Err(e) => return Err(e),
            },
            _ => None,
        };
        let action = decide_topology_action(vendor_target.map(|v| &v.topology), current.as_ref());
        info!("Topology action: {:?}", action);

        if action != TopologyAction::Skip {
            self.enter(ApplyStage::ApplyTopology);
            self.apply_topology(action)?;
        }

        self.enter(ApplyStage::ApplyPathsAndModes);
        self.apply_os_paths(&snapshot.os)?;

        self.enter(ApplyStage::ApplyPerDisplayState);
        if let (Some(vendor), Some(vendor_target)) = (self.vendor, &snapshot.vendor) {
            self.apply_vendor_state(vendor, vendor_target);
        }
        self.apply_os_state(&snapshot.os);

        if !self.report.display_failures.is_empty() {
            warn!(
                "{} per-display setting(s) could not be applied",
                self.report.display_failures.len()
            );
        }
        Ok(())
    }

    fn apply_topology(&mut self, action: TopologyAction) -> Result<()> {
        let Some(vendor) = self.vendor else {
            return Ok(());
        };

        match action {
            TopologyAction::Skip => {}
            TopologyAction::ApplyGrids(grids) => {
                vendor
                    .set_display_grids(&grids)
                    .map_err(|e| DisplayError::TopologyFailed(e.to_string()))?;
                self.report.mutated = true;
                settle(self.settings.topology_settle());
                self.report.topology = TopologyOutcome::Applied;
            }
            TopologyAction::RevertToIndividual(grids) => {
                let reverted = match vendor.set_display_grids(&grids) {
                    Ok(()) => {
                        self.report.mutated = true;
                        settle(self.settings.topology_settle());
                        // Success of the grid call does not guarantee the mosaic is gone
                        match vendor.get_topology() {
                            Ok(topology) => !topology.is_enabled(),
                            Err(e) => {
                                warn!("Could not confirm topology revert: {}", e);
                                false
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Reverting to individual screens failed: {}", e);
                        false
                    }
                };

                if reverted {
                    self.report.topology = TopologyOutcome::RevertedToIndividual;
                } else {
                    info!("Forcing the mosaic topology off");
                    vendor
                        .disable_topology()
                        .map_err(|e| DisplayError::TopologyFailed(e.to_string()))?;
                    self.report.mutated = true;
                    settle(self.settings.topology_settle());
                    self.report.topology = TopologyOutcome::ForcedDisable;
                }
            }
        }
        Ok(())
    }

    fn apply_os_paths(&mut self, target: &OsSnapshot) -> Result<()> {
        let (live_paths, live_modes) = query_display_config(self.os, QueryScope::ActivePaths)?;
        if unordered_eq(&live_paths, &target.paths) && unordered_eq(&live_modes, &target.modes) {
            info!("Paths and modes already match, skipping");
            return Ok(());
        }

        let strategy = apply_paths_and_modes(self.os, &target.paths, &target.modes, self.strategies)?;
        self.report.paths_strategy = Some(strategy);
        self.report.mutated = true;
        settle(self.settings.paths_settle());
        Ok(())
    }

    fn fail(&mut self, target: String, setting: &'static str, error: DisplayError) {
        warn!("Failed to apply {} on display {}: {}", setting, target, error);
        self.report.display_failures.push(DisplayFailure {
            display: target,
            setting,
            error: error.to_string(),
        });
    }

    fn apply_vendor_state(&mut self, vendor: &dyn VendorService, target: &VendorSnapshot) {
        if target.driver_settings.is_base_profile {
            match apply_driver_settings(vendor, &target.driver_settings) {
                Ok(true) => self.report.mutated = true,
                Ok(false) => debug!("Driver settings already match"),
                Err(e) => self.fail(target.driver_settings.name.clone(), "driver settings", e),
            }
        }

        for (display_id, state) in &target.displays {
            let label = format!("{:#x}", display_id);

            if let Some(color) = state.color {
                if vendor.get_color(*display_id).ok() != Some(color) {
                    match vendor.set_color(*display_id, &color) {
                        Ok(()) => self.report.mutated = true,
                        Err(e) => self.fail(label.clone(), "color", e),
                    }
                }
            }

            if let Some(hdr) = state.hdr {
                if vendor.get_hdr(*display_id).ok().map(|current| current.mode) != Some(hdr.mode) {
                    match vendor.set_hdr_mode(*display_id, hdr.mode) {
                        Ok(()) => self.report.mutated = true,
                        Err(e) => self.fail(label, "HDR mode", e),
                    }
                }
            }
        }
    }

    fn apply_os_state(&mut self, target: &OsSnapshot) {
        for state in target.advanced_color.iter().filter(|state| state.info.supported) {
            let current = self.os.get_advanced_color(state.adapter_id, state.target_id);
            if current.is_ok_and(|current| current.enabled == state.info.enabled) {
                continue;
            }
            match self
                .os
                .set_advanced_color(state.adapter_id, state.target_id, state.info.enabled)
            {
                Ok(()) => self.report.mutated = true,
                Err(e) => self.fail(state.target_id.to_string(), "advanced color", e),
            }
        }

        for dpi in &target.dpi_scaling {
            let current = self.os.get_source_dpi_scale(dpi.adapter_id, dpi.source_id);
            if current.is_ok_and(|current| current.current == dpi.scale.current) {
                continue;
            }
            match self
                .os
                .set_source_dpi_scale(dpi.adapter_id, dpi.source_id, dpi.scale.current)
            {
                Ok(()) => self.report.mutated = true,
                Err(e) => self.fail(format!("source {}", dpi.source_id), "DPI scale", e),
            }
        }
    }
}

/// Brings the base profile in line with `target`; returns whether anything changed.
fn apply_driver_settings(vendor: &dyn VendorService, target: &DriverProfile) -> Result<bool> {
    let mut session = vendor.open_driver_settings()?;
    let current = session.base_profile()?;

    let mut changed = false;
    for setting in &target.settings {
        let current_value = current
            .settings
            .iter()
            .find(|s| s.setting_id == setting.setting_id)
            .map(|s| s.value);
        if current_value != Some(setting.value) {
            debug!("Setting driver setting {} to {:#x}", setting.name, setting.value);
            session.set_setting(setting.setting_id, setting.value)?;
            changed = true;
        }
    }
    for setting in &current.settings {
        if !target.settings.iter().any(|s| s.setting_id == setting.setting_id) {
            debug!("Restoring driver setting {} to its default", setting.name);
            session.restore_default(setting.setting_id)?;
            changed = true;
        }
    }

    if changed {
        session.save()?;
    }
    Ok(changed)
}
