// Snapshot model, comparison and reconciliation
pub mod backend;
pub mod compare;
pub mod identifiers;
pub mod reconcile;
pub mod snapshot;

// Talking to the services
pub mod apply;
pub mod capture;
pub mod clone_remap;
pub mod fixture;
pub mod profile;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::ApplySettings;
use crate::display::apply::{ApplyReport, ApplyRun, ApplyStage, ApplyStrategy, default_strategies, reconcile};
use crate::display::backend::{
    MODE_IDX_INVALID, OsDisplayService, SetFlags, VendorService,
};
use crate::display::capture::capture;
use crate::display::compare::{SnapshotSection, diff_snapshots};
use crate::display::identifiers::{build_identifiers, enumerate_adapters};
use crate::display::reconcile::patch_identities;
use crate::display::snapshot::{ConfigSnapshot, VendorSnapshot};
use crate::utils::error::{DisplayError, Result};

/// True when every identifier in `required` is present in `available`.
pub fn identifiers_subset(required: &[String], available: &[String]) -> bool {
    let available: BTreeSet<&String> = available.iter().collect();
    required.iter().all(|identifier| available.contains(identifier))
}

/// Engine that owns the display services and the cached active snapshot.
///
/// One engine is constructed per process and passed to whoever needs it.
/// Applies take `&mut self`, so two applies can never overlap on the same
/// engine; share it behind a `Mutex` when several threads need it.
pub struct DisplayEngine {
    os: Box<dyn OsDisplayService>,
    vendor: Option<Box<dyn VendorService>>,
    settings: ApplySettings,
    strategies: Vec<ApplyStrategy>,
    active: ConfigSnapshot,
    all_known_identifiers: Vec<String>,
}

impl DisplayEngine {
    /// Creates an engine and captures the initial active snapshot.
    ///
    /// # Arguments
    /// * `os` - The OS display configuration service.
    /// * `vendor` - The vendor GPU service, `None` on machines without one.
    /// * `settings` - Settle waits used while applying.
    ///
    /// # Returns
    /// A `Result` containing the engine, or an error if the first capture fails.
    pub fn new(
        os: Box<dyn OsDisplayService>,
        vendor: Option<Box<dyn VendorService>>,
        settings: ApplySettings,
    ) -> Result<Self> {
        info!(
            "Starting display engine with {} and {}",
            os.backend_name(),
            vendor.as_ref().map_or("no vendor service", |vendor| vendor.backend_name())
        );
        let active = capture(os.as_ref(), vendor.as_deref())?;
        let all_known_identifiers = build_identifiers(os.as_ref(), vendor.as_deref(), true)?;

        Ok(Self {
            os,
            vendor,
            settings,
            strategies: default_strategies(),
            active,
            all_known_identifiers,
        })
    }

    /// Replaces the paths/modes apply strategies.
    pub fn with_strategies(mut self, strategies: Vec<ApplyStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    fn vendor(&self) -> Option<&dyn VendorService> {
        self.vendor.as_deref()
    }

    /// Returns an empty configuration for the services this engine drives.
    ///
    /// The vendor part is present only when a vendor service is; its
    /// topology is the individual-screens baseline.
    pub fn create_default_config(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            os: Default::default(),
            vendor: self.vendor.is_some().then(VendorSnapshot::default),
        }
    }

    /// Returns the cached active snapshot.
    ///
    /// The cache is refreshed by `update_active_config` and after every apply.
    pub fn get_active_config(&self) -> &ConfigSnapshot {
        &self.active
    }

    /// Re-captures the live configuration and replaces the cached snapshot.
    ///
    /// # Returns
    /// A `Result` containing the new active snapshot, or an error if capturing failed.
    /// On error the previous snapshot stays cached.
    pub fn update_active_config(&mut self) -> Result<&ConfigSnapshot> {
        let snapshot = capture(self.os.as_ref(), self.vendor())?;
        self.active = snapshot;
        debug!("Active configuration refreshed");
        Ok(&self.active)
    }

    /// Checks whether `snapshot` is the configuration currently active.
    ///
    /// The live configuration is re-captured first, so changes made outside
    /// the engine are seen. A copy of `snapshot` has its adapter identities
    /// patched against the fresh capture before comparing.
    ///
    /// # Returns
    /// A `Result` containing whether the snapshot is active, or an error if the
    /// live configuration could not be captured.
    pub fn is_active_config(&mut self, snapshot: &ConfigSnapshot) -> Result<bool> {
        self.update_active_config()?;
        Ok(self.diff_against_active(snapshot).is_empty())
    }

    /// Sections in which `snapshot` differs from the cached active snapshot.
    ///
    /// Does not re-capture; call `update_active_config` first for a live view.
    pub fn diff_against_active(&self, snapshot: &ConfigSnapshot) -> Vec<SnapshotSection> {
        let mut candidate = snapshot.clone();
        patch_identities(&mut candidate.os, &self.active.os.adapters);
        let sections = diff_snapshots(&candidate, &self.active);
        if !sections.is_empty() {
            debug!("Configuration differs from active in: {:?}", sections);
        }
        sections
    }

    /// Checks whether every display used by `snapshot` is connected.
    ///
    /// Uses the identifiers cached by the last `get_all_connected_display_identifiers`
    /// call (or by construction).
    pub fn is_possible_config(&self, snapshot: &ConfigSnapshot) -> bool {
        identifiers_subset(&snapshot.display_identifiers(), &self.all_known_identifiers)
    }

    /// Checks whether the OS would accept `snapshot`.
    ///
    /// Structural checks run first (adapter references, mode indices, grid
    /// shape). A reconciled copy is then submitted in validate-only mode.
    ///
    /// # Returns
    /// `Ok(false)` if a check or the validation call rejected the snapshot, or an
    /// error if the live state could not be queried.
    pub fn is_valid_config(&self, snapshot: &ConfigSnapshot) -> Result<bool> {
        if let Err(reason) = check_structure(snapshot) {
            warn!("Configuration is structurally invalid: {}", reason);
            return Ok(false);
        }

        let mut candidate = snapshot.clone();
        let live_adapters = enumerate_adapters(self.os.as_ref())?;
        reconcile(&mut candidate, &live_adapters, &self.all_known_identifiers);

        match self
            .os
            .set_paths_and_modes(&candidate.os.paths, &candidate.os.modes, SetFlags::validate())
        {
            Ok(()) => Ok(true),
            Err(e) if e.status().is_some() => {
                debug!("Configuration rejected by validation: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Applies `snapshot` and refreshes the cached active snapshot.
    ///
    /// Refuses to touch anything when a display of `snapshot` is not connected.
    /// If a stage fails after the services were already changed, the cache is
    /// still refreshed before the error is returned; a failure before any
    /// change leaves the cache as it was.
    ///
    /// # Returns
    /// A `Result` containing the apply report (including per-display failures),
    /// or the error of the stage that failed.
    pub fn set_active_config(&mut self, snapshot: &ConfigSnapshot) -> Result<ApplyReport> {
        let all_known = self.get_all_connected_display_identifiers()?;
        let available: BTreeSet<&String> = all_known.iter().collect();
        let missing: Vec<String> = snapshot
            .display_identifiers()
            .into_iter()
            .filter(|identifier| !available.contains(identifier))
            .collect();
        if !missing.is_empty() {
            warn!("Refusing to apply, {} display(s) not connected", missing.len());
            return Err(DisplayError::NotPossible { missing });
        }

        let live_adapters = enumerate_adapters(self.os.as_ref())?;
        let mut run = ApplyRun::new(self.os.as_ref(), self.vendor(), &self.settings, &self.strategies);
        let outcome = run.execute(snapshot, &live_adapters, &all_known);
        let mut report = run.report;

        match outcome {
            Ok(()) => {
                report.stages.push(ApplyStage::Refresh);
                self.update_active_config()?;
                report.stages.push(ApplyStage::Done);
                info!(
                    topology = ?report.topology,
                    strategy = report.paths_strategy.unwrap_or("skipped"),
                    failures = report.display_failures.len(),
                    "Configuration applied"
                );
                Ok(report)
            }
            Err(e) if report.mutated => {
                warn!("Apply failed after changing the displays, refreshing: {}", e);
                if let Err(refresh_error) = self.update_active_config() {
                    warn!("Refresh after failed apply also failed: {}", refresh_error);
                }
                Err(e)
            }
            Err(e) => {
                info!("Apply failed before any change, keeping the cached configuration: {}", e);
                Err(e)
            }
        }
    }

    /// Identifiers of the displays that are currently in use.
    pub fn get_current_display_identifiers(&self) -> Result<Vec<String>> {
        build_identifiers(self.os.as_ref(), self.vendor(), false)
    }

    /// Identifiers of every connected display, active or not.
    ///
    /// The result is cached as the set `is_possible_config` checks against.
    pub fn get_all_connected_display_identifiers(&mut self) -> Result<Vec<String>> {
        let identifiers = build_identifiers(self.os.as_ref(), self.vendor(), true)?;
        self.all_known_identifiers = identifiers.clone();
        Ok(identifiers)
    }

    /// Identifiers cached by the last full enumeration.
    pub fn all_known_identifiers(&self) -> &[String] {
        &self.all_known_identifiers
    }
}

/// Internal consistency of a snapshot, independent of the live machine.
fn check_structure(snapshot: &ConfigSnapshot) -> std::result::Result<(), String> {
    let os = &snapshot.os;
    for path in &os.paths {
        for index in [path.source.mode_info_idx, path.target.mode_info_idx] {
            if index != MODE_IDX_INVALID && index as usize >= os.modes.len() {
                return Err(format!("path to target {} references missing mode {}", path.target.id, index));
            }
        }
        if !os.adapters.is_empty()
            && !(os.adapters.contains_key(&path.source.adapter_id) && os.adapters.contains_key(&path.target.adapter_id))
        {
            return Err(format!("path to target {} references an unknown adapter", path.target.id));
        }
    }

    if let Some(vendor) = &snapshot.vendor {
        let topology = &vendor.topology;
        if topology.is_enabled() {
            if topology.grids.is_empty() {
                return Err("mosaic enabled without grids".to_string());
            }
            for grid in &topology.grids {
                let cells = grid.rows.checked_mul(grid.columns).map(|cells| cells as usize);
                if cells != Some(grid.displays.len()) {
                    return Err(format!(
                        "{}x{} grid holds {} display(s)",
                        grid.rows,
                        grid.columns,
                        grid.displays.len()
                    ));
                }
            }
        }
    }
    Ok(())
}
