//! Identity Reconciler
//!
//! Adapter ids are only valid for one boot session; adapter device paths are
//! durable. A saved snapshot is patched by matching its adapter device paths
//! against the live adapter table and rewriting every embedded adapter id.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::display::backend::AdapterId;
use crate::display::snapshot::OsSnapshot;

/// Outcome for one saved adapter entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AdapterPatch {
    /// The device path is live; `original` now reads `current`
    Patched {
        device_path: String,
        original: AdapterId,
        current: AdapterId,
    },
    /// The device path is gone; references now point at the first live adapter
    PatchedWithFallback {
        device_path: String,
        original: AdapterId,
        substituted: AdapterId,
    },
    /// No live adapter at all; the entry keeps its saved id
    Unpatchable { device_path: String, original: AdapterId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub outcomes: Vec<AdapterPatch>,
}

impl PatchReport {
    /// True when every saved adapter was found by device path
    pub fn is_exact(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| matches!(outcome, AdapterPatch::Patched { .. }))
    }

    /// True when at least one adapter id was rewritten
    pub fn changed(&self) -> bool {
        self.outcomes.iter().any(|outcome| match outcome {
            AdapterPatch::Patched { original, current, .. } => original != current,
            AdapterPatch::PatchedWithFallback { original, substituted, .. } => original != substituted,
            AdapterPatch::Unpatchable { .. } => false,
        })
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = &AdapterPatch> {
        self.outcomes
            .iter()
            .filter(|outcome| !matches!(outcome, AdapterPatch::Patched { .. }))
    }
}

/// Rewrites the adapter ids of `snapshot` to the ids `live` assigns to the same device paths.
///
/// Saved adapters whose device path is not live fall back to the first live
/// adapter so the snapshot stays internally consistent. Re-running the patch
/// is a no-op: every translation is derived from device paths.
pub fn patch_identities(snapshot: &mut OsSnapshot, live: &BTreeMap<AdapterId, String>) -> PatchReport {
    let mut by_path: HashMap<&str, AdapterId> = HashMap::new();
    for (id, device_path) in live {
        by_path.entry(device_path.as_str()).or_insert(*id);
    }
    let fallback = live.keys().next().copied();

    let mut report = PatchReport::default();
    let mut table: HashMap<AdapterId, AdapterId> = HashMap::new();
    for (original, device_path) in &snapshot.adapters {
        let outcome = match (by_path.get(device_path.as_str()), fallback) {
            (Some(current), _) => {
                table.insert(*original, *current);
                if original != current {
                    debug!("Adapter {} is now {} ({})", original, current, device_path);
                }
                AdapterPatch::Patched {
                    device_path: device_path.clone(),
                    original: *original,
                    current: *current,
                }
            }
            (None, Some(substituted)) => {
                warn!(
                    "Adapter {} not found by device path {}, falling back to {}",
                    original, device_path, substituted
                );
                table.insert(*original, substituted);
                AdapterPatch::PatchedWithFallback {
                    device_path: device_path.clone(),
                    original: *original,
                    substituted,
                }
            }
            (None, None) => {
                warn!("No live adapter to patch {} ({}) against", original, device_path);
                AdapterPatch::Unpatchable {
                    device_path: device_path.clone(),
                    original: *original,
                }
            }
        };
        report.outcomes.push(outcome);
    }

    let translate = |id: AdapterId| table.get(&id).copied().or(fallback).unwrap_or(id);

    // Exact matches own their id; fallbacks only fill gaps
    let mut adapters = BTreeMap::new();
    for outcome in &report.outcomes {
        if let AdapterPatch::Patched { device_path, current, .. } = outcome {
            adapters.insert(*current, device_path.clone());
        }
    }
    for outcome in &report.outcomes {
        match outcome {
            AdapterPatch::PatchedWithFallback {
                device_path,
                substituted,
                ..
            } => {
                adapters.entry(*substituted).or_insert_with(|| device_path.clone());
            }
            AdapterPatch::Unpatchable { device_path, original } => {
                adapters.entry(*original).or_insert_with(|| device_path.clone());
            }
            AdapterPatch::Patched { .. } => {}
        }
    }
    snapshot.adapters = adapters;

    for path in &mut snapshot.paths {
        path.source.adapter_id = translate(path.source.adapter_id);
        path.target.adapter_id = translate(path.target.adapter_id);
    }
    for mode in &mut snapshot.modes {
        mode.adapter_id = translate(mode.adapter_id);
    }
    for state in &mut snapshot.advanced_color {
        state.adapter_id = translate(state.adapter_id);
    }
    for dpi in &mut snapshot.dpi_scaling {
        dpi.adapter_id = translate(dpi.adapter_id);
    }
    for sources in snapshot.display_sources.values_mut() {
        for source in sources {
            source.adapter_id = translate(source.adapter_id);
        }
    }

    if report.changed() {
        info!("Patched adapter identities of {} adapter(s)", report.outcomes.len());
    }
    report
}
