//! Clone Remapper
//!
//! In clone mode the OS reports synthetic target ids for the extra targets of
//! a shared source. Those placeholders cannot be applied back, so each one is
//! swapped for a physical target id that no other path uses.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::display::backend::{ModeInfoType, TARGET_CLONE_PLACEHOLDER};
use crate::display::identifiers::{FIELD_SEPARATOR, OS_BACKEND_TAG, display_id_from_identifier};
use crate::display::snapshot::OsSnapshot;

/// Target ids of the OS-reported identifiers, in identifier order and unique.
pub fn physical_target_ids(identifiers: &[String]) -> Vec<u32> {
    let mut seen = HashSet::new();
    identifiers
        .iter()
        .filter(|identifier| {
            identifier
                .strip_prefix(OS_BACKEND_TAG)
                .is_some_and(|rest| rest.starts_with(FIELD_SEPARATOR))
        })
        .filter_map(|identifier| display_id_from_identifier(identifier))
        .filter(|id| seen.insert(*id))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloneRemap {
    /// Placeholder target id -> physical target id, in placeholder order
    pub mapping: Vec<(u32, u32)>,
    /// Placeholders left without a physical target
    pub unmapped: Vec<u32>,
}

impl CloneRemap {
    pub fn is_complete(&self) -> bool {
        self.unmapped.is_empty()
    }
}

/// Replaces placeholder targets of `snapshot` with unused physical target ids.
///
/// Placeholders are taken in path order and paired by position with the
/// physical ids no physical-target path references, in `physical_ids` order.
/// Surplus placeholders stay as they are and are reported as unmapped.
pub fn remap_cloned_targets(snapshot: &mut OsSnapshot, physical_ids: &[u32]) -> CloneRemap {
    let physical: HashSet<u32> = physical_ids.iter().copied().collect();

    let mut placeholders = Vec::new();
    let mut used = HashSet::new();
    for path in &snapshot.paths {
        let id = path.target.id;
        if physical.contains(&id) {
            used.insert(id);
        } else if !placeholders.contains(&id) {
            placeholders.push(id);
        }
    }

    let mut seen = HashSet::new();
    let available: Vec<u32> = physical_ids
        .iter()
        .copied()
        .filter(|id| !used.contains(id) && seen.insert(*id))
        .collect();

    let mapping: Vec<(u32, u32)> = placeholders.iter().copied().zip(available.iter().copied()).collect();
    let unmapped: Vec<u32> = placeholders.iter().skip(mapping.len()).copied().collect();
    if !unmapped.is_empty() {
        warn!(
            "{} cloned target(s) have no free physical target: {:?}",
            unmapped.len(),
            unmapped
        );
    }
    if mapping.is_empty() {
        return CloneRemap { mapping, unmapped };
    }

    let table: BTreeMap<u32, u32> = mapping.iter().copied().collect();
    for path in &mut snapshot.paths {
        if let Some(new_id) = table.get(&path.target.id) {
            path.target.id = *new_id;
            path.target.status_flags &= !TARGET_CLONE_PLACEHOLDER;
        }
    }
    for mode in snapshot
        .modes
        .iter_mut()
        .filter(|mode| mode.info_type() == ModeInfoType::Target)
    {
        if let Some(new_id) = table.get(&mode.id) {
            mode.id = *new_id;
        }
    }
    for sources in snapshot.display_sources.values_mut() {
        for source in sources {
            if let Some(new_id) = table.get(&source.target_id) {
                source.target_id = *new_id;
            }
        }
    }

    debug!("Remapped cloned targets: {:?}", mapping);
    CloneRemap { mapping, unmapped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::backend::{AdapterId, ModeData, ModeInfo, SourceMode, VideoSignalInfo};
    use crate::display::snapshot::DisplaySource;
    use crate::display::test_support::path;

    const PLACEHOLDER_A: u32 = 0x8000_0001;
    const PLACEHOLDER_B: u32 = 0x8000_0002;
    const PLACEHOLDER_C: u32 = 0x8000_0003;

    fn cloned_snapshot(placeholders: &[u32]) -> OsSnapshot {
        let mut paths = vec![path(1, 0, 1, 100)];
        paths.extend(placeholders.iter().map(|id| path(1, 0, 1, *id)));
        OsSnapshot {
            is_cloned: OsSnapshot::compute_is_cloned(&paths),
            paths,
            ..OsSnapshot::default()
        }
    }

    #[test]
    fn test_physical_target_ids_from_identifiers() {
        let identifiers = vec![
            "NVIDIA|RTX@1|DisplayPort|DEL|41456|808602698|4096".to_string(),
            "WINAPI|PCI#1|DisplayPortExternal|4268|41456|*|4353".to_string(),
            "WINAPI|PCI#1|DisplayPortExternal|4268|41457|*|4352".to_string(),
            "WINAPI|PCI#1|Hdmi|*|*|*|4353".to_string(),
            "WINAPI|PCI#1|Hdmi|*|*|*|*".to_string(),
        ];
        assert_eq!(physical_target_ids(&identifiers), vec![4353, 4352]);
    }

    #[test]
    fn test_enough_physical_targets_cover_every_placeholder() {
        let mut snapshot = cloned_snapshot(&[PLACEHOLDER_A, PLACEHOLDER_B]);
        let remap = remap_cloned_targets(&mut snapshot, &[100, 101, 102, 103]);

        assert!(remap.is_complete());
        assert_eq!(remap.mapping, vec![(PLACEHOLDER_A, 101), (PLACEHOLDER_B, 102)]);
        let targets = snapshot.target_ids();
        let distinct: HashSet<u32> = targets.iter().copied().collect();
        assert_eq!(distinct.len(), targets.len());
        assert!(targets.iter().all(|id| [100, 101, 102, 103].contains(id)));
        // Still one source feeding several targets
        assert!(OsSnapshot::compute_is_cloned(&snapshot.paths));
    }

    #[test]
    fn test_shortfall_maps_in_discovery_order() {
        let mut snapshot = cloned_snapshot(&[PLACEHOLDER_A, PLACEHOLDER_B, PLACEHOLDER_C]);
        let remap = remap_cloned_targets(&mut snapshot, &[100, 101]);

        assert_eq!(remap.mapping, vec![(PLACEHOLDER_A, 101)]);
        assert_eq!(remap.unmapped, vec![PLACEHOLDER_B, PLACEHOLDER_C]);
        assert_eq!(snapshot.target_ids(), vec![100, 101, PLACEHOLDER_B, PLACEHOLDER_C]);
    }

    #[test]
    fn test_positional_zip_pairing() {
        // Which placeholder gets which free target follows list order only;
        // this pairing is unconfirmed on real multi-clone hardware.
        let mut snapshot = cloned_snapshot(&[PLACEHOLDER_B, PLACEHOLDER_A]);
        let remap = remap_cloned_targets(&mut snapshot, &[103, 100, 102]);
        assert_eq!(remap.mapping, vec![(PLACEHOLDER_B, 103), (PLACEHOLDER_A, 102)]);
    }

    #[test]
    fn test_modes_and_sources_follow_the_remap() {
        let mut snapshot = cloned_snapshot(&[PLACEHOLDER_A]);
        snapshot.modes = vec![
            ModeInfo {
                adapter_id: AdapterId(1),
                id: PLACEHOLDER_A,
                mode: ModeData::Target(VideoSignalInfo::default()),
            },
            ModeInfo {
                adapter_id: AdapterId(1),
                id: PLACEHOLDER_A,
                mode: ModeData::Source(SourceMode::default()),
            },
        ];
        snapshot.display_sources.insert(
            "\\\\.\\DISPLAY1".to_string(),
            vec![DisplaySource {
                adapter_id: AdapterId(1),
                source_id: 0,
                target_id: PLACEHOLDER_A,
            }],
        );

        remap_cloned_targets(&mut snapshot, &[100, 101]);
        assert_eq!(snapshot.modes[0].id, 101);
        assert_eq!(snapshot.modes[1].id, PLACEHOLDER_A);
        assert_eq!(snapshot.display_sources["\\\\.\\DISPLAY1"][0].target_id, 101);
    }

    #[test]
    fn test_remapped_target_loses_placeholder_flag() {
        let mut snapshot = cloned_snapshot(&[PLACEHOLDER_A]);
        snapshot.paths[1].target.status_flags |= TARGET_CLONE_PLACEHOLDER;

        remap_cloned_targets(&mut snapshot, &[100, 101]);
        assert_eq!(snapshot.paths[1].target.id, 101);
        assert!(!snapshot.paths[1].target.is_clone_placeholder());
    }

    #[test]
    fn test_no_placeholders_is_a_no_op() {
        let mut snapshot = cloned_snapshot(&[]);
        let before = snapshot.clone();
        let remap = remap_cloned_targets(&mut snapshot, &[100, 101]);
        assert_eq!(remap, CloneRemap::default());
        assert_eq!(snapshot, before);
    }
}
