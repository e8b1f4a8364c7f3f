//! Profile persistence: named snapshots stored as pretty JSON, one file per profile.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::display::snapshot::ConfigSnapshot;
use crate::utils::error::{DisplayError, Result};

const PROFILE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub created: DateTime<Local>,
    pub snapshot: ConfigSnapshot,
}

impl Profile {
    pub fn new(name: &str, snapshot: ConfigSnapshot) -> Self {
        Self {
            name: name.to_string(),
            created: Local::now(),
            snapshot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

/// Profile names become file names, so they may not escape the directory.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DisplayError::InvalidArguments("profile name is empty".to_string()));
    }
    if name.starts_with('.') || name.contains(['/', '\\', ':']) {
        return Err(DisplayError::InvalidArguments(format!(
            "profile name '{}' contains path characters",
            name
        )));
    }
    Ok(())
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name, PROFILE_EXTENSION)))
    }

    pub fn save(&self, profile: &Profile) -> Result<PathBuf> {
        let path = self.path_for(&profile.name)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_json::to_string_pretty(profile)?)?;
        info!("Saved profile '{}' to {:?}", profile.name, path);
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Profile> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(DisplayError::NotFound(format!("profile '{}'", name)));
        }
        let profile: Profile = serde_json::from_str(&fs::read_to_string(&path)?)?;
        debug!("Loaded profile '{}' from {:?}", name, path);
        Ok(profile)
    }

    /// Stored profile names, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PROFILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(DisplayError::NotFound(format!("profile '{}'", name)));
        }
        fs::remove_file(&path)?;
        info!("Deleted profile '{}'", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::capture::capture;
    use crate::display::test_support::desk_machine;

    #[test]
    fn test_save_load_captured_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles"));
        let machine = desk_machine();
        let profile = Profile::new("desk", capture(&machine, Some(&machine)).unwrap());

        store.save(&profile).unwrap();
        let loaded = store.load("desk").unwrap();
        assert_eq!(loaded.snapshot, profile.snapshot);
        assert_eq!(loaded.name, "desk");
    }

    #[test]
    fn test_list_is_sorted_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.list().unwrap().is_empty());

        for name in ["gaming", "desk", "movie"] {
            store.save(&Profile::new(name, ConfigSnapshot::default())).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();

        assert_eq!(store.list().unwrap(), vec!["desk", "gaming", "movie"]);
    }

    #[test]
    fn test_delete_and_missing_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        store.save(&Profile::new("desk", ConfigSnapshot::default())).unwrap();

        store.delete("desk").unwrap();
        assert!(matches!(store.load("desk"), Err(DisplayError::NotFound(_))));
        assert!(matches!(store.delete("desk"), Err(DisplayError::NotFound(_))));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        for name in ["", "  ", "../escape", "a/b", "a\\b", ".hidden", "C:"] {
            assert!(
                matches!(validate_name(name), Err(DisplayError::InvalidArguments(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_name("living room 4K").is_ok());
    }

    #[test]
    fn test_corrupt_profile_is_a_conversion_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        assert!(matches!(store.load("broken"), Err(DisplayError::ConversionError(_))));
    }
}
