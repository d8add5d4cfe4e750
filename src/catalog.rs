//! Catalog file handling.
//!
//! A catalog is a JSON document with run-wide settings and the ordered list of
//! steps. Catalog order is the only dependency mechanism: a step that installs
//! from a copied directory must come after the copy step.

use crate::actions::ActionSpec;
use crate::error::CatalogError;
use crate::ledger::MarkerKey;
use crate::step::{ActionContext, Step};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Command used to request a delayed restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestartCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for RestartCommand {
    fn default() -> Self {
        Self {
            program: "shutdown".to_string(),
            args: vec!["-r".to_string(), "+1".to_string()],
        }
    }
}

/// Run-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Where completion markers are kept
    pub marker_dir: PathBuf,
    /// Where downloaded installers are placed before launch
    pub staging_dir: PathBuf,
    /// Where run transcripts are written
    pub transcript_dir: PathBuf,
    pub restart: RestartCommand,
    /// Program used for `msi` installers
    pub msiexec: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            marker_dir: PathBuf::from("/var/lib/deskstrap/markers"),
            staging_dir: PathBuf::from("/var/cache/deskstrap"),
            transcript_dir: PathBuf::from("/var/log/deskstrap"),
            restart: RestartCommand::default(),
            msiexec: "msiexec".to_string(),
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub name: String,
    pub marker: MarkerKey,
    pub action: ActionSpec,
}

/// A parsed catalog file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default)]
    pub settings: Settings,
    pub steps: Vec<StepSpec>,
}

impl Catalog {
    /// Load a catalog from a JSON file. Does not validate.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!("Read catalog {:?} ({} bytes)", path, content.len());
        Self::from_json_str(&content)
    }

    /// Parse a catalog from JSON text. Does not validate.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load and validate in one go
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let catalog = Self::load_from_file(path)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Save the catalog as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CatalogError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| CatalogError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Check the catalog for configuration mistakes.
    ///
    /// Marker keys are already validated by deserialization; this adds the
    /// cross-step checks (uniqueness) and per-action checks.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.steps.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen: HashMap<&MarkerKey, &str> = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            if step.name.trim().is_empty() {
                return Err(CatalogError::invalid_step(number, "<unnamed>", "name is empty"));
            }
            if let Err(reason) = step.action.validate() {
                return Err(CatalogError::invalid_step(number, &step.name, reason));
            }
            if let Some(first) = seen.insert(&step.marker, &step.name) {
                return Err(CatalogError::DuplicateMarker {
                    marker: step.marker.to_string(),
                    first: first.to_string(),
                    second: step.name.clone(),
                });
            }
        }

        if self.settings.restart.program.trim().is_empty() {
            return Err(CatalogError::invalid_setting("restart.program", "is empty"));
        }
        Ok(())
    }

    /// Look up a step by marker key
    pub fn step_by_marker(&self, marker: &MarkerKey) -> Option<&StepSpec> {
        self.steps.iter().find(|s| &s.marker == marker)
    }

    /// Context handed to every action of this catalog
    pub fn action_context(&self, dry_run: bool) -> ActionContext {
        ActionContext {
            dry_run,
            staging_dir: self.settings.staging_dir.clone(),
            msiexec: self.settings.msiexec.clone(),
        }
    }

    /// Runnable steps in catalog order
    pub fn to_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .map(|s| Step::new(s.name.clone(), s.marker.clone(), s.action.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "steps": [
            { "name": "Fonts", "marker": "fonts",
              "action": { "kind": "copy_dir", "source": "/mnt/share/fonts", "destination": "/opt/fonts" } },
            { "name": "Reader", "marker": "reader",
              "action": { "kind": "download_install", "url": "https://example.org/reader.exe",
                          "file_name": "reader.exe", "flavor": "nsis" } }
        ]
    }"#;

    #[test]
    fn test_minimal_catalog_uses_default_settings() {
        let catalog = Catalog::from_json_str(MINIMAL).unwrap();
        catalog.validate().unwrap();
        assert_eq!(catalog.settings, Settings::default());
        assert_eq!(catalog.steps.len(), 2);
        assert_eq!(catalog.steps[1].marker.as_str(), "reader");
    }

    #[test]
    fn test_duplicate_marker_rejected() {
        let json = MINIMAL.replace("\"reader\"", "\"fonts\"");
        let catalog = Catalog::from_json_str(&json).unwrap();
        let err = catalog.validate().unwrap_err();
        assert_eq!(
            err,
            CatalogError::DuplicateMarker {
                marker: "fonts".to_string(),
                first: "Fonts".to_string(),
                second: "Reader".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_marker_fails_parse() {
        let json = MINIMAL.replace("\"reader\"", "\"../reader\"");
        let err = Catalog::from_json_str(&json).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFormat { .. }));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let catalog = Catalog::from_json_str(r#"{ "steps": [] }"#).unwrap();
        assert_eq!(catalog.validate().unwrap_err(), CatalogError::Empty);
    }

    #[test]
    fn test_bad_action_reports_step_number() {
        let json = MINIMAL.replace("https://example.org/reader.exe", "ftp://example.org/r.exe");
        let catalog = Catalog::from_json_str(&json).unwrap();
        match catalog.validate().unwrap_err() {
            CatalogError::InvalidStep { index, name, .. } => {
                assert_eq!(index, 2);
                assert_eq!(name, "Reader");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_settings_field_rejected() {
        let json = MINIMAL.replacen('{', r#"{ "settings": { "marker_directory": "/x" },"#, 1);
        assert!(Catalog::from_json_str(&json).is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = Catalog::from_json_str(MINIMAL).unwrap();
        catalog.save_to_file(&path).unwrap();
        assert_eq!(Catalog::load_validated(&path).unwrap(), catalog);
    }

    #[test]
    fn test_missing_file() {
        let err = Catalog::load_from_file("/nonexistent/catalog.json").unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
    }

    #[test]
    fn test_to_steps_preserves_order_and_context() {
        let catalog = Catalog::from_json_str(MINIMAL).unwrap();
        let steps = catalog.to_steps();
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Fonts", "Reader"]);

        let ctx = catalog.action_context(true);
        assert!(ctx.dry_run);
        assert_eq!(ctx.staging_dir, PathBuf::from("/var/cache/deskstrap"));
    }
}
