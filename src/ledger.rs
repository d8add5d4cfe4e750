//! Completion Ledger
//!
//! Records which catalog steps have finished so that a re-run of the
//! provisioner resumes at the first unfinished step.
//!
//! # Design Principles
//!
//! - **Presence = completed**: a step is complete iff its marker key is present
//! - **Write once**: keys are only ever added by the runner after a successful
//!   action; only an explicit operator `reset` removes one
//! - **Swappable backend**: the runner talks to the `CompletionLedger` trait,
//!   so tests use `MemoryLedger` and production uses `DirLedger`
//!
//! # On-disk layout (`DirLedger`)
//!
//! ```text
//! <marker_dir>/
//!     office-suite        (empty file)
//!     fonts-copied        (empty file)
//!     ...
//! ```

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Longest marker key accepted; keys are used as file names.
const MAX_KEY_LEN: usize = 128;

// ============================================================================
// Marker Key
// ============================================================================

/// A validated completion marker key.
///
/// Keys are ASCII alphanumerics plus `-`, `_` and `.`, never start with a dot
/// and never contain a path separator, so a key is always a safe file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MarkerKey(String);

impl MarkerKey {
    /// Validate and wrap a marker key
    pub fn new(key: impl Into<String>) -> Result<Self, LedgerError> {
        let key = key.into();
        if key.is_empty() {
            return Err(LedgerError::invalid_key(key, "key is empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(LedgerError::invalid_key(
                key,
                format!("key is longer than {} characters", MAX_KEY_LEN),
            ));
        }
        if key.starts_with('.') {
            return Err(LedgerError::invalid_key(key, "key starts with '.'"));
        }
        if key.contains('/') || key.contains('\\') {
            return Err(LedgerError::invalid_key(key, "contains a path separator"));
        }
        if let Some(bad) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(LedgerError::invalid_key(
                key.clone(),
                format!("character {:?} is not allowed", bad),
            ));
        }
        Ok(Self(key))
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl TryFrom<String> for MarkerKey {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for MarkerKey {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MarkerKey> for String {
    fn from(key: MarkerKey) -> Self {
        key.0
    }
}

impl AsRef<str> for MarkerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Ledger Trait
// ============================================================================

/// Persistent set of completed step markers.
///
/// # Contract
///
/// - `has()` reflects every successful `mark()` made before it, including
///   marks made by earlier processes for persistent backends.
/// - `mark()` is idempotent.
/// - `clear()` is never called by the runner; it exists for operator resets.
pub trait CompletionLedger {
    /// Whether the marker is present.
    fn has(&self, key: &MarkerKey) -> Result<bool, LedgerError>;

    /// Record the marker.
    fn mark(&mut self, key: &MarkerKey) -> Result<(), LedgerError>;

    /// Remove the marker. Returns `true` if it was present.
    fn clear(&mut self, key: &MarkerKey) -> Result<bool, LedgerError>;

    /// All markers currently present, sorted.
    fn keys(&self) -> Result<Vec<MarkerKey>, LedgerError>;
}

impl<T: CompletionLedger + ?Sized> CompletionLedger for &mut T {
    fn has(&self, key: &MarkerKey) -> Result<bool, LedgerError> {
        (**self).has(key)
    }

    fn mark(&mut self, key: &MarkerKey) -> Result<(), LedgerError> {
        (**self).mark(key)
    }

    fn clear(&mut self, key: &MarkerKey) -> Result<bool, LedgerError> {
        (**self).clear(key)
    }

    fn keys(&self) -> Result<Vec<MarkerKey>, LedgerError> {
        (**self).keys()
    }
}

// ============================================================================
// Directory Backend
// ============================================================================

/// Ledger backed by a directory of empty marker files.
#[derive(Debug, Clone)]
pub struct DirLedger {
    root: PathBuf,
}

impl DirLedger {
    /// Open (and create if needed) the marker directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| LedgerError::storage(&root, e))?;
        debug!("Opened marker directory {:?}", root);
        Ok(Self { root })
    }

    /// Use a marker directory without creating it. A missing directory reads
    /// as an empty ledger; `mark()` still requires it to exist.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the marker files
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the marker file for a key
    pub fn marker_path(&self, key: &MarkerKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

impl CompletionLedger for DirLedger {
    fn has(&self, key: &MarkerKey) -> Result<bool, LedgerError> {
        let path = self.marker_path(key);
        path.try_exists().map_err(|e| LedgerError::storage(&path, e))
    }

    fn mark(&mut self, key: &MarkerKey) -> Result<(), LedgerError> {
        let path = self.marker_path(key);
        let file = fs::File::create(&path).map_err(|e| LedgerError::storage(&path, e))?;
        file.sync_all().map_err(|e| LedgerError::storage(&path, e))?;
        debug!("Wrote marker {:?}", path);
        Ok(())
    }

    fn clear(&mut self, key: &MarkerKey) -> Result<bool, LedgerError> {
        let path = self.marker_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed marker {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LedgerError::storage(&path, e)),
        }
    }

    fn keys(&self) -> Result<Vec<MarkerKey>, LedgerError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::storage(&self.root, e)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LedgerError::storage(&self.root, e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| LedgerError::storage(entry.path(), e))?
                .is_file();
            if !is_file {
                continue;
            }
            // Foreign files in the directory are not markers
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(|name| MarkerKey::new(name).ok())
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// In-Memory Backend
// ============================================================================

/// Non-persistent ledger, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    keys: BTreeSet<MarkerKey>,
    writes: usize,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger that already contains the given markers
    pub fn with_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = MarkerKey>,
    {
        Self {
            keys: keys.into_iter().collect(),
            writes: 0,
        }
    }

    /// Number of `mark()` calls made on this ledger
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl CompletionLedger for MemoryLedger {
    fn has(&self, key: &MarkerKey) -> Result<bool, LedgerError> {
        Ok(self.keys.contains(key))
    }

    fn mark(&mut self, key: &MarkerKey) -> Result<(), LedgerError> {
        self.writes += 1;
        self.keys.insert(key.clone());
        Ok(())
    }

    fn clear(&mut self, key: &MarkerKey) -> Result<bool, LedgerError> {
        Ok(self.keys.remove(key))
    }

    fn keys(&self) -> Result<Vec<MarkerKey>, LedgerError> {
        Ok(self.keys.iter().cloned().collect())
    }
}
