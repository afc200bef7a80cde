//
// unit_cache.rs
//
// Per-file analysis results keyed on content versions, with
// stale-but-available reads while re-analysis is in flight
//

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

/// A committed analysis result together with the content it was computed
/// from. Valid only for that content version; any newer version makes it
/// stale without evicting it.
#[derive(Debug)]
pub struct CompiledUnit<R> {
    pub content: String,
    pub version: i64,
    pub result: Arc<R>,
}

impl<R> Clone for CompiledUnit<R> {
    fn clone(&self) -> Self {
        Self {
            content: self.content.clone(),
            version: self.version,
            result: Arc::clone(&self.result),
        }
    }
}

#[derive(Debug)]
struct Slot<R> {
    current_content: String,
    current_version: i64,
    committed: Option<CompiledUnit<R>>,
}

/// Bookkeeping for per-file analysis results.
///
/// Query handlers read the last committed result even while a re-analysis
/// is in flight; a commit replaces the whole unit at once, so a reader
/// never observes a partial result. A failed re-analysis simply never
/// commits, leaving the previous result in place.
pub struct CompiledUnitCache<R> {
    files: DashMap<PathBuf, Slot<R>>,
}

impl<R> Default for CompiledUnitCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> CompiledUnitCache<R> {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
        }
    }

    /// Start tracking a file, or refresh its current content if it is
    /// already tracked. A previously committed result survives a reopen.
    pub fn open(&self, path: PathBuf, content: String, version: i64) {
        match self.files.entry(path) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.current_content = content;
                slot.current_version = version;
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Slot {
                    current_content: content,
                    current_version: version,
                    committed: None,
                });
            }
        }
    }

    /// Record new content for a tracked file. Logically invalidates the
    /// committed result without discarding it. Returns false for an
    /// untracked path.
    pub fn update(&self, path: &Path, content: String, version: i64) -> bool {
        match self.files.get_mut(path) {
            Some(mut slot) => {
                slot.current_content = content;
                slot.current_version = version;
                true
            }
            None => false,
        }
    }

    /// Finalize a re-analysis. The unit is replaced wholesale; readers see
    /// either the previous unit or this one, never a mixture.
    pub fn commit(&self, path: &Path, content: String, version: i64, result: R) {
        let unit = CompiledUnit {
            content,
            version,
            result: Arc::new(result),
        };
        match self.files.entry(path.to_path_buf()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.get_mut().committed = Some(unit);
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Slot {
                    current_content: unit.content.clone(),
                    current_version: unit.version,
                    committed: Some(unit),
                });
            }
        }
    }

    /// Last committed result for a path, stale or not.
    pub fn get(&self, path: &Path) -> Option<Arc<R>> {
        self.files
            .get(path)?
            .committed
            .as_ref()
            .map(|unit| Arc::clone(&unit.result))
    }

    /// Last committed unit including the content it was computed from.
    pub fn committed(&self, path: &Path) -> Option<CompiledUnit<R>> {
        self.files.get(path)?.committed.clone()
    }

    /// Whether the committed result matches the current content version.
    pub fn is_fresh(&self, path: &Path) -> bool {
        self.files
            .get(path)
            .and_then(|slot| {
                slot.committed
                    .as_ref()
                    .map(|unit| unit.version == slot.current_version)
            })
            .unwrap_or(false)
    }

    /// Current content and version, the input for the next re-analysis.
    pub fn current(&self, path: &Path) -> Option<(String, i64)> {
        let slot = self.files.get(path)?;
        Some((slot.current_content.clone(), slot.current_version))
    }

    /// Stop tracking a file that left the workspace.
    pub fn remove(&self, path: &Path) {
        self.files.remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Paths whose committed result no longer matches the current version,
    /// including paths never analyzed at all.
    pub fn stale_paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .committed
                    .as_ref()
                    .map(|unit| unit.version != entry.value().current_version)
                    .unwrap_or(true)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
