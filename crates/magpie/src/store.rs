//
// store.rs
//
// Persistent on-disk object store for derived data that should survive
// process restarts
//

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Namespaced key/value store backed by a directory tree.
///
/// A slice maps onto a subdirectory and an object onto a JSON file within
/// it. Reads are self-healing: a file that fails to deserialize is deleted
/// and reported as a miss, never as an error. Writes are best-effort and
/// clean up partial files on failure.
///
/// The store offers no cross-process locking. Within one process, callers
/// are expected to serialize writes to a given object, typically by
/// funneling them through one task executor.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    path: PathBuf,
}

impl ObjectStore {
    /// Open (and create if necessary) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = root.into();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A sub-store for the given relative slice path, creating its directory
    /// when absent. An already-existing directory is joined and returned;
    /// only a non-directory obstruction or an I/O failure yields `None`.
    pub fn slice(&self, relative_path: &str) -> Option<ObjectStore> {
        let full = self.path.join(relative_path);
        match fs::create_dir_all(&full) {
            Ok(()) => Some(ObjectStore { path: full }),
            Err(err) => {
                log::warn!("Could not create store slice {}: {}", full.display(), err);
                None
            }
        }
    }

    /// Read an object, or `None` when absent or unreadable. A corrupt
    /// backing file is deleted so the next write starts clean.
    pub fn get_object<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let file = self.path.join(name);
        if !file.exists() {
            return None;
        }
        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(err) => {
                log::warn!("Could not read store object {}: {}", file.display(), err);
                let _ = fs::remove_file(&file);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!(
                    "Discarding corrupt store object {}: {}",
                    file.display(),
                    err
                );
                let _ = fs::remove_file(&file);
                None
            }
        }
    }

    /// Write an object. On serialize or write failure any partially written
    /// file is removed rather than left corrupt.
    pub fn set_object<T: Serialize>(&self, name: &str, value: &T) {
        let file = self.path.join(name);
        let result = serde_json::to_string(value)
            .map_err(anyhow::Error::from)
            .and_then(|content| fs::write(&file, content).map_err(anyhow::Error::from));
        if let Err(err) = result {
            log::warn!("Could not write store object {}: {}", file.display(), err);
            let _ = fs::remove_file(&file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeSet;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        paths: BTreeSet<PathBuf>,
    }

    fn sample() -> Sample {
        Sample {
            name: "deps".to_string(),
            paths: [PathBuf::from("/lib/a.jar"), PathBuf::from("/lib/b.jar")]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        store.set_object("sample", &sample());
        assert_eq!(store.get_object::<Sample>("sample"), Some(sample()));
    }

    #[test]
    fn test_missing_object_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        assert_eq!(store.get_object::<Sample>("nope"), None);
    }

    #[test]
    fn test_corrupt_object_is_deleted_and_missed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        store.set_object("sample", &sample());
        std::fs::write(dir.path().join("sample"), "{ not json").unwrap();

        assert_eq!(store.get_object::<Sample>("sample"), None);
        assert!(
            !dir.path().join("sample").exists(),
            "corrupt backing file should be removed"
        );
    }

    #[test]
    fn test_type_mismatch_is_treated_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        store.set_object("version", &42u64);
        assert_eq!(store.get_object::<Sample>("version"), None);
        assert!(!dir.path().join("version").exists());
    }

    #[test]
    fn test_slices_nest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        let slice = store.slice("envs/gradle").unwrap();
        slice.set_object("sample", &sample());

        // Slices address the same directory tree.
        let again = store.slice("envs").unwrap().slice("gradle").unwrap();
        assert_eq!(again.get_object::<Sample>("sample"), Some(sample()));
    }

    #[test]
    fn test_slice_on_existing_directory_returns_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        let first = store.slice("shared").unwrap();
        first.set_object("value", &1u32);

        let second = store.slice("shared").unwrap();
        assert_eq!(second.get_object::<u32>("value"), Some(1));
    }

    #[test]
    fn test_slice_obstructed_by_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("blocked"), "file in the way").unwrap();
        assert!(store.slice("blocked").is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ObjectStore::open(dir.path()).unwrap();
            store.set_object("sample", &sample());
        }
        let store = ObjectStore::open(dir.path()).unwrap();
        assert_eq!(store.get_object::<Sample>("sample"), Some(sample()));
    }
}
