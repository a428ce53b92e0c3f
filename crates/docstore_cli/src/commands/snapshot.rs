//! Loading and saving JSON snapshots.

use std::path::Path;

use docstore_core::{MemoryBackend, MemoryConfig};

use super::{CliError, CliResult};

/// Loads a snapshot file into a new backend.
pub fn load(path: &Path) -> CliResult<MemoryBackend> {
    let json = std::fs::read_to_string(path).map_err(|source| CliError::Snapshot {
        path: path.to_path_buf(),
        source,
    })?;
    let backend = MemoryBackend::from_json(&json, MemoryConfig::default())?;
    tracing::debug!(path = %path.display(), "snapshot loaded");
    Ok(backend)
}

/// Writes the committed state of `backend` to `path`.
pub fn save(backend: &MemoryBackend, path: &Path) -> CliResult<()> {
    let json = backend.to_json()?;
    std::fs::write(path, json).map_err(|source| CliError::Snapshot {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_testkit::{released_store, TempSnapshot};

    #[test]
    fn missing_file_names_the_path() {
        let snapshot = TempSnapshot::empty();
        let err = load(snapshot.path()).err().unwrap();
        assert!(err.to_string().contains("repository.json"));
    }

    #[test]
    fn save_then_load() {
        let backend = released_store("manual");
        let snapshot = TempSnapshot::empty();
        save(&backend, snapshot.path()).unwrap();
        let loaded = load(snapshot.path()).unwrap();
        assert_eq!(loaded.snapshot().store_ids().collect::<Vec<_>>(), vec!["manual"]);
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        let snapshot = TempSnapshot::empty();
        std::fs::write(snapshot.path(), "{ not json").unwrap();
        assert!(matches!(load(snapshot.path()), Err(CliError::Core(_))));
    }
}
