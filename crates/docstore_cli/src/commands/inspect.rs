//! Inspect command implementation.

use std::collections::BTreeMap;
use std::path::Path;

use docstore_core::{DocStoreSession, MemoryBackend, VersionId, VersionState};
use docstore_sync::translation_languages_recursive;
use serde::Serialize;

use super::{snapshot, CliResult, CLI_USER};

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Every store of the snapshot.
    pub stores: Vec<StoreInfo>,
}

/// One store with its versions.
#[derive(Debug, Serialize)]
pub struct StoreInfo {
    /// Store id.
    pub id: String,
    /// User-visible store properties.
    pub properties: BTreeMap<String, String>,
    /// Versions in id order.
    pub versions: Vec<VersionInfo>,
}

/// One version of a store.
#[derive(Debug, Serialize)]
pub struct VersionInfo {
    /// Version id.
    pub id: VersionId,
    /// Base version.
    pub derived_from: Option<VersionId>,
    /// State of the original language.
    pub state: VersionState,
    /// State per translation found in the tree.
    pub translations: BTreeMap<String, VersionState>,
    /// Nodes reachable from the root, root included.
    pub nodes: usize,
    /// Registered image rendition names.
    pub renditions: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let result = collect(path)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Loads a snapshot and describes its stores.
pub fn collect(path: &Path) -> CliResult<InspectResult> {
    let backend = snapshot::load(path)?;
    let mut session = backend.session(CLI_USER);
    let mut stores = Vec::new();
    for store in session.list_doc_stores() {
        stores.push(describe_store(&backend, &mut session, &store)?);
    }
    Ok(InspectResult {
        path: path.display().to_string(),
        stores,
    })
}

fn describe_store(backend: &MemoryBackend, session: &mut dyn DocStoreSession, store: &str) -> CliResult<StoreInfo> {
    let mut properties = BTreeMap::new();
    for name in session.doc_store_property_names(store)? {
        if let Some(value) = session.doc_store_property(store, &name) {
            properties.insert(name, value);
        }
    }

    let repo = backend.snapshot();
    let mut versions = Vec::new();
    for version in session.list_versions(store)? {
        session.open_doc_store(store, &version)?;
        let root = session.root()?;
        let languages = translation_languages_recursive(&*session, &root)?;
        let renditions = session
            .image_renditions()?
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        session.close_doc_store()?;

        let mut translations = BTreeMap::new();
        for lang in languages {
            let state = session.version_state_in(store, &version, Some(&lang))?;
            translations.insert(lang, state);
        }
        versions.push(VersionInfo {
            derived_from: session.version_derived_from(store, &version)?,
            state: session.version_state_in(store, &version, None)?,
            translations,
            nodes: repo.node_count(store, &version).unwrap_or(0),
            renditions,
            id: version,
        });
    }
    Ok(StoreInfo {
        id: store.to_string(),
        properties,
        versions,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Docstore Snapshot Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);

    for store in &result.stores {
        println!();
        println!("Store {}:", store.id);
        for (name, value) in &store.properties {
            println!("  {name} = {value}");
        }
        for version in &store.versions {
            let base = version
                .derived_from
                .as_ref()
                .map_or_else(|| "-".to_string(), VersionId::to_string);
            println!(
                "  [{}] base {}, {}, {} nodes",
                version.id, base, version.state, version.nodes
            );
            for (lang, state) in &version.translations {
                println!("      {lang}: {state}");
            }
            if !version.renditions.is_empty() {
                println!("      renditions: {}", version.renditions.join(", "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_testkit::{released_store, version, TempSnapshot};

    #[test]
    fn describes_versions_and_translations() {
        let snapshot = TempSnapshot::write(&released_store("manual"));
        let result = collect(snapshot.path()).unwrap();

        assert_eq!(result.stores.len(), 1);
        let store = &result.stores[0];
        assert_eq!(store.properties.get("owner").map(String::as_str), Some("docs"));
        assert_eq!(store.versions.len(), 2);

        let v10 = &store.versions[0];
        assert_eq!(v10.id, version("1.0"));
        assert_eq!(v10.state, VersionState::Released);
        assert_eq!(v10.translations.get("de"), Some(&VersionState::Released));
        assert_eq!(v10.nodes, 7);
        assert_eq!(v10.renditions, vec!["thumb".to_string()]);

        let v11 = &store.versions[1];
        assert_eq!(v11.derived_from, Some(version("1.0")));
        assert_eq!(v11.state, VersionState::Draft);
        assert_eq!(v11.nodes, 8);
    }

    #[test]
    fn json_output_uses_state_names() {
        let snapshot = TempSnapshot::write(&released_store("manual"));
        let result = collect(snapshot.path()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stores"][0]["versions"][0]["state"], "released");
        assert_eq!(json["stores"][0]["versions"][1]["derived_from"], "1.0");
    }
}
