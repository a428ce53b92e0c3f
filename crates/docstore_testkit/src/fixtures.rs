//! Test fixtures over the in-memory backend.
//!
//! Provides a small tree builder, a sample manual tree with a German
//! translation, a store with a released and a derived version, and JSON
//! snapshot files in temporary directories.

use std::path::{Path, PathBuf};

use docstore_core::{
    DocStoreSession, ImageFormat, ImageRendition, MemoryBackend, MemoryConfig, NodeId, NodeKind,
    VersionId, VersionState,
};
use tempfile::TempDir;

/// Parses a version id, panicking on malformed input.
pub fn version(s: &str) -> VersionId {
    VersionId::parse(s).expect("Invalid version id")
}

/// Builds nodes below an open version, panicking on any error.
pub struct TreeBuilder<'a> {
    session: &'a mut dyn DocStoreSession,
}

impl<'a> TreeBuilder<'a> {
    /// Wraps a session with an open store.
    pub fn new(session: &'a mut dyn DocStoreSession) -> Self {
        Self { session }
    }

    /// Root of the open version.
    pub fn root(&self) -> NodeId {
        self.session.root().expect("No store open")
    }

    /// Appends a node of `kind` with an alias and an original title.
    pub fn node(&mut self, parent: &NodeId, kind: NodeKind, alias: &str, title: &str) -> NodeId {
        let id = self
            .session
            .create_node(kind, None)
            .expect("Failed to create node");
        self.session
            .append_child(parent, &id)
            .expect("Failed to append node");
        self.session
            .set_aliases(&id, &[alias.to_string()])
            .expect("Failed to set alias");
        self.session
            .set_title(&id, Some(title), None)
            .expect("Failed to set title");
        id
    }

    /// Appends a group.
    pub fn group(&mut self, parent: &NodeId, alias: &str, title: &str) -> NodeId {
        self.node(parent, NodeKind::Group, alias, title)
    }

    /// Appends a content node with original content.
    pub fn content(
        &mut self,
        parent: &NodeId,
        kind: NodeKind,
        alias: &str,
        title: &str,
        bytes: &[u8],
    ) -> NodeId {
        let id = self.node(parent, kind, alias, title);
        self.session
            .set_content_bytes(&id, None, bytes)
            .expect("Failed to set content");
        id
    }

    /// Sets a title and, for content nodes, content in `lang`.
    pub fn translate(&mut self, id: &NodeId, lang: &str, title: &str, bytes: Option<&[u8]>) {
        self.session
            .set_title(id, Some(title), Some(lang))
            .expect("Failed to set translated title");
        if let Some(bytes) = bytes {
            self.session
                .set_content_bytes(id, Some(lang), bytes)
                .expect("Failed to set translated content");
        }
    }

    /// Sets an attribute in the original language.
    pub fn attribute(&mut self, id: &NodeId, name: &str, value: &str) {
        self.session
            .set_attribute(id, name, Some(value), None)
            .expect("Failed to set attribute");
    }

    /// Gives access to the wrapped session.
    pub fn session(&mut self) -> &mut dyn DocStoreSession {
        &mut *self.session
    }
}

/// Fills the open version with a small manual.
///
/// ```text
/// root
/// ├── guide (group, de)
/// │   ├── intro (xml, de)
/// │   └── logo (image)
/// └── appendix (group)
///     ├── data (file)
///     └── see-intro (reference to intro)
/// ```
///
/// Seven nodes including the root.
pub fn sample_manual(session: &mut dyn DocStoreSession) {
    let mut b = TreeBuilder::new(session);
    let root = b.root();

    let guide = b.group(&root, "guide", "User Guide");
    b.translate(&guide, "de", "Benutzerhandbuch", None);
    let intro = b.content(&guide, NodeKind::XmlDoc, "intro", "Introduction", b"<doc>intro</doc>");
    b.attribute(&intro, "audience", "admin");
    b.translate(&intro, "de", "Einleitung", Some(b"<doc>einleitung</doc>"));
    b.session()
        .set_content_type(&intro, Some("text/xml"), None)
        .expect("Failed to set content type");
    let logo = b.content(&guide, NodeKind::Image, "logo", "Logo", &[0x89, b'P', b'N', b'G', 0, 1, 2, 3]);
    b.session()
        .set_file_extension(&logo, Some("png"), None)
        .expect("Failed to set file extension");

    let appendix = b.group(&root, "appendix", "Appendix");
    let data = b.content(&appendix, NodeKind::File, "data", "Data", b"a,b\n1,2\n");
    b.session()
        .set_file_extension(&data, Some("csv"), None)
        .expect("Failed to set file extension");
    let reference = b.node(&appendix, NodeKind::Reference, "see-intro", "See introduction");
    b.session()
        .set_target_alias(&reference, Some("intro"))
        .expect("Failed to set target alias");
}

/// Adds a store with version `1.0` (sample manual, original and `de`
/// released, one image rendition) and a derived draft `1.1` with an extra
/// node below `appendix`.
pub fn seed_released_store(backend: &MemoryBackend, store: &str) {
    let v10 = version("1.0");
    let v11 = version("1.1");
    let mut s = backend.session("fixture");
    s.create_doc_store(store, &[("owner".into(), Some("docs".into()))])
        .expect("Failed to create store");
    s.create_version(store, None, &v10)
        .expect("Failed to create version");
    s.set_version_property(store, &v10, "product", Some("widget"))
        .expect("Failed to set version property");
    s.open_doc_store(store, &v10).expect("Failed to open store");
    sample_manual(&mut s);
    s.add_image_rendition(&ImageRendition::new("thumb", ImageFormat::Png, 64, 64).expect("Invalid rendition"))
        .expect("Failed to add rendition");
    s.close_doc_store().expect("Failed to close store");
    s.set_version_state_in(store, &v10, None, VersionState::Released)
        .expect("Failed to release version");
    s.set_version_state_in(store, &v10, Some("de"), VersionState::Released)
        .expect("Failed to release translation");

    s.create_version(store, Some(&v10), &v11)
        .expect("Failed to derive version");
    s.open_doc_store(store, &v11).expect("Failed to open store");
    let appendix = s.node_id_by_alias("appendix").expect("Missing appendix");
    let mut b = TreeBuilder::new(&mut s);
    b.content(&appendix, NodeKind::XmlDoc, "changes", "Changes", b"<doc>changes</doc>");
    s.close_doc_store().expect("Failed to close store");
}

/// A fresh backend holding [`seed_released_store`].
pub fn released_store(store: &str) -> MemoryBackend {
    let backend = MemoryBackend::default();
    seed_released_store(&backend, store);
    backend
}

/// A JSON snapshot file in a temporary directory.
pub struct TempSnapshot {
    path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TempSnapshot {
    /// Reserves a snapshot path without writing it.
    pub fn empty() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            path: temp_dir.path().join("repository.json"),
            _temp_dir: temp_dir,
        }
    }

    /// Writes the committed state of `backend`.
    pub fn write(backend: &MemoryBackend) -> Self {
        let snapshot = Self::empty();
        let json = backend.to_json().expect("Failed to serialize snapshot");
        std::fs::write(&snapshot.path, json).expect("Failed to write snapshot");
        snapshot
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot into a new backend.
    pub fn load(&self) -> MemoryBackend {
        let json = std::fs::read_to_string(&self.path).expect("Failed to read snapshot");
        MemoryBackend::from_json(&json, MemoryConfig::default()).expect("Malformed snapshot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_store_has_two_versions() {
        let backend = released_store("manual");
        let s = backend.session("reader");
        assert_eq!(s.list_versions("manual").unwrap(), vec![version("1.0"), version("1.1")]);
        assert_eq!(
            s.version_state_in("manual", &version("1.0"), Some("de")).unwrap(),
            VersionState::Released
        );
        assert_eq!(
            s.version_state_in("manual", &version("1.1"), None).unwrap(),
            VersionState::Draft
        );
        let repo = backend.snapshot();
        assert_eq!(repo.node_count("manual", &version("1.0")), Some(7));
        assert_eq!(repo.node_count("manual", &version("1.1")), Some(8));
    }

    #[test]
    fn snapshot_round_trips_through_file() {
        let backend = released_store("manual");
        let snapshot = TempSnapshot::write(&backend);
        let loaded = snapshot.load();
        assert_eq!(loaded.to_json().unwrap(), backend.to_json().unwrap());
    }
}
