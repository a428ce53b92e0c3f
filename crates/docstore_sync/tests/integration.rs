//! Integration tests for node copy, tree sync, whole-store copy and verify.

use std::collections::BTreeSet;

use docstore_core::{
    DefaultProgress, DocStoreSession, LogLevel, MemoryBackend, MemoryConfig, MemorySession,
    NodeId, ProgressCallback, VersionId, VersionState,
};
use docstore_sync::{
    NodeCopier, NodeSync, NodeSyncOptions, StoreCopier, StoreCopyOptions, SyncConfig, Verifier,
};
use docstore_testkit::prelude::*;
use proptest::prelude::*;

fn copy_store(backend: &MemoryBackend, from: &str, to: &str, options: &StoreCopyOptions) -> docstore_sync::StoreCopyReport {
    let mut source = backend.session("copier");
    let mut target = backend.session("copier");
    StoreCopier::default()
        .copy_doc_store(&mut source, from, &mut target, to, options, &DefaultProgress::new())
        .unwrap()
}

fn open(backend: &MemoryBackend, store: &str, v: &str) -> MemorySession {
    let mut s = backend.session("reader");
    s.open_doc_store(store, &version(v)).unwrap();
    s
}

fn node(session: &MemorySession, alias: &str) -> NodeId {
    session.node_id_by_alias(alias).unwrap()
}

#[test]
fn copied_store_verifies_clean() {
    let backend = released_store("manual");
    let report = copy_store(&backend, "manual", "copy", &StoreCopyOptions::new().with_verify(true));

    assert_eq!(report.versions.len(), 2);
    assert_eq!(report.verify_errors(), 0);
    assert_eq!(report.copied_nodes(), 15);
    for stats in report.versions.values() {
        assert_eq!(stats.copied_translations, vec!["de".to_string()]);
    }

    let target = open(&backend, "copy", "1.1");
    let changes = node(&target, "changes");
    assert_eq!(target.content_bytes(&changes, None).unwrap().unwrap(), b"<doc>changes</doc>");
    assert_eq!(
        target.version_state_in("copy", &version("1.1"), Some("de")).unwrap(),
        VersionState::Draft
    );
}

#[test]
fn node_ids_survive_the_copy() {
    let backend = released_store("manual");
    copy_store(&backend, "manual", "copy", &StoreCopyOptions::new());
    let source = open(&backend, "manual", "1.0");
    let target = open(&backend, "copy", "1.0");
    for alias in ["guide", "intro", "logo", "appendix", "data", "see-intro"] {
        assert_eq!(node(&source, alias), node(&target, alias), "{alias}");
    }
    assert_eq!(target.target_alias(&node(&target, "see-intro")).as_deref(), Some("intro"));
}

#[test]
fn resync_of_identical_tree_writes_nothing() {
    let backend = released_store("manual");
    copy_store(&backend, "manual", "copy", &StoreCopyOptions::new());

    let source = open(&backend, "manual", "1.1");
    let mut target = open(&backend, "copy", "1.1");
    let target_root = target.root().unwrap();
    let writes = backend.write_count();
    let count = NodeSync::default()
        .sync_tree(&source, &source.root().unwrap(), &mut target, &target_root, None)
        .unwrap();
    assert_eq!(count, 8);
    assert_eq!(backend.write_count(), writes);
}

#[test]
fn edited_draft_is_resynchronized() {
    let backend = released_store("manual");
    copy_store(&backend, "manual", "copy", &StoreCopyOptions::new());

    let mut author = open(&backend, "manual", "1.1");
    let intro = node(&author, "intro");
    let logo = node(&author, "logo");
    let guide = node(&author, "guide");
    author.set_title(&intro, Some("Welcome"), None).unwrap();
    author.set_content_bytes(&intro, Some("de"), b"<doc>willkommen</doc>").unwrap();
    author.remove_child(&guide, &logo).unwrap();

    let mut target = open(&backend, "copy", "1.1");
    let target_root = target.root().unwrap();
    NodeSync::default()
        .sync_tree(&author, &author.root().unwrap(), &mut target, &target_root, None)
        .unwrap();
    assert_eq!(target.title_lang(&intro, None).as_deref(), Some("Welcome"));
    assert!(target.node_id_by_alias("logo").is_none());
    target.close_doc_store().unwrap();
    author.close_doc_store().unwrap();

    let mut source = backend.session("verifier");
    let mut target = backend.session("verifier");
    let progress = DefaultProgress::new();
    let stats = Verifier::default().verify_store_version(
        &mut source,
        "manual",
        &mut target,
        "copy",
        &version("1.1"),
        true,
        &progress,
    );
    assert_eq!(stats.verify_errors, 0, "{:?}", progress.messages(false, false, true));
}

#[test]
fn translation_promoted_to_original() {
    let backend = released_store("manual");
    let options = StoreCopyOptions::new()
        .with_versions(vec![version("1.0")])
        .with_trans_as_orig("de");
    let report = copy_store(&backend, "manual", "german", &options);
    assert!(report.versions[&version("1.0")].copied_translations.is_empty());

    let target = open(&backend, "german", "1.0");
    assert_eq!(target.title_lang(&node(&target, "guide"), None).as_deref(), Some("Benutzerhandbuch"));
    assert_eq!(target.title_lang(&node(&target, "logo"), None).as_deref(), Some("Logo"));
    assert_eq!(
        target.content_bytes(&node(&target, "intro"), None).unwrap().unwrap(),
        b"<doc>einleitung</doc>"
    );
    assert!(target.translations(&node(&target, "intro")).is_empty());
}

#[test]
fn original_demoted_to_translation() {
    let backend = released_store("manual");
    let options = StoreCopyOptions::new()
        .with_versions(vec![version("1.0")])
        .with_translations(Vec::new())
        .with_orig_as_trans("en");
    copy_store(&backend, "manual", "bilingual", &options);

    let target = open(&backend, "bilingual", "1.0");
    let intro = node(&target, "intro");
    assert_eq!(target.title_lang(&intro, Some("en")).as_deref(), Some("Introduction"));
    assert_eq!(target.title_lang(&intro, None).as_deref(), Some("Introduction"));
    assert!(!target.has_translation(&intro, "de"));
    assert_eq!(
        target.version_state_in("bilingual", &version("1.0"), Some("en")).unwrap(),
        VersionState::Released
    );
}

#[test]
fn db_target_copy_verifies_clean() {
    let backend = MemoryBackend::new(MemoryConfig::new().db_store(true));
    seed_released_store(&backend, "manual");
    let report = copy_store(&backend, "manual", "copy", &StoreCopyOptions::new().with_verify(true));
    assert_eq!(report.verify_errors(), 0);
}

#[test]
fn copied_subtree_gets_fresh_aliases() {
    let backend = released_store("manual");
    let mut other = backend.session("author");
    other.create_doc_store("other", &[]).unwrap();
    other.create_version("other", None, &version("1.0")).unwrap();
    other.open_doc_store("other", &version("1.0")).unwrap();
    sample_manual(&mut other);

    let mut source = open(&backend, "manual", "1.0");
    let guide = node(&source, "guide");
    let root = other.root().unwrap();
    let mut copier = NodeCopier::default();
    let count = copier
        .copy_nodes_to_position(&mut source, &[guide], &mut other, &root, None)
        .unwrap();
    assert_eq!(count, 3);
    assert_eq!(copier.alias_map().get("guide").map(String::as_str), Some("guide_2"));
    assert_eq!(copier.alias_map().get("intro").map(String::as_str), Some("intro_2"));

    let copied = other.node_id_by_alias("intro_2").unwrap();
    assert_eq!(other.title_lang(&copied, Some("de")).as_deref(), Some("Einleitung"));
    assert_eq!(other.node_id_by_alias("intro"), Some(node(&other, "intro")));
    assert_ne!(node(&other, "intro"), copied);
}

/// Cancels as soon as a given message key shows up.
struct CancelOn {
    inner: DefaultProgress,
    key: &'static str,
    arg: &'static str,
}

impl ProgressCallback for CancelOn {
    fn start_work(&self, steps_total: usize) {
        self.inner.start_work(steps_total);
    }
    fn finish_work(&self) {
        self.inner.finish_work();
    }
    fn set_steps_total(&self, steps_total: usize) {
        self.inner.set_steps_total(steps_total);
    }
    fn step_finished(&self) {
        self.inner.step_finished();
    }
    fn set_finished(&self) {
        self.inner.set_finished();
    }
    fn set_percent(&self, percent: u32) {
        self.inner.set_percent(percent);
    }
    fn percent(&self) -> u32 {
        self.inner.percent()
    }
    fn set_message(&self, key: &str, args: Vec<String>) {
        if key == self.key && args.first().map(String::as_str) == Some(self.arg) {
            self.inner.cancel();
        }
        self.inner.set_message(key, args);
    }
    fn log(&self, level: LogLevel, key: &str, args: Vec<String>) {
        self.inner.log(level, key, args);
    }
    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
    fn cancel(&self) {
        self.inner.cancel();
    }
}

#[test]
fn cancelling_mid_copy_keeps_finished_versions() {
    let backend = released_store("manual");
    let mut source = backend.session("copier");
    let mut target = backend.session("copier");
    let progress = CancelOn {
        inner: DefaultProgress::new(),
        key: "text.copy_store_version",
        arg: "1.1",
    };
    let err = StoreCopier::new(SyncConfig::default())
        .copy_doc_store(&mut source, "manual", &mut target, "copy", &StoreCopyOptions::new(), &progress)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(target.list_versions("copy").unwrap().contains(&version("1.0")));
    assert_eq!(progress.inner.work_depth(), 0);

    let stats = Verifier::default().verify_store_version(
        &mut source,
        "manual",
        &mut target,
        "copy",
        &version("1.0"),
        true,
        &DefaultProgress::new(),
    );
    assert_eq!(stats.verify_errors, 0);
}

fn single_version(backend: &MemoryBackend, store: &str, specs: &[NodeSpec]) {
    let mut s = backend.session("author");
    s.create_doc_store(store, &[]).unwrap();
    s.create_version(store, None, &version("1.0")).unwrap();
    s.open_doc_store(store, &version("1.0")).unwrap();
    let root = s.root().unwrap();
    build_tree(&mut s, &root, specs);
    s.close_doc_store().unwrap();
}

fn aliases_below(session: &MemorySession) -> Vec<String> {
    let root = session.root().unwrap();
    descendants(session, &root)
        .iter()
        .flat_map(|n| session.aliases(n))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn copy_then_verify_finds_no_differences(specs in tree_strategy()) {
        let backend = MemoryBackend::default();
        single_version(&backend, "src", &specs);
        let report = copy_store(&backend, "src", "dst", &StoreCopyOptions::new().with_verify(true));
        prop_assert_eq!(report.verify_errors(), 0);
    }

    #[test]
    fn sync_after_copy_is_idempotent(specs in tree_strategy()) {
        let backend = MemoryBackend::default();
        single_version(&backend, "src", &specs);
        copy_store(&backend, "src", "dst", &StoreCopyOptions::new());

        let source = open(&backend, "src", "1.0");
        let mut target = open(&backend, "dst", "1.0");
        let target_root = target.root().unwrap();
        let writes = backend.write_count();
        NodeSync::new(SyncConfig::default(), NodeSyncOptions::new())
            .sync_tree(&source, &source.root().unwrap(), &mut target, &target_root, None)
            .unwrap();
        prop_assert_eq!(backend.write_count(), writes);
    }

    #[test]
    fn sync_follows_random_edits(specs in tree_strategy(), edits in edits_strategy()) {
        let backend = MemoryBackend::default();
        single_version(&backend, "src", &specs);
        copy_store(&backend, "src", "dst", &StoreCopyOptions::new());

        let mut author = open(&backend, "src", "1.0");
        let root = author.root().unwrap();
        apply_edits(&mut author, &root, &edits);

        let mut target = open(&backend, "dst", "1.0");
        let target_root = target.root().unwrap();
        let count = NodeSync::default()
            .sync_tree(&author, &root, &mut target, &target_root, None)
            .unwrap();
        prop_assert_eq!(count, 1 + descendants(&author, &root).len());
        prop_assert_eq!(
            descendants(&target, &target.root().unwrap()),
            descendants(&author, &root)
        );
        author.close_doc_store().unwrap();
        target.close_doc_store().unwrap();

        let mut source = backend.session("verifier");
        let mut target = backend.session("verifier");
        let stats = Verifier::default().verify_store_version(
            &mut source, "src", &mut target, "dst", &version("1.0"), true, &DefaultProgress::new(),
        );
        prop_assert_eq!(stats.verify_errors, 0);
    }

    #[test]
    fn repeated_copies_keep_aliases_unique(specs in tree_strategy()) {
        let backend = MemoryBackend::default();
        single_version(&backend, "src", &specs);
        single_version(&backend, "dst", &specs);

        let mut source = open(&backend, "src", "1.0");
        let mut target = open(&backend, "dst", "1.0");
        let top = source.child_nodes(&source.root().unwrap()).unwrap();
        let root = target.root().unwrap();
        for _ in 0..2 {
            NodeCopier::default()
                .copy_nodes_to_position(&mut source, &top, &mut target, &root, None)
                .unwrap();
        }
        let aliases = aliases_below(&target);
        let unique: BTreeSet<&String> = aliases.iter().collect();
        prop_assert_eq!(unique.len(), aliases.len());
    }
}

#[test]
fn verify_reports_a_changed_version() {
    let backend = released_store("manual");
    copy_store(&backend, "manual", "copy", &StoreCopyOptions::new());
    let mut editor = backend.session("editor");
    editor.set_version_property("copy", &version("1.1"), "product", Some("gadget")).unwrap();
    editor.open_doc_store("copy", &version("1.1")).unwrap();
    let data = editor.node_id_by_alias("data").unwrap();
    editor.set_content_bytes(&data, None, b"a,b\n1,2,3\n").unwrap();
    editor.close_doc_store().unwrap();

    let mut source = backend.session("verifier");
    let mut target = backend.session("verifier");
    let progress = DefaultProgress::new();
    let stats = Verifier::default().verify_store_version(
        &mut source,
        "manual",
        &mut target,
        "copy",
        &VersionId::parse("1.1").unwrap(),
        true,
        &progress,
    );
    // property and content length are compared per language; untranslated
    // content falls back to the original in the `de` pass
    assert_eq!(stats.verify_errors, 4);
    assert_eq!(progress.error_count(), 4);
    let length_errors = progress
        .messages(false, false, true)
        .iter()
        .filter(|m| m.key == "text.copy_store_content_length_differs")
        .count();
    assert_eq!(length_errors, 2);
}
