//! Read-only comparison of a copied version with its source.
//!
//! Verification never fails on a difference. Every difference is counted in
//! [`CopyVersionStats::verify_errors`] and logged to the progress sink until
//! [`SyncConfig::max_verify_errors`] is reached; the final count is the
//! pass/fail signal.

use docstore_core::{
    check_cancelled, msg_args, CoreError, DocStoreSession, LogLevel, NodeId, ProgressCallback,
    TranslationScope, VersionId,
};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::store_copy::CopyVersionStats;
use crate::sync::{translation_languages_recursive, with_work_level};

const MAX_LOGGED_VALUE: usize = 80;

fn log_value(value: Option<&str>) -> String {
    match value {
        None => "null".to_string(),
        Some(v) if v.chars().count() <= MAX_LOGGED_VALUE => v.to_string(),
        Some(v) => format!("{}...", v.chars().take(MAX_LOGGED_VALUE).collect::<String>()),
    }
}

/// Closes the open store of `session`, logging instead of failing.
pub(crate) fn close_silently(session: &mut dyn DocStoreSession, role: &str) {
    if session.store_id().is_none() {
        return;
    }
    if let Err(e) = session.close_doc_store() {
        tracing::warn!(role, error = %e, "closing of store failed");
    }
}

/// Counts the nodes of a subtree, `node` included.
pub(crate) fn count_nodes(session: &dyn DocStoreSession, node: &NodeId) -> SyncResult<usize> {
    let mut count = 1;
    if session.node_kind(node).is_some_and(|k| k.is_group()) {
        for child in session.child_nodes(node)? {
            count += count_nodes(session, &child)?;
        }
    }
    Ok(count)
}

/// Translation languages and node count of a version's tree.
fn scan_version(
    session: &mut dyn DocStoreSession,
    store_id: &str,
    version: &VersionId,
) -> SyncResult<(Vec<String>, usize)> {
    session.open_doc_store(store_id, version)?;
    let root = session.root()?;
    let languages = translation_languages_recursive(&*session, &root)?;
    Ok((languages.into_iter().collect(), count_nodes(&*session, &root)?))
}

/// Structural and content comparison of source and target versions.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: SyncConfig,
}

impl Verifier {
    /// Creates a verifier.
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Verifies `version` of `target_store` against the same version of
    /// `source_store`, in the original language and in every language of
    /// `stats.copied_translations`.
    ///
    /// Both sessions end up with no store open. Differences and failures
    /// are added to `stats.verify_errors`; a cancellation stops the run
    /// without counting an error.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_version(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        version: &VersionId,
        stats: &mut CopyVersionStats,
        extended: bool,
        progress: &dyn ProgressCallback,
    ) {
        if target.translation_mode().is_some() {
            target.leave_translation_mode();
            tracing::warn!("unexpected translation mode in target session, leaving translation mode");
        }
        if source.translation_mode().is_some() {
            source.leave_translation_mode();
            tracing::warn!("unexpected translation mode in source session, leaving translation mode");
        }

        progress.start_work(1 + stats.copied_translations.len());
        let result = self.verify_languages(
            source,
            source_store,
            target,
            target_store,
            version,
            stats,
            extended,
            progress,
        );
        if let Err(e) = result {
            if !progress.is_cancelled() {
                progress.log_error("text.copy_store_verify_version_failed", msg_args![version, e]);
                stats.verify_errors += 1;
            }
        }
        progress.finish_work();
        close_silently(source, "source");
        close_silently(target, "target");

        if progress.is_cancelled() {
            return;
        }
        if stats.verify_errors == 0 {
            progress.log_info("text.copy_store_verify_finished_success", msg_args![version]);
        } else {
            progress.log_info(
                "text.copy_store_verify_finished_error",
                msg_args![version, stats.verify_errors],
            );
        }
        tracing::info!(%version, errors = stats.verify_errors, "version verified");
    }

    /// Verifies one version with every translation found in the source
    /// tree. Used when no copy statistics are at hand.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_store_version(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        version: &VersionId,
        extended: bool,
        progress: &dyn ProgressCallback,
    ) -> CopyVersionStats {
        let mut stats = CopyVersionStats::default();
        match scan_version(source, source_store, version) {
            Ok((languages, nodes)) => {
                stats.copied_translations = languages;
                stats.copied_nodes = nodes;
            }
            Err(e) => {
                progress.log_error("text.copy_store_verify_version_failed", msg_args![version, e]);
                stats.verify_errors += 1;
                close_silently(source, "source");
                return stats;
            }
        }
        self.verify_version(
            source,
            source_store,
            target,
            target_store,
            version,
            &mut stats,
            extended,
            progress,
        );
        stats
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_languages(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        version: &VersionId,
        stats: &mut CopyVersionStats,
        extended: bool,
        progress: &dyn ProgressCallback,
    ) -> SyncResult<()> {
        source.open_doc_store(source_store, version)?;
        target.open_doc_store(target_store, version)?;

        progress.set_message("text.copy_store_verify_version", msg_args![version, "original"]);
        self.verify_version_lang(source, target, None, extended, progress, stats)?;
        progress.step_finished();

        for lang in stats.copied_translations.clone() {
            progress.set_message(
                "text.copy_store_verify_version",
                msg_args![version, lang.to_uppercase()],
            );
            self.verify_version_lang(source, target, Some(lang.as_str()), extended, progress, stats)?;
            progress.step_finished();
        }
        Ok(())
    }

    fn verify_version_lang(
        &self,
        source: &mut dyn DocStoreSession,
        target: &mut dyn DocStoreSession,
        lang: Option<&str>,
        extended: bool,
        progress: &dyn ProgressCallback,
        stats: &mut CopyVersionStats,
    ) -> SyncResult<()> {
        let source = TranslationScope::enter(source, lang);
        let target = TranslationScope::enter(target, lang);
        let source_store = source.store_id().ok_or(CoreError::NoStoreOpen)?.to_string();
        let target_store = target.store_id().ok_or(CoreError::NoStoreOpen)?.to_string();
        let version = target.version_id().cloned().ok_or(CoreError::NoStoreOpen)?;
        let source_root = source.root()?;
        let target_root = target.root()?;

        let steps = (stats.copied_nodes / self.config.verify_progress_increment).max(1);
        with_work_level(Some(progress), steps, || -> SyncResult<()> {
            self.verify_node(&*source, &source_root, &*target, &target_root, extended, progress, stats, 0)?;
            if stats.verify_errors > self.config.max_verify_errors {
                progress.log_info(
                    "text.copy_store_verify_exceeded_max_errors",
                    msg_args![self.config.max_verify_errors, stats.verify_errors],
                );
            }
            Ok(())
        })?;

        self.verify_version_properties(&*source, &source_store, &*target, &target_store, &version, stats, progress)
    }

    /// Compares the user-visible version properties.
    ///
    /// Both values are read through the target session, which therefore has
    /// to see the source store as well.
    #[allow(clippy::too_many_arguments)]
    fn verify_version_properties(
        &self,
        source: &dyn DocStoreSession,
        source_store: &str,
        target: &dyn DocStoreSession,
        target_store: &str,
        version: &VersionId,
        stats: &mut CopyVersionStats,
        progress: &dyn ProgressCallback,
    ) -> SyncResult<()> {
        let target_names = target.version_property_names(target_store, version)?;
        let source_names = source.version_property_names(source_store, version)?;
        if source_names.len() != target_names.len() {
            tracing::debug!(%version, source = source_names.len(), target = target_names.len(), "version property count differs");
        }

        for name in &target_names {
            let target_value = target.version_property(target_store, version, name);
            let source_value = target.version_property(source_store, version, name);
            if target_value == source_value {
                continue;
            }
            if target_value.is_none() && source_value.as_deref() == Some("") {
                tracing::debug!(%version, property = %name, "empty version property removed");
            } else {
                progress.log_error("text.copy_store_version_property_differs", msg_args![version, name]);
                stats.verify_errors += 1;
            }
        }

        for name in source_names.iter().filter(|n| !target_names.contains(n)) {
            match target.version_property(source_store, version, name).as_deref() {
                None | Some("") => {
                    tracing::debug!(%version, property = %name, "empty version property removed");
                }
                Some(_) => {
                    progress.log_error("text.copy_store_version_property_removed", msg_args![version, name]);
                    stats.verify_errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Verifies one node pair and, for groups, their children by position.
    /// Returns the running node count.
    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        source: &dyn DocStoreSession,
        source_node: &NodeId,
        target: &dyn DocStoreSession,
        target_node: &NodeId,
        extended: bool,
        progress: &dyn ProgressCallback,
        stats: &mut CopyVersionStats,
        node_count: usize,
    ) -> SyncResult<usize> {
        check_cancelled(Some(progress))?;
        let report = |stats: &mut CopyVersionStats, level: LogLevel, key: &str, args: Vec<String>| {
            stats.verify_errors += 1;
            if stats.verify_errors <= self.config.max_verify_errors {
                progress.log(level, key, args);
            }
        };

        if source_node != target_node {
            report(stats, LogLevel::Warning, "text.copy_store_node_ids_differ", msg_args![source_node, target_node]);
        }

        let source_kind = source.node_kind(source_node);
        let target_kind = target.node_kind(target_node);
        match (source_kind, target_kind) {
            (Some(s), Some(t)) if s == t => {}
            (Some(s), Some(t)) => report(
                stats,
                LogLevel::Error,
                "text.copy_store_node_types_differ",
                msg_args![source_node, s, t],
            ),
            (s, _) => report(
                stats,
                LogLevel::Error,
                "text.copy_store_unknown_node_type",
                msg_args![source_node, s.map_or("none", |k| k.as_str())],
            ),
        }

        let source_alias = source.alias(source_node);
        let target_alias = target.alias(target_node);
        if source_alias != target_alias {
            report(
                stats,
                LogLevel::Error,
                "text.copy_store_node_aliases_differ",
                msg_args![source_node, log_value(source_alias.as_deref()), log_value(target_alias.as_deref())],
            );
        }
        let source_aliases = source.aliases(source_node);
        let target_aliases = target.aliases(target_node);
        if source_aliases != target_aliases {
            report(
                stats,
                LogLevel::Error,
                "text.copy_store_node_aliases_differ",
                msg_args![source_node, source_aliases.join(","), target_aliases.join(",")],
            );
        }

        if extended {
            let source_title = source.title(source_node);
            let target_title = target.title(target_node);
            if source_title != target_title {
                report(
                    stats,
                    LogLevel::Error,
                    "text.copy_store_node_titles_differ",
                    msg_args![source_node, log_value(source_title.as_deref()), log_value(target_title.as_deref())],
                );
            }

            let mut source_attrs = source.attributes(source_node);
            for (name, target_value) in target.attributes(target_node) {
                match source_attrs.remove(&name) {
                    Some(v) if v == target_value => {}
                    None if target_value.is_empty() => progress.log_info(
                        "text.copy_store_node_empty_attribute_removed",
                        msg_args![source_node, name],
                    ),
                    source_value => report(
                        stats,
                        LogLevel::Error,
                        "text.copy_store_node_attributes_differ",
                        msg_args![source_node, name, log_value(source_value.as_deref()), log_value(Some(target_value.as_str()))],
                    ),
                }
            }
            for (name, source_value) in source_attrs {
                if source_value.is_empty() {
                    progress.log_info("text.copy_store_node_empty_attribute_removed", msg_args![source_node, name]);
                } else {
                    report(
                        stats,
                        LogLevel::Error,
                        "text.copy_store_node_attribute_removed",
                        msg_args![source_node, name, log_value(Some(source_value.as_str()))],
                    );
                }
            }

            let both_content = source_kind.is_some_and(|k| k.is_content()) && target_kind.is_some_and(|k| k.is_content());
            if both_content {
                let source_len = source.content_length(source_node);
                let target_len = target.content_length(target_node);
                if source_len != target_len {
                    report(
                        stats,
                        LogLevel::Error,
                        "text.copy_store_content_length_differs",
                        msg_args![source_node, source_len, target_len],
                    );
                }
                let source_type = source.content_type(source_node);
                let target_type = target.content_type(target_node);
                if source_type != target_type {
                    report(
                        stats,
                        LogLevel::Error,
                        "text.copy_store_content_types_differ",
                        msg_args![source_node, log_value(source_type.as_deref()), log_value(target_type.as_deref())],
                    );
                }
                let source_ext = source.file_extension(source_node);
                let target_ext = target.file_extension(target_node);
                if source_ext != target_ext {
                    report(
                        stats,
                        LogLevel::Error,
                        "text.copy_store_file_ext_differ",
                        msg_args![source_node, log_value(source_ext.as_deref()), log_value(target_ext.as_deref())],
                    );
                }
            }
        }

        let mut node_count = node_count + 1;
        if node_count % self.config.verify_progress_increment == 0 {
            progress.step_finished();
        }

        let both_groups = source_kind.is_some_and(|k| k.is_group()) && target_kind.is_some_and(|k| k.is_group());
        if both_groups {
            let source_children = source.child_nodes(source_node)?;
            let target_children = target.child_nodes(target_node)?;
            if source_children.len() != target_children.len() {
                report(
                    stats,
                    LogLevel::Error,
                    "text.copy_store_child_count_differs",
                    msg_args![source_node, source_children.len(), target_children.len()],
                );
            }
            for (s, t) in source_children.iter().zip(&target_children) {
                node_count = self.verify_node(source, s, target, t, extended, progress, stats, node_count)?;
            }
        }
        Ok(node_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::{DefaultProgress, MemoryBackend, MemorySession, NodeKind};

    fn stores(backend: &MemoryBackend) -> (MemorySession, MemorySession, VersionId) {
        let v = VersionId::parse("1.0").unwrap();
        let mut source = backend.session("source");
        let mut target = backend.session("target");
        for (s, store) in [(&mut source, "a"), (&mut target, "b")] {
            s.create_doc_store(store, &[]).unwrap();
            s.create_version(store, None, &v).unwrap();
        }
        (source, target, v)
    }

    fn build(s: &mut MemorySession, store: &str, v: &VersionId, title: &str, attr: Option<&str>) {
        s.open_doc_store(store, v).unwrap();
        let root = s.root().unwrap();
        let doc = s.create_node(NodeKind::XmlDoc, Some(&NodeId::new("10"))).unwrap();
        s.append_child(&root, &doc).unwrap();
        s.set_aliases(&doc, &["intro".into()]).unwrap();
        s.set_title(&doc, Some(title), None).unwrap();
        s.set_title(&doc, Some("Einleitung"), Some("de")).unwrap();
        if let Some(value) = attr {
            s.set_attribute(&doc, "color", Some(value), None).unwrap();
        }
        s.set_content_bytes(&doc, None, b"<p/>").unwrap();
        s.close_doc_store().unwrap();
    }

    fn stats_with(langs: &[&str]) -> CopyVersionStats {
        CopyVersionStats {
            copied_translations: langs.iter().map(|l| l.to_string()).collect(),
            copied_nodes: 2,
            verify_errors: 0,
        }
    }

    #[test]
    fn identical_versions_verify_clean() {
        let backend = MemoryBackend::default();
        let (mut source, mut target, v) = stores(&backend);
        build(&mut source, "a", &v, "Intro", Some("red"));
        build(&mut target, "b", &v, "Intro", Some("red"));

        let progress = DefaultProgress::new();
        let mut stats = stats_with(&["de"]);
        Verifier::default().verify_version(&mut source, "a", &mut target, "b", &v, &mut stats, true, &progress);

        assert_eq!(stats.verify_errors, 0, "{:?}", progress.messages(false, true, true));
        assert!(source.store_id().is_none());
        assert!(target.store_id().is_none());
        assert_eq!(progress.work_depth(), 0);
    }

    #[test]
    fn differences_are_counted() {
        let backend = MemoryBackend::default();
        let (mut source, mut target, v) = stores(&backend);
        build(&mut source, "a", &v, "Intro", Some("red"));
        build(&mut target, "b", &v, "Overview", Some("blue"));

        let progress = DefaultProgress::new();
        let mut stats = stats_with(&[]);
        Verifier::default().verify_version(&mut source, "a", &mut target, "b", &v, &mut stats, true, &progress);
        assert_eq!(stats.verify_errors, 2);

        let mut shallow = stats_with(&[]);
        Verifier::default().verify_version(&mut source, "a", &mut target, "b", &v, &mut shallow, false, &progress);
        assert_eq!(shallow.verify_errors, 0);
    }

    #[test]
    fn empty_attribute_is_tolerated() {
        let backend = MemoryBackend::default();
        let (mut source, mut target, v) = stores(&backend);
        build(&mut source, "a", &v, "Intro", Some(""));
        build(&mut target, "b", &v, "Intro", None);

        let progress = DefaultProgress::new();
        let mut stats = stats_with(&[]);
        Verifier::default().verify_version(&mut source, "a", &mut target, "b", &v, &mut stats, true, &progress);
        assert_eq!(stats.verify_errors, 0);
        assert!(progress
            .messages(true, false, false)
            .iter()
            .any(|m| m.key == "text.copy_store_node_empty_attribute_removed"));
    }

    #[test]
    fn logged_errors_are_capped() {
        let backend = MemoryBackend::default();
        let (mut source, mut target, v) = stores(&backend);
        for (s, store) in [(&mut source, "a"), (&mut target, "b")] {
            s.open_doc_store(store, &v).unwrap();
            let root = s.root().unwrap();
            for _ in 0..5 {
                let n = s.create_node(NodeKind::File, None).unwrap();
                s.append_child(&root, &n).unwrap();
            }
            if store == "b" {
                for n in s.child_nodes(&root).unwrap() {
                    s.set_title(&n, Some("changed"), None).unwrap();
                }
            }
            s.close_doc_store().unwrap();
        }

        let progress = DefaultProgress::new();
        let mut stats = stats_with(&[]);
        Verifier::new(SyncConfig::new().with_max_verify_errors(2))
            .verify_version(&mut source, "a", &mut target, "b", &v, &mut stats, true, &progress);
        assert_eq!(stats.verify_errors, 5);
        assert_eq!(progress.error_count(), 2);
    }

    #[test]
    fn missing_version_counts_as_failure() {
        let backend = MemoryBackend::default();
        let (mut source, mut target, _) = stores(&backend);
        let progress = DefaultProgress::new();
        let mut stats = stats_with(&[]);
        let missing = VersionId::parse("9.9").unwrap();
        Verifier::default().verify_version(&mut source, "a", &mut target, "b", &missing, &mut stats, true, &progress);
        assert_eq!(stats.verify_errors, 1);
        assert_eq!(progress.messages(false, false, true)[0].key, "text.copy_store_verify_version_failed");
    }

    #[test]
    fn store_version_scan_collects_languages() {
        let backend = MemoryBackend::default();
        let (mut source, mut target, v) = stores(&backend);
        build(&mut source, "a", &v, "Intro", None);
        build(&mut target, "b", &v, "Intro", None);
        let progress = DefaultProgress::new();
        let stats = Verifier::default().verify_store_version(&mut source, "a", &mut target, "b", &v, true, &progress);
        assert_eq!(stats.copied_translations, vec!["de".to_string()]);
        assert_eq!(stats.copied_nodes, 2);
        assert_eq!(stats.verify_errors, 0);
    }

    #[test]
    fn long_values_are_truncated() {
        let long = "x".repeat(100);
        let logged = log_value(Some(&long));
        assert_eq!(logged.len(), 83);
        assert!(logged.ends_with("..."));
        assert_eq!(log_value(None), "null");
    }
}
