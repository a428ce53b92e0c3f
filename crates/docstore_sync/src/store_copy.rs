//! Whole-store copy across a version forest.
//!
//! [`StoreCopier`] walks the source store's versions depth first, starting
//! at the root versions and following derivation links. Each selected
//! version is created in the target (derived from the nearest copied
//! ancestor), its properties replaced, its tree synchronized with
//! [`NodeSync`], its image renditions registered and its per-language state
//! and release date carried over. A failed version is deleted and retried.

use std::collections::{BTreeMap, BTreeSet};

use docstore_core::{
    check_cancelled, msg_args, DocStoreSession, LocalTransaction, ProgressCallback, PropertyUpdate,
    VersionId, VersionState,
};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::sync::{translation_languages_recursive, NodeSync, NodeSyncOptions};
use crate::verify::{close_silently, Verifier};

/// Selection and language remapping for a whole-store copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCopyOptions {
    /// Versions to copy; `None` copies every version.
    pub versions: Option<Vec<VersionId>>,
    /// Translations to copy; `None` copies every translation found in a
    /// version's tree.
    pub translations: Option<Vec<String>>,
    /// Source translation that becomes the target's original language.
    pub trans_as_orig: Option<String>,
    /// Target translation that receives the source's original language.
    pub orig_as_trans: Option<String>,
    /// Store properties of an existing target that are left untouched.
    pub skip_store_properties: BTreeSet<String>,
    /// Verify every version after copying it.
    pub verify: bool,
}

impl StoreCopyOptions {
    /// Creates options that copy everything without verification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies only the given versions.
    #[must_use]
    pub fn with_versions(mut self, versions: Vec<VersionId>) -> Self {
        self.versions = Some(versions);
        self
    }

    /// Copies only the given translations.
    #[must_use]
    pub fn with_translations(mut self, languages: Vec<String>) -> Self {
        self.translations = Some(languages);
        self
    }

    /// Promotes a source translation to the original language.
    #[must_use]
    pub fn with_trans_as_orig(mut self, lang: impl Into<String>) -> Self {
        self.trans_as_orig = Some(lang.into());
        self
    }

    /// Demotes the source's original language to a translation.
    #[must_use]
    pub fn with_orig_as_trans(mut self, lang: impl Into<String>) -> Self {
        self.orig_as_trans = Some(lang.into());
        self
    }

    /// Leaves a store property of an existing target untouched.
    #[must_use]
    pub fn skip_store_property(mut self, name: impl Into<String>) -> Self {
        self.skip_store_properties.insert(name.into());
        self
    }

    /// Enables verification after each version.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Outcome of copying (and optionally verifying) one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyVersionStats {
    /// Translations synchronized for the version.
    pub copied_translations: Vec<String>,
    /// Nodes synchronized in the version tree.
    pub copied_nodes: usize,
    /// Differences found by verification.
    pub verify_errors: usize,
}

/// Outcome of a whole-store copy.
#[derive(Debug, Clone, Default)]
pub struct StoreCopyReport {
    /// Statistics of every copied version.
    pub versions: BTreeMap<VersionId, CopyVersionStats>,
    /// Versions left out by the version filter.
    pub skipped: Vec<VersionId>,
    /// Failed attempts that were retried.
    pub retries: u32,
}

impl StoreCopyReport {
    /// Verification errors over all versions.
    pub fn verify_errors(&self) -> usize {
        self.versions.values().map(|s| s.verify_errors).sum()
    }

    /// Synchronized nodes over all versions.
    pub fn copied_nodes(&self) -> usize {
        self.versions.values().map(|s| s.copied_nodes).sum()
    }
}

/// Copies a store with its whole version forest.
#[derive(Debug, Clone, Default)]
pub struct StoreCopier {
    config: SyncConfig,
}

impl StoreCopier {
    /// Creates a store copier.
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Copies `source_store` into `target_store`.
    ///
    /// An existing target loses all its versions and gets the source's
    /// store properties (target-only properties are removed, skipped ones
    /// are left alone); a missing target is created. Each copied version is
    /// one progress step, two with verification.
    ///
    /// # Errors
    ///
    /// Returns the error of a version that failed every attempt, or
    /// `Cancelled`. The error is also logged to the progress sink.
    pub fn copy_doc_store(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        options: &StoreCopyOptions,
        progress: &dyn ProgressCallback,
    ) -> SyncResult<StoreCopyReport> {
        progress.start_work(1);
        let result = self.copy_store_inner(source, source_store, target, target_store, options, progress);
        if let Err(e) = &result {
            progress.log_error("text.copy_store_finished_error", msg_args![e]);
            tracing::error!(source = source_store, target = target_store, error = %e, "store copy failed");
        }
        progress.finish_work();
        result
    }

    fn copy_store_inner(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        options: &StoreCopyOptions,
        progress: &dyn ProgressCallback,
    ) -> SyncResult<StoreCopyReport> {
        progress.set_message("text.copy_store_started", Vec::new());
        tracing::info!(source = source_store, target = target_store, "store copy started");

        let all_versions = source.list_versions(source_store)?;
        let mut report = StoreCopyReport::default();
        if let Some(selected) = &options.versions {
            report.skipped = all_versions
                .iter()
                .filter(|v| !selected.contains(v))
                .cloned()
                .collect();
        }
        let copied = all_versions.len() - report.skipped.len();
        let steps = if options.verify { 2 * copied } else { copied };
        progress.set_steps_total(steps.max(1));

        if target.list_doc_stores().iter().any(|s| s == target_store) {
            if target.store_id() == Some(target_store) {
                close_silently(target, "target");
            }
            target.delete_all_versions(target_store, Some(progress))?;
            let mut names: BTreeSet<String> = target.doc_store_property_names(target_store)?.into_iter().collect();
            names.extend(source.doc_store_property_names(source_store)?);
            let updates: Vec<PropertyUpdate> = names
                .into_iter()
                .filter(|n| !options.skip_store_properties.contains(n))
                .map(|n| {
                    let value = source.doc_store_property(source_store, &n);
                    (n, value)
                })
                .collect();
            target.set_doc_store_properties(target_store, &updates)?;
        } else {
            let properties: Vec<PropertyUpdate> = source
                .doc_store_property_names(source_store)?
                .into_iter()
                .map(|n| {
                    let value = source.doc_store_property(source_store, &n);
                    (n, value)
                })
                .collect();
            target.create_doc_store(target_store, &properties)?;
        }

        check_cancelled(Some(progress))?;
        progress.set_percent(1);

        let roots = source.root_versions(source_store)?;
        self.copy_versions_recursive(
            source,
            source_store,
            target,
            target_store,
            &roots,
            options,
            progress,
            &mut report,
        )?;
        progress.set_message("text.copy_store_versions_finished_success", Vec::new());
        tracing::info!(
            source = source_store,
            target = target_store,
            versions = report.versions.len(),
            nodes = report.copied_nodes(),
            "store copy finished"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_versions_recursive(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        versions: &[VersionId],
        options: &StoreCopyOptions,
        progress: &dyn ProgressCallback,
        report: &mut StoreCopyReport,
    ) -> SyncResult<()> {
        for version in versions {
            check_cancelled(Some(progress))?;
            if !report.skipped.contains(version) {
                progress.set_message("text.copy_store_version", msg_args![version]);
                let mut stats =
                    self.copy_version_with_retry(source, source_store, target, target_store, version, options, progress, report)?;
                progress.step_finished();
                check_cancelled(Some(progress))?;

                if options.verify {
                    let extended = options.trans_as_orig.is_none();
                    Verifier::new(self.config.clone()).verify_version(
                        source,
                        source_store,
                        target,
                        target_store,
                        version,
                        &mut stats,
                        extended,
                        progress,
                    );
                    progress.step_finished();
                    check_cancelled(Some(progress))?;
                }
                report.versions.insert(version.clone(), stats);
            }
            let subs = source.sub_versions(source_store, version)?;
            self.copy_versions_recursive(source, source_store, target, target_store, &subs, options, progress, report)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_version_with_retry(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        version: &VersionId,
        options: &StoreCopyOptions,
        progress: &dyn ProgressCallback,
        report: &mut StoreCopyReport,
    ) -> SyncResult<CopyVersionStats> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                progress.set_message("text.progress_delete_version", msg_args![version]);
                close_silently(target, "target");
                if target.list_versions(target_store)?.contains(version) {
                    target.delete_version(target_store, version)?;
                }
            }
            match self.copy_version(source, source_store, target, target_store, version, options, progress) {
                Ok(stats) => return Ok(stats),
                Err(e) if attempt >= self.config.max_version_attempts || !e.is_retryable() || progress.is_cancelled() => {
                    return Err(e);
                }
                Err(e) => {
                    progress.log_info("error.exception", msg_args![e]);
                    tracing::warn!(%version, attempt, error = %e, "version copy failed, retrying");
                    report.retries += 1;
                }
            }
        }
    }

    /// Copies one version: creation, properties, tree, renditions, state.
    #[allow(clippy::too_many_arguments)]
    fn copy_version(
        &self,
        source: &mut dyn DocStoreSession,
        source_store: &str,
        target: &mut dyn DocStoreSession,
        target_store: &str,
        version: &VersionId,
        options: &StoreCopyOptions,
        progress: &dyn ProgressCallback,
    ) -> SyncResult<CopyVersionStats> {
        leave_translation_modes(source, target);

        let mut base = source.version_derived_from(source_store, version)?;
        let target_versions = target.list_versions(target_store)?;
        while let Some(b) = base.as_ref() {
            if target_versions.contains(b) {
                break;
            }
            let next = source.version_derived_from(source_store, b)?;
            base = next;
        }
        target.create_version(target_store, base.as_ref(), version)?;
        if let Some(date) = source.version_creation_date(source_store, version) {
            target.set_version_creation_date(target_store, version, date)?;
        }

        // Target names are included so that properties inherited from the
        // base but missing in the source are removed.
        let mut names: BTreeSet<String> = target.version_property_names(target_store, version)?.into_iter().collect();
        names.extend(source.version_property_names(source_store, version)?);
        let updates: Vec<PropertyUpdate> = names
            .into_iter()
            .map(|n| {
                let value = source.version_property(source_store, version, &n);
                (n, value)
            })
            .collect();
        target.set_version_properties(target_store, version, &updates)?;

        source.open_doc_store(source_store, version)?;
        target.open_doc_store(target_store, version)?;
        let source_root = source.root()?;
        let target_root = target.root()?;

        let mut languages: BTreeSet<String> = match &options.translations {
            Some(languages) => languages.iter().cloned().collect(),
            None => translation_languages_recursive(&*source, &source_root)?,
        };
        if let Some(lang) = &options.trans_as_orig {
            languages.remove(lang);
            if source.version_state_in(source_store, version, Some(lang.as_str()))? == VersionState::TranslationPending {
                return Err(SyncError::PendingTranslation {
                    version: version.clone(),
                    lang: lang.clone(),
                });
            }
        }
        if let Some(lang) = &options.orig_as_trans {
            languages.remove(lang);
        }
        let mut pending = Vec::new();
        for lang in &languages {
            if source.version_state_in(source_store, version, Some(lang.as_str()))? == VersionState::TranslationPending {
                pending.push(lang.clone());
            }
        }
        for lang in &pending {
            languages.remove(lang);
        }

        let sync_options = NodeSyncOptions {
            translations: Some(languages.clone()),
            trans_as_orig: options.trans_as_orig.clone(),
            orig_as_trans: options.orig_as_trans.clone(),
            db_target: target.is_db_store(target_store),
        };
        let count = NodeSync::new(self.config.clone(), sync_options).sync_tree(
            &*source,
            &source_root,
            target,
            &target_root,
            Some(progress),
        )?;

        if target.running_transaction() {
            target.commit_transaction()?;
            tracing::warn!(%version, "unexpected running transaction in target session, committed");
        }
        leave_translation_modes(source, target);

        let renditions = source.image_renditions()?;
        LocalTransaction::run(target, |t| -> SyncResult<()> {
            for rendition in &renditions {
                if t.image_rendition(rendition.name())?.is_none() {
                    t.add_image_rendition(rendition)?;
                }
            }
            Ok(())
        })?;

        copy_state_and_release_date(source, source_store, target, target_store, version, None, None)?;
        for lang in &languages {
            copy_state_and_release_date(source, source_store, target, target_store, version, Some(lang.as_str()), Some(lang.as_str()))?;
        }
        if let Some(lang) = &options.orig_as_trans {
            copy_state_and_release_date(source, source_store, target, target_store, version, None, Some(lang.as_str()))?;
        }

        source.close_doc_store()?;
        target.close_doc_store()?;

        progress.log_info("text.copy_store_node_count", msg_args![count]);
        tracing::info!(%version, source = source_store, target = target_store, nodes = count, "version synchronized");
        Ok(CopyVersionStats {
            copied_translations: languages.into_iter().collect(),
            copied_nodes: count,
            verify_errors: 0,
        })
    }
}

fn leave_translation_modes(source: &mut dyn DocStoreSession, target: &mut dyn DocStoreSession) {
    if target.translation_mode().is_some() {
        target.leave_translation_mode();
        tracing::warn!("unexpected translation mode in target session, leaving translation mode");
    }
    if source.translation_mode().is_some() {
        source.leave_translation_mode();
        tracing::warn!("unexpected translation mode in source session, leaving translation mode");
    }
}

/// Carries the state and release date of one language variant over.
///
/// A pending source translation is never assigned, and a target variant
/// that reads as pending is left alone since pending cannot be left by
/// assignment.
fn copy_state_and_release_date(
    source: &dyn DocStoreSession,
    source_store: &str,
    target: &mut dyn DocStoreSession,
    target_store: &str,
    version: &VersionId,
    source_lang: Option<&str>,
    target_lang: Option<&str>,
) -> SyncResult<()> {
    let source_state = source.version_state_in(source_store, version, source_lang)?;
    let target_state = target.version_state_in(target_store, version, target_lang)?;
    let pending = source_lang.is_some() && source_state == VersionState::TranslationPending;
    if !pending && source_state != target_state {
        if target_state == VersionState::TranslationPending {
            tracing::warn!(%version, lang = ?target_lang, state = %source_state, "target translation is pending, state not copied");
        } else {
            target.set_version_state_in(target_store, version, target_lang, source_state)?;
        }
    }

    if let Some(date) = source.version_release_date_in(source_store, version, source_lang) {
        if target.version_release_date_in(target_store, version, target_lang) != Some(date) {
            target.set_version_release_date_in(target_store, version, target_lang, Some(date))?;
        }
    }
    Ok(())
}
