//! Verify command implementation.

use std::path::Path;

use docstore_core::{DefaultProgress, LogMessage, VersionId};
use docstore_sync::{CopyVersionStats, Verifier};

use super::{snapshot, CliResult, CLI_USER};

/// Verification outcome with the logged differences.
#[derive(Debug)]
pub struct VerifyResult {
    /// Verified version.
    pub version: VersionId,
    /// Translations and counters of the run.
    pub stats: CopyVersionStats,
    /// Logged warnings and errors.
    pub messages: Vec<LogMessage>,
}

impl VerifyResult {
    /// Returns true if no difference was found.
    pub fn is_ok(&self) -> bool {
        self.stats.verify_errors == 0
    }
}

/// Verifies `version` of store `to` against store `store`, every
/// translation of the source tree included.
pub fn run(path: &Path, store: &str, to: &str, version: &str) -> CliResult<VerifyResult> {
    let version = VersionId::parse(version)?;
    let backend = snapshot::load(path)?;
    let mut source = backend.session(CLI_USER);
    let mut target = backend.session(CLI_USER);
    let progress = DefaultProgress::new();

    println!("Verifying {to} {version} against {store}");
    let stats = Verifier::default().verify_store_version(
        &mut source,
        store,
        &mut target,
        to,
        &version,
        true,
        &progress,
    );
    Ok(VerifyResult {
        version,
        stats,
        messages: progress.messages(false, true, true),
    })
}

/// Prints a verification result.
pub fn print_result(result: &VerifyResult) {
    for message in &result.messages {
        println!("  {:?} {} {}", message.level, message.key, message.args.join(" "));
    }
    let languages = if result.stats.copied_translations.is_empty() {
        "-".to_string()
    } else {
        result.stats.copied_translations.join(", ")
    };
    println!(
        "  {} nodes, translations {languages}: {}",
        result.stats.copied_nodes,
        if result.is_ok() {
            "OK".to_string()
        } else {
            format!("{} difference(s)", result.stats.verify_errors)
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::copy::{self, CopyArgs};
    use docstore_core::DocStoreSession;
    use docstore_testkit::{released_store, version, TempSnapshot};

    fn copied_snapshot() -> TempSnapshot {
        let snapshot = TempSnapshot::write(&released_store("manual"));
        let args = CopyArgs {
            store: "manual".into(),
            to: "copy".into(),
            ..CopyArgs::default()
        };
        copy::run(snapshot.path(), None, &args).unwrap();
        snapshot
    }

    #[test]
    fn copy_verifies_clean() {
        let snapshot = copied_snapshot();
        let result = run(snapshot.path(), "manual", "copy", "1.1").unwrap();
        assert!(result.is_ok(), "{:?}", result.messages);
        assert_eq!(result.stats.copied_translations, vec!["de".to_string()]);
        assert_eq!(result.stats.copied_nodes, 8);
    }

    #[test]
    fn edited_copy_reports_differences() {
        let snapshot = copied_snapshot();
        let backend = snapshot.load();
        let mut editor = backend.session("editor");
        editor.open_doc_store("copy", &version("1.1")).unwrap();
        let intro = editor.node_id_by_alias("intro").unwrap();
        editor.set_title(&intro, Some("Changed"), None).unwrap();
        editor.close_doc_store().unwrap();
        crate::commands::snapshot::save(&backend, snapshot.path()).unwrap();

        let result = run(snapshot.path(), "manual", "copy", "1.1").unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.stats.verify_errors, 1);
        assert!(result
            .messages
            .iter()
            .any(|m| m.key == "text.copy_store_node_titles_differ"));
    }

    #[test]
    fn unknown_version_counts_as_failure() {
        let snapshot = copied_snapshot();
        let result = run(snapshot.path(), "manual", "copy", "9.9").unwrap();
        assert_eq!(result.stats.verify_errors, 1);
    }
}
