//! Copy command implementation.

use std::path::Path;

use docstore_core::{DefaultProgress, VersionId};
use docstore_sync::{StoreCopier, StoreCopyOptions, StoreCopyReport, SyncConfig};

use super::{snapshot, CliResult, CLI_USER};

/// Arguments of a whole-store copy.
#[derive(Debug, Clone, Default)]
pub struct CopyArgs {
    /// Source store.
    pub store: String,
    /// Target store, created if missing.
    pub to: String,
    /// Versions to copy; empty copies all.
    pub versions: Vec<String>,
    /// Translations to copy; `None` copies all.
    pub translations: Option<Vec<String>>,
    /// Translation promoted to the original language.
    pub trans_as_orig: Option<String>,
    /// Translation receiving the original language.
    pub orig_as_trans: Option<String>,
    /// Store properties of an existing target left untouched.
    pub skip_properties: Vec<String>,
    /// Verify each copied version.
    pub verify: bool,
    /// Attempts per version.
    pub attempts: u32,
}

impl CopyArgs {
    fn options(&self) -> CliResult<StoreCopyOptions> {
        let mut options = StoreCopyOptions::new().with_verify(self.verify);
        if !self.versions.is_empty() {
            let versions = self
                .versions
                .iter()
                .map(|v| VersionId::parse(v))
                .collect::<Result<Vec<_>, _>>()?;
            options = options.with_versions(versions);
        }
        if let Some(languages) = &self.translations {
            options = options.with_translations(languages.clone());
        }
        if let Some(lang) = &self.trans_as_orig {
            options = options.with_trans_as_orig(lang.clone());
        }
        if let Some(lang) = &self.orig_as_trans {
            options = options.with_orig_as_trans(lang.clone());
        }
        for name in &self.skip_properties {
            options = options.skip_store_property(name.clone());
        }
        Ok(options)
    }
}

/// Runs the copy command and writes the result to `output`, or back to
/// `path` when no output is given.
pub fn run(path: &Path, output: Option<&Path>, args: &CopyArgs) -> CliResult<StoreCopyReport> {
    let backend = snapshot::load(path)?;
    let options = args.options()?;
    let mut config = SyncConfig::default();
    if args.attempts > 0 {
        config = config.with_max_version_attempts(args.attempts);
    }

    let mut source = backend.session(CLI_USER);
    let mut target = backend.session(CLI_USER);
    let progress = DefaultProgress::new();
    let report = StoreCopier::new(config).copy_doc_store(
        &mut source,
        &args.store,
        &mut target,
        &args.to,
        &options,
        &progress,
    )?;

    snapshot::save(&backend, output.unwrap_or(path))?;
    Ok(report)
}

/// Prints a copy report.
pub fn print_report(args: &CopyArgs, report: &StoreCopyReport) {
    println!("Copied {} to {}", args.store, args.to);
    for (version, stats) in &report.versions {
        let languages = if stats.copied_translations.is_empty() {
            "-".to_string()
        } else {
            stats.copied_translations.join(", ")
        };
        print!("  [{version}] {} nodes, translations {languages}", stats.copied_nodes);
        if args.verify {
            print!(", {} difference(s)", stats.verify_errors);
        }
        println!();
    }
    if !report.skipped.is_empty() {
        let skipped: Vec<String> = report.skipped.iter().map(ToString::to_string).collect();
        println!("  skipped: {}", skipped.join(", "));
    }
    if report.retries > 0 {
        println!("  retries: {}", report.retries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::DocStoreSession;
    use docstore_testkit::{released_store, version, TempSnapshot};

    fn args(to: &str) -> CopyArgs {
        CopyArgs {
            store: "manual".into(),
            to: to.into(),
            verify: true,
            ..CopyArgs::default()
        }
    }

    #[test]
    fn copies_in_place() {
        let snapshot = TempSnapshot::write(&released_store("manual"));
        let report = run(snapshot.path(), None, &args("copy")).unwrap();
        assert_eq!(report.versions.len(), 2);
        assert_eq!(report.verify_errors(), 0);

        let loaded = snapshot.load();
        let s = loaded.session("reader");
        assert_eq!(s.list_versions("copy").unwrap(), vec![version("1.0"), version("1.1")]);
    }

    #[test]
    fn writes_to_separate_output() {
        let snapshot = TempSnapshot::write(&released_store("manual"));
        let output = TempSnapshot::empty();
        let mut copy = args("copy");
        copy.versions = vec!["1.0".into()];
        copy.trans_as_orig = Some("de".into());
        copy.verify = false;
        let report = run(snapshot.path(), Some(output.path()), &copy).unwrap();
        assert_eq!(report.skipped, vec![version("1.1")]);

        assert!(snapshot.load().session("reader").list_versions("copy").is_err());
        let s = output.load().session("reader");
        assert_eq!(s.list_versions("copy").unwrap(), vec![version("1.0")]);
    }

    #[test]
    fn malformed_version_filter_is_rejected() {
        let snapshot = TempSnapshot::write(&released_store("manual"));
        let mut copy = args("copy");
        copy.versions = vec!["".into()];
        assert!(run(snapshot.path(), None, &copy).is_err());
    }

    #[test]
    fn missing_source_store_fails() {
        let snapshot = TempSnapshot::write(&released_store("manual"));
        let mut copy = args("copy");
        copy.store = "nope".into();
        assert!(run(snapshot.path(), None, &copy).is_err());
    }
}
