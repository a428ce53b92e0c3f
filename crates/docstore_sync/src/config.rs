//! Configuration for copy, sync and verification.

/// Limits and tuning knobs shared by the copy, sync and verify algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum depth of a copied or synchronized subtree.
    pub max_copy_depth: usize,
    /// Verification errors logged per run; further errors are only counted.
    pub max_verify_errors: usize,
    /// Number of verified nodes per progress step.
    pub verify_progress_increment: usize,
    /// Attempts per version in a whole-store copy.
    pub max_version_attempts: u32,
    /// Rename attempts before an alias is given up.
    pub max_alias_attempts: u32,
    /// Buffer size for streaming content comparison.
    pub compare_chunk_size: usize,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_copy_depth: 60,
            max_verify_errors: 300,
            verify_progress_increment: 25,
            max_version_attempts: 3,
            max_alias_attempts: 100,
            compare_chunk_size: 128 * 1024,
        }
    }

    /// Sets the maximum copy depth.
    #[must_use]
    pub fn with_max_copy_depth(mut self, depth: usize) -> Self {
        self.max_copy_depth = depth;
        self
    }

    /// Sets the number of verification errors that are logged.
    #[must_use]
    pub fn with_max_verify_errors(mut self, max: usize) -> Self {
        self.max_verify_errors = max;
        self
    }

    /// Sets the number of verified nodes per progress step.
    #[must_use]
    pub fn with_verify_progress_increment(mut self, nodes: usize) -> Self {
        self.verify_progress_increment = nodes.max(1);
        self
    }

    /// Sets the attempts per version.
    #[must_use]
    pub fn with_max_version_attempts(mut self, attempts: u32) -> Self {
        self.max_version_attempts = attempts.max(1);
        self
    }

    /// Sets the alias rename attempts.
    #[must_use]
    pub fn with_max_alias_attempts(mut self, attempts: u32) -> Self {
        self.max_alias_attempts = attempts;
        self
    }

    /// Sets the comparison buffer size.
    #[must_use]
    pub fn with_compare_chunk_size(mut self, bytes: usize) -> Self {
        self.compare_chunk_size = bytes.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.max_copy_depth, 60);
        assert_eq!(config.max_verify_errors, 300);
        assert_eq!(config.verify_progress_increment, 25);
        assert_eq!(config.max_version_attempts, 3);
        assert_eq!(config.max_alias_attempts, 100);
        assert_eq!(config.compare_chunk_size, 128 * 1024);
    }

    #[test]
    fn builder_clamps_zero() {
        let config = SyncConfig::new()
            .with_max_copy_depth(5)
            .with_max_version_attempts(0)
            .with_compare_chunk_size(0)
            .with_verify_progress_increment(0);
        assert_eq!(config.max_copy_depth, 5);
        assert_eq!(config.max_version_attempts, 1);
        assert_eq!(config.compare_chunk_size, 1);
        assert_eq!(config.verify_progress_increment, 1);
    }
}
