// Well-known names, paths, and limits shared across the PDK crates.

use std::path::PathBuf;

/// The PDK version, baked in at compile time.
pub const PDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the per-user / per-workspace state directory.
pub const PDK_DIR: &str = ".pdk";

/// File name of the encrypted secret store inside the PDK home directory.
pub const SECRETS_FILE: &str = "secrets.json";

/// File name of the best-effort update-check stamp.
pub const UPDATE_CHECK_FILE: &str = "update-check.json";

/// Replacement token written wherever a registered secret appears in output.
pub const MASK_TOKEN: &str = "***";

/// Replacement value used for sensitive entries in rendered execution plans.
pub const MASKED_VALUE: &str = "***MASKED***";

/// Prefix for environment variables injected at Environment precedence.
pub const ENV_VAR_PREFIX: &str = "PDK_VAR_";

/// Prefix for environment variables injected at Secret precedence.
pub const ENV_SECRET_PREFIX: &str = "PDK_SECRET_";

/// Maximum recursion depth for variable expansion.
pub const MAX_EXPAND_DEPTH: u32 = 64;

/// Maximum expanded output length (guards against quadratic blow-up).
pub const MAX_EXPAND_OUTPUT: usize = 1024 * 1024;

/// Default quiet period for the watch-mode debouncer.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Grace period granted to in-flight steps after a cancellation signal
/// before force-termination.
pub const CANCELLATION_GRACE_SECS: u64 = 30;

/// Maximum characters of script text shown in execution-plan previews.
pub const SCRIPT_PREVIEW_LEN: usize = 100;

/// Levenshtein distance threshold for fuzzy step-name matching.
pub const FUZZY_MATCH_THRESHOLD: usize = 2;

/// Environment variables whose presence identifies a hosted CI environment.
/// Any of these suppresses the update-check side effect.
pub const CI_ENV_MARKERS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "AZURE_PIPELINES",
    "TF_BUILD",
    "GITLAB_CI",
    "JENKINS_URL",
    "TRAVIS",
    "CIRCLECI",
    "BUILDKITE",
    "TEAMCITY_VERSION",
];

/// Default glob patterns excluded from file watching.
pub const DEFAULT_WATCH_EXCLUDES: &[&str] = &[
    ".git/**",
    "node_modules/**",
    ".pdk/**",
    "**/*.dll",
    "**/*.exe",
    "**/*.so",
    "**/*.dylib",
    "**/bin/**",
    "**/obj/**",
    "**/target/**",
];

/// The user-scoped PDK home directory (`~/.pdk`).
pub fn pdk_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PDK_DIR)
}

/// Returns true when any hosted-CI marker variable is present in the
/// process environment.
pub fn running_under_ci() -> bool {
    CI_ENV_MARKERS
        .iter()
        .any(|name| std::env::var_os(name).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdk_home_ends_with_dot_pdk() {
        assert!(pdk_home().ends_with(".pdk"));
    }

    #[test]
    fn test_version_is_set() {
        assert!(!PDK_VERSION.is_empty());
    }
}
