// Command implementations. Each command returns the process exit code;
// main maps nothing else.

pub mod doctor;
pub mod interactive;
pub mod list;
pub mod run;
pub mod secret;
pub mod validate;
pub mod watch;

use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::ports::ContainerDriver;
use pdk_core::{SecretMasker, SecretStore, VariableResolver};
use pdk_engine::{DockerCliDriver, ExecutorRegistry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Shared per-invocation services.
pub struct AppContext {
    pub workspace: PathBuf,
    pub masker: Arc<SecretMasker>,
    pub store: Arc<SecretStore>,
    pub resolver: VariableResolver,
    pub driver: Arc<dyn ContainerDriver>,
    pub registry: Arc<ExecutorRegistry>,
}

impl AppContext {
    /// Wire the default services: derived-key secret store, Docker CLI
    /// driver, and the standard executor registry.
    pub fn bootstrap(workspace: PathBuf, masker: Arc<SecretMasker>) -> Self {
        let store = Arc::new(SecretStore::open_default().with_masker(Arc::clone(&masker)));
        let resolver = VariableResolver::with_masker(Arc::clone(&masker));
        resolver.load_builtins();
        resolver.load_from_environment();
        if let Err(e) = resolver.load_secrets(&store) {
            tracing::warn!("could not load secrets: {e}");
        }

        let driver: Arc<dyn ContainerDriver> = Arc::new(DockerCliDriver::new());
        let registry = Arc::new(ExecutorRegistry::standard(Arc::clone(&driver)));

        Self {
            workspace,
            masker,
            store,
            resolver,
            driver,
            registry,
        }
    }

    /// Names currently held by the secret store, for plan masking.
    pub fn secret_names(&self) -> std::collections::HashSet<String> {
        self.store.list().unwrap_or_default().into_iter().collect()
    }
}

/// Parse repeated `--var KEY=VALUE` flags.
pub fn parse_var_flags(vars: &[String]) -> PdkResult<HashMap<String, String>> {
    let mut out = HashMap::with_capacity(vars.len());
    for var in vars {
        match var.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                out.insert(key.trim().to_string(), value.to_string());
            }
            _ => {
                return Err(PdkError::new(
                    codes::CONFIG_INVALID,
                    format!("invalid --var '{var}', expected KEY=VALUE"),
                ));
            }
        }
    }
    Ok(out)
}

/// Parse a duration flag: plain seconds, or `30s` / `10m` / `2h`.
pub fn parse_duration_flag(text: &str) -> PdkResult<Duration> {
    let trimmed = text.trim();
    let (number, multiplier) = match trimmed.chars().last() {
        Some('s') => (&trimmed[..trimmed.len() - 1], 1),
        Some('m') => (&trimmed[..trimmed.len() - 1], 60),
        Some('h') => (&trimmed[..trimmed.len() - 1], 3600),
        _ => (trimmed, 1),
    };
    number
        .parse::<u64>()
        .map(|n| Duration::from_secs(n * multiplier))
        .map_err(|_| {
            PdkError::new(
                codes::CONFIG_INVALID,
                format!("invalid --timeout '{text}', expected forms like 90, 30s, 10m, 2h"),
            )
        })
}
