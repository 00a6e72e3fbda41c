// Layered variable resolver. Five sources with fixed precedence; lookups
// walk the layers highest-first.

use crate::constants::{ENV_SECRET_PREFIX, ENV_VAR_PREFIX, PDK_VERSION};
use crate::context::RunContext;
use crate::masker::SecretMasker;
use crate::secrets::SecretStore;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a variable value came from. Higher rank wins on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariableSource {
    BuiltIn = 0,
    Configuration = 1,
    Environment = 2,
    Secret = 3,
    CliArgument = 4,
}

impl VariableSource {
    /// All sources ordered highest precedence first.
    pub const DESCENDING: [VariableSource; 5] = [
        VariableSource::CliArgument,
        VariableSource::Secret,
        VariableSource::Environment,
        VariableSource::Configuration,
        VariableSource::BuiltIn,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for VariableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VariableSource::BuiltIn => "built-in",
            VariableSource::Configuration => "configuration",
            VariableSource::Environment => "environment",
            VariableSource::Secret => "secret",
            VariableSource::CliArgument => "cli",
        };
        f.write_str(s)
    }
}

/// Thread-safe layered variable store.
///
/// Each source holds its own map; `resolve` walks sources highest-rank
/// first. Secret-sourced values are registered with the masker when one
/// is attached.
#[derive(Clone)]
pub struct VariableResolver {
    layers: Arc<RwLock<[HashMap<String, String>; 5]>>,
    masker: Option<Arc<SecretMasker>>,
}

impl std::fmt::Debug for VariableResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layers = self.layers.read();
        f.debug_struct("VariableResolver")
            .field("count", &layers.iter().map(|l| l.len()).sum::<usize>())
            .finish()
    }
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableResolver {
    pub fn new() -> Self {
        Self {
            layers: Arc::new(RwLock::new(Default::default())),
            masker: None,
        }
    }

    pub fn with_masker(masker: Arc<SecretMasker>) -> Self {
        Self {
            layers: Arc::new(RwLock::new(Default::default())),
            masker: Some(masker),
        }
    }

    /// Resolve a variable, applying source precedence.
    ///
    /// Unknown names yield `None`; resolution itself never fails.
    pub fn resolve(&self, name: &str) -> Option<String> {
        {
            let layers = self.layers.read();
            for source in VariableSource::DESCENDING {
                if let Some(value) = layers[source.index()].get(name) {
                    return Some(value.clone());
                }
            }
        }
        self.dynamic_builtin(name)
    }

    /// Resolve with a fallback default.
    pub fn resolve_or(&self, name: &str, default: &str) -> String {
        self.resolve(name).unwrap_or_else(|| default.to_string())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// The highest-precedence source currently defining `name`.
    pub fn source_of(&self, name: &str) -> Option<VariableSource> {
        let layers = self.layers.read();
        for source in VariableSource::DESCENDING {
            if layers[source.index()].contains_key(name) {
                return Some(source);
            }
        }
        drop(layers);
        if self.dynamic_builtin(name).is_some() {
            return Some(VariableSource::BuiltIn);
        }
        None
    }

    /// All variables with precedence applied.
    pub fn get_all(&self) -> HashMap<String, String> {
        let layers = self.layers.read();
        let mut result = HashMap::new();
        // Walk lowest-rank first so higher ranks overwrite.
        for source in VariableSource::DESCENDING.iter().rev() {
            for (name, value) in &layers[source.index()] {
                result.insert(name.clone(), value.clone());
            }
        }
        result
    }

    /// Set a variable in a specific source layer.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>, source: VariableSource) {
        let name = name.into();
        let value = value.into();
        if source == VariableSource::Secret {
            if let Some(ref masker) = self.masker {
                masker.register(&value);
            }
        }
        self.layers.write()[source.index()].insert(name, value);
    }

    /// Drop every variable belonging to one source.
    pub fn clear_source(&self, source: VariableSource) {
        self.layers.write()[source.index()].clear();
    }

    /// Load pipeline-level configuration variables.
    pub fn load_from_config(&self, config: &HashMap<String, String>) {
        let mut layers = self.layers.write();
        for (name, value) in config {
            layers[VariableSource::Configuration.index()].insert(name.clone(), value.clone());
        }
    }

    /// Load from the process environment.
    ///
    /// `PDK_VAR_<name>` entries land at Environment precedence with the
    /// prefix stripped. `PDK_SECRET_<name>` entries land at Secret
    /// precedence and are registered with the masker.
    pub fn load_from_environment(&self) {
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(ENV_SECRET_PREFIX) {
                self.set(name.to_string(), value, VariableSource::Secret);
            } else if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) {
                self.set(name.to_string(), value, VariableSource::Environment);
            } else {
                self.layers.write()[VariableSource::Environment.index()].insert(key, value);
            }
        }
    }

    /// Load every secret from the store at Secret precedence.
    pub fn load_secrets(&self, store: &SecretStore) -> crate::error::PdkResult<()> {
        for (name, value) in store.get_all()? {
            self.set(name, value, VariableSource::Secret);
        }
        Ok(())
    }

    /// Apply a run context: its variable overlay (CliArgument precedence),
    /// its secrets (Secret precedence), and the workspace built-ins.
    pub fn update_context(&self, ctx: &RunContext) {
        for (name, value) in &ctx.variables {
            self.set(name.clone(), value.clone(), VariableSource::CliArgument);
        }
        for (name, value) in &ctx.secrets {
            self.set(name.clone(), value.clone(), VariableSource::Secret);
        }
        self.set(
            "PDK_WORKSPACE",
            ctx.working_dir.to_string_lossy().to_string(),
            VariableSource::BuiltIn,
        );
    }

    /// Populate the static built-in layer.
    pub fn load_builtins(&self) {
        self.set("PDK_VERSION", PDK_VERSION, VariableSource::BuiltIn);
        if let Ok(cwd) = std::env::current_dir() {
            let cwd = cwd.to_string_lossy().to_string();
            self.set("PWD", cwd.clone(), VariableSource::BuiltIn);
            self.set("PDK_WORKSPACE", cwd, VariableSource::BuiltIn);
        }
        if let Some(home) = dirs::home_dir() {
            self.set("HOME", home.to_string_lossy().to_string(), VariableSource::BuiltIn);
        }
        if let Ok(user) = std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
            self.set("USER", user, VariableSource::BuiltIn);
        }
    }

    /// Deep-copy the layers into an independent resolver sharing the
    /// same masker. Parallel jobs fork so per-job built-ins cannot race.
    pub fn fork(&self) -> VariableResolver {
        let layers = self.layers.read().clone();
        Self {
            layers: Arc::new(RwLock::new(layers)),
            masker: self.masker.clone(),
        }
    }

    /// Built-ins computed at lookup time rather than stored.
    fn dynamic_builtin(&self, name: &str) -> Option<String> {
        match name {
            "TIMESTAMP" => Some(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            "TIMESTAMP_UNIX" => Some(Utc::now().timestamp().to_string()),
            _ => None,
        }
    }
}
