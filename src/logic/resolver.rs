/// Logic Resolver
///
/// Maps a logic name to something executable. The mapping file
/// (`<logic dir>/mapping.json`, a flat `{name: location}` object) is re-read on
/// every call so edits take effect without a restart. A missing or malformed
/// mapping is treated as empty.
///
/// Lookup order:
/// 1. mapping entry: `builtin:<name>` → registered handler, anything else → a
///    script file in the logic directory
/// 2. `<logic dir>/<name>.lua`
/// 3. a registered handler with the same name
///
/// Every file location is reduced to its basename and looked up in the logic
/// directory only; path components in names or mapping values are ignored.

use crate::config::LogicConfig;
use crate::logic::registry::HandlerRegistry;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Extension of script handler files
pub const SCRIPT_EXTENSION: &str = "lua";

/// Mapping value prefix that points at a registered handler
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Where a logic name resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerLocation {
    Builtin(String),
    Script(PathBuf),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no handler for logic '{0}'")]
    NotFound(String),

    #[error("logic '{name}' is mapped to '{location}', which does not exist")]
    MissingFile { name: String, location: String },

    #[error("logic '{name}' is mapped to unknown builtin '{builtin}'")]
    UnknownBuiltin { name: String, builtin: String },
}

#[derive(Debug, Clone)]
pub struct LogicResolver {
    dir: PathBuf,
    mapping_path: PathBuf,
    registry: Arc<HandlerRegistry>,
}

impl LogicResolver {
    pub fn new(config: &LogicConfig, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            dir: config.dir.clone(),
            mapping_path: config.mapping_path(),
            registry,
        }
    }

    /// Read the mapping file; absent, unreadable or non-flat mappings yield an empty map
    pub async fn load_mapping(&self) -> HashMap<String, String> {
        let raw = match tokio::fs::read(&self.mapping_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!("⚠️ Cannot read logic mapping {}: {}", self.mapping_path.display(), e);
                return HashMap::new();
            }
        };

        match serde_json::from_slice::<HashMap<String, String>>(&raw) {
            Ok(mapping) => mapping,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Ignoring logic mapping {} (expected a flat name → string object): {}",
                    self.mapping_path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    pub async fn resolve(&self, name: &str) -> Result<HandlerLocation, ResolveError> {
        let mapping = self.load_mapping().await;

        if let Some(location) = mapping.get(name) {
            tracing::debug!("🔍 Logic '{}' mapped to '{}'", name, location);
            return self.resolve_mapped(name, location).await;
        }

        if let Some(base) = basename(name) {
            let candidate = self.dir.join(format!("{}.{}", base, SCRIPT_EXTENSION));
            if is_file(&candidate).await {
                return Ok(HandlerLocation::Script(candidate));
            }
        }

        if self.registry.contains(name) {
            return Ok(HandlerLocation::Builtin(name.to_string()));
        }

        Err(ResolveError::NotFound(name.to_string()))
    }

    async fn resolve_mapped(&self, name: &str, location: &str) -> Result<HandlerLocation, ResolveError> {
        if let Some(builtin) = location.strip_prefix(BUILTIN_PREFIX) {
            let builtin = builtin.trim();
            if self.registry.contains(builtin) {
                return Ok(HandlerLocation::Builtin(builtin.to_string()));
            }
            return Err(ResolveError::UnknownBuiltin {
                name: name.to_string(),
                builtin: builtin.to_string(),
            });
        }

        let missing = || ResolveError::MissingFile {
            name: name.to_string(),
            location: location.to_string(),
        };
        let base = basename(location).ok_or_else(missing)?;
        let path = self.dir.join(base);
        if is_file(&path).await {
            Ok(HandlerLocation::Script(path))
        } else {
            Err(missing())
        }
    }
}

/// Final path component, ignoring any directories or traversal
fn basename(name: &str) -> Option<&str> {
    Path::new(name).file_name().and_then(|n| n.to_str())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}
