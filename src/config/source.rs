//! Hierarchical key/value configuration read by every module.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Read-only dotted-path configuration access.
///
/// All getters are total: a missing or type-mismatched path yields the
/// default instead of an error.
pub trait ConfigSource: Send + Sync {
    fn contains(&self, path: &str) -> bool;

    fn get_string(&self, path: &str, default: &str) -> String;

    fn get_int(&self, path: &str, default: i64) -> i64;

    fn get_bool(&self, path: &str, default: bool) -> bool;

    /// Child keys of the mapping at `path`. Empty if absent or not a mapping.
    fn get_section(&self, path: &str) -> Map<String, Value>;
}

/// A `ConfigSource` backed by a JSON document.
#[derive(Debug)]
pub struct JsonConfig {
    path: Option<PathBuf>,
    root: RwLock<Value>,
}

impl JsonConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing or malformed file yields an empty document, so modules run
    /// on their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let root = read_document(&path);
        Self {
            path: Some(path),
            root: RwLock::new(root),
        }
    }

    /// Build configuration from an in-memory document.
    #[allow(dead_code)]
    pub fn from_value(root: Value) -> Self {
        Self {
            path: None,
            root: RwLock::new(root),
        }
    }

    /// Re-read the backing file. In-memory configs are left untouched.
    pub fn reload(&self) {
        if let Some(path) = &self.path {
            *self.root.write() = read_document(path);
            info!("Configuration reloaded from {}", path.display());
        }
    }

    /// Replace the whole document.
    pub fn replace(&self, root: Value) {
        *self.root.write() = root;
    }

    fn lookup<T>(&self, path: &str, f: impl FnOnce(&Value) -> Option<T>) -> Option<T> {
        let root = self.root.read();
        resolve_path(&root, path).and_then(f)
    }
}

impl ConfigSource for JsonConfig {
    fn contains(&self, path: &str) -> bool {
        self.lookup(path, |_| Some(())).is_some()
    }

    fn get_string(&self, path: &str, default: &str) -> String {
        self.lookup(path, |v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string())
    }

    fn get_int(&self, path: &str, default: i64) -> i64 {
        self.lookup(path, Value::as_i64).unwrap_or(default)
    }

    fn get_bool(&self, path: &str, default: bool) -> bool {
        self.lookup(path, Value::as_bool).unwrap_or(default)
    }

    fn get_section(&self, path: &str) -> Map<String, Value> {
        self.lookup(path, |v| v.as_object().cloned()).unwrap_or_default()
    }
}

fn read_document(path: &Path) -> Value {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Config file {} not readable ({}), using defaults", path.display(), e);
            return Value::Object(Map::new());
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Config file {} is not valid JSON ({}), using defaults", path.display(), e);
            Value::Object(Map::new())
        }
    }
}

/// Resolve a dotted path like `geo.cache.ttl`.
///
/// Segments are matched as whole keys first, so keys that contain dots
/// (IP addresses in a lookup table) stay reachable: `geo.table.8.8.8.8`.
fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }

    let object = root.as_object()?;
    if let Some(value) = object.get(path) {
        return Some(value);
    }

    // Try progressively longer first segments.
    for (idx, _) in path.match_indices('.') {
        let (head, rest) = (&path[..idx], &path[idx + 1..]);
        if let Some(child) = object.get(head)
            && let Some(found) = resolve_path(child, rest)
        {
            return Some(found);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonConfig {
        JsonConfig::from_value(json!({
            "anvil": { "enabled": true, "max-cost": 30 },
            "chat-filter": { "replacements": { "darn": "drat", "heck": "h*ck" } },
            "geo": { "table": { "8.8.8.8": "United States" } },
            "name": "hearth"
        }))
    }

    #[test]
    fn test_typed_getters() {
        let config = sample();
        assert!(config.get_bool("anvil.enabled", false));
        assert_eq!(config.get_int("anvil.max-cost", 39), 30);
        assert_eq!(config.get_string("name", ""), "hearth");
        assert!(config.contains("anvil.max-cost"));
        assert!(!config.contains("anvil.min-cost"));
    }

    #[test]
    fn test_getters_are_total() {
        let config = sample();
        assert_eq!(config.get_int("anvil.enabled", 7), 7);
        assert_eq!(config.get_string("anvil.max-cost", "x"), "x");
        assert!(!config.get_bool("missing.path", false));
        assert!(config.get_section("anvil.max-cost").is_empty());
        assert!(config.get_section("nope").is_empty());
    }

    #[test]
    fn test_section_and_dotted_keys() {
        let config = sample();
        let replacements = config.get_section("chat-filter.replacements");
        assert_eq!(replacements.len(), 2);
        assert_eq!(replacements["darn"], json!("drat"));

        assert_eq!(config.get_string("geo.table.8.8.8.8", ""), "United States");
    }

    #[test]
    fn test_reload_from_file() {
        let path = std::env::temp_dir().join(format!("hearth-config-{}.json", std::process::id()));
        fs::write(&path, r#"{ "anvil": { "max-cost": 10 } }"#).unwrap();

        let config = JsonConfig::from_file(&path);
        assert_eq!(config.get_int("anvil.max-cost", 0), 10);

        fs::write(&path, r#"{ "anvil": { "max-cost": 20 } }"#).unwrap();
        config.reload();
        assert_eq!(config.get_int("anvil.max-cost", 0), 20);

        fs::write(&path, "not json").unwrap();
        config.reload();
        assert_eq!(config.get_int("anvil.max-cost", 5), 5);

        let _ = fs::remove_file(&path);
    }
}
