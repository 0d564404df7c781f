mod lock;

pub use lock::{StoreLock, LOCK_CHECK_INTERVAL, LOCK_FILE_NAME};

use crate::error::{Error, Result};
use atomic_write_file::AtomicWriteFile;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Upper bound on `_include` chains. The store has no cycle detection; a
/// cycle (or an absurdly deep chain) hits this limit and fails with a data
/// error naming the document.
const MAX_INCLUDE_DEPTH: usize = 8;

/// How a document is being loaded.
///
/// Documents marked `_template_only: true` refuse to load as `Data`; they are
/// only reachable through `_include` resolution, which loads them as
/// `Template`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocMode {
    Data,
    Template,
}

/// A loaded document plus its provenance.
#[derive(Debug, Clone)]
pub struct Document {
    pub value: Value,
    pub path: PathBuf,
    pub filename: String,
}

/// Handle on a store root with the `athletes/`, `leagues/`, `results/` and
/// `cache/` sub-collections.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::data(&root, "store root is not a directory"));
        }
        Ok(Store { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn athletes_dir(&self) -> PathBuf {
        self.root.join("athletes")
    }

    pub fn leagues_dir(&self) -> PathBuf {
        self.root.join("leagues")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Load one YAML document, resolving template inheritance.
    pub fn load(&self, path: &Path, mode: DocMode) -> Result<Document> {
        load_document(path, mode, 0)
    }

    /// Write a document atomically (never leaves a half-written file).
    pub fn dump(&self, path: &Path, value: &Value) -> Result<()> {
        let text = serde_saphyr::to_string(value)
            .map_err(|e| Error::data(path, format!("serialize failed: {e}")))?;
        let mut file = AtomicWriteFile::open(path)?;
        file.write_all(text.as_bytes())?;
        file.commit()?;
        Ok(())
    }

    /// Every YAML document under `dir`, sorted by path.
    pub fn list_documents(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let pattern = format!("{}/**/*.yaml", dir.display());
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::data(dir, format!("bad glob pattern: {e}")))?;
        let mut found: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
        found.sort();
        Ok(found)
    }

    /// Find the document for an athlete id anywhere under `athletes/`.
    ///
    /// Exactly one match is required: zero is `AthleteNotFound`, more than one
    /// is `AthleteAmbiguous`.
    pub fn lookup_athlete_path(&self, athlete_id: &str) -> Result<PathBuf> {
        let pattern = format!("{}/**/{}.yaml", self.athletes_dir().display(), athlete_id);
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::data(self.athletes_dir(), format!("bad glob pattern: {e}")))?;
        let mut matches: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
        matches.sort();
        match matches.len() {
            0 => Err(Error::AthleteNotFound {
                id: athlete_id.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::AthleteAmbiguous {
                id: athlete_id.to_string(),
                matches,
            }),
        }
    }
}

fn load_document(path: &Path, mode: DocMode, depth: usize) -> Result<Document> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(Error::data(
            path,
            format!("include chain deeper than {MAX_INCLUDE_DEPTH} (cycle?)"),
        ));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| Error::data(path, format!("read failed: {e}")))?;
    let value: Value = serde_saphyr::from_str(&text)
        .map_err(|e| Error::data(path, format!("invalid YAML: {e}")))?;
    let Value::Object(mut doc) = value else {
        return Err(Error::data(path, "document root must be a mapping"));
    };

    if mode == DocMode::Data
        && doc
            .get("_template_only")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    {
        return Err(Error::TemplateUsedAsData {
            path: path.to_path_buf(),
        });
    }

    if let Some(include) = doc.remove("_include") {
        let Some(include) = include.as_str() else {
            return Err(Error::data(path, "_include must be a relative path"));
        };
        let base_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(include);
        let base = load_document(&base_path, DocMode::Template, depth + 1)?;
        let Value::Object(mut base_doc) = base.value else {
            return Err(Error::data(&base_path, "document root must be a mapping"));
        };
        base_doc.remove("_template_only");
        let merged = deep_merge(&Value::Object(base_doc), &Value::Object(doc));
        let Value::Object(merged) = merged else {
            unreachable!("merging two mappings yields a mapping");
        };
        doc = merged;
    }

    Ok(Document {
        value: Value::Object(doc),
        path: path.to_path_buf(),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}

/// Deep-merge `changes` over `base`.
///
/// Mappings merge key-by-key recursively, lists concatenate (base elements
/// first), scalars are replaced outright.
pub fn deep_merge(base: &Value, changes: &Value) -> Value {
    if let (Value::Object(base), Value::Object(changes)) = (base, changes) {
        let mut out = base.clone();
        for (key, value) in changes {
            let merged = match (out.get(key), value) {
                (Some(existing), Value::Object(_)) => deep_merge(existing, value),
                (Some(Value::Array(head)), Value::Array(tail)) => {
                    let mut items = head.clone();
                    items.extend(tail.iter().cloned());
                    Value::Array(items)
                }
                _ => value.clone(),
            };
            out.insert(key.clone(), merged);
        }
        return Value::Object(out);
    }
    changes.clone()
}

/// Additive deep-merge: numbers sum, mappings merge recursively, lists
/// concatenate, anything else is replaced.
pub fn deep_add(base: &Value, delta: &Value) -> Value {
    if let (Value::Object(base), Value::Object(delta)) = (base, delta) {
        let mut out = base.clone();
        for (key, value) in delta {
            let merged = match (out.get(key), value) {
                (Some(existing @ Value::Object(_)), Value::Object(_)) => {
                    deep_add(existing, value)
                }
                (Some(Value::Number(a)), Value::Number(b)) => add_numbers(a, b),
                (Some(Value::Array(head)), Value::Array(tail)) => {
                    let mut items = head.clone();
                    items.extend(tail.iter().cloned());
                    Value::Array(items)
                }
                _ => value.clone(),
            };
            out.insert(key.clone(), merged);
        }
        return Value::Object(out);
    }
    delta.clone()
}

fn add_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Value {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Value::from(a + b);
    }
    Value::from(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_deep_merge_law() {
        let base = json!({"a": 1, "b": {"c": 2}, "e": [0]});
        let changes = json!({"b": {"d": 3}, "e": [1]});
        let merged = deep_merge(&base, &changes);
        assert_eq!(merged, json!({"a": 1, "b": {"c": 2, "d": 3}, "e": [0, 1]}));
    }

    #[test]
    fn test_deep_merge_scalar_replaces() {
        let base = json!({"a": {"x": 1}});
        let changes = json!({"a": 5});
        assert_eq!(deep_merge(&base, &changes), json!({"a": 5}));
    }

    #[test]
    fn test_deep_add_law() {
        let base = json!({"x": {"y": 1}});
        let delta = json!({"x": {"y": 2, "z": 3}});
        assert_eq!(deep_add(&base, &delta), json!({"x": {"y": 3, "z": 3}}));
    }

    #[test]
    fn test_deep_add_keeps_integers() {
        let sum = deep_add(&json!({"n": 1}), &json!({"n": 2}));
        assert_eq!(sum, json!({"n": 3}));
        assert!(sum["n"].is_i64());
    }

    #[test]
    fn test_deep_add_mixed_numbers() {
        let sum = deep_add(&json!({"n": 1}), &json!({"n": 2.5}));
        assert_eq!(sum["n"].as_f64(), Some(3.5));
    }

    #[test]
    fn test_deep_add_concatenates_lists() {
        let sum = deep_add(&json!({"l": [1]}), &json!({"l": [2, 3]}));
        assert_eq!(sum, json!({"l": [1, 2, 3]}));
    }

    #[test]
    fn test_load_plain_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "athlete.yaml", "name: Alice\ndob: '2011-04-01'\n");
        let store = Store::open(dir.path()).unwrap();
        let doc = store.load(&path, DocMode::Data).unwrap();
        assert_eq!(doc.value["name"], json!("Alice"));
        assert_eq!(doc.filename, "athlete.yaml");
        assert_eq!(doc.path, path);
    }

    #[test]
    fn test_template_only_rejected_as_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "base.yaml", "_template_only: true\ngender: any\n");
        let store = Store::open(dir.path()).unwrap();
        let err = store.load(&path, DocMode::Data).unwrap_err();
        assert!(matches!(err, Error::TemplateUsedAsData { .. }));
        assert!(store.load(&path, DocMode::Template).is_ok());
    }

    #[test]
    fn test_include_merges_base_first() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "base.yaml",
            "_template_only: true\nteam: Red\ntags: [junior]\n",
        );
        let path = write(
            dir.path(),
            "alice.yaml",
            "_include: base.yaml\nname: Alice\ntags: [sprinter]\n",
        );
        let store = Store::open(dir.path()).unwrap();
        let doc = store.load(&path, DocMode::Data).unwrap();
        assert_eq!(doc.value["team"], json!("Red"));
        assert_eq!(doc.value["name"], json!("Alice"));
        assert_eq!(doc.value["tags"], json!(["junior", "sprinter"]));
        assert!(doc.value.get("_template_only").is_none());
        assert!(doc.value.get("_include").is_none());
    }

    #[test]
    fn test_include_cycle_hits_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "_include: b.yaml\nname: a\n");
        let path_b = write(dir.path(), "b.yaml", "_include: a.yaml\nname: b\n");
        let store = Store::open(dir.path()).unwrap();
        let err = store.load(&path_b, DocMode::Data).unwrap_err();
        assert!(err.to_string().contains("include chain"));
    }

    #[test]
    fn test_lookup_athlete_not_found_and_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let athletes = dir.path().join("athletes");
        fs::create_dir_all(athletes.join("a")).unwrap();
        fs::create_dir_all(athletes.join("b")).unwrap();
        let store = Store::open(dir.path()).unwrap();

        assert!(matches!(
            store.lookup_athlete_path("ghost").unwrap_err(),
            Error::AthleteNotFound { .. }
        ));

        write(&athletes.join("a"), "alice.yaml", "name: Alice\n");
        assert!(store.lookup_athlete_path("alice").is_ok());

        write(&athletes.join("b"), "alice.yaml", "name: Other Alice\n");
        assert!(matches!(
            store.lookup_athlete_path("alice").unwrap_err(),
            Error::AthleteAmbiguous { .. }
        ));
    }

    #[test]
    fn test_dump_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let path = dir.path().join("out.yaml");
        let value = json!({"name": "Relay", "total": 12});
        store.dump(&path, &value).unwrap();
        let doc = store.load(&path, DocMode::Data).unwrap();
        assert_eq!(doc.value, value);
    }
}
