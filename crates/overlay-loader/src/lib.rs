#![deny(warnings)]

//! Loads an overlay pack from disk: pack metadata plus a recursive fold of
//! every JSON file under the pack's `database/` directory into one
//! in-memory tree.

use catalog_core::{validate_pack, OverlayPack};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Metadata for an overlay pack.
#[derive(Debug, Clone, Deserialize)]
pub struct PackMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub catalog_schema_version: u32,
    pub compat: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("invalid metadata: {0}")]
    InvalidMeta(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("malformed json in {0}: {1}")]
    Json(String, String),
    #[error("pack shape error: {0}")]
    Shape(String),
}

impl From<std::io::Error> for LoaderError {
    fn from(e: std::io::Error) -> Self {
        LoaderError::Io(e.to_string())
    }
}

/// A fully loaded pack with its metadata and source directory.
#[derive(Debug, Clone)]
pub struct LoadedPack {
    pub meta: PackMeta,
    pub dir: PathBuf,
    pub pack: OverlayPack,
}

/// Loads a pack directory: `metadata.yaml` at the root plus everything under
/// `database/`, validated for merge safety.
pub fn load_pack<P: AsRef<Path>>(dir: P) -> Result<LoadedPack, LoaderError> {
    let dir = dir.as_ref().to_path_buf();
    let meta_text = fs::read_to_string(dir.join("metadata.yaml"))?;
    let meta: PackMeta =
        serde_yaml::from_str(&meta_text).map_err(|e| LoaderError::InvalidMeta(e.to_string()))?;
    let tree = load_tree(&dir.join("database"))?;
    let pack: OverlayPack =
        serde_json::from_value(tree).map_err(|e| LoaderError::Shape(e.to_string()))?;
    validate_pack(&pack).map_err(|e| LoaderError::Shape(e.to_string()))?;
    info!(
        pack = %meta.name,
        version = %meta.version,
        items = pack.items.len(),
        traders = pack.traders.len(),
        "overlay pack loaded"
    );
    Ok(LoadedPack { meta, dir, pack })
}

/// Recursively folds a directory of JSON files into one object tree.
///
/// A directory becomes an object keyed by entry name; a `.json` file's
/// parsed contents land under the key named after its stem. On key
/// collision, objects merge and later non-object values replace earlier
/// ones. Entries are visited in sorted order so the result is reproducible.
pub fn load_tree(dir: &Path) -> Result<Value, LoaderError> {
    let mut out = Map::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            let subtree = load_tree(&path)?;
            fold_into(&mut out, file_key(&path)?, subtree);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            let text = fs::read_to_string(&path)?;
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|e| LoaderError::Json(path.display().to_string(), e.to_string()))?;
            fold_into(&mut out, file_key(&path.with_extension(""))?, parsed);
        }
    }
    Ok(Value::Object(out))
}

fn file_key(path: &Path) -> Result<String, LoaderError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| LoaderError::Shape(format!("unusable file name: {}", path.display())))
}

/// Merges `value` into `out[key]`: object-into-object merges key-wise,
/// anything else replaces.
fn fold_into(out: &mut Map<String, Value>, key: String, value: Value) {
    let merged = match (out.remove(&key), value) {
        (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
            for (k, v) in incoming {
                fold_into(&mut existing, k, v);
            }
            Value::Object(existing)
        }
        (_, value) => value,
    };
    out.insert(key, merged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::Catalog;
    use std::fs;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn tree_fold_keys_directories_and_file_stems() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("items/item-A.json"),
            r#"{ "enable": true }"#,
        );
        write(
            &dir.path().join("traders/painter.json"),
            r#"{ "items": [] }"#,
        );
        write(&dir.path().join("notes.txt"), "ignored");

        let tree = load_tree(dir.path()).unwrap();
        assert_eq!(tree["items"]["item-A"]["enable"], true);
        assert!(tree["traders"]["painter"]["items"].is_array());
        assert!(tree.get("notes").is_none());
    }

    #[test]
    fn tree_fold_merges_colliding_objects() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("items.json"), r#"{ "a": { "x": 1 } }"#);
        write(&dir.path().join("items/b.json"), r#"{ "y": 2 }"#);

        let tree = load_tree(dir.path()).unwrap();
        assert_eq!(tree["items"]["a"]["x"], 1);
        assert_eq!(tree["items"]["b"]["y"], 2);
    }

    #[test]
    fn malformed_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("items/bad.json"), "{ nope");
        let err = load_tree(dir.path()).unwrap_err();
        match err {
            LoaderError::Json(file, _) => assert!(file.contains("bad.json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_metadata_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_pack(dir.path()).unwrap_err();
        assert!(matches!(err, LoaderError::Io(_)));
    }

    #[test]
    fn invalid_metadata_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("metadata.yaml"), "name: [unclosed");
        fs::create_dir_all(dir.path().join("database")).unwrap();
        let err = load_pack(dir.path()).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidMeta(_)));
    }

    #[test]
    fn unsafe_pack_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("metadata.yaml"),
            "id: p\nname: P\nversion: 0.1.0\ncatalog_schema_version: 1\n",
        );
        write(
            &dir.path().join("database/items/item-A.json"),
            r#"{
                "enable": true,
                "clone": "",
                "handbook": { "parent_id": "cat", "price": 1 },
                "locales": { "name": "A" }
            }"#,
        );
        let err = load_pack(dir.path()).unwrap_err();
        assert!(matches!(err, LoaderError::Shape(_)));
    }

    #[test]
    fn example_pack_loads_and_applies() {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets");
        let loaded = load_pack(root.join("pack")).unwrap();
        assert_eq!(loaded.meta.id, "green-refit");
        assert!(!loaded.pack.items.is_empty(), "no items in assets/pack");

        let text = fs::read_to_string(root.join("catalog.json")).unwrap();
        let mut catalog: Catalog = serde_json::from_str(&text).unwrap();
        let summary = overlay_engine::apply_pack(&mut catalog, &loaded.pack);

        assert_eq!(summary.entities_failed, 0);
        assert_eq!(summary.entities_added, loaded.pack.items.len());
        for id in loaded.pack.items.keys() {
            assert!(catalog.items.contains_key(id));
        }
        assert_eq!(summary.traders_failed, 0);
    }
}
