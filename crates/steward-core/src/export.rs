//! Export bundles: a directory of sorted-key JSON artifacts described by a
//! root `bundle_meta.json`.
//!
//! The meta file is always written last. Its `checksums` map covers every
//! artifact written before it; `artifacts` lists all files including the
//! meta itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::{sha256_hex, to_sorted_pretty, write_json_file};
use crate::error::Result;

pub const BUNDLE_VERSION: &str = "1.0";
pub const BUNDLE_META_FILE: &str = "bundle_meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    pub bundle_version: String,
    pub ts: String,
    pub inputs: Value,
    pub artifacts: Vec<String>,
    pub checksums: BTreeMap<String, String>,
}

/// Writes artifacts into one export directory, tracking checksums.
#[derive(Debug)]
pub struct BundleWriter {
    dir: PathBuf,
    checksums: BTreeMap<String, String>,
}

impl BundleWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            checksums: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `value` as `name`, replacing any previous artifact of that name.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<PathBuf> {
        let body = to_sorted_pretty(value)?;
        let path = self.dir.join(name);
        std::fs::write(&path, body.as_bytes())?;
        self.checksums.insert(name.to_string(), sha256_hex(body.as_bytes()));
        Ok(path)
    }

    /// Write `bundle_meta.json` and return it.
    pub fn finish(self, ts: &str, inputs: Value) -> Result<BundleMeta> {
        let mut artifacts: Vec<String> = self.checksums.keys().cloned().collect();
        artifacts.push(BUNDLE_META_FILE.to_string());
        artifacts.sort();
        artifacts.dedup();

        let meta = BundleMeta {
            bundle_version: BUNDLE_VERSION.to_string(),
            ts: ts.to_string(),
            inputs,
            artifacts,
            checksums: self.checksums,
        };
        write_json_file(&self.dir.join(BUNDLE_META_FILE), &meta)?;
        tracing::debug!(
            dir = %self.dir.display(),
            artifacts = meta.artifacts.len(),
            "bundle written"
        );
        Ok(meta)
    }
}

/// Check every checksum in a written bundle. Returns the names that no
/// longer match, sorted.
pub fn verify_bundle(dir: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(dir.join(BUNDLE_META_FILE))?;
    let meta: BundleMeta = serde_json::from_str(&text)?;
    let mut mismatched = Vec::new();
    for (name, expected) in &meta.checksums {
        let actual = std::fs::read(dir.join(name)).map(|bytes| sha256_hex(&bytes));
        match actual {
            Ok(actual) if &actual == expected => {}
            _ => mismatched.push(name.clone()),
        }
    }
    Ok(mismatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_lists_sorted_artifacts_and_checksums() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = BundleWriter::create(&dir.path().join("out")).expect("create");
        writer.write_json("z.json", &json!({"b": 1, "a": 2})).expect("write");
        writer.write_json("a.json", &json!([1, 2])).expect("write");

        let meta = writer.finish("2026-03-01T00:00:00Z", json!({})).expect("finish");
        assert_eq!(meta.artifacts, vec!["a.json", "bundle_meta.json", "z.json"]);
        assert_eq!(meta.checksums.len(), 2);
        assert!(!meta.checksums.contains_key(BUNDLE_META_FILE));

        let z = std::fs::read_to_string(dir.path().join("out/z.json")).expect("read");
        assert_eq!(z, "{\n  \"a\": 2,\n  \"b\": 1\n}\n");
        assert_eq!(meta.checksums["z.json"], sha256_hex(z.as_bytes()));
        assert!(verify_bundle(&dir.path().join("out")).expect("verify").is_empty());
    }

    #[test]
    fn test_verify_reports_tampered_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = BundleWriter::create(dir.path()).expect("create");
        writer.write_json("r.json", &json!({"k": 1})).expect("write");
        writer.finish("t", json!(null)).expect("finish");
        std::fs::write(dir.path().join("r.json"), "{}\n").expect("tamper");
        assert_eq!(verify_bundle(dir.path()).expect("verify"), vec!["r.json"]);
    }
}
