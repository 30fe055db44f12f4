//! Reads an already-described application catalog from disk.
//!
//! The YAML schema loader that authors these descriptors lives in a
//! separate crate not built here (§1 "Out of scope"); this binary only
//! needs *some* way to materialize [`AppDescriptor`]s for a run, so it
//! accepts a flat JSON array at a configurable path using the
//! serialization already on the dependency graph.

use std::path::Path;

use anyhow::{Context, Result};
use devex_schema::AppDescriptor;

/// Loads the catalog from `path`, a JSON array of [`AppDescriptor`].
pub fn load(path: &Path) -> Result<Vec<AppDescriptor>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog at {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing catalog at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"name":"curl","category":"net","default":true,"dependencies":[],"conflicts":[],"variants":[]}]"#,
        )
        .unwrap();
        let catalog = load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, devex_schema::AppName::new("curl"));
    }

    #[test]
    fn missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("missing.json")).is_err());
    }
}
