//! Filesystem document reader.
//!
//! Walks `docs.root` recursively and returns one [`Document`] per file that
//! matches the include globs and none of the exclude globs. Documents are
//! sorted by relative path so that ingestion is deterministic.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::DocsConfig;
use crate::error::{QaError, Result};
use crate::models::{Document, FILE_NAME_KEY, SOURCE_KEY};

pub fn load_documents(config: &DocsConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(QaError::config(format!(
            "Document root does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        documents.push(file_to_document(path, &rel_str)?);
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(root = %root.display(), documents = documents.len(), "loaded documents");

    Ok(documents)
}

fn file_to_document(path: &Path, relative_path: &str) -> Result<Document> {
    let fs_meta = std::fs::metadata(path)?;
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let file_type = match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") => "text/markdown",
        _ => "text/plain",
    };

    let mut metadata = BTreeMap::new();
    metadata.insert(SOURCE_KEY.to_string(), relative_path.to_string());
    metadata.insert(FILE_NAME_KEY.to_string(), file_name);
    metadata.insert("file_path".to_string(), path.display().to_string());
    metadata.insert("file_type".to_string(), file_type.to_string());
    metadata.insert("file_size".to_string(), fs_meta.len().to_string());
    if let Ok(modified) = fs_meta.modified() {
        let modified: DateTime<Utc> = modified.into();
        metadata.insert(
            "last_modified_date".to_string(),
            modified.format("%Y-%m-%d").to_string(),
        );
    }

    Ok(Document {
        id: relative_path.to_string(),
        text,
        metadata,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| QaError::config(format!("Invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| QaError::config(format!("Invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn docs_config(root: PathBuf) -> DocsConfig {
        DocsConfig {
            root,
            ..DocsConfig::default()
        }
    }

    #[test]
    fn reads_markdown_and_text_recursively() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("guides")).unwrap();
        fs::write(tmp.path().join("b.md"), "# B").unwrap();
        fs::write(tmp.path().join("guides/a.txt"), "A text").unwrap();
        fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let docs = load_documents(&docs_config(tmp.path().to_path_buf())).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b.md", "guides/a.txt"]);

        let a = &docs[1];
        assert_eq!(a.metadata.get(SOURCE_KEY).unwrap(), "guides/a.txt");
        assert_eq!(a.metadata.get(FILE_NAME_KEY).unwrap(), "a.txt");
        assert_eq!(a.metadata.get("file_type").unwrap(), "text/plain");
        assert_eq!(a.text, "A text");
    }

    #[test]
    fn empty_root_yields_no_documents() {
        let tmp = TempDir::new().unwrap();
        let docs = load_documents(&docs_config(tmp.path().to_path_buf())).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn missing_root_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_documents(&docs_config(tmp.path().join("nope"))).unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
    }

    #[test]
    fn exclude_globs_apply() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("keep.md"), "keep").unwrap();
        fs::write(tmp.path().join("drafts/skip.md"), "skip").unwrap();

        let mut cfg = docs_config(tmp.path().to_path_buf());
        cfg.exclude_globs = vec!["drafts/**".to_string()];
        let docs = load_documents(&cfg).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "keep.md");
    }
}
