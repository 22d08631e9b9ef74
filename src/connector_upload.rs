//! Upload connector: ingests files dropped under a local directory.
//!
//! Listing walks the scope's root eagerly (the walk is cheap and gives the
//! stream an exact size hint); file bodies are read lazily at pull time so
//! large trees do not sit in memory. Unreadable and non-UTF-8 files are
//! skipped with a warning — this connector's contract allows partial
//! results.

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::ScopeConfig;
use crate::connector::{Connector, ContentItem, ContentStream};
use crate::error::SyncError;
use crate::models::ConnectorKind;

pub struct UploadConnector {
    scope_id: String,
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl UploadConnector {
    pub fn new(scope_id: String, cfg: ScopeConfig) -> Result<Self> {
        let root = cfg
            .root
            .ok_or_else(|| anyhow::anyhow!("upload scope '{}' has no root directory", scope_id))?;

        let include = build_globset(&cfg.include_globs)?;

        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(cfg.exclude_globs);
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            scope_id,
            root,
            include,
            exclude,
            follow_symlinks: cfg.follow_symlinks,
        })
    }

    fn list_files(&self) -> Result<Vec<(PathBuf, String)>, SyncError> {
        if !self.root.exists() {
            return Err(SyncError::Connector(format!(
                "upload root does not exist: {}",
                self.root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(scope = %self.scope_id, error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            files.push((path.to_path_buf(), rel_str));
        }

        // Deterministic ordering across runs
        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }
}

#[async_trait]
impl Connector for UploadConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Upload
    }

    fn describe(&self) -> String {
        format!("local uploads under {}", self.root.display())
    }

    async fn open(&self) -> Result<Box<dyn ContentStream>, SyncError> {
        let files = self.list_files()?;
        Ok(Box::new(UploadStream {
            scope_id: self.scope_id.clone(),
            total: files.len() as u64,
            files: files.into_iter(),
        }))
    }
}

struct UploadStream {
    scope_id: String,
    total: u64,
    files: std::vec::IntoIter<(PathBuf, String)>,
}

#[async_trait]
impl ContentStream for UploadStream {
    async fn next_item(&mut self) -> Result<Option<ContentItem>, SyncError> {
        for (path, rel_str) in self.files.by_ref() {
            let body = match tokio::fs::read_to_string(&path).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(
                        scope = %self.scope_id,
                        file = %rel_str,
                        error = %e,
                        "skipping file that could not be read as text"
                    );
                    continue;
                }
            };

            let title = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| rel_str.clone());

            return Ok(Some(ContentItem {
                external_id: rel_str.clone(),
                title: Some(title),
                body,
                metadata: json!({ "path": path.to_string_lossy() }),
            }));
        }
        Ok(None)
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeConfig;

    fn scope_config(root: PathBuf) -> ScopeConfig {
        ScopeConfig {
            connector: "upload".to_string(),
            workspace: "default".to_string(),
            account: "local".to_string(),
            owner: None,
            root: Some(root),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        }
    }

    #[tokio::test]
    async fn streams_matching_files_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.md"), "beta").unwrap();
        std::fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        std::fs::write(tmp.path().join("skip.rs"), "fn main() {}").unwrap();

        let connector =
            UploadConnector::new("docs".to_string(), scope_config(tmp.path().to_path_buf()))
                .unwrap();
        let mut stream = connector.open().await.unwrap();
        assert_eq!(stream.size_hint(), Some(2));

        let first = stream.next_item().await.unwrap().unwrap();
        assert_eq!(first.external_id, "a.md");
        assert_eq!(first.body, "alpha");

        let second = stream.next_item().await.unwrap().unwrap();
        assert_eq!(second.external_id, "b.md");

        assert!(stream.next_item().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_root_is_a_connector_error() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("nope");
        let connector = UploadConnector::new("docs".to_string(), scope_config(gone)).unwrap();
        let err = connector.open().await.err().unwrap();
        assert!(matches!(err, SyncError::Connector(_)));
    }

    #[tokio::test]
    async fn non_utf8_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("good.txt"), "readable").unwrap();
        std::fs::write(tmp.path().join("bad.txt"), [0xff, 0xfe, 0x00, 0x01]).unwrap();

        let connector =
            UploadConnector::new("docs".to_string(), scope_config(tmp.path().to_path_buf()))
                .unwrap();
        let mut stream = connector.open().await.unwrap();

        let item = stream.next_item().await.unwrap().unwrap();
        assert_eq!(item.external_id, "good.txt");
        assert!(stream.next_item().await.unwrap().is_none());
    }
}
