//! Connector capability and registry.
//!
//! A connector produces a finite, lazily-pulled sequence of content items
//! for one sync scope. Any connector kind — the built-in upload walker, a
//! Drive/Jira/Confluence/Slack crawler living in another crate — is a
//! variant implementing [`Connector`]; the orchestrator is written once
//! against the capability and never sees connector-specific fetch logic.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ConnectorRegistry             │
//! │  ┌──────────┐  ┌───────────────────────┐ │
//! │  │ Built-in │  │ Custom (other crates) │ │
//! │  │  upload  │  │ drive/jira/conf/slack │ │
//! │  └──────────┘  └───────────────────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        orchestrator::run_sync
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::SyncError;
use crate::models::ConnectorKind;

/// One content item pulled from an external system.
#[derive(Debug, Clone)]
pub struct ContentItem {
    /// Stable identity within the external system (path, page id, issue
    /// key, message ts). Pairs with the connector kind to key the source.
    pub external_id: String,
    pub title: Option<String>,
    pub body: String,
    /// Connector-specific metadata; the orchestrator adds the scope and
    /// account reference before persisting.
    pub metadata: Value,
}

/// A finite, lazily-pulled sequence of content items.
///
/// Pulling may suspend on I/O and may fail mid-sequence; a stream error is
/// run-fatal. Items a connector's own contract allows it to skip (an
/// unreadable file, a trashed document) should be skipped inside the
/// connector with a warning, not surfaced here.
#[async_trait]
pub trait ContentStream: Send {
    /// Next item, or `None` when the sequence is exhausted.
    async fn next_item(&mut self) -> Result<Option<ContentItem>, SyncError>;

    /// Total number of items this stream will yield, when the connector
    /// knows it up front (drives the discovered count and ETA).
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// A data source connector bound to one sync scope.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connector kind this instance implements.
    fn kind(&self) -> ConnectorKind;

    /// One-line description shown by `ksync scopes`.
    fn describe(&self) -> String;

    /// Open a fresh content stream. Called once per run; re-invoking the
    /// whole sync is the only way to restart a sequence.
    async fn open(&self) -> Result<Box<dyn ContentStream>, SyncError>;
}

/// Registry mapping scope ids to connector instances.
///
/// [`ConnectorRegistry::from_config`] resolves the built-in upload
/// connector for every configured upload scope; callers embedding this
/// crate register remote connectors for the other kinds via
/// [`register`](ConnectorRegistry::register).
pub struct ConnectorRegistry {
    by_scope: BTreeMap<String, Box<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            by_scope: BTreeMap::new(),
        }
    }

    /// Resolve built-in connectors from the config file.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::connector_upload::UploadConnector;

        let mut registry = Self::new();
        for (scope_id, scope_cfg) in &config.scopes {
            match scope_cfg.connector_kind()? {
                ConnectorKind::Upload => {
                    registry.register(
                        scope_id.clone(),
                        Box::new(UploadConnector::new(scope_id.clone(), scope_cfg.clone())?),
                    );
                }
                // Remote kinds are external collaborators; their scopes
                // stay unbound until a caller registers an implementation.
                _ => {}
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, scope_id: String, connector: Box<dyn Connector>) {
        self.by_scope.insert(scope_id, connector);
    }

    pub fn find(&self, scope_id: &str) -> Option<&dyn Connector> {
        self.by_scope.get(scope_id).map(|c| c.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.by_scope.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_scope.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter turning a pre-collected item list into a [`ContentStream`].
///
/// Useful for connectors that must list everything up front anyway, and for
/// tests. The orchestrator still pulls items one at a time.
pub struct VecStream {
    items: std::vec::IntoIter<ContentItem>,
    total: u64,
}

impl VecStream {
    pub fn new(items: Vec<ContentItem>) -> Self {
        let total = items.len() as u64;
        Self {
            items: items.into_iter(),
            total,
        }
    }
}

#[async_trait]
impl ContentStream for VecStream {
    async fn next_item(&mut self) -> Result<Option<ContentItem>, SyncError> {
        Ok(self.items.next())
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}
