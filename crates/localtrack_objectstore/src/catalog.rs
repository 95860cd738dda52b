//! Model catalog: the set of runnable models, keyed by display name.

use anyhow::Result;
use std::path::Path;

use crate::gateway::ObjectStoreGateway;

/// Object suffixes that count as model artifacts.
pub const MODEL_SUFFIXES: &[&str] = &[".pt", ".gz"];

/// Display name (object basename) to object-store URI, in listing order.
/// The first entry doubles as the documented default model.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: Vec<(String, String)>,
}

impl ModelCatalog {
    /// Rebuild the catalog by listing the models prefix.
    pub async fn fetch(
        gateway: &ObjectStoreGateway,
        bucket: &str,
        model_prefix: &str,
    ) -> Result<Self> {
        let uris = gateway
            .list_by_suffix(bucket, model_prefix, MODEL_SUFFIXES)
            .await?;
        Ok(Self::from_uris(uris))
    }

    pub fn from_uris(uris: Vec<String>) -> Self {
        let entries = uris
            .into_iter()
            .filter_map(|uri| {
                let name = Path::new(&uri)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)?;
                Some((name, uri))
            })
            .collect();
        Self { entries }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn uri(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn default_model(&self) -> Option<&str> {
        self.entries.first().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
