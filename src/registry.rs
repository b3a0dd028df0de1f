use std::sync::Arc;

use crate::ReqtrackResult;
use crate::adapter::Adapter;
use crate::config::{AdapterSettings, SessionConfig};
use crate::error::Error;
use crate::transport::Transport;

pub(crate) const DEFAULT_PREFIXES: [&str; 2] = ["https://", "http://"];

/// Prefix-routed adapters. Always holds bindings for the two schemes; custom
/// prefixes are added at configuration time and never change afterwards.
#[derive(Debug)]
pub struct AdapterRegistry {
    // Longest prefix first so the first match in `resolve` is the longest one.
    adapters: Vec<Arc<Adapter>>,
}

impl AdapterRegistry {
    pub(crate) fn with_defaults(transport: Option<&Arc<dyn Transport>>) -> ReqtrackResult<Self> {
        let mut registry = Self {
            adapters: Vec::with_capacity(DEFAULT_PREFIXES.len()),
        };
        for prefix in DEFAULT_PREFIXES {
            registry.mount(Adapter::from_settings(
                prefix,
                &AdapterSettings::default(),
                None,
                transport.cloned(),
            )?);
        }
        Ok(registry)
    }

    /// Builds the defaults plus one adapter per configured prefix, using the
    /// pooled `ureq` transport for each.
    pub fn configure(config: &SessionConfig) -> ReqtrackResult<Self> {
        let mut registry = Self::with_defaults(None)?;
        for (prefix, settings) in config.iter() {
            registry.mount(Adapter::from_settings(prefix, settings, None, None)?);
        }
        Ok(registry)
    }

    /// Adds `adapter`, replacing any adapter mounted at the same prefix.
    pub(crate) fn mount(&mut self, adapter: Adapter) {
        self.adapters
            .retain(|existing| existing.prefix() != adapter.prefix());
        let position = self
            .adapters
            .iter()
            .position(|existing| existing.prefix().len() < adapter.prefix().len())
            .unwrap_or(self.adapters.len());
        self.adapters.insert(position, Arc::new(adapter));
    }

    /// Adapter with the longest prefix matching `url`, compared
    /// case-insensitively.
    pub fn resolve(&self, url: &str) -> ReqtrackResult<Arc<Adapter>> {
        let lowered = url.to_ascii_lowercase();
        self.adapters
            .iter()
            .find(|adapter| lowered.starts_with(&adapter.prefix().to_ascii_lowercase()))
            .cloned()
            .ok_or_else(|| Error::NoAdapter {
                uri: url.to_owned(),
            })
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.adapters.iter().map(|adapter| adapter.prefix())
    }
}
