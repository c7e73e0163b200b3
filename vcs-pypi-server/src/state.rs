//! # Application State
//!
//! [`AppState`] is created once at startup and shared with every handler
//! behind an `Arc`. The snapshot cache is the only mutable state in the
//! process; everything else is read-only configuration.

use std::sync::Arc;

use crate::cache::{EntryState, SnapshotCache};
use crate::config::Config;
use crate::error::{AppResult, ProviderError};
use crate::index::{build_index, ProjectIndex};
use crate::provider::{build_provider, collect_listings, VcsProvider};

/// Shared state of the index server.
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Source of repositories and release files
    pub provider: Arc<dyn VcsProvider>,
    /// Last known project index per provider key
    pub cache: SnapshotCache<ProjectIndex>,
}

impl AppState {
    /// Creates state around an existing provider.
    pub fn new(config: Config, provider: Arc<dyn VcsProvider>) -> Self {
        let cache = SnapshotCache::new(config.cache.ttl(), config.cache.refresh_timeout());
        Self {
            config: Arc::new(config),
            provider,
            cache,
        }
    }

    /// Creates state with the provider selected by `config`.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let provider = build_provider(&config.provider)?;
        Ok(Self::new(config, provider))
    }

    /// The current project index, loading or refreshing it as needed.
    pub async fn project_index(&self) -> AppResult<Arc<ProjectIndex>> {
        let provider = Arc::clone(&self.provider);
        let index = self
            .cache
            .get_or_refresh(&self.provider.cache_key(), move || async move {
                let listings = collect_listings(provider.as_ref()).await?;
                Ok::<_, ProviderError>(build_index(listings))
            })
            .await?;
        Ok(index)
    }

    /// Cache state of the project index, reported by the health endpoint.
    pub fn index_state(&self) -> EntryState {
        self.cache.state(&self.provider.cache_key())
    }
}
