//! # VCS Provider Abstraction
//!
//! A [`VcsProvider`] knows how to enumerate the repositories of the configured
//! owners and, per repository, the downloadable files attached to its
//! releases. The index builder and page renderer only ever see the types in
//! this module, so adding a provider means adding an implementation of the
//! trait and a branch in [`build_provider`].
//!
//! ```text
//! VcsProvider (trait)
//!     └── GitHubProvider (impl)
//! ```

pub mod github;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{AppResult, ProviderError, ProviderResult};
use crate::pypi_utils::normalize_pypi_name;

pub use github::GitHubProvider;

/// Number of repositories whose releases are fetched concurrently.
pub const RELEASE_FETCH_CONCURRENCY: usize = 8;

/// A repository that may be exposed as a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Login of the owning user or organization.
    pub owner: String,
    /// Repository name as reported by the provider.
    pub name: String,
    /// Browser URL of the repository.
    pub html_url: String,
    pub private: bool,
}

impl Repository {
    /// `owner/name`, used in logs and conflict reports.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Integrity hash published alongside a release file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// hashlib algorithm name, e.g. `sha256`.
    pub algorithm: String,
    /// Lowercase hex digest.
    pub digest: String,
}

impl FileHash {
    pub fn new(algorithm: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            digest: digest.into(),
        }
    }
}

/// One downloadable file of a release, as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReleaseFile {
    pub filename: String,
    pub url: String,
    pub hash: Option<FileHash>,
}

/// All release files of one repository, in release order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryListing {
    pub repository: Repository,
    pub files: Vec<RawReleaseFile>,
}

/// Which releases contribute files to the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseFilter {
    pub include_prereleases: bool,
    pub include_drafts: bool,
    pub include_source_archives: bool,
}

/// Capability interface of a VCS hosting provider.
#[async_trait]
pub trait VcsProvider: Send + Sync {
    /// Provider identifier, e.g. `github`.
    fn name(&self) -> &'static str;

    /// Identifies the snapshot this provider produces; used as the cache key.
    fn cache_key(&self) -> String;

    /// Lazily enumerates candidate repositories, paginating transparently.
    fn list_projects(&self) -> BoxStream<'_, ProviderResult<Repository>>;

    /// Lists the release files of `repository`.
    ///
    /// Releases without files are skipped; drafts and pre-releases are
    /// included according to the provider's [`ReleaseFilter`].
    async fn list_release_files(&self, repository: &Repository)
        -> ProviderResult<Vec<RawReleaseFile>>;
}

/// Builds the provider selected by the configuration.
pub fn build_provider(config: &ProviderConfig) -> AppResult<Arc<dyn VcsProvider>> {
    match config.kind {
        ProviderKind::Github => Ok(Arc::new(GitHubProvider::new(config)?)),
    }
}

/// Walks every repository of `provider` and collects its release files.
///
/// Repositories are ordered by normalized name. The sort is stable, so
/// repositories that normalize to the same project keep provider order, which
/// walks owners in configured order.
pub async fn collect_listings(provider: &dyn VcsProvider) -> ProviderResult<Vec<RepositoryListing>> {
    let mut repositories: Vec<Repository> = provider.list_projects().try_collect().await?;
    repositories.sort_by_cached_key(|repo| normalize_pypi_name(&repo.name));
    info!(
        provider = provider.name(),
        repositories = repositories.len(),
        "Listed candidate repositories"
    );

    stream::iter(repositories)
        .map(|repository| async move {
            let files = provider.list_release_files(&repository).await?;
            debug!(repository = %repository.full_name(), files = files.len(), "Listed release files");
            Ok::<_, ProviderError>(RepositoryListing { repository, files })
        })
        .buffered(RELEASE_FETCH_CONCURRENCY)
        .try_collect()
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory provider used by unit tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct StaticProvider {
        pub listings: Vec<RepositoryListing>,
        pub calls: AtomicUsize,
        pub fail_with: Option<ProviderError>,
    }

    impl StaticProvider {
        pub(crate) fn new(listings: Vec<RepositoryListing>) -> Self {
            Self {
                listings,
                calls: AtomicUsize::new(0),
                fail_with: None,
            }
        }
    }

    pub(crate) fn repo(name: &str) -> Repository {
        Repository {
            owner: "acme".to_string(),
            name: name.to_string(),
            html_url: format!("https://github.com/acme/{name}"),
            private: false,
        }
    }

    pub(crate) fn file(filename: &str, hash: Option<(&str, &str)>) -> RawReleaseFile {
        RawReleaseFile {
            filename: filename.to_string(),
            url: format!("https://github.com/acme/releases/download/v1/{filename}"),
            hash: hash.map(|(algorithm, digest)| FileHash::new(algorithm, digest)),
        }
    }

    #[async_trait]
    impl VcsProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        fn cache_key(&self) -> String {
            "static:acme".to_string()
        }

        fn list_projects(&self) -> BoxStream<'_, ProviderResult<Repository>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.fail_with {
                return stream::once(futures_util::future::ready(Err(error.clone()))).boxed();
            }
            stream::iter(
                self.listings
                    .iter()
                    .map(|listing| Ok(listing.repository.clone()))
                    .collect::<Vec<_>>(),
            )
            .boxed()
        }

        async fn list_release_files(
            &self,
            repository: &Repository,
        ) -> ProviderResult<Vec<RawReleaseFile>> {
            Ok(self
                .listings
                .iter()
                .find(|listing| listing.repository == *repository)
                .map(|listing| listing.files.clone())
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_collect_listings_sorts_repositories_by_normalized_name() {
        let provider = StaticProvider::new(vec![
            RepositoryListing {
                repository: repo("zeta"),
                files: vec![file("zeta-1.0.tar.gz", None)],
            },
            RepositoryListing {
                repository: repo("Alpha"),
                files: vec![file("Alpha-1.0.tar.gz", None)],
            },
            RepositoryListing {
                repository: repo("beta"),
                files: vec![],
            },
        ]);

        let listings = collect_listings(&provider).await.unwrap();
        let names: Vec<&str> = listings
            .iter()
            .map(|listing| listing.repository.name.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
        assert_eq!(listings[0].files.len(), 1);
        assert!(listings[1].files.is_empty());
    }

    #[tokio::test]
    async fn test_collect_listings_keeps_owner_order_for_colliding_names() {
        let octocat = Repository {
            owner: "octocat".to_string(),
            html_url: "https://github.com/octocat/My-Pkg".to_string(),
            ..repo("My-Pkg")
        };
        let provider = StaticProvider::new(vec![
            RepositoryListing {
                repository: repo("my_pkg"),
                files: vec![file("my_pkg-1.0.tar.gz", None)],
            },
            RepositoryListing {
                repository: octocat,
                files: vec![file("My_Pkg-6.6.6.tar.gz", None)],
            },
        ]);

        let listings = collect_listings(&provider).await.unwrap();
        let owners: Vec<&str> = listings
            .iter()
            .map(|listing| listing.repository.owner.as_str())
            .collect();
        assert_eq!(owners, vec!["acme", "octocat"]);

        let index = crate::index::build_index(listings);
        let project = index.get("my-pkg").unwrap();
        assert_eq!(project.repository.full_name(), "acme/my_pkg");
        assert_eq!(project.files.len(), 1);
        assert_eq!(project.files[0].filename, "my_pkg-1.0.tar.gz");
    }

    #[tokio::test]
    async fn test_collect_listings_propagates_provider_errors() {
        let mut provider = StaticProvider::new(vec![]);
        provider.fail_with = Some(ProviderError::Auth("bad token".to_string()));

        let err = collect_listings(&provider).await.unwrap_err();
        assert_eq!(err, ProviderError::Auth("bad token".to_string()));
    }

    #[test]
    fn test_full_name() {
        assert_eq!(repo("widgets").full_name(), "acme/widgets");
    }
}
