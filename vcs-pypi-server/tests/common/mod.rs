//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use futures_util::stream::{self, BoxStream, StreamExt};
use vcs_pypi_server::provider::FileHash;
use vcs_pypi_server::{
    build_router, AppState, Config, ProviderError, ProviderResult, RawReleaseFile, Repository,
    RepositoryListing, VcsProvider,
};

/// In-memory provider with a call counter and an injectable failure.
pub struct FakeProvider {
    listings: Vec<RepositoryListing>,
    failure: Mutex<Option<ProviderError>>,
    delay: Duration,
    pub list_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(listings: Vec<RepositoryListing>) -> Self {
        Self {
            listings,
            failure: Mutex::new(None),
            delay: Duration::ZERO,
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Makes every release listing take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_with(&self, error: ProviderError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VcsProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn cache_key(&self) -> String {
        "fake:acme".to_string()
    }

    fn list_projects(&self) -> BoxStream<'_, ProviderResult<Repository>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return stream::iter(vec![Err(error)]).boxed();
        }
        let repositories: Vec<_> = self
            .listings
            .iter()
            .map(|listing| Ok(listing.repository.clone()))
            .collect();
        stream::iter(repositories).boxed()
    }

    async fn list_release_files(
        &self,
        repository: &Repository,
    ) -> ProviderResult<Vec<RawReleaseFile>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self
            .listings
            .iter()
            .find(|listing| listing.repository == *repository)
            .map(|listing| listing.files.clone())
            .unwrap_or_default())
    }
}

pub fn repository(name: &str) -> Repository {
    Repository {
        owner: "acme".to_string(),
        name: name.to_string(),
        html_url: format!("https://github.com/acme/{name}"),
        private: false,
    }
}

pub fn release_file(repo: &str, filename: &str, sha256: Option<&str>) -> RawReleaseFile {
    RawReleaseFile {
        filename: filename.to_string(),
        url: format!("https://github.com/acme/{repo}/releases/download/v1.0.0/{filename}"),
        hash: sha256.map(|digest| FileHash::new("sha256", digest)),
    }
}

/// Listings used by most HTTP tests:
///
/// - `My_Pkg` with a hashed wheel and a stray `readme.txt`
/// - `docs` with only non-distribution files
/// - `widgets` with an sdist
pub fn sample_listings() -> Vec<RepositoryListing> {
    vec![
        RepositoryListing {
            repository: repository("My_Pkg"),
            files: vec![
                release_file("My_Pkg", "my_pkg-1.0.0-py3-none-any.whl", Some("abc123")),
                release_file("My_Pkg", "readme.txt", None),
            ],
        },
        RepositoryListing {
            repository: repository("docs"),
            files: vec![release_file("docs", "manual.pdf", None)],
        },
        RepositoryListing {
            repository: repository("widgets"),
            files: vec![release_file("widgets", "widgets-2.1.tar.gz", None)],
        },
    ]
}

/// Builds a test server around `provider` with `config`.
pub fn server_with(config: Config, provider: Arc<FakeProvider>) -> TestServer {
    let state = AppState::new(config, provider);
    TestServer::new(build_router(Arc::new(state))).expect("Failed to create test server")
}

pub fn sample_server() -> (TestServer, Arc<FakeProvider>) {
    let provider = Arc::new(FakeProvider::new(sample_listings()));
    let server = server_with(Config::for_org("acme"), Arc::clone(&provider));
    (server, provider)
}
