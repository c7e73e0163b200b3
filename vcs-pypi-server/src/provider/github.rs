//! GitHub REST API provider.
//!
//! Repositories come from `/orgs/{org}/repos` or `/users/{user}/repos`,
//! release files from `/repos/{owner}/{repo}/releases`. Every list endpoint
//! is walked through the `Link: <...>; rel="next"` cursor. Only the fields
//! the index consumes are decoded; entries that do not fit the schema are
//! skipped with a warning.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{FileHash, RawReleaseFile, ReleaseFilter, Repository, VcsProvider};
use crate::config::{OwnerConfig, OwnerKind, ProviderConfig};
use crate::error::{AppError, AppResult, ProviderError, ProviderResult};
use crate::pypi_utils::version_from_tag;

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const PER_PAGE: &str = "100";
/// GitHub asks clients without rate-limit headers to wait at least a minute.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct GhOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhRepository {
    name: String,
    owner: GhOwner,
    html_url: String,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct GhRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct GhAsset {
    name: String,
    browser_download_url: String,
    /// `sha256:<hex>` on assets uploaded after GitHub started publishing digests.
    digest: Option<String>,
    state: Option<String>,
}

/// [`VcsProvider`] backed by the GitHub REST API.
pub struct GitHubProvider {
    client: Client,
    api_url: Url,
    owners: Vec<OwnerConfig>,
    token: Option<String>,
    filter: ReleaseFilter,
    required_files: Vec<String>,
}

impl GitHubProvider {
    /// Creates a client for the owners and filters in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL is not an absolute http(s) URL or the
    /// underlying HTTP client cannot be created.
    pub fn new(config: &ProviderConfig) -> AppResult<Self> {
        let mut api_url = Url::parse(&config.api_url)
            .map_err(|e| AppError::Config(format!("Invalid API URL '{}': {e}", config.api_url)))?;
        if api_url.cannot_be_a_base() || !matches!(api_url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "API URL must be an http(s) URL: {}",
                config.api_url
            )));
        }
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .user_agent(concat!("vcs-pypi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;

        if config.token.is_none() {
            warn!("No provider token configured; only public repositories are visible and rate limits are low");
        }

        Ok(Self {
            client,
            api_url,
            owners: config.owners.clone(),
            token: config.token.as_ref().map(|token| token.expose().to_string()),
            filter: ReleaseFilter {
                include_prereleases: config.include_prereleases,
                include_drafts: config.include_drafts,
                include_source_archives: config.include_source_archives,
            },
            required_files: config.required_files.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str], paginated: bool) -> ProviderResult<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| ProviderError::Misconfigured(format!("{} cannot be a base URL", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        if paginated {
            url.query_pairs_mut().append_pair("per_page", PER_PAGE);
        }
        Ok(url)
    }

    fn owner_repos_url(&self, owner: &OwnerConfig) -> ProviderResult<Url> {
        let mut url = match owner.kind {
            OwnerKind::Org => self.endpoint(&["orgs", owner.name.as_str(), "repos"], true)?,
            OwnerKind::User => self.endpoint(&["users", owner.name.as_str(), "repos"], true)?,
        };
        let repo_type = match owner.kind {
            OwnerKind::Org => "all",
            OwnerKind::User => "owner",
        };
        url.query_pairs_mut().append_pair("type", repo_type);
        Ok(url)
    }

    async fn get(&self, url: Url) -> ProviderResult<Response> {
        debug!(url = %url, "GitHub API request");
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(transport_error)
    }

    /// Fetches one page of a list endpoint and the URL of the next page.
    async fn get_page(&self, url: Url) -> ProviderResult<(Vec<Value>, Option<Url>)> {
        let response = self.get(url).await?;
        check_status(response.status(), response.headers(), Utc::now())?;
        let next = next_page_url(response.headers());
        let items = response.json::<Vec<Value>>().await.map_err(|e| {
            if e.is_decode() {
                ProviderError::InvalidResponse(format!("expected a JSON array: {e}"))
            } else {
                transport_error(e)
            }
        })?;
        Ok((items, next))
    }

    /// Streams every item of a paginated list endpoint.
    fn paginate(&self, first: ProviderResult<Url>) -> BoxStream<'_, ProviderResult<Value>> {
        stream::try_unfold(Some(first), move |state| async move {
            let url = match state {
                Some(url) => url?,
                None => return Ok(None),
            };
            let (items, next) = self.get_page(url).await?;
            let items = stream::iter(items.into_iter().map(Ok::<_, ProviderError>));
            Ok::<_, ProviderError>(Some((items, next.map(Ok))))
        })
        .try_flatten()
        .boxed()
    }

    fn owner_repositories<'a>(
        &'a self,
        owner: &'a OwnerConfig,
    ) -> BoxStream<'a, ProviderResult<Repository>> {
        self.paginate(self.owner_repos_url(owner))
            .try_filter_map(move |value| async move { Ok::<_, ProviderError>(decode_repository(value, owner)) })
            .boxed()
    }

    /// Whether any of the configured marker files exists at the repository root.
    async fn has_required_file(&self, repository: &Repository) -> ProviderResult<bool> {
        for file in &self.required_files {
            let url = self.endpoint(
                &[
                    "repos",
                    repository.owner.as_str(),
                    repository.name.as_str(),
                    "contents",
                    file.as_str(),
                ],
                false,
            )?;
            let response = self.get(url).await?;
            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            check_status(response.status(), response.headers(), Utc::now())?;
            return Ok(true);
        }
        debug!(repository = %repository.full_name(), "Repository has none of the required files");
        Ok(false)
    }

    fn release_files(&self, repository: &Repository, release: &GhRelease) -> Vec<RawReleaseFile> {
        let mut files: Vec<RawReleaseFile> = release
            .assets
            .iter()
            .filter_map(|value| match serde_json::from_value::<GhAsset>(value.clone()) {
                Ok(asset) => Some(asset),
                Err(e) => {
                    warn!(repository = %repository.full_name(), tag = %release.tag_name, error = %e, "Skipping malformed release asset");
                    None
                }
            })
            .filter(|asset| asset.state.as_deref().map_or(true, |state| state == "uploaded"))
            .map(|asset| RawReleaseFile {
                hash: asset.digest.as_deref().and_then(parse_digest),
                filename: asset.name,
                url: asset.browser_download_url,
            })
            .collect();

        if self.filter.include_source_archives && !repository.private && !release.draft {
            if let Some(archive) = source_archive(repository, &release.tag_name) {
                files.push(archive);
            }
        }

        files
    }

    fn release_selected(&self, release: &GhRelease) -> bool {
        (self.filter.include_drafts || !release.draft)
            && (self.filter.include_prereleases || !release.prerelease)
    }
}

#[async_trait]
impl VcsProvider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn cache_key(&self) -> String {
        let owners: Vec<String> = self
            .owners
            .iter()
            .map(|owner| owner.name.to_lowercase())
            .collect();
        format!("github:{}:{}", self.api_url.host_str().unwrap_or_default(), owners.join(","))
    }

    fn list_projects(&self) -> BoxStream<'_, ProviderResult<Repository>> {
        let repositories = stream::iter(self.owners.iter())
            .flat_map(move |owner| self.owner_repositories(owner));

        if self.required_files.is_empty() {
            return repositories.boxed();
        }

        repositories
            .try_filter_map(move |repository| async move {
                Ok::<_, ProviderError>(self
                    .has_required_file(&repository)
                    .await?
                    .then_some(repository))
            })
            .boxed()
    }

    async fn list_release_files(
        &self,
        repository: &Repository,
    ) -> ProviderResult<Vec<RawReleaseFile>> {
        let url = self.endpoint(
            &["repos", repository.owner.as_str(), repository.name.as_str(), "releases"],
            true,
        );
        let values: Vec<Value> = self.paginate(url).try_collect().await?;

        let mut releases: Vec<GhRelease> = values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<GhRelease>(value) {
                Ok(release) => Some(release),
                Err(e) => {
                    warn!(repository = %repository.full_name(), error = %e, "Skipping malformed release");
                    None
                }
            })
            .filter(|release| self.release_selected(release))
            .collect();
        releases.sort_by_key(|release| release.created_at);

        let mut files = Vec::new();
        for release in &releases {
            let release_files = self.release_files(repository, release);
            if release_files.is_empty() {
                debug!(repository = %repository.full_name(), tag = %release.tag_name, "Skipping release without assets");
                continue;
            }
            files.extend(release_files);
        }

        info!(
            repository = %repository.full_name(),
            releases = releases.len(),
            files = files.len(),
            "Fetched GitHub releases"
        );
        Ok(files)
    }
}

fn decode_repository(value: Value, owner: &OwnerConfig) -> Option<Repository> {
    let repository = match serde_json::from_value::<GhRepository>(value) {
        Ok(repository) => repository,
        Err(e) => {
            warn!(owner = %owner.name, error = %e, "Skipping malformed repository entry");
            return None;
        }
    };
    if !repository.owner.login.eq_ignore_ascii_case(&owner.name) {
        debug!(repository = %repository.name, login = %repository.owner.login, "Skipping repository owned by another account");
        return None;
    }
    Some(Repository {
        owner: repository.owner.login,
        name: repository.name,
        html_url: repository.html_url,
        private: repository.private,
    })
}

/// Parses GitHub's `algorithm:hex` digest notation.
fn parse_digest(digest: &str) -> Option<FileHash> {
    let (algorithm, value) = digest.split_once(':')?;
    if algorithm.is_empty() || value.is_empty() {
        return None;
    }
    Some(FileHash::new(
        algorithm.to_ascii_lowercase(),
        value.to_ascii_lowercase(),
    ))
}

/// The tag tarball GitHub generates for every release of a public repository.
fn source_archive(repository: &Repository, tag: &str) -> Option<RawReleaseFile> {
    let mut url = Url::parse(&repository.html_url).ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push("archive")
        .push(&format!("{tag}.tar.gz"));
    Some(RawReleaseFile {
        filename: format!("{}-{}.tar.gz", repository.name, version_from_tag(tag)),
        url: url.to_string(),
        hash: None,
    })
}

fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Unavailable(format!("request timed out: {error}"))
    } else {
        ProviderError::Unavailable(error.to_string())
    }
}

fn header_str<'a>(headers: &'a header::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Maps a GitHub status code and rate-limit headers onto the error taxonomy.
pub(crate) fn check_status(
    status: StatusCode,
    headers: &header::HeaderMap,
    now: DateTime<Utc>,
) -> ProviderResult<()> {
    if status.is_success() {
        return Ok(());
    }

    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(retry_after) = rate_limit_wait(headers, now) {
            warn!(status = %status, retry_after_secs = retry_after.as_secs(), "GitHub rate limit exceeded");
            return Err(ProviderError::RateLimited { retry_after });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after: DEFAULT_RATE_LIMIT_WAIT,
            });
        }
        return Err(ProviderError::Auth(
            "token lacks access to the requested resource".to_string(),
        ));
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(ProviderError::Auth(
            "bad or expired credentials".to_string(),
        )),
        StatusCode::NOT_FOUND => Err(ProviderError::InvalidResponse(
            "resource not found; check the configured owners".to_string(),
        )),
        status if status.is_server_error() => {
            Err(ProviderError::Unavailable(format!("GitHub answered {status}")))
        }
        status => Err(ProviderError::InvalidResponse(format!(
            "unexpected status {status}"
        ))),
    }
}

/// How long to wait according to `retry-after` or the `x-ratelimit-*` headers.
fn rate_limit_wait(headers: &header::HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(seconds) = header_str(headers, "retry-after").and_then(|v| v.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(seconds.max(1)));
    }

    if header_str(headers, "x-ratelimit-remaining").map(str::trim) != Some("0") {
        return None;
    }

    let wait = header_str(headers, "x-ratelimit-reset")
        .and_then(|reset| reset.trim().parse::<i64>().ok())
        .map(|reset| {
            let seconds = (reset - now.timestamp()).max(1);
            Duration::from_secs(seconds as u64)
        })
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
    Some(wait)
}

/// Extracts the `rel="next"` target from a `Link` header.
pub(crate) fn next_page_url(headers: &header::HeaderMap) -> Option<Url> {
    let link = header_str(headers, "link")?;
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}
