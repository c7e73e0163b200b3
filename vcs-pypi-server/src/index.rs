//! # Index Builder
//!
//! Turns the raw repository listings of a provider into the project map the
//! pages are rendered from. Building is pure: the same listings always yield
//! the same index.
//!
//! - each repository becomes a project keyed by its normalized name
//! - the first repository to claim a normalized name keeps it, later ones are
//!   reported and ignored
//! - release files that are not wheels or sdists are dropped
//! - projects left without files are not indexed

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};
use url::Url;

use crate::provider::{FileHash, Repository, RepositoryListing};
use crate::pypi_utils::{normalize_pypi_name, parse_distribution_filename};

/// Hash algorithms pip knows how to verify.
pub const SUPPORTED_HASH_ALGORITHMS: &[&str] =
    &["md5", "sha1", "sha224", "sha256", "sha384", "sha512"];

/// A validated, downloadable distribution file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFile {
    pub filename: String,
    pub url: Url,
    pub hash: Option<FileHash>,
}

impl ReleaseFile {
    /// Link target for the project page, with the `#algo=digest` fragment
    /// when a hash is known.
    pub fn href(&self) -> String {
        match &self.hash {
            Some(hash) => {
                let mut url = self.url.clone();
                url.set_fragment(Some(&format!("{}={}", hash.algorithm, hash.digest)));
                url.to_string()
            }
            None => self.url.to_string(),
        }
    }
}

/// One indexed project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Normalized PEP 503 name.
    pub name: String,
    /// Repository the project was built from.
    pub repository: Repository,
    /// Files in release order.
    pub files: Vec<ReleaseFile>,
}

/// Immutable snapshot of every indexed project, keyed by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectIndex {
    projects: BTreeMap<String, Project>,
}

impl ProjectIndex {
    /// Looks up a project by its normalized name.
    pub fn get(&self, normalized: &str) -> Option<&Project> {
        self.projects.get(normalized)
    }

    /// Projects in ascending normalized-name order.
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Builds the project index from provider listings.
///
/// Listings are processed in the order given; the caller sorts them so that
/// conflict resolution is deterministic.
pub fn build_index(listings: Vec<RepositoryListing>) -> ProjectIndex {
    let mut claimed: BTreeMap<String, Project> = BTreeMap::new();
    let mut conflicts = 0usize;
    let mut dropped_files = 0usize;

    for listing in listings {
        let name = normalize_pypi_name(&listing.repository.name);
        if name.is_empty() {
            warn!(repository = %listing.repository.full_name(), "Repository name normalizes to an empty project name");
            continue;
        }

        let slot = match claimed.entry(name) {
            Entry::Occupied(existing) => {
                conflicts += 1;
                warn!(
                    project = %existing.key(),
                    kept = %existing.get().repository.full_name(),
                    ignored = %listing.repository.full_name(),
                    "Repositories normalize to the same project name; keeping the first"
                );
                continue;
            }
            Entry::Vacant(slot) => slot,
        };

        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(listing.files.len());
        for raw in listing.files {
            if let Err(e) = parse_distribution_filename(&raw.filename) {
                warn!(repository = %listing.repository.full_name(), error = %e, "Dropping release file");
                dropped_files += 1;
                continue;
            }

            let url = match Url::parse(&raw.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => url,
                Ok(_) | Err(_) => {
                    warn!(
                        repository = %listing.repository.full_name(),
                        filename = %raw.filename,
                        url = %raw.url,
                        "Dropping release file with an unusable download URL"
                    );
                    dropped_files += 1;
                    continue;
                }
            };

            if !seen.insert(raw.filename.clone()) {
                debug!(repository = %listing.repository.full_name(), filename = %raw.filename, "Dropping duplicate release file");
                dropped_files += 1;
                continue;
            }

            let hash = raw.hash.filter(|hash| {
                let usable = is_usable_hash(hash);
                if !usable {
                    debug!(filename = %raw.filename, algorithm = %hash.algorithm, "Ignoring unusable file hash");
                }
                usable
            });

            files.push(ReleaseFile {
                filename: raw.filename,
                url,
                hash,
            });
        }

        let name = slot.key().clone();
        slot.insert(Project {
            name,
            repository: listing.repository,
            files,
        });
    }

    let projects: BTreeMap<String, Project> = claimed
        .into_iter()
        .filter(|(name, project)| {
            if project.files.is_empty() {
                debug!(project = %name, "Project has no distribution files; not indexed");
            }
            !project.files.is_empty()
        })
        .collect();

    info!(
        projects = projects.len(),
        conflicts,
        dropped_files,
        "Built project index"
    );

    ProjectIndex { projects }
}

fn is_usable_hash(hash: &FileHash) -> bool {
    SUPPORTED_HASH_ALGORITHMS.contains(&hash.algorithm.as_str())
        && !hash.digest.is_empty()
        && hash.digest.chars().all(|c| c.is_ascii_hexdigit())
}
