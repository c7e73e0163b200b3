//! # VCS-backed Simple Index
//!
//! A PEP 503 "Simple Repository API" index whose packages live as release
//! assets on a VCS hosting service. Wheels and sdists attached to GitHub
//! releases become installable with `pip install --index-url`.
//!
//! ## Request flow
//!
//! ```text
//! Router ─▶ SnapshotCache ─▶ VcsProvider ─▶ build_index ─▶ render ─▶ Router
//! ```
//!
//! ## Key Modules
//!
//! - [`provider`]: the [`VcsProvider`](provider::VcsProvider) trait and the GitHub client
//! - [`index`]: pure transformation of provider listings into projects
//! - [`render`]: the root and per-project HTML pages
//! - [`cache`]: stale-while-revalidate snapshot cache
//! - [`server`] and [`pypi`]: routing and request handlers
//! - [`config`]: JSON configuration file and validation

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod provider;
pub mod pypi;
pub mod pypi_utils;
pub mod render;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode, ProviderError, ProviderResult};
pub use index::{build_index, Project, ProjectIndex, ReleaseFile};
pub use provider::{GitHubProvider, RawReleaseFile, Repository, RepositoryListing, VcsProvider};
pub use pypi_utils::{normalize_pypi_name, parse_distribution_filename};
pub use server::{build_router, run_server};
pub use state::AppState;
