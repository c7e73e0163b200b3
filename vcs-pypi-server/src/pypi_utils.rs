//! PyPI naming rules: PEP 503 name normalization and distribution filename
//! validation for wheels and source distributions.

use regex::Regex;
use std::sync::OnceLock;

/// Longest filename accepted as a distribution file.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Source distribution extensions, longest match first.
const SDIST_EXTENSIONS: &[&str] = &[
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".zip", ".tar",
];

fn name_separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-_.]+").unwrap_or_else(|e| {
            panic!("Failed to compile PyPI name normalization regex: {}", e)
        })
    })
}

fn project_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$")
            .unwrap_or_else(|e| panic!("Failed to compile project name regex: {}", e))
    })
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9][0-9A-Za-z.!+_]*$")
            .unwrap_or_else(|e| panic!("Failed to compile version regex: {}", e))
    })
}

fn wheel_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.]+$")
            .unwrap_or_else(|e| panic!("Failed to compile wheel tag regex: {}", e))
    })
}

/// Normalize PyPI package name according to PEP 503.
///
/// Lowercases the name and replaces runs of `[-_.]+` with a single `-`.
///
/// # Examples
///
/// ```
/// # use vcs_pypi_server::pypi_utils::normalize_pypi_name;
/// assert_eq!(normalize_pypi_name("Django-REST-framework"), "django-rest-framework");
/// assert_eq!(normalize_pypi_name("My__Pkg"), "my-pkg");
/// ```
pub fn normalize_pypi_name(name: &str) -> String {
    name_separator_regex()
        .replace_all(&name.to_lowercase(), "-")
        .to_string()
}

/// Kind of distribution a filename describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionKind {
    Wheel,
    Sdist,
}

/// Name and version parsed out of a valid distribution filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionFilename {
    pub name: String,
    pub version: String,
    pub kind: DistributionKind,
}

/// A release file whose name is neither a wheel nor an sdist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid distribution filename '{filename}': {reason}")]
pub struct InvalidFilename {
    pub filename: String,
    pub reason: &'static str,
}

impl InvalidFilename {
    fn new(filename: &str, reason: &'static str) -> Self {
        Self {
            filename: filename.to_string(),
            reason,
        }
    }
}

/// Validates `filename` against the wheel and sdist naming conventions.
///
/// Wheels follow `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`,
/// sdists follow `{name}-{version}.{ext}` where `ext` is one of the archive
/// formats installers accept.
///
/// # Examples
///
/// ```
/// # use vcs_pypi_server::pypi_utils::{parse_distribution_filename, DistributionKind};
/// let wheel = parse_distribution_filename("my_pkg-1.0.0-py3-none-any.whl").unwrap();
/// assert_eq!(wheel.kind, DistributionKind::Wheel);
/// assert!(parse_distribution_filename("readme.txt").is_err());
/// ```
pub fn parse_distribution_filename(filename: &str) -> Result<DistributionFilename, InvalidFilename> {
    if filename.is_empty() {
        return Err(InvalidFilename::new(filename, "empty filename"));
    }
    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(InvalidFilename::new(filename, "filename too long"));
    }
    if filename.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(InvalidFilename::new(
            filename,
            "contains whitespace or control characters",
        ));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(InvalidFilename::new(filename, "contains a path component"));
    }

    if let Some(stem) = filename.strip_suffix(".whl") {
        return parse_wheel(filename, stem);
    }

    let lowered = filename.to_ascii_lowercase();
    if let Some(ext) = SDIST_EXTENSIONS.iter().find(|ext| lowered.ends_with(*ext)) {
        let stem = &filename[..filename.len() - ext.len()];
        return parse_sdist(filename, stem);
    }

    Err(InvalidFilename::new(
        filename,
        "not a wheel or source distribution",
    ))
}

fn parse_wheel(filename: &str, stem: &str) -> Result<DistributionFilename, InvalidFilename> {
    let parts: Vec<&str> = stem.split('-').collect();
    let (name, version, build, tags) = match parts.as_slice() {
        [name, version, python, abi, platform] => (*name, *version, None, [*python, *abi, *platform]),
        [name, version, build, python, abi, platform] => {
            (*name, *version, Some(*build), [*python, *abi, *platform])
        }
        _ => {
            return Err(InvalidFilename::new(
                filename,
                "wheel name must have 5 or 6 dash-separated parts",
            ))
        }
    };

    if !project_name_regex().is_match(name) {
        return Err(InvalidFilename::new(filename, "invalid project name"));
    }
    if !version_regex().is_match(version) {
        return Err(InvalidFilename::new(filename, "invalid version"));
    }
    if build.is_some_and(|build| !build.starts_with(|c: char| c.is_ascii_digit())) {
        return Err(InvalidFilename::new(
            filename,
            "wheel build tag must start with a digit",
        ));
    }
    if !tags.iter().all(|tag| wheel_tag_regex().is_match(tag)) {
        return Err(InvalidFilename::new(filename, "invalid wheel compatibility tag"));
    }

    Ok(DistributionFilename {
        name: name.to_string(),
        version: version.to_string(),
        kind: DistributionKind::Wheel,
    })
}

fn parse_sdist(filename: &str, stem: &str) -> Result<DistributionFilename, InvalidFilename> {
    let Some((name, version)) = stem.rsplit_once('-') else {
        return Err(InvalidFilename::new(filename, "missing version"));
    };

    if !project_name_regex().is_match(name) {
        return Err(InvalidFilename::new(filename, "invalid project name"));
    }
    if !version_regex().is_match(version) {
        return Err(InvalidFilename::new(filename, "invalid version"));
    }

    Ok(DistributionFilename {
        name: name.to_string(),
        version: version.to_string(),
        kind: DistributionKind::Sdist,
    })
}

/// Turns a release tag into a version string (`v1.2.0` becomes `1.2.0`).
pub fn version_from_tag(tag: &str) -> &str {
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}
