//! PEP 503 page rendering.
//!
//! Pages are rendered to a complete `String` before a response is built, so a
//! template failure turns into an error status instead of a truncated page.

use askama::Template;

use crate::error::{AppError, AppResult};
use crate::index::ProjectIndex;

#[derive(Template)]
#[template(path = "simple_index.html")]
struct SimpleIndexTemplate<'a> {
    projects: Vec<ProjectLink<'a>>,
}

struct ProjectLink<'a> {
    name: &'a str,
}

#[derive(Template)]
#[template(path = "project_page.html")]
struct ProjectPageTemplate<'a> {
    name: &'a str,
    files: Vec<FileLink<'a>>,
}

struct FileLink<'a> {
    filename: &'a str,
    href: String,
}

/// Renders the root page listing every indexed project.
pub fn render_root(index: &ProjectIndex) -> AppResult<String> {
    let template = SimpleIndexTemplate {
        projects: index
            .projects()
            .map(|project| ProjectLink {
                name: &project.name,
            })
            .collect(),
    };
    Ok(template.render()?)
}

/// Renders the file listing of the project with the normalized name `name`.
///
/// # Errors
///
/// Returns [`AppError::ProjectNotFound`] if the index has no such project.
pub fn render_project(index: &ProjectIndex, name: &str) -> AppResult<String> {
    let project = index
        .get(name)
        .ok_or_else(|| AppError::ProjectNotFound(name.to_string()))?;

    let template = ProjectPageTemplate {
        name: &project.name,
        files: project
            .files
            .iter()
            .map(|file| FileLink {
                filename: &file.filename,
                href: file.href(),
            })
            .collect(),
    };
    Ok(template.render()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index;
    use crate::provider::testing::{file, repo};
    use crate::provider::RepositoryListing;

    fn sample_index() -> ProjectIndex {
        build_index(vec![
            RepositoryListing {
                repository: repo("My_Pkg"),
                files: vec![
                    file("my_pkg-1.0.0-py3-none-any.whl", Some(("sha256", "abc123"))),
                    file("readme.txt", None),
                ],
            },
            RepositoryListing {
                repository: repo("alpha"),
                files: vec![file("alpha-0.1.tar.gz", None)],
            },
        ])
    }

    #[test]
    fn test_root_lists_projects_in_order() {
        let html = render_root(&sample_index()).unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Simple index</title>"));
        assert!(html.contains(r#"<a href="my-pkg/">my-pkg</a>"#));
        let alpha = html.find(r#"href="alpha/""#).unwrap();
        let my_pkg = html.find(r#"href="my-pkg/""#).unwrap();
        assert!(alpha < my_pkg);
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_project_page_links_files_with_hash_fragment() {
        let html = render_project(&sample_index(), "my-pkg").unwrap();

        assert!(html.contains("<title>Links for my-pkg</title>"));
        assert!(html.contains("<h1>Links for my-pkg</h1>"));
        assert!(html.contains(r#"#sha256=abc123">my_pkg-1.0.0-py3-none-any.whl</a>"#));
        assert!(!html.contains("readme.txt"));
    }

    #[test]
    fn test_file_without_hash_has_no_fragment() {
        let html = render_project(&sample_index(), "alpha").unwrap();
        assert!(html.contains(r#"alpha-0.1.tar.gz">alpha-0.1.tar.gz</a>"#));
        assert!(!html.contains("#sha"));
        assert!(!html.contains("#md5"));
    }

    #[test]
    fn test_download_urls_are_percent_encoded_and_escaped() {
        let mut raw = file("widgets-1.0.tar.gz", Some(("sha256", "ab")));
        raw.url = r#"https://example.com/dl?a=1&b="x"/my file<z>.tar.gz"#.to_string();
        let index = build_index(vec![RepositoryListing {
            repository: repo("widgets"),
            files: vec![raw],
        }]);

        let html = render_project(&index, "widgets").unwrap();
        assert!(html.contains(
            r#"href="https://example.com/dl?a=1&amp;b=%22x%22/my%20file%3Cz%3E.tar.gz#sha256=ab""#
        ));
        assert!(!html.contains("my file"));
        assert!(!html.contains("<z>"));
    }

    #[test]
    fn test_link_text_is_html_escaped() {
        let template = ProjectPageTemplate {
            name: "widgets",
            files: vec![FileLink {
                filename: "widgets<b>&co-1.0.tar.gz",
                href: "https://example.com/widgets.tar.gz".to_string(),
            }],
        };

        let html = template.render().unwrap();
        assert!(html.contains("widgets&lt;b&gt;&amp;co-1.0.tar.gz</a>"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_unknown_project_is_not_found() {
        let err = render_project(&sample_index(), "missing").unwrap_err();
        assert!(matches!(err, AppError::ProjectNotFound(name) if name == "missing"));
    }

    #[test]
    fn test_empty_index_renders_valid_page() {
        let html = render_root(&ProjectIndex::default()).unwrap();
        assert!(html.contains("<body>"));
        assert!(!html.contains("<a "));
    }
}
