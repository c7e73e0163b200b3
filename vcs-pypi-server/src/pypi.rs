use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use tracing::{debug, info};

use crate::render::{render_project, render_root};
use crate::{normalize_pypi_name, AppError, AppResult, AppState};

/// Returns the PEP 503 root page listing every indexed project.
///
/// # Route
/// `GET /` and `GET /simple/`
///
/// # Example Response
/// ```html
/// <!DOCTYPE html>
/// <html>
///   <head><title>Simple index</title></head>
///   <body>
///     <h1>Simple index</h1>
///     <a href="my-pkg/">my-pkg</a><br/>
///   </body>
/// </html>
/// ```
pub async fn simple_index(State(state): State<Arc<AppState>>) -> AppResult<Html<String>> {
    let index = state.project_index().await?;
    info!(projects = index.len(), "Serving simple index");
    Ok(Html(render_root(&index)?))
}

/// Returns the download links of one project.
///
/// Names that are not in normalized form are redirected to their normalized
/// URL when such a project exists.
///
/// # Route
/// `GET /{project}/` and `GET /simple/{project}/`
///
/// # Example Response
/// ```html
/// <!DOCTYPE html>
/// <html>
///   <head><title>Links for my-pkg</title></head>
///   <body>
///     <h1>Links for my-pkg</h1>
///     <a href="https://github.com/acme/my_pkg/releases/download/v1.0.0/my_pkg-1.0.0-py3-none-any.whl#sha256=abc123">my_pkg-1.0.0-py3-none-any.whl</a><br/>
///   </body>
/// </html>
/// ```
pub async fn project_page(
    Path(project): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let normalized = normalize_pypi_name(&project);
    let index = state.project_index().await?;

    if normalized != project {
        if index.get(&normalized).is_none() {
            return Err(AppError::ProjectNotFound(project));
        }
        debug!(requested = %project, normalized = %normalized, "Redirecting to normalized project URL");
        return moved_permanently(&format!("../{normalized}/"));
    }

    let html = render_project(&index, &normalized)?;
    info!(project = %normalized, "Serving project page");
    Ok(Html(html).into_response())
}

/// Redirects `/{project}` to the slash-terminated, normalized project URL.
pub async fn project_redirect(
    Path(project): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let normalized = normalize_pypi_name(&project);
    let index = state.project_index().await?;

    if index.get(&normalized).is_none() {
        return Err(AppError::ProjectNotFound(project));
    }
    moved_permanently(&format!("{normalized}/"))
}

fn moved_permanently(location: &str) -> AppResult<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|e| AppError::InternalError(format!("Invalid redirect location: {e}")))?;
    Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response())
}
