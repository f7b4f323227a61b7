//! Map gateway errors onto HTTP responses.
//!
//! JSON error bodies all share the shape `{"status":"error","message":...}`.
//! When an error-pages directory is configured, the classic page codes render
//! the configured HTML instead; a configured-but-missing page degrades to a
//! plain-text 500, matching the behavior file-hosting frontends expect.

use bytes::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use serde::Serialize;
use tracing::{error, warn};

use crate::config::Config;
use crate::sys_errorpages::core::{load_page, PAGE_CODES};
use crate::sys_store::core::GatewayError;

#[derive(Serialize)]
struct ApiError {
    status: &'static str,
    message: String,
}

pub fn status_of(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::MissingParameter => StatusCode::BAD_REQUEST,
        GatewayError::InvalidName => StatusCode::BAD_REQUEST,
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render `err` as the client-facing response.
pub async fn error_response(config: &Config, err: GatewayError) -> Response<Body> {
    let status = status_of(&err);
    match &err {
        GatewayError::InvalidName => warn!("rejected traversal or absolute-path filename"),
        GatewayError::StoreUnavailable(e) => error!(error = %e, "store unavailable"),
        GatewayError::Io(e) => error!(error = %e, "store i/o failure"),
        _ => {}
    }

    if let Some(pages_dir) = &config.error_pages {
        if PAGE_CODES.contains(&status.as_u16()) {
            return match load_page(pages_dir, status.as_u16()).await {
                Some(html) => html_response(status, html),
                None => plain_500(status.as_u16()),
            };
        }
    }

    json_error(status, err.to_string())
}

pub fn json_error(status: StatusCode, message: String) -> Response<Body> {
    let body = serde_json::to_vec(&ApiError {
        status: "error",
        message,
    })
    .unwrap_or_else(|_| b"{\"status\":\"error\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(Bytes::from(body)))
        .unwrap()
}

fn html_response(status: StatusCode, html: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html")
        .header(CONTENT_LENGTH, html.len())
        .body(Body::from(html))
        .unwrap()
}

fn plain_500(wanted_code: u16) -> Response<Body> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from(format!(
            "server error: the configured error page for status {wanted_code} could not be found"
        )))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn config_with_pages(store: &TempDir, pages: Option<&TempDir>) -> Config {
        let mut config = Config::with_store_root(store.path().to_path_buf());
        config.error_pages = pages.map(|d| d.path().to_path_buf());
        config
    }

    #[test]
    fn status_mapping_matches_surface() {
        assert_eq!(
            status_of(&GatewayError::MissingParameter),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&GatewayError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(&GatewayError::MethodNotAllowed),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            status_of(&GatewayError::PayloadTooLarge { size: 2, limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[tokio::test]
    async fn json_shape_without_pages_dir() {
        let store = TempDir::new().unwrap();
        let config = config_with_pages(&store, None);
        let resp = error_response(&config, GatewayError::InvalidName).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "error");
        assert_eq!(parsed["message"], "invalid filename");
    }

    #[tokio::test]
    async fn configured_page_is_served_with_real_status() {
        let store = TempDir::new().unwrap();
        let pages = TempDir::new().unwrap();
        std::fs::write(pages.path().join("405.html"), "<h1>405</h1>").unwrap();
        let config = config_with_pages(&store, Some(&pages));

        let resp = error_response(&config, GatewayError::MethodNotAllowed).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"<h1>405</h1>");
    }

    #[tokio::test]
    async fn missing_configured_page_degrades_to_plain_500() {
        let store = TempDir::new().unwrap();
        let pages = TempDir::new().unwrap();
        let config = config_with_pages(&store, Some(&pages));

        let resp = error_response(&config, GatewayError::MethodNotAllowed).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
