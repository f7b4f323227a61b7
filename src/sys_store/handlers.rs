//! HTTP glue: turn core results into hyper::Response<Body>.

use bytes::Bytes;
use hyper::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response};
use multer::Multipart;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::config::Config;
use crate::sys_errorpages::handlers::error_response;
use crate::sys_store::core::{self, GatewayError};

/// Chunk size for streaming downloads.
const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// The multipart field a file upload must arrive in.
const UPLOAD_FIELD: &str = "uploadFile";

#[derive(Serialize)]
struct ApiMessage {
    status: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ApiFileList {
    status: &'static str,
    files: Vec<String>,
}

fn json_response(status: hyper::StatusCode, body: &impl Serialize) -> Response<Body> {
    let body = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(Bytes::from(body)))
        .unwrap()
}

fn success_message(message: String) -> Response<Body> {
    json_response(
        hyper::StatusCode::OK,
        &ApiMessage {
            status: "success",
            message,
        },
    )
}

/// Pull one query parameter out of a raw query string, percent-decoded.
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

pub async fn handler_list(config: &Config) -> Response<Body> {
    match core::list_files(config).await {
        Ok(files) => json_response(
            hyper::StatusCode::OK,
            &ApiFileList {
                status: "success",
                files,
            },
        ),
        Err(err) => error_response(config, err).await,
    }
}

pub async fn handler_get(config: &Config, req: &Request<Body>) -> Response<Body> {
    let filename = query_param(req.uri().query(), "filename").unwrap_or_default();
    match core::open_file(config, &filename).await {
        Ok(stored) => {
            let stream = ReaderStream::with_capacity(stored.file, DOWNLOAD_CHUNK_BYTES);
            Response::builder()
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_LENGTH, stored.size_bytes)
                .header(
                    CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", stored.name),
                )
                .body(Body::wrap_stream(stream))
                .unwrap()
        }
        Err(err) => error_response(config, err).await,
    }
}

pub async fn handler_upload(config: &Config, req: Request<Body>) -> Response<Body> {
    if req.method() != Method::POST {
        return error_response(config, GatewayError::MethodNotAllowed).await;
    }

    // Reject oversized or empty uploads from the declared length alone,
    // before any of the body is read.
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    match declared {
        None | Some(0) => {
            return error_response(
                config,
                GatewayError::BadRequest("empty request or missing Content-Length".to_string()),
            )
            .await;
        }
        Some(n) if n > config.max_upload_bytes => {
            return error_response(
                config,
                GatewayError::PayloadTooLarge {
                    size: n,
                    limit: config.max_upload_bytes,
                },
            )
            .await;
        }
        Some(_) => {}
    }

    let boundary = match req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map(multer::parse_boundary)
    {
        Some(Ok(boundary)) => boundary,
        _ => {
            return error_response(
                config,
                GatewayError::BadRequest("expected multipart/form-data".to_string()),
            )
            .await;
        }
    };

    let mut multipart = Multipart::new(req.into_body(), boundary);
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(UPLOAD_FIELD) => {
                return match core::store_field(config, field).await {
                    Ok(stored_name) => {
                        info!(name = %stored_name, "file stored");
                        success_message(format!("file uploaded as '{stored_name}'"))
                    }
                    Err(err) => error_response(config, err).await,
                };
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                return error_response(
                    config,
                    GatewayError::BadRequest(format!("no form part named '{UPLOAD_FIELD}' found")),
                )
                .await;
            }
            Err(e) => {
                warn!(error = %e, "invalid multipart body");
                return error_response(
                    config,
                    GatewayError::BadRequest(format!("invalid form data: {e}")),
                )
                .await;
            }
        }
    }
}

pub async fn handler_delete(config: &Config, req: &Request<Body>) -> Response<Body> {
    if req.method() != Method::DELETE {
        return error_response(config, GatewayError::MethodNotAllowed).await;
    }
    let filename = query_param(req.uri().query(), "filename").unwrap_or_default();
    match core::remove_file(config, &filename).await {
        Ok(deleted) => {
            info!(name = %deleted, "file deleted");
            success_message(format!("file '{deleted}' was deleted successfully"))
        }
        Err(err) => error_response(config, err).await,
    }
}
