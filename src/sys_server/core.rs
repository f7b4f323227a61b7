//! Router and accept loop: the single outermost error boundary.
//!
//! The hyper service is `Infallible`; every gateway error is already mapped
//! to a structured response by the handlers, and anything that still panics
//! is caught here and turned into a generic 500.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tracing::{error, info};

use crate::config::Config;
use crate::sys_errorpages::handlers::{error_response, json_error};
use crate::sys_store::core::GatewayError;
use crate::sys_store::handlers;

/// Dispatch one request to the operation its path names.
pub async fn route(req: Request<Body>, config: &Config) -> Response<Body> {
    match req.uri().path() {
        "/files/list" => {
            if req.method() == Method::GET {
                handlers::handler_list(config).await
            } else {
                error_response(config, GatewayError::MethodNotAllowed).await
            }
        }
        "/files/get" => {
            if req.method() == Method::GET {
                handlers::handler_get(config, &req).await
            } else {
                error_response(config, GatewayError::MethodNotAllowed).await
            }
        }
        "/files/upload" => handlers::handler_upload(config, req).await,
        "/files/delete" => handlers::handler_delete(config, &req).await,
        _ => json_error(StatusCode::NOT_FOUND, "no such route".to_string()),
    }
}

/// Route with a panic guard, so a fault in a handler can never tear down the
/// connection task without a response.
pub async fn serve_request(req: Request<Body>, config: &Config) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match AssertUnwindSafe(route(req, config)).catch_unwind().await {
        Ok(resp) => resp,
        Err(_) => {
            error!(%method, %path, "handler panicked");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    }
}

/// Bind and serve until the process is stopped.
pub async fn run_server(config: Arc<Config>) -> hyper::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let make_svc = make_service_fn(move |_conn| {
        let config = config.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let config = config.clone();
                async move { Ok::<_, Infallible>(serve_request(req, &config).await) }
            }))
        }
    });

    info!(%addr, "filegate listening");
    Server::bind(&addr).serve(make_svc).await
}
