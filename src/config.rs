//! Startup configuration: resolved once in `main`, then passed by `Arc` into
//! every handler. No ambient globals.

use std::env;
use std::path::PathBuf;

const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1000 * 1024 * 1024;
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not prepare store root {path}: {source}")]
    StoreRoot {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid value for {var}: {value}")]
    BadValue { var: &'static str, value: String },
}

/// Everything the gateway needs to run, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute, canonicalized path to the directory holding stored files.
    pub store_root: PathBuf,
    /// Hard cap on a single upload's declared and actual size.
    pub max_upload_bytes: u64,
    /// Directory of `<status>.html` pages; `None` disables HTML error pages.
    pub error_pages: Option<PathBuf>,
    pub port: u16,
}

impl Config {
    /// Read configuration from the environment, creating the store root if it
    /// does not exist yet. Any failure here is fatal to startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let anchor = env::var("FILEGATE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let upload_dir =
            env::var("FILEGATE_UPLOAD_DIR").unwrap_or_else(|_| DEFAULT_UPLOAD_DIR.to_string());

        let store_root = anchor.join(upload_dir);
        std::fs::create_dir_all(&store_root).map_err(|source| ConfigError::StoreRoot {
            path: store_root.display().to_string(),
            source,
        })?;
        // Canonical form is what the traversal guard compares against.
        let store_root = store_root
            .canonicalize()
            .map_err(|source| ConfigError::StoreRoot {
                path: store_root.display().to_string(),
                source,
            })?;

        let max_upload_bytes = match env::var("FILEGATE_MAX_UPLOAD_BYTES") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::BadValue {
                var: "FILEGATE_MAX_UPLOAD_BYTES",
                value: raw,
            })?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let error_pages = env::var("FILEGATE_ERROR_PAGES").ok().map(PathBuf::from);

        let port = match env::var("FILEGATE_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::BadValue {
                var: "FILEGATE_PORT",
                value: raw,
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            store_root,
            max_upload_bytes,
            error_pages,
            port,
        })
    }

    /// A config rooted at an existing directory, for tests and embedding.
    pub fn with_store_root(store_root: PathBuf) -> Self {
        Self {
            store_root,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            error_pages: None,
            port: DEFAULT_PORT,
        }
    }
}
