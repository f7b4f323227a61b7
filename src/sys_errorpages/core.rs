//! Pure page lookup: map a numeric status code to a configured HTML page.

use std::path::{Path, PathBuf};

/// Status codes that may be served as full HTML pages when configured.
pub const PAGE_CODES: [u16; 5] = [400, 404, 405, 413, 500];

/// Path of the page file for `code` under the error-pages directory.
pub fn page_path(pages_dir: &Path, code: u16) -> PathBuf {
    pages_dir.join(format!("{code}.html"))
}

/// Load the page for `code`, or `None` if it is absent or unreadable.
pub async fn load_page(pages_dir: &Path, code: u16) -> Option<String> {
    tokio::fs::read_to_string(page_path(pages_dir, code))
        .await
        .ok()
}
