//! Core store operations: no Hyper types here.
//!
//! Everything that touches the store root lives in this module: the traversal
//! guard, the collision-probing exclusive create, and the four operations
//! (list, open, store, remove). Handlers only translate to and from HTTP.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use multer::Field;
use tokio::{fs, io::AsyncWriteExt};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no filename specified")]
    MissingParameter,
    #[error("invalid filename")]
    InvalidName,
    #[error("file '{0}' not found")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    BadRequest(String),
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Declared length when rejected up front; bytes seen so far when the
        /// stream overran the cap.
        size: u64,
        limit: u64,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(std::io::Error),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opened stored file, ready to stream out.
#[derive(Debug)]
pub struct StoredFile {
    pub name: String,
    pub file: fs::File,
    /// Size observed at open time; the Content-Length of the download.
    pub size_bytes: u64,
}

/// Validate `filename` and resolve it to a path inside the store root.
///
/// Rejects empty names, `..` segments, and names starting with a path
/// separator, then joins only the final component so the result can never
/// escape `store_root`. Nothing on the filesystem is touched.
pub fn checked_store_path(store_root: &Path, filename: &str) -> Result<PathBuf, GatewayError> {
    if filename.is_empty() {
        return Err(GatewayError::MissingParameter);
    }
    if filename.starts_with('/') || filename.starts_with('\\') {
        return Err(GatewayError::InvalidName);
    }
    if Path::new(filename)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(GatewayError::InvalidName);
    }
    let base = Path::new(filename)
        .file_name()
        .ok_or(GatewayError::InvalidName)?;
    let path = store_root.join(base);
    // Belt and braces: a single joined component cannot leave the root, but
    // an encoded oddity that somehow did must never be followed.
    if !path.starts_with(store_root) {
        return Err(GatewayError::InvalidName);
    }
    Ok(path)
}

/// List the names of all regular files directly under the store root.
///
/// Subdirectories (and symlinks resolving to directories) are excluded, not
/// flattened. Order is whatever the filesystem enumerates.
pub async fn list_files(config: &Config) -> Result<Vec<String>, GatewayError> {
    let mut dir = fs::read_dir(&config.store_root)
        .await
        .map_err(GatewayError::StoreUnavailable)?;
    let mut names = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(GatewayError::StoreUnavailable)?
    {
        // metadata() follows symlinks, so a link to a directory is skipped.
        match fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_file() => {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            // Entries removed mid-enumeration are simply absent from the list.
            _ => {}
        }
    }
    Ok(names)
}

/// Open a stored file for download.
pub async fn open_file(config: &Config, filename: &str) -> Result<StoredFile, GatewayError> {
    let path = checked_store_path(&config.store_root, filename)?;
    let meta = match fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(GatewayError::NotFound(filename.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
        return Err(GatewayError::NotFound(filename.to_string()));
    }
    let file = fs::File::open(&path).await?;
    let size_bytes = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    Ok(StoredFile {
        name,
        file,
        size_bytes,
    })
}

/// Stream one multipart field to the store and return the final stored name.
///
/// The name actually used may differ from the client's: collisions are
/// resolved by probing `stem_1`, `stem_2`, … before the extension, each probe
/// an atomic exclusive create so two concurrent uploads can never claim the
/// same slot. A failure mid-stream removes the partial file.
pub async fn store_field(config: &Config, mut field: Field<'_>) -> Result<String, GatewayError> {
    let client_name = field
        .file_name()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("no file selected".to_string()))?;
    let wanted = sanitize_client_name(client_name)?;

    let (path, final_name, mut file) = claim_slot(&config.store_root, &wanted).await?;
    // Armed from claim to completion: a write error, or this future being
    // dropped because the client severed the connection, must not leave a
    // partial file behind.
    let mut cleanup = SlotCleanup::new(path);

    write_field(&mut file, &mut field, config.max_upload_bytes).await?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&cleanup.path, std::fs::Permissions::from_mode(0o644)).await?;
    }

    cleanup.disarm();
    Ok(final_name)
}

/// Removes a claimed upload slot on drop unless the upload completed.
///
/// Drop is the only hook that still runs when the request future is dropped
/// mid-stream, so removal is synchronous.
struct SlotCleanup {
    path: PathBuf,
    armed: bool,
}

impl SlotCleanup {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SlotCleanup {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Remove a stored file, returning the name that was deleted.
pub async fn remove_file(config: &Config, filename: &str) -> Result<String, GatewayError> {
    let path = checked_store_path(&config.store_root, filename)?;
    let meta = match fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(GatewayError::NotFound(filename.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
        return Err(GatewayError::NotFound(filename.to_string()));
    }
    match fs::remove_file(&path).await {
        Ok(()) => Ok(filename.to_string()),
        // Lost a race with another delete; same outcome for the caller.
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(GatewayError::NotFound(filename.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Reduce a client-supplied filename to a safe single component.
fn sanitize_client_name(raw: &str) -> Result<String, GatewayError> {
    // Browsers and odd clients may send a full path; keep the last component.
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let name = sanitize_filename::sanitize(base);
    if name.is_empty() {
        return Err(GatewayError::BadRequest("no file selected".to_string()));
    }
    Ok(name)
}

/// Split `name` into stem and extension, the extension keeping its dot.
/// Leading-dot names count as all stem.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Find a free slot for `wanted` and create it exclusively.
///
/// `create_new` makes the existence check and the claim one atomic step, so
/// concurrent uploads of the same name settle on distinct slots.
async fn claim_slot(
    store_root: &Path,
    wanted: &str,
) -> Result<(PathBuf, String, fs::File), GatewayError> {
    let (stem, ext) = split_name(wanted);
    let mut counter: u32 = 0;
    loop {
        let candidate = if counter == 0 {
            wanted.to_string()
        } else {
            format!("{stem}_{counter}{ext}")
        };
        let path = store_root.join(&candidate);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Stream the field's chunks into `file`, enforcing the byte limit as bytes
/// actually arrive (a client may understate Content-Length).
async fn write_field(
    file: &mut fs::File,
    field: &mut Field<'_>,
    limit: u64,
) -> Result<(), GatewayError> {
    let mut written: u64 = 0;
    loop {
        let chunk = field
            .chunk()
            .await
            .map_err(|e| GatewayError::BadRequest(format!("malformed upload body: {e}")))?;
        let Some(chunk) = chunk else { break };
        written += chunk.len() as u64;
        if written > limit {
            return Err(GatewayError::PayloadTooLarge {
                size: written,
                limit,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config::with_store_root(dir.path().canonicalize().unwrap())
    }

    #[test]
    fn guard_rejects_empty() {
        let err = checked_store_path(Path::new("/store"), "").unwrap_err();
        assert!(matches!(err, GatewayError::MissingParameter));
    }

    #[test]
    fn guard_rejects_traversal() {
        for bad in ["../etc/passwd", "..", "a/../../b", "foo/.."] {
            let err = checked_store_path(Path::new("/store"), bad).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidName), "{bad}");
        }
    }

    #[test]
    fn guard_rejects_absolute() {
        for bad in ["/etc/passwd", "\\windows\\system32"] {
            let err = checked_store_path(Path::new("/store"), bad).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidName), "{bad}");
        }
    }

    #[test]
    fn guard_strips_directory_portion() {
        let path = checked_store_path(Path::new("/store"), "sub/dir/a.txt").unwrap();
        assert_eq!(path, Path::new("/store").join("a.txt"));
    }

    #[test]
    fn split_name_variants() {
        assert_eq!(split_name("x.txt"), ("x", ".txt"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("noext"), ("noext", ""));
        assert_eq!(split_name(".bashrc"), (".bashrc", ""));
    }

    #[tokio::test]
    async fn list_excludes_directories_and_nested_files() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::write(config.store_root.join("a.txt"), b"a").unwrap();
        std::fs::create_dir(config.store_root.join("nested")).unwrap();
        std::fs::write(config.store_root.join("nested").join("b.txt"), b"b").unwrap();

        let names = list_files(&config).await.unwrap();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn open_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let err = open_file(&config, "ghost.bin").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn open_reports_size_at_open() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::write(config.store_root.join("a.txt"), b"hello").unwrap();

        let stored = open_file(&config, "a.txt").await.unwrap();
        assert_eq!(stored.name, "a.txt");
        assert_eq!(stored.size_bytes, 5);
    }

    #[tokio::test]
    async fn open_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir(config.store_root.join("adir")).unwrap();
        let err = open_file(&config, "adir").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn claim_slot_probes_counters() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("x.txt"), b"first").unwrap();
        std::fs::write(root.join("x_1.txt"), b"second").unwrap();

        let (path, name, _file) = claim_slot(&root, "x.txt").await.unwrap();
        assert_eq!(name, "x_2.txt");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn remove_then_open_is_not_found() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::write(config.store_root.join("a.txt"), b"bye").unwrap();

        let deleted = remove_file(&config, "a.txt").await.unwrap();
        assert_eq!(deleted, "a.txt");
        let err = open_file(&config, "a.txt").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[test]
    fn slot_cleanup_removes_unless_disarmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("claimed.bin");

        std::fs::write(&path, b"x").unwrap();
        drop(SlotCleanup::new(path.clone()));
        assert!(!path.exists());

        std::fs::write(&path, b"x").unwrap();
        let mut cleanup = SlotCleanup::new(path.clone());
        cleanup.disarm();
        drop(cleanup);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn stream_overrun_is_payload_too_large_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.max_upload_bytes = 8;

        let body = "--b\r\n\
                    Content-Disposition: form-data; name=\"uploadFile\"; filename=\"big.bin\"\r\n\
                    \r\n\
                    way more than eight bytes\r\n\
                    --b--\r\n";
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(
            bytes::Bytes::from(body),
        )]);
        let mut multipart = multer::Multipart::new(stream, "b");
        let field = multipart.next_field().await.unwrap().unwrap();

        let err = store_field(&config, field).await.unwrap_err();
        match err {
            GatewayError::PayloadTooLarge { size, limit } => {
                assert_eq!(limit, 8);
                assert!(size > 8, "size is the byte count actually seen");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(std::fs::read_dir(&config.store_root)
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn remove_traversal_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::write(config.store_root.join("keep.txt"), b"keep").unwrap();

        let err = remove_file(&config, "../keep.txt").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidName));
        assert!(config.store_root.join("keep.txt").exists());
    }
}
