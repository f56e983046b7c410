// Private working directory and file-slot resolution
// One overwrite-in-place slot per staged binary resource (model weights, keyword file)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = "ari";
pub const ASSETS_DIR_NAME: &str = "assets";

/// File name of the single working slot for materialized model weights
pub const MODEL_SLOT_FILE: &str = "local_model.gguf";
/// File name of the single working slot for a user-supplied keyword file
pub const KEYWORD_SLOT_FILE: &str = "wakeword.bin";

/// Errors from path and URI resolution
#[derive(Debug, Clone, PartialEq)]
pub enum PathsError {
    /// Platform data directory could not be determined
    DataDirNotFound,
    /// The supplied URI does not resolve to a readable location
    InvalidUri(String),
}

impl std::fmt::Display for PathsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathsError::DataDirNotFound => write!(f, "App data directory not found"),
            PathsError::InvalidUri(uri) => write!(f, "Invalid source URI: {}", uri),
        }
    }
}

impl std::error::Error for PathsError {}

/// Resolved private directories for the runtime
///
/// All staged resources live under a single app-owned data directory. Tests
/// construct this with `at()` to point at a temporary root; production code
/// uses `discover()`.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimePaths {
    data_dir: PathBuf,
}

impl RuntimePaths {
    /// Resolve the platform data directory ({data_dir}/ari)
    pub fn discover() -> Result<Self, PathsError> {
        let data_dir = dirs::data_dir().ok_or(PathsError::DataDirNotFound)?;
        Ok(Self {
            data_dir: data_dir.join(APP_DIR_NAME),
        })
    }

    /// Use an explicit root as the private data directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: root.into(),
        }
    }

    /// The private data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding bundled (app-shipped) assets such as keyword files
    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join(ASSETS_DIR_NAME)
    }

    /// The single working slot for materialized model weights
    pub fn model_slot(&self) -> PathBuf {
        self.data_dir.join(MODEL_SLOT_FILE)
    }

    /// The single working slot for a materialized user-supplied keyword file
    pub fn keyword_slot(&self) -> PathBuf {
        self.data_dir.join(KEYWORD_SLOT_FILE)
    }

    /// Path under the data directory for a bundled asset materialized by name
    pub fn materialized_asset(&self, asset_path: &str) -> PathBuf {
        let file_name = asset_path.rsplit('/').next().unwrap_or(asset_path);
        self.data_dir.join(file_name)
    }

    /// Create the data directory if it does not exist yet
    pub fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }
}

/// Resolve an externally supplied URI to a filesystem path
///
/// Accepts plain paths and `file://` URIs. The original content-provider
/// indirection collapses to the filesystem here; anything else is rejected as
/// unreadable at the boundary.
pub fn resolve_uri(uri: &str) -> Result<PathBuf, PathsError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(PathsError::InvalidUri(uri.to_string()));
    }
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if path.is_empty() {
        return Err(PathsError::InvalidUri(uri.to_string()));
    }
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_uses_explicit_root() {
        let paths = RuntimePaths::at("/tmp/ari-test");
        assert_eq!(paths.data_dir(), Path::new("/tmp/ari-test"));
        assert_eq!(
            paths.model_slot(),
            Path::new("/tmp/ari-test").join(MODEL_SLOT_FILE)
        );
        assert_eq!(
            paths.keyword_slot(),
            Path::new("/tmp/ari-test").join(KEYWORD_SLOT_FILE)
        );
    }

    #[test]
    fn test_materialized_asset_uses_basename() {
        let paths = RuntimePaths::at("/tmp/ari-test");
        assert_eq!(
            paths.materialized_asset("wakewords/ari.bin"),
            Path::new("/tmp/ari-test").join("ari.bin")
        );
        assert_eq!(
            paths.materialized_asset("plain.bin"),
            Path::new("/tmp/ari-test").join("plain.bin")
        );
    }

    #[test]
    fn test_ensure_exists_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let paths = RuntimePaths::at(root.path().join("nested").join("data"));
        paths.ensure_exists().unwrap();
        assert!(paths.data_dir().is_dir());
    }

    #[test]
    fn test_resolve_uri_plain_path() {
        let path = resolve_uri("/models/test.gguf").unwrap();
        assert_eq!(path, PathBuf::from("/models/test.gguf"));
    }

    #[test]
    fn test_resolve_uri_file_scheme() {
        let path = resolve_uri("file:///models/test.gguf").unwrap();
        assert_eq!(path, PathBuf::from("/models/test.gguf"));
    }

    #[test]
    fn test_resolve_uri_rejects_empty() {
        assert!(matches!(resolve_uri(""), Err(PathsError::InvalidUri(_))));
        assert!(matches!(resolve_uri("   "), Err(PathsError::InvalidUri(_))));
        assert!(matches!(
            resolve_uri("file://"),
            Err(PathsError::InvalidUri(_))
        ));
    }
}
