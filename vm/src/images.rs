use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use vmstrap_fs::{self as fs, FsError};

use crate::paths::Paths;

const BUILTIN_CATALOG: &str = include_str!("../images.toml");

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read image catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("failed to parse image catalog {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("image catalog not found at: {0}")]
    NotFound(PathBuf),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// A base image the catalog knows how to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    pub url: String,
    /// Kept as text so one unsupported entry doesn't poison the whole catalog.
    pub arch: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageCatalog {
    #[serde(default)]
    images: BTreeMap<String, CatalogEntry>,
}

impl ImageCatalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::parse(BUILTIN_CATALOG, "<built-in>")
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self, CatalogError> {
        toml::from_str(text).map_err(|source| CatalogError::Parse {
            origin: origin.to_owned(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_file_to_string(path)
            .await
            .map_err(|source| CatalogError::Read {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Explicit path first, then `<root>/images.toml`, then the built-in catalog.
    pub async fn discover(explicit: Option<&Path>, paths: &Paths) -> Result<Self, CatalogError> {
        if let Some(path) = explicit {
            if !fs::path_exists(path).await? {
                return Err(CatalogError::NotFound(path.to_owned()));
            }
            debug!("using image catalog {}", path.display());
            return Self::load(path).await;
        }

        let local = paths.catalog_file();
        if fs::path_exists(&local).await? {
            debug!("using image catalog {}", local.display());
            return Self::load(&local).await;
        }

        debug!("using built-in image catalog");
        Self::builtin()
    }

    pub fn get(&self, image: &str) -> Option<&CatalogEntry> {
        self.images.get(image)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtin_has_default_image() {
        let catalog = ImageCatalog::builtin().unwrap();
        let entry = catalog.get("ubuntu-server-arm64").unwrap();
        assert_eq!(entry.arch, "arm64");
        assert!(entry.url.starts_with("https://"));
    }

    #[test]
    fn parse_error_names_origin() {
        let err = ImageCatalog::parse("[images.broken]\nurl = 3", "bad.toml").unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[tokio::test]
    async fn discover_prefers_root_catalog() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        fs::write_file(
            paths.catalog_file(),
            b"[images.local]\nurl = \"http://mirror/local.iso\"\narch = \"arm64\"\n",
        )
        .await
        .unwrap();

        let catalog = ImageCatalog::discover(None, &paths).await.unwrap();
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["local"]);
    }

    #[tokio::test]
    async fn discover_falls_back_to_builtin() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let catalog = ImageCatalog::discover(None, &paths).await.unwrap();
        assert!(catalog.get("ubuntu-server-arm64").is_some());
    }

    #[tokio::test]
    async fn discover_missing_explicit_path() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let missing = dir.path().join("nope.toml");
        let err = ImageCatalog::discover(Some(&missing), &paths)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(path) if path == missing));
    }
}
