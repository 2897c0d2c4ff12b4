// Static resources of a web application
// Document root plus alternate roots, with path sanitizing and extension discovery

use crate::error::LifecycleError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Manifest listing the extensions an application provides
const MANIFEST: &str = "META-INF/MANIFEST.MF";

/// File-system backed resources rooted at a document base
#[derive(Debug)]
pub struct Resources {
    doc_base: Option<PathBuf>,
    alternates: Vec<PathBuf>,
    provided_extensions: RwLock<Vec<String>>,
    started: AtomicBool,
}

impl Resources {
    pub fn new(doc_base: Option<PathBuf>, alternates: Vec<PathBuf>) -> Self {
        Self {
            doc_base,
            alternates,
            provided_extensions: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Resources with no backing directory
    pub fn empty() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn doc_base(&self) -> Option<&Path> {
        self.doc_base.as_deref()
    }

    pub fn roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.doc_base.iter().chain(self.alternates.iter())
    }

    pub fn start(&self) -> Result<(), LifecycleError> {
        for root in self.roots() {
            if !root.is_dir() {
                return Err(LifecycleError::Component {
                    name: "resources".to_string(),
                    message: format!("document base {} is not a directory", root.display()),
                });
            }
        }
        let discovered = self.manifest_extensions();
        if !discovered.is_empty() {
            let mut provided = self.provided_extensions.write();
            for ext in discovered {
                if !provided.contains(&ext) {
                    provided.push(ext);
                }
            }
        }
        self.started.store(true, Ordering::Release);
        debug!(doc_base = ?self.doc_base, "Resources started");
        Ok(())
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn add_provided_extension(&self, name: impl Into<String>) {
        let name = name.into();
        let mut provided = self.provided_extensions.write();
        if !provided.contains(&name) {
            provided.push(name);
        }
    }

    pub fn provides_extension(&self, name: &str) -> bool {
        self.provided_extensions.read().iter().any(|e| e == name)
    }

    /// `Extension-Name` entries of the application manifest
    fn manifest_extensions(&self) -> Vec<String> {
        let Some(path) = self.resolve(&format!("/{}", MANIFEST)) else {
            return Vec::new();
        };
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| line.strip_prefix("Extension-Name:"))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Map a context-relative path onto an existing file, refusing to escape the roots
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = sanitize(path)?;
        self.roots()
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.is_file())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Read a file for a request handler without blocking the runtime
    pub async fn read_async(&self, path: &str) -> std::io::Result<Bytes> {
        let not_found = || std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} not found", path));
        let relative = sanitize(path).ok_or_else(not_found)?;
        for root in self.roots() {
            let candidate = root.join(&relative);
            match tokio::fs::metadata(&candidate).await {
                Ok(meta) if meta.is_file() => return Ok(Bytes::from(tokio::fs::read(&candidate).await?)),
                _ => continue,
            }
        }
        Err(not_found())
    }
}

/// Strip the leading slash and reject `..` and absolute components
fn sanitize(path: &str) -> Option<PathBuf> {
    let trimmed = path.split('?').next().unwrap_or(path).trim_start_matches('/');
    let mut clean = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        let resources = Resources::new(Some(dir.path().to_path_buf()), Vec::new());

        assert!(resources.exists("/index.html"));
        assert!(!resources.exists("/../etc/passwd"));
        assert_eq!(&resources.read_async("/index.html").await.unwrap()[..], b"<h1>hi</h1>");
    }

    #[test]
    fn test_alternate_roots_and_manifest() {
        let main = tempfile::tempdir().unwrap();
        let alt = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(main.path().join("META-INF")).unwrap();
        std::fs::write(
            main.path().join("META-INF/MANIFEST.MF"),
            "Manifest-Version: 1.0\nExtension-Name: pear-json\n",
        )
        .unwrap();
        std::fs::write(alt.path().join("logo.png"), [0u8; 4]).unwrap();

        let resources = Resources::new(
            Some(main.path().to_path_buf()),
            vec![alt.path().to_path_buf()],
        );
        resources.start().unwrap();

        assert!(resources.exists("/logo.png"));
        assert!(resources.provides_extension("pear-json"));
    }

    #[tokio::test]
    async fn test_read_async_searches_roots_in_order() {
        let main = tempfile::tempdir().unwrap();
        let alt = tempfile::tempdir().unwrap();
        std::fs::write(main.path().join("a.txt"), "main").unwrap();
        std::fs::write(alt.path().join("a.txt"), "alt").unwrap();
        std::fs::write(alt.path().join("b.txt"), "only alt").unwrap();
        std::fs::create_dir(main.path().join("dir")).unwrap();
        let resources = Resources::new(
            Some(main.path().to_path_buf()),
            vec![alt.path().to_path_buf()],
        );

        assert_eq!(&resources.read_async("/a.txt").await.unwrap()[..], b"main");
        assert_eq!(&resources.read_async("//./b.txt").await.unwrap()[..], b"only alt");
        let missing = resources.read_async("/dir").await.unwrap_err();
        assert_eq!(missing.kind(), std::io::ErrorKind::NotFound);
        assert!(resources.read_async("/../a.txt").await.is_err());
    }

    #[test]
    fn test_start_fails_for_missing_doc_base() {
        let resources = Resources::new(Some(PathBuf::from("/definitely/not/here")), Vec::new());
        assert!(resources.start().is_err());
    }
}
