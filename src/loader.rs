// Class resolution for web applications
// Maps class names to servlet/filter/listener factories and detects changed resources

use crate::error::LifecycleError;
use crate::listener::ListenerClass;
use crate::servlet::{FilterClass, ServletClass};
use crate::servlets::{DefaultServlet, JspServlet, RequestDumperFilter};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Class name of the container-provided static resource servlet
pub const DEFAULT_SERVLET_CLASS: &str = "pear.servlets.DefaultServlet";
/// Class name of the container-provided JSP servlet
pub const JSP_SERVLET_CLASS: &str = "pear.servlets.JspServlet";
/// Class name of the container-provided request dumping filter
pub const REQUEST_DUMPER_FILTER_CLASS: &str = "pear.filters.RequestDumperFilter";

/// Resolves class names for a context
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    fn servlet_class(&self, name: &str) -> Option<ServletClass>;

    fn filter_class(&self, name: &str) -> Option<FilterClass>;

    fn listener_class(&self, name: &str) -> Option<ListenerClass>;

    fn start(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn stop(&self) {}

    /// Have any watched resources changed since the loader started?
    fn modified(&self) -> bool {
        false
    }
}

/// Name-indexed class tables
#[derive(Default)]
pub struct ClassRegistry {
    servlets: DashMap<String, ServletClass>,
    filters: DashMap<String, FilterClass>,
    listeners: DashMap<String, ListenerClass>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_servlet(&self, class: ServletClass) {
        self.servlets.insert(class.name().to_string(), class);
    }

    pub fn register_filter(&self, class: FilterClass) {
        self.filters.insert(class.name().to_string(), class);
    }

    pub fn register_listener(&self, class: ListenerClass) {
        self.listeners.insert(class.name().to_string(), class);
    }

    pub fn servlet(&self, name: &str) -> Option<ServletClass> {
        self.servlets.get(name).map(|c| c.clone())
    }

    pub fn filter(&self, name: &str) -> Option<FilterClass> {
        self.filters.get(name).map(|c| c.clone())
    }

    pub fn listener(&self, name: &str) -> Option<ListenerClass> {
        self.listeners.get(name).map(|c| c.clone())
    }
}

/// Loader for application classes. Watches the document root for reload detection.
pub struct WebappLoader {
    classes: ClassRegistry,
    watched: RwLock<Vec<PathBuf>>,
    baseline: Mutex<Option<SystemTime>>,
    started: AtomicBool,
}

impl Default for WebappLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl WebappLoader {
    pub fn new() -> Self {
        Self {
            classes: ClassRegistry::new(),
            watched: RwLock::new(Vec::new()),
            baseline: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Add a file or directory whose modification triggers a reload
    pub fn watch(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut watched = self.watched.write();
        if !watched.contains(&path) {
            watched.push(path);
        }
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.read().clone()
    }

    fn latest_modification(&self) -> Option<SystemTime> {
        self.watched
            .read()
            .iter()
            .filter_map(|root| latest_mtime(root))
            .max()
    }
}

/// Newest modification time under `root`
fn latest_mtime(root: &Path) -> Option<SystemTime> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter_map(|meta| meta.modified().ok())
        .max()
}

impl Loader for WebappLoader {
    fn name(&self) -> &str {
        "webapp"
    }

    fn servlet_class(&self, name: &str) -> Option<ServletClass> {
        self.classes.servlet(name)
    }

    fn filter_class(&self, name: &str) -> Option<FilterClass> {
        self.classes.filter(name)
    }

    fn listener_class(&self, name: &str) -> Option<ListenerClass> {
        self.classes.listener(name)
    }

    fn start(&self) -> Result<(), LifecycleError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        *self.baseline.lock() = self.latest_modification();
        debug!(watched = self.watched.read().len(), "Webapp loader started");
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    fn modified(&self) -> bool {
        if !self.started.load(Ordering::Acquire) {
            return false;
        }
        let baseline = *self.baseline.lock();
        match (baseline, self.latest_modification()) {
            (Some(before), Some(now)) => now > before,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

/// Loader for classes the container itself provides (default and JSP servlets)
pub struct ContainerLoader {
    classes: ClassRegistry,
}

impl ContainerLoader {
    /// Loader with the built-in container classes registered
    pub fn with_builtins() -> Self {
        let classes = ClassRegistry::new();
        classes.register_servlet(ServletClass::from_fn(DEFAULT_SERVLET_CLASS, || {
            Ok(Arc::new(DefaultServlet::default()) as _)
        }));
        classes.register_servlet(ServletClass::from_fn(JSP_SERVLET_CLASS, || {
            Ok(Arc::new(JspServlet::default()) as _)
        }));
        classes.register_filter(FilterClass::from_fn(REQUEST_DUMPER_FILTER_CLASS, || {
            Ok(Arc::new(RequestDumperFilter::default()) as _)
        }));
        info!("Container loader initialized with built-in servlets");
        Self { classes }
    }

    /// Is `name` a class provided by the container rather than the application?
    pub fn provides(&self, name: &str) -> bool {
        self.classes.servlet(name).is_some() || self.classes.filter(name).is_some()
    }
}

impl Loader for ContainerLoader {
    fn name(&self) -> &str {
        "container"
    }

    fn servlet_class(&self, name: &str) -> Option<ServletClass> {
        self.classes.servlet(name)
    }

    fn filter_class(&self, name: &str) -> Option<FilterClass> {
        self.classes.filter(name)
    }

    fn listener_class(&self, name: &str) -> Option<ListenerClass> {
        self.classes.listener(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_container_loader_provides_builtins() {
        let loader = ContainerLoader::with_builtins();
        assert!(loader.provides(DEFAULT_SERVLET_CLASS));
        assert!(loader.provides(JSP_SERVLET_CLASS));
        assert!(!loader.provides("com.example.Hello"));
    }

    #[test]
    fn test_modified_detects_new_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "v1").unwrap();

        let loader = WebappLoader::new();
        loader.watch(dir.path());
        assert!(!loader.modified(), "not started yet");

        loader.start().unwrap();
        assert!(!loader.modified());

        std::thread::sleep(Duration::from_millis(20));
        let later = SystemTime::now() + Duration::from_secs(5);
        let file = std::fs::File::options()
            .write(true)
            .open(dir.path().join("index.html"))
            .unwrap();
        file.set_modified(later).unwrap();
        assert!(loader.modified());
    }
}
