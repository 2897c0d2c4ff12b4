// Web application context
// One deployed application: servlets, filters, mappings, listeners, error pages and lifecycle

mod background;
mod initializers;
mod lifecycle;
mod listeners;
mod registration;

pub use initializers::{order_initializers, ServletContainerInitializer, FACES_INITIALIZER, WEBSOCKET_INITIALIZER};
pub use registration::{FilterSource, ServletSource};

use crate::dispatcher::RequestDispatcher;
use crate::error::{ContainerError, ServletError};
use crate::error_page::{ErrorPage, ErrorPageTable};
use crate::filter_chain::{ApplicationFilterConfig, FilterDef, FilterMap};
use crate::http::Request;
use crate::lifecycle::{
    Component, ContainerEvent, ContainerEventSupport, ContainerListener, Lifecycle, LifecycleListener,
    LifecycleState,
};
use crate::listener::{
    EventListener, HttpSessionListener, ServletContextAttributeListener, ServletContextListener,
    ServletRequestListener,
};
use crate::loader::{ContainerLoader, Loader};
use crate::mapper::{Mapper, MappingData};
use crate::registry::{FilterRegistration, ServletRegistration};
use crate::resources::Resources;
use crate::session::{Session, SessionManager};
use crate::valve::{Pipeline, StandardContextValve, Valve};
use crate::wrapper::{Wrapper, DEFAULT_MAX_INSTANCES, DEFAULT_UNAVAILABLE_SECS, DEFAULT_UNLOAD_DELAY_MS};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_SESSION_TIMEOUT_MINS: i64 = 30;
pub const DEFAULT_BACKGROUND_DELAY_SECS: u64 = 10;
pub const DEFAULT_EFFECTIVE_VERSION: &str = "6.0";

/// Scratch mapping buffers kept for reuse by request dispatchers
const MAPPING_POOL_LIMIT: usize = 16;

/// Context init parameter declared by the deployer rather than the descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationParameter {
    pub name: String,
    pub value: String,
    /// May a descriptor-declared parameter of the same name take precedence?
    #[serde(default = "default_override")]
    pub override_allowed: bool,
}

fn default_override() -> bool {
    true
}

/// Settings copied into every wrapper the context creates
#[derive(Debug, Clone, Copy)]
pub struct WrapperDefaults {
    pub unload_delay: Duration,
    pub max_instances: usize,
    pub default_unavailable_secs: u64,
}

impl Default for WrapperDefaults {
    fn default() -> Self {
        Self {
            unload_delay: Duration::from_millis(DEFAULT_UNLOAD_DELAY_MS),
            max_instances: DEFAULT_MAX_INSTANCES,
            default_unavailable_secs: DEFAULT_UNAVAILABLE_SECS,
        }
    }
}

/// Point-in-time summary of a context, used by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub path: String,
    pub display_name: Option<String>,
    pub state: LifecycleState,
    pub available: bool,
    pub servlets: Vec<String>,
    pub servlet_mappings: BTreeMap<String, String>,
    pub filters: Vec<String>,
    pub filter_maps: Vec<String>,
    pub welcome_files: Vec<String>,
}

pub(crate) struct BackgroundTask {
    cancel: tokio_util::sync::CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// A deployed web application
pub struct Context {
    path: String,
    self_ref: Weak<Context>,

    display_name: RwLock<Option<String>>,
    doc_base: RwLock<Option<PathBuf>>,
    alternate_doc_bases: RwLock<Vec<PathBuf>>,
    session_timeout_mins: AtomicI64,
    distributable: AtomicBool,
    available: AtomicBool,
    configured: AtomicBool,
    paused: AtomicBool,
    reloadable: AtomicBool,
    use_naming: AtomicBool,
    load_all_on_startup: AtomicBool,
    effective_version: RwLock<String>,
    wrapper_defaults: RwLock<WrapperDefaults>,
    background_delay_ms: AtomicU64,

    lifecycle: Lifecycle,
    /// Serializes init, start, stop, reload and destroy
    lifecycle_lock: tokio::sync::Mutex<()>,
    /// Subordinate components have been (at least partly) started
    started: AtomicBool,
    context_initialized_called: AtomicBool,

    children: RwLock<Vec<Arc<Wrapper>>>,
    child_index: DashMap<String, Arc<Wrapper>>,
    servlet_registrations: DashMap<String, ServletRegistration>,
    filter_defs: RwLock<Vec<FilterDef>>,
    filter_registrations: DashMap<String, FilterRegistration>,
    filter_maps: RwLock<Arc<Vec<FilterMap>>>,
    filter_configs: RwLock<HashMap<String, Arc<ApplicationFilterConfig>>>,
    servlet_mappings: RwLock<BTreeMap<String, String>>,
    mapper: ArcSwap<Mapper>,
    mapping_pool: Mutex<Vec<MappingData>>,

    welcome_files: RwLock<Vec<String>>,
    error_pages: RwLock<ErrorPageTable>,
    security_roles: RwLock<Vec<String>>,
    mime_mappings: RwLock<HashMap<String, String>>,
    parameters: RwLock<BTreeMap<String, String>>,
    application_parameters: RwLock<Vec<ApplicationParameter>>,
    merged_parameters: RwLock<BTreeMap<String, String>>,
    attributes: RwLock<HashMap<String, serde_json::Value>>,
    required_extensions: RwLock<Vec<String>>,
    provided_extensions: RwLock<Vec<String>>,

    listener_classes: RwLock<Vec<String>>,
    declared_listeners: RwLock<Vec<EventListener>>,
    context_listeners: RwLock<Vec<Arc<dyn ServletContextListener>>>,
    attribute_listeners: RwLock<Vec<Arc<dyn ServletContextAttributeListener>>>,
    request_listeners: RwLock<Vec<Arc<dyn ServletRequestListener>>>,
    session_listeners: RwLock<Vec<Arc<dyn HttpSessionListener>>>,
    initializers: RwLock<Vec<(Arc<dyn ServletContainerInitializer>, Vec<String>)>>,

    lifecycle_listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
    container_events: ContainerEventSupport,
    components: RwLock<Vec<Arc<dyn Component>>>,

    resources: RwLock<Option<Arc<Resources>>>,
    loader: RwLock<Option<Arc<dyn Loader>>>,
    container_loader: Arc<ContainerLoader>,
    manager: RwLock<Option<Arc<dyn SessionManager>>>,
    pipeline: Pipeline,
    background: Mutex<Option<BackgroundTask>>,
}

impl Context {
    /// Create a context for `path` ("" or "/" for the root application)
    pub fn new(path: impl Into<String>) -> Arc<Self> {
        Self::with_container_loader(path, Arc::new(ContainerLoader::with_builtins()))
    }

    /// Create a context sharing the container's loader with its siblings
    pub fn with_container_loader(path: impl Into<String>, container_loader: Arc<ContainerLoader>) -> Arc<Self> {
        let mut path = path.into();
        if path == "/" {
            path.clear();
        }
        Arc::new_cyclic(|self_ref| Self {
            lifecycle: Lifecycle::new(format!("context[{}]", display_path(&path))),
            path,
            self_ref: self_ref.clone(),
            display_name: RwLock::new(None),
            doc_base: RwLock::new(None),
            alternate_doc_bases: RwLock::new(Vec::new()),
            session_timeout_mins: AtomicI64::new(DEFAULT_SESSION_TIMEOUT_MINS),
            distributable: AtomicBool::new(false),
            available: AtomicBool::new(false),
            configured: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            reloadable: AtomicBool::new(false),
            use_naming: AtomicBool::new(false),
            load_all_on_startup: AtomicBool::new(false),
            effective_version: RwLock::new(DEFAULT_EFFECTIVE_VERSION.to_string()),
            wrapper_defaults: RwLock::new(WrapperDefaults::default()),
            background_delay_ms: AtomicU64::new(DEFAULT_BACKGROUND_DELAY_SECS * 1000),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            started: AtomicBool::new(false),
            context_initialized_called: AtomicBool::new(false),
            children: RwLock::new(Vec::new()),
            child_index: DashMap::new(),
            servlet_registrations: DashMap::new(),
            filter_defs: RwLock::new(Vec::new()),
            filter_registrations: DashMap::new(),
            filter_maps: RwLock::new(Arc::new(Vec::new())),
            filter_configs: RwLock::new(HashMap::new()),
            servlet_mappings: RwLock::new(BTreeMap::new()),
            mapper: ArcSwap::from_pointee(Mapper::new()),
            mapping_pool: Mutex::new(Vec::new()),
            welcome_files: RwLock::new(Vec::new()),
            error_pages: RwLock::new(ErrorPageTable::new()),
            security_roles: RwLock::new(Vec::new()),
            mime_mappings: RwLock::new(HashMap::new()),
            parameters: RwLock::new(BTreeMap::new()),
            application_parameters: RwLock::new(Vec::new()),
            merged_parameters: RwLock::new(BTreeMap::new()),
            attributes: RwLock::new(HashMap::new()),
            required_extensions: RwLock::new(Vec::new()),
            provided_extensions: RwLock::new(Vec::new()),
            listener_classes: RwLock::new(Vec::new()),
            declared_listeners: RwLock::new(Vec::new()),
            context_listeners: RwLock::new(Vec::new()),
            attribute_listeners: RwLock::new(Vec::new()),
            request_listeners: RwLock::new(Vec::new()),
            session_listeners: RwLock::new(Vec::new()),
            initializers: RwLock::new(Vec::new()),
            lifecycle_listeners: RwLock::new(Vec::new()),
            container_events: ContainerEventSupport::new(),
            components: RwLock::new(Vec::new()),
            resources: RwLock::new(None),
            loader: RwLock::new(None),
            container_loader,
            manager: RwLock::new(None),
            pipeline: Pipeline::new(Arc::new(StandardContextValve)),
            background: Mutex::new(None),
        })
    }

    /// Context path; empty for the root application
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Strong handle to this context, if it is still alive
    pub fn arc(&self) -> Option<Arc<Context>> {
        self.self_ref.upgrade()
    }

    pub(crate) fn weak(&self) -> Weak<Context> {
        self.self_ref.clone()
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name.read().clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        *self.display_name.write() = name;
    }

    pub fn doc_base(&self) -> Option<PathBuf> {
        self.doc_base.read().clone()
    }

    pub fn set_doc_base(&self, doc_base: impl Into<PathBuf>) {
        *self.doc_base.write() = Some(doc_base.into());
    }

    pub fn add_alternate_doc_base(&self, path: impl Into<PathBuf>) {
        self.alternate_doc_bases.write().push(path.into());
    }

    /// Session timeout in minutes; non-positive means sessions never expire
    pub fn session_timeout(&self) -> i64 {
        self.session_timeout_mins.load(Ordering::Relaxed)
    }

    pub fn set_session_timeout(&self, minutes: i64) {
        self.session_timeout_mins.store(minutes, Ordering::Relaxed);
        let manager = self.manager.read().clone();
        if let Some(manager) = manager {
            manager.set_max_inactive_secs(minutes.saturating_mul(60));
        }
    }

    pub fn is_distributable(&self) -> bool {
        self.distributable.load(Ordering::Relaxed)
    }

    pub fn set_distributable(&self, distributable: bool) {
        self.distributable.store(distributable, Ordering::Relaxed);
    }

    /// Is the application currently serving requests?
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// Signal from the descriptor collaborator that configuration succeeded
    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::Release);
    }

    /// Set while a reload is in progress; request admission checks it
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_reloadable(&self) -> bool {
        self.reloadable.load(Ordering::Relaxed)
    }

    pub fn set_reloadable(&self, reloadable: bool) {
        self.reloadable.store(reloadable, Ordering::Relaxed);
    }

    pub fn use_naming(&self) -> bool {
        self.use_naming.load(Ordering::Relaxed)
    }

    pub fn set_use_naming(&self, use_naming: bool) {
        self.use_naming.store(use_naming, Ordering::Relaxed);
    }

    pub fn load_all_on_startup(&self) -> bool {
        self.load_all_on_startup.load(Ordering::Relaxed)
    }

    pub fn set_load_all_on_startup(&self, load_all: bool) {
        self.load_all_on_startup.store(load_all, Ordering::Relaxed);
    }

    pub fn effective_version(&self) -> String {
        self.effective_version.read().clone()
    }

    pub fn set_effective_version(&self, version: impl Into<String>) {
        *self.effective_version.write() = version.into();
    }

    /// Does the application follow the 2.2 rules that allow relative URL patterns?
    pub fn is_servlet22(&self) -> bool {
        self.effective_version.read().as_str() == "2.2"
    }

    pub fn wrapper_defaults(&self) -> WrapperDefaults {
        *self.wrapper_defaults.read()
    }

    pub fn set_wrapper_defaults(&self, defaults: WrapperDefaults) {
        *self.wrapper_defaults.write() = defaults;
    }

    pub fn background_processor_delay(&self) -> Duration {
        Duration::from_millis(self.background_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_background_processor_delay(&self, delay: Duration) {
        self.background_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Has `context_initialized` been delivered? Programmatic registration is closed afterwards.
    pub fn is_context_initialized(&self) -> bool {
        self.context_initialized_called.load(Ordering::Acquire)
    }

    // ---- collaborators ----

    pub fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.loader.read().clone()
    }

    pub fn set_loader(&self, loader: Arc<dyn Loader>) {
        *self.loader.write() = Some(loader);
    }

    pub fn container_loader(&self) -> &Arc<ContainerLoader> {
        &self.container_loader
    }

    pub fn resources(&self) -> Option<Arc<Resources>> {
        self.resources.read().clone()
    }

    pub fn set_resources(&self, resources: Arc<Resources>) {
        *self.resources.write() = Some(resources);
    }

    pub fn manager(&self) -> Option<Arc<dyn SessionManager>> {
        self.manager.read().clone()
    }

    pub fn set_manager(&self, manager: Arc<dyn SessionManager>) {
        manager.set_max_inactive_secs(self.session_timeout().saturating_mul(60));
        *self.manager.write() = Some(manager);
    }

    /// Register a subordinate component (realm, logger, ...) started with the context
    pub fn add_component(&self, component: Arc<dyn Component>) {
        self.components.write().push(component);
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn add_valve(&self, valve: Arc<dyn Valve>) {
        self.pipeline.add_valve(valve);
    }

    // ---- observers ----

    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.lifecycle_listeners.write().push(listener);
    }

    pub fn add_container_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.container_events.add(listener);
    }

    pub fn fire_container_event(&self, event: ContainerEvent) {
        if self.container_events.is_empty() {
            return;
        }
        self.container_events.fire(&display_path(&self.path), event);
    }

    // ---- welcome files, MIME mappings, roles, extensions ----

    pub fn add_welcome_file(&self, name: impl Into<String>) {
        let name = name.into();
        {
            let mut files = self.welcome_files.write();
            if files.contains(&name) {
                return;
            }
            files.push(name.clone());
        }
        if self.is_available() {
            let files = self.welcome_files();
            self.update_mapper(|m| m.set_welcome_files(files));
        }
        self.fire_container_event(ContainerEvent::AddWelcomeFile(name));
    }

    pub fn welcome_files(&self) -> Vec<String> {
        self.welcome_files.read().clone()
    }

    pub fn remove_welcome_file(&self, name: &str) {
        self.welcome_files.write().retain(|f| f != name);
    }

    pub fn add_mime_mapping(&self, extension: impl Into<String>, mime_type: impl Into<String>) {
        self.mime_mappings
            .write()
            .insert(extension.into().to_ascii_lowercase(), mime_type.into());
    }

    pub fn find_mime_mapping(&self, extension: &str) -> Option<String> {
        self.mime_mappings
            .read()
            .get(&extension.to_ascii_lowercase())
            .cloned()
    }

    /// MIME type for the file extension of `path`
    pub fn mime_type_for(&self, path: &str) -> Option<String> {
        let file = path.rsplit('/').next().unwrap_or(path);
        let (_, ext) = file.rsplit_once('.')?;
        self.find_mime_mapping(ext)
    }

    pub fn add_security_role(&self, role: impl Into<String>) {
        let role = role.into();
        let mut roles = self.security_roles.write();
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    pub fn find_security_roles(&self) -> Vec<String> {
        self.security_roles.read().clone()
    }

    pub fn add_required_extension(&self, name: impl Into<String>) {
        self.required_extensions.write().push(name.into());
    }

    /// Extension made available to this context in addition to what its manifest declares
    pub fn add_provided_extension(&self, name: impl Into<String>) {
        self.provided_extensions.write().push(name.into());
    }

    // ---- init parameters ----

    /// Descriptor-declared init parameter
    pub fn add_parameter(&self, name: impl Into<String>, value: impl Into<String>) -> Result<(), ContainerError> {
        let name = name.into();
        let mut params = self.parameters.write();
        if params.contains_key(&name) {
            return Err(ContainerError::Duplicate {
                kind: "context parameter",
                name,
            });
        }
        params.insert(name.clone(), value.into());
        drop(params);
        self.fire_container_event(ContainerEvent::AddInitParameter(name));
        Ok(())
    }

    pub fn add_application_parameter(&self, parameter: ApplicationParameter) {
        let mut params = self.application_parameters.write();
        params.retain(|p| p.name != parameter.name);
        params.push(parameter);
    }

    /// Effective init parameter; merged values win once the context has started
    pub fn init_parameter(&self, name: &str) -> Option<String> {
        let merged = self.merged_parameters.read().get(name).cloned();
        merged.or_else(|| self.parameters.read().get(name).cloned())
    }

    pub fn init_parameters(&self) -> BTreeMap<String, String> {
        let merged = self.merged_parameters.read();
        if merged.is_empty() {
            return self.parameters.read().clone();
        }
        merged.clone()
    }

    /// Combine descriptor parameters with application parameters. An application
    /// parameter marked overridable only fills in names the descriptor left out.
    pub(crate) fn merge_parameters(&self) {
        let mut merged = self.parameters.read().clone();
        for param in self.application_parameters.read().iter() {
            if param.override_allowed {
                merged
                    .entry(param.name.clone())
                    .or_insert_with(|| param.value.clone());
            } else {
                merged.insert(param.name.clone(), param.value.clone());
            }
        }
        *self.merged_parameters.write() = merged;
    }

    // ---- error pages ----

    pub fn add_error_page(&self, mut page: ErrorPage) -> Result<(), ContainerError> {
        if !page.location.starts_with('/') {
            if self.is_servlet22() {
                debug!(location = %page.location, "Adjusting relative error page location");
                page.location = format!("/{}", page.location);
            } else {
                return Err(ContainerError::IllegalArgument(format!(
                    "error page location '{}' must start with '/'",
                    page.location
                )));
            }
        }
        page.validate()?;
        let key = page.key();
        self.error_pages.write().insert(page);
        self.fire_container_event(ContainerEvent::AddErrorPage(key));
        Ok(())
    }

    pub fn remove_error_page(&self, page: &ErrorPage) {
        self.error_pages.write().remove(page);
    }

    pub fn find_error_page_for_status(&self, code: u16) -> Option<ErrorPage> {
        self.error_pages.read().find_by_status(code).cloned()
    }

    pub fn find_error_page_for_exception(&self, exception_type: &str) -> Option<ErrorPage> {
        self.error_pages
            .read()
            .find_by_exception(exception_type)
            .cloned()
    }

    /// Closest exception-type page for `error` by walking its supertype chain
    pub fn find_error_page_for_error(&self, error: &ServletError) -> Option<ErrorPage> {
        self.error_pages.read().find_for_error(error).cloned()
    }

    pub fn default_error_page(&self) -> Option<ErrorPage> {
        self.error_pages.read().default_page().cloned()
    }

    pub fn error_pages(&self) -> Vec<ErrorPage> {
        self.error_pages.read().all()
    }

    // ---- attributes ----

    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes.read().get(name).cloned()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.read().keys().cloned().collect()
    }

    /// Set an attribute; a null value removes it. Attribute listeners are notified.
    pub fn set_attribute(&self, name: impl Into<String>, value: serde_json::Value) {
        let name = name.into();
        if value.is_null() {
            self.remove_attribute(&name);
            return;
        }
        let old = self.attributes.write().insert(name.clone(), value.clone());
        match old {
            Some(old) => self.notify_attribute_replaced(&name, &old),
            None => self.notify_attribute_added(&name, &value),
        }
    }

    pub fn remove_attribute(&self, name: &str) -> Option<serde_json::Value> {
        let removed = self.attributes.write().remove(name);
        if let Some(value) = &removed {
            self.notify_attribute_removed(name, value);
        }
        removed
    }

    // ---- mapping ----

    /// Map a context-relative path with the current URL mapping table
    pub fn map(&self, path: &str, data: &mut MappingData) {
        let mapper = self.mapper.load();
        let resources = self.resources();
        let exists = |p: &str| resources.as_ref().is_some_and(|r| r.exists(p));
        mapper.map(path, data, &exists);
    }

    /// Snapshot of the URL mapping table
    pub fn mapper(&self) -> Arc<Mapper> {
        self.mapper.load_full()
    }

    /// Copy, modify and publish the mapping table. Callers hold the servlet-mapping lock.
    fn update_mapper(&self, f: impl FnOnce(&mut Mapper)) {
        let mut next = Mapper::clone(&self.mapper.load());
        f(&mut next);
        self.mapper.store(Arc::new(next));
    }

    /// Dispatcher for a context-relative path (which may carry a query string).
    /// Returns `None` for paths not starting with `/` or that map to no servlet.
    pub fn request_dispatcher(&self, path: &str) -> Option<RequestDispatcher> {
        if !path.starts_with('/') {
            return None;
        }
        let context = self.arc()?;
        let (path_only, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path, None),
        };

        let mut data = self.mapping_pool.lock().pop().unwrap_or_default();
        self.map(path_only, &mut data);
        let dispatcher = data
            .wrapper_name
            .as_deref()
            .and_then(|name| self.find_child(name))
            .map(|wrapper| {
                RequestDispatcher::new(
                    context,
                    wrapper,
                    path_only.to_string(),
                    data.servlet_path.clone(),
                    data.path_info.clone(),
                    query,
                )
            });

        data.recycle();
        let mut pool = self.mapping_pool.lock();
        if pool.len() < MAPPING_POOL_LIMIT {
            pool.push(data);
        }
        dispatcher
    }

    /// Dispatcher for a servlet by name rather than by path
    pub fn named_dispatcher(&self, name: &str) -> Option<RequestDispatcher> {
        let context = self.arc()?;
        let wrapper = self.find_child(name)?;
        Some(RequestDispatcher::named(context, wrapper))
    }

    // ---- sessions ----

    /// Session of `req`, optionally creating one. Touches the session's access time.
    pub fn session(&self, req: &mut Request, create: bool) -> Option<Arc<Session>> {
        let manager = self.manager()?;
        let id = req
            .session_id()
            .map(str::to_string)
            .or_else(|| req.requested_session_id());
        if let Some(session) = id.as_deref().and_then(|id| manager.find_session(id)) {
            session.access();
            req.set_session_id(Some(session.id().to_string()));
            return Some(session);
        }
        if !create {
            return None;
        }
        let listeners = self.session_listeners.read().clone();
        let session = manager.create_session(&listeners);
        req.set_session_id(Some(session.id().to_string()));
        Some(session)
    }

    pub fn invalidate_session(&self, id: &str) {
        let Some(manager) = self.manager() else {
            return;
        };
        let listeners = self.session_listeners.read().clone();
        manager.invalidate(id, &listeners);
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            path: display_path(&self.path),
            display_name: self.display_name(),
            state: self.lifecycle_state(),
            available: self.is_available(),
            servlets: self.find_children().iter().map(|w| w.name().to_string()).collect(),
            servlet_mappings: self.servlet_mappings(),
            filters: self
                .filter_defs
                .read()
                .iter()
                .map(|d| d.filter_name.clone())
                .collect(),
            filter_maps: self
                .find_filter_maps()
                .iter()
                .map(|m| {
                    let target = m
                        .url_pattern
                        .clone()
                        .or_else(|| m.servlet_name.clone().map(|s| format!("servlet:{}", s)))
                        .unwrap_or_default();
                    format!("{} -> {}", m.filter_name, target)
                })
                .collect(),
            welcome_files: self.welcome_files(),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(task) = self.background.get_mut().take() {
            task.cancel.cancel();
            warn!(context = %display_path(&self.path), "Context dropped with its background processor running");
        }
    }
}

/// Path as shown in logs; the root context shows as "/"
pub(crate) fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}
