// Servlet wrapper
// Owns one servlet definition: lazy loading, allocation, pooling, unload with drain and availability

use crate::context::Context;
use crate::error::{ContainerError, ServletError};
use crate::lifecycle::{ContainerEvent, ContainerEventSupport, Lifecycle, LifecycleState};
use crate::listener::{InstanceEventKind, InstanceListener, InstanceSupport};
use crate::loader::{Loader, JSP_SERVLET_CLASS};
use crate::servlet::{MultipartConfig, Servlet, ServletClass, ServletConfig};
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, instrument, warn};

/// Name of the container-provided static content servlet
pub const DEFAULT_SERVLET_NAME: &str = "default";
/// Name of the container-provided JSP servlet
pub const JSP_SERVLET_NAME: &str = "jsp";

/// `available` value meaning "permanently unavailable"
pub const UNAVAILABLE_FOREVER: u64 = u64::MAX;

/// Number of drain checks performed by `unload` before destroying anyway
const UNLOAD_RETRIES: u32 = 21;

pub const DEFAULT_UNLOAD_DELAY_MS: u64 = 2000;
pub const DEFAULT_MAX_INSTANCES: usize = 20;
pub const DEFAULT_UNAVAILABLE_SECS: u64 = 60;

/// Instances kept for single-thread-model servlets
#[derive(Default)]
struct InstancePool {
    idle: Vec<Arc<dyn Servlet>>,
    /// Instances created so far, idle or allocated
    created: usize,
}

/// Per-servlet invocation statistics
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct WrapperStats {
    pub request_count: u64,
    pub error_count: u64,
    pub processing_time_ms: u64,
    pub max_time_ms: u64,
    pub load_time_ms: u64,
    pub class_load_time_ms: u64,
}

/// Servlet definition plus its live instance (or instance pool)
pub struct Wrapper {
    name: String,
    context: RwLock<Weak<Context>>,

    // Exactly one source may ever be configured
    servlet_class_name: RwLock<Option<String>>,
    servlet_class: RwLock<Option<ServletClass>>,
    prebuilt: RwLock<Option<Arc<dyn Servlet>>>,

    jsp_file: RwLock<Option<String>>,
    init_params: RwLock<BTreeMap<String, String>>,
    mappings: RwLock<Vec<String>>,
    load_on_startup: AtomicI32,
    run_as: RwLock<Option<String>>,
    multipart_config: RwLock<Option<MultipartConfig>>,
    async_supported: AtomicBool,
    description: RwLock<Option<String>>,

    /// Epoch millis until which the servlet is unavailable; 0 when available
    available: AtomicU64,
    count_allocated: AtomicUsize,
    unloading: AtomicBool,

    instance: RwLock<Option<Arc<dyn Servlet>>>,
    instance_initialized: AtomicBool,
    load_lock: Mutex<()>,

    single_thread_model: AtomicBool,
    pool: Mutex<InstancePool>,
    pool_available: Notify,
    max_instances: AtomicUsize,

    unload_delay_ms: AtomicU64,
    default_unavailable_secs: AtomicU64,

    lifecycle: Lifecycle,
    instance_support: InstanceSupport,
    container_events: ContainerEventSupport,

    request_count: AtomicU64,
    error_count: AtomicU64,
    processing_time_ms: AtomicU64,
    max_time_ms: AtomicU64,
    load_time_ms: AtomicU64,
    class_load_time_ms: AtomicU64,
}

impl Wrapper {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            lifecycle: Lifecycle::new(format!("wrapper[{}]", name)),
            name,
            context: RwLock::new(Weak::new()),
            servlet_class_name: RwLock::new(None),
            servlet_class: RwLock::new(None),
            prebuilt: RwLock::new(None),
            jsp_file: RwLock::new(None),
            init_params: RwLock::new(BTreeMap::new()),
            mappings: RwLock::new(Vec::new()),
            load_on_startup: AtomicI32::new(-1),
            run_as: RwLock::new(None),
            multipart_config: RwLock::new(None),
            async_supported: AtomicBool::new(false),
            description: RwLock::new(None),
            available: AtomicU64::new(0),
            count_allocated: AtomicUsize::new(0),
            unloading: AtomicBool::new(false),
            instance: RwLock::new(None),
            instance_initialized: AtomicBool::new(false),
            load_lock: Mutex::new(()),
            single_thread_model: AtomicBool::new(false),
            pool: Mutex::new(InstancePool::default()),
            pool_available: Notify::new(),
            max_instances: AtomicUsize::new(DEFAULT_MAX_INSTANCES),
            unload_delay_ms: AtomicU64::new(DEFAULT_UNLOAD_DELAY_MS),
            default_unavailable_secs: AtomicU64::new(DEFAULT_UNAVAILABLE_SECS),
            instance_support: InstanceSupport::default(),
            container_events: ContainerEventSupport::new(),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            processing_time_ms: AtomicU64::new(0),
            max_time_ms: AtomicU64::new(0),
            load_time_ms: AtomicU64::new(0),
            class_load_time_ms: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_context(&self, context: Weak<Context>) {
        *self.context.write() = context;
    }

    pub fn context(&self) -> Option<Arc<Context>> {
        self.context.read().upgrade()
    }

    // ---- servlet source (set-once) ----

    pub fn servlet_class_name(&self) -> Option<String> {
        self.servlet_class_name.read().clone()
    }

    /// Declare the servlet by class name, resolved through the loader on first load
    pub fn set_servlet_class_name(&self, class_name: impl Into<String>) -> Result<(), ContainerError> {
        let mut current = self.servlet_class_name.write();
        if current.is_some() {
            return Err(already_configured(&self.name));
        }
        *current = Some(class_name.into());
        Ok(())
    }

    /// Declare the servlet by an already resolved class
    pub fn set_servlet_class(&self, class: ServletClass) -> Result<(), ContainerError> {
        let mut name = self.servlet_class_name.write();
        let mut current = self.servlet_class.write();
        let name_conflicts = name.as_deref().is_some_and(|n| n != class.name());
        if current.is_some() || name_conflicts {
            return Err(already_configured(&self.name));
        }
        *name = Some(class.name().to_string());
        *current = Some(class);
        Ok(())
    }

    /// Declare the servlet by a pre-built instance. Fixes the class name from the instance.
    pub fn set_servlet(&self, servlet: Arc<dyn Servlet>) -> Result<(), ContainerError> {
        let mut name = self.servlet_class_name.write();
        if name.is_some() {
            return Err(already_configured(&self.name));
        }
        *name = Some(servlet.class_name().to_string());
        *self.prebuilt.write() = Some(servlet.clone());
        *self.instance.write() = Some(servlet);
        Ok(())
    }

    /// Has any servlet source (class name, class, instance or JSP file) been configured?
    pub fn has_servlet_source(&self) -> bool {
        self.servlet_class_name.read().is_some()
            || self.servlet_class.read().is_some()
            || self.jsp_file.read().is_some()
    }

    pub fn jsp_file(&self) -> Option<String> {
        self.jsp_file.read().clone()
    }

    pub fn set_jsp_file(&self, jsp_file: impl Into<String>) {
        *self.jsp_file.write() = Some(jsp_file.into());
    }

    /// Is this wrapper the container's JSP servlet?
    pub fn is_jsp_servlet(&self) -> bool {
        self.servlet_class_name.read().as_deref() == Some(JSP_SERVLET_CLASS)
    }

    // ---- static configuration ----

    pub fn add_init_parameter(&self, name: impl Into<String>, value: impl Into<String>) {
        self.init_params.write().insert(name.into(), value.into());
    }

    pub fn init_parameter(&self, name: &str) -> Option<String> {
        self.init_params.read().get(name).cloned()
    }

    pub fn init_parameters(&self) -> BTreeMap<String, String> {
        self.init_params.read().clone()
    }

    pub fn remove_init_parameter(&self, name: &str) {
        self.init_params.write().remove(name);
    }

    pub fn add_mapping(&self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        let mut mappings = self.mappings.write();
        if !mappings.contains(&pattern) {
            mappings.push(pattern.clone());
        }
        drop(mappings);
        self.container_events
            .fire(&self.name, ContainerEvent::AddServletMapping(pattern));
    }

    pub fn remove_mapping(&self, pattern: &str) {
        self.mappings.write().retain(|p| p != pattern);
        self.container_events
            .fire(&self.name, ContainerEvent::RemoveServletMapping(pattern.to_string()));
    }

    pub fn mappings(&self) -> Vec<String> {
        self.mappings.read().clone()
    }

    pub fn load_on_startup(&self) -> i32 {
        self.load_on_startup.load(Ordering::Relaxed)
    }

    /// Negative values mean "load lazily"
    pub fn set_load_on_startup(&self, value: i32) {
        self.load_on_startup.store(value, Ordering::Relaxed);
    }

    pub fn run_as(&self) -> Option<String> {
        self.run_as.read().clone()
    }

    pub fn set_run_as(&self, role: Option<String>) {
        *self.run_as.write() = role;
    }

    pub fn multipart_config(&self) -> Option<MultipartConfig> {
        self.multipart_config.read().clone()
    }

    pub fn set_multipart_config(&self, config: Option<MultipartConfig>) {
        *self.multipart_config.write() = config;
    }

    pub fn is_async_supported(&self) -> bool {
        self.async_supported.load(Ordering::Relaxed)
    }

    pub fn set_async_supported(&self, supported: bool) {
        self.async_supported.store(supported, Ordering::Relaxed);
    }

    pub fn description(&self) -> Option<String> {
        self.description.read().clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        *self.description.write() = description;
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances.load(Ordering::Relaxed)
    }

    pub fn set_max_instances(&self, max: usize) {
        self.max_instances.store(max.max(1), Ordering::Relaxed);
    }

    pub fn unload_delay(&self) -> Duration {
        Duration::from_millis(self.unload_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_unload_delay(&self, delay: Duration) {
        self.unload_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_default_unavailable_secs(&self, secs: u64) {
        self.default_unavailable_secs.store(secs, Ordering::Relaxed);
    }

    pub fn add_instance_listener(&self, listener: Arc<dyn InstanceListener>) {
        self.instance_support.add(listener);
    }

    pub fn instance_support(&self) -> &InstanceSupport {
        &self.instance_support
    }

    pub fn container_events(&self) -> &ContainerEventSupport {
        &self.container_events
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    // ---- availability ----

    /// Epoch millis until which the servlet is unavailable (0 = available)
    pub fn available(&self) -> u64 {
        self.available.load(Ordering::Acquire)
    }

    pub fn set_available(&self, until: u64) {
        self.available.store(until, Ordering::Release);
    }

    /// Is the servlet currently unavailable? Expired windows are cleared.
    pub fn is_unavailable(&self) -> bool {
        let available = self.available();
        if available == 0 {
            return false;
        }
        if available <= now_millis() {
            let _ = self
                .available
                .compare_exchange(available, 0, Ordering::AcqRel, Ordering::Acquire);
            return false;
        }
        true
    }

    pub fn is_permanently_unavailable(&self) -> bool {
        self.available() == UNAVAILABLE_FOREVER
    }

    /// Mark the servlet unavailable.
    ///
    /// `None` (or a permanent unavailability signal) disables it for good; a temporary
    /// signal sets a retry window, defaulting to 60 seconds when none is given.
    pub fn unavailable(&self, signal: Option<&ServletError>) {
        let until = match signal {
            Some(ServletError::Unavailable {
                seconds: Some(secs),
                ..
            }) => {
                let secs = if *secs == 0 {
                    self.default_unavailable_secs.load(Ordering::Relaxed)
                } else {
                    *secs
                };
                now_millis().saturating_add(secs.saturating_mul(1000))
            }
            _ => UNAVAILABLE_FOREVER,
        };
        warn!(
            servlet = %self.name,
            permanent = until == UNAVAILABLE_FOREVER,
            "Marking servlet unavailable"
        );
        self.set_available(until);
    }

    /// Seconds until the servlet becomes available again, if temporarily unavailable
    pub fn retry_after_secs(&self) -> Option<u64> {
        let available = self.available();
        if available == 0 || available == UNAVAILABLE_FOREVER {
            return None;
        }
        Some(available.saturating_sub(now_millis()).div_ceil(1000))
    }

    // ---- allocation ----

    pub fn count_allocated(&self) -> usize {
        self.count_allocated.load(Ordering::Acquire)
    }

    pub fn is_single_thread_model(&self) -> bool {
        self.single_thread_model.load(Ordering::Acquire)
    }

    pub fn is_unloading(&self) -> bool {
        self.unloading.load(Ordering::Acquire)
    }

    /// Currently loaded shared instance, if any
    pub fn servlet(&self) -> Option<Arc<dyn Servlet>> {
        self.instance.read().clone()
    }

    /// Hand out an initialized servlet instance for one request.
    ///
    /// Every successful call must be paired with [`Wrapper::deallocate`].
    #[instrument(skip(self), fields(servlet = %self.name))]
    pub async fn allocate(&self) -> Result<Arc<dyn Servlet>, ServletError> {
        if self.is_unloading() {
            return Err(ServletError::service(format!(
                "cannot allocate servlet '{}' because it is being unloaded",
                self.name
            )));
        }

        if !self.is_single_thread_model() {
            if let Some(servlet) = self.shared_instance().await? {
                self.count_allocated.fetch_add(1, Ordering::AcqRel);
                return Ok(servlet);
            }
        }

        self.allocate_pooled().await
    }

    /// Return an instance obtained from [`Wrapper::allocate`]
    pub async fn deallocate(&self, servlet: Arc<dyn Servlet>) {
        if !self.is_single_thread_model() {
            self.release_count();
            return;
        }

        let mut pool = self.pool.lock().await;
        self.release_count();
        pool.idle.push(servlet);
        drop(pool);
        self.pool_available.notify_one();
    }

    fn release_count(&self) {
        let _ = self
            .count_allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Load and initialize the servlet now (load-on-startup). Idempotent.
    #[instrument(skip(self), fields(servlet = %self.name))]
    pub async fn load(&self) -> Result<(), ServletError> {
        self.shared_instance().await.map(|_| ())
    }

    /// Shared instance for non-pooled servlets, loading and initializing it as needed.
    /// Returns `None` once the servlet turns out to be single-thread-model.
    async fn shared_instance(&self) -> Result<Option<Arc<dyn Servlet>>, ServletError> {
        if self.instance_initialized.load(Ordering::Acquire) {
            let current = self.instance.read().clone();
            if let Some(servlet) = current {
                return Ok(Some(servlet));
            }
        }

        let _guard = self.load_lock.lock().await;
        if self.is_single_thread_model() {
            return Ok(None);
        }

        let existing = self.instance.read().clone();
        let servlet = match existing {
            Some(servlet) => servlet,
            None => {
                let servlet = self.load_servlet()?;
                if servlet.single_thread_model() && self.prebuilt.read().is_none() {
                    self.init_servlet(&servlet).await?;
                    self.single_thread_model.store(true, Ordering::Release);
                    let mut pool = self.pool.lock().await;
                    pool.idle.push(servlet);
                    pool.created += 1;
                    debug!(servlet = %self.name, "Servlet uses the single-thread-model instance pool");
                    return Ok(None);
                }
                *self.instance.write() = Some(servlet.clone());
                servlet
            }
        };

        if !self.instance_initialized.load(Ordering::Acquire) {
            self.init_servlet(&servlet).await?;
            self.instance_initialized.store(true, Ordering::Release);
        }
        Ok(Some(servlet))
    }

    /// Bounded pool for single-thread-model servlets. Waits when every instance is busy.
    async fn allocate_pooled(&self) -> Result<Arc<dyn Servlet>, ServletError> {
        loop {
            let mut pool = self.pool.lock().await;
            if let Some(servlet) = pool.idle.pop() {
                self.count_allocated.fetch_add(1, Ordering::AcqRel);
                return Ok(servlet);
            }

            if pool.created < self.max_instances() {
                let servlet = self.load_servlet()?;
                self.init_servlet(&servlet).await?;
                pool.created += 1;
                self.count_allocated.fetch_add(1, Ordering::AcqRel);
                debug!(servlet = %self.name, pool_size = pool.created, "Grew servlet instance pool");
                return Ok(servlet);
            }

            let notified = self.pool_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(pool);
            notified.await;

            if self.is_unloading() {
                return Err(ServletError::service(format!(
                    "servlet '{}' was unloaded while waiting for an instance",
                    self.name
                )));
            }
        }
    }

    /// Resolve the class and create a fresh, uninitialized instance
    fn load_servlet(&self) -> Result<Arc<dyn Servlet>, ServletError> {
        let prebuilt = self.prebuilt.read().clone();
        if let Some(servlet) = prebuilt {
            return Ok(servlet);
        }

        let started = Instant::now();
        let class = self.load_servlet_class()?;
        self.class_load_time_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);

        let servlet = match std::panic::catch_unwind(AssertUnwindSafe(|| class.instantiate())) {
            Ok(Ok(servlet)) => servlet,
            Ok(Err(e)) => {
                self.unavailable(None);
                return Err(ServletError::wrap(
                    format!("error instantiating servlet class {}", class.name()),
                    e,
                ));
            }
            Err(payload) => {
                self.unavailable(None);
                return Err(ServletError::wrap(
                    format!("error instantiating servlet class {}", class.name()),
                    ServletError::from_panic(payload),
                ));
            }
        };

        self.load_time_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.container_events
            .fire(&self.name, ContainerEvent::Load(self.name.clone()));
        if let Some(context) = self.context() {
            context.fire_container_event(ContainerEvent::Load(self.name.clone()));
        }
        info!(servlet = %self.name, class = %class.name(), "Servlet loaded");
        Ok(servlet)
    }

    fn load_servlet_class(&self) -> Result<ServletClass, ServletError> {
        let existing = self.servlet_class.read().clone();
        if let Some(class) = existing {
            return Ok(class);
        }

        let Some(class_name) = self.resolve_class_name_and_parameters() else {
            self.unavailable(None);
            return Err(ServletError::service(format!(
                "no servlet class has been specified for servlet {}",
                self.name
            )));
        };

        let context = self.context();
        let container_provided = context
            .as_ref()
            .is_some_and(|c| c.container_loader().provides(&class_name));
        let loader: Option<Arc<dyn Loader>> = match &context {
            Some(c) if container_provided => Some(c.container_loader().clone() as Arc<dyn Loader>),
            Some(c) => c.loader(),
            None => None,
        };

        let Some(loader) = loader else {
            self.unavailable(None);
            return Err(ServletError::service(format!(
                "cannot find a loader for servlet {}",
                self.name
            )));
        };

        match loader.servlet_class(&class_name) {
            Some(class) => {
                debug!(servlet = %self.name, class = %class_name, loader = loader.name(), "Servlet class resolved");
                *self.servlet_class.write() = Some(class.clone());
                Ok(class)
            }
            None => {
                self.unavailable(None);
                error!(servlet = %self.name, class = %class_name, loader = loader.name(), "Servlet class not found");
                Err(ServletError::service(format!(
                    "cannot find servlet class {}",
                    class_name
                )))
            }
        }
    }

    /// Class name to load. JSP-file servlets borrow the `jsp` wrapper's class and
    /// any init parameters they do not override.
    fn resolve_class_name_and_parameters(&self) -> Option<String> {
        let declared = self.servlet_class_name();
        let jsp_file = self.jsp_file();
        if declared.is_some() || jsp_file.is_none() {
            return declared;
        }

        let jsp_wrapper = self.context()?.find_child(JSP_SERVLET_NAME)?;
        {
            let mut params = self.init_params.write();
            for (name, value) in jsp_wrapper.init_parameters() {
                params.entry(name).or_insert(value);
            }
        }
        jsp_wrapper.servlet_class_name()
    }

    fn servlet_config(&self) -> ServletConfig {
        ServletConfig::new(
            self.name.clone(),
            self.init_parameters(),
            self.context.read().clone(),
        )
    }

    async fn init_servlet(&self, servlet: &Arc<dyn Servlet>) -> Result<(), ServletError> {
        let config = self.servlet_config();
        self.instance_support
            .fire(InstanceEventKind::BeforeInit, &self.name, None, None);

        let result = match AssertUnwindSafe(servlet.init(&config)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(ServletError::from_panic(payload)),
        };

        match result {
            Ok(()) => {
                self.instance_support
                    .fire(InstanceEventKind::AfterInit, &self.name, None, None);
                Ok(())
            }
            Err(err @ ServletError::Unavailable { .. }) => {
                self.instance_support
                    .fire(InstanceEventKind::AfterInit, &self.name, None, Some(&err));
                self.unavailable(Some(&err));
                Err(err)
            }
            Err(err @ ServletError::Service { .. }) => {
                self.instance_support
                    .fire(InstanceEventKind::AfterInit, &self.name, None, Some(&err));
                Err(err)
            }
            Err(err) => {
                self.instance_support
                    .fire(InstanceEventKind::AfterInit, &self.name, None, Some(&err));
                Err(ServletError::wrap(
                    format!("servlet.init() for servlet {} threw exception", self.name),
                    err,
                ))
            }
        }
    }

    async fn destroy_instance(&self, servlet: &Arc<dyn Servlet>) {
        self.instance_support
            .fire(InstanceEventKind::BeforeDestroy, &self.name, None, None);
        let result = match AssertUnwindSafe(servlet.destroy()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(ServletError::from_panic(payload)),
        };
        if let Err(e) = &result {
            error!(servlet = %self.name, error = %e, "Servlet.destroy() threw exception");
        }
        self.instance_support.fire(
            InstanceEventKind::AfterDestroy,
            &self.name,
            None,
            result.as_ref().err(),
        );
    }

    /// Destroy the loaded instance(s), waiting up to the unload delay for
    /// outstanding allocations to be returned first. The next `allocate` reloads.
    #[instrument(skip(self), fields(servlet = %self.name))]
    pub async fn unload(&self) -> Result<(), ServletError> {
        let _guard = self.load_lock.lock().await;

        let pooled = self.is_single_thread_model();
        let has_instance = self.instance.read().is_some();
        if !pooled && !has_instance {
            return Ok(());
        }

        self.unloading.store(true, Ordering::Release);

        if self.count_allocated() > 0 {
            let delay = self.unload_delay() / 20;
            let mut retries = 0;
            while retries < UNLOAD_RETRIES && self.count_allocated() > 0 {
                if retries % 10 == 0 {
                    info!(
                        servlet = %self.name,
                        outstanding = self.count_allocated(),
                        "Waiting for servlet instances to be deallocated"
                    );
                }
                tokio::time::sleep(delay).await;
                retries += 1;
            }
            if self.count_allocated() > 0 {
                warn!(
                    servlet = %self.name,
                    outstanding = self.count_allocated(),
                    "Unloading servlet with instances still allocated"
                );
            }
        }

        let instance = self.instance.write().take();
        if let Some(servlet) = instance {
            if self.instance_initialized.load(Ordering::Acquire) {
                self.destroy_instance(&servlet).await;
            }
        }

        if pooled {
            let idle = {
                let mut pool = self.pool.lock().await;
                pool.created = 0;
                std::mem::take(&mut pool.idle)
            };
            for servlet in &idle {
                self.destroy_instance(servlet).await;
            }
            // Wake anyone still waiting so they observe the unload
            self.pool_available.notify_waiters();
        }

        self.instance_initialized.store(false, Ordering::Release);
        self.single_thread_model.store(false, Ordering::Release);
        self.unloading.store(false, Ordering::Release);

        self.container_events
            .fire(&self.name, ContainerEvent::Unload(self.name.clone()));
        if let Some(context) = self.context() {
            context.fire_container_event(ContainerEvent::Unload(self.name.clone()));
        }
        info!(servlet = %self.name, "Servlet unloaded");
        Ok(())
    }

    // ---- lifecycle ----

    pub fn start(&self) {
        self.lifecycle.set(LifecycleState::Available);
    }

    /// Unload the servlet; failures are logged, never raised
    pub async fn stop(&self) {
        self.lifecycle.set(LifecycleState::Stopping);
        if let Err(e) = self.unload().await {
            error!(servlet = %self.name, error = %e, "Failed to unload servlet during stop");
        }
        self.lifecycle.set(LifecycleState::Stopped);
    }

    // ---- statistics ----

    pub fn record_request(&self, elapsed: Duration, failed: bool) {
        let ms = elapsed.as_millis() as u64;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.processing_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_time_ms.fetch_max(ms, Ordering::Relaxed);
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> WrapperStats {
        WrapperStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            processing_time_ms: self.processing_time_ms.load(Ordering::Relaxed),
            max_time_ms: self.max_time_ms.load(Ordering::Relaxed),
            load_time_ms: self.load_time_ms.load(Ordering::Relaxed),
            class_load_time_ms: self.class_load_time_ms.load(Ordering::Relaxed),
        }
    }
}

fn already_configured(name: &str) -> ContainerError {
    ContainerError::IllegalState(format!(
        "wrapper '{}' already initialized with servlet instance, class, or name",
        name
    ))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        inits: AtomicUsize,
        destroys: AtomicUsize,
    }

    #[async_trait]
    impl Servlet for Counting {
        async fn init(&self, _config: &ServletConfig) -> Result<(), ServletError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn service(&self, _req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
            resp.write_str("ok");
            Ok(())
        }

        async fn destroy(&self) -> Result<(), ServletError> {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Flaky;

    #[async_trait]
    impl Servlet for Flaky {
        async fn init(&self, _config: &ServletConfig) -> Result<(), ServletError> {
            Err(ServletError::unavailable_for("warming up", 30))
        }

        async fn service(&self, _req: &mut Request, _resp: &mut Response) -> Result<(), ServletError> {
            Ok(())
        }
    }

    #[test]
    fn test_set_once_rules() {
        let wrapper = Wrapper::new("hello");
        wrapper.set_servlet_class_name("com.example.Hello").unwrap();
        assert!(wrapper.set_servlet_class_name("com.example.Other").is_err());
        assert!(wrapper.set_servlet(Arc::new(Counting::default())).is_err());

        let other = ServletClass::from_fn("com.example.Other", || Ok(Arc::new(Counting::default()) as _));
        assert!(wrapper.set_servlet_class(other).is_err());

        let same = ServletClass::from_fn("com.example.Hello", || Ok(Arc::new(Counting::default()) as _));
        wrapper.set_servlet_class(same.clone()).unwrap();
        assert!(wrapper.set_servlet_class(same).is_err());
        assert_eq!(wrapper.servlet_class_name().as_deref(), Some("com.example.Hello"));
    }

    #[test]
    fn test_instance_fixes_class_name() {
        let wrapper = Wrapper::new("counting");
        wrapper.set_servlet(Arc::new(Counting::default())).unwrap();
        assert!(wrapper.servlet_class_name().unwrap().ends_with("Counting"));
        assert!(wrapper.set_servlet_class_name("x").is_err());
    }

    #[tokio::test]
    async fn test_allocate_loads_once_and_balances() {
        let servlet = Arc::new(Counting::default());
        let wrapper = Wrapper::new("counting");
        wrapper.set_servlet(servlet.clone()).unwrap();

        let a = wrapper.allocate().await.unwrap();
        let b = wrapper.allocate().await.unwrap();
        assert_eq!(wrapper.count_allocated(), 2);
        assert_eq!(servlet.inits.load(Ordering::SeqCst), 1);

        wrapper.deallocate(a).await;
        wrapper.deallocate(b).await;
        assert_eq!(wrapper.count_allocated(), 0);
    }

    #[tokio::test]
    async fn test_missing_class_is_permanently_unavailable() {
        let wrapper = Wrapper::new("ghost");
        let err = wrapper.allocate().await.err().expect("expected allocate to fail");
        assert!(err.to_string().contains("no servlet class"));
        assert!(wrapper.is_permanently_unavailable());
        assert!(wrapper.is_unavailable());
    }

    #[tokio::test]
    async fn test_temporary_unavailability_from_init() {
        let wrapper = Wrapper::new("flaky");
        wrapper.set_servlet(Arc::new(Flaky)).unwrap();

        let err = wrapper.allocate().await.err().expect("expected allocate to fail");
        assert!(matches!(err, ServletError::Unavailable { .. }));
        assert!(wrapper.is_unavailable());
        assert!(!wrapper.is_permanently_unavailable());
        let retry = wrapper.retry_after_secs().unwrap();
        assert!((29..=30).contains(&retry));
    }

    #[test]
    fn test_expired_window_self_clears() {
        let wrapper = Wrapper::new("w");
        wrapper.set_available(now_millis() - 1);
        assert!(!wrapper.is_unavailable());
        assert_eq!(wrapper.available(), 0);
    }

    #[tokio::test]
    async fn test_unload_destroys_and_reloads() {
        let servlet = Arc::new(Counting::default());
        let wrapper = Wrapper::new("counting");
        wrapper.set_servlet(servlet.clone()).unwrap();

        wrapper.load().await.unwrap();
        wrapper.unload().await.unwrap();
        assert_eq!(servlet.destroys.load(Ordering::SeqCst), 1);
        assert!(wrapper.servlet().is_none());

        let s = wrapper.allocate().await.unwrap();
        assert_eq!(servlet.inits.load(Ordering::SeqCst), 2);
        wrapper.deallocate(s).await;
    }
}
