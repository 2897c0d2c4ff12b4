// Context lifecycle
// init, start with rollback, best-effort stop, reload and destroy

use super::{display_path, Context};
use crate::binding::{self, ContextBinding};
use crate::error::LifecycleError;
use crate::lifecycle::{ContainerEvent, LifecycleEvent, LifecycleState};
use crate::loader::WebappLoader;
use crate::resources::Resources;
use crate::session::StandardManager;
use crate::wrapper::Wrapper;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

impl Context {
    /// Deliver `event` to every lifecycle listener, propagating the first failure
    pub(crate) async fn fire_lifecycle_checked(&self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        let listeners = self.lifecycle_listeners.read().clone();
        for listener in listeners {
            listener.lifecycle_event(self, event).await?;
        }
        Ok(())
    }

    /// Deliver `event` to every lifecycle listener, logging failures
    pub(crate) async fn fire_lifecycle(&self, event: LifecycleEvent) {
        let listeners = self.lifecycle_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.lifecycle_event(self, event).await {
                warn!(context = %display_path(self.path()), listener = listener.name(), event = ?event, error = %e, "Lifecycle listener failed");
            }
        }
    }

    /// Loader and naming environment requests and lifecycle phases run under
    pub(crate) fn binding(&self) -> ContextBinding {
        ContextBinding::new(self.path(), self.loader(), self.use_naming())
    }

    /// One-time initialization. Called implicitly by `start` when needed.
    pub async fn init(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle_lock.lock().await;
        self.init_locked().await
    }

    async fn init_locked(&self) -> Result<(), LifecycleError> {
        self.lifecycle.require("init", &[LifecycleState::New])?;
        self.fire_lifecycle(LifecycleEvent::Init).await;
        self.lifecycle.set(LifecycleState::Initialized);
        debug!(context = %display_path(self.path()), "Context initialized");
        Ok(())
    }

    /// Start the application. A no-op when already started.
    ///
    /// Any failure stops whatever was started and is returned wrapped in
    /// [`LifecycleError::Startup`]; the context is left unavailable.
    #[instrument(skip(self), fields(context = %display_path(self.path())))]
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle_lock.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<(), LifecycleError> {
        match self.lifecycle.state() {
            LifecycleState::Available | LifecycleState::Starting => {
                debug!(context = %display_path(self.path()), "Context already started");
                return Ok(());
            }
            LifecycleState::New => self.init_locked().await?,
            LifecycleState::Destroyed | LifecycleState::Stopping => {
                self.lifecycle.require("start", &[])?;
            }
            LifecycleState::Initialized | LifecycleState::Stopped => {}
        }

        info!(context = %display_path(self.path()), "Starting context");
        self.fire_lifecycle(LifecycleEvent::BeforeStart).await;
        self.lifecycle.set(LifecycleState::Starting);
        self.set_available(false);
        self.set_configured(false);

        match self.start_internal().await {
            Ok(()) => {
                self.set_available(true);
                self.lifecycle.set(LifecycleState::Available);
                self.fire_lifecycle(LifecycleEvent::AfterStart).await;
                info!(
                    context = %display_path(self.path()),
                    servlets = self.find_children().len(),
                    filters = self.filter_configs.read().len(),
                    "Context started"
                );
                Ok(())
            }
            Err(e) => {
                error!(context = %display_path(self.path()), error = %e, "Context startup failed");
                if let Err(stop_err) = self.stop_locked().await {
                    error!(context = %display_path(self.path()), error = %stop_err, "Cleanup after failed startup failed");
                }
                self.set_available(false);
                Err(LifecycleError::Startup {
                    path: display_path(self.path()),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn start_internal(&self) -> Result<(), LifecycleError> {
        // Resources
        let resources = match self.resources() {
            Some(resources) => resources,
            None => {
                let alternates = self.alternate_doc_bases.read().clone();
                let resources = Arc::new(Resources::new(self.doc_base(), alternates));
                self.set_resources(resources.clone());
                resources
            }
        };
        for ext in self.provided_extensions.read().iter() {
            resources.add_provided_extension(ext.clone());
        }
        // Starting resources scans the manifest for provided extensions
        resources.start()?;
        if let Err(e) = self.validate_required_extensions(&resources) {
            resources.stop();
            return Err(e);
        }

        // Loader
        if self.loader().is_none() {
            let loader = WebappLoader::new();
            for root in resources.roots() {
                loader.watch(root.clone());
            }
            self.set_loader(Arc::new(loader));
        }

        self.started.store(true, Ordering::Release);

        // Subordinate components run with the application's loader bound
        binding::scope(self.binding(), self.start_components()).await?;

        // The descriptor may have declared further extensions
        self.validate_required_extensions(&resources)?;

        if !self.is_configured() {
            return Err(LifecycleError::NotConfigured(display_path(self.path())));
        }

        let welcome = self.welcome_files();
        {
            let _mappings = self.servlet_mappings.write();
            self.update_mapper(|m| m.set_welcome_files(welcome));
        }

        binding::scope(self.binding(), self.start_application()).await
    }

    async fn start_components(&self) -> Result<(), LifecycleError> {
        if let Some(loader) = self.loader() {
            loader.start()?;
        }

        let components = self.components.read().clone();
        for component in components {
            component.start().await?;
            debug!(context = %display_path(self.path()), component = component.name(), "Component started");
        }

        for child in self.find_children() {
            child.start();
        }
        self.pipeline.start().await?;

        // Descriptor processing happens here and signals `configured`
        self.fire_lifecycle_checked(LifecycleEvent::ConfigureStart).await?;
        self.fire_lifecycle(LifecycleEvent::Start).await;
        Ok(())
    }

    fn validate_required_extensions(&self, resources: &Resources) -> Result<(), LifecycleError> {
        let required = self.required_extensions.read().clone();
        for extension in required {
            if !resources.provides_extension(&extension) {
                return Err(LifecycleError::MissingExtension {
                    context: display_path(self.path()),
                    extension,
                });
            }
        }
        Ok(())
    }

    async fn start_application(&self) -> Result<(), LifecycleError> {
        self.merge_parameters();

        self.call_initializers().await?;

        self.listener_start()?;
        self.context_listener_start().await?;

        let manager = match self.manager() {
            Some(manager) => manager,
            None => {
                let manager = Arc::new(StandardManager::new());
                self.set_manager(manager.clone());
                manager
            }
        };
        manager.start()?;

        self.start_background_processor();

        if !self.filter_start().await {
            error!(context = %display_path(self.path()), "One or more filters failed to start");
        }

        self.load_on_startup().await;
        Ok(())
    }

    /// Create every started filter configuration. Returns `false` if any filter failed.
    async fn filter_start(&self) -> bool {
        let Some(context) = self.arc() else {
            return false;
        };
        let defs = self.filter_defs();
        let mut ok = true;
        for def in defs.into_iter().filter(|d| d.has_class()) {
            let name = def.filter_name.clone();
            match crate::filter_chain::ApplicationFilterConfig::new(&context, def).await {
                Ok(config) => {
                    self.filter_configs.write().insert(name, Arc::new(config));
                }
                Err(e) => {
                    error!(context = %display_path(self.path()), filter = %name, error = %e, "Filter failed to start");
                    ok = false;
                }
            }
        }
        ok
    }

    async fn filter_stop(&self) {
        let configs: Vec<_> = self.filter_configs.write().drain().map(|(_, c)| c).collect();
        for config in configs {
            config.release().await;
        }
    }

    /// Load servlets declaring load-on-startup, lowest value first. Failures are
    /// logged and do not stop the remaining servlets from loading.
    async fn load_on_startup(&self) {
        let mut ordered: BTreeMap<i32, Vec<Arc<Wrapper>>> = BTreeMap::new();
        let mut lazy = Vec::new();
        for wrapper in self.find_children() {
            let priority = wrapper.load_on_startup();
            if priority >= 0 {
                ordered.entry(priority).or_default().push(wrapper);
            } else if self.load_all_on_startup() {
                lazy.push(wrapper);
            }
        }

        for wrapper in ordered.into_values().flatten().chain(lazy) {
            if let Err(e) = wrapper.load().await {
                error!(
                    context = %display_path(self.path()),
                    servlet = %wrapper.name(),
                    error = %e,
                    "Servlet threw load() exception"
                );
            }
        }
    }

    /// Stop the application. Every teardown step runs even if earlier ones fail.
    #[instrument(skip(self), fields(context = %display_path(self.path())))]
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle_lock.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<(), LifecycleError> {
        if self.lifecycle.state() == LifecycleState::Destroyed {
            return Err(LifecycleError::InvalidState {
                component: format!("context[{}]", display_path(self.path())),
                state: LifecycleState::Destroyed.to_string(),
                operation: "stop",
            });
        }
        if !self.started.load(Ordering::Acquire) {
            debug!(context = %display_path(self.path()), "Context has not been started");
            if self.lifecycle.state() == LifecycleState::Starting {
                self.lifecycle.set(LifecycleState::Stopped);
            }
            return Ok(());
        }

        info!(context = %display_path(self.path()), "Stopping context");
        self.fire_lifecycle(LifecycleEvent::BeforeStop).await;
        self.lifecycle.set(LifecycleState::Stopping);
        self.set_available(false);

        binding::scope(self.binding(), self.stop_application()).await;

        if let Some(loader) = self.loader() {
            loader.stop();
        }
        self.context_initialized_called.store(false, Ordering::Release);
        *self.merged_parameters.write() = BTreeMap::new();

        self.lifecycle.set(LifecycleState::Stopped);
        self.fire_lifecycle(LifecycleEvent::AfterStop).await;
        info!(context = %display_path(self.path()), "Context stopped");
        Ok(())
    }

    async fn stop_application(&self) {
        for child in self.find_children() {
            child.stop().await;
        }

        self.filter_stop().await;
        self.stop_background_processor().await;

        if let Some(manager) = self.manager() {
            let listeners = self.session_listeners.read().clone();
            manager.stop(&listeners);
        }

        // Listeners still see every attribute; attributes go only after they ran
        self.context_listener_stop().await;
        self.session_listener_stop();
        self.clear_attributes();
        self.event_listener_stop();

        self.fire_lifecycle(LifecycleEvent::Stop).await;
        self.started.store(false, Ordering::Release);

        self.pipeline.stop().await;
        if let Some(resources) = self.resources() {
            resources.stop();
        }

        let components = self.components.read().clone();
        for component in components.iter().rev() {
            if let Err(e) = component.stop().await {
                error!(context = %display_path(self.path()), component = component.name(), error = %e, "Component failed to stop");
            }
        }
    }

    /// Stop and start again, pausing request admission meanwhile.
    /// Registrations made before the first start are kept.
    #[instrument(skip(self), fields(context = %display_path(self.path())))]
    pub async fn reload(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle_lock.lock().await;
        self.lifecycle.require("reload", &[LifecycleState::Available])?;

        info!(context = %display_path(self.path()), "Reloading context");
        self.paused.store(true, Ordering::Release);

        if let Err(e) = self.stop_locked().await {
            error!(context = %display_path(self.path()), error = %e, "Stop during reload failed");
        }
        let result = self.start_locked().await;
        if let Err(e) = &result {
            error!(context = %display_path(self.path()), error = %e, "Start during reload failed");
        }

        self.paused.store(false, Ordering::Release);
        self.fire_container_event(ContainerEvent::Reload(display_path(self.path())));
        result
    }

    /// Release every registration. Stops the context first if needed; fails when
    /// called a second time.
    pub async fn destroy(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle_lock.lock().await;
        if self.lifecycle.state() == LifecycleState::Destroyed {
            return Err(LifecycleError::InvalidState {
                component: format!("context[{}]", display_path(self.path())),
                state: LifecycleState::Destroyed.to_string(),
                operation: "destroy",
            });
        }
        if self.started.load(Ordering::Acquire) {
            if let Err(e) = self.stop_locked().await {
                error!(context = %display_path(self.path()), error = %e, "Stop during destroy failed");
            }
        }

        self.clear_registrations();
        *self.resources.write() = None;
        *self.loader.write() = None;
        self.fire_lifecycle(LifecycleEvent::Destroy).await;
        self.lifecycle.set(LifecycleState::Destroyed);
        info!(context = %display_path(self.path()), "Context destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServletSource;
    use crate::error::ServletError;
    use crate::http::{Request, Response};
    use crate::lifecycle::{Component, LifecycleListener};
    use crate::listener::{EventListener, ServletContextListener};
    use crate::servlet::{Servlet, ServletConfig};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Marks every context configured, as the descriptor collaborator would
    pub(crate) struct Configured;

    #[async_trait]
    impl LifecycleListener for Configured {
        async fn lifecycle_event(&self, context: &Context, event: LifecycleEvent) -> Result<(), LifecycleError> {
            if event == LifecycleEvent::ConfigureStart {
                context.set_configured(true);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Ordered {
        log: Arc<Mutex<Vec<String>>>,
        name: &'static str,
        fail_init: bool,
    }

    #[async_trait]
    impl Servlet for Ordered {
        async fn init(&self, _config: &ServletConfig) -> Result<(), ServletError> {
            self.log.lock().push(self.name.to_string());
            if self.fail_init {
                return Err(ServletError::service("init failed"));
            }
            Ok(())
        }

        async fn service(&self, _req: &mut Request, _resp: &mut Response) -> Result<(), ServletError> {
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ServletContextListener for Failing {
        async fn context_initialized(&self, _context: &Context) -> Result<(), ServletError> {
            Err(ServletError::service("refusing to start"))
        }
    }

    #[derive(Default)]
    struct Realm {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Component for Realm {
        fn name(&self) -> &str {
            "realm"
        }

        async fn start(&self) -> Result<(), LifecycleError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), LifecycleError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Err(LifecycleError::Component {
                name: "realm".into(),
                message: "never started properly".into(),
            })
        }
    }

    fn configured(path: &str) -> Arc<Context> {
        let context = Context::new(path);
        context.add_lifecycle_listener(Arc::new(Configured));
        context
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let context = Context::new("/bare");
        let err = context.start().await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert!(!context.is_available());
        assert_eq!(context.lifecycle_state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_destroy_once() {
        let context = configured("/app");
        context.start().await.unwrap();
        context.start().await.unwrap();
        assert!(context.is_available());

        context.destroy().await.unwrap();
        assert!(context.destroy().await.is_err());
        assert!(context.start().await.is_err());
    }

    #[tokio::test]
    async fn test_load_on_startup_order_and_failures_are_non_fatal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = configured("/app");
        for (name, priority, fail) in [("late", 5, false), ("broken", 1, true), ("early", 0, false), ("lazy", -1, false)] {
            let reg = context
                .add_servlet(
                    name,
                    ServletSource::Instance(Arc::new(Ordered {
                        log: log.clone(),
                        name,
                        fail_init: fail,
                    })),
                )
                .unwrap();
            reg.set_load_on_startup(priority).unwrap();
        }

        context.start().await.unwrap();
        assert_eq!(*log.lock(), vec!["early", "broken", "late"]);
        assert!(context.is_available());
    }

    #[tokio::test]
    async fn test_load_all_on_startup_loads_lazy_servlets_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = configured("/app");
        context.set_load_all_on_startup(true);
        for (name, priority) in [("lazy", -1), ("eager", 2)] {
            context
                .add_servlet(
                    name,
                    ServletSource::Instance(Arc::new(Ordered {
                        log: log.clone(),
                        name,
                        fail_init: false,
                    })),
                )
                .unwrap()
                .set_load_on_startup(priority)
                .unwrap();
        }

        context.start().await.unwrap();
        assert_eq!(*log.lock(), vec!["eager", "lazy"]);
    }

    #[tokio::test]
    async fn test_missing_extension_fails_before_components_start() {
        #[derive(Default)]
        struct Counting {
            starts: AtomicUsize,
        }

        #[async_trait]
        impl Component for Counting {
            fn name(&self) -> &str {
                "counting"
            }

            async fn start(&self) -> Result<(), LifecycleError> {
                self.starts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            async fn stop(&self) -> Result<(), LifecycleError> {
                Ok(())
            }
        }

        let component = Arc::new(Counting::default());
        let context = configured("/app");
        context.add_component(component.clone());
        context.add_required_extension("pear-json");

        let err = context.start().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Startup { ref source, .. }
                if matches!(**source, LifecycleError::MissingExtension { .. })
        ));
        assert_eq!(component.starts.load(Ordering::SeqCst), 0);
        assert!(!context.is_available());

        context.add_provided_extension("pear-json");
        context.start().await.unwrap();
        assert_eq!(component.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listener_failure_rolls_back_and_stop_is_quiet() {
        let realm = Arc::new(Realm::default());
        let context = configured("/app");
        context.add_component(realm.clone());
        context
            .add_listener(EventListener::Context(Arc::new(Failing)))
            .unwrap();

        let err = context.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Startup { .. }));
        assert!(!context.is_available());
        assert_eq!(realm.stops.load(Ordering::SeqCst), 1);

        context.stop().await.unwrap();
        assert_eq!(realm.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reload_keeps_registrations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = configured("/app");
        context
            .add_servlet(
                "s",
                ServletSource::Instance(Arc::new(Ordered {
                    log: log.clone(),
                    name: "s",
                    fail_init: false,
                })),
            )
            .unwrap()
            .set_load_on_startup(1)
            .unwrap();
        context.add_servlet_mapping("/s", "s").unwrap();

        context.start().await.unwrap();
        context.reload().await.unwrap();

        assert!(context.is_available());
        assert!(!context.is_paused());
        assert_eq!(context.find_servlet_mapping("/s").as_deref(), Some("s"));
        assert_eq!(log.lock().len(), 2);
    }
}
