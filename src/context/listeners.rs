// Application event listeners
// Instantiation at startup, context/attribute/request notifications and teardown

use super::{display_path, Context};
use crate::error::{LifecycleError, ServletError};
use crate::http::Request;
use crate::lifecycle::ContainerEvent;
use crate::listener::{EventListener, HttpSessionListener};
use crate::loader::Loader;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

impl Context {
    /// Instantiate declared listener classes and rebuild the active listener lists.
    /// Class-declared listeners come before instances registered directly.
    pub(crate) fn listener_start(&self) -> Result<(), LifecycleError> {
        let mut listeners = Vec::new();
        for class_name in self.listener_classes() {
            debug!(context = %display_path(self.path()), listener = %class_name, "Configuring event listener class");
            let class = self
                .loader()
                .and_then(|l| l.listener_class(&class_name))
                .or_else(|| self.container_loader().listener_class(&class_name))
                .ok_or_else(|| LifecycleError::Listener {
                    name: class_name.clone(),
                    source: ServletError::service(format!("listener class '{}' not found", class_name)),
                })?;
            let listener = class.instantiate().map_err(|source| LifecycleError::Listener {
                name: class_name.clone(),
                source,
            })?;
            listeners.push(listener);
        }
        listeners.extend(self.declared_listeners.read().iter().cloned());

        let mut context = Vec::new();
        let mut attribute = Vec::new();
        let mut request = Vec::new();
        let mut session = Vec::new();
        for listener in listeners {
            match listener {
                EventListener::Context(l) => context.push(l),
                EventListener::ContextAttribute(l) => attribute.push(l),
                EventListener::Request(l) => request.push(l),
                EventListener::Session(l) => session.push(l),
            }
        }
        *self.context_listeners.write() = context;
        *self.attribute_listeners.write() = attribute;
        *self.request_listeners.write() = request;
        *self.session_listeners.write() = session;
        Ok(())
    }

    /// Deliver `context_initialized` in declaration order. The first failure aborts
    /// startup. Afterwards every registration must have a class.
    pub(crate) async fn context_listener_start(&self) -> Result<(), LifecycleError> {
        let listeners = self.context_listeners.read().clone();
        for listener in listeners {
            let name = listener.name().to_string();
            self.fire_container_event(ContainerEvent::BeforeContextInitialized(name.clone()));
            let result = listener.context_initialized(self).await;
            self.fire_container_event(ContainerEvent::AfterContextInitialized(name.clone()));
            result.map_err(|source| LifecycleError::Listener { name, source })?;
        }

        for entry in self.servlet_registrations.iter() {
            let wrapper = entry.value().wrapper();
            if !wrapper.has_servlet_source() && wrapper.jsp_file().is_none() {
                return Err(LifecycleError::PreliminaryRegistration {
                    kind: "servlet",
                    name: entry.key().clone(),
                });
            }
        }
        let filters = self.filter_defs();
        for entry in self.filter_registrations.iter() {
            let complete = filters
                .iter()
                .any(|d| &d.filter_name == entry.key() && d.has_class());
            if !complete {
                return Err(LifecycleError::PreliminaryRegistration {
                    kind: "filter",
                    name: entry.key().clone(),
                });
            }
        }

        self.context_initialized_called.store(true, Ordering::Release);
        Ok(())
    }

    /// Deliver `context_destroyed` in reverse declaration order. Failures are logged.
    pub(crate) async fn context_listener_stop(&self) {
        let listeners = std::mem::take(&mut *self.context_listeners.write());
        for listener in listeners.iter().rev() {
            let name = listener.name().to_string();
            self.fire_container_event(ContainerEvent::BeforeContextDestroyed(name.clone()));
            if let Err(e) = listener.context_destroyed(self).await {
                error!(context = %display_path(self.path()), listener = %name, error = %e, "Listener failed in context_destroyed");
            }
            self.fire_container_event(ContainerEvent::AfterContextDestroyed(name));
        }
    }

    pub(crate) fn session_listener_stop(&self) {
        self.session_listeners.write().clear();
    }

    pub(crate) fn event_listener_stop(&self) {
        self.attribute_listeners.write().clear();
        self.request_listeners.write().clear();
    }

    /// Active session listeners, in declaration order
    pub(crate) fn session_listeners(&self) -> Vec<Arc<dyn HttpSessionListener>> {
        self.session_listeners.read().clone()
    }

    /// Drop every attribute, telling attribute listeners about each removal
    pub(crate) fn clear_attributes(&self) {
        let removed: Vec<_> = self.attributes.write().drain().collect();
        for (name, value) in removed {
            self.notify_attribute_removed(&name, &value);
        }
    }

    pub(crate) fn notify_attribute_added(&self, name: &str, value: &Value) {
        let listeners = self.attribute_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.attribute_added(self, name, value) {
                warn!(context = %display_path(self.path()), attribute = %name, error = %e, "Attribute listener failed");
            }
        }
    }

    pub(crate) fn notify_attribute_replaced(&self, name: &str, old: &Value) {
        let listeners = self.attribute_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.attribute_replaced(self, name, old) {
                warn!(context = %display_path(self.path()), attribute = %name, error = %e, "Attribute listener failed");
            }
        }
    }

    pub(crate) fn notify_attribute_removed(&self, name: &str, value: &Value) {
        let listeners = self.attribute_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.attribute_removed(self, name, value) {
                warn!(context = %display_path(self.path()), attribute = %name, error = %e, "Attribute listener failed");
            }
        }
    }

    /// Does any request listener need to hear about requests?
    pub fn has_request_listeners(&self) -> bool {
        !self.request_listeners.read().is_empty()
    }

    /// Tell request listeners a request entered the application. A failing
    /// listener's error is recorded on the request; the others still run.
    pub fn fire_request_initialized(&self, req: &mut Request) {
        let listeners = self.request_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.request_initialized(self, req) {
                warn!(context = %display_path(self.path()), error = %e, "Request listener failed in request_initialized");
                req.set_exception(Arc::new(e));
            }
        }
    }

    /// Counterpart of [`fire_request_initialized`](Self::fire_request_initialized), in reverse order
    pub fn fire_request_destroyed(&self, req: &mut Request) {
        let listeners = self.request_listeners.read().clone();
        for listener in listeners.iter().rev() {
            if let Err(e) = listener.request_destroyed(self, req) {
                warn!(context = %display_path(self.path()), error = %e, "Request listener failed in request_destroyed");
                req.set_exception(Arc::new(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ServletContextAttributeListener, ServletRequestListener};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        fail: bool,
    }

    impl ServletContextAttributeListener for Recorder {
        fn attribute_added(&self, _context: &Context, name: &str, _value: &Value) -> Result<(), ServletError> {
            self.events.lock().push(format!("added:{}", name));
            if self.fail {
                return Err(ServletError::service("listener broke"));
            }
            Ok(())
        }

        fn attribute_replaced(&self, _context: &Context, name: &str, old: &Value) -> Result<(), ServletError> {
            self.events.lock().push(format!("replaced:{}:{}", name, old));
            Ok(())
        }

        fn attribute_removed(&self, _context: &Context, name: &str, _value: &Value) -> Result<(), ServletError> {
            self.events.lock().push(format!("removed:{}", name));
            Ok(())
        }
    }

    struct Tag(&'static str, Arc<Mutex<Vec<String>>>);

    impl ServletRequestListener for Tag {
        fn request_initialized(&self, _context: &Context, _request: &Request) -> Result<(), ServletError> {
            self.1.lock().push(format!("init:{}", self.0));
            Ok(())
        }

        fn request_destroyed(&self, _context: &Context, _request: &Request) -> Result<(), ServletError> {
            self.1.lock().push(format!("destroy:{}", self.0));
            Ok(())
        }
    }

    #[test]
    fn test_attribute_listener_failure_is_isolated() {
        let context = Context::new("/app");
        let failing = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let healthy = Arc::new(Recorder::default());
        context
            .add_listener(EventListener::ContextAttribute(failing.clone()))
            .unwrap();
        context
            .add_listener(EventListener::ContextAttribute(healthy.clone()))
            .unwrap();
        context.listener_start().unwrap();

        context.set_attribute("a", json!(1));
        context.set_attribute("a", json!(2));
        context.set_attribute("a", Value::Null);

        assert_eq!(*failing.events.lock(), vec!["added:a", "replaced:a:1", "removed:a"]);
        assert_eq!(*healthy.events.lock(), vec!["added:a", "replaced:a:1", "removed:a"]);
        assert!(context.attribute("a").is_none());
    }

    #[test]
    fn test_request_destroyed_runs_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = Context::new("/app");
        for tag in ["first", "second"] {
            context
                .add_listener(EventListener::Request(Arc::new(Tag(tag, log.clone()))))
                .unwrap();
        }
        context.listener_start().unwrap();

        let mut req = Request::get("/app/x");
        context.fire_request_initialized(&mut req);
        context.fire_request_destroyed(&mut req);

        assert_eq!(
            *log.lock(),
            vec!["init:first", "init:second", "destroy:second", "destroy:first"]
        );
    }

    #[test]
    fn test_unknown_listener_class_fails() {
        let context = Context::new("/app");
        context.add_listener_class("com.example.Missing").unwrap();
        let err = context.listener_start().unwrap_err();
        assert!(matches!(err, LifecycleError::Listener { .. }));
    }

    #[tokio::test]
    async fn test_preliminary_servlet_registration_fails_startup_check() {
        let context = Context::new("/app");
        context
            .add_child(Arc::new(crate::wrapper::Wrapper::new("pending")))
            .unwrap();
        context.listener_start().unwrap();

        let err = context.context_listener_start().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::PreliminaryRegistration { kind: "servlet", .. }
        ));
        assert!(!context.is_context_initialized());
    }
}
