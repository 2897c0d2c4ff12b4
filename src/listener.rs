// Application event listeners and instance instrumentation
// Context, attribute, request and session callbacks plus before/after instance events

use crate::context::Context;
use crate::error::ServletError;
use crate::http::Request;
use crate::session::Session;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait ServletContextListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// An error here aborts context startup
    async fn context_initialized(&self, context: &Context) -> Result<(), ServletError>;

    async fn context_destroyed(&self, _context: &Context) -> Result<(), ServletError> {
        Ok(())
    }
}

pub trait ServletContextAttributeListener: Send + Sync {
    fn attribute_added(&self, _context: &Context, _name: &str, _value: &serde_json::Value) -> Result<(), ServletError> {
        Ok(())
    }

    fn attribute_replaced(&self, _context: &Context, _name: &str, _old: &serde_json::Value) -> Result<(), ServletError> {
        Ok(())
    }

    fn attribute_removed(&self, _context: &Context, _name: &str, _value: &serde_json::Value) -> Result<(), ServletError> {
        Ok(())
    }
}

pub trait ServletRequestListener: Send + Sync {
    fn request_initialized(&self, _context: &Context, _request: &Request) -> Result<(), ServletError> {
        Ok(())
    }

    fn request_destroyed(&self, _context: &Context, _request: &Request) -> Result<(), ServletError> {
        Ok(())
    }
}

pub trait HttpSessionListener: Send + Sync {
    fn session_created(&self, _session: &Session) -> Result<(), ServletError> {
        Ok(())
    }

    fn session_destroyed(&self, _session: &Session) -> Result<(), ServletError> {
        Ok(())
    }
}

/// A registered application listener, tagged by the callbacks it receives
#[derive(Clone)]
pub enum EventListener {
    Context(Arc<dyn ServletContextListener>),
    ContextAttribute(Arc<dyn ServletContextAttributeListener>),
    Request(Arc<dyn ServletRequestListener>),
    Session(Arc<dyn HttpSessionListener>),
}

impl EventListener {
    pub fn kind(&self) -> &'static str {
        match self {
            EventListener::Context(_) => "context",
            EventListener::ContextAttribute(_) => "context-attribute",
            EventListener::Request(_) => "request",
            EventListener::Session(_) => "session",
        }
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventListener({})", self.kind())
    }
}

type ListenerFactory = dyn Fn() -> Result<EventListener, ServletError> + Send + Sync;

/// A loadable listener type
#[derive(Clone)]
pub struct ListenerClass {
    name: String,
    factory: Arc<ListenerFactory>,
}

impl ListenerClass {
    pub fn from_fn<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<EventListener, ServletError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self) -> Result<EventListener, ServletError> {
        (self.factory)()
    }
}

impl fmt::Debug for ListenerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ListenerClass").field(&self.name).finish()
    }
}

/// Points around servlet and filter invocations that instance listeners observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceEventKind {
    BeforeInit,
    AfterInit,
    BeforeService,
    AfterService,
    BeforeFilter,
    AfterFilter,
    BeforeDestroy,
    AfterDestroy,
}

#[derive(Debug)]
pub struct InstanceEvent<'a> {
    pub kind: InstanceEventKind,
    /// Name of the wrapper the event belongs to
    pub wrapper: &'a str,
    /// Filter name for filter events
    pub filter: Option<&'a str>,
    pub error: Option<&'a ServletError>,
}

pub trait InstanceListener: Send + Sync {
    fn instance_event(&self, event: &InstanceEvent<'_>);
}

/// Fan-out helper for instance events
#[derive(Default)]
pub struct InstanceSupport {
    listeners: RwLock<Vec<Arc<dyn InstanceListener>>>,
}

impl InstanceSupport {
    pub fn add(&self, listener: Arc<dyn InstanceListener>) {
        self.listeners.write().push(listener);
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn fire(
        &self,
        kind: InstanceEventKind,
        wrapper: &str,
        filter: Option<&str>,
        error: Option<&ServletError>,
    ) {
        let listeners = self.listeners.read();
        if listeners.is_empty() {
            return;
        }
        let event = InstanceEvent {
            kind,
            wrapper,
            filter,
            error,
        };
        for listener in listeners.iter() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.instance_event(&event)
            }));
            if outcome.is_err() {
                warn!(servlet = %wrapper, kind = ?kind, "Instance listener panicked");
            }
        }
    }
}
