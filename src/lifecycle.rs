// Component lifecycle and container events
// A small state machine embedded in each component plus publish/subscribe for observers

use crate::context::Context;
use crate::error::LifecycleError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle states shared by contexts and wrappers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    New,
    Initialized,
    Starting,
    Available,
    Stopping,
    Stopped,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::New => "new",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Available => "available",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Embedded lifecycle state holder
pub struct Lifecycle {
    component: String,
    state: RwLock<LifecycleState>,
}

impl Lifecycle {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            state: RwLock::new(LifecycleState::New),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn set(&self, state: LifecycleState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(component = %self.component, from = %*current, to = %state, "Lifecycle transition");
            *current = state;
        }
    }

    /// Fail unless the current state is one of `allowed`
    pub fn require(
        &self,
        operation: &'static str,
        allowed: &[LifecycleState],
    ) -> Result<LifecycleState, LifecycleError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(LifecycleError::InvalidState {
                component: self.component.clone(),
                state: state.to_string(),
                operation,
            })
        }
    }

    pub fn is_available(&self) -> bool {
        self.state() == LifecycleState::Available
    }
}

/// Lifecycle events delivered to [`LifecycleListener`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Init,
    BeforeStart,
    /// Fired while subordinate components start; descriptor processing happens here
    ConfigureStart,
    Start,
    AfterStart,
    BeforeStop,
    Stop,
    AfterStop,
    Destroy,
}

/// Observer of context lifecycle transitions.
///
/// Errors returned from `ConfigureStart` abort startup; errors from any other
/// event are logged and ignored.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn lifecycle_event(
        &self,
        context: &Context,
        event: LifecycleEvent,
    ) -> Result<(), LifecycleError>;
}

/// A subordinate component started and stopped with its context (realm, logger, ...)
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), LifecycleError>;

    /// Called during teardown even if `start` never ran or failed
    async fn stop(&self) -> Result<(), LifecycleError>;
}

/// Events published by containers (contexts and wrappers) as their configuration changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContainerEvent {
    AddChild(String),
    RemoveChild(String),
    AddServletMapping(String),
    RemoveServletMapping(String),
    AddFilterMap(String),
    AddErrorPage(String),
    AddWelcomeFile(String),
    AddInitParameter(String),
    Load(String),
    Unload(String),
    BeforeContextInitialized(String),
    AfterContextInitialized(String),
    BeforeContextDestroyed(String),
    AfterContextDestroyed(String),
    BeforeInitializerOnStartup(String),
    AfterInitializerOnStartup(String),
    Reload(String),
}

pub trait ContainerListener: Send + Sync {
    fn container_event(&self, source: &str, event: &ContainerEvent);
}

/// Fan-out helper for container events
#[derive(Default)]
pub struct ContainerEventSupport {
    listeners: RwLock<Vec<Arc<dyn ContainerListener>>>,
}

impl ContainerEventSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ContainerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove(&self, listener: &Arc<dyn ContainerListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn fire(&self, source: &str, event: ContainerEvent) {
        // Snapshot so listeners may register further listeners
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.container_event(source, &event)
            }));
            if result.is_err() {
                warn!(source = %source, event = ?event, "Container listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder(Mutex<Vec<ContainerEvent>>);

    impl ContainerListener for Recorder {
        fn container_event(&self, _source: &str, event: &ContainerEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn test_require_rejects_wrong_state() {
        let lifecycle = Lifecycle::new("ctx");
        assert!(lifecycle.require("start", &[LifecycleState::New]).is_ok());

        lifecycle.set(LifecycleState::Destroyed);
        let err = lifecycle.require("start", &[LifecycleState::New]).unwrap_err();
        assert!(err.to_string().contains("destroyed"));
    }

    #[test]
    fn test_container_events_reach_listeners() {
        let support = ContainerEventSupport::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        support.add(recorder.clone());

        support.fire("/app", ContainerEvent::AddChild("echo".into()));
        support.fire("/app", ContainerEvent::Load("echo".into()));

        assert_eq!(
            *recorder.0.lock(),
            vec![
                ContainerEvent::AddChild("echo".into()),
                ContainerEvent::Load("echo".into())
            ]
        );
    }
}
