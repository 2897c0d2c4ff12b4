// Container initializers
// Startup hooks discovered outside the core and run before context listeners

use super::{display_path, Context};
use crate::error::{LifecycleError, ServletError};
use crate::lifecycle::ContainerEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// WebSocket container bootstrap
pub const WEBSOCKET_INITIALIZER: &str = "org.glassfish.tyrus.servlet.TyrusServletContainerInitializer";

/// Faces bootstrap. It starts the WebSocket container itself, so it has to run
/// after the WebSocket initializer or its container gets overwritten.
pub const FACES_INITIALIZER: &str = "com.sun.faces.config.FacesInitializer";

/// Startup hook called with the classes it declared interest in
#[async_trait]
pub trait ServletContainerInitializer: Send + Sync {
    fn name(&self) -> &str;

    async fn on_startup(&self, classes: &[String], context: &Context) -> Result<(), ServletError>;
}

/// Order initializers for invocation. A Faces initializer seen before the
/// WebSocket one is moved right after it; without a WebSocket initializer it
/// runs last. Everything else keeps discovery order.
pub fn order_initializers<T>(mut initializers: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut faces = None;
    let mut i = 0;
    while i < initializers.len() {
        let current = name(&initializers[i]);
        if current == FACES_INITIALIZER && faces.is_none() {
            faces = Some(initializers.remove(i));
            continue;
        }
        if current == WEBSOCKET_INITIALIZER {
            if let Some(entry) = faces.take() {
                initializers.insert(i + 1, entry);
            }
            break;
        }
        i += 1;
    }
    if let Some(entry) = faces {
        initializers.push(entry);
    }
    initializers
}

impl Context {
    /// Invoke every registered initializer in order. The first failure aborts startup.
    pub(crate) async fn call_initializers(&self) -> Result<(), LifecycleError> {
        let registered = self.initializers.read().clone();
        if registered.is_empty() {
            return Ok(());
        }
        let ordered: Vec<(Arc<dyn ServletContainerInitializer>, Vec<String>)> =
            order_initializers(registered, |(init, _)| init.name());

        for (initializer, classes) in ordered {
            let name = initializer.name().to_string();
            debug!(context = %display_path(self.path()), initializer = %name, classes = classes.len(), "Calling container initializer");
            self.fire_container_event(ContainerEvent::BeforeInitializerOnStartup(name.clone()));
            initializer
                .on_startup(&classes, self)
                .await
                .map_err(|source| LifecycleError::Initializer {
                    name: name.clone(),
                    source,
                })?;
            self.fire_container_event(ContainerEvent::AfterInitializerOnStartup(name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(names: &[&'static str]) -> Vec<&'static str> {
        order_initializers(names.to_vec(), |n| n)
    }

    #[test]
    fn test_faces_moves_after_websocket() {
        assert_eq!(
            order(&["a", FACES_INITIALIZER, "b", WEBSOCKET_INITIALIZER, "c"]),
            vec!["a", "b", WEBSOCKET_INITIALIZER, FACES_INITIALIZER, "c"]
        );
    }

    #[test]
    fn test_faces_already_after_websocket_is_untouched() {
        assert_eq!(
            order(&[WEBSOCKET_INITIALIZER, "a", FACES_INITIALIZER]),
            vec![WEBSOCKET_INITIALIZER, "a", FACES_INITIALIZER]
        );
    }

    #[test]
    fn test_faces_without_websocket_runs_last() {
        assert_eq!(
            order(&[FACES_INITIALIZER, "a", "b"]),
            vec!["a", "b", FACES_INITIALIZER]
        );
    }

    struct Registering;

    #[async_trait]
    impl ServletContainerInitializer for Registering {
        fn name(&self) -> &str {
            "registering"
        }

        async fn on_startup(&self, classes: &[String], context: &Context) -> Result<(), ServletError> {
            for class in classes {
                context
                    .add_listener_class(class.clone())
                    .map_err(|e| ServletError::service(e.to_string()))?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initializer_receives_its_classes() {
        let context = Context::new("/app");
        context.add_servlet_container_initializer(Arc::new(Registering), vec!["com.example.L".into()]);

        context.call_initializers().await.unwrap();
        assert_eq!(context.listener_classes(), vec!["com.example.L".to_string()]);
    }
}
