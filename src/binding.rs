// Task-scoped context binding
// Which application's loader and naming environment the current task runs under

use crate::loader::Loader;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static BINDING: ContextBinding;
}

/// Environment bound while a context processes a request or runs a lifecycle phase
#[derive(Clone)]
pub struct ContextBinding {
    context_path: String,
    loader: Option<Arc<dyn Loader>>,
    naming: bool,
}

impl ContextBinding {
    pub fn new(context_path: impl Into<String>, loader: Option<Arc<dyn Loader>>, naming: bool) -> Self {
        Self {
            context_path: context_path.into(),
            loader,
            naming,
        }
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn loader(&self) -> Option<&Arc<dyn Loader>> {
        self.loader.as_ref()
    }

    /// Is a naming environment bound along with the loader?
    pub fn naming(&self) -> bool {
        self.naming
    }
}

impl fmt::Debug for ContextBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBinding")
            .field("context_path", &self.context_path)
            .field("loader", &self.loader.as_ref().map(|l| l.name().to_string()))
            .field("naming", &self.naming)
            .finish()
    }
}

/// Run `fut` with `binding` in place. Whatever was bound before is visible again afterwards.
pub async fn scope<F: Future>(binding: ContextBinding, fut: F) -> F::Output {
    BINDING.scope(binding, fut).await
}

/// Binding of the running task, if any
pub fn current() -> Option<ContextBinding> {
    BINDING.try_with(|b| b.clone()).ok()
}

pub fn current_context_path() -> Option<String> {
    BINDING.try_with(|b| b.context_path.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nested_scopes_restore_outer_binding() {
        assert!(current().is_none());

        scope(ContextBinding::new("/outer", None, false), async {
            assert_eq!(current_context_path().as_deref(), Some("/outer"));

            scope(ContextBinding::new("/inner", None, true), async {
                let inner = current().unwrap();
                assert_eq!(inner.context_path(), "/inner");
                assert!(inner.naming());
            })
            .await;

            assert_eq!(current_context_path().as_deref(), Some("/outer"));
        })
        .await;

        assert!(current().is_none());
    }
}
