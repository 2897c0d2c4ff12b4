// Virtual host
// Owns the deployed contexts and routes each request to the longest matching context path

use crate::context::{display_path, Context};
use crate::error::{ContainerError, LifecycleError};
use crate::error_page::{ErrorPage, ErrorPageTable};
use crate::http::{normalize_path, Request, Response};
use crate::observability::request_span;
use crate::valve::{HostValve, Pipeline, Valve};
use hyper::StatusCode;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, Instrument};

pub struct Host {
    name: String,
    contexts: RwLock<BTreeMap<String, Arc<Context>>>,
    error_pages: Arc<RwLock<ErrorPageTable>>,
    pipeline: Pipeline,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        let error_pages = Arc::new(RwLock::new(ErrorPageTable::new()));
        let basic: Arc<dyn Valve> = Arc::new(HostValve::new(error_pages.clone()));
        Self {
            name: name.into(),
            contexts: RwLock::new(BTreeMap::new()),
            error_pages,
            pipeline: Pipeline::new(basic),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn add_valve(&self, valve: Arc<dyn Valve>) {
        self.pipeline.add_valve(valve);
    }

    pub fn add_context(&self, context: Arc<Context>) -> Result<(), ContainerError> {
        let mut contexts = self.contexts.write();
        if contexts.contains_key(context.path()) {
            return Err(ContainerError::Duplicate {
                kind: "context",
                name: display_path(context.path()),
            });
        }
        debug!(host = %self.name, context = %display_path(context.path()), "Adding context");
        contexts.insert(context.path().to_string(), context);
        Ok(())
    }

    pub fn remove_context(&self, path: &str) -> Option<Arc<Context>> {
        self.contexts.write().remove(path)
    }

    pub fn find_context(&self, path: &str) -> Option<Arc<Context>> {
        self.contexts.read().get(path).cloned()
    }

    pub fn contexts(&self) -> Vec<Arc<Context>> {
        self.contexts.read().values().cloned().collect()
    }

    /// Host-level page; its location is a file on disk
    pub fn add_error_page(&self, page: ErrorPage) -> Result<(), ContainerError> {
        page.validate()?;
        self.error_pages.write().insert(page);
        Ok(())
    }

    /// Context whose path is the longest segment-wise prefix of `uri`.
    /// The root context ("") matches everything.
    pub fn map(&self, uri: &str) -> Option<Arc<Context>> {
        let path = uri.split('?').next().unwrap_or(uri);
        let contexts = self.contexts.read();
        let mut candidate = path;
        loop {
            if let Some(context) = contexts.get(candidate) {
                return Some(context.clone());
            }
            match candidate.rfind('/') {
                Some(idx) => candidate = &candidate[..idx],
                None => return None,
            }
        }
    }

    /// Run one request through the host pipeline
    pub async fn invoke(&self, mut req: Request) -> Response {
        let span = request_span(req.method().as_str(), req.request_uri());
        async move {
            let mut resp = Response::new();
            let Some(uri) = normalize_path(req.request_uri()) else {
                debug!(uri = %req.request_uri(), "Request path escapes the root");
                let _ = resp.send_error(StatusCode::BAD_REQUEST, Some(req.request_uri()));
                return resp;
            };
            req.set_request_uri(uri);
            let Some(context) = self.map(req.request_uri()) else {
                debug!(uri = %req.request_uri(), "No context for request");
                let _ = resp.send_error(StatusCode::NOT_FOUND, Some(req.request_uri()));
                return resp;
            };
            req.set_context_path(context.path());
            req.set_context(Some(context));

            if let Err(e) = self.pipeline.invoke(&mut req, &mut resp).await {
                error!(uri = %req.request_uri(), error = %e, "Host pipeline failed");
                resp.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                resp.set_error();
            }
            debug!(status = resp.status().as_u16(), "Request complete");
            resp
        }
        .instrument(span)
        .await
    }

    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.pipeline.start().await
    }

    /// Start every context. A context that fails stays deployed but unavailable;
    /// the number of failures is returned.
    pub async fn start_contexts(&self) -> usize {
        let mut failed = 0;
        for context in self.contexts() {
            match context.start().await {
                Ok(()) => info!(host = %self.name, context = %display_path(context.path()), "Context started"),
                Err(e) => {
                    error!(host = %self.name, context = %display_path(context.path()), error = %e, "Context failed to start");
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Stop and destroy every context, in reverse path order
    pub async fn stop(&self) {
        for context in self.contexts().iter().rev() {
            if let Err(e) = context.destroy().await {
                error!(host = %self.name, context = %display_path(context.path()), error = %e, "Context shutdown failed");
            }
        }
        self.pipeline.stop().await;
        info!(host = %self.name, "Host stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_picks_longest_context_path() {
        let host = Host::new("localhost");
        host.add_context(Context::new("")).unwrap();
        host.add_context(Context::new("/shop")).unwrap();
        host.add_context(Context::new("/shop/admin")).unwrap();

        assert_eq!(host.map("/shop/admin/users").unwrap().path(), "/shop/admin");
        assert_eq!(host.map("/shop/cart?id=1").unwrap().path(), "/shop");
        assert_eq!(host.map("/shopping").unwrap().path(), "");
        assert_eq!(host.map("/").unwrap().path(), "");
    }

    #[test]
    fn test_duplicate_context_path_is_rejected() {
        let host = Host::new("localhost");
        host.add_context(Context::new("/a")).unwrap();
        assert!(matches!(
            host.add_context(Context::new("/a")),
            Err(ContainerError::Duplicate { kind: "context", .. })
        ));
        assert!(host.remove_context("/a").is_some());
        assert!(host.find_context("/a").is_none());
    }

    #[tokio::test]
    async fn test_unmapped_request_is_not_found() {
        let host = Host::new("localhost");
        host.add_context(Context::new("/a")).unwrap();
        let resp = host.invoke(Request::get("/b/x")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unstarted_context_has_no_mappings() {
        let host = Host::new("localhost");
        host.add_context(Context::new("/a")).unwrap();
        let resp = host.invoke(Request::get("/a/x")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
