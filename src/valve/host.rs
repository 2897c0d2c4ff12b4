// Host valve
// Binds the context, runs its pipeline and turns failures into error page dispatches

use super::{exception, Next, Valve};
use crate::binding;
use crate::context::Context;
use crate::error::ServletError;
use crate::error_page::{ErrorPage, ErrorPageTable};
use crate::http::{
    Request, Response, ERROR_EXCEPTION_TYPE, ERROR_MESSAGE, ERROR_REQUEST_URI, ERROR_SERVLET_NAME,
    ERROR_STATUS_CODE, SESSION_COOKIE_NAME,
};
use async_trait::async_trait;
use hyper::header::{HeaderValue, SET_COOKIE};
use hyper::StatusCode;
use parking_lot::RwLock;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Basic valve of the host pipeline.
///
/// Host-level error pages point at files on disk rather than context paths;
/// they are consulted only when the context has no page of its own.
pub struct HostValve {
    error_pages: Arc<RwLock<ErrorPageTable>>,
}

impl HostValve {
    pub fn new(error_pages: Arc<RwLock<ErrorPageTable>>) -> Self {
        Self { error_pages }
    }

    async fn process(&self, context: &Arc<Context>, req: &mut Request, resp: &mut Response) {
        let requested = req.requested_session_id();
        // Touch the session so the access time reflects this request
        context.session(req, false);

        context.fire_request_initialized(req);

        // A failing request listener already recorded an exception
        if !resp.is_error() && req.exception().is_none() {
            let pipeline = context.pipeline();
            let result = if pipeline.has_custom_valves() {
                pipeline.invoke(req, resp).await
            } else {
                pipeline.basic().invoke(req, resp, Next::end()).await
            };
            if let Err(e) = result {
                error!(uri = %req.request_uri(), error = %e, "Context pipeline failed");
                exception(req, resp, e);
            }
        }

        if let Some(err) = req.exception().cloned() {
            self.throwable(context, req, resp, &err).await;
        } else if resp.is_error() {
            self.status(context, req, resp).await;
        }

        context.fire_request_destroyed(req);

        if let Some(id) = req.session_id() {
            if requested.as_deref() != Some(id) {
                let path = if context.path().is_empty() { "/" } else { context.path() };
                let cookie = format!("{}={}; Path={}; HttpOnly", SESSION_COOKIE_NAME, id, path);
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    resp.set_header(SET_COOKIE, value);
                }
            }
        }
    }

    /// Dispatch for a recorded exception: the page for the error itself, then
    /// for its root cause, then the default page. Without one the status path takes over.
    async fn throwable(&self, context: &Arc<Context>, req: &mut Request, resp: &mut Response, err: &ServletError) {
        let root = err.root_cause();
        if root.is_client_abort() {
            debug!(uri = %req.request_uri(), "Client went away; no error page");
            return;
        }

        let mut page = context.find_error_page_for_error(err);
        if page.is_none() && !std::ptr::eq(root, err) {
            page = context.find_error_page_for_error(root);
        }
        let page = page.or_else(|| context.default_error_page());

        match page {
            Some(page) => {
                resp.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                set_error_attributes(req, StatusCode::INTERNAL_SERVER_ERROR, &root.to_string());
                req.set_attribute(ERROR_EXCEPTION_TYPE, Value::String(root.exception_type().to_string()));
                self.custom(context, req, resp, &page).await;
            }
            None => {
                resp.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                resp.set_error();
                self.status(context, req, resp).await;
            }
        }
    }

    /// Dispatch for an error status: context page for the code, the context
    /// default for 4xx and 5xx, then the host page
    async fn status(&self, context: &Arc<Context>, req: &mut Request, resp: &mut Response) {
        let status = resp.status();
        if !resp.is_error() || status.as_u16() < 400 {
            return;
        }

        let page = context
            .find_error_page_for_status(status.as_u16())
            .or_else(|| {
                (400..=599)
                    .contains(&status.as_u16())
                    .then(|| context.default_error_page())
                    .flatten()
            });

        let message = resp.message().unwrap_or_default().to_string();
        if let Some(page) = page {
            set_error_attributes(req, status, &message);
            self.custom(context, req, resp, &page).await;
            return;
        }

        let host_page = {
            let pages = self.error_pages.read();
            pages
                .find_by_status(status.as_u16())
                .or_else(|| pages.default_page())
                .cloned()
        };
        if let Some(page) = host_page {
            self.host_page(context, resp, &page).await;
        }
    }

    /// Run a context error page: include into a committed response, otherwise
    /// replace the buffered content. The error status survives the dispatch.
    async fn custom(&self, context: &Arc<Context>, req: &mut Request, resp: &mut Response, page: &ErrorPage) {
        debug!(location = %page.location, status = resp.status().as_u16(), "Processing error page");
        let Some(dispatcher) = context.request_dispatcher(&page.location) else {
            warn!(location = %page.location, "Error page location maps to no servlet");
            return;
        };
        if let Some(name) = req.wrapper().map(|w| w.name().to_string()) {
            req.set_attribute(ERROR_SERVLET_NAME, Value::String(name));
        }

        let status = resp.status();
        let result = if resp.is_committed() {
            dispatcher.include(req, resp).await
        } else {
            match resp.reset_buffer() {
                Ok(()) => dispatcher.error(req, resp).await,
                Err(e) => Err(e),
            }
        };
        resp.set_status(status);
        resp.flush_buffer();

        if let Err(e) = result {
            error!(location = %page.location, error = %e, "Error page dispatch failed");
        }
    }

    /// Copy a host-level page file into the response
    async fn host_page(&self, context: &Context, resp: &mut Response, page: &ErrorPage) {
        if resp.is_committed() {
            return;
        }
        match tokio::fs::read(&page.location).await {
            Ok(bytes) => {
                let content_type = Path::new(&page.location)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| context.mime_type_for(n))
                    .unwrap_or_else(|| "text/html".to_string());
                if let Err(e) = resp.reset_buffer() {
                    warn!(error = %e, "Cannot reset buffer for host error page");
                    return;
                }
                resp.set_content_type(&content_type);
                resp.write(&bytes);
                resp.flush_buffer();
            }
            Err(e) => warn!(location = %page.location, error = %e, "Cannot read host error page"),
        }
    }
}

fn set_error_attributes(req: &mut Request, status: StatusCode, message: &str) {
    let uri = req.request_uri().to_string();
    req.set_attribute(ERROR_REQUEST_URI, Value::String(uri));
    req.set_attribute(ERROR_STATUS_CODE, Value::from(status.as_u16()));
    req.set_attribute(ERROR_MESSAGE, Value::String(message.to_string()));
}

#[async_trait]
impl Valve for HostValve {
    async fn invoke(&self, req: &mut Request, resp: &mut Response, _next: Next<'_>) -> Result<(), ServletError> {
        let Some(context) = req.context().cloned() else {
            super::send_error(resp, StatusCode::INTERNAL_SERVER_ERROR, "no context to process this request");
            return Ok(());
        };
        binding::scope(context.binding(), self.process(&context, req, resp)).await;
        Ok(())
    }
}
