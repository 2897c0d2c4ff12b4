// Request dispatcher
// Forward, include and error dispatch to another servlet of the same context

use crate::context::Context;
use crate::error::ServletError;
use crate::filter_chain::create_filter_chain;
use crate::http::{
    DispatcherType, Request, Response, INCLUDE_PATH_INFO, INCLUDE_QUERY_STRING, INCLUDE_REQUEST_URI,
    INCLUDE_SERVLET_PATH,
};
use crate::valve::send_unavailable;
use crate::wrapper::Wrapper;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Dispatcher for one target servlet, obtained from
/// [`Context::request_dispatcher`] or [`Context::named_dispatcher`]
pub struct RequestDispatcher {
    context: Arc<Context>,
    wrapper: Arc<Wrapper>,
    /// Context-relative target path; `None` for named dispatchers
    path: Option<String>,
    servlet_path: String,
    path_info: Option<String>,
    query: Option<String>,
}

/// Request state a dispatch changes and puts back afterwards
struct SavedRequest {
    request_uri: String,
    context_path: String,
    query: Option<String>,
    servlet_path: String,
    path_info: Option<String>,
    dispatcher_type: DispatcherType,
    context: Option<Arc<Context>>,
    wrapper: Option<Arc<Wrapper>>,
}

impl SavedRequest {
    fn capture(req: &Request) -> Self {
        Self {
            request_uri: req.request_uri().to_string(),
            context_path: req.context_path().to_string(),
            query: req.query().map(str::to_string),
            servlet_path: req.servlet_path().to_string(),
            path_info: req.path_info().map(str::to_string),
            dispatcher_type: req.dispatcher_type(),
            context: req.context().cloned(),
            wrapper: req.wrapper().cloned(),
        }
    }

    fn restore(self, req: &mut Request) {
        req.set_request_uri(self.request_uri);
        req.set_context_path(self.context_path);
        req.set_query(self.query);
        req.set_servlet_path(self.servlet_path, self.path_info);
        req.set_dispatcher_type(self.dispatcher_type);
        req.set_context(self.context);
        req.set_wrapper(self.wrapper);
    }
}

impl RequestDispatcher {
    pub(crate) fn new(
        context: Arc<Context>,
        wrapper: Arc<Wrapper>,
        path: String,
        servlet_path: String,
        path_info: Option<String>,
        query: Option<String>,
    ) -> Self {
        Self {
            context,
            wrapper,
            path: Some(path),
            servlet_path,
            path_info,
            query,
        }
    }

    pub(crate) fn named(context: Arc<Context>, wrapper: Arc<Wrapper>) -> Self {
        Self {
            context,
            wrapper,
            path: None,
            servlet_path: String::new(),
            path_info: None,
            query: None,
        }
    }

    pub fn servlet_name(&self) -> &str {
        self.wrapper.name()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Hand the request over to the target. The buffer is discarded first and
    /// the response is committed once the target returns.
    pub async fn forward(&self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        if resp.is_committed() {
            return Err(ServletError::service(
                "cannot forward after the response has been committed",
            ));
        }
        resp.reset_buffer()?;
        self.dispatch(req, resp, DispatcherType::Forward).await?;
        resp.flush_buffer();
        Ok(())
    }

    /// Dispatch to an error page. The caller has prepared the response.
    pub async fn error(&self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        self.dispatch(req, resp, DispatcherType::Error).await
    }

    /// Run the target as part of the current response. The target cannot change
    /// status or headers and sees its own path through the include attributes.
    pub async fn include(&self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        let keys = [
            INCLUDE_REQUEST_URI,
            INCLUDE_SERVLET_PATH,
            INCLUDE_PATH_INFO,
            INCLUDE_QUERY_STRING,
        ];
        let previous: Vec<Option<Value>> = keys.iter().map(|k| req.remove_attribute(k)).collect();

        if let Some(path) = &self.path {
            req.set_attribute(
                INCLUDE_REQUEST_URI,
                Value::String(format!("{}{}", self.context.path(), path)),
            );
            req.set_attribute(INCLUDE_SERVLET_PATH, Value::String(self.servlet_path.clone()));
            if let Some(info) = &self.path_info {
                req.set_attribute(INCLUDE_PATH_INFO, Value::String(info.clone()));
            }
            if let Some(query) = &self.query {
                req.set_attribute(INCLUDE_QUERY_STRING, Value::String(query.clone()));
            }
        }

        let dispatcher_type = req.dispatcher_type();
        let wrapper = req.wrapper().cloned();
        let was_included = resp.is_included();
        req.set_dispatcher_type(DispatcherType::Include);
        req.set_wrapper(Some(self.wrapper.clone()));
        resp.set_included(true);

        let result = invoke_servlet(&self.context, &self.wrapper, req, resp).await;

        resp.set_included(was_included);
        req.set_dispatcher_type(dispatcher_type);
        req.set_wrapper(wrapper);
        for (key, value) in keys.iter().zip(previous) {
            req.remove_attribute(key);
            if let Some(value) = value {
                req.set_attribute(*key, value);
            }
        }
        result
    }

    async fn dispatch(&self, req: &mut Request, resp: &mut Response, kind: DispatcherType) -> Result<(), ServletError> {
        let saved = SavedRequest::capture(req);

        if let Some(path) = &self.path {
            req.set_context_path(self.context.path());
            req.set_request_uri(format!("{}{}", self.context.path(), path));
            req.set_servlet_path(self.servlet_path.clone(), self.path_info.clone());
            // Parameters of the new query take precedence over the original ones
            let query = match (&self.query, &saved.query) {
                (Some(new), Some(old)) => Some(format!("{}&{}", new, old)),
                (Some(new), None) => Some(new.clone()),
                (None, old) => old.clone(),
            };
            req.set_query(query);
        }
        req.set_dispatcher_type(kind);
        req.set_context(Some(self.context.clone()));
        req.set_wrapper(Some(self.wrapper.clone()));
        debug!(servlet = %self.wrapper.name(), dispatch = %kind, uri = %req.request_uri(), "Dispatching request");

        let result = invoke_servlet(&self.context, &self.wrapper, req, resp).await;
        saved.restore(req);
        result
    }
}

/// Run `wrapper`'s servlet through a freshly built filter chain.
/// Allocation is always paired with deallocation and the chain is always released.
async fn invoke_servlet(
    context: &Context,
    wrapper: &Arc<Wrapper>,
    req: &mut Request,
    resp: &mut Response,
) -> Result<(), ServletError> {
    if wrapper.is_unavailable() {
        warn!(servlet = %wrapper.name(), "Dispatch target is currently unavailable");
        send_unavailable(wrapper, resp);
        return Ok(());
    }

    let servlet = match wrapper.allocate().await {
        Ok(servlet) => servlet,
        Err(e @ ServletError::Unavailable { .. }) => {
            wrapper.unavailable(Some(&e));
            send_unavailable(wrapper, resp);
            return Ok(());
        }
        Err(e) => {
            error!(servlet = %wrapper.name(), error = %e, "Allocate exception during dispatch");
            return Err(e);
        }
    };

    let mut chain = create_filter_chain(context, req, wrapper, servlet.clone());
    let mut result = chain.do_filter(req, resp).await;
    chain.release();

    if let Err(e @ ServletError::Unavailable { .. }) = &result {
        wrapper.unavailable(Some(e));
        send_unavailable(wrapper, resp);
        result = Ok(());
    }

    wrapper.deallocate(servlet).await;
    if wrapper.is_permanently_unavailable() {
        if let Err(e) = wrapper.unload().await {
            error!(servlet = %wrapper.name(), error = %e, "Servlet unload failed during dispatch");
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}
