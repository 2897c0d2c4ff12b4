// Filter definitions, mappings and the per-request filter chain
// Chains are built fresh for every dispatch and released afterwards

use crate::context::Context;
use crate::error::ServletError;
use crate::http::{DispatcherType, DispatcherTypes, Request, Response, INCLUDE_PATH_INFO, INCLUDE_SERVLET_PATH};
use crate::listener::InstanceEventKind;
use crate::loader::Loader;
use crate::servlet::{Filter, FilterClass, FilterConfig, Servlet};
use crate::wrapper::Wrapper;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, trace};

/// A named filter declaration
#[derive(Clone, Default)]
pub struct FilterDef {
    pub filter_name: String,
    /// Class name resolved through the loader
    pub filter_class: Option<String>,
    /// Already resolved class
    pub class: Option<FilterClass>,
    /// Pre-built instance
    pub filter: Option<Arc<dyn Filter>>,
    pub init_params: BTreeMap<String, String>,
    pub async_supported: bool,
    pub description: Option<String>,
}

impl FilterDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            filter_name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.filter_class = Some(class_name.into());
        self
    }

    pub fn with_class(mut self, class: FilterClass) -> Self {
        self.filter_class = Some(class.name().to_string());
        self.class = Some(class);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filter_class = Some(filter.class_name().to_string());
        self.filter = Some(filter);
        self
    }

    pub fn with_init_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.init_params.insert(name.into(), value.into());
        self
    }

    /// Has a class, class name or instance been supplied?
    pub fn has_class(&self) -> bool {
        self.filter_class.is_some() || self.class.is_some() || self.filter.is_some()
    }
}

impl fmt::Debug for FilterDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDef")
            .field("filter_name", &self.filter_name)
            .field("filter_class", &self.filter_class)
            .field("init_params", &self.init_params)
            .field("async_supported", &self.async_supported)
            .finish()
    }
}

/// Maps a filter onto either a servlet name or a URL pattern
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterMap {
    pub filter_name: String,
    pub servlet_name: Option<String>,
    pub url_pattern: Option<String>,
    pub dispatcher_types: DispatcherTypes,
}

impl FilterMap {
    pub fn for_url(filter_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            filter_name: filter_name.into(),
            url_pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn for_servlet(filter_name: impl Into<String>, servlet: impl Into<String>) -> Self {
        Self {
            filter_name: filter_name.into(),
            servlet_name: Some(servlet.into()),
            ..Default::default()
        }
    }

    pub fn with_dispatchers(mut self, types: &[DispatcherType]) -> Self {
        self.dispatcher_types = DispatcherTypes::of(types);
        self
    }

    fn matches_url(&self, path: Option<&str>) -> bool {
        match (&self.url_pattern, path) {
            (Some(pattern), Some(path)) => url_pattern_matches(pattern, path),
            _ => false,
        }
    }

    fn matches_servlet(&self, servlet_name: &str) -> bool {
        match &self.servlet_name {
            Some(name) => name == "*" || name == servlet_name,
            None => false,
        }
    }
}

/// Servlet-style URL pattern match against a context-relative path
pub fn url_pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == "/*" || pattern == path {
        return true;
    }
    if pattern == "/" {
        return false;
    }
    if let Some(base) = pattern.strip_suffix("/*") {
        if path == base {
            return true;
        }
        return path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'));
    }
    if let Some(ext) = pattern.strip_prefix("*.") {
        let last = path.rsplit('/').next().unwrap_or(path);
        return last
            .rsplit_once('.')
            .is_some_and(|(_, e)| e == ext);
    }
    false
}

/// A started filter: definition, live instance and its config
pub struct ApplicationFilterConfig {
    def: FilterDef,
    filter: Arc<dyn Filter>,
    config: FilterConfig,
}

impl ApplicationFilterConfig {
    /// Resolve, instantiate and initialize the filter described by `def`
    pub async fn new(context: &Arc<Context>, def: FilterDef) -> Result<Self, ServletError> {
        let filter = match &def.filter {
            Some(filter) => filter.clone(),
            None => resolve_filter_class(context, &def)?.instantiate()?,
        };
        let config = FilterConfig::new(
            def.filter_name.clone(),
            def.init_params.clone(),
            Arc::downgrade(context),
        );

        match AssertUnwindSafe(filter.init(&config)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(payload) => return Err(ServletError::from_panic(payload)),
        }
        debug!(context = %context.path(), filter = %def.filter_name, "Filter initialized");
        Ok(Self { def, filter, config })
    }

    pub fn filter_name(&self) -> &str {
        &self.def.filter_name
    }

    pub fn filter(&self) -> &Arc<dyn Filter> {
        &self.filter
    }

    pub fn filter_def(&self) -> &FilterDef {
        &self.def
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Destroy the filter instance
    pub async fn release(&self) {
        if AssertUnwindSafe(self.filter.destroy()).catch_unwind().await.is_err() {
            tracing::error!(filter = %self.def.filter_name, "Filter destroy panicked");
        }
    }
}

fn resolve_filter_class(context: &Context, def: &FilterDef) -> Result<FilterClass, ServletError> {
    if let Some(class) = &def.class {
        return Ok(class.clone());
    }
    let Some(class_name) = &def.filter_class else {
        return Err(ServletError::service(format!(
            "no filter class has been specified for filter {}",
            def.filter_name
        )));
    };
    let loader: Option<Arc<dyn Loader>> = if context.container_loader().provides(class_name) {
        Some(context.container_loader().clone() as Arc<dyn Loader>)
    } else {
        context.loader()
    };
    loader
        .and_then(|l| l.filter_class(class_name))
        .ok_or_else(|| ServletError::service(format!("cannot find filter class {}", class_name)))
}

/// Ordered filters plus the terminal servlet for one dispatch
pub struct FilterChain {
    filters: Vec<Arc<ApplicationFilterConfig>>,
    pos: usize,
    servlet: Option<Arc<dyn Servlet>>,
    wrapper: Option<Arc<Wrapper>>,
    serviced: bool,
}

impl FilterChain {
    pub fn new(servlet: Arc<dyn Servlet>, wrapper: Arc<Wrapper>) -> Self {
        Self {
            filters: Vec::new(),
            pos: 0,
            servlet: Some(servlet),
            wrapper: Some(wrapper),
            serviced: false,
        }
    }

    pub fn add_filter(&mut self, config: Arc<ApplicationFilterConfig>) {
        // A filter is added at most once per chain
        if self
            .filters
            .iter()
            .any(|f| f.filter_name() == config.filter_name())
        {
            return;
        }
        self.filters.push(config);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Cursor position: number of filters invoked so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.filter_name().to_string()).collect()
    }

    /// Invoke the next filter, or the servlet once every filter has run
    pub fn do_filter<'a>(
        &'a mut self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), ServletError>> {
        async move {
            let wrapper_name = self
                .wrapper
                .as_ref()
                .map(|w| w.name().to_string())
                .unwrap_or_default();

            if self.pos < self.filters.len() {
                let config = self.filters[self.pos].clone();
                self.pos += 1;
                trace!(filter = %config.filter_name(), pos = self.pos, "Invoking filter");

                let support = self.wrapper.clone();
                if let Some(w) = &support {
                    w.instance_support().fire(
                        InstanceEventKind::BeforeFilter,
                        &wrapper_name,
                        Some(config.filter_name()),
                        None,
                    );
                }

                let outcome = AssertUnwindSafe(config.filter().do_filter(req, resp, self))
                    .catch_unwind()
                    .await;
                let result = classify(outcome, "filter execution threw an exception");

                if let Some(w) = &support {
                    w.instance_support().fire(
                        InstanceEventKind::AfterFilter,
                        &wrapper_name,
                        Some(config.filter_name()),
                        result.as_ref().err(),
                    );
                }
                return result;
            }

            if self.serviced {
                return Err(ServletError::service(
                    "filter chain has already invoked the servlet",
                ));
            }
            let Some(servlet) = self.servlet.clone() else {
                return Err(ServletError::service("filter chain has no servlet"));
            };
            self.serviced = true;

            let support = self.wrapper.clone();
            if let Some(w) = &support {
                w.instance_support()
                    .fire(InstanceEventKind::BeforeService, &wrapper_name, None, None);
            }

            let outcome = AssertUnwindSafe(servlet.service(req, resp))
                .catch_unwind()
                .await;
            let result = classify(outcome, "servlet execution threw an exception");

            if let Some(w) = &support {
                w.instance_support().fire(
                    InstanceEventKind::AfterService,
                    &wrapper_name,
                    None,
                    result.as_ref().err(),
                );
            }
            result
        }
        .boxed()
    }

    /// Drop every reference so nothing request-scoped outlives the dispatch
    pub fn release(&mut self) {
        self.filters.clear();
        self.pos = 0;
        self.servlet = None;
        self.wrapper = None;
        self.serviced = false;
    }
}

/// Keep I/O and servlet failures as they are; wrap application errors and panics
fn classify(
    outcome: Result<Result<(), ServletError>, Box<dyn std::any::Any + Send>>,
    message: &str,
) -> Result<(), ServletError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e @ ServletError::Application(_))) => Err(ServletError::wrap(message, e)),
        Ok(Err(e)) => Err(e),
        Err(payload) => Err(ServletError::wrap(message, ServletError::from_panic(payload))),
    }
}

/// Context-relative path the current dispatch targets. An include keeps the
/// outer request's URI, so its target comes from the include attributes.
pub(crate) fn dispatch_path(req: &Request) -> String {
    if req.dispatcher_type() == DispatcherType::Include {
        if let Some(servlet_path) = req.attribute(INCLUDE_SERVLET_PATH).and_then(|v| v.as_str()) {
            let path_info = req
                .attribute(INCLUDE_PATH_INFO)
                .and_then(|v| v.as_str())
                .unwrap_or("");
            return format!("{}{}", servlet_path, path_info);
        }
    }
    req.context_relative_path().to_string()
}

/// Build the filter chain for a dispatch of `servlet` through `wrapper`.
///
/// URL-pattern mappings are considered first, then servlet-name mappings, each in
/// declared order. Filters whose configuration is not started are skipped.
pub fn create_filter_chain(
    context: &Context,
    req: &Request,
    wrapper: &Arc<Wrapper>,
    servlet: Arc<dyn Servlet>,
) -> FilterChain {
    let mut chain = FilterChain::new(servlet, wrapper.clone());
    let dispatcher = req.dispatcher_type();
    let path = dispatch_path(req);
    let maps = context.find_filter_maps();
    if maps.is_empty() {
        return chain;
    }

    for map in maps
        .iter()
        .filter(|m| m.dispatcher_types.matches(dispatcher) && m.matches_url(Some(&path)))
    {
        if let Some(config) = context.find_filter_config(&map.filter_name) {
            chain.add_filter(config);
        }
    }

    for map in maps
        .iter()
        .filter(|m| m.dispatcher_types.matches(dispatcher) && m.matches_servlet(wrapper.name()))
    {
        if let Some(config) = context.find_filter_config(&map.filter_name) {
            chain.add_filter(config);
        }
    }

    trace!(servlet = %wrapper.name(), filters = ?chain.filter_names(), "Filter chain built");
    chain
}
