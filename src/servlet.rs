// Servlet and filter contracts
// Application components plus the "class" handles the loader resolves by name

use crate::context::Context;
use crate::error::ServletError;
use crate::filter_chain::FilterChain;
use crate::http::{Request, Response};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A request-handling component managed by a [`Wrapper`](crate::wrapper::Wrapper)
#[async_trait]
pub trait Servlet: Send + Sync + 'static {
    async fn init(&self, _config: &ServletConfig) -> Result<(), ServletError> {
        Ok(())
    }

    async fn service(&self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError>;

    async fn destroy(&self) -> Result<(), ServletError> {
        Ok(())
    }

    /// Servlets that must never serve two requests at once return `true`;
    /// the wrapper then keeps a bounded pool of dedicated instances.
    /// Deprecated contract, kept for legacy applications.
    fn single_thread_model(&self) -> bool {
        false
    }

    fn class_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A request/response interceptor invoked through a [`FilterChain`]
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    async fn init(&self, _config: &FilterConfig) -> Result<(), ServletError> {
        Ok(())
    }

    async fn do_filter(
        &self,
        req: &mut Request,
        resp: &mut Response,
        chain: &mut FilterChain,
    ) -> Result<(), ServletError>;

    async fn destroy(&self) {}

    fn class_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Configuration handed to [`Servlet::init`]
#[derive(Clone)]
pub struct ServletConfig {
    servlet_name: String,
    init_params: BTreeMap<String, String>,
    context: Weak<Context>,
}

impl ServletConfig {
    pub fn new(
        servlet_name: impl Into<String>,
        init_params: BTreeMap<String, String>,
        context: Weak<Context>,
    ) -> Self {
        Self {
            servlet_name: servlet_name.into(),
            init_params,
            context,
        }
    }

    pub fn servlet_name(&self) -> &str {
        &self.servlet_name
    }

    pub fn init_parameter(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }

    pub fn init_parameters(&self) -> &BTreeMap<String, String> {
        &self.init_params
    }

    /// Owning context, if it is still alive
    pub fn servlet_context(&self) -> Option<Arc<Context>> {
        self.context.upgrade()
    }
}

/// Configuration handed to [`Filter::init`]
#[derive(Clone)]
pub struct FilterConfig {
    filter_name: String,
    init_params: BTreeMap<String, String>,
    context: Weak<Context>,
}

impl FilterConfig {
    pub fn new(
        filter_name: impl Into<String>,
        init_params: BTreeMap<String, String>,
        context: Weak<Context>,
    ) -> Self {
        Self {
            filter_name: filter_name.into(),
            init_params,
            context,
        }
    }

    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    pub fn init_parameter(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }

    pub fn servlet_context(&self) -> Option<Arc<Context>> {
        self.context.upgrade()
    }
}

type ServletFactory = dyn Fn() -> Result<Arc<dyn Servlet>, ServletError> + Send + Sync;
type FilterFactory = dyn Fn() -> Result<Arc<dyn Filter>, ServletError> + Send + Sync;

/// A loadable servlet type: a name plus a factory producing fresh instances
#[derive(Clone)]
pub struct ServletClass {
    name: String,
    factory: Arc<ServletFactory>,
}

impl ServletClass {
    /// Class for a `Default`-constructible servlet, named after its Rust type
    pub fn of<S: Servlet + Default>() -> Self {
        Self::from_fn(std::any::type_name::<S>(), || {
            Ok(Arc::new(S::default()) as Arc<dyn Servlet>)
        })
    }

    pub fn from_fn<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Servlet>, ServletError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self) -> Result<Arc<dyn Servlet>, ServletError> {
        (self.factory)()
    }
}

impl fmt::Debug for ServletClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServletClass").field(&self.name).finish()
    }
}

/// A loadable filter type
#[derive(Clone)]
pub struct FilterClass {
    name: String,
    factory: Arc<FilterFactory>,
}

impl FilterClass {
    pub fn of<F: Filter + Default>() -> Self {
        Self::from_fn(std::any::type_name::<F>(), || {
            Ok(Arc::new(F::default()) as Arc<dyn Filter>)
        })
    }

    pub fn from_fn<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Filter>, ServletError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self) -> Result<Arc<dyn Filter>, ServletError> {
        (self.factory)()
    }
}

impl fmt::Debug for FilterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterClass").field(&self.name).finish()
    }
}

/// Multipart upload limits declared for a servlet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartConfig {
    #[serde(default)]
    pub location: String,
    /// -1 means unlimited
    #[serde(default = "unlimited")]
    pub max_file_size: i64,
    #[serde(default = "unlimited")]
    pub max_request_size: i64,
    #[serde(default)]
    pub file_size_threshold: u64,
}

fn unlimited() -> i64 {
    -1
}
